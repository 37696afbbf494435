//! Directional AADT and vehicle-class mode shares.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::config::VehicleOccupancy;
use crate::error::{MetricError, Result};
use crate::metrics::types::RejectedSegment;
use crate::metrics::utility::round_half_even;
use crate::records::{SegmentMetadata, Segmented};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModeShares {
    pub directional_aadt: f64,
    pub aadt_auto: f64,
    pub pct_auto: f64,
    pub pct_bus: f64,
    pub pct_truck: f64,
}

impl ModeShares {
    /// Splits a segment's directional AADT into auto, bus (single-unit) and
    /// truck (combination) shares.
    ///
    /// # Errors
    ///
    /// [`MetricError::DivisionByZero`] when the facility type or the rounded
    /// directional AADT is zero, [`MetricError::NegativeModeShare`] when the
    /// truck counts exceed the directional volume.
    pub fn from_metadata(seg: &SegmentMetadata) -> Result<Self> {
        if seg.facility_type == 0.0 {
            return Err(MetricError::DivisionByZero {
                quantity: "directional_aadt",
                segment_id: seg.segment_id.clone(),
            });
        }
        let directional_aadt = round_half_even(seg.aadt / seg.facility_type);
        if directional_aadt == 0.0 {
            return Err(MetricError::DivisionByZero {
                quantity: "mode shares",
                segment_id: seg.segment_id.clone(),
            });
        }

        let aadt_auto = directional_aadt - (seg.aadt_single_unit + seg.aadt_combination);
        let shares = Self {
            directional_aadt,
            aadt_auto,
            pct_auto: aadt_auto / directional_aadt,
            pct_bus: seg.aadt_single_unit / directional_aadt,
            pct_truck: seg.aadt_combination / directional_aadt,
        };

        for (share, value) in [
            ("auto", shares.pct_auto),
            ("bus", shares.pct_bus),
            ("truck", shares.pct_truck),
        ] {
            if value < 0.0 {
                return Err(MetricError::NegativeModeShare {
                    share,
                    value,
                    segment_id: seg.segment_id.clone(),
                });
            }
        }
        Ok(shares)
    }

    /// Persons per vehicle averaged over the mode mix.
    pub fn average_occupancy(&self, occupancy: &VehicleOccupancy) -> f64 {
        self.pct_auto * occupancy.auto + self.pct_bus * occupancy.bus + self.pct_truck * occupancy.truck
    }

    /// Annual person-miles for auto and bus traffic over `miles`.
    pub fn annual_person_miles(&self, miles: f64, occupancy: &VehicleOccupancy) -> f64 {
        let auto = self.pct_auto * self.directional_aadt * 365.0;
        let bus = self.pct_bus * self.directional_aadt * 365.0;
        miles * (auto * occupancy.auto + bus * occupancy.bus)
    }

    /// Annual truck-miles, occupancy-weighted.
    pub fn annual_truck_miles(&self, miles: f64, occupancy: &VehicleOccupancy) -> f64 {
        miles * self.pct_truck * self.directional_aadt * 365.0 * occupancy.truck
    }
}

/// Segment metadata together with its mode shares.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentProfile {
    pub meta: SegmentMetadata,
    pub shares: ModeShares,
}

impl Segmented for SegmentProfile {
    fn segment_id(&self) -> &str {
        &self.meta.segment_id
    }
}

/// Computes mode shares for every segment.
///
/// Segments whose shares cannot be computed are returned as rejected, or abort
/// the run when `strict` is set.
pub fn profile_segments(
    segments: Vec<SegmentMetadata>,
    strict: bool,
) -> Result<(HashMap<String, SegmentProfile>, Vec<RejectedSegment>)> {
    let mut profiles = HashMap::with_capacity(segments.len());
    let mut rejected = Vec::new();
    for meta in segments {
        match ModeShares::from_metadata(&meta) {
            Ok(shares) => {
                profiles.insert(meta.segment_id.clone(), SegmentProfile { meta, shares });
            }
            Err(e) if !strict && e.is_segment_scoped() => {
                warn!(segment_id = %meta.segment_id, error = %e, "Segment excluded");
                rejected.push(RejectedSegment {
                    segment_id: meta.segment_id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok((profiles, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(aadt: f64, faciltype: f64, singl: f64, combi: f64) -> SegmentMetadata {
        SegmentMetadata {
            segment_id: "114+04369".into(),
            miles: 1.0,
            facility_type: faciltype,
            aadt,
            aadt_single_unit: singl,
            aadt_combination: combi,
            nhs_pct: 100.0,
            linear_id: None,
            active_end_date: None,
            speed_limit_mph: None,
            interstate: true,
        }
    }

    #[test]
    fn test_shares_sum_to_one() {
        let shares = ModeShares::from_metadata(&meta(40001.0, 2.0, 1200.0, 1800.0)).unwrap();
        // 20000.5 rounds to even
        assert_eq!(shares.directional_aadt, 20000.0);
        assert_eq!(shares.aadt_auto, 17000.0);
        let total = shares.pct_auto + shares.pct_bus + shares.pct_truck;
        assert!((total - 1.0).abs() < 1e-12);
        assert!((shares.pct_truck - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_zero_facility_type_is_error() {
        let err = ModeShares::from_metadata(&meta(40000.0, 0.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, MetricError::DivisionByZero { .. }));
    }

    #[test]
    fn test_zero_aadt_is_error() {
        let err = ModeShares::from_metadata(&meta(0.0, 2.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, MetricError::DivisionByZero { .. }));
    }

    #[test]
    fn test_negative_auto_share_flagged() {
        let err = ModeShares::from_metadata(&meta(2000.0, 2.0, 800.0, 400.0)).unwrap_err();
        match err {
            MetricError::NegativeModeShare { share, value, .. } => {
                assert_eq!(share, "auto");
                assert!(value < 0.0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_profile_segments_rejects_bad_rows() {
        let mut bad = meta(2000.0, 2.0, 800.0, 400.0);
        bad.segment_id = "bad".into();
        let good = meta(40000.0, 2.0, 100.0, 100.0);

        let (profiles, rejected) = profile_segments(vec![good.clone(), bad.clone()], false).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].segment_id, "bad");

        assert!(profile_segments(vec![good, bad], true).is_err());
    }

    #[test]
    fn test_average_occupancy() {
        let shares = ModeShares {
            directional_aadt: 100.0,
            aadt_auto: 80.0,
            pct_auto: 0.8,
            pct_bus: 0.1,
            pct_truck: 0.1,
        };
        let occ = VehicleOccupancy::default();
        let avo = shares.average_occupancy(&occ);
        assert!((avo - (0.8 * 1.4 + 0.1 * 12.6 + 0.1)).abs() < 1e-12);
    }
}
