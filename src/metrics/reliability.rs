//! Level of Travel Time Reliability (LOTTR) and Truck Travel Time Reliability (TTTR).
//!
//! For every configured window a segment's ratio is the high percentile
//! (80th for LOTTR, 95th for TTTR) of its travel times over the median. The
//! segment value is the worst window.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReliabilityParams;
use crate::error::{MetricError, Result};
use crate::metrics::aggregate::{Column, Reduction, group_reduce_over};
use crate::metrics::modes::SegmentProfile;
use crate::metrics::network::Weighting;
use crate::metrics::types::{RejectedSegment, ReliabilitySegment, WindowRatio};
use crate::records::{ProbeObservation, TravelTimeRecord};
use crate::window::{TimeWindow, partition};

/// Counts from merging truck travel times onto the all-vehicle extract.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SubstitutionReport {
    pub all_vehicle_rows: usize,
    pub truck_rows: usize,
    pub substituted: usize,
}

/// Merges truck observations onto all-vehicle records by segment and timestamp.
///
/// The all-vehicle records decide which intervals exist. Where the truck value
/// is missing, null or zero the all-vehicle value is used instead.
pub fn substitute_truck_times(
    truck: &[ProbeObservation],
    all_vehicle: &[TravelTimeRecord],
) -> (Vec<TravelTimeRecord>, SubstitutionReport) {
    let mut by_key: HashMap<(&str, NaiveDateTime), Option<f64>> = HashMap::with_capacity(truck.len());
    for obs in truck {
        by_key
            .entry((obs.segment_id.as_str(), obs.timestamp))
            .or_insert(obs.travel_time_seconds);
    }

    let mut report = SubstitutionReport {
        all_vehicle_rows: all_vehicle.len(),
        truck_rows: truck.len(),
        substituted: 0,
    };
    let merged = all_vehicle
        .iter()
        .map(|all| {
            let truck_tt = by_key
                .get(&(all.segment_id.as_str(), all.timestamp))
                .copied()
                .flatten()
                .filter(|tt| *tt != 0.0);
            let travel_time_seconds = match truck_tt {
                Some(tt) => tt,
                None => {
                    report.substituted += 1;
                    all.travel_time_seconds
                }
            };
            TravelTimeRecord {
                segment_id: all.segment_id.clone(),
                timestamp: all.timestamp,
                travel_time_seconds,
            }
        })
        .collect();

    info!(
        substituted = report.substituted,
        rows = report.all_vehicle_rows,
        "Merged truck and all-vehicle travel times"
    );
    (merged, report)
}

/// Percentiles and ratio per segment for one window.
///
/// Every segment in `segments` gets an entry. A segment with fewer than
/// `min_observations` records has no ratio; a zero median is an error.
pub fn window_ratios(
    window: &TimeWindow,
    records: &[&TravelTimeRecord],
    segments: &BTreeSet<String>,
    params: &ReliabilityParams,
) -> BTreeMap<String, Result<WindowRatio>> {
    let columns = [
        Column::new("p50", Reduction::Percentile(50.0), |r: &TravelTimeRecord| {
            Some(r.travel_time_seconds)
        }),
        Column::new("p_high", Reduction::Percentile(params.percentile), |r: &TravelTimeRecord| {
            Some(r.travel_time_seconds)
        }),
    ];
    let table = group_reduce_over(segments, records.iter().copied(), &columns);

    table
        .rows
        .into_iter()
        .map(|row| {
            let (p50, p_high) = (row.values[0], row.values[1]);
            let ratio = match (p50, p_high) {
                _ if row.rows < params.min_observations => Ok(None),
                (Some(p50), _) if p50 == 0.0 => Err(MetricError::DivisionByZero {
                    quantity: "reliability ratio",
                    segment_id: row.segment_id.clone(),
                }),
                (Some(p50), Some(high)) => Ok(Some(high / p50)),
                _ => Ok(None),
            };
            let result = ratio.map(|ratio| WindowRatio {
                window: window.name.clone(),
                observations: row.rows,
                p50,
                p_high,
                ratio,
            });
            (row.segment_id, result)
        })
        .collect()
}

/// Computes the per-segment reliability measure.
///
/// `records` must already be restricted to segments present in `profiles`.
/// Segments with no ratio in any window, or with a domain error in some
/// window, are rejected (or abort the run when `strict`). A segment is
/// reliable only when every window has a ratio below the threshold.
#[tracing::instrument(skip_all, fields(kind = params.kind.name(), records = records.len()))]
pub fn segment_reliability(
    records: &[TravelTimeRecord],
    profiles: &HashMap<String, SegmentProfile>,
    params: &ReliabilityParams,
    strict: bool,
) -> Result<(Vec<ReliabilitySegment>, Vec<RejectedSegment>)> {
    let segments: BTreeSet<String> = records.iter().map(|r| r.segment_id.clone()).collect();

    let mut per_window = Vec::with_capacity(params.windows.len());
    for (window, rows) in partition(records, &params.windows) {
        debug!(window = %window.name, rows = rows.len(), "Window records");
        per_window.push(window_ratios(window, &rows, &segments, params));
    }

    let mut out = Vec::new();
    let mut rejected = Vec::new();

    'segments: for segment_id in &segments {
        let Some(profile) = profiles.get(segment_id) else {
            continue;
        };
        let mut windows = Vec::with_capacity(per_window.len());
        for ratios in per_window.iter_mut() {
            match ratios.remove(segment_id) {
                Some(Ok(w)) => windows.push(w),
                Some(Err(e)) => {
                    if strict {
                        return Err(e);
                    }
                    warn!(segment_id = %segment_id, error = %e, "Segment excluded");
                    rejected.push(RejectedSegment {
                        segment_id: segment_id.clone(),
                        reason: e.to_string(),
                    });
                    continue 'segments;
                }
                None => {}
            }
        }

        let present: Vec<f64> = windows.iter().filter_map(|w| w.ratio).collect();
        let Some(ratio) = present.iter().copied().reduce(f64::max) else {
            rejected.push(RejectedSegment {
                segment_id: segment_id.clone(),
                reason: format!(
                    "no window reached {} observations",
                    params.min_observations
                ),
            });
            continue;
        };
        // a window without a ratio counts against reliability
        let reliable = windows
            .iter()
            .all(|w| w.ratio.is_some_and(|r| r < params.reliable_threshold));

        let meta = &profile.meta;
        let nhs_factor = match params.weighting {
            Weighting::MilesNhs => meta.nhs_pct / 100.0,
            Weighting::Miles | Weighting::Equal => 1.0,
        };
        out.push(ReliabilitySegment {
            segment_id: segment_id.clone(),
            windows,
            ratio,
            reliable,
            miles: meta.miles,
            nhs_pct: meta.nhs_pct,
            interstate: meta.interstate,
            person_miles: profile.shares.annual_person_miles(meta.miles, &params.occupancy)
                * nhs_factor,
            truck_miles: profile.shares.annual_truck_miles(meta.miles, &params.occupancy),
        });
    }

    if !rejected.is_empty() {
        warn!(rejected = rejected.len(), "Segments without a reliability value");
    }
    Ok((out, rejected))
}
