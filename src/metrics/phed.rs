//! Peak Hour Excessive Delay.
//!
//! Each qualifying interval contributes the time spent below the threshold
//! speed, weighted by the hour's share of directional traffic. Segment sums
//! are converted to person-hours with the vehicle occupancy constants and
//! normalized by population at the network level.

use chrono::Timelike;
use tracing::{debug, warn};

use crate::config::{PhedConfig, VehicleOccupancy};
use crate::error::{MetricError, Result};
use crate::loader::PeakingTable;
use crate::metrics::aggregate::{Column, Reduction, group_reduce};
use crate::metrics::modes::{ModeShares, SegmentProfile};
use crate::metrics::types::PhedSegment;
use crate::records::{Segmented, TravelTimeRecord};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Larger of the floor speed and the posted limit times the configured factor.
/// A missing limit yields the floor.
pub fn threshold_speed(speed_limit_mph: Option<f64>, config: &PhedConfig) -> f64 {
    match speed_limit_mph {
        Some(limit) => (limit * config.speed_limit_factor).max(config.threshold_floor_mph),
        None => config.threshold_floor_mph,
    }
}

/// Travel time in seconds at the threshold speed.
pub fn threshold_seconds(miles: f64, threshold_speed_mph: f64) -> f64 {
    miles / threshold_speed_mph * SECONDS_PER_HOUR
}

/// Seconds beyond the threshold travel time, never negative, optionally capped.
pub fn raw_segment_delay(travel_time_seconds: f64, threshold_seconds: f64, cap: Option<f64>) -> f64 {
    let rsd = (travel_time_seconds - threshold_seconds).max(0.0);
    match cap {
        Some(cap) => rsd.min(cap),
        None => rsd,
    }
}

pub fn excessive_delay_hours(raw_segment_delay: f64) -> f64 {
    raw_segment_delay / SECONDS_PER_HOUR
}

/// Derived delay quantities for one travel-time record.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayInterval {
    pub segment_id: String,
    pub hour: u32,
    pub excessive_delay_hours: f64,
    pub peak_hour_volume: f64,
    pub shares: ModeShares,
}

impl Segmented for DelayInterval {
    fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

impl DelayInterval {
    /// Vehicle-hours of excessive delay for this interval.
    pub fn vehicle_delay(&self) -> f64 {
        self.excessive_delay_hours * self.peak_hour_volume
    }
}

/// Computes the per-record delay chain for records already joined to their
/// segment profile. Records whose hour has no peaking factor are dropped; the
/// number dropped is returned alongside.
pub fn delay_intervals(
    joined: &[(&TravelTimeRecord, &SegmentProfile)],
    peaking: &PeakingTable,
    config: &PhedConfig,
) -> (Vec<DelayInterval>, usize) {
    let mut intervals = Vec::with_capacity(joined.len());
    let mut missing_factor = 0;

    for (record, profile) in joined {
        let hour = record.timestamp.hour();
        let Some(factor) = peaking.factor(hour) else {
            missing_factor += 1;
            continue;
        };
        let ts = threshold_speed(profile.meta.speed_limit_mph, config);
        let sd = threshold_seconds(profile.meta.miles, ts);
        let rsd = raw_segment_delay(record.travel_time_seconds, sd, config.delay_cap_seconds);

        intervals.push(DelayInterval {
            segment_id: record.segment_id.clone(),
            hour,
            excessive_delay_hours: excessive_delay_hours(rsd),
            peak_hour_volume: profile.shares.directional_aadt * factor,
            shares: profile.shares,
        });
    }

    if missing_factor > 0 {
        warn!(dropped = missing_factor, "Records without a peaking factor for their hour");
    }
    (intervals, missing_factor)
}

/// Sums vehicle delay per segment and converts it to person-hours.
pub fn total_excessive_delay(
    intervals: &[DelayInterval],
    occupancy: &VehicleOccupancy,
) -> Vec<PhedSegment> {
    let columns = [
        Column::new("ted_seg", Reduction::Sum, |i: &DelayInterval| Some(i.vehicle_delay())),
        Column::new("pct_auto", Reduction::Max, |i: &DelayInterval| Some(i.shares.pct_auto)),
        Column::new("pct_bus", Reduction::Max, |i: &DelayInterval| Some(i.shares.pct_bus)),
        Column::new("pct_truck", Reduction::Max, |i: &DelayInterval| Some(i.shares.pct_truck)),
    ];
    let table = group_reduce(intervals, &columns);

    table
        .rows
        .into_iter()
        .map(|row| {
            let [ted_seg, pct_auto, pct_bus, pct_truck] =
                [0, 1, 2, 3].map(|i| row.values[i].unwrap_or(0.0));
            let avo = pct_auto * occupancy.auto + pct_bus * occupancy.bus + pct_truck * occupancy.truck;
            debug!(segment_id = %row.segment_id, ted_seg, avo, "Segment delay");
            PhedSegment {
                segment_id: row.segment_id,
                intervals: row.rows,
                ted_seg,
                pct_auto,
                pct_bus,
                pct_truck,
                ted: ted_seg * avo,
            }
        })
        .collect()
}

/// Total person-hours of excessive delay divided by population.
pub fn per_capita_ted(segments: &[PhedSegment], population: f64) -> Result<f64> {
    if !(population > 0.0) {
        return Err(MetricError::EmptyDenominator {
            reducer: "per_capita_ted",
        });
    }
    let total: f64 = segments.iter().map(|s| s.ted).sum();
    Ok(total / population)
}
