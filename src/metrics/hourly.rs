//! Hour-of-day travel-time profiles per segment.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Timelike};

use crate::config::HourlyConfig;
use crate::metrics::utility::{mean, percentile_sorted};
use crate::metrics::types::HourlyProfileRow;
use crate::records::{ProbeObservation, TravelTimeRecord};

/// Builds a streaming predicate keeping observations in the configured months
/// and days of month.
pub fn day_filter(config: &HourlyConfig) -> impl Fn(&ProbeObservation) -> bool + '_ {
    move |obs: &ProbeObservation| {
        let date = obs.timestamp.date();
        (config.months.is_empty() || config.months.contains(&date.month()))
            && (config.days.is_empty() || config.days.contains(&date.day()))
    }
}

/// Summarizes travel times per segment and hour of day.
///
/// `miles` optionally supplies segment lengths to carry into the output.
/// Rows are ordered by segment id then hour.
pub fn hourly_profile(
    records: &[TravelTimeRecord],
    miles: Option<&HashMap<String, f64>>,
) -> Vec<HourlyProfileRow> {
    let mut groups: BTreeMap<(&str, u32), Vec<f64>> = BTreeMap::new();
    for r in records {
        groups
            .entry((r.segment_id.as_str(), r.timestamp.hour()))
            .or_default()
            .push(r.travel_time_seconds);
    }

    groups
        .into_iter()
        .filter_map(|((segment_id, hour), mut tts)| {
            tts.sort_by(f64::total_cmp);
            let mean_tt = mean(&tts)?;
            Some(HourlyProfileRow {
                segment_id: segment_id.to_string(),
                hour,
                miles: miles.and_then(|m| m.get(segment_id).copied()),
                observations: tts.len(),
                min_tt_seconds: tts[0],
                mean_tt_seconds: mean_tt,
                p5_tt_seconds: percentile_sorted(&tts, 5.0),
                p95_tt_seconds: percentile_sorted(&tts, 95.0),
            })
        })
        .collect()
}
