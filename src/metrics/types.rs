//! Output rows produced by the metric calculators.

use serde::Serialize;

use crate::records::Segmented;

/// Per-segment Peak Hour Excessive Delay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhedSegment {
    pub segment_id: String,
    /// Qualifying intervals that contributed to the sum.
    pub intervals: usize,
    /// Vehicle-hours of excessive delay.
    pub ted_seg: f64,
    pub pct_auto: f64,
    pub pct_bus: f64,
    pub pct_truck: f64,
    /// Person-hours of excessive delay.
    pub ted: f64,
}

/// Percentiles and ratio for one segment in one time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowRatio {
    pub window: String,
    pub observations: usize,
    pub p50: Option<f64>,
    pub p_high: Option<f64>,
    /// `None` when the window had fewer observations than required.
    pub ratio: Option<f64>,
}

/// Per-segment LOTTR or TTTR with the attributes used for network weighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilitySegment {
    pub segment_id: String,
    pub windows: Vec<WindowRatio>,
    /// Maximum ratio across windows.
    pub ratio: f64,
    pub reliable: bool,
    pub miles: f64,
    pub nhs_pct: f64,
    pub interstate: bool,
    /// Annual auto and bus person-miles (NHS-weighted when enabled).
    pub person_miles: f64,
    /// Annual truck-miles.
    pub truck_miles: f64,
}

impl ReliabilitySegment {
    pub fn window_ratio(&self, window: &str) -> Option<f64> {
        self.windows
            .iter()
            .find(|w| w.window == window)
            .and_then(|w| w.ratio)
    }
}

impl Segmented for ReliabilitySegment {
    fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

/// Travel-time summary for one segment in one hour of the day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyProfileRow {
    pub segment_id: String,
    pub hour: u32,
    pub miles: Option<f64>,
    pub observations: usize,
    pub min_tt_seconds: f64,
    pub mean_tt_seconds: f64,
    pub p5_tt_seconds: f64,
    pub p95_tt_seconds: f64,
}

/// A segment left out of a metric, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedSegment {
    pub segment_id: String,
    pub reason: String,
}
