//! Network-level weighted reductions over per-segment results.

use serde::{Deserialize, Serialize};

use crate::error::{MetricError, Result};
use crate::metrics::types::ReliabilitySegment;

/// Per-segment weight used when combining segments into one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Segment length.
    Miles,
    /// Segment length on the National Highway System.
    MilesNhs,
    Equal,
}

impl Weighting {
    pub fn weight(&self, miles: f64, nhs_pct: f64) -> f64 {
        match self {
            Weighting::Miles => miles,
            Weighting::MilesNhs => miles * nhs_pct / 100.0,
            Weighting::Equal => 1.0,
        }
    }
}

/// `Σ weight(x) * value(x)` over items passing `filter`.
pub fn weighted_sum<T>(
    items: &[T],
    value: impl Fn(&T) -> f64,
    weight: impl Fn(&T) -> f64,
    filter: impl Fn(&T) -> bool,
) -> f64 {
    items
        .iter()
        .filter(|x| filter(*x))
        .map(|x| weight(x) * value(x))
        .sum()
}

/// `Σ w·v / Σ w` over items passing `filter`.
///
/// # Errors
///
/// [`MetricError::EmptyDenominator`] when no item passes or the weights sum to zero.
pub fn weighted_mean<T>(
    reducer: &'static str,
    items: &[T],
    value: impl Fn(&T) -> f64,
    weight: impl Fn(&T) -> f64,
    filter: impl Fn(&T) -> bool,
) -> Result<f64> {
    let denominator = weighted_sum(items, |_| 1.0, &weight, &filter);
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(MetricError::EmptyDenominator { reducer });
    }
    Ok(weighted_sum(items, value, &weight, &filter) / denominator)
}

/// Share of the total weight, among items passing `filter`, held by items
/// matching `predicate`.
pub fn weighted_share<T>(
    reducer: &'static str,
    items: &[T],
    weight: impl Fn(&T) -> f64,
    filter: impl Fn(&T) -> bool,
    predicate: impl Fn(&T) -> bool,
) -> Result<f64> {
    weighted_mean(
        reducer,
        items,
        |x| if predicate(x) { 1.0 } else { 0.0 },
        weight,
        filter,
    )
}

/// Length-weighted mean reliability ratio, optionally limited to interstates.
pub fn reliability_index(
    reducer: &'static str,
    segments: &[ReliabilitySegment],
    weighting: Weighting,
    interstate_only: bool,
) -> Result<f64> {
    weighted_mean(
        reducer,
        segments,
        |s| s.ratio,
        |s| weighting.weight(s.miles, s.nhs_pct),
        |s| !interstate_only || s.interstate,
    )
}
