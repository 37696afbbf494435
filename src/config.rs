//! Run configuration: formula constants, window definitions and data policies.
//!
//! Stored as a JSON object on disk. Every field is optional; an empty object
//! `{}` yields the FHWA defaults:
//! ```json
//! {
//!   "strict": false,
//!   "phed": { "delay_cap_seconds": 900.0, "population": 1577456 },
//!   "lottr": { "min_observations": 4 },
//!   "tttr": { "nhs_weighting": true }
//! }
//! ```

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{MetricError, Result};
use crate::metrics::network::Weighting;
use crate::window::{self, TimeWindow};

/// Average persons per vehicle, by vehicle class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleOccupancy {
    pub auto: f64,
    pub bus: f64,
    pub truck: f64,
}

impl Default for VehicleOccupancy {
    fn default() -> Self {
        Self {
            auto: 1.4,
            bus: 12.6,
            truck: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhedConfig {
    pub windows: Vec<TimeWindow>,
    /// Lowest threshold speed in mph.
    pub threshold_floor_mph: f64,
    /// Fraction of the posted limit used as the threshold speed.
    pub speed_limit_factor: f64,
    /// Upper bound on per-interval raw segment delay. `null` disables the cap.
    pub delay_cap_seconds: Option<f64>,
    pub occupancy: VehicleOccupancy,
    pub population: Option<f64>,
    /// Factor column read from the peaking table.
    pub peaking_factor_column: String,
    /// Hourly factor applied to every record when no peaking table is given.
    pub fallback_peaking_factor: Option<f64>,
}

impl Default for PhedConfig {
    fn default() -> Self {
        Self {
            windows: window::phed_windows(),
            threshold_floor_mph: 20.0,
            speed_limit_factor: 0.6,
            delay_cap_seconds: Some(900.0),
            occupancy: VehicleOccupancy::default(),
            population: None,
            peaking_factor_column: "2015_15-min_Combined".to_string(),
            fallback_peaking_factor: None,
        }
    }
}

/// Which travel-time reliability measure a run computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityKind {
    Lottr,
    Tttr,
}

impl ReliabilityKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReliabilityKind::Lottr => "lottr",
            ReliabilityKind::Tttr => "tttr",
        }
    }
}

/// Reliability settings. Unset fields fall back to the kind-specific defaults
/// through [`ReliabilityConfig::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub windows: Option<Vec<TimeWindow>>,
    pub percentile: Option<f64>,
    pub reliable_threshold: Option<f64>,
    pub min_observations: Option<usize>,
    pub nhs_weighting: Option<bool>,
    pub occupancy: VehicleOccupancy,
}

/// Fully resolved reliability parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityParams {
    pub kind: ReliabilityKind,
    pub windows: Vec<TimeWindow>,
    pub percentile: f64,
    pub reliable_threshold: f64,
    pub min_observations: usize,
    pub weighting: Weighting,
    pub occupancy: VehicleOccupancy,
}

impl ReliabilityConfig {
    pub fn resolve(&self, kind: ReliabilityKind) -> ReliabilityParams {
        let (windows, percentile, nhs) = match kind {
            ReliabilityKind::Lottr => (window::lottr_windows(), 80.0, true),
            ReliabilityKind::Tttr => (window::tttr_windows(), 95.0, false),
        };
        let nhs = self.nhs_weighting.unwrap_or(nhs);
        ReliabilityParams {
            kind,
            windows: self.windows.clone().unwrap_or(windows),
            percentile: self.percentile.unwrap_or(percentile),
            reliable_threshold: self.reliable_threshold.unwrap_or(1.5),
            min_observations: self.min_observations.unwrap_or(1).max(1),
            weighting: if nhs {
                Weighting::MilesNhs
            } else {
                Weighting::Miles
            },
            occupancy: self.occupancy,
        }
    }
}

/// Day filter for the hourly travel-time profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyConfig {
    /// Months (1–12) to keep. Empty keeps all.
    pub months: Vec<u32>,
    /// Days of month (1–31) to keep. Empty keeps all.
    pub days: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Abort on the first per-segment data error instead of excluding the segment.
    pub strict: bool,
    /// First date covered by the travel-time data. Metadata rows retired
    /// before it are discarded. Derived from the data when unset.
    pub data_start_date: Option<NaiveDate>,
    pub phed: PhedConfig,
    pub lottr: ReliabilityConfig,
    pub tttr: ReliabilityConfig,
    pub hourly: HourlyConfig,
}

impl RunConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| MetricError::Io {
            stage: "config",
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig =
            serde_json::from_str(&content).map_err(|source| MetricError::Config {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        window::validate_windows(&self.phed.windows)?;
        for kind in [ReliabilityKind::Lottr, ReliabilityKind::Tttr] {
            let params = self.reliability(kind);
            window::validate_windows(&params.windows)?;
            if !(50.0 < params.percentile && params.percentile <= 100.0) {
                return Err(MetricError::InvalidWindow {
                    window: kind.name().to_string(),
                    problem: format!("percentile {} must be in (50, 100]", params.percentile),
                });
            }
        }
        for m in &self.hourly.months {
            if !(1..=12).contains(m) {
                return Err(MetricError::InvalidWindow {
                    window: "hourly".into(),
                    problem: format!("month {m} out of range"),
                });
            }
        }
        for d in &self.hourly.days {
            if !(1..=31).contains(d) {
                return Err(MetricError::InvalidWindow {
                    window: "hourly".into(),
                    problem: format!("day {d} out of range"),
                });
            }
        }
        Ok(())
    }

    pub fn reliability(&self, kind: ReliabilityKind) -> ReliabilityParams {
        match kind {
            ReliabilityKind::Lottr => self.lottr.resolve(kind),
            ReliabilityKind::Tttr => self.tttr.resolve(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.phed.delay_cap_seconds, Some(900.0));
        assert_eq!(config.phed.occupancy.bus, 12.6);
        config.validate().unwrap();
    }

    #[test]
    fn test_kind_specific_defaults() {
        let config = RunConfig::default();
        let lottr = config.reliability(ReliabilityKind::Lottr);
        let tttr = config.reliability(ReliabilityKind::Tttr);
        assert_eq!(lottr.percentile, 80.0);
        assert_eq!(lottr.windows.len(), 4);
        assert_eq!(lottr.weighting, Weighting::MilesNhs);
        assert_eq!(tttr.percentile, 95.0);
        assert_eq!(tttr.windows.len(), 6);
        assert_eq!(tttr.weighting, Weighting::Miles);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "phed": { "delay_cap_seconds": null, "occupancy": { "bus": 10.0 } },
            "tttr": { "nhs_weighting": true, "min_observations": 4 }
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.phed.delay_cap_seconds, None);
        assert_eq!(config.phed.occupancy.bus, 10.0);
        assert_eq!(config.phed.occupancy.auto, 1.4);
        let tttr = config.reliability(ReliabilityKind::Tttr);
        assert_eq!(tttr.weighting, Weighting::MilesNhs);
        assert_eq!(tttr.min_observations, 4);
        assert_eq!(tttr.percentile, 95.0);
    }

    #[test]
    fn test_bad_percentile_rejected() {
        let json = r#"{ "lottr": { "percentile": 40.0 } }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_windows_from_json() {
        let json = r#"{ "phed": { "windows": [
            { "name": "am", "days": "weekday", "hours": [{ "start": 6, "end": 9 }] }
        ] } }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.phed.windows.len(), 1);
        assert!(config.phed.windows[0].contains_hour(9));
        assert!(!config.phed.windows[0].contains_hour(16));
    }
}
