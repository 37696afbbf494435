//! Typed rows for every input table and the raw CSV layouts they come from.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Rows keyed by a TMC segment identifier.
pub trait Segmented {
    fn segment_id(&self) -> &str;
}

/// Rows carrying a measurement timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> NaiveDateTime;
}

/// One probe-vehicle travel-time measurement with a known value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelTimeRecord {
    pub segment_id: String,
    pub timestamp: NaiveDateTime,
    pub travel_time_seconds: f64,
}

/// A measurement as it appears in a vendor extract, where the value may be null.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeObservation {
    pub segment_id: String,
    pub timestamp: NaiveDateTime,
    pub travel_time_seconds: Option<f64>,
}

impl ProbeObservation {
    pub fn into_record(self) -> Option<TravelTimeRecord> {
        let travel_time_seconds = self.travel_time_seconds.filter(|v| !v.is_nan())?;
        Some(TravelTimeRecord {
            segment_id: self.segment_id,
            timestamp: self.timestamp,
            travel_time_seconds,
        })
    }
}

impl Segmented for TravelTimeRecord {
    fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

impl Timestamped for TravelTimeRecord {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Static per-segment attributes after all joins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentMetadata {
    pub segment_id: String,
    pub miles: f64,
    pub facility_type: f64,
    pub aadt: f64,
    pub aadt_single_unit: f64,
    pub aadt_combination: f64,
    pub nhs_pct: f64,
    pub linear_id: Option<String>,
    pub active_end_date: Option<NaiveDate>,
    pub speed_limit_mph: Option<f64>,
    pub interstate: bool,
}

impl Segmented for SegmentMetadata {
    fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

/// Membership of a segment in the analysis network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMembership {
    pub segment_id: String,
    pub interstate: bool,
}

impl Segmented for NetworkMembership {
    fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

/// Posted speed limit for a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedLimit {
    pub segment_id: String,
    pub speed_limit_mph: f64,
}

impl Segmented for SpeedLimit {
    fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

// Raw CSV layouts. Field names follow the vendor headers.

#[derive(Debug, Deserialize)]
pub(crate) struct RawTravelTime {
    pub(crate) tmc_code: String,
    pub(crate) measurement_tstamp: String,
    pub(crate) travel_time_seconds: Option<f64>,
}

pub(crate) const TRAVEL_TIME_COLUMNS: &[&str] =
    &["tmc_code", "measurement_tstamp", "travel_time_seconds"];

#[derive(Debug, Deserialize)]
pub(crate) struct RawSegmentMetadata {
    pub(crate) tmc: String,
    pub(crate) miles: f64,
    pub(crate) faciltype: f64,
    pub(crate) aadt: f64,
    pub(crate) aadt_singl: f64,
    pub(crate) aadt_combi: f64,
    #[serde(default)]
    pub(crate) nhs_pct: Option<f64>,
    #[serde(default)]
    pub(crate) tmclinear: Option<String>,
    #[serde(default)]
    pub(crate) active_end_date: Option<String>,
}

pub(crate) const METADATA_COLUMNS: &[&str] =
    &["tmc", "miles", "faciltype", "aadt", "aadt_singl", "aadt_combi"];

#[derive(Debug, Deserialize)]
pub(crate) struct RawNetworkMembership {
    #[serde(rename = "Tmc")]
    pub(crate) tmc: String,
    #[serde(default)]
    pub(crate) interstate: Option<f64>,
}

pub(crate) const NETWORK_COLUMNS: &[&str] = &["Tmc"];

#[derive(Debug, Deserialize)]
pub(crate) struct RawSpeedLimit {
    #[serde(rename = "TMC_HERE")]
    pub(crate) tmc: String,
    #[serde(rename = "SPEED_LIMIT")]
    pub(crate) speed_limit: Option<f64>,
}

pub(crate) const SPEED_LIMIT_COLUMNS: &[&str] = &["TMC_HERE", "SPEED_LIMIT"];

/// Parses a vendor timestamp. Offsets are dropped; the local clock time is kept.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.naive_local())
}

/// Parses a calendar date, ignoring any trailing time component.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}

/// Extracts the hour of day from a peaking-table `startTime` value.
pub fn parse_start_hour(value: &str) -> Option<u32> {
    let value = value.trim();
    for fmt in ["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"] {
        if let Ok(t) = NaiveTime::parse_from_str(value, fmt) {
            return Some(t.hour());
        }
    }
    parse_timestamp(value).map(|ts| ts.hour())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2019, 3, 4)
            .unwrap()
            .and_hms_opt(6, 15, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2019-03-04 06:15:00"), Some(expected));
        assert_eq!(parse_timestamp("2019-03-04 06:15"), Some(expected));
        assert_eq!(parse_timestamp("2019-03-04T06:15:00-08:00"), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
    }

    #[test]
    fn test_parse_date_ignores_time() {
        let d = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap();
        assert_eq!(parse_date("2019-12-31 23:59:59-05"), Some(d));
        assert_eq!(parse_date("12/31/2019"), Some(d));
    }

    #[test]
    fn test_parse_start_hour() {
        assert_eq!(parse_start_hour("6:15:00"), Some(6));
        assert_eq!(parse_start_hour("16:45"), Some(16));
        assert_eq!(parse_start_hour("4:00 PM"), Some(16));
        assert_eq!(parse_start_hour("2015-01-01 07:30:00"), Some(7));
    }

    #[test]
    fn test_null_observation_has_no_record() {
        let obs = ProbeObservation {
            segment_id: "114+04369".into(),
            timestamp: parse_timestamp("2019-03-04 06:15:00").unwrap(),
            travel_time_seconds: None,
        };
        assert!(obs.into_record().is_none());
    }
}
