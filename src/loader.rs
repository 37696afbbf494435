//! CSV loaders for the vendor extracts and static lookup tables.
//!
//! Files ending in `.gz` are decompressed on the fly. Every loader checks the
//! header row for its required columns before reading any data, so a wrong
//! file fails fast with the missing column named.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MetricError, Result};
use crate::records::{
    METADATA_COLUMNS, NETWORK_COLUMNS, NetworkMembership, ProbeObservation, RawNetworkMembership,
    RawSegmentMetadata, RawSpeedLimit, RawTravelTime, SPEED_LIMIT_COLUMNS, SegmentMetadata,
    SpeedLimit, TRAVEL_TIME_COLUMNS, TravelTimeRecord, parse_date, parse_start_hour,
    parse_timestamp,
};

/// Counters collected while reading travel-time extracts.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub files: usize,
    pub rows_read: usize,
    pub null_travel_times: usize,
    pub filtered_out: usize,
    /// Earliest timestamp seen, before any filtering.
    pub earliest: Option<NaiveDateTime>,
}

/// Opens a CSV file, transparently decompressing gzip input.
pub fn open_reader(stage: &'static str, path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    if !path.exists() {
        return Err(MetricError::MissingFile {
            stage,
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(|source| MetricError::Io {
        stage,
        path: path.to_path_buf(),
        source,
    })?;
    let inner: Box<dyn Read> = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(inner))
}

fn csv_error<'a>(stage: &'static str, path: &'a Path) -> impl Fn(csv::Error) -> MetricError + 'a {
    move |source| MetricError::Csv {
        stage,
        path: path.to_path_buf(),
        source,
    }
}

/// Fails with [`MetricError::MissingColumn`] if any of `columns` is absent.
pub fn require_columns<R: Read>(
    stage: &'static str,
    path: &Path,
    reader: &mut csv::Reader<R>,
    columns: &[&str],
) -> Result<csv::StringRecord> {
    let headers = reader.headers().map_err(csv_error(stage, path))?.clone();
    for column in columns {
        if !headers.iter().any(|h| h == *column) {
            return Err(MetricError::MissingColumn {
                stage,
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }
    Ok(headers)
}

fn malformed(stage: &'static str, path: &Path, column: &str, value: &str) -> MetricError {
    MetricError::MalformedValue {
        stage,
        path: path.to_path_buf(),
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// Reads probe observations from every file in order, keeping nulls.
///
/// `keep` is applied to each row as it streams in, so memory holds only the
/// retained rows.
#[tracing::instrument(skip(paths, keep), fields(files = paths.len()))]
pub fn load_observations<P, F>(paths: &[P], keep: F) -> Result<(Vec<ProbeObservation>, LoadReport)>
where
    P: AsRef<Path>,
    F: Fn(&ProbeObservation) -> bool,
{
    const STAGE: &str = "loader";
    let mut rows = Vec::new();
    let mut report = LoadReport::default();

    for path in paths {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading travel-time extract");
        let mut rdr = open_reader(STAGE, path)?;
        require_columns(STAGE, path, &mut rdr, TRAVEL_TIME_COLUMNS)?;

        for result in rdr.deserialize() {
            let raw: RawTravelTime = result.map_err(csv_error(STAGE, path))?;
            report.rows_read += 1;

            let timestamp = parse_timestamp(&raw.measurement_tstamp).ok_or_else(|| {
                malformed(STAGE, path, "measurement_tstamp", &raw.measurement_tstamp)
            })?;
            report.earliest = Some(report.earliest.map_or(timestamp, |e| e.min(timestamp)));
            if let Some(tt) = raw.travel_time_seconds {
                if tt < 0.0 {
                    return Err(malformed(STAGE, path, "travel_time_seconds", &tt.to_string()));
                }
            }

            let obs = ProbeObservation {
                segment_id: raw.tmc_code,
                timestamp,
                travel_time_seconds: raw.travel_time_seconds.filter(|v| !v.is_nan()),
            };
            if keep(&obs) {
                rows.push(obs);
            } else {
                report.filtered_out += 1;
            }
        }
        report.files += 1;
    }

    debug!(rows = rows.len(), ?report, "Observations loaded");
    Ok((rows, report))
}

/// Reads travel-time records, dropping rows with a null travel time.
pub fn load_travel_times<P, F>(paths: &[P], keep: F) -> Result<(Vec<TravelTimeRecord>, LoadReport)>
where
    P: AsRef<Path>,
    F: Fn(&ProbeObservation) -> bool,
{
    let (observations, mut report) = load_observations(paths, keep)?;
    let before = observations.len();
    let records: Vec<TravelTimeRecord> = observations
        .into_iter()
        .filter_map(ProbeObservation::into_record)
        .collect();
    report.null_travel_times = before - records.len();
    if report.null_travel_times > 0 {
        warn!(
            dropped = report.null_travel_times,
            "Dropped records with null travel time"
        );
    }
    Ok((records, report))
}

/// Outcome of metadata de-duplication.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DedupReport {
    pub rows_read: usize,
    pub retired_before_start: usize,
    pub duplicates_resolved: usize,
}

/// Reads the segment metadata table.
///
/// Rows whose `active_end_date` falls before `data_start` are discarded. When a
/// segment still has several rows, the one with the latest `active_end_date`
/// wins, where a missing end date means still active. Equal end dates keep the
/// later row in the file.
///
/// `require_nhs_pct` makes `nhs_pct` a required column, for runs that weight
/// by NHS miles.
#[tracing::instrument(skip(path), fields(path = %path.display()))]
pub fn load_metadata(
    path: &Path,
    data_start: Option<NaiveDate>,
    require_nhs_pct: bool,
) -> Result<(Vec<SegmentMetadata>, DedupReport)> {
    const STAGE: &str = "metadata";
    let mut rdr = open_reader(STAGE, path)?;
    require_columns(STAGE, path, &mut rdr, METADATA_COLUMNS)?;
    if require_nhs_pct {
        require_columns(STAGE, path, &mut rdr, &["nhs_pct"])?;
    }

    let mut report = DedupReport::default();
    let mut by_id: BTreeMap<String, SegmentMetadata> = BTreeMap::new();

    for result in rdr.deserialize() {
        let raw: RawSegmentMetadata = result.map_err(csv_error(STAGE, path))?;
        report.rows_read += 1;

        let active_end_date = match raw.active_end_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(parse_date(s).ok_or_else(|| malformed(STAGE, path, "active_end_date", s))?),
        };
        if let (Some(end), Some(start)) = (active_end_date, data_start) {
            if end < start {
                report.retired_before_start += 1;
                continue;
            }
        }
        if !(raw.miles > 0.0) {
            return Err(malformed(STAGE, path, "miles", &raw.miles.to_string()));
        }

        let row = SegmentMetadata {
            segment_id: raw.tmc,
            miles: raw.miles,
            facility_type: raw.faciltype,
            aadt: raw.aadt,
            aadt_single_unit: raw.aadt_singl,
            aadt_combination: raw.aadt_combi,
            nhs_pct: raw.nhs_pct.unwrap_or(0.0),
            linear_id: raw.tmclinear.filter(|s| !s.is_empty()),
            active_end_date,
            speed_limit_mph: None,
            interstate: false,
        };

        match by_id.get(&row.segment_id) {
            Some(existing) => {
                report.duplicates_resolved += 1;
                if supersedes(&row, existing) {
                    by_id.insert(row.segment_id.clone(), row);
                }
            }
            None => {
                by_id.insert(row.segment_id.clone(), row);
            }
        }
    }

    if report.duplicates_resolved > 0 {
        warn!(
            duplicates = report.duplicates_resolved,
            "Resolved duplicate segment metadata rows"
        );
    }
    info!(segments = by_id.len(), "Segment metadata loaded");
    Ok((by_id.into_values().collect(), report))
}

fn supersedes(candidate: &SegmentMetadata, existing: &SegmentMetadata) -> bool {
    match (candidate.active_end_date, existing.active_end_date) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(c), Some(e)) => c >= e,
    }
}

/// Reads the analysis network membership table (`Tmc`, `interstate`).
pub fn load_network(path: &Path) -> Result<Vec<NetworkMembership>> {
    const STAGE: &str = "network";
    let mut rdr = open_reader(STAGE, path)?;
    require_columns(STAGE, path, &mut rdr, NETWORK_COLUMNS)?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let raw: RawNetworkMembership = result.map_err(csv_error(STAGE, path))?;
        rows.push(NetworkMembership {
            segment_id: raw.tmc,
            interstate: raw.interstate == Some(1.0),
        });
    }
    info!(segments = rows.len(), path = %path.display(), "Network loaded");
    Ok(rows)
}

/// Reads posted speed limits (`TMC_HERE`, `SPEED_LIMIT`). Rows without a limit are skipped.
pub fn load_speed_limits(path: &Path) -> Result<Vec<SpeedLimit>> {
    const STAGE: &str = "speed_limits";
    let mut rdr = open_reader(STAGE, path)?;
    require_columns(STAGE, path, &mut rdr, SPEED_LIMIT_COLUMNS)?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let raw: RawSpeedLimit = result.map_err(csv_error(STAGE, path))?;
        if let Some(speed_limit_mph) = raw.speed_limit {
            rows.push(SpeedLimit {
                segment_id: raw.tmc,
                speed_limit_mph,
            });
        }
    }
    Ok(rows)
}

/// Hour-of-day traffic share factors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakingTable {
    by_hour: BTreeMap<u32, f64>,
}

impl PeakingTable {
    /// Builds a table with the same factor for every hour.
    pub fn uniform(factor: f64) -> Self {
        Self {
            by_hour: (0..24).map(|h| (h, factor)).collect(),
        }
    }

    pub fn from_pairs(pairs: &[(u32, f64)]) -> Self {
        let mut by_hour = BTreeMap::new();
        for (hour, factor) in pairs {
            *by_hour.entry(*hour).or_insert(0.0) += factor;
        }
        Self { by_hour }
    }

    pub fn factor(&self, hour: u32) -> Option<f64> {
        self.by_hour.get(&hour).copied()
    }

    pub fn len(&self) -> usize {
        self.by_hour.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hour.is_empty()
    }
}

/// Reads the peaking-factor table. Sub-hourly rows (e.g. one per 15 minutes)
/// are summed into their hour.
pub fn load_peaking_factors(path: &Path, factor_column: &str) -> Result<PeakingTable> {
    const STAGE: &str = "peaking";
    let mut rdr = open_reader(STAGE, path)?;
    let headers = require_columns(STAGE, path, &mut rdr, &["startTime", factor_column])?;
    // require_columns guarantees both positions exist
    let start_idx = headers.iter().position(|h| h == "startTime").unwrap_or(0);
    let factor_idx = headers.iter().position(|h| h == factor_column).unwrap_or(0);

    let mut pairs = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(csv_error(STAGE, path))?;
        let start = record.get(start_idx).unwrap_or("");
        let factor = record.get(factor_idx).unwrap_or("");
        let hour = parse_start_hour(start).ok_or_else(|| malformed(STAGE, path, "startTime", start))?;
        let factor: f64 = factor
            .parse()
            .map_err(|_| malformed(STAGE, path, factor_column, factor))?;
        pairs.push((hour, factor));
    }

    let table = PeakingTable::from_pairs(&pairs);
    debug!(hours = table.len(), "Peaking factors loaded");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("map21_loader_{name}"));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_file_names_path() {
        let path = PathBuf::from("/nonexistent/tt.csv");
        let err = load_travel_times(&[&path], |_| true).unwrap_err();
        assert!(matches!(err, MetricError::MissingFile { .. }));
        assert!(err.to_string().contains("/nonexistent/tt.csv"));
    }

    #[test]
    fn test_missing_column() {
        let path = temp_file("nocol.csv", "tmc_code,measurement_tstamp\nA,2019-03-04 06:00:00\n");
        let err = load_travel_times(&[&path], |_| true).unwrap_err();
        match err {
            MetricError::MissingColumn { column, .. } => assert_eq!(column, "travel_time_seconds"),
            other => panic!("unexpected error {other}"),
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_nulls_dropped_and_counted() {
        let path = temp_file(
            "nulls.csv",
            "tmc_code,measurement_tstamp,travel_time_seconds\n\
             A,2019-03-04 06:00:00,60.5\n\
             A,2019-03-04 06:15:00,\n\
             B,2019-03-04 06:00:00,30\n",
        );
        let (records, report) = load_travel_times(&[&path], |_| true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.null_travel_times, 1);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_files_concatenate_in_order_and_filter_streams() {
        let q1 = temp_file(
            "q1.csv",
            "tmc_code,measurement_tstamp,travel_time_seconds\nA,2019-01-07 06:00:00,10\n",
        );
        let q2 = temp_file(
            "q2.csv",
            "tmc_code,measurement_tstamp,travel_time_seconds\nB,2019-04-01 06:00:00,20\nC,2019-04-01 06:15:00,30\n",
        );
        let (all, _) = load_travel_times(&[&q1, &q2], |_| true).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        let (kept, report) = load_travel_times(&[&q1, &q2], |o| o.segment_id != "B").unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.earliest, parse_timestamp("2019-01-07 06:00:00"));
        fs::remove_file(&q1).unwrap();
        fs::remove_file(&q2).unwrap();
    }

    #[test]
    fn test_gzip_extract() {
        let path = env::temp_dir().join("map21_loader_gz.csv.gz");
        let file = fs::File::create(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(b"tmc_code,measurement_tstamp,travel_time_seconds\nA,2019-03-04 06:00:00,42\n")
            .unwrap();
        enc.finish().unwrap();

        let (records, _) = load_travel_times(&[&path], |_| true).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].travel_time_seconds, 42.0);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_malformed_timestamp() {
        let path = temp_file(
            "badts.csv",
            "tmc_code,measurement_tstamp,travel_time_seconds\nA,yesterday,42\n",
        );
        let err = load_travel_times(&[&path], |_| true).unwrap_err();
        assert!(err.to_string().contains("measurement_tstamp"));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_metadata_dedup_prefers_latest_active() {
        let path = temp_file(
            "meta.csv",
            "tmc,miles,faciltype,aadt,aadt_singl,aadt_combi,nhs_pct,tmclinear,active_end_date\n\
             A,1.0,2,20000,500,300,100,L1,2018-06-30\n\
             A,1.2,2,21000,500,300,100,L1,2019-12-31\n\
             A,1.1,2,20500,500,300,100,L1,2019-06-30\n\
             B,0.5,1,8000,100,50,50,L2,\n\
             C,0.7,1,8000,100,50,50,L3,2018-01-01\n",
        );
        let start = NaiveDate::from_ymd_opt(2019, 1, 1);
        let (rows, report) = load_metadata(&path, start, true).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].segment_id, "A");
        assert_eq!(rows[0].miles, 1.2);
        assert_eq!(rows[1].segment_id, "B");
        assert_eq!(report.retired_before_start, 2);
        assert_eq!(report.duplicates_resolved, 1);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_metadata_nhs_pct_required_when_asked() {
        let path = temp_file(
            "meta_no_nhs.csv",
            "tmc,miles,faciltype,aadt,aadt_singl,aadt_combi\nA,1.0,2,20000,500,300\n",
        );
        let (rows, _) = load_metadata(&path, None, false).unwrap();
        assert_eq!(rows[0].nhs_pct, 0.0);

        let err = load_metadata(&path, None, true).unwrap_err();
        match err {
            MetricError::MissingColumn { stage, column, .. } => {
                assert_eq!(stage, "metadata");
                assert_eq!(column, "nhs_pct");
            }
            other => panic!("unexpected error {other}"),
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_metadata_nan_miles_is_malformed() {
        let path = temp_file(
            "meta_nan.csv",
            "tmc,miles,faciltype,aadt,aadt_singl,aadt_combi,nhs_pct\nA,NaN,2,20000,500,300,100\n",
        );
        match load_metadata(&path, None, false).unwrap_err() {
            MetricError::MalformedValue { column, .. } => assert_eq!(column, "miles"),
            other => panic!("unexpected error {other}"),
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_peaking_quarter_hours_sum_to_hour() {
        let path = temp_file(
            "peak.csv",
            "startTime,2015_15-min_Combined\n6:00:00,0.01\n6:15:00,0.015\n6:30:00,0.02\n6:45:00,0.025\n7:00:00,0.03\n",
        );
        let table = load_peaking_factors(&path, "2015_15-min_Combined").unwrap();
        assert!((table.factor(6).unwrap() - 0.07).abs() < 1e-12);
        assert_eq!(table.factor(7), Some(0.03));
        assert_eq!(table.factor(8), None);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_network_interstate_flag() {
        let path = temp_file("net.csv", "Tmc,interstate\nA,1\nB,0\nC,\n");
        let rows = load_network(&path).unwrap();
        let flags: Vec<bool> = rows.iter().map(|r| r.interstate).collect();
        assert_eq!(flags, vec![true, false, false]);
        fs::remove_file(&path).unwrap();
    }
}
