//! Output formatting and persistence for metric results.
//!
//! Supports pretty-printing, JSON serialization, and CSV tables. Tables are
//! rewritten on every run so repeated runs over the same inputs produce
//! identical files.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::metrics::types::ReliabilitySegment;
use crate::window::TimeWindow;

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty(value: &impl std::fmt::Debug) {
    debug!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

/// Writes serializable rows as a CSV table with a header row.
pub fn write_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV table");
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(create(path)?);
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer.flush()?;
    Ok(())
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes per-segment reliability with one ratio column per window.
pub fn write_reliability(
    path: &Path,
    windows: &[TimeWindow],
    rows: &[ReliabilitySegment],
) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), "Writing reliability table");
    let mut writer = WriterBuilder::new().from_writer(create(path)?);

    let mut header = vec!["segment_id".to_string()];
    header.extend(windows.iter().map(|w| w.name.clone()));
    header.extend(
        [
            "ratio",
            "reliable",
            "miles",
            "nhs_pct",
            "interstate",
            "person_miles",
            "truck_miles",
        ]
        .map(String::from),
    );
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.segment_id.clone()];
        record.extend(windows.iter().map(|w| cell(row.window_ratio(&w.name))));
        record.push(row.ratio.to_string());
        record.push(u8::from(row.reliable).to_string());
        record.push(row.miles.to_string());
        record.push(row.nhs_pct.to_string());
        record.push(u8::from(row.interstate).to_string());
        record.push(row.person_miles.to_string());
        record.push(row.truck_miles.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a value as pretty-printed JSON.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let file = create(path)?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Summary written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::{PhedSegment, WindowRatio};
    use crate::window::lottr_windows;
    use std::env;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn phed_row(id: &str) -> PhedSegment {
        PhedSegment {
            segment_id: id.into(),
            intervals: 4,
            ted_seg: 12.5,
            pct_auto: 0.9,
            pct_bus: 0.05,
            pct_truck: 0.05,
            ted: 17.0,
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&phed_row("A"));
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&phed_row("A")).unwrap();
    }

    #[test]
    fn test_write_records_overwrites() {
        let path = temp_path("map21_output_phed.csv");
        let _ = fs::remove_file(&path);

        write_records(&path, &[phed_row("A"), phed_row("B")]).unwrap();
        write_records(&path, &[phed_row("A"), phed_row("B")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "segment_id,intervals,ted_seg,pct_auto,pct_bus,pct_truck,ted"
        );
        assert!(lines[1].starts_with("A,4,12.5,"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_reliability_columns() {
        let path = temp_path("map21_output_lottr.csv");
        let _ = fs::remove_file(&path);

        let row = ReliabilitySegment {
            segment_id: "A".into(),
            windows: vec![WindowRatio {
                window: "weekday_am".into(),
                observations: 3,
                p50: Some(100.0),
                p_high: Some(160.0),
                ratio: Some(1.6),
            }],
            ratio: 1.6,
            reliable: false,
            miles: 1.0,
            nhs_pct: 100.0,
            interstate: true,
            person_miles: 10.0,
            truck_miles: 2.0,
        };
        write_reliability(&path, &lottr_windows(), &[row]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "segment_id,weekday_am,weekday_midday,weekday_pm,weekend_day,ratio,reliable,miles,nhs_pct,interstate,person_miles,truck_miles"
        );
        assert_eq!(lines[1], "A,1.6,,,,1.6,0,1,100,1,10,2");

        fs::remove_file(&path).unwrap();
    }
}
