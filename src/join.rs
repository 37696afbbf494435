//! Named-key joins between travel-time records and segment tables.
//!
//! Every join states its key and cardinality up front. Right-hand tables are
//! indexed with [`index_unique`], which enforces many-to-one; unmatched
//! left-hand rows are dropped and counted in a [`JoinReport`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{MetricError, Result};
use crate::records::{NetworkMembership, Segmented, SegmentMetadata, SpeedLimit};

/// Audit counts for one inner join.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinReport {
    pub stage: String,
    pub left_rows: usize,
    pub matched_rows: usize,
    pub dropped_rows: usize,
    pub dropped_segments: BTreeSet<String>,
}

impl JoinReport {
    fn log(&self) {
        if self.dropped_rows > 0 {
            warn!(
                stage = %self.stage,
                dropped_rows = self.dropped_rows,
                dropped_segments = self.dropped_segments.len(),
                "Join dropped unmatched rows"
            );
        } else {
            info!(stage = %self.stage, matched = self.matched_rows, "Join matched all rows");
        }
    }
}

/// Indexes `rows` by segment id, failing on a repeated key.
pub fn index_unique<T: Segmented>(
    stage: &'static str,
    path: &Path,
    rows: Vec<T>,
) -> Result<HashMap<String, T>> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = row.segment_id().to_string();
        if index.contains_key(&key) {
            return Err(MetricError::DuplicateKey {
                stage,
                path: path.to_path_buf(),
                key,
            });
        }
        index.insert(key, row);
    }
    Ok(index)
}

/// Inner join of `left` against an index on `segment_id` (many-to-one).
pub fn inner_join<'a, L, R>(
    stage: &str,
    left: impl IntoIterator<Item = &'a L>,
    right: &'a HashMap<String, R>,
) -> (Vec<(&'a L, &'a R)>, JoinReport)
where
    L: Segmented + 'a,
{
    let mut report = JoinReport {
        stage: stage.to_string(),
        ..Default::default()
    };
    let mut joined = Vec::new();
    for row in left {
        report.left_rows += 1;
        match right.get(row.segment_id()) {
            Some(r) => joined.push((row, r)),
            None => {
                report.dropped_rows += 1;
                report.dropped_segments.insert(row.segment_id().to_string());
            }
        }
    }
    report.matched_rows = joined.len();
    report.log();
    (joined, report)
}

/// Attaches network membership (inner, one-to-one) and speed limits (left,
/// many-to-one) to segment metadata.
///
/// Without a network table every segment is kept as non-interstate.
pub fn attach_segment_attributes(
    metadata: Vec<SegmentMetadata>,
    network: Option<&HashMap<String, NetworkMembership>>,
    speed_limits: Option<&HashMap<String, SpeedLimit>>,
) -> (Vec<SegmentMetadata>, JoinReport) {
    let mut report = JoinReport {
        stage: "network".to_string(),
        ..Default::default()
    };
    let mut segments = Vec::with_capacity(metadata.len());
    for mut seg in metadata {
        report.left_rows += 1;
        if let Some(network) = network {
            match network.get(&seg.segment_id) {
                Some(m) => seg.interstate = m.interstate,
                None => {
                    report.dropped_rows += 1;
                    report.dropped_segments.insert(seg.segment_id);
                    continue;
                }
            }
        }
        if let Some(limits) = speed_limits {
            seg.speed_limit_mph = limits.get(&seg.segment_id).map(|s| s.speed_limit_mph);
        }
        segments.push(seg);
    }
    report.matched_rows = segments.len();
    report.log();
    (segments, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{TravelTimeRecord, parse_timestamp};

    fn meta(id: &str) -> SegmentMetadata {
        SegmentMetadata {
            segment_id: id.into(),
            miles: 1.0,
            facility_type: 1.0,
            aadt: 10000.0,
            aadt_single_unit: 100.0,
            aadt_combination: 100.0,
            nhs_pct: 100.0,
            linear_id: None,
            active_end_date: None,
            speed_limit_mph: None,
            interstate: false,
        }
    }

    fn record(id: &str) -> TravelTimeRecord {
        TravelTimeRecord {
            segment_id: id.into(),
            timestamp: parse_timestamp("2019-03-04 06:00:00").unwrap(),
            travel_time_seconds: 60.0,
        }
    }

    #[test]
    fn test_index_unique_rejects_duplicates() {
        let limits = vec![
            SpeedLimit {
                segment_id: "A".into(),
                speed_limit_mph: 55.0,
            },
            SpeedLimit {
                segment_id: "A".into(),
                speed_limit_mph: 45.0,
            },
        ];
        let err = index_unique("speed_limits", Path::new("here.csv"), limits).unwrap_err();
        assert!(matches!(err, MetricError::DuplicateKey { ref key, .. } if key == "A"));
    }

    #[test]
    fn test_inner_join_counts_dropped_segments() {
        let records = vec![record("A"), record("B"), record("B"), record("C")];
        let index = index_unique("metadata", Path::new("meta.csv"), vec![meta("A"), meta("C")]).unwrap();
        let (joined, report) = inner_join("metadata", &records, &index);
        assert_eq!(joined.len(), 2);
        assert_eq!(report.left_rows, 4);
        assert_eq!(report.dropped_rows, 2);
        assert_eq!(report.dropped_segments.len(), 1);
        assert!(report.dropped_segments.contains("B"));
    }

    #[test]
    fn test_attach_network_and_speed_limits() {
        let network = index_unique(
            "network",
            Path::new("net.csv"),
            vec![
                NetworkMembership {
                    segment_id: "A".into(),
                    interstate: true,
                },
                NetworkMembership {
                    segment_id: "B".into(),
                    interstate: false,
                },
            ],
        )
        .unwrap();
        let limits = index_unique(
            "speed_limits",
            Path::new("here.csv"),
            vec![SpeedLimit {
                segment_id: "A".into(),
                speed_limit_mph: 65.0,
            }],
        )
        .unwrap();

        let (segments, report) = attach_segment_attributes(
            vec![meta("A"), meta("B"), meta("C")],
            Some(&network),
            Some(&limits),
        );
        assert_eq!(segments.len(), 2);
        assert!(segments[0].interstate);
        assert_eq!(segments[0].speed_limit_mph, Some(65.0));
        assert!(!segments[1].interstate);
        assert_eq!(segments[1].speed_limit_mph, None);
        assert!(report.dropped_segments.contains("C"));
    }

    #[test]
    fn test_attach_without_network_keeps_all() {
        let (segments, report) = attach_segment_attributes(vec![meta("A"), meta("B")], None, None);
        assert_eq!(segments.len(), 2);
        assert_eq!(report.dropped_rows, 0);
    }
}
