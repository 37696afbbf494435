//! Generic group-by-segment reductions.
//!
//! Groups are keyed by `segment_id` and emitted in ascending key order, so the
//! same input always yields the same output order.

use std::collections::{BTreeMap, BTreeSet};

use crate::metrics::utility::{mean, percentile};
use crate::records::Segmented;

/// How a column collapses to one value per segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    Sum,
    Mean,
    Max,
    Min,
    Count,
    Percentile(f64),
}

impl Reduction {
    /// Applies the reduction. Missing (`None`/NaN) inputs are skipped; an empty
    /// remainder yields `None`, except for `Count` and `Sum` which yield 0.
    pub fn apply(&self, values: &[Option<f64>]) -> Option<f64> {
        let present: Vec<f64> = values
            .iter()
            .filter_map(|v| v.filter(|x| !x.is_nan()))
            .collect();
        match self {
            Reduction::Count => Some(present.len() as f64),
            Reduction::Sum => Some(present.iter().sum()),
            _ if present.is_empty() => None,
            Reduction::Mean => mean(&present),
            Reduction::Max => present.iter().copied().reduce(f64::max),
            Reduction::Min => present.iter().copied().reduce(f64::min),
            Reduction::Percentile(p) => percentile(&present, *p),
        }
    }
}

/// A named column: how to read it from a row and how to reduce it.
pub struct Column<'f, T> {
    pub name: &'static str,
    pub value: Box<dyn Fn(&T) -> Option<f64> + 'f>,
    pub reduction: Reduction,
}

impl<'f, T> Column<'f, T> {
    pub fn new(
        name: &'static str,
        reduction: Reduction,
        value: impl Fn(&T) -> Option<f64> + 'f,
    ) -> Self {
        Self {
            name,
            value: Box::new(value),
            reduction,
        }
    }
}

/// One reduced row per segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub segment_id: String,
    pub rows: usize,
    pub values: Vec<Option<f64>>,
}

/// The result of [`group_reduce`]: column names plus one row per segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    pub columns: Vec<&'static str>,
    pub rows: Vec<AggregatedRow>,
}

impl AggregateTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }

    /// Looks up a reduced value by segment and column name.
    pub fn value(&self, segment_id: &str, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|r| r.segment_id == segment_id)
            .and_then(|r| r.values[idx])
    }
}

/// Groups rows by segment id, preserving input order within each group.
pub fn group_by_segment<'a, T, I>(rows: I) -> BTreeMap<String, Vec<&'a T>>
where
    T: Segmented + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(row.segment_id().to_string())
            .or_default()
            .push(row);
    }
    groups
}

/// Reduces each segment's rows to one row per requested column.
pub fn group_reduce<'a, T, I>(rows: I, columns: &[Column<'_, T>]) -> AggregateTable
where
    T: Segmented + 'a,
    I: IntoIterator<Item = &'a T>,
{
    reduce_groups(group_by_segment(rows), columns)
}

/// Like [`group_reduce`], but every id in `segments` surfaces in the output,
/// with reductions over no rows, even when it has no rows in `rows`.
pub fn group_reduce_over<'a, T, I>(
    segments: &BTreeSet<String>,
    rows: I,
    columns: &[Column<'_, T>],
) -> AggregateTable
where
    T: Segmented + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut groups = group_by_segment(rows);
    for id in segments {
        groups.entry(id.clone()).or_default();
    }
    reduce_groups(groups, columns)
}

fn reduce_groups<T>(groups: BTreeMap<String, Vec<&T>>, columns: &[Column<'_, T>]) -> AggregateTable {
    let rows = groups
        .into_iter()
        .map(|(segment_id, members)| {
            let values = columns
                .iter()
                .map(|c| {
                    let series: Vec<Option<f64>> = members.iter().map(|m| (c.value)(*m)).collect();
                    c.reduction.apply(&series)
                })
                .collect();
            AggregatedRow {
                segment_id,
                rows: members.len(),
                values,
            }
        })
        .collect();
    AggregateTable {
        columns: columns.iter().map(|c| c.name).collect(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        id: &'static str,
        x: Option<f64>,
    }

    impl Segmented for Row {
        fn segment_id(&self) -> &str {
            self.id
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { id: "B", x: Some(1.0) },
            Row { id: "A", x: Some(4.0) },
            Row { id: "B", x: Some(3.0) },
            Row { id: "A", x: None },
            Row { id: "B", x: Some(2.0) },
        ]
    }

    #[test]
    fn test_reductions() {
        let data = rows();
        let columns = vec![
            Column::new("sum", Reduction::Sum, |r: &Row| r.x),
            Column::new("mean", Reduction::Mean, |r: &Row| r.x),
            Column::new("max", Reduction::Max, |r: &Row| r.x),
            Column::new("min", Reduction::Min, |r: &Row| r.x),
            Column::new("count", Reduction::Count, |r: &Row| r.x),
            Column::new("p50", Reduction::Percentile(50.0), |r: &Row| r.x),
        ];
        let table = group_reduce(&data, &columns);
        let ids: Vec<&str> = table.rows.iter().map(|r| r.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(table.value("B", "sum"), Some(6.0));
        assert_eq!(table.value("B", "mean"), Some(2.0));
        assert_eq!(table.value("B", "max"), Some(3.0));
        assert_eq!(table.value("B", "min"), Some(1.0));
        assert_eq!(table.value("B", "p50"), Some(2.0));
        assert_eq!(table.value("A", "count"), Some(1.0));
        assert_eq!(table.rows[0].rows, 2);
    }

    #[test]
    fn test_missing_segments_surface_with_none() {
        let data = rows();
        let universe: BTreeSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let columns = vec![Column::new("max", Reduction::Max, |r: &Row| r.x)];
        let table = group_reduce_over(&universe, &data, &columns);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2].segment_id, "C");
        assert_eq!(table.rows[2].rows, 0);
        assert_eq!(table.value("C", "max"), None);
    }

    #[test]
    fn test_all_missing_column_is_none() {
        let data = vec![Row { id: "A", x: None }];
        let columns = vec![
            Column::new("mean", Reduction::Mean, |r: &Row| r.x),
            Column::new("sum", Reduction::Sum, |r: &Row| r.x),
        ];
        let table = group_reduce(&data, &columns);
        assert_eq!(table.value("A", "mean"), None);
        assert_eq!(table.value("A", "sum"), Some(0.0));
    }
}
