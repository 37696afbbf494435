//! Day-of-week and hour-of-day windows used to slice travel-time records.
//!
//! Hour ranges are closed and inclusive: `HourRange { start: 6, end: 9 }`
//! covers every record stamped 06:00 through 09:59.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{MetricError, Result};
use crate::records::Timestamped;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySet {
    /// Monday through Friday.
    Weekday,
    /// Saturday and Sunday.
    Weekend,
    All,
}

impl DaySet {
    pub fn contains(&self, day: Weekday) -> bool {
        let weekend = matches!(day, Weekday::Sat | Weekday::Sun);
        match self {
            DaySet::Weekday => !weekend,
            DaySet::Weekend => weekend,
            DaySet::All => true,
        }
    }

    fn intersects(&self, other: &DaySet) -> bool {
        !matches!(
            (self, other),
            (DaySet::Weekday, DaySet::Weekend) | (DaySet::Weekend, DaySet::Weekday)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start..=self.end).contains(&hour)
    }
}

/// A named slice of the week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub name: String,
    pub days: DaySet,
    pub hours: Vec<HourRange>,
}

impl TimeWindow {
    pub fn new(name: &str, days: DaySet, hours: &[HourRange]) -> Self {
        Self {
            name: name.to_string(),
            days,
            hours: hours.to_vec(),
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        self.hours.iter().any(|r| r.contains(hour))
    }

    pub fn matches(&self, ts: &NaiveDateTime) -> bool {
        self.days.contains(ts.weekday()) && self.contains_hour(ts.hour())
    }

    pub fn validate(&self) -> Result<()> {
        if self.hours.is_empty() {
            return Err(self.invalid("no hour ranges"));
        }
        for r in &self.hours {
            if r.end > 23 {
                return Err(self.invalid(&format!("hour {} is past 23", r.end)));
            }
            if r.start > r.end {
                return Err(self.invalid(&format!("range {}..={} is reversed", r.start, r.end)));
            }
        }
        Ok(())
    }

    fn overlaps(&self, other: &TimeWindow) -> bool {
        self.days.intersects(&other.days)
            && (0..24).any(|h| self.contains_hour(h) && other.contains_hour(h))
    }

    fn invalid(&self, problem: &str) -> MetricError {
        MetricError::InvalidWindow {
            window: self.name.clone(),
            problem: problem.to_string(),
        }
    }
}

/// Checks each window and that no two windows can claim the same record.
pub fn validate_windows(windows: &[TimeWindow]) -> Result<()> {
    if windows.is_empty() {
        return Err(MetricError::InvalidWindow {
            window: "<none>".into(),
            problem: "at least one window is required".into(),
        });
    }
    for (i, w) in windows.iter().enumerate() {
        w.validate()?;
        if let Some(other) = windows[i + 1..].iter().find(|o| w.overlaps(o)) {
            return Err(w.invalid(&format!("overlaps window `{}`", other.name)));
        }
    }
    Ok(())
}

/// Returns the rows that fall inside `window`.
pub fn filter<'a, T: Timestamped>(rows: &'a [T], window: &TimeWindow) -> Vec<&'a T> {
    rows.iter().filter(|r| window.matches(&r.timestamp())).collect()
}

/// Splits rows across disjoint windows. Rows outside every window are dropped.
pub fn partition<'a, 'w, T: Timestamped>(
    rows: &'a [T],
    windows: &'w [TimeWindow],
) -> Vec<(&'w TimeWindow, Vec<&'a T>)> {
    let mut buckets: Vec<(&TimeWindow, Vec<&T>)> =
        windows.iter().map(|w| (w, Vec::new())).collect();
    for row in rows {
        let ts = row.timestamp();
        if let Some((_, bucket)) = buckets.iter_mut().find(|(w, _)| w.matches(&ts)) {
            bucket.push(row);
        }
    }
    buckets
}

/// FHWA peak period for PHED: weekdays 6–10am and 4–8pm.
pub fn phed_windows() -> Vec<TimeWindow> {
    vec![TimeWindow::new(
        "weekday_peak",
        DaySet::Weekday,
        &[HourRange::new(6, 9), HourRange::new(16, 19)],
    )]
}

/// FHWA LOTTR periods: weekday AM, midday, PM and weekend daytime.
pub fn lottr_windows() -> Vec<TimeWindow> {
    vec![
        TimeWindow::new("weekday_am", DaySet::Weekday, &[HourRange::new(6, 9)]),
        TimeWindow::new("weekday_midday", DaySet::Weekday, &[HourRange::new(10, 15)]),
        TimeWindow::new("weekday_pm", DaySet::Weekday, &[HourRange::new(16, 19)]),
        TimeWindow::new("weekend_day", DaySet::Weekend, &[HourRange::new(6, 19)]),
    ]
}

/// FHWA TTTR periods: the LOTTR periods plus weekday and weekend overnight.
pub fn tttr_windows() -> Vec<TimeWindow> {
    let overnight = [HourRange::new(20, 23), HourRange::new(0, 5)];
    let mut windows = lottr_windows();
    windows.push(TimeWindow::new("weekday_overnight", DaySet::Weekday, &overnight));
    windows.push(TimeWindow::new("weekend_overnight", DaySet::Weekend, &overnight));
    windows
}
