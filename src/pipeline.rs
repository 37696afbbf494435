//! End-to-end metric runs.
//!
//! Each run is a straight sequence of stages: load the extracts, prepare the
//! segment table, join, compute per segment, reduce to the network. Stages
//! hand their output to the next one explicitly and record what they dropped
//! in an [`AuditReport`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ReliabilityKind, ReliabilityParams, RunConfig};
use crate::error::{MetricError, Result};
use crate::join::{JoinReport, attach_segment_attributes, index_unique, inner_join};
use crate::loader::{
    DedupReport, LoadReport, PeakingTable, load_metadata, load_network, load_observations,
    load_peaking_factors, load_speed_limits, load_travel_times,
};
use crate::metrics::hourly::{day_filter, hourly_profile};
use crate::metrics::modes::{SegmentProfile, profile_segments};
use crate::metrics::network::{Weighting, reliability_index, weighted_share};
use crate::metrics::phed::{delay_intervals, per_capita_ted, total_excessive_delay};
use crate::metrics::reliability::{SubstitutionReport, segment_reliability, substitute_truck_times};
use crate::metrics::types::{
    HourlyProfileRow, PhedSegment, RejectedSegment, ReliabilitySegment,
};
use crate::records::{ProbeObservation, TravelTimeRecord};
use crate::window::TimeWindow;

/// Segment attribute tables shared by every metric.
#[derive(Debug, Clone, Default)]
pub struct SegmentSources {
    pub metadata: PathBuf,
    /// Analysis network. When given, segments outside it are dropped.
    pub network: Option<PathBuf>,
    pub speed_limits: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct PhedInputs {
    pub travel_times: Vec<PathBuf>,
    pub segments: SegmentSources,
    pub peaking_factors: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LottrInputs {
    pub travel_times: Vec<PathBuf>,
    pub segments: SegmentSources,
}

#[derive(Debug, Clone, Default)]
pub struct TttrInputs {
    pub truck_travel_times: Vec<PathBuf>,
    /// All-vehicle extract used to fill missing truck intervals.
    pub all_vehicle_travel_times: Vec<PathBuf>,
    pub segments: SegmentSources,
}

#[derive(Debug, Clone, Default)]
pub struct HourlyInputs {
    pub travel_times: Vec<PathBuf>,
    /// Optional metadata supplying segment lengths.
    pub metadata: Option<PathBuf>,
}

/// Everything a run dropped or resolved on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub loads: Vec<LoadReport>,
    pub data_start_date: Option<NaiveDate>,
    pub metadata: Option<DedupReport>,
    pub joins: Vec<JoinReport>,
    pub rejected: Vec<RejectedSegment>,
    pub missing_peaking_factor: usize,
    pub substitution: Option<SubstitutionReport>,
}

impl AuditReport {
    /// Records a join. Segments an earlier stage already dropped or rejected
    /// stay out of its `dropped_segments`, so each segment is counted once.
    fn record_join(&mut self, mut report: JoinReport) {
        report.dropped_segments.retain(|id| {
            !self.rejected.iter().any(|r| &r.segment_id == id)
                && !self.joins.iter().any(|j| j.dropped_segments.contains(id))
        });
        self.joins.push(report);
    }

    fn dropped_segments(&self) -> usize {
        self.joins.iter().map(|j| j.dropped_segments.len()).sum()
    }

    fn log(&self) {
        info!(
            rows_read = self.loads.iter().map(|l| l.rows_read).sum::<usize>(),
            null_travel_times = self.loads.iter().map(|l| l.null_travel_times).sum::<usize>(),
            dropped_segments = self.dropped_segments(),
            rejected_segments = self.rejected.len(),
            "Run audit"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhedSummary {
    pub measure: &'static str,
    pub segments: usize,
    pub population: f64,
    /// Person-hours of excessive delay across the network.
    pub total_ted: f64,
    pub phed_per_capita: f64,
    pub audit: AuditReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhedRun {
    pub segments: Vec<PhedSegment>,
    pub summary: PhedSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilitySummary {
    pub measure: &'static str,
    pub segments: usize,
    pub reliable_segments: usize,
    pub weighting: Weighting,
    /// Network index: LOTTR over every segment, TTTR over interstates only.
    pub index: f64,
    pub pct_reliable_person_miles_interstate: Option<f64>,
    pub pct_reliable_person_miles_non_interstate: Option<f64>,
    pub truck_miles: f64,
    pub audit: AuditReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityRun {
    pub windows: Vec<TimeWindow>,
    pub segments: Vec<ReliabilitySegment>,
    pub summary: ReliabilitySummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySummary {
    pub measure: &'static str,
    pub segments: usize,
    pub rows: usize,
    pub audit: AuditReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRun {
    pub rows: Vec<HourlyProfileRow>,
    pub summary: HourlySummary,
}

fn in_any_window(windows: &[TimeWindow]) -> impl Fn(&ProbeObservation) -> bool + '_ {
    move |obs: &ProbeObservation| windows.iter().any(|w| w.matches(&obs.timestamp))
}

/// Configured start date, otherwise the first date seen in the extracts.
fn data_start(config: &RunConfig, loads: &[LoadReport]) -> Option<NaiveDate> {
    config.data_start_date.or_else(|| {
        loads
            .iter()
            .filter_map(|l| l.earliest)
            .min()
            .map(|ts| ts.date())
    })
}

fn load_index<T, F>(
    stage: &'static str,
    path: Option<&Path>,
    load: F,
) -> Result<Option<HashMap<String, T>>>
where
    T: crate::records::Segmented,
    F: Fn(&Path) -> Result<Vec<T>>,
{
    path.map(|p| load(p).and_then(|rows| index_unique(stage, p, rows)))
        .transpose()
}

/// Loads and de-duplicates metadata, attaches network membership and speed
/// limits, and derives mode shares.
fn prepare_segments(
    sources: &SegmentSources,
    config: &RunConfig,
    require_nhs_pct: bool,
    audit: &mut AuditReport,
) -> Result<HashMap<String, SegmentProfile>> {
    let (metadata, dedup) =
        load_metadata(&sources.metadata, audit.data_start_date, require_nhs_pct)?;
    audit.metadata = Some(dedup);

    let network = load_index("network", sources.network.as_deref(), load_network)?;
    let limits = load_index("speed_limits", sources.speed_limits.as_deref(), load_speed_limits)?;
    let (segments, report) = attach_segment_attributes(metadata, network.as_ref(), limits.as_ref());
    audit.record_join(report);

    let (profiles, rejected) = profile_segments(segments, config.strict)?;
    audit.rejected.extend(rejected);
    Ok(profiles)
}

/// Computes Peak Hour Excessive Delay per segment and per capita.
#[tracing::instrument(skip_all, fields(files = inputs.travel_times.len()))]
pub fn run_phed(inputs: &PhedInputs, config: &RunConfig) -> Result<PhedRun> {
    let phed = &config.phed;
    let population = phed
        .population
        .ok_or(MetricError::MissingParameter("population"))?;
    let peaking = match (&inputs.peaking_factors, phed.fallback_peaking_factor) {
        (Some(path), _) => load_peaking_factors(path, &phed.peaking_factor_column)?,
        (None, Some(factor)) => {
            warn!(factor, "No peaking table given, using a constant hourly factor");
            PeakingTable::uniform(factor)
        }
        (None, None) => return Err(MetricError::MissingParameter("peaking_factors")),
    };

    let (records, load) = load_travel_times(&inputs.travel_times, in_any_window(&phed.windows))?;
    let mut audit = AuditReport {
        data_start_date: data_start(config, std::slice::from_ref(&load)),
        loads: vec![load],
        ..Default::default()
    };
    let profiles = prepare_segments(&inputs.segments, config, false, &mut audit)?;

    let (joined, report) = inner_join("travel_times", &records, &profiles);
    audit.record_join(report);

    let (intervals, missing) = delay_intervals(&joined, &peaking, phed);
    audit.missing_peaking_factor = missing;

    let segments = total_excessive_delay(&intervals, &phed.occupancy);
    let phed_per_capita = per_capita_ted(&segments, population)?;
    let total_ted: f64 = segments.iter().map(|s| s.ted).sum();
    info!(
        segments = segments.len(),
        total_ted, phed_per_capita, "Peak hour excessive delay computed"
    );
    audit.log();

    Ok(PhedRun {
        summary: PhedSummary {
            measure: "phed",
            segments: segments.len(),
            population,
            total_ted,
            phed_per_capita,
            audit,
        },
        segments,
    })
}

/// Reliable share of person-miles within one group, `None` when the group is empty.
fn reliable_share(
    segments: &[ReliabilitySegment],
    group: &'static str,
    interstate: bool,
) -> Option<f64> {
    match weighted_share(
        group,
        segments,
        |s| s.person_miles,
        |s| s.interstate == interstate,
        |s| s.reliable,
    ) {
        Ok(share) => Some(share),
        Err(e) => {
            warn!(group, error = %e, "No person-miles in group");
            None
        }
    }
}

fn reliability_run(
    records: Vec<TravelTimeRecord>,
    sources: &SegmentSources,
    params: ReliabilityParams,
    config: &RunConfig,
    mut audit: AuditReport,
) -> Result<ReliabilityRun> {
    let require_nhs_pct = params.weighting == Weighting::MilesNhs;
    let profiles = prepare_segments(sources, config, require_nhs_pct, &mut audit)?;

    let (joined, report) = inner_join("travel_times", &records, &profiles);
    audit.record_join(report);
    let matched: Vec<TravelTimeRecord> = joined.into_iter().map(|(r, _)| r.clone()).collect();

    let (segments, rejected) = segment_reliability(&matched, &profiles, &params, config.strict)?;
    audit.rejected.extend(rejected);

    let (measure, interstate_only) = match params.kind {
        ReliabilityKind::Lottr => ("lottr", false),
        ReliabilityKind::Tttr => ("tttr", true),
    };
    let index = reliability_index(measure, &segments, params.weighting, interstate_only)?;
    let summary = ReliabilitySummary {
        measure,
        segments: segments.len(),
        reliable_segments: segments.iter().filter(|s| s.reliable).count(),
        weighting: params.weighting,
        index,
        pct_reliable_person_miles_interstate: reliable_share(&segments, "interstate", true),
        pct_reliable_person_miles_non_interstate: reliable_share(
            &segments,
            "non_interstate",
            false,
        ),
        truck_miles: segments
            .iter()
            .filter(|s| !interstate_only || s.interstate)
            .map(|s| s.truck_miles)
            .sum(),
        audit,
    };
    info!(
        measure,
        index,
        segments = summary.segments,
        reliable = summary.reliable_segments,
        "Reliability index computed"
    );
    summary.audit.log();

    Ok(ReliabilityRun {
        windows: params.windows,
        segments,
        summary,
    })
}

/// Computes Level of Travel Time Reliability.
#[tracing::instrument(skip_all, fields(files = inputs.travel_times.len()))]
pub fn run_lottr(inputs: &LottrInputs, config: &RunConfig) -> Result<ReliabilityRun> {
    let params = config.reliability(ReliabilityKind::Lottr);
    let (records, load) = load_travel_times(&inputs.travel_times, in_any_window(&params.windows))?;
    let audit = AuditReport {
        data_start_date: data_start(config, std::slice::from_ref(&load)),
        loads: vec![load],
        ..Default::default()
    };
    reliability_run(records, &inputs.segments, params, config, audit)
}

/// Computes Truck Travel Time Reliability.
///
/// With an all-vehicle extract, intervals missing from the truck extract take
/// the all-vehicle travel time.
#[tracing::instrument(skip_all, fields(files = inputs.truck_travel_times.len()))]
pub fn run_tttr(inputs: &TttrInputs, config: &RunConfig) -> Result<ReliabilityRun> {
    let params = config.reliability(ReliabilityKind::Tttr);
    let windows = params.windows.clone();
    let keep = in_any_window(&windows);
    let (truck, truck_load) = load_observations(&inputs.truck_travel_times, &keep)?;

    let mut audit = AuditReport::default();
    let records = if inputs.all_vehicle_travel_times.is_empty() {
        let mut load = truck_load;
        let before = truck.len();
        let records: Vec<TravelTimeRecord> = truck
            .into_iter()
            .filter_map(ProbeObservation::into_record)
            .collect();
        load.null_travel_times = before - records.len();
        audit.loads.push(load);
        records
    } else {
        let (all_vehicle, all_load) =
            load_travel_times(&inputs.all_vehicle_travel_times, &keep)?;
        let (merged, substitution) = substitute_truck_times(&truck, &all_vehicle);
        audit.loads.extend([truck_load, all_load]);
        audit.substitution = Some(substitution);
        merged
    };
    audit.data_start_date = data_start(config, &audit.loads);

    reliability_run(records, &inputs.segments, params, config, audit)
}

/// Builds hour-of-day travel-time profiles for the configured months and days.
#[tracing::instrument(skip_all, fields(files = inputs.travel_times.len()))]
pub fn run_hourly(inputs: &HourlyInputs, config: &RunConfig) -> Result<HourlyRun> {
    let (records, load) = load_travel_times(&inputs.travel_times, day_filter(&config.hourly))?;
    let mut audit = AuditReport {
        data_start_date: data_start(config, std::slice::from_ref(&load)),
        loads: vec![load],
        ..Default::default()
    };

    let miles = match &inputs.metadata {
        Some(path) => {
            let (metadata, dedup) = load_metadata(path, audit.data_start_date, false)?;
            audit.metadata = Some(dedup);
            Some(
                metadata
                    .into_iter()
                    .map(|m| (m.segment_id, m.miles))
                    .collect::<HashMap<_, _>>(),
            )
        }
        None => None,
    };

    let rows = hourly_profile(&records, miles.as_ref());
    let segments = rows
        .iter()
        .map(|r| r.segment_id.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    info!(segments, rows = rows.len(), "Hourly profile computed");
    audit.log();

    Ok(HourlyRun {
        summary: HourlySummary {
            measure: "hourly",
            segments,
            rows: rows.len(),
            audit,
        },
        rows,
    })
}
