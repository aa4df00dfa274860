use std::collections::HashSet;

use indexmap::IndexMap;

use super::normalize::UpstreamMetrics;
use crate::snapshot::{
    AggregateMetrics, BuildStatus, DerivedMetrics, DurationPoint, Pipeline, PipelineHealth,
    PipelineHealthReport, PipelineStatus, PipelineStatusCounts,
};

/// Failure rate (percent) at or above which a pipeline is unhealthy.
const UNHEALTHY_FAILURE_RATE: f64 = 20.0;

/// Number of recent builds plotted in the duration trend.
const DURATION_TREND_WINDOW: usize = 50;

/// Interprets an upstream success rate as a percentage in `[0, 100]`.
///
/// Values in `(0, 1]` are fractions and get scaled by 100, which means a true
/// 1% is indistinguishable from 100%. Values in `[0, 100]` pass through and
/// anything else is clamped.
pub fn normalize_success_rate(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    if value > 0.0 && value <= 1.0 {
        return value * 100.0;
    }
    value.clamp(0.0, 100.0)
}

#[allow(clippy::cast_precision_loss)]
fn calculate_rate(count: usize, total: usize) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_count(value: f64) -> usize {
    value.max(0.0).round() as usize
}

/// Derives the aggregate figures, preferring upstream values and falling back
/// to the held pipelines' builds for anything absent.
pub fn compute_aggregate(
    pipelines: &[Pipeline],
    upstream: Option<&UpstreamMetrics>,
) -> AggregateMetrics {
    let upstream = upstream.cloned().unwrap_or_default();

    let total_pipelines = upstream
        .total_pipelines
        .map_or(pipelines.len(), as_count);

    let total_builds = upstream
        .total_builds
        .map_or_else(|| pipelines.iter().map(|p| p.builds.len()).sum(), as_count);

    let (success_count, failure_count) = match (upstream.success_count, upstream.failure_count) {
        (Some(success), Some(failure)) => (as_count(success), as_count(failure)),
        _ => count_outcomes(pipelines),
    };

    let success_rate_percent = upstream.success_rate.map_or_else(
        || calculate_rate(success_count, success_count + failure_count),
        normalize_success_rate,
    );

    let avg_duration_seconds = upstream
        .avg_duration_seconds
        .filter(|s| *s >= 0.0)
        .unwrap_or_else(|| average_duration(pipelines));

    AggregateMetrics {
        total_pipelines,
        total_builds,
        success_count,
        failure_count,
        success_rate_percent,
        avg_duration_seconds,
    }
}

fn count_outcomes(pipelines: &[Pipeline]) -> (usize, usize) {
    pipelines
        .iter()
        .flat_map(|p| &p.builds)
        .filter(|build| build.status.is_terminal())
        .fold((0, 0), |(success, failure), build| {
            if build.status.counts_as_failure() {
                (success, failure + 1)
            } else {
                (success + 1, failure)
            }
        })
}

#[allow(clippy::cast_precision_loss)]
fn average_duration(pipelines: &[Pipeline]) -> f64 {
    let durations: Vec<f64> = pipelines
        .iter()
        .flat_map(|p| &p.builds)
        .map(|b| b.duration_seconds)
        .filter(|d| *d > 0.0)
        .collect();

    if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    }
}

/// Classifies a pipeline from its SUCCESS/FAILURE builds only.
///
/// Unstable and aborted builds do not count here even though they count as
/// failures in the aggregate.
pub fn classify_pipeline(pipeline: &Pipeline) -> PipelineHealthReport {
    let success_count = pipeline
        .builds
        .iter()
        .filter(|b| b.status == BuildStatus::Success)
        .count();
    let failure_count = pipeline
        .builds
        .iter()
        .filter(|b| b.status == BuildStatus::Failure)
        .count();

    let terminal = success_count + failure_count;
    let failure_rate = calculate_rate(failure_count, terminal);

    let health = if failure_rate < UNHEALTHY_FAILURE_RATE {
        PipelineHealth::Healthy
    } else {
        PipelineHealth::Unhealthy
    };

    PipelineHealthReport {
        name: pipeline.name.clone(),
        success_count,
        failure_count,
        success_rate: calculate_rate(success_count, terminal),
        failure_rate,
        health,
    }
}

fn empty_status_map() -> IndexMap<BuildStatus, usize> {
    BuildStatus::ALL.iter().map(|s| (*s, 0)).collect()
}

/// Counts every held build by status.
pub fn build_status_counts(pipelines: &[Pipeline]) -> IndexMap<BuildStatus, usize> {
    let mut counts = empty_status_map();
    for build in pipelines.iter().flat_map(|p| &p.builds) {
        *counts.entry(build.status).or_insert(0) += 1;
    }
    counts
}

/// Counts pipelines once per status they have at least one build in.
///
/// Builds with no reported status are ignored; a pipeline left with nothing
/// counts as `Other`.
pub fn pipeline_status_presence(pipelines: &[Pipeline]) -> IndexMap<BuildStatus, usize> {
    let mut counts = empty_status_map();
    for pipeline in pipelines {
        let mut seen: HashSet<BuildStatus> = pipeline
            .builds
            .iter()
            .filter(|b| b.status_known)
            .map(|b| b.status)
            .collect();
        if seen.is_empty() {
            seen.insert(BuildStatus::Other);
        }
        for status in seen {
            *counts.entry(status).or_insert(0) += 1;
        }
    }
    counts
}

/// Disabled pipelines count as unknown.
pub fn pipeline_status_counts(pipelines: &[Pipeline]) -> PipelineStatusCounts {
    pipelines
        .iter()
        .fold(PipelineStatusCounts::default(), |mut counts, pipeline| {
            match pipeline.status() {
                PipelineStatus::Success => counts.success += 1,
                PipelineStatus::Failure => counts.failure += 1,
                PipelineStatus::InProgress => counts.in_progress += 1,
                PipelineStatus::Disabled | PipelineStatus::Unknown => counts.unknown += 1,
            }
            counts
        })
}

/// The most recent builds across all pipelines by build number, oldest first.
pub fn duration_trend(pipelines: &[Pipeline]) -> Vec<DurationPoint> {
    let mut points: Vec<DurationPoint> = pipelines
        .iter()
        .flat_map(|p| {
            p.builds
                .iter()
                .filter(|b| b.duration_seconds > 0.0 && b.build_number > 0)
                .map(|b| DurationPoint {
                    pipeline: p.name.clone(),
                    build_number: b.build_number,
                    minutes: b.duration_seconds / 60.0,
                })
        })
        .collect();

    points.sort_by(|a, b| b.build_number.cmp(&a.build_number));
    points.truncate(DURATION_TREND_WINDOW);
    points.reverse();
    points
}

/// Runs every derivation over one set of held pipelines.
pub fn compute(pipelines: &[Pipeline], upstream: Option<&UpstreamMetrics>) -> DerivedMetrics {
    DerivedMetrics {
        aggregate: compute_aggregate(pipelines, upstream),
        health: pipelines.iter().map(classify_pipeline).collect(),
        build_status_counts: build_status_counts(pipelines),
        pipeline_status_presence: pipeline_status_presence(pipelines),
        pipeline_status_counts: pipeline_status_counts(pipelines),
        duration_trend: duration_trend(pipelines),
    }
}
