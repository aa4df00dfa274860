//! Maps upstream record shapes into the canonical model.
//!
//! Every function here is infallible: absent, renamed or mistyped fields
//! resolve through an ordered list of known keys and otherwise fall back to
//! zero/empty defaults.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::snapshot::{Build, BuildStatus, ConnectionStatus, FailedBuildAlert, NodeHealth, Pipeline};

const DEFAULT_NODE_PORT: u16 = 8080;

/// Epoch values above this are milliseconds, below it seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Unanchored: only the first `Xm Ys` match in a string is read, so
/// `"1h 2m 5s"` yields 125.
static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(\d+)m)?\s*(\d+(?:\.\d+)?)s").expect("duration pattern is valid")
});

/// Unit carried by an upstream duration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DurationUnit {
    Seconds,
    Millis,
}

const DURATION_FIELDS: [(&str, DurationUnit); 5] = [
    ("duration", DurationUnit::Seconds),
    ("durationSeconds", DurationUnit::Seconds),
    ("duration_seconds", DurationUnit::Seconds),
    ("durationMs", DurationUnit::Millis),
    ("duration_ms", DurationUnit::Millis),
];

/// Aggregate figures as published by the backend, before any fallback.
///
/// `None` means the field was absent or not numeric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamMetrics {
    pub total_pipelines: Option<f64>,
    pub total_builds: Option<f64>,
    pub success_count: Option<f64>,
    pub failure_count: Option<f64>,
    /// Raw rate; may be a fraction or a percentage
    pub success_rate: Option<f64>,
    pub avg_duration_seconds: Option<f64>,
}

pub fn normalize_status(raw: &str) -> BuildStatus {
    match raw.trim().to_uppercase().as_str() {
        "SUCCESS" => BuildStatus::Success,
        "FAILURE" | "FAILED" => BuildStatus::Failure,
        "BUILDING" | "IN_PROGRESS" | "RUNNING" => BuildStatus::Building,
        "UNSTABLE" => BuildStatus::Unstable,
        "ABORTED" => BuildStatus::Aborted,
        "NOT_BUILT" => BuildStatus::NotBuilt,
        _ => BuildStatus::Other,
    }
}

/// Converts `"Xm Ys"` or `"Ys"` into seconds. Anything else yields 0.
pub fn parse_duration_to_seconds(text: &str) -> f64 {
    let Some(captures) = DURATION_PATTERN.captures(text) else {
        return 0.0;
    };

    let minutes = captures
        .get(1)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    let seconds = captures
        .get(2)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    minutes * 60.0 + seconds
}

pub fn normalize_pipeline(raw: &Value) -> Option<Pipeline> {
    let obj = raw.as_object()?;
    let name = first_str(obj, &["name", "fullName", "displayName", "job"])?;
    if name.is_empty() {
        return None;
    }

    let embedded_builds = obj
        .get("builds")
        .or_else(|| obj.get("info").and_then(|info| info.get("builds")));

    Some(Pipeline {
        name,
        url: first_str(obj, &["url"]).unwrap_or_default(),
        status_color: first_str(obj, &["color", "statusColor", "status_color"]).unwrap_or_default(),
        builds: embedded_builds.map(normalize_builds).unwrap_or_default(),
    })
}

/// Normalizes a pipeline list response. Nameless records are dropped and
/// duplicate names keep their first occurrence.
pub fn normalize_pipelines(raw: &Value) -> Vec<Pipeline> {
    let mut seen = HashSet::new();
    as_records(raw)
        .iter()
        .filter_map(normalize_pipeline)
        .filter(|p| seen.insert(p.name.clone()))
        .collect()
}

pub fn normalize_build(raw: &Value) -> Build {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    let raw_status = first_str(obj, &["status", "result", "state"]).unwrap_or_default();
    let status_known = !raw_status.trim().is_empty();

    Build {
        build_number: first_u64(obj, &["build_number", "number", "id"]).unwrap_or(0),
        status: normalize_status(&raw_status),
        status_known,
        duration_seconds: resolve_duration(obj),
        timestamp: first_timestamp(obj, &["timestamp", "started_at", "startTime"]),
        url: first_str(obj, &["url"]).unwrap_or_default(),
        triggering_user: first_str(obj, &["user", "triggered_by", "triggeringUser"])
            .filter(|u| !u.is_empty()),
    }
}

/// Normalizes a build list into most-recent-first order with unique numbers.
pub fn normalize_builds(raw: &Value) -> Vec<Build> {
    let mut builds: Vec<Build> = as_records(raw).iter().map(normalize_build).collect();
    builds.sort_by(|a, b| b.build_number.cmp(&a.build_number));
    builds.dedup_by_key(|b| b.build_number);
    builds
}

pub fn normalize_node_health(raw: &Value) -> NodeHealth {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    let status = first_str(obj, &["connection_status", "status"]).unwrap_or_default();
    let connection_status = if status.eq_ignore_ascii_case("up") {
        ConnectionStatus::Up
    } else {
        ConnectionStatus::Down
    };

    let job_names = first_string_list(obj, &["jenkins_jobs", "jobNames"]).unwrap_or_default();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let job_count = first_number(obj, &["num_jobs", "jobs"])
        .map_or(job_names.len(), |n| n.max(0.0) as usize);

    let port = first_u64(obj, &["port"])
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(DEFAULT_NODE_PORT);

    NodeHealth {
        connection_status,
        job_count,
        port,
        upstream_url: first_str(obj, &["jenkins_url", "url"]).unwrap_or_default(),
        job_names,
    }
}

pub fn normalize_failed_build(raw: &Value) -> FailedBuildAlert {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    FailedBuildAlert {
        pipeline_name: first_str(obj, &["pipeline_name", "job", "pipeline"]).unwrap_or_default(),
        build_number: first_u64(obj, &["build_number", "number"]).unwrap_or(0),
        status: first_str(obj, &["status", "result"]).unwrap_or_default(),
        timestamp: first_timestamp(obj, &["timestamp"]),
        acknowledged: obj
            .get("acknowledged")
            .or_else(|| obj.get("viewed"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

pub fn normalize_failed_builds(raw: &Value) -> Vec<FailedBuildAlert> {
    as_records(raw).iter().map(normalize_failed_build).collect()
}

/// Reads the aggregate-metrics endpoint in either the
/// `{success: true, data: {metrics: {...}}}` envelope or a flat object.
pub fn normalize_metrics(raw: &Value) -> UpstreamMetrics {
    let obj = unwrap_metrics_envelope(raw).unwrap_or(empty_map());

    let avg_duration_seconds = first_number(obj, &["avg_duration", "avgBuildTimeSeconds", "avg_build_time"])
        .or_else(|| first_number(obj, &["avgBuildTimeMinutes"]).map(|mins| mins * 60.0));

    UpstreamMetrics {
        total_pipelines: first_number(obj, &["totalPipelines", "pipelinesCount", "total_pipelines"]),
        total_builds: first_number(obj, &["total", "totalBuilds", "totalBuildsCount", "total_builds"]),
        success_count: first_number(obj, &["successCount", "successful_jobs"]),
        failure_count: first_number(obj, &["failureCount", "failed_jobs"]),
        success_rate: first_number(obj, &["success_rate", "successRatePercent", "successRate"]),
        avg_duration_seconds,
    }
}

fn unwrap_metrics_envelope(raw: &Value) -> Option<&Map<String, Value>> {
    let obj = raw.as_object()?;
    if obj.get("success").and_then(Value::as_bool) == Some(true) {
        if let Some(data) = obj.get("data") {
            return Some(
                data.get("metrics")
                    .and_then(Value::as_object)
                    .unwrap_or(empty_map()),
            );
        }
    }
    Some(obj)
}

fn empty_map() -> &'static Map<String, Value> {
    static EMPTY: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);
    &EMPTY
}

/// Accepts a bare array or a `{items|data|builds|jobs: [...]}` wrapper.
fn as_records(raw: &Value) -> &[Value] {
    match raw {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => ["items", "data", "builds", "jobs"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array))
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    }
}

fn resolve_duration(obj: &Map<String, Value>) -> f64 {
    DURATION_FIELDS
        .iter()
        .find_map(|&(key, unit)| duration_value(obj.get(key)?, unit))
        .map_or(0.0, |seconds| seconds.max(0.0))
}

/// Seconds for one duration field, or `None` when the value is not a usable
/// duration so the next field is tried. Unit conversion applies to plain
/// numbers only; `"Xm Ys"` text is always seconds.
fn duration_value(value: &Value, unit: DurationUnit) -> Option<f64> {
    let scale = |n: f64| match unit {
        DurationUnit::Seconds => n,
        DurationUnit::Millis => n / 1000.0,
    };

    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(scale),
        Value::String(s) => {
            let text = s.trim();
            match text.parse::<f64>() {
                Ok(n) if n.is_finite() => Some(scale(n)),
                _ if DURATION_PATTERN.is_match(text) => Some(parse_duration_to_seconds(text)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(ToString::to_string)
}

fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        obj.get(*key)
            .and_then(Value::as_f64)
            .filter(|n| n.is_finite())
    })
}

fn first_u64(obj: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

fn first_string_list(obj: &Map<String, Value>, keys: &[&str]) -> Option<Vec<String>> {
    keys.iter().find_map(|key| {
        obj.get(*key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
    })
}

fn first_timestamp(obj: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(parse_timestamp))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return epoch_to_datetime(n);
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_to_datetime(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}
