use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Canonical outcome of a single build.
///
/// Upstream status strings are folded into this closed set by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Success,
    Failure,
    Building,
    Unstable,
    Aborted,
    NotBuilt,
    Other,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 7] = [
        BuildStatus::Success,
        BuildStatus::Failure,
        BuildStatus::Building,
        BuildStatus::Unstable,
        BuildStatus::Aborted,
        BuildStatus::NotBuilt,
        BuildStatus::Other,
    ];

    /// A finished outcome, as opposed to BUILDING/NOT_BUILT/OTHER.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Unstable | BuildStatus::Aborted
        )
    }

    /// Statuses counted as failures in aggregate metrics.
    pub fn counts_as_failure(self) -> bool {
        matches!(
            self,
            BuildStatus::Failure | BuildStatus::Unstable | BuildStatus::Aborted
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            BuildStatus::Success => "Success",
            BuildStatus::Failure => "Failure",
            BuildStatus::Building => "Building",
            BuildStatus::Unstable => "Unstable",
            BuildStatus::Aborted => "Aborted",
            BuildStatus::NotBuilt => "Not Built",
            BuildStatus::Other => "Other",
        }
    }
}

/// One execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    /// Monotonically assigned number, unique within the pipeline
    pub build_number: u64,
    pub status: BuildStatus,
    /// False when upstream sent no status at all (status is then `Other`)
    pub status_known: bool,
    /// Duration in seconds, already converted from milliseconds where needed
    pub duration_seconds: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: String,
    pub triggering_user: Option<String>,
}

/// A named CI job with its most recent builds (most-recent-first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub url: String,
    pub status_color: String,
    pub builds: Vec<Build>,
}

impl Pipeline {
    /// The most recent build, if any.
    pub fn head(&self) -> Option<&Build> {
        self.builds.first()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_color(&self.status_color)
    }
}

/// Pipeline state as reported through the upstream ball color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failure,
    InProgress,
    Disabled,
    Unknown,
}

impl PipelineStatus {
    /// Colors may carry suffixes such as `blue_anime`, so matching is by substring.
    pub fn from_color(color: &str) -> Self {
        let color = color.to_lowercase();
        if color.contains("blue") {
            PipelineStatus::Success
        } else if color.contains("red") {
            PipelineStatus::Failure
        } else if color.contains("yellow") {
            PipelineStatus::InProgress
        } else if color.contains("grey") || color.contains("disabled") {
            PipelineStatus::Disabled
        } else {
            PipelineStatus::Unknown
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PipelineStatus::Success => "Success",
            PipelineStatus::Failure => "Failure",
            PipelineStatus::InProgress => "In Progress",
            PipelineStatus::Disabled => "Disabled",
            PipelineStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_pipelines: usize,
    pub total_builds: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate_percent: f64,
    /// Zero means no duration data (rendered as N/A)
    pub avg_duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineHealth {
    Healthy,
    Unhealthy,
}

impl PipelineHealth {
    pub fn label(self) -> &'static str {
        match self {
            PipelineHealth::Healthy => "Healthy",
            PipelineHealth::Unhealthy => "Unhealthy",
        }
    }
}

/// Per-pipeline figures computed over SUCCESS/FAILURE builds only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHealthReport {
    pub name: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub health: PipelineHealth,
}

/// Pipeline counts grouped by the status implied by their color.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatusCounts {
    pub success: usize,
    pub failure: usize,
    pub in_progress: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationPoint {
    pub pipeline: String,
    pub build_number: u64,
    pub minutes: f64,
}

/// Everything derived from the held pipelines in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub aggregate: AggregateMetrics,
    pub health: Vec<PipelineHealthReport>,
    pub build_status_counts: IndexMap<BuildStatus, usize>,
    pub pipeline_status_presence: IndexMap<BuildStatus, usize>,
    pub pipeline_status_counts: PipelineStatusCounts,
    pub duration_trend: Vec<DurationPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Up,
    Down,
}

/// Connectivity and job inventory of the upstream automation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub connection_status: ConnectionStatus,
    pub job_count: usize,
    pub port: u16,
    pub upstream_url: String,
    pub job_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBuildAlert {
    pub pipeline_name: String,
    pub build_number: u64,
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub acknowledged: bool,
}

impl FailedBuildAlert {
    pub fn matches(&self, pipeline_name: &str, build_number: u64) -> bool {
        self.pipeline_name == pipeline_name && self.build_number == build_number
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertBadge {
    pub count: usize,
    pub visible: bool,
}

impl AlertBadge {
    pub fn for_count(count: usize) -> Self {
        Self {
            count,
            visible: count > 0,
        }
    }
}

/// State of the push subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

/// A user-visible, auto-expiring error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBanner {
    pub id: u64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    #[serde(default)]
    pub advice: Vec<String>,
    #[serde(default)]
    pub recent_failures: Vec<AdviceFailure>,
    #[serde(default)]
    pub resources: Vec<AdviceResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdviceFailure {
    #[serde(default)]
    pub pipeline_name: String,
    #[serde(default)]
    pub build_number: Option<u64>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdviceResource {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Immutable picture handed to renderers after every successful step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    /// Number of completed refresh cycles
    pub cycle: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub pipelines: Vec<Pipeline>,
    pub metrics: DerivedMetrics,
    pub node_health: Option<NodeHealth>,
    pub alerts: Vec<FailedBuildAlert>,
    pub alert_badge: AlertBadge,
    pub connection: ConnectionState,
    pub banner: Option<ErrorBanner>,
    /// True while a manual refresh is running
    pub refreshing: bool,
}

impl DashboardSnapshot {
    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Build count for a job name, taken from the held pipelines.
    pub fn build_count(&self, name: &str) -> usize {
        self.pipeline(name).map_or(0, |p| p.builds.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod pipeline_status {
        use super::*;

        #[test]
        fn maps_blue_to_success() {
            assert_eq!(PipelineStatus::from_color("blue"), PipelineStatus::Success);
        }

        #[test]
        fn maps_animated_colors_by_substring() {
            assert_eq!(
                PipelineStatus::from_color("red_anime"),
                PipelineStatus::Failure
            );
            assert_eq!(
                PipelineStatus::from_color("yellow_anime"),
                PipelineStatus::InProgress
            );
        }

        #[test]
        fn maps_grey_to_disabled() {
            assert_eq!(PipelineStatus::from_color("grey"), PipelineStatus::Disabled);
        }

        #[test]
        fn maps_empty_color_to_unknown() {
            assert_eq!(PipelineStatus::from_color(""), PipelineStatus::Unknown);
            assert_eq!(PipelineStatus::from_color("notbuilt"), PipelineStatus::Unknown);
        }
    }

    #[test]
    fn terminal_statuses_exclude_building_and_not_built() {
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Aborted.is_terminal());
        assert!(!BuildStatus::Building.is_terminal());
        assert!(!BuildStatus::NotBuilt.is_terminal());
        assert!(!BuildStatus::Other.is_terminal());
    }

    #[test]
    fn badge_is_visible_only_with_alerts() {
        assert_eq!(
            AlertBadge::for_count(0),
            AlertBadge {
                count: 0,
                visible: false
            }
        );
        assert!(AlertBadge::for_count(3).visible);
    }

    #[test]
    fn advice_tolerates_missing_sections() {
        let advice: Advice = serde_json::from_str(r#"{"advice": ["Retry flaky tests"]}"#).unwrap();
        assert_eq!(advice.advice, vec!["Retry flaky tests".to_string()]);
        assert!(advice.recent_failures.is_empty());
        assert!(advice.resources.is_empty());
    }
}
