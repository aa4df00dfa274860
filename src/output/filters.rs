use crate::snapshot::{Pipeline, PipelineStatus};

/// User shown for builds whose trigger is unknown.
pub const DEFAULT_TRIGGERING_USER: &str = "admin";

/// Preset filters from the dashboard's status buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum QuickFilter {
    #[default]
    All,
    Success,
    Failure,
}

/// Narrowing applied to the pipelines table. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct PipelineFilter {
    /// Case-insensitive substring of the pipeline name
    pub name: Option<String>,
    /// Case-insensitive substring of the last build's triggering user
    pub user: Option<String>,
    /// Exact status label, compared case-insensitively (e.g. `FAILURE`)
    pub status: Option<String>,
    /// Minimum last-build duration in seconds
    pub min_duration_secs: Option<f64>,
    pub quick: QuickFilter,
}

pub fn triggering_user(pipeline: &Pipeline) -> &str {
    pipeline
        .head()
        .and_then(|b| b.triggering_user.as_deref())
        .unwrap_or(DEFAULT_TRIGGERING_USER)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

impl PipelineFilter {
    pub fn matches(&self, pipeline: &Pipeline) -> bool {
        let status = pipeline.status();

        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            if !contains_ignore_case(&pipeline.name, name) {
                return false;
            }
        }

        if let Some(user) = self.user.as_deref().filter(|u| !u.trim().is_empty()) {
            if !contains_ignore_case(triggering_user(pipeline), user) {
                return false;
            }
        }

        if let Some(wanted) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            if !status.label().eq_ignore_ascii_case(wanted.trim()) {
                return false;
            }
        }

        if let Some(min) = self.min_duration_secs.filter(|m| *m > 0.0) {
            let last = pipeline.head().map_or(0.0, |b| b.duration_seconds);
            if last < min {
                return false;
            }
        }

        match self.quick {
            QuickFilter::All => true,
            QuickFilter::Success => status == PipelineStatus::Success,
            QuickFilter::Failure => status == PipelineStatus::Failure,
        }
    }

    pub fn apply<'a>(&self, pipelines: &'a [Pipeline]) -> Vec<&'a Pipeline> {
        pipelines.iter().filter(|p| self.matches(p)).collect()
    }
}
