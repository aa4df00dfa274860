use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::RwLock;

use super::normalize::normalize_failed_builds;
use crate::backend::BackendClient;
use crate::snapshot::{AlertBadge, FailedBuildAlert};

pub const DEFAULT_MAX_ACTIVE: usize = 10;

/// Keeps the bounded set of unacknowledged failed builds in step with the
/// backend, which owns acknowledgment state.
///
/// Failures here are operational only: they are logged and leave the active
/// set untouched.
pub struct AlertManager {
    client: Arc<BackendClient>,
    max_active: usize,
    active: RwLock<Vec<FailedBuildAlert>>,
}

/// Newest first, undated alerts last, one entry per `(pipeline, build)` pair,
/// at most `max_active` entries.
pub fn select_active(mut alerts: Vec<FailedBuildAlert>, max_active: usize) -> Vec<FailedBuildAlert> {
    alerts.retain(|alert| !alert.acknowledged);
    // Option orders None first, so descending puts undated alerts last
    alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    // the newest copy of a repeated pair comes first and is the one kept
    let mut seen = HashSet::new();
    alerts.retain(|alert| seen.insert((alert.pipeline_name.clone(), alert.build_number)));
    alerts.truncate(max_active);
    alerts
}

impl AlertManager {
    pub fn new(client: Arc<BackendClient>, max_active: usize) -> Self {
        Self {
            client,
            max_active,
            active: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the active set wholesale with the backend's current list.
    /// Returns false when the fetch failed.
    pub async fn refresh_alerts(&self) -> bool {
        match self.client.fetch_failed_builds().await {
            Ok(raw) => {
                let alerts = select_active(normalize_failed_builds(&raw), self.max_active);
                debug!("Active failed-build alerts: {}", alerts.len());
                *self.active.write().await = alerts;
                true
            }
            Err(e) => {
                warn!("Failed to fetch failed builds: {e}");
                false
            }
        }
    }

    /// Acknowledges one alert on the backend, drops that exact pair locally
    /// and then resynchronizes. Returns false when the backend rejected the
    /// acknowledgment, in which case nothing changed.
    pub async fn acknowledge(&self, pipeline_name: &str, build_number: u64) -> bool {
        if let Err(e) = self
            .client
            .mark_failed_build_viewed(pipeline_name, build_number)
            .await
        {
            warn!("Failed to mark failed build as viewed ({pipeline_name} #{build_number}): {e}");
            return false;
        }

        self.active
            .write()
            .await
            .retain(|alert| !alert.matches(pipeline_name, build_number));

        self.refresh_alerts().await;
        true
    }

    pub async fn active(&self) -> Vec<FailedBuildAlert> {
        self.active.read().await.clone()
    }

    pub async fn badge(&self) -> AlertBadge {
        AlertBadge::for_count(self.active.read().await.len())
    }
}
