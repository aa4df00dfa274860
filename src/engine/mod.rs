//! The synchronization engine.
//!
//! One [`Engine`] owns the held dashboard state. Every trigger source (the
//! interval ticker, the push channel, the CLI) goes through it, cycles run
//! one at a time, and renderers observe immutable snapshots through a watch
//! channel.

pub mod alerts;
pub mod connection;
pub mod metrics;
pub mod normalize;
pub mod reconcile;
pub mod scheduler;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};

use self::alerts::{AlertManager, DEFAULT_MAX_ACTIVE};
use self::normalize::{normalize_builds, normalize_metrics, normalize_node_health, normalize_pipelines};
use self::reconcile::{reconcile, FetchedPipeline};
use self::scheduler::{Trigger, TriggerQueue};
use crate::backend::BackendClient;
use crate::error::Result;
use crate::snapshot::{ConnectionState, DashboardSnapshot, ErrorBanner, Pipeline};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Builds fetched per pipeline each cycle
    pub build_limit: usize,
    pub banner_ttl: Duration,
    pub max_active_alerts: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            build_limit: 50,
            banner_ttl: Duration::from_secs(5),
            max_active_alerts: DEFAULT_MAX_ACTIVE,
        }
    }
}

pub struct Engine {
    client: Arc<BackendClient>,
    alerts: AlertManager,
    triggers: TriggerQueue,
    state: watch::Sender<Arc<DashboardSnapshot>>,
    /// Held for the whole of a cycle so cycles never interleave
    cycle_lock: Mutex<()>,
    banner_seq: AtomicU64,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(client: Arc<BackendClient>, settings: EngineSettings) -> Self {
        let (state, _) = watch::channel(Arc::new(DashboardSnapshot::default()));
        Self {
            alerts: AlertManager::new(Arc::clone(&client), settings.max_active_alerts),
            client,
            triggers: TriggerQueue::default(),
            state,
            cycle_lock: Mutex::new(()),
            banner_seq: AtomicU64::new(0),
            settings,
        }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub fn triggers(&self) -> &TriggerQueue {
        &self.triggers
    }

    /// Receives a new snapshot after every successful step.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardSnapshot>> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        Arc::clone(&self.state.borrow())
    }

    /// Queues a refresh for the cycle worker. Returns true if it coalesced
    /// with a trigger that was already pending.
    pub fn request_refresh(&self, trigger: Trigger) -> bool {
        self.triggers.push(trigger)
    }

    pub fn set_connection(&self, connection: ConnectionState) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.connection == connection {
                return false;
            }
            Arc::make_mut(snapshot).connection = connection;
            true
        });
    }

    fn publish(&self, update: impl FnOnce(&mut DashboardSnapshot)) {
        self.state.send_modify(|snapshot| update(Arc::make_mut(snapshot)));
    }

    /// Runs one full refresh cycle, waiting for any cycle already in flight.
    ///
    /// A failed primary fetch leaves held state untouched, raises an error
    /// banner and returns the error.
    pub async fn refresh(self: &Arc<Self>, trigger: Trigger) -> Result<()> {
        let _cycle = self.cycle_lock.lock().await;
        let manual = trigger.is_manual();

        if manual {
            self.publish(|snapshot| snapshot.refreshing = true);
        }

        let result = self.run_cycle(manual).await;

        match &result {
            Ok(active) => info!(
                "Refresh cycle complete ({trigger:?}): {} pipelines, new activity: {}",
                self.snapshot().pipelines.len(),
                !active.is_empty()
            ),
            Err(e) => {
                error!("Refresh cycle failed ({trigger:?}): {e}");
                self.raise_banner(format!("Failed to refresh dashboard: {e}"));
            }
        }

        if manual {
            self.publish(|snapshot| snapshot.refreshing = false);
        }

        result.map(|_| ())
    }

    /// Returns the names of pipelines with new head builds.
    async fn run_cycle(&self, manual: bool) -> Result<Vec<String>> {
        self.sync_alerts().await;

        if let Err(e) = self.client.trigger_collection(manual).await {
            warn!("Backend did not accept collection trigger: {e}");
        }

        let (raw_pipelines, raw_metrics) = tokio::try_join!(
            self.client.fetch_pipelines(),
            self.client.fetch_overall_metrics()
        )?;
        let fresh = normalize_pipelines(&raw_pipelines);
        let upstream = normalize_metrics(&raw_metrics);
        debug!("Fetched {} pipelines", fresh.len());

        let fetched = join_all(fresh.into_iter().map(|pipeline| self.fetch_pipeline_builds(pipeline))).await;

        let held: IndexMap<String, Pipeline> = self
            .snapshot()
            .pipelines
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        let outcome = reconcile(&held, fetched);

        let pipelines: Vec<Pipeline> = outcome.pipelines.into_values().collect();
        let derived = metrics::compute(&pipelines, Some(&upstream));

        self.publish(|snapshot| {
            snapshot.pipelines = pipelines;
            snapshot.metrics = derived;
            snapshot.cycle += 1;
            snapshot.refreshed_at = Some(Utc::now());
        });

        Ok(outcome.active)
    }

    async fn fetch_pipeline_builds(&self, pipeline: Pipeline) -> FetchedPipeline {
        let builds = match self
            .client
            .fetch_builds(&pipeline.name, self.settings.build_limit)
            .await
        {
            Ok(raw) => Some(normalize_builds(&raw)),
            Err(e) => {
                warn!("Failed to fetch builds for pipeline {}: {e}", pipeline.name);
                None
            }
        };

        FetchedPipeline { pipeline, builds }
    }

    async fn sync_alerts(&self) {
        if self.alerts.refresh_alerts().await {
            self.publish_alerts().await;
        }
    }

    async fn publish_alerts(&self) {
        let alerts = self.alerts.active().await;
        let badge = self.alerts.badge().await;
        self.publish(|snapshot| {
            snapshot.alerts = alerts;
            snapshot.alert_badge = badge;
        });
    }

    /// Acknowledges a failed-build alert. A rejected acknowledgment is only
    /// logged; the alert simply stays in the active set.
    pub async fn acknowledge_alert(&self, pipeline_name: &str, build_number: u64) -> bool {
        let acknowledged = self.alerts.acknowledge(pipeline_name, build_number).await;
        if acknowledged {
            self.publish_alerts().await;
        }
        acknowledged
    }

    /// Refreshes only the alert set, outside a full cycle.
    pub async fn refresh_alerts(&self) -> bool {
        let refreshed = self.alerts.refresh_alerts().await;
        if refreshed {
            self.publish_alerts().await;
        }
        refreshed
    }

    /// Fetches upstream connectivity. Failures are logged and the previous
    /// node health stays in place.
    pub async fn refresh_node_health(&self) -> bool {
        match self.client.fetch_node_health().await {
            Ok(raw) => {
                let health = normalize_node_health(&raw);
                debug!(
                    "Node health: {:?}, {} jobs",
                    health.connection_status, health.job_count
                );
                self.publish(|snapshot| snapshot.node_health = Some(health));
                true
            }
            Err(e) => {
                warn!("Failed to fetch node health: {e}");
                false
            }
        }
    }

    /// Shows a user-visible error that clears itself after the banner TTL,
    /// unless a newer banner replaced it first.
    pub fn raise_banner(self: &Arc<Self>, message: String) {
        let id = self.banner_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.publish(|snapshot| {
            snapshot.banner = Some(ErrorBanner {
                id,
                message,
                raised_at: Utc::now(),
            });
        });

        let engine = Arc::clone(self);
        let ttl = self.settings.banner_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            engine.dismiss_banner(id);
        });
    }

    /// Clears the banner if it is still the one identified by `id`.
    pub fn dismiss_banner(&self, id: u64) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.banner.as_ref().map(|b| b.id) != Some(id) {
                return false;
            }
            Arc::make_mut(snapshot).banner = None;
            true
        });
    }
}
