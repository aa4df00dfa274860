use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};

use super::Engine;

/// Why a refresh cycle was requested.
///
/// Variants are ordered by precedence: when triggers coalesce, the pending
/// slot keeps the strongest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trigger {
    Scheduled = 1,
    Push = 2,
    Manual = 3,
}

impl Trigger {
    pub fn is_manual(self) -> bool {
        self == Trigger::Manual
    }

    fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Trigger::Scheduled),
            2 => Some(Trigger::Push),
            3 => Some(Trigger::Manual),
            _ => None,
        }
    }
}

/// Single-slot queue of pending refresh requests.
///
/// Any number of triggers arriving while a cycle runs collapse into exactly
/// one follow-up cycle.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    pending: AtomicU8,
    notify: Notify,
}

impl TriggerQueue {
    /// Queues a trigger. Returns true if it was merged into one already pending.
    pub fn push(&self, trigger: Trigger) -> bool {
        let previous = self.pending.fetch_max(trigger as u8, Ordering::AcqRel);
        self.notify.notify_one();
        previous != 0
    }

    pub fn take(&self) -> Option<Trigger> {
        Trigger::from_rank(self.pending.swap(0, Ordering::AcqRel))
    }

    /// Waits for the next pending trigger and clears the slot.
    pub async fn next(&self) -> Trigger {
        loop {
            if let Some(trigger) = self.take() {
                return trigger;
            }
            self.notify.notified().await;
        }
    }
}

/// Drives refresh cycles on a fixed interval and keeps node health current.
pub struct Scheduler {
    interval: Duration,
    node_health_interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration, node_health_interval: Duration) -> Self {
        Self {
            interval,
            node_health_interval,
        }
    }

    /// Runs until `shutdown` resolves. The first tick fires immediately, so
    /// the dashboard loads without waiting a full interval.
    pub async fn run<F>(&self, engine: Arc<Engine>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduler started: refresh every {}s, node health every {}s",
            self.interval.as_secs(),
            self.node_health_interval.as_secs()
        );

        let worker = tokio::spawn(cycle_worker(Arc::clone(&engine)));
        let node_health = tokio::spawn(node_health_loop(
            Arc::clone(&engine),
            self.node_health_interval,
        ));

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if engine.request_refresh(Trigger::Scheduled) {
                        debug!("Scheduled refresh coalesced into pending cycle");
                    }
                }
            }
        }

        worker.abort();
        node_health.abort();
        info!("Scheduler stopped");
    }
}

/// Executes queued triggers one cycle at a time.
async fn cycle_worker(engine: Arc<Engine>) {
    loop {
        let trigger = engine.triggers().next().await;
        // failures are already logged and surfaced as a banner
        let _ = engine.refresh(trigger).await;
    }
}

async fn node_health_loop(engine: Arc<Engine>, period: Duration) {
    // job build counts come from held pipelines, so wait for the first cycle
    let mut updates = engine.subscribe();
    if updates.wait_for(|snapshot| snapshot.cycle > 0).await.is_err() {
        return;
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        engine.refresh_node_health().await;
    }
}
