use indexmap::IndexMap;
use log::{debug, info};

use crate::snapshot::{Build, Pipeline};

/// A pipeline from the fresh list together with its build fetch result.
///
/// `builds` is `None` when fetching that pipeline's builds failed.
#[derive(Debug)]
pub struct FetchedPipeline {
    pub pipeline: Pipeline,
    pub builds: Option<Vec<Build>>,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Replacement for the held pipelines, in upstream order
    pub pipelines: IndexMap<String, Pipeline>,
    /// Names of pipelines whose head build changed
    pub active: Vec<String>,
}

impl ReconcileOutcome {
    pub fn new_activity(&self) -> bool {
        !self.active.is_empty()
    }
}

/// True iff `current` has builds and its head differs from the previous head
/// (or there was no previous head).
pub fn detect_new_activity(previous: Option<&Pipeline>, current: &Pipeline) -> bool {
    let Some(head) = current.head() else {
        return false;
    };

    match previous.and_then(Pipeline::head) {
        Some(previous_head) => previous_head.build_number != head.build_number,
        None => true,
    }
}

/// Builds the next held pipeline set from a fresh fetch.
///
/// Replacement is unconditional; detected activity is only reported. A
/// pipeline whose build fetch failed keeps its previously held builds for
/// this cycle.
pub fn reconcile(
    previous: &IndexMap<String, Pipeline>,
    fetched: Vec<FetchedPipeline>,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    for FetchedPipeline { mut pipeline, builds } in fetched {
        let held = previous.get(&pipeline.name);

        match builds {
            Some(builds) => {
                pipeline.builds = builds;
                if detect_new_activity(held, &pipeline) {
                    if let Some(head) = pipeline.head() {
                        info!(
                            "New build detected for pipeline: {}, build number: {}",
                            pipeline.name, head.build_number
                        );
                    }
                    outcome.active.push(pipeline.name.clone());
                }
            }
            None => {
                debug!(
                    "Keeping previously held builds for pipeline: {}",
                    pipeline.name
                );
                pipeline.builds = held.map(|p| p.builds.clone()).unwrap_or_default();
            }
        }

        outcome.pipelines.insert(pipeline.name.clone(), pipeline);
    }

    outcome
}
