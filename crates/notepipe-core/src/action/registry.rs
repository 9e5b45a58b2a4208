//! Named-action lookup used to assemble `PipelineExecutor`s from config.
//!
//! Grounded on the teacher's habit of keying pluggable behavior by a
//! plain string (`Settings::broker_url`'s `None`/`Some` convention, and
//! the `ExecutionStrategy` `clap::ValueEnum`): queue-to-action-chain
//! wiring in `notepipe-pipelines` looks actions up by name rather than
//! hardcoding `Arc<dyn Action>` construction at every call site.

use std::collections::HashMap;
use std::sync::Arc;

use super::Action;

pub type ActionId = String;
pub type ActionFactory = Arc<dyn Fn() -> Arc<dyn Action> + Send + Sync>;

/// Maps an action name to a constructor. Queues reference actions by name
/// in configuration; `build_chain` resolves the names into instances.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    factories: HashMap<ActionId, ActionFactory>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<ActionId>, factory: ActionFactory) {
        self.factories.insert(id.into(), factory);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Action>> {
        self.factories.get(id).map(|factory| factory())
    }

    /// Resolves a named chain, failing fast on the first unknown name so
    /// misconfiguration surfaces at worker startup instead of mid-run.
    pub fn build_chain(&self, ids: &[impl AsRef<str>]) -> Result<Vec<Arc<dyn Action>>, String> {
        ids.iter()
            .map(|id| {
                self.get(id.as_ref())
                    .ok_or_else(|| format!("unknown action '{}'", id.as_ref()))
            })
            .collect()
    }
}
