//! Derivation of the work each stage still has to do.

use std::sync::Arc;

use crate::core::{PipelineState, StageName};
use crate::store::StateStore;

/// Computes eligible items per stage from the current ledger.
///
/// An item is eligible for a stage when it is completed in every
/// prerequisite stage and not completed in the stage itself. Failed entries
/// count as not completed on both sides. Queries never mutate the store.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<StateStore>,
}

impl QueryEngine {
    /// Creates a query engine over a store.
    #[must_use]
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Items the stage still has to process, ordered by item id.
    ///
    /// The source stage `get_call_ids` never has derived work.
    #[must_use]
    pub fn items_for(&self, stage: StageName) -> Vec<String> {
        self.store.read(|state| pending_items(state, stage))
    }

    /// Filters `candidates` down to the ones not yet completed in `stage`,
    /// keeping their order.
    #[must_use]
    pub fn pending_among<I, S>(&self, stage: StageName, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.store.read(|state| {
            let ledger = state.ledger(stage);
            candidates
                .into_iter()
                .map(Into::into)
                .filter(|id| !ledger.is_completed(id))
                .collect()
        })
    }
}

/// Items eligible for `stage` in a state snapshot, ordered by item id.
#[must_use]
pub fn pending_items(state: &PipelineState, stage: StageName) -> Vec<String> {
    let prerequisites = stage.prerequisites();
    let Some((driving, rest)) = prerequisites.split_first() else {
        return Vec::new();
    };

    let own = state.ledger(stage);
    let others: Vec<_> = rest.iter().map(|s| state.ledger(*s)).collect();

    state
        .ledger(*driving)
        .completed_ids()
        .filter(|id| others.iter().all(|ledger| ledger.is_completed(id)))
        .filter(|id| !own.is_completed(id))
        .map(str::to_string)
        .collect()
}
