//! The committed, UI-visible list and the lock that guards it.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::reconcile;
use crate::types::{EmptyState, ListItem};

/// How a generation's rows are folded into the committed list.
#[derive(Debug)]
pub enum CommitMode {
    /// Reconcile against the current list, following the order of `rows`.
    Replace(Vec<Arc<ListItem>>),
    /// Append a follow-up page.
    Append(Vec<Arc<ListItem>>),
    /// Blank input: empty the list.
    Clear,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
enum ListPhase {
    #[default]
    Untouched,
    Cleared,
    Populated,
}

#[derive(Debug, Default)]
struct StoreState {
    items: Vec<Arc<ListItem>>,
    committed_generation: u64,
    phase: ListPhase,
    has_more: bool,
}

/// Holder of the last committed list.
///
/// Its lock is independent of the sequencer's: committing never waits on a
/// submission and a submission never waits on a commit.
#[derive(Debug, Default)]
pub struct ResultStore {
    state: Mutex<StoreState>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the committed list; never blocks on I/O.
    pub fn read(&self) -> Vec<Arc<ListItem>> {
        self.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    pub fn has_committed(&self) -> bool {
        self.lock().phase != ListPhase::Untouched
    }

    pub fn empty_state(&self) -> Option<EmptyState> {
        let state = self.lock();
        if !state.items.is_empty() {
            return None;
        }
        match state.phase {
            ListPhase::Untouched | ListPhase::Cleared => Some(EmptyState::AwaitingInput),
            ListPhase::Populated => Some(EmptyState::NoResults),
        }
    }

    /// Unconditionally reconciles `list` into the store.
    pub fn commit(&self, list: Vec<Arc<ListItem>>) -> usize {
        let mut state = self.lock();
        apply(&mut state, CommitMode::Replace(list), false)
    }

    /// Commits on behalf of `generation` if `is_current` still holds.
    ///
    /// The currency check runs inside this store's critical section, so no
    /// other commit can slip between the check and the write. A generation
    /// older than the last committed one is always refused.
    pub fn commit_generation(
        &self,
        generation: u64,
        is_current: impl FnOnce(u64) -> bool,
        mode: CommitMode,
        has_more: bool,
    ) -> Option<usize> {
        let mut state = self.lock();
        if generation < state.committed_generation || !is_current(generation) {
            debug!(
                generation,
                committed = state.committed_generation,
                "discarding result of superseded generation"
            );
            return None;
        }

        state.committed_generation = generation;
        Some(apply(&mut state, mode, has_more))
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn apply(state: &mut StoreState, mode: CommitMode, has_more: bool) -> usize {
    let (items, phase) = match mode {
        CommitMode::Replace(rows) => (reconcile::merge(&state.items, rows), ListPhase::Populated),
        CommitMode::Append(rows) => (reconcile::append(&state.items, rows), ListPhase::Populated),
        CommitMode::Clear => (Vec::new(), ListPhase::Cleared),
    };
    state.items = items;
    state.phase = phase;
    state.has_more = has_more;
    state.items.len()
}
