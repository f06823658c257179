//! Query generations and the sequencer that supersedes them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::QueryParams;

/// Generation id that is never handed out; marks "no active generation".
const NO_GENERATION: u64 = 0;

/// One query attempt: a monotonic id plus the token that cancels it.
#[derive(Debug, Clone)]
pub struct QueryGeneration {
    id: u64,
    cancel: CancellationToken,
}

impl QueryGeneration {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// What a submission resolved to.
#[derive(Debug)]
pub enum Submission {
    /// Same input as last time; nothing started.
    Unchanged,
    /// The sequencer was closed by `dispose`.
    Closed,
    /// Blank input; the caller commits an empty list under this generation.
    Clear(QueryGeneration),
    /// A fetch must run for `params` under `generation`.
    Fetch {
        generation: QueryGeneration,
        params: QueryParams,
    },
}

#[derive(Debug, Default)]
struct SequencerState {
    next_id: u64,
    last_params: Option<QueryParams>,
    active: Option<QueryGeneration>,
    closed: bool,
}

/// Issues generations and cancels the previous one on every submission.
///
/// `state` is the sequencer's own lock; it only ever guards bookkeeping and is
/// never held while a token is cancelled or while awaiting.
#[derive(Debug, Default)]
pub struct QuerySequencer {
    state: Mutex<SequencerState>,
    current: AtomicU64,
}

impl QuerySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a generation for `params` unless they equal the last submission.
    pub fn submit(&self, params: QueryParams, blank: bool) -> Submission {
        self.advance(params, blank, true)
    }

    /// Re-issues the last submitted parameters as a fresh generation.
    pub fn resubmit(&self, blank_rule: impl FnOnce(&QueryParams) -> bool) -> Submission {
        let Some(params) = self.last_params() else {
            return Submission::Unchanged;
        };
        let blank = blank_rule(&params);
        self.advance(params, blank, false)
    }

    /// Starts a generation for a follow-up page of the last submission.
    ///
    /// The stored input is left untouched so a later identical `submit` is
    /// still recognised as unchanged.
    pub fn submit_page(&self, offset: usize) -> Submission {
        let (previous, generation, params) = {
            let mut state = lock_state(&self.state);
            if state.closed {
                return Submission::Closed;
            }
            let Some(base) = state.last_params.clone() else {
                return Submission::Unchanged;
            };
            let generation = self.install(&mut state);
            (state.active.replace(generation.clone()), generation, base.page_at(offset))
        };

        Self::retire(previous, generation.id());
        Submission::Fetch { generation, params }
    }

    fn advance(&self, params: QueryParams, blank: bool, dedupe: bool) -> Submission {
        let (previous, generation) = {
            let mut state = lock_state(&self.state);
            if state.closed {
                return Submission::Closed;
            }
            if dedupe && state.last_params.as_ref() == Some(&params) {
                return Submission::Unchanged;
            }
            state.last_params = Some(params.clone());
            let generation = self.install(&mut state);
            (state.active.replace(generation.clone()), generation)
        };

        Self::retire(previous, generation.id());

        if blank {
            Submission::Clear(generation)
        } else {
            Submission::Fetch { generation, params }
        }
    }

    fn install(&self, state: &mut SequencerState) -> QueryGeneration {
        state.next_id = state.next_id.wrapping_add(1).max(1);
        let generation = QueryGeneration::new(state.next_id);
        self.current.store(generation.id(), Ordering::Release);
        generation
    }

    // Runs after the sequencer lock is released.
    fn retire(previous: Option<QueryGeneration>, successor: u64) {
        if let Some(previous) = previous {
            debug!(
                generation = previous.id(),
                successor, "superseding in-flight generation"
            );
            previous.cancel();
        }
    }

    /// True while `id` is the active generation of an open sequencer.
    pub fn is_current(&self, id: u64) -> bool {
        id != NO_GENERATION && self.current.load(Ordering::Acquire) == id
    }

    pub fn active_id(&self) -> Option<u64> {
        match self.current.load(Ordering::Acquire) {
            NO_GENERATION => None,
            id => Some(id),
        }
    }

    pub fn last_params(&self) -> Option<QueryParams> {
        lock_state(&self.state).last_params.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock_state(&self.state).closed
    }

    /// Cancels the active generation and refuses all further submissions.
    pub fn close(&self) {
        let previous = {
            let mut state = lock_state(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            self.current.store(NO_GENERATION, Ordering::Release);
            state.active.take()
        };

        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

fn lock_state(state: &Mutex<SequencerState>) -> std::sync::MutexGuard<'_, SequencerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
