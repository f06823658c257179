//! A live, query-driven list view.
//!
//! Every input event, refresh tick and page request goes through the same
//! path: the sequencer opens a generation (cancelling the previous one), the
//! fetch runs under that generation's token, and the result is committed only
//! if the generation is still current when it lands.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::fetch::{DataSource, FetchOperation, FetchRequest};
use crate::generation::{QueryGeneration, QuerySequencer, Submission};
use crate::notifier::{Notifier, SubscriptionId};
use crate::refresh::{RefreshScheduler, TickControl};
use crate::store::{CommitMode, ResultStore};
use crate::types::{EmptyState, ListItem, QueryParams};

pub const DEFAULT_RESULT_LIMIT: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    /// Re-issue the current query on this period when set.
    pub refresh_interval: Option<Duration>,
    /// Page size; `0` means unlimited.
    pub result_limit: usize,
    /// Delay before a fetch starts, cancelled by the next keystroke.
    pub debounce: Duration,
    pub initial_scope: Option<String>,
    /// Start a query with the initial parameters on the first `get_items`.
    pub load_on_first_read: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            refresh_interval: None,
            result_limit: DEFAULT_RESULT_LIMIT,
            debounce: Duration::ZERO,
            initial_scope: None,
            load_on_first_read: false,
        }
    }
}

impl ViewConfig {
    pub fn initial_params(&self) -> QueryParams {
        let params = QueryParams::new("", self.result_limit);
        match self.initial_scope.as_deref() {
            Some(scope) => params.with_scope(scope),
            None => params,
        }
    }
}

/// Terminal state of one generation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GenerationOutcome {
    Committed { count: usize },
    /// Blank input emptied the list.
    Cleared,
    /// The fetch observed its token.
    Canceled,
    /// The fetch finished but a newer generation had taken over.
    Superseded,
    /// The fetch failed; the previous list stays visible.
    Errored { code: &'static str },
    /// The view was disposed before the result could land.
    Closed,
}

impl GenerationOutcome {
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            GenerationOutcome::Committed { .. } | GenerationOutcome::Cleared
        )
    }
}

#[derive(Debug)]
enum TaskState {
    Ready(GenerationOutcome),
    Running(JoinHandle<GenerationOutcome>),
}

/// Handle to a submitted generation. Dropping it does not cancel anything.
#[derive(Debug)]
pub struct QueryTask {
    generation: u64,
    state: TaskState,
}

impl QueryTask {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn outcome(self) -> GenerationOutcome {
        match self.state {
            TaskState::Ready(outcome) => outcome,
            TaskState::Running(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_cancelled() => GenerationOutcome::Canceled,
                Err(err) => {
                    warn!(generation = self.generation, error = %err, "query task panicked");
                    GenerationOutcome::Errored {
                        code: "TASK_PANICKED",
                    }
                }
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PageMode {
    Replace,
    Append,
}

struct Pipeline<S: DataSource> {
    source: Arc<S>,
    sequencer: QuerySequencer,
    store: ResultStore,
    notifier: Notifier,
    fetch: FetchOperation,
    config: ViewConfig,
    runtime: Handle,
    settled: AtomicU64,
}

impl<S: DataSource> Pipeline<S> {
    fn base_params(&self) -> QueryParams {
        self.sequencer
            .last_params()
            .unwrap_or_else(|| self.config.initial_params())
    }

    fn submit(self: &Arc<Self>, params: QueryParams) -> Option<QueryTask> {
        let blank = self.source.is_blank(&params);
        let submission = self.sequencer.submit(params, blank);
        self.dispatch(submission, PageMode::Replace)
    }

    fn refresh(self: &Arc<Self>) -> Option<QueryTask> {
        let source = Arc::clone(&self.source);
        let submission = self.sequencer.resubmit(|params| source.is_blank(params));
        self.dispatch(submission, PageMode::Replace)
    }

    fn load_more(self: &Arc<Self>) -> Option<QueryTask> {
        if !self.store.has_more() || self.is_loading() {
            return None;
        }
        let submission = self.sequencer.submit_page(self.store.len());
        self.dispatch(submission, PageMode::Append)
    }

    fn dispatch(self: &Arc<Self>, submission: Submission, mode: PageMode) -> Option<QueryTask> {
        match submission {
            Submission::Unchanged => None,
            Submission::Closed => {
                debug!("submission ignored; view disposed");
                None
            }
            Submission::Clear(generation) => {
                let outcome = self.commit_clear(&generation);
                Some(QueryTask {
                    generation: generation.id(),
                    state: TaskState::Ready(outcome),
                })
            }
            Submission::Fetch { generation, params } => {
                debug!(
                    generation = generation.id(),
                    query = %params.describe(),
                    offset = params.offset,
                    "generation started"
                );
                let id = generation.id();
                let pipeline = Arc::clone(self);
                let request = FetchRequest { params, generation };
                let handle = self
                    .runtime
                    .spawn(async move { pipeline.run_generation(request, mode).await });
                Some(QueryTask {
                    generation: id,
                    state: TaskState::Running(handle),
                })
            }
        }
    }

    fn commit_clear(&self, generation: &QueryGeneration) -> GenerationOutcome {
        let id = generation.id();
        let committed = self.store.commit_generation(
            id,
            |id| self.sequencer.is_current(id),
            CommitMode::Clear,
            false,
        );
        self.settle(id);
        match committed {
            Some(count) => {
                debug!(generation = id, "list cleared for blank input");
                self.notifier.notify(count);
                GenerationOutcome::Cleared
            }
            None => self.discarded(),
        }
    }

    async fn run_generation(
        self: Arc<Self>,
        request: FetchRequest,
        mode: PageMode,
    ) -> GenerationOutcome {
        let id = request.generation.id();
        let result = self.fetch.run(self.source.as_ref(), &request).await;

        let outcome = match result {
            Ok(rows) => {
                let limit = request.params.limit;
                let has_more = limit > 0 && rows.len() >= limit;
                let commit = match mode {
                    PageMode::Replace => CommitMode::Replace(rows),
                    PageMode::Append => CommitMode::Append(rows),
                };
                match self.store.commit_generation(
                    id,
                    |id| self.sequencer.is_current(id),
                    commit,
                    has_more,
                ) {
                    Some(count) => {
                        debug!(generation = id, count, "generation committed");
                        self.notifier.notify(count);
                        GenerationOutcome::Committed { count }
                    }
                    None => self.discarded(),
                }
            }
            Err(FetchError::Cancelled) => {
                debug!(generation = id, query = %request.params.describe(), "generation cancelled");
                if self.sequencer.is_closed() {
                    GenerationOutcome::Closed
                } else {
                    GenerationOutcome::Canceled
                }
            }
            Err(err) => {
                warn!(
                    source = self.source.name(),
                    generation = id,
                    code = err.code(),
                    query = %request.params.describe(),
                    error = %err,
                    "fetch failed; keeping previous results"
                );
                GenerationOutcome::Errored { code: err.code() }
            }
        };

        self.settle(id);
        outcome
    }

    fn discarded(&self) -> GenerationOutcome {
        if self.sequencer.is_closed() {
            GenerationOutcome::Closed
        } else {
            GenerationOutcome::Superseded
        }
    }

    fn settle(&self, id: u64) {
        self.settled.fetch_max(id, Ordering::AcqRel);
    }

    fn is_loading(&self) -> bool {
        self.sequencer
            .active_id()
            .is_some_and(|active| active > self.settled.load(Ordering::Acquire))
    }
}

/// A list view whose rows come from `S` and stay live across queries.
///
/// All methods are callable from any thread; none of them block on I/O.
pub struct LiveList<S: DataSource> {
    pipeline: Arc<Pipeline<S>>,
    refresh: Mutex<Option<RefreshScheduler>>,
}

impl<S: DataSource> std::fmt::Debug for LiveList<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveList")
            .field("source", &self.pipeline.source.name())
            .field("items", &self.pipeline.store.len())
            .field("active_generation", &self.pipeline.sequencer.active_id())
            .finish()
    }
}

impl<S: DataSource> LiveList<S> {
    /// Builds a view bound to the current tokio runtime.
    pub fn new(source: S, config: ViewConfig) -> anyhow::Result<Self> {
        let runtime = Handle::try_current().context("live list requires a tokio runtime")?;
        Ok(Self::with_runtime(source, config, runtime))
    }

    pub fn with_runtime(source: S, config: ViewConfig, runtime: Handle) -> Self {
        let refresh_interval = config.refresh_interval;
        let list = Self {
            pipeline: Arc::new(Pipeline {
                source: Arc::new(source),
                sequencer: QuerySequencer::new(),
                store: ResultStore::new(),
                notifier: Notifier::new(),
                fetch: FetchOperation::new(config.debounce),
                config,
                runtime,
                settled: AtomicU64::new(0),
            }),
            refresh: Mutex::new(None),
        };
        if let Some(period) = refresh_interval {
            list.start_refresh(period);
        }
        list
    }

    pub fn source(&self) -> &S {
        &self.pipeline.source
    }

    pub fn config(&self) -> &ViewConfig {
        &self.pipeline.config
    }

    /// Snapshot of the committed rows.
    pub fn get_items(&self) -> Vec<Arc<ListItem>> {
        let pipeline = &self.pipeline;
        if pipeline.config.load_on_first_read
            && !pipeline.store.has_committed()
            && pipeline.sequencer.last_params().is_none()
        {
            debug!(source = pipeline.source.name(), "first read; starting initial load");
            pipeline.submit(pipeline.config.initial_params());
        }
        pipeline.store.read()
    }

    pub fn len(&self) -> usize {
        self.pipeline.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipeline.store.is_empty()
    }

    /// Replaces the query text, keeping scope and page size.
    pub fn update_query(&self, text: &str) -> Option<QueryTask> {
        let params = self.pipeline.base_params().with_text(text);
        self.pipeline.submit(params)
    }

    /// Submits fully specified parameters.
    pub fn submit(&self, params: QueryParams) -> Option<QueryTask> {
        self.pipeline.submit(params)
    }

    /// Re-runs the last query even though its input has not changed.
    pub fn refresh(&self) -> Option<QueryTask> {
        self.pipeline.refresh()
    }

    /// Fetches the next page and appends it.
    ///
    /// `None` when the last page was short or a query is still loading.
    pub fn load_more(&self) -> Option<QueryTask> {
        self.pipeline.load_more()
    }

    pub fn query(&self) -> Option<QueryParams> {
        self.pipeline.sequencer.last_params()
    }

    pub fn is_loading(&self) -> bool {
        self.pipeline.is_loading()
    }

    pub fn has_more(&self) -> bool {
        self.pipeline.store.has_more()
    }

    pub fn empty_state(&self) -> Option<EmptyState> {
        self.pipeline.store.empty_state()
    }

    /// Registers `callback` for the item count of every commit.
    ///
    /// The callback runs on the task that committed. It may read the list,
    /// unsubscribe itself, submit a new query or dispose the view.
    pub fn subscribe(&self, callback: impl Fn(usize) + Send + Sync + 'static) -> SubscriptionId {
        self.pipeline.notifier.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.pipeline.notifier.unsubscribe(id)
    }

    /// Starts (or restarts) periodic refreshes of the current query.
    pub fn start_refresh(&self, period: Duration) {
        if self.is_disposed() {
            return;
        }

        let weak: Weak<Pipeline<S>> = Arc::downgrade(&self.pipeline);
        let scheduler = RefreshScheduler::spawn(&self.pipeline.runtime, period, move || {
            let Some(pipeline) = weak.upgrade() else {
                return TickControl::Stop;
            };
            if pipeline.sequencer.is_closed() {
                return TickControl::Stop;
            }
            pipeline.refresh();
            TickControl::Continue
        });

        let previous = lock_refresh(&self.refresh).replace(scheduler);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn stop_refresh(&self) {
        if let Some(scheduler) = lock_refresh(&self.refresh).take() {
            scheduler.stop();
        }
    }

    pub fn is_refreshing(&self) -> bool {
        lock_refresh(&self.refresh)
            .as_ref()
            .is_some_and(RefreshScheduler::is_running)
    }

    /// Stops refreshes, cancels the in-flight generation and silences the
    /// notifier. Results that land afterwards are discarded.
    pub fn dispose(&self) {
        self.stop_refresh();
        self.pipeline.sequencer.close();
        self.pipeline.notifier.close();
        debug!(source = self.pipeline.source.name(), "live list disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.pipeline.sequencer.is_closed()
    }
}

impl<S: DataSource> Drop for LiveList<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn lock_refresh(
    refresh: &Mutex<Option<RefreshScheduler>>,
) -> std::sync::MutexGuard<'_, Option<RefreshScheduler>> {
    match refresh.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
