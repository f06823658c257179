use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use livelist::{
    DataSource, EmptyState, FetchError, GenerationOutcome, ItemFields, ListItem, LiveList,
    QueryParams, SubscriptionId, ViewConfig,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Row {
    key: String,
    title: String,
}

type Reply = Result<Vec<Row>, FetchError>;

/// One fetch the source is blocked on until the test answers it.
struct Call {
    params: QueryParams,
    reply: oneshot::Sender<Reply>,
}

impl Call {
    fn respond(self, rows: &[(&str, &str)]) {
        let rows = rows
            .iter()
            .map(|(key, title)| Row {
                key: key.to_string(),
                title: title.to_string(),
            })
            .collect();
        let _ = self.reply.send(Ok(rows));
    }

    fn fail(self, err: FetchError) {
        let _ = self.reply.send(Err(err));
    }
}

struct ScriptedSource {
    calls: mpsc::UnboundedSender<Call>,
}

impl DataSource for ScriptedSource {
    type Record = Row;

    async fn fetch(&self, params: &QueryParams, _token: &CancellationToken) -> Reply {
        let (reply, response) = oneshot::channel();
        self.calls
            .send(Call {
                params: params.clone(),
                reply,
            })
            .map_err(|_| FetchError::transient("SCRIPT_CLOSED", "test harness dropped"))?;
        response.await.unwrap_or(Err(FetchError::Cancelled))
    }

    fn to_entity(&self, record: Row) -> Result<Option<ListItem>, FetchError> {
        Ok(Some(ListItem::new(record.key, ItemFields::titled(record.title))))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    list: LiveList<ScriptedSource>,
    calls: mpsc::UnboundedReceiver<Call>,
    commits: mpsc::UnboundedReceiver<usize>,
}

impl Harness {
    fn new(config: ViewConfig) -> Self {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let list = LiveList::new(ScriptedSource { calls: calls_tx }, config)
            .expect("test runs inside a tokio runtime");
        let (commits_tx, commits) = mpsc::unbounded_channel();
        list.subscribe(move |count| {
            let _ = commits_tx.send(count);
        });
        Self {
            list,
            calls,
            commits,
        }
    }

    async fn next_call(&mut self) -> Call {
        timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for a fetch")
            .expect("source dropped")
    }

    async fn next_commit(&mut self) -> usize {
        timeout(WAIT, self.commits.recv())
            .await
            .expect("timed out waiting for a commit")
            .expect("notifier dropped")
    }

    fn no_pending_commit(&mut self) -> bool {
        self.commits.try_recv().is_err()
    }

    /// Runs `text` to completion with `rows` as the answer.
    async fn settle_query(&mut self, text: &str, rows: &[(&str, &str)]) {
        let task = self.list.update_query(text).expect("query should start");
        self.next_call().await.respond(rows);
        assert!(task.outcome().await.is_committed());
        self.next_commit().await;
    }

    fn keys(&self) -> Vec<String> {
        self.list
            .get_items()
            .iter()
            .map(|item| item.key().to_string())
            .collect()
    }
}

/// Answers every fetch with a single row named after the query text.
fn auto_respond(
    mut calls: mpsc::UnboundedReceiver<Call>,
    counter: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(call) = calls.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let text = call.params.text.clone();
            call.respond(&[(text.as_str(), text.as_str())]);
        }
    })
}

#[tokio::test]
async fn rapid_submissions_commit_only_the_last() {
    let mut harness = Harness::new(ViewConfig::default());

    let first = harness.list.update_query("n").expect("first query");
    let second = harness.list.update_query("nf").expect("second query");
    let third = harness.list.update_query("nfl").expect("third query");

    let call = harness.next_call().await;
    assert_eq!(call.params.text, "nfl");
    call.respond(&[("nfl", "NFL")]);

    assert_eq!(first.outcome().await, GenerationOutcome::Canceled);
    assert_eq!(second.outcome().await, GenerationOutcome::Canceled);
    assert_eq!(
        third.outcome().await,
        GenerationOutcome::Committed { count: 1 }
    );
    assert_eq!(harness.next_commit().await, 1);
    assert!(harness.no_pending_commit());
    assert_eq!(harness.keys(), vec!["nfl"]);
}

#[tokio::test]
async fn identical_input_fetches_once() {
    let mut harness = Harness::new(ViewConfig::default());

    let task = harness.list.update_query("mastodon").expect("query should start");
    assert!(harness.list.update_query("mastodon").is_none());

    harness.next_call().await.respond(&[("1", "toot")]);
    assert!(task.outcome().await.is_committed());
    assert!(harness.calls.try_recv().is_err());
}

#[tokio::test]
async fn superseded_fetch_neither_notifies_nor_mutates() {
    let mut harness = Harness::new(ViewConfig::default());
    harness.settle_query("old", &[("a", "A")]).await;
    let before = harness.list.get_items();

    let stale = harness.list.update_query("x").expect("stale query");
    let stale_call = harness.next_call().await;
    let fresh = harness.list.update_query("xy").expect("fresh query");

    stale_call.respond(&[("stale", "Stale")]);
    assert!(!stale.outcome().await.is_committed());
    assert!(harness.no_pending_commit());
    let current = harness.list.get_items();
    assert_eq!(current.len(), 1);
    assert!(Arc::ptr_eq(&current[0], &before[0]));

    harness.next_call().await.respond(&[("fresh", "Fresh")]);
    assert_eq!(
        fresh.outcome().await,
        GenerationOutcome::Committed { count: 1 }
    );
    assert_eq!(harness.keys(), vec!["fresh"]);
}

#[tokio::test]
async fn dispose_during_fetch_silences_notifier() {
    let mut harness = Harness::new(ViewConfig::default());

    let task = harness.list.update_query("tmdb").expect("query should start");
    let call = harness.next_call().await;
    harness.list.dispose();
    call.respond(&[("603", "The Matrix")]);

    assert_eq!(task.outcome().await, GenerationOutcome::Closed);
    assert!(harness.list.is_disposed());
    assert!(harness.list.get_items().is_empty());
    assert!(harness.list.update_query("other").is_none());
    assert!(harness.no_pending_commit());
}

#[tokio::test]
async fn failed_fetch_keeps_previous_list() {
    let mut harness = Harness::new(ViewConfig::default());
    harness.settle_query("rust", &[("a", "A"), ("b", "B")]).await;
    let before = harness.list.get_items();

    let task = harness.list.update_query("rusty").expect("query should start");
    harness
        .next_call()
        .await
        .fail(FetchError::transient("HTTP_STATUS", "503"));

    assert_eq!(
        task.outcome().await,
        GenerationOutcome::Errored {
            code: "HTTP_STATUS"
        }
    );
    let after = harness.list.get_items();
    assert_eq!(after.len(), 2);
    assert!(after.iter().zip(&before).all(|(a, b)| Arc::ptr_eq(a, b)));
    assert!(harness.no_pending_commit());
}

#[tokio::test]
async fn blank_query_clears_without_fetching() {
    let mut harness = Harness::new(ViewConfig::default());
    harness.settle_query("winget", &[("Git.Git", "Git")]).await;

    let task = harness.list.update_query("   ").expect("blank query still submits");
    assert_eq!(task.outcome().await, GenerationOutcome::Cleared);
    assert_eq!(harness.next_commit().await, 0);
    assert!(harness.list.get_items().is_empty());
    assert_eq!(harness.list.empty_state(), Some(EmptyState::AwaitingInput));
    assert!(harness.calls.try_recv().is_err());
}

#[tokio::test]
async fn empty_result_reports_no_results() {
    let mut harness = Harness::new(ViewConfig::default());
    assert_eq!(harness.list.empty_state(), Some(EmptyState::AwaitingInput));

    harness.settle_query("zzz", &[]).await;
    assert_eq!(harness.list.empty_state(), Some(EmptyState::NoResults));
}

#[tokio::test]
async fn refresh_preserves_row_identity() {
    let mut harness = Harness::new(ViewConfig::default());
    harness
        .settle_query("scores", &[("a", "A 0-0"), ("b", "B 0-0")])
        .await;
    let anchored = Arc::clone(&harness.list.get_items()[0]);

    let task = harness.list.refresh().expect("refresh should start");
    let call = harness.next_call().await;
    assert_eq!(call.params.text, "scores");
    call.respond(&[("b", "B 7-0"), ("a", "A 3-0"), ("c", "C 0-0")]);
    assert_eq!(
        task.outcome().await,
        GenerationOutcome::Committed { count: 3 }
    );

    let items = harness.list.get_items();
    assert_eq!(harness.keys(), vec!["b", "a", "c"]);
    assert!(Arc::ptr_eq(&items[1], &anchored));
    assert_eq!(anchored.title(), "A 3-0");
    assert_eq!(anchored.revision(), 1);
}

#[tokio::test]
async fn load_more_appends_next_page() {
    let mut harness = Harness::new(ViewConfig {
        result_limit: 3,
        ..ViewConfig::default()
    });
    harness
        .settle_query("timeline", &[("1", "first"), ("2", "second"), ("3", "third")])
        .await;
    assert!(harness.list.has_more());
    let edited = Arc::clone(&harness.list.get_items()[2]);

    let task = harness.list.load_more().expect("next page should start");
    let call = harness.next_call().await;
    assert_eq!(call.params.text, "timeline");
    assert_eq!(call.params.offset, 3);
    call.respond(&[("3", "third (edited)"), ("4", "fourth")]);
    assert!(task.outcome().await.is_committed());

    assert_eq!(harness.keys(), vec!["1", "2", "3", "4"]);
    assert!(Arc::ptr_eq(&harness.list.get_items()[2], &edited));
    assert_eq!(edited.title(), "third (edited)");
    assert!(!harness.list.has_more());
    assert!(harness.list.load_more().is_none());

    // The page request did not change the remembered input.
    assert!(harness.list.update_query("timeline").is_none());
}

#[tokio::test]
async fn first_read_starts_initial_load() {
    let mut harness = Harness::new(ViewConfig {
        initial_scope: Some("sports".to_string()),
        load_on_first_read: true,
        ..ViewConfig::default()
    });

    assert!(harness.list.get_items().is_empty());
    let call = harness.next_call().await;
    assert_eq!(call.params.scope.as_deref(), Some("sports"));
    assert_eq!(call.params.text, "");
    call.respond(&[("game-1", "KC @ BUF")]);

    assert_eq!(harness.next_commit().await, 1);
    assert_eq!(harness.keys(), vec!["game-1"]);
    assert!(harness.calls.try_recv().is_err());
}

#[tokio::test]
async fn loading_flag_tracks_active_generation() {
    let mut harness = Harness::new(ViewConfig::default());
    assert!(!harness.list.is_loading());

    let task = harness.list.update_query("edge").expect("query should start");
    assert!(harness.list.is_loading());

    harness.next_call().await.respond(&[("fav", "Favorite")]);
    task.outcome().await;
    assert!(!harness.list.is_loading());
}

#[tokio::test(start_paused = true)]
async fn refresh_tick_cancels_unanswered_fetch() {
    let mut harness = Harness::new(ViewConfig {
        refresh_interval: Some(Duration::from_secs(10)),
        ..ViewConfig::default()
    });

    let stale = harness.list.update_query("nfl").expect("query should start");
    let stale_call = harness.next_call().await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    let tick_call = harness.next_call().await;
    assert_eq!(tick_call.params.text, "nfl");
    assert!(harness.calls.try_recv().is_err());

    stale_call.respond(&[("stale", "Stale")]);
    assert_eq!(stale.outcome().await, GenerationOutcome::Canceled);
    assert!(harness.no_pending_commit());
    assert!(harness.list.get_items().is_empty());

    tick_call.respond(&[("fresh", "Fresh")]);
    assert_eq!(harness.next_commit().await, 1);
    assert_eq!(harness.keys(), vec!["fresh"]);
}

#[tokio::test(start_paused = true)]
async fn blank_query_during_fetch_clears_and_drops_stale_rows() {
    let mut harness = Harness::new(ViewConfig::default());

    let stale = harness.list.update_query("x").expect("query should start");
    let stale_call = harness.next_call().await;

    let blank = harness.list.update_query("   ").expect("blank query still submits");
    assert_eq!(blank.outcome().await, GenerationOutcome::Cleared);
    assert_eq!(harness.next_commit().await, 0);

    stale_call.respond(&[("x", "X")]);
    assert_eq!(stale.outcome().await, GenerationOutcome::Canceled);
    assert!(harness.list.get_items().is_empty());
    assert!(harness.no_pending_commit());
    assert!(harness.calls.try_recv().is_err());
}

fn shared_list() -> (Arc<LiveList<ScriptedSource>>, mpsc::UnboundedReceiver<Call>) {
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let list = LiveList::new(ScriptedSource { calls: calls_tx }, ViewConfig::default())
        .expect("test runs inside a tokio runtime");
    (Arc::new(list), calls)
}

#[tokio::test]
async fn subscriber_can_unsubscribe_itself() {
    let (list, mut calls) = shared_list();
    let seen = Arc::new(AtomicUsize::new(0));
    let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

    let weak = Arc::downgrade(&list);
    let counter = Arc::clone(&seen);
    let slot = Arc::clone(&own_id);
    let id = list.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        let id = *slot.lock().expect("id lock");
        if let (Some(list), Some(id)) = (weak.upgrade(), id) {
            list.unsubscribe(id);
        }
    });
    *own_id.lock().expect("id lock") = Some(id);

    for text in ["first", "second"] {
        let task = list.update_query(text).expect("query should start");
        let call = timeout(WAIT, calls.recv())
            .await
            .expect("timed out waiting for a fetch")
            .expect("source dropped");
        call.respond(&[(text, text)]);
        assert!(task.outcome().await.is_committed());
    }

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!list.unsubscribe(id));
}

#[tokio::test]
async fn subscriber_can_dispose_the_list() {
    let (list, mut calls) = shared_list();
    let weak = Arc::downgrade(&list);
    list.subscribe(move |_| {
        if let Some(list) = weak.upgrade() {
            list.dispose();
        }
    });

    let task = list.update_query("once").expect("query should start");
    timeout(WAIT, calls.recv())
        .await
        .expect("timed out waiting for a fetch")
        .expect("source dropped")
        .respond(&[("1", "One")]);

    assert_eq!(task.outcome().await, GenerationOutcome::Committed { count: 1 });
    assert!(list.is_disposed());
    assert!(list.update_query("again").is_none());
}

#[tokio::test(start_paused = true)]
async fn refresh_timer_reissues_query_until_disposed() {
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let fetches = Arc::new(AtomicUsize::new(0));
    let _responder = auto_respond(calls, Arc::clone(&fetches));

    let list = LiveList::new(
        ScriptedSource { calls: calls_tx },
        ViewConfig {
            refresh_interval: Some(Duration::from_secs(10)),
            ..ViewConfig::default()
        },
    )
    .expect("test runs inside a tokio runtime");
    assert!(list.is_refreshing());

    let task = list.update_query("nfl").expect("query should start");
    assert!(task.outcome().await.is_committed());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 4);
    let anchored = Arc::clone(&list.get_items()[0]);

    list.dispose();
    assert!(!list.is_refreshing());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 4);
    assert!(Arc::ptr_eq(&list.get_items()[0], &anchored));
}
