//! Managed consumer of a database's change feed.
//!
//! A [`ChangeConsumer`] owns at most one open feed at a time. `start` opens
//! the feed and spawns a pull loop that hands every change to the
//! subscribers in server order; `stop` cuts the connection without waiting
//! for the loop. Restarting resumes after the last change that was handed
//! out.
//!
//! ```text
//! Init ──start──▶ Running ──stop / end of feed / error──▶ Stopped
//!                    ▲                                       │
//!                    └────────────────start──────────────────┘
//! ```

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::changes::listener::{ChangeListener, FnListener, SubscriptionId, Subscribers};
use crate::changes::reader::ChangeStream;
use crate::changes::session::{ChangeFeed, ConnectionHandle};
use crate::client::Database;
use crate::error::{Error, Result};
use sofa_api::{ChangeEvent, ConsumerState, FeedEvent, FeedOptions, Seq};

/// Bookkeeping guarded by the consumer's lock. Never held across an await.
struct ConsumerCore {
    state: ConsumerState,
    options: FeedOptions,
    last_seq: Option<Seq>,
    connection: Option<ConnectionHandle>,
    /// Bumped on every start; a pull loop only touches state of its own generation
    generation: u64,
    last_error: Option<Arc<Error>>,
}

struct Shared {
    db: Database,
    core: Mutex<ConsumerCore>,
    subscribers: Mutex<Subscribers>,
    state_tx: watch::Sender<ConsumerState>,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, ConsumerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the state and tell watchers; call with the core lock held
    fn transition(&self, core: &mut ConsumerCore, state: ConsumerState) {
        core.state = state;
        self.state_tx.send_replace(state);
    }

    fn is_live(&self, generation: u64) -> bool {
        let core = self.core();
        core.generation == generation && core.state == ConsumerState::Running
    }

    /// Remember `seq` as the resume point. On ascending feeds a seq behind
    /// the recorded one is ignored, so `last_seq` never moves backwards.
    fn record_seq(&self, generation: u64, seq: &Seq) {
        let mut core = self.core();
        if core.generation != generation {
            return;
        }
        if !core.options.descending {
            if let Some(last) = &core.last_seq {
                if seq.is_before(last) {
                    debug!("[ChangeConsumer] Ignoring seq {} behind recorded {}", seq, last);
                    return;
                }
            }
        }
        core.last_seq = Some(seq.clone());
    }

    async fn notify_change(&self, change: &ChangeEvent) {
        let listeners = self.subscribers().snapshot();
        for listener in listeners {
            listener.on_change(change).await;
        }
    }

    async fn notify_error(&self, error: &Error) {
        let listeners = self.subscribers().snapshot();
        for listener in listeners {
            listener.on_error(error).await;
        }
    }

    /// Called by a pull loop once its stream has ended
    async fn finish(&self, generation: u64, outcome: Option<Error>) {
        let failure = {
            let mut core = self.core();
            if core.generation != generation || core.state != ConsumerState::Running {
                // Stopped or restarted underneath us
                if let Some(error) = &outcome {
                    debug!("[ChangeConsumer] Ignoring error from stale feed: {}", error);
                }
                return;
            }

            core.connection = None;
            let failure = outcome.map(Arc::new);
            core.last_error = failure.clone();
            self.transition(&mut core, ConsumerState::Stopped);
            failure
        };

        match failure {
            Some(error) => {
                warn!("[ChangeConsumer] Feed on '{}' failed: {}", self.db.name(), error);
                self.notify_error(&error).await;
            }
            None => info!("[ChangeConsumer] Feed on '{}' ended", self.db.name()),
        }
    }
}

async fn pull_loop(shared: Arc<Shared>, generation: u64, mut events: ChangeStream) {
    let mut delivered: u64 = 0;

    let outcome = loop {
        match events.next().await {
            None => break None,
            Some(Ok(FeedEvent::Change(change))) => {
                if !shared.is_live(generation) {
                    break None;
                }
                shared.notify_change(&change).await;
                shared.record_seq(generation, &change.seq);
                delivered += 1;
            }
            Some(Ok(FeedEvent::Finished { last_seq, pending })) => {
                debug!(
                    "[ChangeConsumer] Feed finished at {} (pending: {:?})",
                    last_seq, pending
                );
                shared.record_seq(generation, &last_seq);
            }
            Some(Err(error)) => break Some(error),
        }
    };

    // Release the response body before anyone can observe Stopped
    drop(events);
    debug!("[ChangeConsumer] Pull loop {} delivered {} changes", generation, delivered);
    shared.finish(generation, outcome).await;
}

/// Follows a database's `_changes` feed and forwards each change to its subscribers
pub struct ChangeConsumer {
    shared: Arc<Shared>,
}

impl ChangeConsumer {
    pub fn new(db: Database, options: FeedOptions) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Init);
        Self {
            shared: Arc::new(Shared {
                db,
                core: Mutex::new(ConsumerCore {
                    state: ConsumerState::Init,
                    options,
                    last_seq: None,
                    connection: None,
                    generation: 0,
                    last_error: None,
                }),
                subscribers: Mutex::new(Subscribers::default()),
                state_tx,
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.shared.db
    }

    /// Open the feed and begin forwarding changes.
    ///
    /// Resumes after the last forwarded change when there is one, otherwise
    /// starts from the configured `since` (or the database's current update
    /// sequence). If the feed cannot be opened the state is left as it was
    /// and the error is returned.
    pub async fn start(&self) -> Result<()> {
        let (generation, previous, options) = {
            let mut core = self.shared.core();
            if core.state == ConsumerState::Running {
                return Err(Error::InvalidState {
                    operation: "start",
                    state: core.state,
                });
            }

            let previous = core.state;
            core.generation += 1;
            core.last_error = None;
            let mut options = core.options.clone();
            if let Some(seq) = &core.last_seq {
                options.since = Some(seq.clone());
            }
            self.shared.transition(&mut core, ConsumerState::Running);
            (core.generation, previous, options)
        };

        let session = match ChangeFeed::open(&self.shared.db, &options).await {
            Ok(session) => session,
            Err(error) => {
                let mut core = self.shared.core();
                if core.generation == generation && core.state == ConsumerState::Running {
                    self.shared.transition(&mut core, previous);
                }
                warn!("[ChangeConsumer] Failed to open feed on '{}': {}", self.shared.db.name(), error);
                return Err(error);
            }
        };

        let since = session.since.clone();
        let feed = session.feed;
        let (events, handle) = session.into_parts();
        {
            let mut core = self.shared.core();
            if core.generation != generation || core.state != ConsumerState::Running {
                debug!("[ChangeConsumer] Stopped while opening, closing feed");
                handle.abort();
                return Ok(());
            }
            core.connection = Some(handle);
        }

        info!(
            "[ChangeConsumer] Started {} feed on '{}' since {}",
            feed,
            self.shared.db.name(),
            since
        );
        tokio::spawn(pull_loop(self.shared.clone(), generation, events));
        Ok(())
    }

    /// Stop forwarding changes and close the connection.
    ///
    /// Returns immediately; a change already being delivered may still
    /// complete. Stopping a stopped consumer does nothing.
    pub fn stop(&self) -> &Self {
        let connection = {
            let mut core = self.shared.core();
            if core.state == ConsumerState::Stopped {
                return self;
            }
            self.shared.transition(&mut core, ConsumerState::Stopped);
            core.connection.take()
        };

        if let Some(connection) = connection {
            connection.abort();
        }
        info!("[ChangeConsumer] Stopped feed on '{}'", self.shared.db.name());
        self
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConsumerState::Running
    }

    pub fn state(&self) -> ConsumerState {
        self.shared.core().state
    }

    /// Sequence of the last change handed to subscribers
    pub fn last_seq(&self) -> Option<Seq> {
        self.shared.core().last_seq.clone()
    }

    /// Error that stopped the most recent run, if any
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.shared.core().last_error.clone()
    }

    pub fn options(&self) -> FeedOptions {
        self.shared.core().options.clone()
    }

    /// Replace the feed options. The next start begins from the new
    /// options' `since` instead of resuming.
    pub fn reconfigure(&self, options: FeedOptions) -> Result<()> {
        let mut core = self.shared.core();
        if core.state == ConsumerState::Running {
            return Err(Error::InvalidState {
                operation: "reconfigure",
                state: core.state,
            });
        }
        core.options = options;
        core.last_seq = None;
        Ok(())
    }

    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        self.shared.subscribers().add(listener)
    }

    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener(f)))
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers().remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the consumer reaches `Stopped`
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.watch_state();
        let _ = rx.wait_for(|state| *state == ConsumerState::Stopped).await;
    }
}

impl Drop for ChangeConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ChangeConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core();
        f.debug_struct("ChangeConsumer")
            .field("db", &self.shared.db.name())
            .field("state", &core.state)
            .field("last_seq", &core.last_seq)
            .finish()
    }
}

impl Database {
    /// Consumer of this database's change feed, in `Init` state
    pub fn consumer(&self, options: FeedOptions) -> ChangeConsumer {
        ChangeConsumer::new(self.clone(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Server;
    use crate::testing::FakeTransport;
    use async_trait::async_trait;
    use sofa_api::FeedType;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    fn database(name: &str) -> (Database, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new());
        let server = Server::with_transport("http://couch.test:5984", transport.clone()).unwrap();
        (server.database(name), transport)
    }

    fn collect(consumer: &ChangeConsumer) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        consumer.subscribe_fn(move |change| {
            let _ = tx.send(change.clone());
        });
        rx
    }

    fn change_line(seq: u64, id: &str) -> String {
        format!(r#"{{"seq":{},"id":"{}","changes":[{{"rev":"1-{}"}}]}}"#, seq, id, id)
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_change(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for change")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn test_normal_feed_stops_on_its_own() {
        let (db, transport) = database("orders");
        let released = transport.respond_stream(
            "/orders/_changes",
            200,
            &[r#"{"results":[{"seq":1,"id":"a","changes":[{"rev":"1-x"}]}],"last_seq":1}"#],
        );

        let consumer = db.consumer(FeedOptions::new().with_since(0).with_feed(FeedType::Normal));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();

        let change = next_change(&mut rx).await;
        assert_eq!(change.seq, Seq::from(1));
        assert_eq!(change.id, "a");
        assert_eq!(change.revs(), vec!["1-x"]);
        assert!(!change.deleted);

        tokio::time::timeout(Duration::from_secs(2), consumer.wait_until_stopped())
            .await
            .unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(consumer.last_seq(), Some(Seq::from(1)));
        assert!(consumer.last_error().is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_continuous_feed_preserves_wire_order() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();
        assert!(consumer.is_running());

        feed.send_line(&change_line(1, "a"));
        feed.send("\n");
        feed.send(&change_line(2, "b")[..10]);
        feed.send(&format!("{}\n", &change_line(2, "b")[10..]));
        feed.send_line(&change_line(3, "c"));

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(next_change(&mut rx).await.id);
        }
        assert_eq!(ids, vec!["a", "b", "c"]);
        eventually(|| consumer.last_seq() == Some(Seq::from(3))).await;
        assert!(consumer.is_running());
        consumer.stop();
    }

    #[tokio::test]
    async fn test_stop_during_read_releases_connection_once() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();
        feed.send_line(&change_line(1, "a"));
        next_change(&mut rx).await;

        // The pull loop is now parked waiting for the next line
        consumer.stop();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        eventually(|| feed.is_released()).await;

        consumer.stop();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(!feed.send_line(&change_line(2, "b")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(feed.released(), 1);
        assert!(rx.try_recv().is_err());
        assert!(consumer.last_error().is_none());
        assert_eq!(consumer.last_seq(), Some(Seq::from(1)));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_stopped() {
        let (db, _transport) = database("orders");
        let consumer = db.consumer(FeedOptions::default());
        assert_eq!(consumer.state(), ConsumerState::Init);
        consumer.stop().stop();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_last_seq() {
        let (db, transport) = database("orders");
        let first = transport.open_feed("/orders/_changes");
        let _second = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();
        first.send_line(r#"{"seq":"2-g1AA","id":"a","changes":[{"rev":"1-x"}]}"#);
        next_change(&mut rx).await;
        eventually(|| consumer.last_seq() == Some(Seq::from("2-g1AA"))).await;

        consumer.stop();
        consumer.start().await.unwrap();

        let requests = transport.requests_to("/orders/_changes");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query_param("since").as_deref(), Some("0"));
        assert_eq!(requests[1].query_param("since").as_deref(), Some("2-g1AA"));
        consumer.stop();
    }

    #[tokio::test]
    async fn test_reconfigure_clears_resume_point() {
        let (db, transport) = database("orders");
        let first = transport.open_feed("/orders/_changes");
        let _second = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();

        let err = consumer.reconfigure(FeedOptions::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidState { operation: "reconfigure", .. }));

        first.send_line(&change_line(5, "a"));
        next_change(&mut rx).await;
        eventually(|| consumer.last_seq().is_some()).await;
        consumer.stop();

        consumer
            .reconfigure(FeedOptions::new().with_since(42).with_include_docs(true))
            .unwrap();
        assert!(consumer.last_seq().is_none());
        consumer.start().await.unwrap();

        let request = &transport.requests_to("/orders/_changes")[1];
        assert_eq!(request.query_param("since").as_deref(), Some("42"));
        assert_eq!(request.query_param("include_docs").as_deref(), Some("true"));
        consumer.stop();
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let (db, transport) = database("orders");
        let _feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        consumer.start().await.unwrap();
        let err = consumer.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "start",
                state: ConsumerState::Running
            }
        ));
        assert!(consumer.is_running());
        assert_eq!(transport.requests_to("/orders/_changes").len(), 1);
        consumer.stop();
    }

    #[tokio::test]
    async fn test_missing_database_keeps_state() {
        let (db, _transport) = database("ghost");
        let consumer = db.consumer(FeedOptions::default());
        let mut rx = collect(&consumer);

        let err = consumer.start().await.unwrap_err();
        assert!(matches!(err, Error::DatabaseNotFound { .. }));
        assert_eq!(consumer.state(), ConsumerState::Init);

        consumer.stop();
        assert!(consumer.start().await.is_err());
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(rx.try_recv().is_err());
    }

    struct ErrorRecorder {
        errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChangeListener for ErrorRecorder {
        async fn on_change(&self, _change: &ChangeEvent) {}

        async fn on_error(&self, error: &Error) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn test_malformed_line_stops_with_error() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let recorder = Arc::new(ErrorRecorder {
            errors: Mutex::new(Vec::new()),
        });
        consumer.subscribe(recorder.clone());
        consumer.start().await.unwrap();

        feed.send_line("{not json");
        tokio::time::timeout(Duration::from_secs(2), consumer.wait_until_stopped())
            .await
            .unwrap();

        assert!(matches!(consumer.last_error().as_deref(), Some(Error::Parse(_))));
        eventually(|| recorder.errors.lock().unwrap().len() == 1).await;
        eventually(|| feed.is_released()).await;
        assert_eq!(feed.released(), 1);
    }

    #[tokio::test]
    async fn test_server_close_mid_line_is_not_an_error() {
        let (db, transport) = database("orders");
        let mut feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let recorder = Arc::new(ErrorRecorder {
            errors: Mutex::new(Vec::new()),
        });
        consumer.subscribe(recorder.clone());
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();

        feed.send_line(&change_line(1, "a"));
        feed.send(r#"{"seq":2,"id":"#);
        feed.close();
        tokio::time::timeout(Duration::from_secs(2), consumer.wait_until_stopped())
            .await
            .unwrap();

        assert!(consumer.last_error().is_none());
        assert!(recorder.errors.lock().unwrap().is_empty());
        assert_eq!(next_change(&mut rx).await.id, "a");
        assert!(rx.try_recv().is_err());
        assert_eq!(consumer.last_seq(), Some(Seq::from(1)));
        assert_eq!(feed.released(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_stops_with_error_once() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let recorder = Arc::new(ErrorRecorder {
            errors: Mutex::new(Vec::new()),
        });
        consumer.subscribe(recorder.clone());
        consumer.start().await.unwrap();

        feed.send_line(&change_line(1, "a"));
        assert!(feed.fail(Error::transport("connection reset")));
        tokio::time::timeout(Duration::from_secs(2), consumer.wait_until_stopped())
            .await
            .unwrap();

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(matches!(consumer.last_error().as_deref(), Some(Error::Transport(_))));
        eventually(|| !recorder.errors.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            *recorder.errors.lock().unwrap(),
            vec!["Transport error: connection reset".to_string()]
        );
        assert_eq!(feed.released(), 1);
        assert_eq!(consumer.last_seq(), Some(Seq::from(1)));
    }

    #[tokio::test]
    async fn test_last_seq_never_moves_backwards() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();

        feed.send_line(r#"{"seq":"5-g1AA","id":"a","changes":[{"rev":"1-x"}]}"#);
        next_change(&mut rx).await;
        feed.send_line(r#"{"last_seq":"3-g1AA"}"#);
        tokio::time::timeout(Duration::from_secs(2), consumer.wait_until_stopped())
            .await
            .unwrap();

        assert_eq!(consumer.last_seq(), Some(Seq::from("5-g1AA")));
    }

    #[tokio::test]
    async fn test_descending_feed_records_falling_seqs() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0).with_descending(true));
        let mut rx = collect(&consumer);
        consumer.start().await.unwrap();

        feed.send_line(&change_line(9, "newest"));
        feed.send_line(&change_line(4, "older"));
        next_change(&mut rx).await;
        next_change(&mut rx).await;
        eventually(|| consumer.last_seq() == Some(Seq::from(4))).await;
        consumer.stop();
    }

    struct GatedListener {
        gate: Arc<Notify>,
        entered: mpsc::UnboundedSender<Seq>,
    }

    #[async_trait]
    impl ChangeListener for GatedListener {
        async fn on_change(&self, change: &ChangeEvent) {
            let _ = self.entered.send(change.seq.clone());
            self.gate.notified().await;
        }
    }

    #[tokio::test]
    async fn test_slow_listener_holds_back_the_feed() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let gate = Arc::new(Notify::new());
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let consumer = db.consumer(FeedOptions::new().with_since(0));
        consumer.subscribe(Arc::new(GatedListener {
            gate: gate.clone(),
            entered: entered_tx,
        }));
        consumer.start().await.unwrap();

        feed.send_line(&change_line(1, "a"));
        feed.send_line(&change_line(2, "b"));
        assert_eq!(entered.recv().await, Some(Seq::from(1)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(entered.try_recv().is_err());
        assert!(consumer.last_seq().is_none());

        gate.notify_one();
        assert_eq!(entered.recv().await, Some(Seq::from(2)));
        assert_eq!(consumer.last_seq(), Some(Seq::from(1)));

        // Stopping while a delivery is in flight lets only that delivery finish
        consumer.stop();
        gate.notify_one();
        feed.send_line(&change_line(3, "c"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(entered.try_recv().is_err());
        eventually(|| consumer.last_seq() == Some(Seq::from(2))).await;
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_gets_nothing() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut kept = collect(&consumer);
        let (tx, mut dropped) = mpsc::unbounded_channel::<ChangeEvent>();
        let id = consumer.subscribe_fn(move |change| {
            let _ = tx.send(change.clone());
        });
        assert_eq!(consumer.subscriber_count(), 2);
        assert!(consumer.unsubscribe(id));
        assert!(!consumer.unsubscribe(id));

        consumer.start().await.unwrap();
        feed.send_line(&change_line(1, "a"));
        next_change(&mut kept).await;
        assert!(dropped.try_recv().is_err());
        consumer.stop();
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let (db, transport) = database("orders");
        let feed = transport.open_feed("/orders/_changes");

        let consumer = db.consumer(FeedOptions::new().with_since(0));
        let mut states = consumer.watch_state();
        consumer.start().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConsumerState::Running);

        drop(consumer);
        eventually(|| feed.is_released()).await;
        assert_eq!(*states.borrow_and_update(), ConsumerState::Stopped);
    }
}
