//! Keeps the client caches consistent with the server: one change-feed
//! connection per running session, reconnect with backoff, and a polling
//! fallback once reconnects are exhausted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use pitstay_types::events::{ChangeEvent, ChangeRecord, GatewayEvent, Topic};
use pitstay_types::models::{Booking, Message, PointsTransaction};

use crate::backoff::{ReconnectPolicy, retry_read};
use crate::cache::{Applied, Snapshot};
use crate::connection::ConnectionState;
use crate::error::{ClientError, Result};
use crate::inflight::InFlightRegistry;
use crate::notifications::NotificationDispatcher;
use crate::transport::{Api, FeedConnector, FeedStream};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub reconnect: ReconnectPolicy,
    pub read_retry: ReconnectPolicy,
    /// Poll period while degraded.
    pub poll_interval: Duration,
    pub page_size: u32,
    /// Pause between accept and confirm.
    pub confirm_grace: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            read_retry: ReconnectPolicy::for_reads(),
            poll_interval: Duration::from_secs(60),
            page_size: 50,
            confirm_grace: Duration::from_millis(500),
        }
    }
}

/// A message send that could not reach the server. Resent with the same
/// `client_ref` on the next connect.
#[derive(Debug, Clone)]
pub(crate) struct PendingSend {
    pub booking_id: Uuid,
    pub text: String,
    pub client_ref: String,
}

#[derive(Debug)]
struct RunningSync {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SyncInner {
    pub(crate) api: Arc<dyn Api>,
    connector: Arc<dyn FeedConnector>,
    pub(crate) config: SyncConfig,
    user: RwLock<Option<Uuid>>,
    pub(crate) bookings: Snapshot<Booking>,
    transactions: Snapshot<PointsTransaction>,
    balance: watch::Sender<Option<i64>>,
    conversations: Mutex<HashMap<Uuid, Arc<Snapshot<Message>>>>,
    pub(crate) notifications: NotificationDispatcher,
    state: watch::Sender<ConnectionState>,
    /// Subscribe channel of the live feed session, if any.
    live_topics: Mutex<Option<mpsc::UnboundedSender<Topic>>>,
    pub(crate) pending_sends: Mutex<Vec<PendingSend>>,
    pub(crate) inflight: InFlightRegistry,
}

/// Client-side sync for one signed-in user.
///
/// `start(user)` spawns the background feed task; `stop()` cancels it. Every
/// read accessor has a snapshot getter and a `watch_*` handle.
pub struct RealtimeSyncBroker {
    pub(crate) inner: Arc<SyncInner>,
    running: tokio::sync::Mutex<Option<RunningSync>>,
}

impl RealtimeSyncBroker {
    pub fn new(api: Arc<dyn Api>, connector: Arc<dyn FeedConnector>, config: SyncConfig) -> Self {
        let (balance, _) = watch::channel(None);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let notifications =
            NotificationDispatcher::new(api.clone(), config.page_size, config.read_retry.clone());
        Self {
            inner: Arc::new(SyncInner {
                api,
                connector,
                config,
                user: RwLock::new(None),
                bookings: Snapshot::default(),
                transactions: Snapshot::default(),
                balance,
                conversations: Mutex::new(HashMap::new()),
                notifications,
                state,
                live_topics: Mutex::new(None),
                pending_sends: Mutex::new(Vec::new()),
                inflight: InFlightRegistry::new(),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    // -- Lifecycle --

    pub async fn start(&self, user_id: Uuid) -> Result<()> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Err(ClientError::Lifecycle("sync is already running"));
        }

        *self.inner.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id);
        let stop = CancellationToken::new();
        let task = tokio::spawn(self.inner.clone().run(user_id, stop.child_token()));
        *guard = Some(RunningSync { stop, task });
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return Err(ClientError::Lifecycle("sync is not running"));
        };

        running.stop.cancel();
        let _ = running.task.await;
        *self.inner.user.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    // -- Bookings --

    pub fn bookings(&self) -> Vec<Booking> {
        self.inner.bookings.get()
    }

    pub fn booking(&self, booking_id: Uuid) -> Option<Booking> {
        self.inner.bookings.read(|c| c.get(booking_id).cloned())
    }

    pub fn watch_bookings(&self) -> watch::Receiver<Vec<Booking>> {
        self.inner.bookings.watch()
    }

    pub async fn refresh_bookings(&self) -> Result<()> {
        self.inner.refresh_bookings().await
    }

    // -- Points --

    /// Last known balance, `None` before the first fetch.
    pub fn balance(&self) -> Option<i64> {
        *self.inner.balance.borrow()
    }

    pub fn watch_balance(&self) -> watch::Receiver<Option<i64>> {
        self.inner.balance.subscribe()
    }

    pub async fn refresh_balance(&self) -> Result<()> {
        self.inner.refresh_balance().await
    }

    pub fn transactions(&self) -> Vec<PointsTransaction> {
        self.inner.transactions.get()
    }

    pub fn watch_transactions(&self) -> watch::Receiver<Vec<PointsTransaction>> {
        self.inner.transactions.watch()
    }

    pub async fn refresh_transactions(&self) -> Result<()> {
        self.inner.refresh_transactions().await
    }

    // -- Notifications --

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.inner.notifications
    }

    // -- Messages --

    /// Start following one booking's conversation. Fetches it once and
    /// subscribes to its live topic.
    pub async fn open_conversation(&self, booking_id: Uuid) -> Result<watch::Receiver<Vec<Message>>> {
        let snapshot = self.inner.track_conversation(booking_id);
        self.inner.refresh_conversation(booking_id, &snapshot).await?;
        Ok(snapshot.watch())
    }

    pub fn messages(&self, booking_id: Uuid) -> Vec<Message> {
        self.inner.conversation(booking_id).map(|s| s.get()).unwrap_or_default()
    }

    // -- Reconciliation --

    /// Apply one change-feed event to the caches. Duplicates and stale
    /// copies are no-ops.
    pub async fn apply(&self, event: ChangeEvent) {
        self.inner.apply(event).await;
    }

    /// Re-fetch everything the broker tracks.
    pub async fn reconcile(&self) -> Result<()> {
        self.inner.reconcile().await
    }
}

impl SyncInner {
    pub(crate) fn user(&self) -> Result<Uuid> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or(ClientError::Lifecycle("sync has not been started"))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "connection state");
            *current = state;
            true
        });
    }

    fn topics(&self, user_id: Uuid) -> Vec<Topic> {
        let mut topics = vec![
            Topic::bookings_of(user_id),
            Topic::notifications_of(user_id),
            Topic::points_of(user_id),
        ];
        topics.extend(lock(&self.conversations).keys().map(|id| Topic::messages_of(*id)));
        topics
    }

    pub(crate) fn conversation(&self, booking_id: Uuid) -> Option<Arc<Snapshot<Message>>> {
        lock(&self.conversations).get(&booking_id).cloned()
    }

    /// Get or create the conversation cache, subscribing the live feed to it.
    pub(crate) fn track_conversation(&self, booking_id: Uuid) -> Arc<Snapshot<Message>> {
        let mut conversations = lock(&self.conversations);
        if let Some(existing) = conversations.get(&booking_id) {
            return existing.clone();
        }
        let snapshot = Arc::new(Snapshot::default());
        conversations.insert(booking_id, snapshot.clone());
        drop(conversations);

        if let Some(tx) = lock(&self.live_topics).as_ref() {
            let _ = tx.send(Topic::messages_of(booking_id));
        }
        snapshot
    }

    // -- Fetches --

    async fn refresh_bookings(&self) -> Result<()> {
        let rows = retry_read(&self.config.read_retry, "bookings", || self.api.bookings()).await?;
        self.bookings.update(|c| c.replace_all(rows));
        Ok(())
    }

    async fn refresh_balance(&self) -> Result<()> {
        let resp = retry_read(&self.config.read_retry, "balance", || self.api.balance()).await?;
        self.balance.send_replace(Some(resp.balance));
        Ok(())
    }

    async fn refresh_transactions(&self) -> Result<()> {
        let limit = self.config.page_size;
        let rows = retry_read(&self.config.read_retry, "transactions", || self.api.transactions(limit)).await?;
        self.transactions.update(|c| c.replace_all(rows));
        Ok(())
    }

    async fn refresh_conversation(&self, booking_id: Uuid, snapshot: &Snapshot<Message>) -> Result<()> {
        let limit = self.config.page_size;
        let rows =
            retry_read(&self.config.read_retry, "messages", || self.api.messages(booking_id, limit)).await?;
        snapshot.update(|c| c.replace_all(rows));
        Ok(())
    }

    /// Re-fetch every tracked collection. Runs after each (re)connect
    /// because events sent while disconnected are lost.
    pub(crate) async fn reconcile(&self) -> Result<()> {
        self.refresh_bookings().await?;
        self.refresh_transactions().await?;
        self.refresh_balance().await?;
        self.notifications.refresh().await?;

        let conversations: Vec<(Uuid, Arc<Snapshot<Message>>)> = lock(&self.conversations)
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        for (booking_id, snapshot) in conversations {
            self.refresh_conversation(booking_id, &snapshot).await?;
        }
        debug!("reconciliation pass complete");
        Ok(())
    }

    pub(crate) async fn apply(&self, event: ChangeEvent) {
        trace!(op = ?event.op, stamp = %event.stamp(), "applying change");
        match event.record {
            ChangeRecord::Booking(b) => {
                self.bookings.update(|c| c.apply(b));
            }
            ChangeRecord::Message(m) => match self.conversation(m.booking_id) {
                Some(snapshot) => {
                    snapshot.update(|c| c.apply(m));
                }
                None => trace!(booking_id = %m.booking_id, "message for untracked conversation"),
            },
            ChangeRecord::Notification(n) => {
                self.notifications.apply(n);
            }
            ChangeRecord::PointsTransaction(t) => {
                // The balance is never adjusted locally; a new ledger row
                // means the server's sum changed.
                if self.transactions.update(|c| c.apply(t)) == Applied::Inserted {
                    if let Err(e) = self.refresh_balance().await {
                        warn!("balance refresh failed: {}", e);
                    }
                }
            }
        }
    }

    /// Resend queued messages. Stops at the first transport failure and
    /// keeps the rest queued.
    pub(crate) async fn flush_pending_sends(&self) {
        let queued = std::mem::take(&mut *lock(&self.pending_sends));
        if queued.is_empty() {
            return;
        }
        info!(count = queued.len(), "resending queued messages");

        let mut remaining = queued.into_iter();
        while let Some(pending) = remaining.next() {
            match self.deliver(&pending).await {
                Ok(()) => {}
                Err(ClientError::Network(e)) => {
                    warn!("resend failed, keeping queue: {}", e);
                    let mut queue = lock(&self.pending_sends);
                    queue.push(pending);
                    queue.extend(remaining);
                    return;
                }
                Err(e) => {
                    warn!(client_ref = %pending.client_ref, "queued message rejected: {}", e);
                    if let Some(snapshot) = self.conversation(pending.booking_id) {
                        snapshot.update(|c| c.clear_optimistic(&pending.client_ref));
                    }
                }
            }
        }
    }

    pub(crate) async fn deliver(&self, pending: &PendingSend) -> Result<()> {
        let req = pitstay_types::api::SendMessageRequest {
            message: pending.text.clone(),
            client_ref: Some(pending.client_ref.clone()),
        };
        let resp = self.api.send_message(pending.booking_id, &req).await?;
        if resp.replayed {
            debug!(client_ref = %pending.client_ref, "message was already delivered");
        }
        self.track_conversation(pending.booking_id)
            .update(|c| c.upsert(resp.message));
        Ok(())
    }

    // -- Background task --

    async fn run(self: Arc<Self>, user_id: Uuid, stop: CancellationToken) {
        info!(%user_id, "sync started");

        // Expire overdue requests on session start.
        match self.api.sweep().await {
            Ok(resp) if !resp.expired.is_empty() => info!(count = resp.expired.len(), "expired overdue bookings"),
            Ok(_) => {}
            Err(e) => debug!("session-start sweep failed: {}", e),
        }

        let policy = self.config.reconnect.clone();
        let mut failures: u32 = 0;

        loop {
            if failures > 0 {
                let degraded = policy.exhausted(failures);
                let wait = if degraded {
                    self.set_state(ConnectionState::Degraded);
                    self.config.poll_interval
                } else {
                    self.set_state(ConnectionState::Disconnected);
                    policy.delay_for_attempt(failures - 1)
                };

                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                if degraded {
                    if let Err(e) = self.reconcile().await {
                        warn!("degraded poll failed: {}", e);
                    }
                }
            }

            if !policy.exhausted(failures) {
                self.set_state(ConnectionState::Connecting);
            }

            let connected = tokio::select! {
                _ = stop.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(feed) => {
                    failures = 0;
                    let reason = self.session(user_id, feed, &stop).await;
                    if stop.is_cancelled() {
                        break;
                    }
                    warn!("change feed lost: {}", reason);
                    failures = 1;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(failures, "change feed connect failed: {}", e);
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(%user_id, "sync stopped");
    }

    /// One connected period. Returns why it ended.
    async fn session(&self, user_id: Uuid, mut feed: Box<dyn FeedStream>, stop: &CancellationToken) -> String {
        let (topic_tx, mut topic_rx) = mpsc::unbounded_channel();
        *lock(&self.live_topics) = Some(topic_tx);

        let reason = async {
            if let Err(e) = feed.subscribe(self.topics(user_id)).await {
                return format!("subscribe failed: {e}");
            }

            self.flush_pending_sends().await;
            // Incremental events are only trusted on top of a fresh re-fetch.
            if let Err(e) = self.reconcile().await {
                return format!("reconciliation failed: {e}");
            }
            self.set_state(ConnectionState::Connected);

            loop {
                enum Step {
                    Stop,
                    Topic(Topic),
                    Event(Option<Result<GatewayEvent>>),
                }

                let step = tokio::select! {
                    _ = stop.cancelled() => Step::Stop,
                    Some(topic) = topic_rx.recv() => Step::Topic(topic),
                    event = feed.next_event() => Step::Event(event),
                };

                match step {
                    Step::Stop => return "stopped".to_string(),
                    Step::Topic(topic) => {
                        if let Err(e) = feed.subscribe(vec![topic]).await {
                            return format!("subscribe failed: {e}");
                        }
                    }
                    Step::Event(Some(Ok(GatewayEvent::Change(change)))) => self.apply(change).await,
                    Step::Event(Some(Ok(GatewayEvent::Subscribed { topics }))) => {
                        debug!(count = topics.len(), "subscriptions confirmed");
                    }
                    Step::Event(Some(Ok(GatewayEvent::Ready { .. }))) => {}
                    Step::Event(Some(Err(e))) => return e.to_string(),
                    Step::Event(None) => return "connection closed".to_string(),
                }
            }
        }
        .await;

        *lock(&self.live_topics) = None;
        reason
    }
}
