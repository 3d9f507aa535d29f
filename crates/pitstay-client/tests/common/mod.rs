#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use pitstay_client::{Api, ClientError, FeedConnector, FeedStream, RealtimeSyncBroker, Result, SyncConfig};
use pitstay_core::{
    BookingEngine, BookingError, BookingPolicy, ManualClock, MessagingService, NotificationService,
    PointsLedger,
};
use pitstay_db::Database;
use pitstay_types::api::{
    BalanceResponse, BookingResponse, CancelRequest, CreateBookingRequest, ErrorBody, MarkReadResponse,
    RespondRequest, SendMessageRequest, SendMessageResponse, SweepResponse, TransitionGuard,
};
use pitstay_types::events::{ChangeEvent, ChangeSink, GatewayEvent, Topic};
use pitstay_types::models::{Booking, Message, Notification, PointsTransaction, PointsTransactionType};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
}

struct Subscriber {
    topics: Arc<Mutex<HashSet<Topic>>>,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// In-process stand-in for the gateway: forwards each change to the feeds
/// subscribed to one of its topics.
#[derive(Default)]
pub struct Hub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Hub {
    fn attach(&self) -> FakeFeed {
        let topics = Arc::new(Mutex::new(HashSet::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(Subscriber { topics: topics.clone(), tx });
        FakeFeed { topics, rx }
    }

    fn drop_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

impl ChangeSink for Hub {
    fn publish(&self, event: ChangeEvent) {
        let topics = event.topics();
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| {
            let wanted = {
                let subscribed = s.topics.lock().unwrap();
                topics.iter().any(|t| subscribed.contains(t))
            };
            !wanted || s.tx.send(GatewayEvent::Change(event.clone())).is_ok()
        });
    }
}

/// Real booking services over an in-memory database, with switches for
/// taking the network away.
pub struct FakeServer {
    pub db: Arc<Database>,
    pub clock: Arc<ManualClock>,
    pub engine: BookingEngine,
    pub ledger: PointsLedger,
    pub messaging: MessagingService,
    pub notifications: NotificationService,
    hub: Arc<Hub>,
    online: AtomicBool,
    feed_up: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    connects: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let hub = Arc::new(Hub::default());
        let clock = Arc::new(ManualClock::new(t0()));
        Arc::new(Self {
            engine: BookingEngine::new(db.clone(), hub.clone(), clock.clone(), BookingPolicy::default()),
            ledger: PointsLedger::new(db.clone(), hub.clone(), clock.clone()),
            messaging: MessagingService::new(db.clone(), hub.clone(), clock.clone()),
            notifications: NotificationService::new(db.clone(), hub.clone(), clock.clone()),
            db,
            clock,
            hub,
            online: AtomicBool::new(true),
            feed_up: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        })
    }

    /// Offline takes both the REST API and the feed away and closes every
    /// open feed.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.hub.drop_all();
        }
    }

    /// Feed-only outage: REST keeps working.
    pub fn set_feed_up(&self, up: bool) {
        self.feed_up.store(up, Ordering::SeqCst);
        if !up {
            self.hub.drop_all();
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reads fail while the feed and writes keep working.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fund(&self, user: Uuid, amount: i64) {
        self.ledger
            .award(user, PointsTransactionType::SubscriptionBonus, amount, "welcome")
            .unwrap();
    }

    pub fn request_booking(&self, guest: Uuid, host: Uuid, points_cost: i64) -> Booking {
        self.engine
            .request_booking(
                guest,
                CreateBookingRequest {
                    host_id: host,
                    race_id: Uuid::new_v4(),
                    property_id: Uuid::new_v4(),
                    check_in_date: NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),
                    check_out_date: NaiveDate::from_ymd_opt(2026, 7, 6).unwrap(),
                    guests_count: 2,
                    points_cost,
                    request_message: None,
                },
            )
            .unwrap()
    }

    pub fn api_for(self: &Arc<Self>, user: Uuid) -> Arc<FakeApi> {
        Arc::new(FakeApi { server: self.clone(), user })
    }

    pub fn broker_for(self: &Arc<Self>, user: Uuid) -> RealtimeSyncBroker {
        let api = self.api_for(user);
        RealtimeSyncBroker::new(api.clone(), api, SyncConfig::default())
    }
}

fn domain(e: BookingError) -> ClientError {
    ClientError::from_body(ErrorBody { error: e.to_string(), kind: e.kind() })
}

/// `Api` and `FeedConnector` for one user, backed by `FakeServer`.
pub struct FakeApi {
    server: Arc<FakeServer>,
    user: Uuid,
}

impl FakeApi {
    fn reachable(&self) -> Result<()> {
        if self.server.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Network("connection refused".into()))
        }
    }

    fn readable(&self) -> Result<()> {
        self.reachable()?;
        if self.server.fail_reads.load(Ordering::SeqCst) {
            return Err(ClientError::Network("read timed out".into()));
        }
        Ok(())
    }

    fn writable(&self) -> Result<()> {
        self.reachable()?;
        if self.server.fail_writes.load(Ordering::SeqCst) {
            return Err(ClientError::Server("Internal Server Error".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Api for FakeApi {
    async fn bookings(&self) -> Result<Vec<Booking>> {
        self.readable()?;
        self.server.engine.bookings_for_user(self.user).map_err(domain)
    }

    async fn booking(&self, booking_id: Uuid) -> Result<Booking> {
        self.readable()?;
        self.server.engine.get_booking(self.user, booking_id).map_err(domain)
    }

    async fn respond(&self, booking_id: Uuid, req: &RespondRequest) -> Result<BookingResponse> {
        self.writable()?;
        self.server.engine.respond(self.user, booking_id, req).map_err(domain)
    }

    async fn confirm(&self, booking_id: Uuid, guard: &TransitionGuard) -> Result<BookingResponse> {
        self.writable()?;
        self.server.engine.confirm(self.user, booking_id, guard).map_err(domain)
    }

    async fn cancel(&self, booking_id: Uuid, req: &CancelRequest) -> Result<BookingResponse> {
        self.writable()?;
        self.server.engine.cancel(self.user, booking_id, req).map_err(domain)
    }

    async fn complete(&self, booking_id: Uuid, guard: &TransitionGuard) -> Result<BookingResponse> {
        self.writable()?;
        self.server.engine.complete(self.user, booking_id, guard).map_err(domain)
    }

    async fn sweep(&self) -> Result<SweepResponse> {
        self.writable()?;
        let expired = self.server.engine.sweep().map_err(domain)?;
        Ok(SweepResponse { expired })
    }

    async fn messages(&self, booking_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.readable()?;
        self.server.messaging.list_messages(self.user, booking_id, limit).map_err(domain)
    }

    async fn send_message(&self, booking_id: Uuid, req: &SendMessageRequest) -> Result<SendMessageResponse> {
        self.writable()?;
        let (message, replayed) = self
            .server
            .messaging
            .send_message(self.user, booking_id, &req.message, req.client_ref.as_deref())
            .map_err(domain)?;
        Ok(SendMessageResponse { message, replayed })
    }

    async fn mark_conversation_read(&self, booking_id: Uuid) -> Result<MarkReadResponse> {
        self.writable()?;
        let updated = self.server.messaging.mark_conversation_read(self.user, booking_id).map_err(domain)?;
        Ok(MarkReadResponse { updated })
    }

    async fn balance(&self) -> Result<BalanceResponse> {
        self.readable()?;
        let balance = self.server.ledger.get_balance(self.user).map_err(domain)?;
        Ok(BalanceResponse { user_id: self.user, balance })
    }

    async fn transactions(&self, limit: u32) -> Result<Vec<PointsTransaction>> {
        self.readable()?;
        self.server.ledger.history(self.user, limit).map_err(domain)
    }

    async fn notifications(&self, limit: u32) -> Result<Vec<Notification>> {
        self.readable()?;
        self.server.notifications.list(self.user, limit).map_err(domain)
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<MarkReadResponse> {
        self.writable()?;
        let updated = self.server.notifications.mark_read(self.user, notification_id).map_err(domain)?;
        Ok(MarkReadResponse { updated })
    }

    async fn mark_all_notifications_read(&self) -> Result<MarkReadResponse> {
        self.writable()?;
        let updated = self.server.notifications.mark_all_read(self.user).map_err(domain)?;
        Ok(MarkReadResponse { updated })
    }
}

#[async_trait]
impl FeedConnector for FakeApi {
    async fn connect(&self) -> Result<Box<dyn FeedStream>> {
        self.reachable()?;
        if !self.server.feed_up.load(Ordering::SeqCst) {
            return Err(ClientError::Network("gateway unavailable".into()));
        }
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.server.hub.attach()))
    }
}

pub struct FakeFeed {
    topics: Arc<Mutex<HashSet<Topic>>>,
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
}

#[async_trait]
impl FeedStream for FakeFeed {
    async fn subscribe(&mut self, topics: Vec<Topic>) -> Result<()> {
        self.topics.lock().unwrap().extend(topics);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<GatewayEvent>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Poll `check` until it holds. Runs on paused time, so the deadline is
/// virtual.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
