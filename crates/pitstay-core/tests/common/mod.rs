#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use pitstay_core::{
    BookingEngine, BookingPolicy, ManualClock, MessagingService, NotificationService, PointsLedger,
};
use pitstay_db::Database;
use pitstay_types::api::{CreateBookingRequest, TransitionGuard};
use pitstay_types::events::{ChangeEvent, ChangeRecord, ChangeSink};
use pitstay_types::models::{Booking, BookingStatus, PointsTransactionType};

/// Collects every published change event.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<ChangeEvent>>,
}

impl Recorder {
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl ChangeSink for Recorder {
    fn publish(&self, event: ChangeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub sink: Arc<Recorder>,
    pub clock: Arc<ManualClock>,
    pub engine: BookingEngine,
    pub ledger: PointsLedger,
    pub messaging: MessagingService,
    pub notifications: NotificationService,
    pub guest: Uuid,
    pub host: Uuid,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sink = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = BookingEngine::new(db.clone(), sink.clone(), clock.clone(), BookingPolicy::default());
        let ledger = PointsLedger::new(db.clone(), sink.clone(), clock.clone());
        let messaging = MessagingService::new(db.clone(), sink.clone(), clock.clone());
        let notifications = NotificationService::new(db.clone(), sink.clone(), clock.clone());

        let h = Self {
            db,
            sink,
            clock,
            engine,
            ledger,
            messaging,
            notifications,
            guest: Uuid::new_v4(),
            host: Uuid::new_v4(),
        };
        h.ledger
            .award(h.guest, PointsTransactionType::SubscriptionBonus, 100, "welcome")
            .unwrap();
        h.sink.take();
        h
    }

    pub fn request(&self, points_cost: i64) -> Booking {
        let booking = self
            .engine
            .request_booking(
                self.guest,
                CreateBookingRequest {
                    host_id: self.host,
                    race_id: Uuid::new_v4(),
                    property_id: Uuid::new_v4(),
                    check_in_date: NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),
                    check_out_date: NaiveDate::from_ymd_opt(2026, 7, 6).unwrap(),
                    guests_count: 2,
                    points_cost,
                    request_message: Some("Coming for the Grand Prix".into()),
                },
            )
            .unwrap();
        self.sink.take();
        booking
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn balance(&self, user: Uuid) -> i64 {
        self.ledger.get_balance(user).unwrap()
    }

    /// Ledger soundness: the derived balance equals the sum of the log.
    pub fn assert_ledger_sound(&self, user: Uuid) {
        let rows = self.db.get_points_history(user, 10_000).unwrap();
        assert_eq!(self.balance(user), rows.iter().map(|t| t.amount).sum::<i64>());
    }

    pub fn ledger_kinds(&self, booking_id: Uuid) -> Vec<(Uuid, PointsTransactionType, i64)> {
        self.db
            .get_points_for_booking(booking_id)
            .unwrap()
            .into_iter()
            .map(|t| (t.user_id, t.kind, t.amount))
            .collect()
    }

    pub fn status_path(&self, booking_id: Uuid) -> Vec<BookingStatus> {
        let transitions = self.db.get_transitions(booking_id).unwrap();
        let mut path = vec![BookingStatus::Pending];
        path.extend(transitions.into_iter().map(|t| t.to_status));
        path
    }
}

pub fn expecting(status: BookingStatus) -> TransitionGuard {
    TransitionGuard { expected_status: Some(status), request_id: None }
}

pub fn with_request_id(status: BookingStatus, request_id: &str) -> TransitionGuard {
    TransitionGuard { expected_status: Some(status), request_id: Some(request_id.into()) }
}

pub fn booking_updates(events: &[ChangeEvent]) -> Vec<&Booking> {
    events
        .iter()
        .filter_map(|e| match &e.record {
            ChangeRecord::Booking(b) => Some(b),
            _ => None,
        })
        .collect()
}
