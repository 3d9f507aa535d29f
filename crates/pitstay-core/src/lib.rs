//! Booking lifecycle, points ledger, deadlines, messaging and notification
//! writes. Every mutation runs in one immediate SQLite transaction and its
//! change events are published only after commit.

pub mod booking;
pub mod clock;
pub mod deadline;
pub mod error;
pub mod ledger;
pub mod messaging;
pub mod notifications;
mod outbox;

pub use booking::BookingEngine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use deadline::{BookingPolicy, DeadlineScheduler};
pub use error::{BookingError, Result};
pub use ledger::PointsLedger;
pub use messaging::MessagingService;
pub use notifications::NotificationService;
