//! Host response deadlines and automatic expiry.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use pitstay_db::models::TransitionRow;
use pitstay_db::queries::{self, StatusUpdate};
use pitstay_types::events::ChangeRecord;
use pitstay_types::models::{
    Booking, BookingStatus, CancelledBy, NotificationType, PointsTransactionType,
};

use crate::error::{BookingError, Result};
use crate::ledger::{self, Posting};
use crate::notifications::notify;
use crate::outbox::Outbox;

/// Tunable booking rules.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// How long a host has to answer a request.
    pub response_window: Duration,
    /// Charged to the host, and paid to the guest, when a request expires.
    pub expiry_penalty: i64,
    /// Host cancellation penalty for zero-cost bookings.
    pub default_cancel_penalty: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            response_window: Duration::hours(48),
            expiry_penalty: 30,
            default_cancel_penalty: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadlineScheduler {
    policy: BookingPolicy,
}

impl DeadlineScheduler {
    pub fn new(policy: BookingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn deadline_for(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.policy.response_window
    }

    /// A pending request is expired from its deadline onwards.
    pub fn is_expired(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.status == BookingStatus::Pending && now >= booking.host_response_deadline
    }

    /// Expire one booking on the caller's transaction.
    ///
    /// Returns `None` when the booking is no longer pending or not yet due,
    /// which is what a second, concurrent sweep sees.
    pub(crate) fn expire(
        &self,
        conn: &Connection,
        outbox: &mut Outbox,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>> {
        let Some(booking) = queries::get_booking(conn, booking_id)? else {
            return Err(BookingError::NotFound { entity: "booking", id: booking_id });
        };
        if !self.is_expired(&booking, now) {
            return Ok(None);
        }

        let mut update = StatusUpdate::new(BookingStatus::Cancelled, now);
        update.cancelled_by = Some(CancelledBy::System);
        if queries::transition_booking(conn, booking_id, BookingStatus::Pending, &update)? == 0 {
            return Ok(None);
        }
        queries::insert_transition(
            conn,
            &TransitionRow {
                id: Uuid::new_v4(),
                booking_id,
                from_status: BookingStatus::Pending,
                to_status: BookingStatus::Cancelled,
                actor_id: None,
                request_id: None,
                created_at: now,
            },
        )?;

        let penalty = self.policy.expiry_penalty;
        if penalty > 0 {
            let row = ledger::debit(
                conn,
                Posting::new(booking.host_id, PointsTransactionType::Penalty, "Booking request expired without a response")
                    .for_booking(booking_id),
                penalty,
                now,
            )?;
            outbox.inserted(ChangeRecord::PointsTransaction(row));

            let row = ledger::credit(
                conn,
                Posting::new(booking.guest_id, PointsTransactionType::Compensation, "Host did not respond in time")
                    .for_booking(booking_id),
                penalty,
                now,
            )?;
            outbox.inserted(ChangeRecord::PointsTransaction(row));
        }

        if booking.points_cost > 0 {
            let row = ledger::credit(
                conn,
                Posting::new(booking.guest_id, PointsTransactionType::BookingRefund, "Refund for expired request")
                    .for_booking(booking_id),
                booking.points_cost,
                now,
            )?;
            outbox.inserted(ChangeRecord::PointsTransaction(row));
        }

        notify(
            conn,
            outbox,
            booking.guest_id,
            NotificationType::BookingExpired,
            format!("The host did not respond in time. You received {penalty} points compensation."),
            booking_id,
            now,
        )?;
        notify(
            conn,
            outbox,
            booking.host_id,
            NotificationType::BookingExpired,
            format!("A booking request expired without a response. {penalty} points were deducted."),
            booking_id,
            now,
        )?;

        let expired = queries::get_booking(conn, booking_id)?
            .ok_or(BookingError::NotFound { entity: "booking", id: booking_id })?;
        outbox.updated(ChangeRecord::Booking(expired.clone()));

        info!(%booking_id, host_id = %booking.host_id, "booking expired");
        Ok(Some(expired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deadline_is_creation_plus_window() {
        let scheduler = DeadlineScheduler::new(BookingPolicy {
            response_window: Duration::hours(12),
            ..BookingPolicy::default()
        });
        let created = Utc.with_ymd_and_hms(2026, 8, 20, 10, 0, 0).unwrap();
        assert_eq!(scheduler.deadline_for(created), created + Duration::hours(12));
    }

    #[test]
    fn default_policy() {
        let policy = BookingPolicy::default();
        assert_eq!(policy.response_window, Duration::hours(48));
        assert_eq!(policy.expiry_penalty, 30);
        assert_eq!(policy.default_cancel_penalty, 30);
    }
}
