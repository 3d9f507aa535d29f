//! Booking lifecycle state machine.
//!
//! ```text
//! pending   -> accepted | rejected | cancelled
//! accepted  -> confirmed | cancelled
//! confirmed -> completed | cancelled
//! ```
//!
//! Every transition is one immediate transaction: a conditional
//! `UPDATE ... WHERE status = ?from`, a `booking_transitions` row, and all
//! ledger and notification side effects. Change events go out after commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{error, info, warn};
use uuid::Uuid;

use pitstay_db::models::TransitionRow;
use pitstay_db::queries::{self, StatusUpdate};
use pitstay_db::Database;
use pitstay_types::api::{
    BookingResponse, CancelRequest, CreateBookingRequest, RespondRequest, TransitionGuard,
};
use pitstay_types::events::{ChangeRecord, ChangeSink};
use pitstay_types::models::{
    Booking, BookingStatus, Conversation, HostResponse, NotificationType, Party,
    PointsTransactionType,
};

use crate::clock::Clock;
use crate::deadline::{BookingPolicy, DeadlineScheduler};
use crate::error::{BookingError, Result};
use crate::ledger::{self, Posting};
use crate::notifications::notify;
use crate::outbox::Outbox;

pub const MAX_REQUEST_MESSAGE_LEN: usize = 1000;

/// Statuses reachable from `from` in one step.
pub fn allowed_targets(from: BookingStatus) -> &'static [BookingStatus] {
    use BookingStatus::*;
    match from {
        Pending => &[Accepted, Rejected, Cancelled],
        Accepted => &[Confirmed, Cancelled],
        Confirmed => &[Completed, Cancelled],
        Rejected | Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// One requested status change.
struct Transition<'a> {
    booking_id: Uuid,
    actor_id: Uuid,
    acting_as: Party,
    to: BookingStatus,
    guard: &'a TransitionGuard,
}

pub struct BookingEngine {
    db: Arc<Database>,
    sink: Arc<dyn ChangeSink>,
    clock: Arc<dyn Clock>,
    scheduler: DeadlineScheduler,
}

impl BookingEngine {
    pub fn new(
        db: Arc<Database>,
        sink: Arc<dyn ChangeSink>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self { db, sink, clock, scheduler: DeadlineScheduler::new(policy) }
    }

    pub fn scheduler(&self) -> &DeadlineScheduler {
        &self.scheduler
    }

    // -- Reads --

    pub fn get_booking(&self, user_id: Uuid, booking_id: Uuid) -> Result<Booking> {
        let booking = self
            .db
            .get_booking(booking_id)?
            .ok_or(BookingError::NotFound { entity: "booking", id: booking_id })?;
        if !booking.is_party(user_id) {
            return Err(BookingError::unauthorized("not a party to this booking"));
        }
        Ok(booking)
    }

    pub fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        Ok(self.db.get_bookings_for_user(user_id)?)
    }

    // -- Creation --

    /// Create a `pending` request. The guest pays `points_cost` now; every
    /// path out of the booking that does not end in `completed` refunds it.
    pub fn request_booking(&self, guest_id: Uuid, req: CreateBookingRequest) -> Result<Booking> {
        validate_request(guest_id, &req)?;

        let now = self.clock.now();
        let booking = Booking {
            id: Uuid::new_v4(),
            guest_id,
            host_id: req.host_id,
            race_id: req.race_id,
            property_id: req.property_id,
            status: BookingStatus::Pending,
            check_in_date: req.check_in_date,
            check_out_date: req.check_out_date,
            guests_count: req.guests_count,
            points_cost: req.points_cost,
            request_message: req.request_message.filter(|m| !m.trim().is_empty()),
            host_response_message: None,
            host_response_deadline: self.scheduler.deadline_for(now),
            accepted_at: None,
            rejected_at: None,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };

        let mut outbox = Outbox::default();
        self.db.with_tx(|tx| -> Result<()> {
            queries::insert_booking(tx, &booking)?;
            outbox.inserted(ChangeRecord::Booking(booking.clone()));

            if booking.points_cost > 0 {
                let row = ledger::debit(
                    tx,
                    Posting::new(guest_id, PointsTransactionType::BookingPayment, "Booking request")
                        .for_booking(booking.id),
                    booking.points_cost,
                    now,
                )?;
                outbox.inserted(ChangeRecord::PointsTransaction(row));
            }

            queries::insert_conversation(
                tx,
                &Conversation {
                    id: Uuid::new_v4(),
                    booking_id: booking.id,
                    participant_1_id: booking.guest_id,
                    participant_2_id: booking.host_id,
                    last_message_at: None,
                    participant_1_unread: 0,
                    participant_2_unread: 0,
                },
            )?;

            notify(
                tx,
                &mut outbox,
                booking.host_id,
                NotificationType::BookingRequest,
                format!(
                    "New request for {} guest(s), {} to {}",
                    booking.guests_count, booking.check_in_date, booking.check_out_date
                ),
                booking.id,
                now,
            )?;
            Ok(())
        })?;
        outbox.flush(self.sink.as_ref());

        info!(booking_id = %booking.id, %guest_id, host_id = %booking.host_id, cost = booking.points_cost, "booking requested");
        Ok(booking)
    }

    // -- Transitions --

    /// Host answers a pending request before its deadline.
    pub fn respond(
        &self,
        host_id: Uuid,
        booking_id: Uuid,
        req: &RespondRequest,
    ) -> Result<BookingResponse> {
        let to = match req.response {
            HostResponse::Accepted => BookingStatus::Accepted,
            HostResponse::Rejected => BookingStatus::Rejected,
        };
        let message = req.message.clone().filter(|m| !m.trim().is_empty());

        self.transition(
            Transition { booking_id, actor_id: host_id, acting_as: Party::Host, to, guard: &req.guard },
            |booking, update| {
                if update.at >= booking.host_response_deadline {
                    return Err(BookingError::Expired { deadline: booking.host_response_deadline });
                }
                update.host_response_message = message;
                Ok(())
            },
            |conn, outbox, booking, now| match req.response {
                HostResponse::Accepted => {
                    notify(
                        conn,
                        outbox,
                        booking.guest_id,
                        NotificationType::BookingAccepted,
                        "Your booking request was accepted. Waiting for the host to confirm.".into(),
                        booking.id,
                        now,
                    )?;
                    Ok(())
                }
                HostResponse::Rejected => {
                    refund_guest(conn, outbox, booking, booking.points_cost, "Refund for declined request", now)?;
                    notify(
                        conn,
                        outbox,
                        booking.guest_id,
                        NotificationType::BookingRejected,
                        "Your booking request was declined. Your points were refunded.".into(),
                        booking.id,
                        now,
                    )?;
                    Ok(())
                }
            },
        )
    }

    /// `accepted -> confirmed`, host only. No ledger effect.
    pub fn confirm(
        &self,
        host_id: Uuid,
        booking_id: Uuid,
        guard: &TransitionGuard,
    ) -> Result<BookingResponse> {
        self.transition(
            Transition {
                booking_id,
                actor_id: host_id,
                acting_as: Party::Host,
                to: BookingStatus::Confirmed,
                guard,
            },
            |_, _| Ok(()),
            |conn, outbox, booking, now| {
                notify(
                    conn,
                    outbox,
                    booking.guest_id,
                    NotificationType::BookingConfirmed,
                    "Your stay is confirmed.".into(),
                    booking.id,
                    now,
                )?;
                Ok(())
            },
        )
    }

    /// Cancel from any non-terminal status. The caller states the side they
    /// act for and must actually be that party.
    pub fn cancel(
        &self,
        actor_id: Uuid,
        booking_id: Uuid,
        req: &CancelRequest,
    ) -> Result<BookingResponse> {
        let party = req.cancelled_by;
        let default_penalty = self.scheduler.policy().default_cancel_penalty;

        self.transition(
            Transition {
                booking_id,
                actor_id,
                acting_as: party,
                to: BookingStatus::Cancelled,
                guard: &req.guard,
            },
            |_, update| {
                update.cancelled_by = Some(party.into());
                Ok(())
            },
            |conn, outbox, booking, now| {
                let host_after_accept = party == Party::Host && booking.status != BookingStatus::Pending;
                if host_after_accept {
                    let penalty = if booking.points_cost > 0 {
                        booking.points_cost
                    } else {
                        default_penalty
                    };
                    if penalty > 0 {
                        let row = ledger::debit(
                            conn,
                            Posting::new(booking.host_id, PointsTransactionType::Penalty, "Host cancelled an accepted booking")
                                .for_booking(booking.id),
                            penalty,
                            now,
                        )?;
                        outbox.inserted(ChangeRecord::PointsTransaction(row));
                    }
                    refund_guest(conn, outbox, booking, penalty, "Host cancelled your booking", now)?;
                    notify(
                        conn,
                        outbox,
                        booking.host_id,
                        NotificationType::PointsPenalty,
                        format!("{penalty} points were deducted for cancelling an accepted booking."),
                        booking.id,
                        now,
                    )?;
                } else {
                    refund_guest(conn, outbox, booking, booking.points_cost, "Refund for cancelled booking", now)?;
                }

                let (recipient, text) = match party {
                    Party::Guest => (booking.host_id, "The guest cancelled the booking."),
                    Party::Host => (booking.guest_id, "The host cancelled the booking. Your points were refunded."),
                };
                notify(conn, outbox, recipient, NotificationType::BookingCancelled, text.into(), booking.id, now)?;
                Ok(())
            },
        )
    }

    /// `confirmed -> completed`, host only. The single payout point.
    pub fn complete(
        &self,
        host_id: Uuid,
        booking_id: Uuid,
        guard: &TransitionGuard,
    ) -> Result<BookingResponse> {
        self.transition(
            Transition {
                booking_id,
                actor_id: host_id,
                acting_as: Party::Host,
                to: BookingStatus::Completed,
                guard,
            },
            |_, _| Ok(()),
            |conn, outbox, booking, now| {
                if booking.points_cost > 0 {
                    let row = ledger::credit(
                        conn,
                        Posting::new(booking.host_id, PointsTransactionType::BookingEarning, "Hosted a stay")
                            .for_booking(booking.id),
                        booking.points_cost,
                        now,
                    )?;
                    outbox.inserted(ChangeRecord::PointsTransaction(row));
                    notify(
                        conn,
                        outbox,
                        booking.host_id,
                        NotificationType::PointsEarned,
                        format!("You earned {} points for hosting.", booking.points_cost),
                        booking.id,
                        now,
                    )?;
                }
                notify(
                    conn,
                    outbox,
                    booking.guest_id,
                    NotificationType::BookingCompleted,
                    "Your stay is complete.".into(),
                    booking.id,
                    now,
                )?;
                Ok(())
            },
        )
    }

    /// Expire every pending booking past its deadline. Each booking is its
    /// own transaction; one failure does not stop the rest.
    pub fn sweep(&self) -> Result<Vec<Uuid>> {
        let now = self.clock.now();
        let due = self.db.with_conn(|conn| queries::overdue_pending(conn, now))?;

        let mut expired = Vec::with_capacity(due.len());
        for booking_id in due {
            let mut outbox = Outbox::default();
            let result = self
                .db
                .with_tx(|tx| self.scheduler.expire(tx, &mut outbox, booking_id, now));
            match result {
                Ok(Some(_)) => {
                    outbox.flush(self.sink.as_ref());
                    expired.push(booking_id);
                }
                Ok(None) => {}
                Err(e) => error!(%booking_id, "failed to expire booking: {}", e),
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired overdue bookings");
        }
        Ok(expired)
    }

    fn transition<P, E>(&self, t: Transition<'_>, prepare: P, effects: E) -> Result<BookingResponse>
    where
        P: FnOnce(&Booking, &mut StatusUpdate) -> Result<()>,
        E: FnOnce(&Connection, &mut Outbox, &Booking, DateTime<Utc>) -> Result<()>,
    {
        let now = self.clock.now();
        let mut outbox = Outbox::default();

        let response = self.db.with_tx(|tx| -> Result<BookingResponse> {
            let booking = queries::get_booking(tx, t.booking_id)?
                .ok_or(BookingError::NotFound { entity: "booking", id: t.booking_id })?;

            if booking.party_of(t.actor_id) != Some(t.acting_as) {
                return Err(BookingError::unauthorized(format!(
                    "only the {} of this booking may do that",
                    t.acting_as
                )));
            }

            if let Some(request_id) = t.guard.request_id.as_deref() {
                if queries::find_transition_by_request(tx, booking.id, request_id)?.is_some() {
                    return Ok(BookingResponse { booking, replayed: true });
                }
            }

            if let Some(expected) = t.guard.expected_status {
                if expected != booking.status {
                    return Err(BookingError::Conflict { expected, actual: booking.status });
                }
            }

            let from = booking.status;
            if !can_transition(from, t.to) {
                return Err(BookingError::InvalidTransition { from, to: t.to });
            }

            let mut update = StatusUpdate::new(t.to, now);
            prepare(&booking, &mut update)?;

            if queries::transition_booking(tx, booking.id, from, &update)? == 0 {
                let actual = queries::get_booking(tx, booking.id)?.map_or(from, |b| b.status);
                return Err(BookingError::Conflict { expected: from, actual });
            }
            queries::insert_transition(
                tx,
                &TransitionRow {
                    id: Uuid::new_v4(),
                    booking_id: booking.id,
                    from_status: from,
                    to_status: t.to,
                    actor_id: Some(t.actor_id),
                    request_id: t.guard.request_id.clone(),
                    created_at: now,
                },
            )?;

            effects(&**tx, &mut outbox, &booking, now)?;

            let updated = queries::get_booking(tx, booking.id)?
                .ok_or(BookingError::NotFound { entity: "booking", id: booking.id })?;
            outbox.updated(ChangeRecord::Booking(updated.clone()));
            Ok(BookingResponse { booking: updated, replayed: false })
        });

        match &response {
            Ok(r) if r.replayed => {
                info!(booking_id = %t.booking_id, to = %t.to, "transition replayed");
            }
            Ok(r) => {
                info!(booking_id = %t.booking_id, status = %r.booking.status, actor = %t.actor_id, "booking transitioned");
            }
            Err(BookingError::Server(e)) => {
                error!(booking_id = %t.booking_id, "transition failed: {:#}", e);
            }
            Err(e) => {
                warn!(booking_id = %t.booking_id, to = %t.to, "transition refused: {}", e);
            }
        }

        let response = response?;
        outbox.flush(self.sink.as_ref());
        Ok(response)
    }
}

fn refund_guest(
    conn: &Connection,
    outbox: &mut Outbox,
    booking: &Booking,
    amount: i64,
    description: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if amount <= 0 {
        return Ok(());
    }
    let row = ledger::credit(
        conn,
        Posting::new(booking.guest_id, PointsTransactionType::BookingRefund, description)
            .for_booking(booking.id),
        amount,
        now,
    )?;
    outbox.inserted(ChangeRecord::PointsTransaction(row));
    Ok(())
}

fn validate_request(guest_id: Uuid, req: &CreateBookingRequest) -> Result<()> {
    if req.host_id == guest_id {
        return Err(BookingError::validation("cannot book your own property"));
    }
    if req.check_out_date <= req.check_in_date {
        return Err(BookingError::validation("check-out must be after check-in"));
    }
    if req.guests_count < 1 {
        return Err(BookingError::validation("at least one guest is required"));
    }
    if req.points_cost < 0 {
        return Err(BookingError::validation("points cost cannot be negative"));
    }
    if req
        .request_message
        .as_ref()
        .is_some_and(|m| m.chars().count() > MAX_REQUEST_MESSAGE_LEN)
    {
        return Err(BookingError::validation("request message is too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for status in BookingStatus::ALL {
            assert_eq!(status.is_terminal(), allowed_targets(*status).is_empty());
        }
    }

    #[test]
    fn no_skipping() {
        assert!(can_transition(Pending, Accepted));
        assert!(can_transition(Accepted, Confirmed));
        assert!(can_transition(Confirmed, Completed));
        assert!(!can_transition(Pending, Confirmed));
        assert!(!can_transition(Pending, Completed));
        assert!(!can_transition(Accepted, Completed));
        assert!(!can_transition(Accepted, Rejected));
        assert!(!can_transition(Confirmed, Accepted));
    }

    #[test]
    fn cancel_is_reachable_from_every_live_state() {
        for status in BookingStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(can_transition(*status, Cancelled), "{status}");
        }
    }

    #[test]
    fn request_validation() {
        let guest = Uuid::new_v4();
        let base = CreateBookingRequest {
            host_id: Uuid::new_v4(),
            race_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            check_in_date: chrono::NaiveDate::from_ymd_opt(2026, 9, 10).unwrap(),
            check_out_date: chrono::NaiveDate::from_ymd_opt(2026, 9, 12).unwrap(),
            guests_count: 1,
            points_cost: 10,
            request_message: None,
        };
        assert!(validate_request(guest, &base).is_ok());

        let own = CreateBookingRequest { host_id: guest, ..base.clone() };
        assert!(validate_request(guest, &own).is_err());

        let backwards = CreateBookingRequest { check_out_date: base.check_in_date, ..base.clone() };
        assert!(validate_request(guest, &backwards).is_err());

        let empty = CreateBookingRequest { guests_count: 0, ..base.clone() };
        assert!(validate_request(guest, &empty).is_err());

        let negative = CreateBookingRequest { points_cost: -1, ..base };
        assert!(validate_request(guest, &negative).is_err());
    }
}
