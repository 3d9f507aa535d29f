//! Append-only points ledger. A balance is always `SUM(amount)` over the
//! user's rows, recomputed on every read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use pitstay_db::{Database, queries};
use pitstay_types::events::{ChangeRecord, ChangeSink};
use pitstay_types::models::{PointsTransaction, PointsTransactionType};

use crate::clock::Clock;
use crate::error::{BookingError, Result};
use crate::outbox::Outbox;

pub const MAX_HISTORY: u32 = 200;

/// Who a ledger row is for and why. The amount is given separately so the
/// sign is decided by `credit`/`debit`, never by the caller.
#[derive(Debug, Clone)]
pub struct Posting {
    pub user_id: Uuid,
    pub kind: PointsTransactionType,
    pub booking_id: Option<Uuid>,
    pub description: String,
}

impl Posting {
    pub fn new(user_id: Uuid, kind: PointsTransactionType, description: impl Into<String>) -> Self {
        Self { user_id, kind, booking_id: None, description: description.into() }
    }

    pub fn for_booking(mut self, booking_id: Uuid) -> Self {
        self.booking_id = Some(booking_id);
        self
    }
}

/// Append `+amount` for the posting's user. Runs on the caller's connection
/// so it commits or rolls back with the surrounding transaction.
pub fn credit(
    conn: &Connection,
    posting: Posting,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<PointsTransaction> {
    if amount <= 0 {
        return Err(BookingError::validation("credit amount must be positive"));
    }
    append(conn, posting, amount, at)
}

/// Append `-amount`. Only a `penalty` may take the balance below zero; any
/// other debit is checked against the balance as it stands inside this
/// transaction.
pub fn debit(
    conn: &Connection,
    posting: Posting,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<PointsTransaction> {
    if amount <= 0 {
        return Err(BookingError::validation("debit amount must be positive"));
    }
    if posting.kind != PointsTransactionType::Penalty {
        let balance = queries::balance(conn, posting.user_id)?;
        if balance < amount {
            return Err(BookingError::InsufficientPoints { balance, required: amount });
        }
    }
    append(conn, posting, -amount, at)
}

fn append(
    conn: &Connection,
    posting: Posting,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<PointsTransaction> {
    let row = PointsTransaction {
        id: Uuid::new_v4(),
        user_id: posting.user_id,
        booking_id: posting.booking_id,
        amount,
        kind: posting.kind,
        description: posting.description,
        created_at: at,
    };
    queries::insert_points_transaction(conn, &row)?;
    Ok(row)
}

/// Read side of the ledger plus reputation awards.
pub struct PointsLedger {
    db: Arc<Database>,
    sink: Arc<dyn ChangeSink>,
    clock: Arc<dyn Clock>,
}

impl PointsLedger {
    pub fn new(db: Arc<Database>, sink: Arc<dyn ChangeSink>, clock: Arc<dyn Clock>) -> Self {
        Self { db, sink, clock }
    }

    pub fn get_balance(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.db.get_balance(user_id)?)
    }

    /// Newest first, at most `MAX_HISTORY` rows.
    pub fn history(&self, user_id: Uuid, limit: u32) -> Result<Vec<PointsTransaction>> {
        Ok(self.db.get_points_history(user_id, limit.clamp(1, MAX_HISTORY))?)
    }

    /// Grant a reputation bonus. Booking-related types are rejected; those
    /// rows are only written by the booking engine.
    pub fn award(
        &self,
        user_id: Uuid,
        kind: PointsTransactionType,
        amount: i64,
        description: &str,
    ) -> Result<PointsTransaction> {
        if !kind.is_bonus() {
            return Err(BookingError::validation(format!("{kind} is not an award type")));
        }
        let now = self.clock.now();
        let mut outbox = Outbox::default();
        let row = self.db.with_tx(|tx| {
            let row = credit(tx, Posting::new(user_id, kind, description), amount, now)?;
            outbox.inserted(ChangeRecord::PointsTransaction(row.clone()));
            Ok::<_, BookingError>(row)
        })?;
        outbox.flush(self.sink.as_ref());

        info!(%user_id, %kind, amount, "points awarded");
        Ok(row)
    }
}
