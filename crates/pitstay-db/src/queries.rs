//! Queries. Free functions take a `&Connection` so the booking engine can run
//! several of them inside one transaction; `impl Database` wraps the
//! read paths used outside transactions.

use crate::Database;
use crate::models::{
    BOOKING_COLUMNS, CONVERSATION_COLUMNS, MESSAGE_COLUMNS, NOTIFICATION_COLUMNS, POINTS_COLUMNS,
    TRANSITION_COLUMNS, TransitionRow, UserRow, booking_from_row, conversation_from_row,
    message_from_row, notification_from_row, points_from_row, sql_time, transition_from_row,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use pitstay_types::models::{
    Booking, BookingStatus, CancelledBy, Conversation, Message, Notification, Party,
    PointsTransaction,
};
use rusqlite::{Connection, params};
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), username, password_hash, sql_time(&Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    // -- Bookings --

    pub fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        self.with_conn(|conn| get_booking(conn, id))
    }

    pub fn get_bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        self.with_conn(|conn| list_bookings_for_user(conn, user_id))
    }

    pub fn get_transitions(&self, booking_id: Uuid) -> Result<Vec<TransitionRow>> {
        self.with_conn(|conn| list_transitions(conn, booking_id))
    }

    // -- Points --

    pub fn get_balance(&self, user_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| balance(conn, user_id))
    }

    pub fn get_points_history(&self, user_id: Uuid, limit: u32) -> Result<Vec<PointsTransaction>> {
        self.with_conn(|conn| list_points_transactions(conn, user_id, limit))
    }

    pub fn get_points_for_booking(&self, booking_id: Uuid) -> Result<Vec<PointsTransaction>> {
        self.with_conn(|conn| points_for_booking(conn, booking_id))
    }

    // -- Messages --

    pub fn get_messages(&self, booking_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| list_messages(conn, booking_id, limit))
    }

    pub fn get_conversation(&self, booking_id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| conversation_for_booking(conn, booking_id))
    }

    // -- Notifications --

    pub fn get_notifications(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        self.with_conn(|conn| list_notifications(conn, user_id, limit))
    }

    pub fn get_unread_count(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| count_unread_notifications(conn, user_id))
    }
}

// -- Users --

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

// -- Bookings --

pub fn insert_booking(conn: &Connection, b: &Booking) -> Result<()> {
    let sql = format!(
        "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
    );
    conn.execute(
        &sql,
        params![
            b.id.to_string(),
            b.guest_id.to_string(),
            b.host_id.to_string(),
            b.race_id.to_string(),
            b.property_id.to_string(),
            b.status.as_str(),
            b.check_in_date.to_string(),
            b.check_out_date.to_string(),
            b.guests_count,
            b.points_cost,
            b.request_message,
            b.host_response_message,
            sql_time(&b.host_response_deadline),
            b.accepted_at.as_ref().map(sql_time),
            b.rejected_at.as_ref().map(sql_time),
            b.confirmed_at.as_ref().map(sql_time),
            b.completed_at.as_ref().map(sql_time),
            b.cancelled_at.as_ref().map(sql_time),
            b.cancelled_by.map(|c| c.as_str()),
            sql_time(&b.created_at),
            sql_time(&b.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: Uuid) -> Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], booking_from_row)
        .optional()?;
    Ok(row)
}

/// Bookings where the user is guest or host, newest first.
pub fn list_bookings_for_user(conn: &Connection, user_id: Uuid) -> Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE guest_id = ?1 OR host_id = ?1
         ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id.to_string()], booking_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids of `pending` bookings whose response deadline is at or before `now`.
pub fn overdue_pending(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings
         WHERE status = ?1 AND host_response_deadline <= ?2
         ORDER BY host_response_deadline",
    )?;
    let ids = stmt
        .query_map(params![BookingStatus::Pending.as_str(), sql_time(&now)], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    ids.into_iter()
        .map(|id| Uuid::parse_str(&id).map_err(anyhow::Error::from))
        .collect()
}

/// Field changes applied together with a status change.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
    pub host_response_message: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
}

impl StatusUpdate {
    pub fn new(to: BookingStatus, at: DateTime<Utc>) -> Self {
        Self { to, at, host_response_message: None, cancelled_by: None }
    }
}

fn stamp_column(status: BookingStatus) -> Option<&'static str> {
    match status {
        BookingStatus::Pending => None,
        BookingStatus::Accepted => Some("accepted_at"),
        BookingStatus::Rejected => Some("rejected_at"),
        BookingStatus::Confirmed => Some("confirmed_at"),
        BookingStatus::Completed => Some("completed_at"),
        BookingStatus::Cancelled => Some("cancelled_at"),
    }
}

/// Conditional status change. Returns the number of rows changed: 1 if the
/// booking was still in `expected`, 0 if another writer got there first.
pub fn transition_booking(
    conn: &Connection,
    id: Uuid,
    expected: BookingStatus,
    update: &StatusUpdate,
) -> Result<usize> {
    let at = sql_time(&update.at);
    let stamp = stamp_column(update.to)
        .map(|col| format!(", {col} = ?3"))
        .unwrap_or_default();
    let sql = format!(
        "UPDATE bookings SET status = ?1, updated_at = ?3{stamp},
             host_response_message = COALESCE(?4, host_response_message),
             cancelled_by = COALESCE(?5, cancelled_by)
         WHERE id = ?2 AND status = ?6"
    );
    let changed = conn.execute(
        &sql,
        params![
            update.to.as_str(),
            id.to_string(),
            at,
            update.host_response_message,
            update.cancelled_by.map(|c| c.as_str()),
            expected.as_str(),
        ],
    )?;
    Ok(changed)
}

// -- Transitions --

pub fn insert_transition(conn: &Connection, t: &TransitionRow) -> Result<()> {
    let sql = format!("INSERT INTO booking_transitions ({TRANSITION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
    conn.execute(
        &sql,
        params![
            t.id.to_string(),
            t.booking_id.to_string(),
            t.from_status.as_str(),
            t.to_status.as_str(),
            t.actor_id.map(|a| a.to_string()),
            t.request_id,
            sql_time(&t.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_transition_by_request(
    conn: &Connection,
    booking_id: Uuid,
    request_id: &str,
) -> Result<Option<TransitionRow>> {
    let sql = format!(
        "SELECT {TRANSITION_COLUMNS} FROM booking_transitions
         WHERE booking_id = ?1 AND request_id = ?2"
    );
    let row = conn
        .query_row(&sql, params![booking_id.to_string(), request_id], transition_from_row)
        .optional()?;
    Ok(row)
}

/// Applied transitions of one booking, oldest first.
pub fn list_transitions(conn: &Connection, booking_id: Uuid) -> Result<Vec<TransitionRow>> {
    let sql = format!(
        "SELECT {TRANSITION_COLUMNS} FROM booking_transitions
         WHERE booking_id = ?1 ORDER BY created_at, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([booking_id.to_string()], transition_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Points --

pub fn insert_points_transaction(conn: &Connection, t: &PointsTransaction) -> Result<()> {
    let sql = format!("INSERT INTO points_transactions ({POINTS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
    conn.execute(
        &sql,
        params![
            t.id.to_string(),
            t.user_id.to_string(),
            t.booking_id.map(|b| b.to_string()),
            t.amount,
            t.kind.as_str(),
            t.description,
            sql_time(&t.created_at),
        ],
    )?;
    Ok(())
}

/// Sum of the user's ledger. Zero for a user with no rows.
pub fn balance(conn: &Connection, user_id: Uuid) -> Result<i64> {
    let sum = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM points_transactions WHERE user_id = ?1",
        [user_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(sum)
}

/// Newest first.
pub fn list_points_transactions(
    conn: &Connection,
    user_id: Uuid,
    limit: u32,
) -> Result<Vec<PointsTransaction>> {
    let sql = format!(
        "SELECT {POINTS_COLUMNS} FROM points_transactions
         WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id.to_string(), limit], points_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every ledger row tied to one booking, in insertion order.
pub fn points_for_booking(conn: &Connection, booking_id: Uuid) -> Result<Vec<PointsTransaction>> {
    let sql = format!(
        "SELECT {POINTS_COLUMNS} FROM points_transactions
         WHERE booking_id = ?1 ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([booking_id.to_string()], points_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Conversations --

pub fn insert_conversation(conn: &Connection, c: &Conversation) -> Result<()> {
    let sql = format!("INSERT INTO conversations ({CONVERSATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)");
    conn.execute(
        &sql,
        params![
            c.id.to_string(),
            c.booking_id.to_string(),
            c.participant_1_id.to_string(),
            c.participant_2_id.to_string(),
            c.last_message_at.as_ref().map(sql_time),
            c.participant_1_unread,
            c.participant_2_unread,
        ],
    )?;
    Ok(())
}

pub fn conversation_for_booking(conn: &Connection, booking_id: Uuid) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE booking_id = ?1");
    let row = conn
        .query_row(&sql, [booking_id.to_string()], conversation_from_row)
        .optional()?;
    Ok(row)
}

fn unread_column(party: Party) -> &'static str {
    match party {
        Party::Guest => "participant_1_unread",
        Party::Host => "participant_2_unread",
    }
}

/// Record a new message: move `last_message_at` and bump the recipient's
/// unread counter.
pub fn bump_conversation(
    conn: &Connection,
    booking_id: Uuid,
    recipient: Party,
    at: DateTime<Utc>,
) -> Result<()> {
    let col = unread_column(recipient);
    let sql = format!(
        "UPDATE conversations SET last_message_at = ?2, {col} = {col} + 1 WHERE booking_id = ?1"
    );
    conn.execute(&sql, params![booking_id.to_string(), sql_time(&at)])?;
    Ok(())
}

pub fn reset_unread(conn: &Connection, booking_id: Uuid, reader: Party) -> Result<()> {
    let col = unread_column(reader);
    let sql = format!("UPDATE conversations SET {col} = 0 WHERE booking_id = ?1");
    conn.execute(&sql, [booking_id.to_string()])?;
    Ok(())
}

// -- Messages --

pub fn insert_message(conn: &Connection, m: &Message) -> Result<()> {
    let sql = format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)");
    conn.execute(
        &sql,
        params![
            m.id.to_string(),
            m.booking_id.to_string(),
            m.sender_id.to_string(),
            m.message,
            m.message_type.as_str(),
            m.client_ref,
            m.read,
            sql_time(&m.created_at),
        ],
    )?;
    Ok(())
}

pub fn message_by_client_ref(
    conn: &Connection,
    sender_id: Uuid,
    client_ref: &str,
) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = ?1 AND client_ref = ?2");
    let row = conn
        .query_row(&sql, params![sender_id.to_string(), client_ref], message_from_row)
        .optional()?;
    Ok(row)
}

/// The most recent `limit` messages of a booking, in chronological order.
pub fn list_messages(conn: &Connection, booking_id: Uuid, limit: u32) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE booking_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params![booking_id.to_string(), limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.reverse();
    Ok(rows)
}

/// Mark every message in the booking not sent by `reader` as read. Returns
/// the rows that flipped.
pub fn mark_messages_read(conn: &Connection, booking_id: Uuid, reader: Uuid) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE booking_id = ?1 AND sender_id != ?2 AND read = 0 ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params![booking_id.to_string(), reader.to_string()], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    conn.execute(
        "UPDATE messages SET read = 1 WHERE booking_id = ?1 AND sender_id != ?2 AND read = 0",
        params![booking_id.to_string(), reader.to_string()],
    )?;

    for m in &mut rows {
        m.read = true;
    }
    Ok(rows)
}

// -- Notifications --

pub fn insert_notification(conn: &Connection, n: &Notification) -> Result<()> {
    let sql = format!("INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)");
    conn.execute(
        &sql,
        params![
            n.id.to_string(),
            n.user_id.to_string(),
            n.kind.as_str(),
            n.title,
            n.message,
            n.read,
            n.data.to_string(),
            sql_time(&n.created_at),
            sql_time(&n.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_notification(conn: &Connection, id: Uuid) -> Result<Option<Notification>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], notification_from_row)
        .optional()?;
    Ok(row)
}

/// Newest first.
pub fn list_notifications(conn: &Connection, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id.to_string(), limit], notification_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_unread_notifications(conn: &Connection, user_id: Uuid) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
        [user_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Flip one notification to read. Returns 0 when it was already read.
pub fn mark_notification_read(conn: &Connection, id: Uuid, at: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1, updated_at = ?2 WHERE id = ?1 AND read = 0",
        params![id.to_string(), sql_time(&at)],
    )?;
    Ok(changed)
}

/// Flip every unread notification of the user. Returns the updated rows.
pub fn mark_all_notifications_read(
    conn: &Connection,
    user_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE user_id = ?1 AND read = 0 ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map([user_id.to_string()], notification_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    conn.execute(
        "UPDATE notifications SET read = 1, updated_at = ?2 WHERE user_id = ?1 AND read = 0",
        params![user_id.to_string(), sql_time(&at)],
    )?;

    for n in &mut rows {
        n.read = true;
        n.updated_at = at;
    }
    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
