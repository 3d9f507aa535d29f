//! Row mapping between SQLite and the shared domain types.
//!
//! Ids are stored as hyphenated UUID text. Timestamps are stored as
//! fixed-width RFC 3339 UTC strings with microsecond precision, so string
//! comparison in SQL orders them chronologically.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use pitstay_types::models::{
    Booking, BookingStatus, Conversation, Message, Notification, PointsTransaction,
};

pub const BOOKING_COLUMNS: &str = "id, guest_id, host_id, race_id, property_id, status, \
     check_in_date, check_out_date, guests_count, points_cost, request_message, \
     host_response_message, host_response_deadline, accepted_at, rejected_at, confirmed_at, \
     completed_at, cancelled_at, cancelled_by, created_at, updated_at";

pub const POINTS_COLUMNS: &str = "id, user_id, booking_id, amount, type, description, created_at";

pub const CONVERSATION_COLUMNS: &str = "id, booking_id, participant_1_id, participant_2_id, \
     last_message_at, participant_1_unread, participant_2_unread";

pub const MESSAGE_COLUMNS: &str =
    "id, booking_id, sender_id, message, message_type, client_ref, read, created_at";

pub const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, title, message, read, data, created_at, updated_at";

pub const TRANSITION_COLUMNS: &str =
    "id, booking_id, from_status, to_status, actor_id, request_id, created_at";

/// Render a timestamp in the storage format.
pub fn sql_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_sql_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e))).transpose()
}

fn time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_sql_time(&raw).map_err(|e| conversion_error(idx, e))
}

fn time_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_sql_time(&s).map_err(|e| conversion_error(idx, e))).transpose()
}

pub fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: parsed(row, 0)?,
        guest_id: parsed(row, 1)?,
        host_id: parsed(row, 2)?,
        race_id: parsed(row, 3)?,
        property_id: parsed(row, 4)?,
        status: parsed(row, 5)?,
        check_in_date: parsed::<NaiveDate>(row, 6)?,
        check_out_date: parsed::<NaiveDate>(row, 7)?,
        guests_count: row.get(8)?,
        points_cost: row.get(9)?,
        request_message: row.get(10)?,
        host_response_message: row.get(11)?,
        host_response_deadline: time(row, 12)?,
        accepted_at: time_opt(row, 13)?,
        rejected_at: time_opt(row, 14)?,
        confirmed_at: time_opt(row, 15)?,
        completed_at: time_opt(row, 16)?,
        cancelled_at: time_opt(row, 17)?,
        cancelled_by: parsed_opt(row, 18)?,
        created_at: time(row, 19)?,
        updated_at: time(row, 20)?,
    })
}

pub fn points_from_row(row: &Row<'_>) -> rusqlite::Result<PointsTransaction> {
    Ok(PointsTransaction {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        booking_id: parsed_opt(row, 2)?,
        amount: row.get(3)?,
        kind: parsed(row, 4)?,
        description: row.get(5)?,
        created_at: time(row, 6)?,
    })
}

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: parsed(row, 0)?,
        booking_id: parsed(row, 1)?,
        participant_1_id: parsed(row, 2)?,
        participant_2_id: parsed(row, 3)?,
        last_message_at: time_opt(row, 4)?,
        participant_1_unread: row.get(5)?,
        participant_2_unread: row.get(6)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parsed(row, 0)?,
        booking_id: parsed(row, 1)?,
        sender_id: parsed(row, 2)?,
        message: row.get(3)?,
        message_type: parsed(row, 4)?,
        client_ref: row.get(5)?,
        read: row.get(6)?,
        created_at: time(row, 7)?,
    })
}

pub fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let data: String = row.get(6)?;
    Ok(Notification {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        kind: parsed(row, 2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        read: row.get(5)?,
        data: serde_json::from_str(&data).map_err(|e| conversion_error(6, e))?,
        created_at: time(row, 7)?,
        updated_at: time(row, 8)?,
    })
}

/// Row of `booking_transitions`. Storage-only; never sent over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRow {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub from_status: BookingStatus,
    pub to_status: BookingStatus,
    pub actor_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn transition_from_row(row: &Row<'_>) -> rusqlite::Result<TransitionRow> {
    Ok(TransitionRow {
        id: parsed(row, 0)?,
        booking_id: parsed(row, 1)?,
        from_status: parsed(row, 2)?,
        to_status: parsed(row, 3)?,
        actor_id: parsed_opt(row, 4)?,
        request_id: row.get(5)?,
        created_at: time(row, 6)?,
    })
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn storage_time_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        assert!(sql_time(&a) < sql_time(&b));
        assert!(sql_time(&b) < sql_time(&c));
        assert_eq!(parse_sql_time(&sql_time(&b)).unwrap(), b);
    }
}
