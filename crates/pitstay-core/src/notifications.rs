use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use pitstay_db::{Database, queries};
use pitstay_types::events::{ChangeRecord, ChangeSink};
use pitstay_types::models::{Notification, NotificationType};

use crate::clock::Clock;
use crate::error::{BookingError, Result};
use crate::outbox::Outbox;

pub const MAX_LIST: u32 = 100;

/// Insert a notification on the caller's transaction and queue its change
/// event.
pub(crate) fn notify(
    conn: &Connection,
    outbox: &mut Outbox,
    user_id: Uuid,
    kind: NotificationType,
    message: String,
    booking_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Notification> {
    let n = Notification {
        id: Uuid::new_v4(),
        user_id,
        kind,
        title: title_for(kind).to_string(),
        message,
        read: false,
        data: json!({ "booking_id": booking_id }),
        created_at: at,
        updated_at: at,
    };
    queries::insert_notification(conn, &n)?;
    outbox.inserted(ChangeRecord::Notification(n.clone()));
    Ok(n)
}

fn title_for(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::BookingRequest => "New booking request",
        NotificationType::BookingAccepted => "Booking accepted",
        NotificationType::BookingRejected => "Booking declined",
        NotificationType::BookingConfirmed => "Booking confirmed",
        NotificationType::BookingCompleted => "Stay completed",
        NotificationType::BookingCancelled => "Booking cancelled",
        NotificationType::BookingExpired => "Booking expired",
        NotificationType::PointsEarned => "Points earned",
        NotificationType::PointsPenalty => "Points penalty",
        NotificationType::NewMessage => "New message",
    }
}

/// Per-user notification reads and read-flag writes. The unread count is
/// always a `COUNT(*)`, never a stored counter.
pub struct NotificationService {
    db: Arc<Database>,
    sink: Arc<dyn ChangeSink>,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(db: Arc<Database>, sink: Arc<dyn ChangeSink>, clock: Arc<dyn Clock>) -> Self {
        Self { db, sink, clock }
    }

    pub fn list(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        Ok(self.db.get_notifications(user_id, limit.clamp(1, MAX_LIST))?)
    }

    pub fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        Ok(self.db.get_unread_count(user_id)?)
    }

    /// Mark one notification read. Already-read is a successful no-op.
    /// Returns the number of rows that flipped.
    pub fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<usize> {
        let now = self.clock.now();
        let mut outbox = Outbox::default();
        let updated = self.db.with_tx(|tx| {
            let mut n = queries::get_notification(tx, notification_id)?.ok_or(
                BookingError::NotFound { entity: "notification", id: notification_id },
            )?;
            if n.user_id != user_id {
                return Err(BookingError::unauthorized("notification belongs to another user"));
            }
            let updated = queries::mark_notification_read(tx, notification_id, now)?;
            if updated > 0 {
                n.read = true;
                n.updated_at = now;
                outbox.updated(ChangeRecord::Notification(n));
            }
            Ok(updated)
        })?;
        outbox.flush(self.sink.as_ref());
        Ok(updated)
    }

    pub fn mark_all_read(&self, user_id: Uuid) -> Result<usize> {
        let now = self.clock.now();
        let mut outbox = Outbox::default();
        let updated = self.db.with_tx(|tx| {
            let rows = queries::mark_all_notifications_read(tx, user_id, now)?;
            let count = rows.len();
            for n in rows {
                outbox.updated(ChangeRecord::Notification(n));
            }
            Ok::<_, BookingError>(count)
        })?;
        outbox.flush(self.sink.as_ref());

        debug!(%user_id, updated, "marked all notifications read");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use pitstay_types::events::ChangeEvent;

    struct Discard;

    impl ChangeSink for Discard {
        fn publish(&self, _event: ChangeEvent) {}
    }

    fn seed(db: &Database, user: Uuid, n: usize) -> Vec<Notification> {
        db.with_tx(|tx| {
            let mut outbox = Outbox::default();
            (0..n)
                .map(|i| {
                    notify(
                        tx,
                        &mut outbox,
                        user,
                        NotificationType::NewMessage,
                        format!("message {i}"),
                        Uuid::new_v4(),
                        Utc::now(),
                    )
                })
                .collect::<Result<Vec<_>>>()
        })
        .unwrap()
    }

    #[test]
    fn unread_count_tracks_mark_operations() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = NotificationService::new(db.clone(), Arc::new(Discard), Arc::new(SystemClock));
        let user = Uuid::new_v4();
        let seeded = seed(&db, user, 3);

        assert_eq!(service.unread_count(user).unwrap(), 3);
        assert_eq!(service.mark_read(user, seeded[0].id).unwrap(), 1);
        assert_eq!(service.mark_read(user, seeded[0].id).unwrap(), 0);
        assert_eq!(service.unread_count(user).unwrap(), 2);
        assert_eq!(service.mark_all_read(user).unwrap(), 2);
        assert_eq!(service.unread_count(user).unwrap(), 0);
        assert_eq!(service.mark_all_read(user).unwrap(), 0);
    }

    #[test]
    fn cannot_mark_someone_elses_notification() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = NotificationService::new(db.clone(), Arc::new(Discard), Arc::new(SystemClock));
        let owner = Uuid::new_v4();
        let seeded = seed(&db, owner, 1);

        let err = service.mark_read(Uuid::new_v4(), seeded[0].id).unwrap_err();
        assert!(matches!(err, BookingError::Unauthorized(_)));
        let err = service.mark_read(owner, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, BookingError::NotFound { .. }));
        assert_eq!(service.unread_count(owner).unwrap(), 1);
    }
}
