use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use pitstay_db::{Database, queries};
use pitstay_types::events::{ChangeRecord, ChangeSink};
use pitstay_types::models::{Booking, Message, MessageType, NotificationType, Party};

use crate::clock::Clock;
use crate::error::{BookingError, Result};
use crate::notifications::notify;
use crate::outbox::Outbox;

pub const MAX_MESSAGE_LEN: usize = 2000;
pub const MAX_CLIENT_REF_LEN: usize = 64;
pub const MAX_PAGE: u32 = 200;

/// Per-booking conversation between guest and host.
pub struct MessagingService {
    db: Arc<Database>,
    sink: Arc<dyn ChangeSink>,
    clock: Arc<dyn Clock>,
}

impl MessagingService {
    pub fn new(db: Arc<Database>, sink: Arc<dyn ChangeSink>, clock: Arc<dyn Clock>) -> Self {
        Self { db, sink, clock }
    }

    /// Send a text message. Returns the stored message and whether it was a
    /// replay of an earlier send with the same `client_ref`.
    pub fn send_message(
        &self,
        sender_id: Uuid,
        booking_id: Uuid,
        text: &str,
        client_ref: Option<&str>,
    ) -> Result<(Message, bool)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BookingError::validation("message cannot be empty"));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(BookingError::validation(format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }
        if client_ref.is_some_and(|r| r.is_empty() || r.len() > MAX_CLIENT_REF_LEN) {
            return Err(BookingError::validation("invalid client_ref"));
        }

        let now = self.clock.now();
        let mut outbox = Outbox::default();
        let (message, replayed) = self.db.with_tx(|tx| -> Result<(Message, bool)> {
            let booking = party_booking(tx, sender_id, booking_id)?;

            if let Some(r) = client_ref {
                if let Some(existing) = queries::message_by_client_ref(tx, sender_id, r)? {
                    if existing.booking_id != booking_id {
                        return Err(BookingError::validation("client_ref already used in another conversation"));
                    }
                    return Ok((existing, true));
                }
            }

            let message = Message {
                id: Uuid::new_v4(),
                booking_id,
                sender_id,
                message: text.to_string(),
                message_type: MessageType::Text,
                client_ref: client_ref.map(str::to_string),
                read: false,
                created_at: now,
            };
            queries::insert_message(tx, &message)?;
            outbox.inserted(ChangeRecord::Message(message.clone()));

            let recipient = booking.counterpart(sender_id);
            let recipient_side = match booking.party_of(sender_id) {
                Some(Party::Guest) => Party::Host,
                _ => Party::Guest,
            };
            queries::bump_conversation(tx, booking_id, recipient_side, now)?;

            notify(
                tx,
                &mut outbox,
                recipient,
                NotificationType::NewMessage,
                preview(text),
                booking_id,
                now,
            )?;
            Ok((message, false))
        })?;
        outbox.flush(self.sink.as_ref());

        if replayed {
            debug!(%booking_id, %sender_id, "message send replayed");
        } else {
            info!(%booking_id, %sender_id, message_id = %message.id, "message sent");
        }
        Ok((message, replayed))
    }

    /// Most recent messages of the booking, oldest first.
    pub fn list_messages(&self, user_id: Uuid, booking_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        let booking = self
            .db
            .get_booking(booking_id)?
            .ok_or(BookingError::NotFound { entity: "booking", id: booking_id })?;
        if !booking.is_party(user_id) {
            return Err(BookingError::unauthorized("not a party to this booking"));
        }
        Ok(self.db.get_messages(booking_id, limit.clamp(1, MAX_PAGE))?)
    }

    /// Zero the caller's unread counter and mark received messages read.
    /// Returns how many messages flipped.
    pub fn mark_conversation_read(&self, user_id: Uuid, booking_id: Uuid) -> Result<usize> {
        let mut outbox = Outbox::default();
        let count = self.db.with_tx(|tx| -> Result<usize> {
            let booking = party_booking(tx, user_id, booking_id)?;
            let side = booking.party_of(user_id).unwrap_or(Party::Guest);
            queries::reset_unread(tx, booking_id, side)?;

            let flipped = queries::mark_messages_read(tx, booking_id, user_id)?;
            let count = flipped.len();
            for m in flipped {
                outbox.updated(ChangeRecord::Message(m));
            }
            Ok(count)
        })?;
        outbox.flush(self.sink.as_ref());
        Ok(count)
    }
}

/// Load the booking and require `user_id` to be guest or host.
fn party_booking(conn: &rusqlite::Connection, user_id: Uuid, booking_id: Uuid) -> Result<Booking> {
    let booking = queries::get_booking(conn, booking_id)?
        .ok_or(BookingError::NotFound { entity: "booking", id: booking_id })?;
    if !booking.is_party(user_id) {
        return Err(BookingError::unauthorized("not a party to this booking"));
    }
    Ok(booking)
}

fn preview(text: &str) -> String {
    const PREVIEW: usize = 80;
    if text.chars().count() <= PREVIEW {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW).collect();
        format!("{cut}...")
    }
}
