use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Booking, Message, Notification, PointsTransaction};

/// Kind of row a change-feed subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Bookings where the scope user is guest or host.
    Booking,
    /// Messages of the scope booking.
    Message,
    /// Notifications of the scope user.
    Notification,
    /// Points transactions of the scope user.
    Points,
}

/// One logical subscription: an entity kind narrowed to a scope id
/// (a user id, or a booking id for messages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub entity: EntityKind,
    pub scope: Uuid,
}

impl Topic {
    pub fn bookings_of(user_id: Uuid) -> Self {
        Self { entity: EntityKind::Booking, scope: user_id }
    }

    pub fn messages_of(booking_id: Uuid) -> Self {
        Self { entity: EntityKind::Message, scope: booking_id }
    }

    pub fn notifications_of(user_id: Uuid) -> Self {
        Self { entity: EntityKind::Notification, scope: user_id }
    }

    pub fn points_of(user_id: Uuid) -> Self {
        Self { entity: EntityKind::Points, scope: user_id }
    }

    /// Topics whose scope is the subscribing user rather than a booking.
    pub fn is_user_scoped(&self) -> bool {
        !matches!(self.entity, EntityKind::Message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// The row carried by a change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum ChangeRecord {
    Booking(Booking),
    Message(Message),
    Notification(Notification),
    PointsTransaction(PointsTransaction),
}

/// A committed row insert or update, published after the owning transaction
/// commits. Delivery is at-least-once and unordered across rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: ChangeRecord,
}

impl ChangeEvent {
    pub fn insert(record: ChangeRecord) -> Self {
        Self { op: ChangeOp::Insert, record }
    }

    pub fn update(record: ChangeRecord) -> Self {
        Self { op: ChangeOp::Update, record }
    }

    /// Every topic this event must be delivered to.
    pub fn topics(&self) -> Vec<Topic> {
        match &self.record {
            ChangeRecord::Booking(b) => {
                vec![Topic::bookings_of(b.guest_id), Topic::bookings_of(b.host_id)]
            }
            ChangeRecord::Message(m) => vec![Topic::messages_of(m.booking_id)],
            ChangeRecord::Notification(n) => vec![Topic::notifications_of(n.user_id)],
            ChangeRecord::PointsTransaction(t) => vec![Topic::points_of(t.user_id)],
        }
    }

    /// Version stamp of the carried row.
    pub fn stamp(&self) -> DateTime<Utc> {
        match &self.record {
            ChangeRecord::Booking(b) => b.updated_at,
            ChangeRecord::Message(m) => m.created_at,
            ChangeRecord::Notification(n) => n.updated_at,
            ChangeRecord::PointsTransaction(t) => t.created_at,
        }
    }
}

/// Receives committed changes. Implemented by the gateway dispatcher; the
/// booking engine only knows this seam.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);

    fn publish_all(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// The topic set the connection now receives
    Subscribed { topics: Vec<Topic> },

    /// A committed row change on one of the subscribed topics
    Change(ChangeEvent),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Add topics to this connection's subscription set
    Subscribe { topics: Vec<Topic> },

    /// Remove topics from this connection's subscription set
    Unsubscribe { topics: Vec<Topic> },
}
