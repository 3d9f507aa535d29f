use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or transmitted string does not name a known variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Closed string-backed enums. SQLite stores the `as_str` form.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Booking lifecycle status.
    BookingStatus, "booking status" {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

impl BookingStatus {
    /// `rejected`, `completed` and `cancelled` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Cancelled)
    }
}

string_enum!(
    /// Who cancelled a booking.
    CancelledBy, "canceller" {
        Guest => "guest",
        Host => "host",
        System => "system",
    }
);

string_enum!(
    /// The host's answer to a pending request.
    HostResponse, "host response" {
        Accepted => "accepted",
        Rejected => "rejected",
    }
);

string_enum!(
    /// A side of a booking. Used where a caller states the role they act in.
    Party, "party" {
        Guest => "guest",
        Host => "host",
    }
);

impl From<Party> for CancelledBy {
    fn from(party: Party) -> Self {
        match party {
            Party::Guest => CancelledBy::Guest,
            Party::Host => CancelledBy::Host,
        }
    }
}

string_enum!(
    PointsTransactionType, "points transaction type" {
        SubscriptionBonus => "subscription_bonus",
        BookingEarning => "booking_earning",
        BookingPayment => "booking_payment",
        BookingRefund => "booking_refund",
        Penalty => "penalty",
        Compensation => "compensation",
        PropertyBonus => "property_bonus",
        RaceBonus => "race_bonus",
        ReviewBonus => "review_bonus",
    }
);

impl PointsTransactionType {
    /// Reputation rewards that are granted outside the booking lifecycle.
    pub fn is_bonus(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionBonus | Self::PropertyBonus | Self::RaceBonus | Self::ReviewBonus
        )
    }
}

string_enum!(
    MessageType, "message type" {
        Text => "text",
        System => "system",
    }
);

string_enum!(
    NotificationType, "notification type" {
        BookingRequest => "booking_request",
        BookingAccepted => "booking_accepted",
        BookingRejected => "booking_rejected",
        BookingConfirmed => "booking_confirmed",
        BookingCompleted => "booking_completed",
        BookingCancelled => "booking_cancelled",
        BookingExpired => "booking_expired",
        PointsEarned => "points_earned",
        PointsPenalty => "points_penalty",
        NewMessage => "new_message",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A stay request between a guest and a host for one race.
///
/// `points_cost` is fixed when the request is made. `updated_at` moves on
/// every transition and is what clients compare when reconciling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub guest_id: Uuid,
    pub host_id: Uuid,
    pub race_id: Uuid,
    pub property_id: Uuid,
    pub status: BookingStatus,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub guests_count: u32,
    pub points_cost: i64,
    pub request_message: Option<String>,
    pub host_response_message: Option<String>,
    pub host_response_deadline: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// The role `user_id` plays in this booking, if any.
    pub fn party_of(&self, user_id: Uuid) -> Option<Party> {
        if user_id == self.host_id {
            Some(Party::Host)
        } else if user_id == self.guest_id {
            Some(Party::Guest)
        } else {
            None
        }
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.party_of(user_id).is_some()
    }

    /// The other side of the booking from `user_id`.
    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if user_id == self.host_id {
            self.guest_id
        } else {
            self.host_id
        }
    }
}

/// One row of the append-only points ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: PointsTransactionType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub booking_id: Uuid,
    /// Always the guest.
    pub participant_1_id: Uuid,
    /// Always the host.
    pub participant_2_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    pub participant_1_unread: u32,
    pub participant_2_unread: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub sender_id: Uuid,
    pub message: String,
    pub message_type: MessageType,
    /// Client-generated correlation id, unique per sender.
    pub client_ref: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), *status);
        }
        assert!("expired".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = BookingStatus::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![&BookingStatus::Rejected, &BookingStatus::Completed, &BookingStatus::Cancelled]
        );
    }

    #[test]
    fn transaction_type_serializes_snake_case() {
        let json = serde_json::to_string(&PointsTransactionType::BookingRefund).unwrap();
        assert_eq!(json, "\"booking_refund\"");
        assert!(PointsTransactionType::ReviewBonus.is_bonus());
        assert!(!PointsTransactionType::Penalty.is_bonus());
    }
}
