//! Seams between the sync layer and the network. `HttpApi` and
//! `WsConnector` are the real implementations.

mod http;
mod ws;

pub use http::HttpApi;
pub use ws::{WsConnector, WsFeed};

use async_trait::async_trait;
use uuid::Uuid;

use pitstay_types::api::{
    BalanceResponse, BookingResponse, CancelRequest, MarkReadResponse, RespondRequest,
    SendMessageRequest, SendMessageResponse, SweepResponse, TransitionGuard,
};
use pitstay_types::events::{GatewayEvent, Topic};
use pitstay_types::models::{Booking, Message, Notification, PointsTransaction};

use crate::error::Result;

/// REST calls made on behalf of the signed-in user.
#[async_trait]
pub trait Api: Send + Sync {
    async fn bookings(&self) -> Result<Vec<Booking>>;
    async fn booking(&self, booking_id: Uuid) -> Result<Booking>;
    async fn respond(&self, booking_id: Uuid, req: &RespondRequest) -> Result<BookingResponse>;
    async fn confirm(&self, booking_id: Uuid, guard: &TransitionGuard) -> Result<BookingResponse>;
    async fn cancel(&self, booking_id: Uuid, req: &CancelRequest) -> Result<BookingResponse>;
    async fn complete(&self, booking_id: Uuid, guard: &TransitionGuard) -> Result<BookingResponse>;
    async fn sweep(&self) -> Result<SweepResponse>;

    async fn messages(&self, booking_id: Uuid, limit: u32) -> Result<Vec<Message>>;
    async fn send_message(&self, booking_id: Uuid, req: &SendMessageRequest) -> Result<SendMessageResponse>;
    async fn mark_conversation_read(&self, booking_id: Uuid) -> Result<MarkReadResponse>;

    async fn balance(&self) -> Result<BalanceResponse>;
    async fn transactions(&self, limit: u32) -> Result<Vec<PointsTransaction>>;

    async fn notifications(&self, limit: u32) -> Result<Vec<Notification>>;
    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<MarkReadResponse>;
    async fn mark_all_notifications_read(&self) -> Result<MarkReadResponse>;
}

/// Opens change-feed connections.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedStream>>;
}

/// One open change-feed connection.
#[async_trait]
pub trait FeedStream: Send {
    async fn subscribe(&mut self, topics: Vec<Topic>) -> Result<()>;

    /// Next server event. `None` once the connection has closed.
    async fn next_event(&mut self) -> Option<Result<GatewayEvent>>;
}
