use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use pitstay_types::api::{
    BalanceResponse, BookingResponse, CancelRequest, ErrorBody, MarkReadResponse, RespondRequest,
    SendMessageRequest, SendMessageResponse, SweepResponse, TransitionGuard,
};
use pitstay_types::models::{Booking, Message, Notification, PointsTransaction};

use super::Api;
use crate::error::{ClientError, Result};

/// REST client for one signed-in user.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(format!("{}{}", self.base_url, path)).bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let text = resp.text().await.unwrap_or_default();
        debug!(%status, "request failed: {}", text);
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(ClientError::from_body(body)),
            Err(_) if status.is_server_error() => Err(ClientError::Server(format!("{status}"))),
            Err(_) => Err(ClientError::Validation(format!("{status}: {text}"))),
        }
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn bookings(&self) -> Result<Vec<Booking>> {
        self.send(self.get("/bookings")).await
    }

    async fn booking(&self, booking_id: Uuid) -> Result<Booking> {
        self.send(self.get(&format!("/bookings/{booking_id}"))).await
    }

    async fn respond(&self, booking_id: Uuid, req: &RespondRequest) -> Result<BookingResponse> {
        self.send(self.post(&format!("/bookings/{booking_id}/respond")).json(req)).await
    }

    async fn confirm(&self, booking_id: Uuid, guard: &TransitionGuard) -> Result<BookingResponse> {
        self.send(self.post(&format!("/bookings/{booking_id}/confirm")).json(guard)).await
    }

    async fn cancel(&self, booking_id: Uuid, req: &CancelRequest) -> Result<BookingResponse> {
        self.send(self.post(&format!("/bookings/{booking_id}/cancel")).json(req)).await
    }

    async fn complete(&self, booking_id: Uuid, guard: &TransitionGuard) -> Result<BookingResponse> {
        self.send(self.post(&format!("/bookings/{booking_id}/complete")).json(guard)).await
    }

    async fn sweep(&self) -> Result<SweepResponse> {
        self.send(self.post("/bookings/sweep")).await
    }

    async fn messages(&self, booking_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.send(self.get(&format!("/bookings/{booking_id}/messages?limit={limit}"))).await
    }

    async fn send_message(&self, booking_id: Uuid, req: &SendMessageRequest) -> Result<SendMessageResponse> {
        self.send(self.post(&format!("/bookings/{booking_id}/messages")).json(req)).await
    }

    async fn mark_conversation_read(&self, booking_id: Uuid) -> Result<MarkReadResponse> {
        self.send(self.post(&format!("/bookings/{booking_id}/messages/read"))).await
    }

    async fn balance(&self) -> Result<BalanceResponse> {
        self.send(self.get("/points/balance")).await
    }

    async fn transactions(&self, limit: u32) -> Result<Vec<PointsTransaction>> {
        self.send(self.get(&format!("/points/transactions?limit={limit}"))).await
    }

    async fn notifications(&self, limit: u32) -> Result<Vec<Notification>> {
        self.send(self.get(&format!("/notifications?limit={limit}"))).await
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<MarkReadResponse> {
        self.send(self.post(&format!("/notifications/{notification_id}/read"))).await
    }

    async fn mark_all_notifications_read(&self) -> Result<MarkReadResponse> {
        self.send(self.post("/notifications/read-all")).await
    }
}
