//! User actions. Each booking mutation claims the booking in the in-flight
//! registry, sends the status it last saw, and re-fetches on `Conflict`.

use std::future::Future;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use pitstay_types::api::{BookingResponse, CancelRequest, RespondRequest, SendMessageRequest, TransitionGuard};
use pitstay_types::models::{HostResponse, Message, MessageType, Party};

use crate::broker::{PendingSend, RealtimeSyncBroker, SyncInner, lock};
use crate::error::{ClientError, Result};

/// One user intent on one booking. Retrying the same `Intent` after a
/// network failure is safe: the server replays it instead of applying it
/// twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub booking_id: Uuid,
    pub request_id: String,
}

impl Intent {
    pub fn new(booking_id: Uuid) -> Self {
        Self { booking_id, request_id: Uuid::new_v4().to_string() }
    }

    fn step(&self, name: &str) -> String {
        format!("{}:{}", self.request_id, name)
    }
}

#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent(Message),
    /// Offline. The message stays visible as a placeholder and is resent
    /// with the same `client_ref` on reconnect.
    Queued { client_ref: String },
}

impl SyncInner {
    async fn run_transition<F, Fut>(&self, booking_id: Uuid, request_id: String, op: F) -> Result<BookingResponse>
    where
        F: FnOnce(TransitionGuard) -> Fut,
        Fut: Future<Output = Result<BookingResponse>>,
    {
        let guard = TransitionGuard {
            expected_status: self.bookings.read(|c| c.get(booking_id).map(|b| b.status)),
            request_id: Some(request_id),
        };

        match op(guard).await {
            Ok(resp) => {
                self.bookings.update(|c| c.upsert(resp.booking.clone()));
                Ok(resp)
            }
            Err(ClientError::Conflict(msg)) => {
                warn!(%booking_id, "conflict, re-fetching booking");
                match self.api.booking(booking_id).await {
                    Ok(fresh) => {
                        self.bookings.update(|c| c.upsert(fresh));
                    }
                    Err(e) => warn!(%booking_id, "re-fetch after conflict failed: {}", e),
                }
                Err(ClientError::Conflict(msg))
            }
            Err(e) => Err(e),
        }
    }
}

impl RealtimeSyncBroker {
    async fn guarded<F, Fut>(&self, intent: &Intent, step: &str, op: F) -> Result<BookingResponse>
    where
        F: FnOnce(TransitionGuard) -> Fut,
        Fut: Future<Output = Result<BookingResponse>>,
    {
        let _busy = self
            .inner
            .inflight
            .try_acquire(intent.booking_id)
            .ok_or(ClientError::Busy(intent.booking_id))?;
        self.inner.run_transition(intent.booking_id, intent.step(step), op).await
    }

    /// Host accepts or rejects a pending request.
    pub async fn respond(
        &self,
        intent: &Intent,
        response: HostResponse,
        message: Option<String>,
    ) -> Result<BookingResponse> {
        let api = self.inner.api.clone();
        let booking_id = intent.booking_id;
        self.guarded(intent, "respond", move |guard| async move {
            api.respond(booking_id, &RespondRequest { response, message, guard }).await
        })
        .await
    }

    pub async fn confirm(&self, intent: &Intent) -> Result<BookingResponse> {
        let api = self.inner.api.clone();
        let booking_id = intent.booking_id;
        self.guarded(intent, "confirm", move |guard| async move { api.confirm(booking_id, &guard).await })
            .await
    }

    pub async fn cancel(&self, intent: &Intent, cancelled_by: Party) -> Result<BookingResponse> {
        let api = self.inner.api.clone();
        let booking_id = intent.booking_id;
        self.guarded(intent, "cancel", move |guard| async move {
            api.cancel(booking_id, &CancelRequest { cancelled_by, guard }).await
        })
        .await
    }

    pub async fn complete(&self, intent: &Intent) -> Result<BookingResponse> {
        let api = self.inner.api.clone();
        let booking_id = intent.booking_id;
        self.guarded(intent, "complete", move |guard| async move { api.complete(booking_id, &guard).await })
            .await
    }

    /// Accept then confirm as two awaited calls with a grace delay between
    /// them. The booking stays claimed for the whole sequence.
    pub async fn accept_and_confirm(&self, intent: &Intent, message: Option<String>) -> Result<BookingResponse> {
        let booking_id = intent.booking_id;
        let _busy = self
            .inner
            .inflight
            .try_acquire(booking_id)
            .ok_or(ClientError::Busy(booking_id))?;

        let api = self.inner.api.clone();
        self.inner
            .run_transition(booking_id, intent.step("respond"), move |guard| async move {
                api.respond(booking_id, &RespondRequest { response: HostResponse::Accepted, message, guard })
                    .await
            })
            .await?;

        tokio::time::sleep(self.inner.config.confirm_grace).await;

        let api = self.inner.api.clone();
        self.inner
            .run_transition(booking_id, intent.step("confirm"), move |guard| async move {
                api.confirm(booking_id, &guard).await
            })
            .await
    }

    /// Send a message. It appears at once as a placeholder keyed by its
    /// `client_ref`; the server echo replaces it.
    pub async fn send_message(&self, booking_id: Uuid, text: &str) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::Validation("message cannot be empty".into()));
        }
        let sender_id = self.inner.user()?;

        let pending = PendingSend {
            booking_id,
            text: text.to_string(),
            client_ref: Uuid::new_v4().to_string(),
        };
        let placeholder = Message {
            id: Uuid::new_v4(),
            booking_id,
            sender_id,
            message: pending.text.clone(),
            message_type: MessageType::Text,
            client_ref: Some(pending.client_ref.clone()),
            read: false,
            created_at: Utc::now(),
        };
        let conversation = self.inner.track_conversation(booking_id);
        conversation.update(|c| c.set_optimistic(pending.client_ref.clone(), placeholder));

        let req = SendMessageRequest { message: pending.text.clone(), client_ref: Some(pending.client_ref.clone()) };
        match self.inner.api.send_message(booking_id, &req).await {
            Ok(resp) => {
                conversation.update(|c| c.upsert(resp.message.clone()));
                Ok(SendOutcome::Sent(resp.message))
            }
            Err(ClientError::Network(e)) => {
                info!(%booking_id, client_ref = %pending.client_ref, "offline, message queued: {}", e);
                let client_ref = pending.client_ref.clone();
                lock(&self.inner.pending_sends).push(pending);
                Ok(SendOutcome::Queued { client_ref })
            }
            Err(e) => {
                conversation.update(|c| c.clear_optimistic(&pending.client_ref));
                Err(e)
            }
        }
    }

    /// Whether an action on this booking is still in flight.
    pub fn is_busy(&self, booking_id: Uuid) -> bool {
        self.inner.inflight.is_busy(booking_id)
    }

    /// Number of messages still waiting for a connection.
    pub fn queued_messages(&self) -> usize {
        lock(&self.inner.pending_sends).len()
    }

    pub async fn mark_conversation_read(&self, booking_id: Uuid) -> Result<usize> {
        Ok(self.inner.api.mark_conversation_read(booking_id).await?.updated)
    }
}
