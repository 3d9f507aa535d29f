use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use pitstay_db::Database;
use pitstay_types::events::{EntityKind, GatewayCommand, GatewayEvent, Topic};

use crate::dispatcher::{Dispatcher, Fanout};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a legacy client has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<std::sync::RwLock<HashSet<Topic>>>;

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade, so we skip the
/// Identify handshake and go straight to Ready + event loop.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway (pre-authenticated)", username, user_id);

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id, username: username.clone() }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id, username).await;
}

/// Handle a connection that authenticates with an `Identify` command.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id, username: username.clone() }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id, username).await;
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return false;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let conn_id = dispatcher.register_session(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection topic set, shared between the send and recv tasks.
    let subscriptions: Subscriptions = Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    // Replies to this connection's own commands.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                fanout = next_change(&mut broadcast_rx) => {
                    let Some(fanout) = fanout else { break };

                    {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !fanout.is_for(&subs) {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(fanout.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let username_recv = username.clone();
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(reply) =
                            handle_command(&db, user_id, &username_recv, cmd, &recv_subscriptions).await
                        {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_session(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Next change from the dispatcher, or `None` once the connection must
/// close. A lagged receiver has lost changes, so the socket is dropped and
/// the client re-fetches when it reconnects.
async fn next_change(rx: &mut broadcast::Receiver<Arc<Fanout>>) -> Option<Arc<Fanout>> {
    match rx.recv().await {
        Ok(fanout) => Some(fanout),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!("Broadcast receiver lagged by {} messages, dropping connection", n);
            None
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use pitstay_types::api::Claims;

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Apply one command. Returns the reply to send back, if any.
async fn handle_command(
    db: &Arc<Database>,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::Subscribe { topics } => {
            let mut granted = Vec::with_capacity(topics.len());
            for topic in topics {
                let db = db.clone();
                let allowed = tokio::task::spawn_blocking(move || topic_allowed(&db, user_id, topic))
                    .await;
                match allowed {
                    Ok(Ok(true)) => granted.push(topic),
                    Ok(Ok(false)) => {
                        warn!("{} ({}) denied subscription to {:?}", username, user_id, topic);
                    }
                    Ok(Err(e)) => error!("Topic check failed: {:#}", e),
                    Err(e) => error!("spawn_blocking join error: {}", e),
                }
            }

            info!("{} ({}) subscribing to {} topics", username, user_id, granted.len());
            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            subs.extend(granted);
            Some(GatewayEvent::Subscribed { topics: subs.iter().copied().collect() })
        }

        GatewayCommand::Unsubscribe { topics } => {
            trace!("{} ({}) unsubscribing from {} topics", username, user_id, topics.len());
            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            for topic in &topics {
                subs.remove(topic);
            }
            Some(GatewayEvent::Subscribed { topics: subs.iter().copied().collect() })
        }
    }
}

/// User-scoped topics must name the caller; message topics require the
/// caller to be guest or host of the booking.
pub fn topic_allowed(db: &Database, user_id: Uuid, topic: Topic) -> anyhow::Result<bool> {
    match topic.entity {
        EntityKind::Booking | EntityKind::Notification | EntityKind::Points => {
            Ok(topic.scope == user_id)
        }
        EntityKind::Message => Ok(db
            .get_booking(topic.scope)?
            .is_some_and(|b| b.is_party(user_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};
    use pitstay_db::queries;
    use pitstay_types::models::{Booking, BookingStatus};

    fn seed_booking(db: &Database, guest: Uuid, host: Uuid) -> Uuid {
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            guest_id: guest,
            host_id: host,
            race_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            status: BookingStatus::Pending,
            check_in_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2026, 10, 3).unwrap(),
            guests_count: 1,
            points_cost: 0,
            request_message: None,
            host_response_message: None,
            host_response_deadline: now + Duration::hours(48),
            accepted_at: None,
            rejected_at: None,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };
        db.with_conn(|c| queries::insert_booking(c, &booking)).unwrap();
        booking.id
    }

    #[tokio::test]
    async fn lagging_connection_is_closed() {
        use pitstay_types::events::{ChangeEvent, ChangeRecord, ChangeSink};

        let dispatcher = Dispatcher::with_capacity(2);
        let mut rx = dispatcher.subscribe();
        let db = Database::open_in_memory().unwrap();
        let booking = seed_booking(&db, Uuid::new_v4(), Uuid::new_v4());
        let change = ChangeEvent::insert(ChangeRecord::Booking(db.get_booking(booking).unwrap().unwrap()));

        dispatcher.publish(change.clone());
        assert!(next_change(&mut rx).await.is_some());

        for _ in 0..4 {
            dispatcher.publish(change.clone());
        }
        assert!(next_change(&mut rx).await.is_none());
    }

    #[test]
    fn user_scoped_topics_must_name_the_caller() {
        let db = Database::open_in_memory().unwrap();
        let me = Uuid::new_v4();
        let someone = Uuid::new_v4();

        assert!(topic_allowed(&db, me, Topic::notifications_of(me)).unwrap());
        assert!(topic_allowed(&db, me, Topic::points_of(me)).unwrap());
        assert!(!topic_allowed(&db, me, Topic::bookings_of(someone)).unwrap());
    }

    #[test]
    fn message_topics_require_a_party() {
        let db = Database::open_in_memory().unwrap();
        let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
        let booking = seed_booking(&db, guest, host);

        assert!(topic_allowed(&db, guest, Topic::messages_of(booking)).unwrap());
        assert!(topic_allowed(&db, host, Topic::messages_of(booking)).unwrap());
        assert!(!topic_allowed(&db, Uuid::new_v4(), Topic::messages_of(booking)).unwrap());
        assert!(!topic_allowed(&db, guest, Topic::messages_of(Uuid::new_v4())).unwrap());
    }
}
