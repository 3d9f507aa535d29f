use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{error, trace};
use uuid::Uuid;

use pitstay_types::events::{ChangeEvent, ChangeSink, GatewayEvent, Topic};

/// One committed change, serialized once and shared by every connection.
#[derive(Debug)]
pub struct Fanout {
    pub topics: Vec<Topic>,
    pub json: Arc<str>,
}

impl Fanout {
    /// Whether a connection with this subscription set should receive it.
    pub fn is_for(&self, subscriptions: &HashSet<Topic>) -> bool {
        self.topics.iter().any(|t| subscriptions.contains(t))
    }
}

/// Fans committed changes out to connected sessions.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every change and filters by its own topics
    broadcast_tx: broadcast::Sender<Arc<Fanout>>,

    /// Live sessions: user_id -> conn_ids. A user may have several.
    sessions: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// A dispatcher whose connections may fall at most `capacity` changes
    /// behind before they are dropped.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the change stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Fanout>> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Register a new session for the user. Returns its conn_id.
    pub async fn register_session(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .sessions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id);
        conn_id
    }

    /// Remove one session. Other sessions of the same user stay registered.
    pub async fn unregister_session(&self, user_id: Uuid, conn_id: Uuid) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(conns) = sessions.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                sessions.remove(&user_id);
            }
        }
    }

    /// Number of open sessions for one user.
    pub async fn session_count(&self, user_id: Uuid) -> usize {
        self.inner
            .sessions
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// Number of open sessions across all users.
    pub async fn connection_count(&self) -> usize {
        self.inner.sessions.read().await.values().map(HashSet::len).sum()
    }
}

impl ChangeSink for Dispatcher {
    fn publish(&self, event: ChangeEvent) {
        let topics = event.topics();
        let json = match serde_json::to_string(&GatewayEvent::Change(event)) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize change event: {}", e);
                return;
            }
        };
        trace!(?topics, "dispatching change");
        // No receivers just means nobody is connected.
        let _ = self.inner.broadcast_tx.send(Arc::new(Fanout { topics, json: json.into() }));
    }
}
