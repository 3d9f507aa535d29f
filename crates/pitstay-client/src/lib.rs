//! Client side of the sync layer: caches that reconcile server-confirmed
//! rows with optimistic local state, a change-feed connection that survives
//! disconnects, and guarded booking actions.

pub mod actions;
pub mod backoff;
pub mod broker;
pub mod cache;
pub mod connection;
pub mod error;
pub mod inflight;
pub mod notifications;
pub mod transport;

pub use actions::{Intent, SendOutcome};
pub use backoff::ReconnectPolicy;
pub use broker::{RealtimeSyncBroker, SyncConfig};
pub use connection::ConnectionState;
pub use error::{ClientError, Result};
pub use inflight::InFlightRegistry;
pub use notifications::NotificationDispatcher;
pub use transport::{Api, FeedConnector, FeedStream, HttpApi, WsConnector};
