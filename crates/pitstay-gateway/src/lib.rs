//! Server side of the change feed: a topic-scoped dispatcher fed by the
//! booking engine, and the WebSocket connection loop that delivers it.

pub mod connection;
pub mod dispatcher;

pub use dispatcher::Dispatcher;
