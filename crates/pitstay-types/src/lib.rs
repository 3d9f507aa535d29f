//! Types shared by every Pitstay crate: domain rows, REST payloads and the
//! change-feed / gateway protocol.

pub mod api;
pub mod events;
pub mod models;
