//! Realtime client for the forms comments hub.
//!
//! This crate provides:
//! - A single coalescing connection with automatic reconnection and backoff
//! - Topic (template group) subscriptions replayed after every reconnect
//! - One listener per hub event, with typed payload helpers
//! - A SignalR JSON-protocol WebSocket transport

mod config;
mod error;
mod events;
mod listeners;
mod manager;
mod protocol;
mod signalr;
mod subscriptions;
mod transport;

pub use config::HubConfig;
pub use error::{RealtimeError, RealtimeResult};
pub use events::{deleted_comment_id, Comment, CommentAuthor, HubEvent, HubMethod, LikesUpdate};
pub use listeners::{Listener, ListenerRegistry};
pub use manager::{ConnectionState, RealtimeConnectionManager};
pub use protocol::{HubMessage, MessageType};
pub use signalr::SignalRTransport;
pub use subscriptions::SubscriptionSet;
pub use transport::{Anonymous, HubTransport, TokenProvider, TransportEvent, TransportEvents};
