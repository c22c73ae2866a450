//! Seams between the connection manager and the outside world.

use crate::events::HubMethod;
use crate::RealtimeResult;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Something the transport reports after a connection is open.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server invoked a client method.
    Invocation { target: String, arguments: Vec<Value> },
    /// The connection ended. `error` is set for abnormal closes.
    Closed { error: Option<String> },
}

/// Receiving half of an open connection.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A push-channel connection to the comments hub.
///
/// At most one connection is open per transport. `connect` on an open
/// transport replaces the previous connection.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Open a connection, authenticating with `access_token` when given.
    async fn connect(&self, access_token: Option<String>) -> RealtimeResult<TransportEvents>;

    /// Invoke a server method with a single topic argument and wait for
    /// its completion.
    async fn invoke(&self, method: HubMethod, topic: &str) -> RealtimeResult<()>;

    /// Close the connection. Never fails; closing a closed transport is a
    /// no-op.
    async fn close(&self);
}

/// Source of the bearer token used when connecting.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `Ok(None)` connects anonymously.
    async fn access_token(&self) -> RealtimeResult<Option<String>>;
}

/// Token source for anonymous connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

#[async_trait]
impl TokenProvider for Anonymous {
    async fn access_token(&self) -> RealtimeResult<Option<String>> {
        Ok(None)
    }
}
