//! WebSocket transport speaking the SignalR JSON hub protocol.

use crate::events::HubMethod;
use crate::protocol::{handshake_request, split_records, HandshakeResponse, HubMessage, MessageType};
use crate::transport::{HubTransport, TransportEvent, TransportEvents};
use crate::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingInvocations = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

struct Live {
    outbound: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

/// Comments hub transport over a WebSocket.
pub struct SignalRTransport {
    hub_url: Url,
    invoke_timeout: Duration,
    keepalive: Duration,
    next_invocation_id: AtomicU64,
    live: Mutex<Option<Live>>,
    pending: PendingInvocations,
}

impl SignalRTransport {
    pub fn new(hub_url: Url) -> Self {
        Self {
            hub_url,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
            next_invocation_id: AtomicU64::new(1),
            live: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_invoke_timeout(mut self, invoke_timeout: Duration) -> Self {
        self.invoke_timeout = invoke_timeout;
        self
    }

    /// WebSocket URL for the hub. Browsers cannot set headers on a socket,
    /// so the hub accepts the bearer token as a query parameter.
    pub fn socket_url(&self, access_token: Option<&str>) -> RealtimeResult<Url> {
        let mut url = self.hub_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(RealtimeError::Transport(format!(
                    "unsupported hub URL scheme: {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::Transport("cannot convert hub URL".to_string()))?;

        if let Some(token) = access_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        Ok(url)
    }

    fn fail_pending(&self, reason: &str) {
        fail_pending(&self.pending, reason);
    }
}

#[async_trait]
impl HubTransport for SignalRTransport {
    async fn connect(&self, access_token: Option<String>) -> RealtimeResult<TransportEvents> {
        self.close().await;

        let url = self.socket_url(access_token.as_deref())?;
        info!(host = url.host_str().unwrap_or_default(), "Connecting to comments hub");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(handshake_request().into())).await?;
        let leftover = timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut read))
            .await
            .map_err(|_| RealtimeError::Timeout)??;
        debug!("Hub handshake completed");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        // Records that arrived in the handshake frame.
        for record in leftover {
            handle_record(&record, &events_tx, &self.pending);
        }

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let keepalive_tx = outbound_tx.clone();
        let period = self.keepalive;
        let keepalive = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(frame) = HubMessage::ping().to_frame() else {
                    break;
                };
                if keepalive_tx.send(Message::Text(frame.into())).is_err() {
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(read, events_tx, Arc::clone(&self.pending)));

        *self.live.lock() = Some(Live {
            outbound: outbound_tx,
            writer,
            reader,
            keepalive,
        });
        info!("Connected to comments hub");

        Ok(events_rx)
    }

    async fn invoke(&self, method: HubMethod, topic: &str) -> RealtimeResult<()> {
        let outbound = self
            .live
            .lock()
            .as_ref()
            .map(|live| live.outbound.clone())
            .ok_or_else(|| RealtimeError::ConnectionUnavailable("not connected".to_string()))?;

        let id = self
            .next_invocation_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let frame = HubMessage::invocation(
            &id,
            method.as_str(),
            vec![Value::String(topic.to_string())],
        )
        .to_frame()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if outbound.send(Message::Text(frame.into())).is_err() {
            self.pending.lock().remove(&id);
            return Err(RealtimeError::ConnectionUnavailable(
                "connection closed".to_string(),
            ));
        }
        debug!(method = %method, topic, invocation_id = %id, "Invoked hub method");

        match timeout(self.invoke_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(error))) => Err(RealtimeError::Transport(error)),
            Ok(Err(_)) => Err(RealtimeError::ConnectionUnavailable(
                "connection closed before completion".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RealtimeError::Timeout)
            }
        }
    }

    async fn close(&self) {
        let Some(live) = self.live.lock().take() else {
            return;
        };

        live.keepalive.abort();
        live.reader.abort();
        // The writer drains the close frame, then shuts the sink.
        let _ = live.outbound.send(Message::Close(None));
        drop(live.outbound);
        if timeout(Duration::from_secs(2), live.writer).await.is_err() {
            debug!("Hub writer did not finish closing in time");
        }

        self.fail_pending("connection closed");
        info!("Disconnected from comments hub");
    }
}

async fn read_handshake(read: &mut SplitStream<WsStream>) -> RealtimeResult<Vec<String>> {
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let mut records = split_records(&text);
                if records.is_empty() {
                    continue;
                }
                let response: HandshakeResponse = serde_json::from_str(&records.remove(0))?;
                if let Some(error) = response.error {
                    return Err(RealtimeError::Transport(format!(
                        "hub handshake rejected: {error}"
                    )));
                }
                return Ok(records);
            }
            Message::Close(_) => {
                return Err(RealtimeError::Transport(
                    "hub closed the connection during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }

    Err(RealtimeError::Transport(
        "connection ended during handshake".to_string(),
    ))
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pending: PendingInvocations,
) {
    let mut close_error = None;

    'frames: while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                for record in split_records(&text) {
                    if let Some(error) = handle_record(&record, &events, &pending) {
                        close_error = error;
                        break 'frames;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("Hub connection closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Hub socket error");
                close_error = Some(e.to_string());
                break;
            }
        }
    }

    fail_pending(&pending, "connection closed");
    let _ = events.send(TransportEvent::Closed { error: close_error });
}

/// Handle one record. Returns `Some` when the server closed the connection,
/// carrying its error if any.
fn handle_record(
    record: &str,
    events: &mpsc::UnboundedSender<TransportEvent>,
    pending: &PendingInvocations,
) -> Option<Option<String>> {
    let message: HubMessage = match serde_json::from_str(record) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Failed to parse hub message");
            return None;
        }
    };

    match message.message_type() {
        Some(MessageType::Invocation) => {
            if let Some(target) = message.target {
                let _ = events.send(TransportEvent::Invocation {
                    target,
                    arguments: message.arguments.unwrap_or_default(),
                });
            }
        }
        Some(MessageType::Completion) => {
            let waiter = message
                .invocation_id
                .and_then(|id| pending.lock().remove(&id));
            if let Some(waiter) = waiter {
                let _ = waiter.send(match message.error {
                    Some(error) => Err(error),
                    None => Ok(()),
                });
            }
        }
        Some(MessageType::Ping) => {}
        Some(MessageType::Close) => return Some(message.error),
        _ => debug!(msg_type = message.msg_type, "Ignoring hub message"),
    }
    None
}

fn fail_pending(pending: &PendingInvocations, reason: &str) {
    for (_, waiter) in pending.lock().drain() {
        let _ = waiter.send(Err(reason.to_string()));
    }
}
