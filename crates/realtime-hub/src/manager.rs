//! Realtime connection manager.
//!
//! ## State Diagram
//!
//! ```text
//!  ┌──────────────┐ ensure_connected ┌────────────┐  success   ┌───────────┐
//!  │ Disconnected ├─────────────────►│ Connecting ├───────────►│ Connected │
//!  └──────────────┘                  └─────┬──────┘            └──┬─────▲──┘
//!         ▲   ▲          failure           │        transport drop│     │success
//!         │   └────────────────────────────┘                      ▼     │
//!         │                  exhausted / stop              ┌──────────────┐
//!         └────────────────────────────────────────────────┤ Reconnecting │
//!                                                          └──────────────┘
//! ```
//!
//! Concurrent `ensure_connected` calls share one attempt. Every transition
//! into `Connected` replays the [`SubscriptionSet`] into the new connection.
//! `stop` bumps a generation counter; tasks of an older generation exit
//! without touching state.
//!
//! Opening the transport is serialized: an attempt made stale by `stop`
//! finishes (and closes what it opened) before the next attempt or the
//! teardown touches the transport.

use crate::config::HubConfig;
use crate::events::{Comment, HubEvent, HubMethod, LikesUpdate};
use crate::listeners::ListenerRegistry;
use crate::subscriptions::SubscriptionSet;
use crate::transport::{HubTransport, TokenProvider, TransportEvent, TransportEvents};
use crate::{RealtimeError, RealtimeResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

type Attempt = Shared<BoxFuture<'static, RealtimeResult<()>>>;

struct Slot {
    /// Initial connection attempt in flight.
    pending: Option<Attempt>,
    generation: u64,
}

struct Inner {
    transport: Arc<dyn HubTransport>,
    tokens: Arc<dyn TokenProvider>,
    config: HubConfig,
    subscriptions: SubscriptionSet,
    listeners: ListenerRegistry,
    slot: Mutex<Slot>,
    /// Held while the transport is opened or torn down.
    open_lock: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Owns the single logical connection to the comments hub.
#[derive(Clone)]
pub struct RealtimeConnectionManager {
    inner: Arc<Inner>,
}

impl RealtimeConnectionManager {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        tokens: Arc<dyn TokenProvider>,
        config: HubConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                transport,
                tokens,
                config,
                subscriptions: SubscriptionSet::new(),
                listeners: ListenerRegistry::new(),
                slot: Mutex::new(Slot {
                    pending: None,
                    generation: 0,
                }),
                open_lock: tokio::sync::Mutex::new(()),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Topics currently kept joined.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.inner.subscriptions.members()
    }

    /// Make sure the connection is up.
    ///
    /// Returns immediately when connected. Otherwise joins the attempt in
    /// flight or starts one. While reconnecting, waits for the outcome of
    /// the next scheduled attempt.
    pub async fn ensure_connected(&self) -> RealtimeResult<()> {
        enum Wait {
            Attempt(Attempt),
            NextReconnect(watch::Receiver<ConnectionState>),
        }

        let wait = {
            let mut slot = self.inner.slot.lock();
            match self.inner.state() {
                ConnectionState::Connected => return Ok(()),
                // A fresh receiver has already seen the current state.
                ConnectionState::Reconnecting => Wait::NextReconnect(self.inner.state_tx.subscribe()),
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    match slot.pending.clone() {
                        Some(attempt) => {
                            debug!("Connection attempt in flight, waiting for it");
                            Wait::Attempt(attempt)
                        }
                        None => Wait::Attempt(self.start_attempt(&mut slot)),
                    }
                }
            }
        };

        match wait {
            Wait::Attempt(attempt) => attempt.await,
            Wait::NextReconnect(mut rx) => {
                rx.changed().await.map_err(|_| RealtimeError::Stopped)?;
                let state = *rx.borrow();
                match state {
                    ConnectionState::Connected => Ok(()),
                    ConnectionState::Disconnected => Err(RealtimeError::ConnectionUnavailable(
                        "reconnect abandoned".to_string(),
                    )),
                    _ => Err(RealtimeError::ConnectionUnavailable(
                        "reconnect attempt failed".to_string(),
                    )),
                }
            }
        }
    }

    fn start_attempt(&self, slot: &mut Slot) -> Attempt {
        let generation = slot.generation;
        self.inner.set_state(ConnectionState::Connecting);
        debug!(generation, "Starting realtime connection attempt");

        // The attempt runs on its own task so dropped callers cannot cancel it.
        let handle = tokio::spawn(Inner::connect_initial(Arc::clone(&self.inner), generation));
        let attempt = async move {
            handle.await.unwrap_or_else(|e| {
                Err(RealtimeError::ConnectionUnavailable(format!(
                    "connection task failed: {e}"
                )))
            })
        }
        .boxed()
        .shared();

        slot.pending = Some(attempt.clone());
        attempt
    }

    /// Add `topic` to the subscription set and join it now if connected.
    ///
    /// A failed network join keeps the topic; it is retried on the next
    /// reconnect.
    pub async fn join(&self, topic: &str) -> RealtimeResult<()> {
        let added = self.inner.subscriptions.join(topic);
        debug!(topic, added, "Joining topic");

        if !self.is_connected() {
            return Ok(());
        }

        self.inner
            .transport
            .invoke(HubMethod::JoinTemplateGroup, topic)
            .await
            .map_err(|e| {
                warn!(topic, error = %e, "Failed to join topic, keeping it for the next reconnect");
                RealtimeError::SubscriptionJoinFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }
            })
    }

    /// Remove `topic` from the subscription set, then leave it on the server
    /// if connected. The topic is removed even when the leave call fails.
    pub async fn leave(&self, topic: &str) -> RealtimeResult<()> {
        let removed = self.inner.subscriptions.leave(topic);
        debug!(topic, removed, "Leaving topic");

        if !self.is_connected() {
            return Ok(());
        }

        self.inner
            .transport
            .invoke(HubMethod::LeaveTemplateGroup, topic)
            .await
            .map_err(|e| {
                warn!(topic, error = %e, "Failed to leave topic");
                RealtimeError::SubscriptionLeaveFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }
            })
    }

    /// Leave every topic (best effort), clear the set, and close the
    /// connection. Not retried. Listeners stay registered.
    pub async fn stop(&self) {
        let was_connected = {
            let mut slot = self.inner.slot.lock();
            slot.generation += 1;
            slot.pending = None;
            let was_connected = self.inner.state() == ConnectionState::Connected;
            self.inner.set_state(ConnectionState::Disconnected);
            was_connected
        };

        let topics = self.inner.subscriptions.drain();

        // Waits out an attempt still opening; attempts started after this
        // point queue behind the teardown.
        let _opening = self.inner.open_lock.lock().await;
        if was_connected {
            for topic in &topics {
                if let Err(e) = self
                    .inner
                    .transport
                    .invoke(HubMethod::LeaveTemplateGroup, topic)
                    .await
                {
                    debug!(topic = %topic, error = %e, "Ignoring leave failure during shutdown");
                }
            }
        }

        self.inner.transport.close().await;
        info!(topics = topics.len(), "Realtime connection stopped");
    }

    /// Register a raw listener, replacing any previous one for `event`.
    pub fn on_event<F>(&self, event: HubEvent, callback: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.listeners.on(event, callback);
    }

    pub fn on_receive_comment<F>(&self, callback: F)
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        self.inner.listeners.on_receive_comment(callback);
    }

    pub fn on_update_comment<F>(&self, callback: F)
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        self.inner.listeners.on_update_comment(callback);
    }

    pub fn on_delete_comment<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.inner.listeners.on_delete_comment(callback);
    }

    pub fn on_update_likes<F>(&self, callback: F)
    where
        F: Fn(LikesUpdate) + Send + Sync + 'static,
    {
        self.inner.listeners.on_update_likes(callback);
    }

    pub fn off(&self, event: HubEvent) -> bool {
        self.inner.listeners.off(event)
    }

    pub fn remove_all_listeners(&self) {
        self.inner.listeners.clear();
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Always notifies watchers, even when the state is unchanged.
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    async fn open(&self) -> RealtimeResult<TransportEvents> {
        let token = self.tokens.access_token().await?;
        self.transport.connect(token).await
    }

    async fn connect_initial(inner: Arc<Inner>, generation: u64) -> RealtimeResult<()> {
        let opening = inner.open_lock.lock().await;
        if !inner.is_current(generation) {
            return Err(RealtimeError::Stopped);
        }
        let opened = inner.open().await;

        let stale = {
            let mut slot = inner.slot.lock();
            if slot.generation == generation {
                slot.pending = None;
                inner.set_state(match opened {
                    Ok(_) => ConnectionState::Connected,
                    Err(_) => ConnectionState::Disconnected,
                });
                false
            } else {
                true
            }
        };

        if stale {
            if opened.is_ok() {
                inner.transport.close().await;
            }
            return Err(RealtimeError::Stopped);
        }
        drop(opening);

        let events = opened.map_err(|e| {
            warn!(error = %e, "Realtime connection failed");
            RealtimeError::ConnectionUnavailable(e.to_string())
        })?;

        info!("Realtime connection established");
        inner.replay_subscriptions().await;
        tokio::spawn(Inner::run_connection(Arc::clone(&inner), generation, events));
        Ok(())
    }

    /// Pump events into listeners; reconnect whenever the transport drops.
    async fn run_connection(inner: Arc<Inner>, generation: u64, mut events: TransportEvents) {
        loop {
            let error = inner.pump(&mut events).await;
            match inner.reconnect(generation, error).await {
                Some(next) => events = next,
                None => return,
            }
        }
    }

    async fn pump(&self, events: &mut TransportEvents) -> Option<String> {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Invocation { target, arguments } => {
                    self.listeners.dispatch(&target, &arguments);
                }
                TransportEvent::Closed { error } => return error,
            }
        }
        None
    }

    async fn reconnect(&self, generation: u64, error: Option<String>) -> Option<TransportEvents> {
        {
            let slot = self.slot.lock();
            if slot.generation != generation {
                return None;
            }
            self.set_state(ConnectionState::Reconnecting);
        }
        warn!(
            error = error.as_deref().unwrap_or("closed by server"),
            "Realtime connection lost, reconnecting"
        );

        let mut attempt: u32 = 0;
        loop {
            if !self.config.allows_attempt(attempt) {
                let slot = self.slot.lock();
                if slot.generation == generation {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(attempts = attempt, "Giving up on realtime reconnect");
                }
                return None;
            }

            let delay = self.config.delay_for_attempt(attempt);
            attempt += 1;
            info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            tokio::time::sleep(delay).await;

            let opening = self.open_lock.lock().await;
            if !self.is_current(generation) {
                return None;
            }

            let opened = self.open().await;
            let stale = {
                let slot = self.slot.lock();
                if slot.generation == generation {
                    // Re-sending Reconnecting wakes callers waiting on this attempt.
                    self.set_state(match opened {
                        Ok(_) => ConnectionState::Connected,
                        Err(_) => ConnectionState::Reconnecting,
                    });
                    false
                } else {
                    true
                }
            };

            if stale {
                if opened.is_ok() {
                    self.transport.close().await;
                }
                return None;
            }
            drop(opening);

            match opened {
                Ok(events) => {
                    info!(attempt, "Realtime connection re-established");
                    self.replay_subscriptions().await;
                    return Some(events);
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }
    }

    /// One join per topic. Failures are logged; the topic stays in the set.
    async fn replay_subscriptions(&self) {
        let topics = self.subscriptions.members();
        if topics.is_empty() {
            return;
        }
        debug!(count = topics.len(), "Replaying subscriptions");

        for topic in topics {
            if !self.subscriptions.contains(&topic) {
                continue;
            }
            if let Err(e) = self
                .transport
                .invoke(HubMethod::JoinTemplateGroup, &topic)
                .await
            {
                warn!(topic = %topic, error = %e, "Failed to rejoin topic");
            }
        }
    }
}
