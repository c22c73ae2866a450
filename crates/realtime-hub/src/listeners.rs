//! Event listener registry with one callback per event.

use crate::events::{deleted_comment_id, Comment, HubEvent, LikesUpdate};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw listener receiving the invocation arguments.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Maps each hub event to at most one callback.
///
/// Registering for an event that already has a callback replaces it.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<HubEvent, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`. Returns true if it replaced an
    /// existing callback.
    pub fn on<F>(&self, event: HubEvent, callback: F) -> bool
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let replaced = self
            .listeners
            .lock()
            .insert(event, Arc::new(callback))
            .is_some();
        debug!(event = %event, replaced, "Registered hub listener");
        replaced
    }

    pub fn on_receive_comment<F>(&self, callback: F) -> bool
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        self.on_comment(HubEvent::ReceiveComment, callback)
    }

    pub fn on_update_comment<F>(&self, callback: F) -> bool
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        self.on_comment(HubEvent::UpdateComment, callback)
    }

    pub fn on_delete_comment<F>(&self, callback: F) -> bool
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on(HubEvent::DeleteComment, move |args| {
            match deleted_comment_id(args) {
                Ok(id) => callback(id),
                Err(e) => warn!(error = %e, "Dropping hub event"),
            }
        })
    }

    pub fn on_update_likes<F>(&self, callback: F) -> bool
    where
        F: Fn(LikesUpdate) + Send + Sync + 'static,
    {
        self.on(HubEvent::UpdateLikes, move |args| {
            match LikesUpdate::from_arguments(args) {
                Ok(update) => callback(update),
                Err(e) => warn!(error = %e, "Dropping hub event"),
            }
        })
    }

    fn on_comment<F>(&self, event: HubEvent, callback: F) -> bool
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        self.on(event, move |args| match Comment::from_arguments(event, args) {
            Ok(comment) => callback(comment),
            Err(e) => warn!(error = %e, "Dropping hub event"),
        })
    }

    /// Remove the callback for `event`. Returns true if one was registered.
    pub fn off(&self, event: HubEvent) -> bool {
        self.listeners.lock().remove(&event).is_some()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn is_registered(&self, event: HubEvent) -> bool {
        self.listeners.lock().contains_key(&event)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Deliver an invocation to its callback, if any. Returns true if a
    /// callback ran.
    ///
    /// The callback runs outside the registry lock so it may re-register.
    pub fn dispatch(&self, target: &str, arguments: &[Value]) -> bool {
        let Some(event) = HubEvent::from_name(target) else {
            debug!(target, "Ignoring unknown hub event");
            return false;
        };

        let listener = self.listeners.lock().get(&event).cloned();
        match listener {
            Some(listener) => {
                listener(arguments);
                true
            }
            None => false,
        }
    }
}
