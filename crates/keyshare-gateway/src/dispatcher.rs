use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use keyshare_types::events::GatewayEvent;

/// Manages per-user event channels and fans out targeted events.
///
/// Sends are synchronous and fire-and-forget: a user without a live
/// connection, or with a closed channel, is skipped. One recipient can never
/// fail delivery to another.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Per-user targeted send channels: login -> (conn_id, sender)
    user_channels: RwLock<HashMap<String, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

type UserChannels = HashMap<String, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>;

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    // A poisoned lock only means a panic elsewhere mid-write; the channel
    // map itself is always left in a usable state, so recover the guard.
    fn channels_read(&self) -> RwLockReadGuard<'_, UserChannels> {
        self.inner
            .user_channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channels_write(&self) -> RwLockWriteGuard<'_, UserChannels> {
        self.inner
            .user_channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub fn register_user_channel(
        &self,
        login: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels_write().insert(login.to_string(), (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user channel, but only if conn_id still matches —
    /// a newer connection for the same login must not be torn down.
    pub fn unregister_user_channel(&self, login: &str, conn_id: Uuid) {
        let mut channels = self.channels_write();
        if let Some((stored_conn_id, _)) = channels.get(login) {
            if *stored_conn_id == conn_id {
                channels.remove(login);
            }
        }
    }

    /// Send a targeted event to a specific user. Best-effort: missing or
    /// closed channels are logged at trace level and skipped.
    pub fn send_to_user(&self, login: &str, event: GatewayEvent) {
        match self.channels_read().get(login) {
            Some((_, tx)) => {
                if tx.send(event).is_err() {
                    trace!("Channel for '{}' closed, dropping event", login);
                }
            }
            None => trace!("No live channel for '{}', dropping event", login),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed_event() -> GatewayEvent {
        GatewayEvent::Ready {
            login: "alice".into(),
        }
    }

    #[test]
    fn send_to_registered_user_delivers() {
        let dispatcher = Dispatcher::new();
        let (_conn, mut rx) = dispatcher.register_user_channel("alice");

        dispatcher.send_to_user("alice", removed_event());

        assert!(matches!(rx.try_recv(), Ok(GatewayEvent::Ready { .. })));
    }

    #[test]
    fn send_to_unknown_user_is_a_noop() {
        let dispatcher = Dispatcher::new();
        dispatcher.send_to_user("nobody", removed_event());
    }

    #[test]
    fn stale_conn_id_does_not_unregister_newer_connection() {
        let dispatcher = Dispatcher::new();
        let (old_conn, _old_rx) = dispatcher.register_user_channel("alice");
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel("alice");

        dispatcher.unregister_user_channel("alice", old_conn);

        dispatcher.send_to_user("alice", removed_event());
        assert!(new_rx.try_recv().is_ok());
    }
}
