//! Best-effort fan-out of session state to observer clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::ObserverMessage;
use crate::session::{CallSession, SessionStore};

pub const DEFAULT_OBSERVER_QUEUE_DEPTH: usize = 64;

struct Observer {
    target: String,
    tx: mpsc::Sender<ObserverMessage>,
}

/// Pushes session snapshots and pending actions to connected observers.
///
/// Each observer owns a bounded queue. A full or closed queue removes the
/// observer from the fan-out set instead of blocking the publisher.
#[derive(Clone)]
pub struct ObserverBroadcaster {
    store: SessionStore,
    observers: Arc<DashMap<u64, Observer>>,
    next_id: Arc<AtomicU64>,
    queue_depth: usize,
}

impl std::fmt::Debug for ObserverBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBroadcaster")
            .field("observers", &self.observers.len())
            .field("queue_depth", &self.queue_depth)
            .finish_non_exhaustive()
    }
}

/// Receiving end of one observer. Dropping it unsubscribes.
pub struct ObserverSubscription {
    id: u64,
    rx: mpsc::Receiver<ObserverMessage>,
    observers: Arc<DashMap<u64, Observer>>,
}

impl ObserverSubscription {
    /// Next pushed message, or `None` once the broadcaster dropped this
    /// observer and the queue is drained.
    pub async fn recv(&mut self) -> Option<ObserverMessage> {
        self.rx.recv().await
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ObserverSubscription {
    fn drop(&mut self) {
        self.observers.remove(&self.id);
    }
}

impl ObserverBroadcaster {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self::with_queue_depth(store, DEFAULT_OBSERVER_QUEUE_DEPTH)
    }

    #[must_use]
    pub fn with_queue_depth(store: SessionStore, queue_depth: usize) -> Self {
        Self {
            store,
            observers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register an observer for the session named by `key` (session id or
    /// stream handle).
    ///
    /// If the session already exists the observer immediately receives its
    /// snapshot followed by any outstanding pending action. The queue always
    /// has room for both.
    #[must_use]
    pub fn subscribe(&self, key: &str) -> ObserverSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_depth.max(2));
        self.observers.insert(
            id,
            Observer {
                target: key.to_string(),
                tx: tx.clone(),
            },
        );
        tracing::debug!(observer = id, key, "observer subscribed");

        if let Some(session) = self.store.find(key) {
            if let Err(err) = tx.try_send(ObserverMessage::snapshot(&session)) {
                tracing::warn!(observer = id, "initial snapshot not queued: {err}");
            }
            if let Some(action) = session.pending_action {
                match tx.try_send(ObserverMessage::action(action.clone())) {
                    Ok(()) => {
                        tracing::debug!(observer = id, action = %action.name, "delivered outstanding action");
                        self.store.acknowledge_pending_action(&session.session_id, &action);
                    }
                    Err(err) => {
                        tracing::warn!(observer = id, action = %action.name, "outstanding action kept: {err}");
                    }
                }
            }
        }

        ObserverSubscription {
            id,
            rx,
            observers: Arc::clone(&self.observers),
        }
    }

    /// Push the current snapshot of `session_id`, then its pending action.
    ///
    /// The action is cleared only when at least one observer receives it;
    /// otherwise it stays outstanding for the next observer to join.
    pub fn notify(&self, session_id: &str) {
        let Some(session) = self.store.get(session_id) else {
            return;
        };
        if self.publish(&session, &ObserverMessage::snapshot(&session)) == 0 {
            return;
        }
        if let Some(action) = &session.pending_action {
            if self.publish(&session, &ObserverMessage::action(action.clone())) > 0 {
                self.store.acknowledge_pending_action(session_id, action);
            } else {
                tracing::debug!(session_id, action = %action.name, "no observer took the action, keeping it");
            }
        }
    }

    /// Push a snapshot of a session that may already be gone from the store.
    pub fn publish_snapshot(&self, session: &CallSession) -> usize {
        self.publish(session, &ObserverMessage::snapshot(session))
    }

    /// Deliver `message` to every observer of `session`. Returns the number
    /// of observers that accepted it.
    pub fn publish(&self, session: &CallSession, message: &ObserverMessage) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for entry in self.observers.iter() {
            if !session.answers_to(&entry.target) {
                continue;
            }
            match entry.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(observer = *entry.key(), session_id = %session.session_id, "observer queue full, dropping observer");
                    dropped.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => dropped.push(*entry.key()),
            }
        }
        for id in dropped {
            self.observers.remove(&id);
        }
        delivered
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}
