//! Cross-scope session events. Every session scope of the same origin opens a
//! [`SessionBroadcaster`] on a shared [`BroadcastHub`]; a scope never receives
//! the events it published itself.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::{
    sync::broadcast::{self, error::RecvError, error::TryRecvError},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default channel name, one per origin.
pub const DEFAULT_CHANNEL: &str = "auth";
const HUB_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CrossTabEvent {
    Login,
    Logout,
}

#[derive(Clone, Debug)]
struct Envelope {
    origin: Uuid,
    event: CrossTabEvent,
}

/// The shared medium. Clones address the same channel.
#[derive(Clone)]
pub struct BroadcastHub {
    name: Arc<str>,
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastHub {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self {
            name: Arc::from(name),
            tx,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a broadcaster for one session scope.
    #[must_use]
    pub fn open(&self) -> SessionBroadcaster {
        let id = Uuid::new_v4();
        debug!(channel = %self.name, scope = %id, "broadcaster opened");
        SessionBroadcaster {
            id,
            tx: self.tx.clone(),
            closed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Observes every event on the hub regardless of origin.
    #[must_use]
    pub fn monitor(&self) -> HubMonitor {
        HubMonitor {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL)
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("name", &self.name)
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

/// Non-blocking view of the events published on a hub since it was created.
#[derive(Debug)]
pub struct HubMonitor {
    rx: broadcast::Receiver<Envelope>,
}

impl HubMonitor {
    /// Next event already published, if any.
    pub fn try_next(&mut self) -> Option<CrossTabEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope.event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains everything published so far.
    pub fn drain(&mut self) -> Vec<CrossTabEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

pub struct SessionBroadcaster {
    id: Uuid,
    tx: broadcast::Sender<Envelope>,
    closed: AtomicBool,
    listeners: Mutex<Vec<AbortHandle>>,
}

impl SessionBroadcaster {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publishes to every other scope. Returns the number of receivers on the
    /// hub at the time of sending; zero when closed or nobody listens.
    pub fn publish(&self, event: CrossTabEvent) -> usize {
        if self.is_closed() {
            debug!(?event, "broadcaster closed; event dropped");
            return 0;
        }
        let envelope = Envelope {
            origin: self.id,
            event,
        };
        match self.tx.send(envelope) {
            Ok(receivers) => {
                debug!(?event, receivers, "session event published");
                receivers
            }
            Err(_) => 0,
        }
    }

    /// Runs `handler` for every event published by another scope, in order.
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(CrossTabEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let own = self.id;
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.origin == own => {}
                    Ok(envelope) => handler(envelope.event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session events dropped; listener lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if self.is_closed() {
            task.abort();
        } else {
            self.listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task.abort_handle());
        }
        Subscription { task: Some(task) }
    }

    /// Stops every listener opened through this broadcaster and drops further
    /// publishes. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = std::mem::take(
            &mut *self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in &listeners {
            listener.abort();
        }
        debug!(scope = %self.id, listeners = listeners.len(), "broadcaster closed");
    }
}

impl Drop for SessionBroadcaster {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SessionBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBroadcaster")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Handle of a running listener. Dropping it stops the listener.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
