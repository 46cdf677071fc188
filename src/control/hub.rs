//! Connection registry and event fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::control::protocol::ControlEnvelope;
use crate::domain::events::{Dispatch, EventTarget};

/// Outgoing buffer per connection.
pub const CONNECTION_BUFFER: usize = 256;

#[derive(Debug, Default)]
pub struct ControlHub {
    connections: RwLock<HashMap<Uuid, mpsc::Sender<ControlEnvelope>>>,
    verbose: AtomicBool,
}

impl ControlHub {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { connections: RwLock::new(HashMap::new()), verbose: AtomicBool::new(verbose) }
    }

    pub async fn register(&self, id: Uuid) -> mpsc::Receiver<ControlEnvelope> {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        self.connections.write().await.insert(id, tx);
        debug!("control connection {id} registered");
        rx
    }

    pub async fn unregister(&self, id: Uuid) {
        if self.connections.write().await.remove(&id).is_some() {
            debug!("control connection {id} removed");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::SeqCst)
    }

    pub fn toggle_verbose(&self) -> bool {
        !self.verbose.fetch_xor(true, Ordering::SeqCst)
    }

    /// Route one event. Non-forced log lines are dropped unless verbose.
    pub async fn deliver(&self, dispatch: &Dispatch) {
        if dispatch.event.is_optional_log() && !self.is_verbose() {
            return;
        }
        let envelope = ControlEnvelope::from(&dispatch.event);

        let mut closed = Vec::new();
        {
            let connections = self.connections.read().await;
            match dispatch.target {
                EventTarget::Broadcast => {
                    for (id, tx) in connections.iter() {
                        if !Self::send(*id, tx, envelope.clone()) {
                            closed.push(*id);
                        }
                    }
                }
                EventTarget::Connection(id) => {
                    if let Some(tx) = connections.get(&id) {
                        if !Self::send(id, tx, envelope) {
                            closed.push(id);
                        }
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in closed {
                connections.remove(&id);
                debug!("dropped closed control connection {id}");
            }
        }
    }

    /// `false` once the receiving side is gone.
    fn send(id: Uuid, tx: &mpsc::Sender<ControlEnvelope>, envelope: ControlEnvelope) -> bool {
        match tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                warn!("control connection {id} is lagging, dropping {}", envelope.action);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Drain the event bus until it closes or `shutdown` fires.
    pub async fn pump(&self, mut events: mpsc::UnboundedReceiver<Dispatch>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(dispatch) => self.deliver(&dispatch).await,
                    None => break,
                },
            }
        }
        debug!("event pump stopped");
    }
}
