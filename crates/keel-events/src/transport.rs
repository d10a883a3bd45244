//! Distributed transport seam
//!
//! A transport carries serialized event frames between bus instances. The
//! bus forwards every non-`system.*` publish to `send` with the event's
//! top-level namespace, and consumes inbound frames from the receiver
//! returned by `subscribe`.
//!
//! Two implementations ship with the crate: [`LoopbackTransport`] wires
//! buses together inside one process (composition and tests), and the
//! Redis-backed transport in [`crate::redis`] (feature `redis`) spans
//! processes.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Transport error types.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to connect to the backend
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failed to send a frame
    #[error("Send error: {0}")]
    Send(String),

    /// Failed to establish the inbound subscription
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// The transport has been closed
    #[error("Transport closed")]
    Closed,
}

/// Pub/sub transport carrying serialized event frames between processes.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Send a frame on the channel for the given event namespace.
    async fn send(&self, namespace: &str, frame: String) -> Result<(), TransportError>;

    /// Open the inbound frame stream.
    ///
    /// The returned receiver yields every frame published by any bus sharing
    /// the transport, including this one; the bus filters self-originated
    /// events by `origin`.
    async fn subscribe(&self) -> Result<mpsc::Receiver<String>, TransportError>;
}

/// In-process transport hub.
///
/// All [`LoopbackTransport`]s created from one hub see each other's frames,
/// which lets multiple `EventBus` instances in a single process behave like
/// a distributed deployment.
#[derive(Clone)]
pub struct LoopbackHub {
    frames: broadcast::Sender<String>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LoopbackHub {
    /// Create a hub with the given frame buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self { frames }
    }

    /// Create a transport endpoint attached to this hub.
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            frames: self.frames.clone(),
        }
    }
}

/// Transport endpoint attached to a [`LoopbackHub`].
pub struct LoopbackTransport {
    frames: broadcast::Sender<String>,
}

#[async_trait]
impl EventTransport for LoopbackTransport {
    async fn send(&self, _namespace: &str, frame: String) -> Result<(), TransportError> {
        self.frames
            .send(frame)
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<String>, TransportError> {
        let mut rx = self.frames.subscribe();
        let (tx, out) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Loopback subscriber lagged, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out)
    }
}
