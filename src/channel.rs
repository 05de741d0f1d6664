//! Broadcast bus used by agents to gossip
//!
//! The contract is deliberately weak: fire-and-forget publish, non-blocking
//! receive, at-most-once delivery, no ordering across publishers and no
//! replay for late joiners. [`LocalBus`] provides that contract inside one
//! process on top of a tokio broadcast channel.

use tokio::sync::broadcast;
use tracing::warn;

/// Default number of in-flight messages kept for slow receivers
pub const DEFAULT_CAPACITY: usize = 1024;

/// Publish/subscribe endpoint held by a single agent
pub trait Bus: Send {
    /// Publish `payload` on `topic`
    fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError>;

    /// Next pending payload on `topic`, `None` when nothing is waiting
    fn try_receive(&mut self, topic: &str) -> Result<Option<String>, ChannelError>;
}

#[derive(Debug, Clone)]
struct Envelope {
    topic: String,
    payload: String,
}

/// In-process broadcast bus
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBus {
    /// Create a bus with the default capacity
    pub fn new() -> Self {
        ChannelBuilder::new().build()
    }

    /// Attach a new endpoint. It only sees messages published from now on.
    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Number of attached endpoints
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One agent's view of a [`LocalBus`]
pub struct LocalEndpoint {
    tx: broadcast::Sender<Envelope>,
    rx: broadcast::Receiver<Envelope>,
}

impl Bus for LocalEndpoint {
    fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        let envelope = Envelope {
            topic: topic.to_string(),
            payload,
        };
        // Our own receiver keeps the channel open, so an error means it is gone
        self.tx.send(envelope).map(|_| ()).map_err(|_| ChannelError::Closed)
    }

    fn try_receive(&mut self, topic: &str) -> Result<Option<String>, ChannelError> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if envelope.topic == topic => return Ok(Some(envelope.payload)),
                // not subscribed to that topic
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus receiver lagged, messages dropped");
                    continue;
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(ChannelError::Closed),
            }
        }
    }
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,
}

/// Builder for creating configured buses
pub struct ChannelBuilder {
    capacity: usize,
}

impl ChannelBuilder {
    /// Create a builder with the default capacity
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Set how many messages a slow receiver may fall behind before losing some
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Build the bus
    pub fn build(self) -> LocalBus {
        let (tx, _) = broadcast::channel(self.capacity);
        LocalBus { tx }
    }
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
