//! Wire protocol shared by every agent on the bus
//!
//! Payloads travel as JSON strings. The envelope is internally tagged:
//!
//! ```json
//! {"type": "knowledge", "from": 3, "snapshot": {"T1": {"is": "Ping", "ping": [1, 3]}}}
//! {"type": "departure", "from": 3}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::knowledge::Knowledge;

/// Topic every agent publishes and subscribes to by default
pub const DEFAULT_TOPIC: &str = "broadcasting";

/// Agent identifier. Totally ordered; the election picks the smallest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u64);

impl AgentId {
    /// Create an ID from its numeric tag
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    /// Numeric tag
    pub fn tag(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

impl From<u64> for AgentId {
    fn from(tag: u64) -> Self {
        Self(tag)
    }
}

/// Messages exchanged over the broadcast bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Full knowledge snapshot of the sender
    Knowledge { from: AgentId, snapshot: Knowledge },
    /// Sender is leaving the coterie
    Departure { from: AgentId },
}

impl Message {
    /// Sender of the message
    pub fn from(&self) -> AgentId {
        match self {
            Message::Knowledge { from, .. } | Message::Departure { from } => *from,
        }
    }

    /// Serialize to a JSON payload
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON payload
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
