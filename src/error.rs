//! Coterie error types

use thiserror::Error;

use crate::channel::ChannelError;
use crate::protocol::AgentId;

/// Errors that can occur while building or running a coterie
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Goal description does not follow the `{goal, require}` schema
    #[error("Invalid goal description: {0}")]
    InvalidDescription(String),

    /// Goal with neither tasks nor subgoals
    #[error("Goal `{0}` has no tasks and no subgoals")]
    EmptyGoal(String),

    /// Goal or task name used twice in one tree
    #[error("Duplicate name in goal tree: {0}")]
    DuplicateName(String),

    /// Agent not found
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Agent id already taken in this swarm
    #[error("Agent already exists: {0}")]
    DuplicateAgent(AgentId),

    /// Broadcast bus error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Wire encoding error
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Agent task panicked or was aborted
    #[error("Agent task failed: {0}")]
    Join(String),
}
