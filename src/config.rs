//! Agent and swarm configuration
//!
//! Everything has a default, so an empty document is a valid config. A swarm
//! file lists the agents to spawn together with their goal descriptions:
//!
//! ```yaml
//! bus_capacity: 256
//! agent:
//!   tick_interval_ms: 100
//!   election:
//!     quiescent_ticks: 2
//! agents:
//!   - id: 1
//!     goals:
//!       - goal: I have pylon
//!         require:
//!           - [gather 1, {target: unit}, General]
//!     knowledge:
//!       minerals: {gathered: 0}
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::DEFAULT_CAPACITY;
use crate::description::parse_description;
use crate::error::SwarmError;
use crate::goal::Goal;
use crate::knowledge::Knowledge;
use crate::protocol::{AgentId, DEFAULT_TOPIC};

/// Claim protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Consecutive ticks a candidate set must stay unchanged before deciding.
    /// Zero decides on the first observation.
    pub quiescent_ticks: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self { quiescent_ticks: 1 }
    }
}

/// Per-agent tick loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Length of one tick
    pub tick_interval_ms: u64,
    /// Upper bound on bus reads drained per tick
    pub drain_per_tick: usize,
    /// Bus topic to gossip on
    pub topic: String,
    pub election: ElectionConfig,
    /// Leave once every owned root goal is achieved
    pub stop_when_achieved: bool,
    /// Leave after this many ticks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            drain_per_tick: 32,
            topic: DEFAULT_TOPIC.to_string(),
            election: ElectionConfig::default(),
            stop_when_achieved: false,
            max_ticks: None,
        }
    }
}

impl AgentConfig {
    /// Tick length as a `Duration`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.drain_per_tick == 0 {
            return Err(SwarmError::Config("drain_per_tick must be at least 1".into()));
        }
        if self.topic.is_empty() {
            return Err(SwarmError::Config("topic must not be empty".into()));
        }
        Ok(())
    }
}

/// One agent to spawn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    /// `{goal, require}` descriptions, one per root goal
    #[serde(default)]
    pub goals: Vec<Value>,
    /// Knowledge the agent starts with
    #[serde(default)]
    pub knowledge: Knowledge,
}

impl AgentSpec {
    /// Build the agent's goal trees
    pub fn goal_trees(&self) -> Result<Vec<Goal>, SwarmError> {
        self.goals.iter().map(parse_description).collect()
    }
}

/// Swarm settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Messages a slow agent may fall behind before losing some
    pub bus_capacity: usize,
    /// Settings shared by every agent
    pub agent: AgentConfig,
    pub agents: Vec<AgentSpec>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_CAPACITY,
            agent: AgentConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl SwarmConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(document: &str) -> Result<Self, SwarmError> {
        let config: SwarmConfig = serde_yaml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SwarmError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&document)
    }

    /// Check agent settings, capacity and agent id uniqueness
    pub fn validate(&self) -> Result<(), SwarmError> {
        self.agent.validate()?;
        if self.bus_capacity == 0 {
            return Err(SwarmError::Config("bus_capacity must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for spec in &self.agents {
            if !seen.insert(spec.id) {
                return Err(SwarmError::DuplicateAgent(spec.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.drain_per_tick, 32);
        assert_eq!(config.topic, "broadcasting");
        assert_eq!(config.election.quiescent_ticks, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = SwarmConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.agent, AgentConfig::default());
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_parse_swarm_file() {
        let config = SwarmConfig::from_yaml_str(
            r#"
bus_capacity: 64
agent:
  tick_interval_ms: 20
  election:
    quiescent_ticks: 3
agents:
  - id: 1
    goals:
      - goal: root
        require:
          - [T1, {target: unit}, General]
    knowledge:
      minerals: {gathered: 10}
  - id: 2
"#,
        )
        .unwrap();

        assert_eq!(config.bus_capacity, 64);
        assert_eq!(config.agent.tick_interval_ms, 20);
        assert_eq!(config.agent.drain_per_tick, 32);
        assert_eq!(config.agent.election.quiescent_ticks, 3);
        assert_eq!(config.agents.len(), 2);

        let trees = config.agents[0].goal_trees().unwrap();
        assert_eq!(trees[0].name(), "root");
        assert_eq!(config.agents[0].knowledge.numeric("minerals", "gathered"), Some(10.0));
        assert!(config.agents[1].goal_trees().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_agent_ids_rejected() {
        let err = SwarmConfig::from_yaml_str("agents: [{id: 4}, {id: 4}]").unwrap_err();
        assert!(matches!(err, SwarmError::DuplicateAgent(AgentId(4))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(SwarmConfig::from_yaml_str("agent: {drain_per_tick: 0}").is_err());
        assert!(SwarmConfig::from_yaml_str("bus_capacity: 0").is_err());
        assert!(SwarmConfig::from_yaml_str("agent: [1, 2]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agent:\n  tick_interval_ms: 5\nagents:\n  - id: 9").unwrap();

        let config = SwarmConfig::load(file.path()).unwrap();
        assert_eq!(config.agent.tick_interval_ms, 5);
        assert_eq!(config.agents[0].id, AgentId(9));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SwarmConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, SwarmError::Io(_)));
    }
}
