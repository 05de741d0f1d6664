//! Swarm management - spawning agents that share one bus

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::action::ActionRegistry;
use crate::agent::{Agent, AgentHandle, AgentReport};
use crate::channel::{ChannelBuilder, LocalBus};
use crate::config::{AgentConfig, SwarmConfig};
use crate::error::SwarmError;
use crate::goal::Goal;
use crate::knowledge::Knowledge;
use crate::protocol::AgentId;

/// A group of agents gossiping over one in-process bus.
///
/// The swarm only starts and stops agents; it takes no part in their
/// coordination.
pub struct Swarm {
    /// Settings handed to every spawned agent
    pub config: AgentConfig,
    bus: LocalBus,
    registry: Arc<ActionRegistry>,
    agents: RwLock<HashMap<AgentId, AgentHandle>>,
}

impl Swarm {
    /// Create an empty swarm
    pub fn new(config: AgentConfig, registry: Arc<ActionRegistry>, bus: LocalBus) -> Self {
        info!(topic = %config.topic, actions = registry.len(), "Creating new swarm");

        Self {
            config,
            bus,
            registry,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Build the bus and spawn every agent listed in `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: SwarmConfig, registry: ActionRegistry) -> Result<Self, SwarmError> {
        config.validate()?;

        let bus = ChannelBuilder::new().capacity(config.bus_capacity).build();
        let swarm = Self::new(config.agent, Arc::new(registry), bus);

        for spec in &config.agents {
            swarm.spawn_agent(spec.id, spec.goal_trees()?, &spec.knowledge)?;
        }

        Ok(swarm)
    }

    /// Spawn an agent on its own task
    pub fn spawn_agent(
        &self,
        id: AgentId,
        goals: Vec<Goal>,
        knowledge: &Knowledge,
    ) -> Result<AgentHandle, SwarmError> {
        let mut agents = self.agents.write();
        if agents.contains_key(&id) {
            return Err(SwarmError::DuplicateAgent(id));
        }

        let agent = Agent::new(
            id,
            self.config.clone(),
            goals,
            Arc::clone(&self.registry),
            self.bus.endpoint(),
        )?
        .with_knowledge(knowledge);

        let handle = agent.spawn();
        agents.insert(id, handle.clone());

        info!(agent_id = %id, agents = agents.len(), "Spawned agent");

        Ok(handle)
    }

    /// Get an agent by ID
    pub fn get_agent(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.read().get(id).cloned()
    }

    /// All agent IDs, ascending
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get agent count
    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    /// Shared bus the agents gossip on
    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    /// Stop one agent and wait for it to depart
    pub async fn terminate_agent(&self, id: &AgentId) -> Result<AgentReport, SwarmError> {
        let handle = self
            .agents
            .write()
            .remove(id)
            .ok_or(SwarmError::AgentNotFound(*id))?;

        handle.stop();
        let report = handle.join().await?;

        info!(agent_id = %id, ticks = report.ticks, "Terminated agent");
        Ok(report)
    }

    /// Wait for every agent to stop on its own, in ascending id order.
    ///
    /// Only returns once each agent has hit `stop_when_achieved` or
    /// `max_ticks`.
    pub async fn wait(&self) -> Result<Vec<AgentReport>, SwarmError> {
        let handles = self.drain();
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            reports.push(handle.join().await?);
        }
        Ok(reports)
    }

    /// Stop every agent and collect the reports of those that exited cleanly
    pub async fn shutdown(&self) -> Vec<AgentReport> {
        let handles = self.drain();
        for handle in &handles {
            handle.stop();
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join().await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(agent_id = %handle.id(), error = %e, "Agent did not stop cleanly"),
            }
        }

        info!(agents = reports.len(), "Swarm shut down");
        reports
    }

    fn drain(&self) -> Vec<AgentHandle> {
        let mut handles: Vec<AgentHandle> = self.agents.write().drain().map(|(_, h)| h).collect();
        handles.sort_unstable_by_key(AgentHandle::id);
        handles
    }
}
