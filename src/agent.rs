//! Agent implementation - one autonomous, independently ticking worker
//!
//! Each tick runs one reasoning cycle:
//!
//! 1. drain the bus and merge peer snapshots
//! 2. pull state labels from knowledge into the goal trees
//! 3. propagate achievement upward
//! 4. pick the leaf goal of every tree and mark it assigned
//! 5. claim a `General` task (idle) or poll `Query` tasks (working)
//! 6. execute the claimed task
//! 7. broadcast the knowledge snapshot
//!
//! Agents share nothing; everything they know about each other arrives
//! through the bus.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionRegistry, Handler};
use crate::channel::Bus;
use crate::claim::{ClaimStep, Election};
use crate::config::AgentConfig;
use crate::error::SwarmError;
use crate::goal::{Goal, GoalState, Task, TaskKind, TaskState};
use crate::knowledge::Knowledge;
use crate::protocol::{AgentId, Message};

/// What the agent is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MentalState {
    /// Looking for new work
    #[default]
    Idle,
    /// Acted; waiting for a query to confirm the outcome
    Working,
}

/// Lifecycle of an agent task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Spawning,
    Running,
    Stopping,
    Terminated,
}

/// Outcome of a single tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Peer messages merged this tick
    pub received: usize,
    /// Task executed this tick
    pub executed: Option<String>,
    /// Query tasks resolved this tick
    pub resolved: Vec<String>,
    pub mental_state: MentalState,
    /// Every owned root goal is achieved
    pub achieved: bool,
}

/// Final state handed back when an agent stops
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub id: AgentId,
    pub ticks: u64,
    pub achieved: bool,
    pub knowledge: Knowledge,
    pub goals: Vec<Goal>,
}

/// A single autonomous agent
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    config: AgentConfig,
    /// Goal trees owned by this agent
    goals: Vec<Goal>,
    /// Private replica of the shared knowledge
    knowledge: Knowledge,
    mental_state: MentalState,
    election: Election,
    /// Peers that announced their departure
    departed: BTreeSet<AgentId>,
    registry: Arc<ActionRegistry>,
    bus: Box<dyn Bus>,
    status: Arc<RwLock<AgentStatus>>,
    ticks: u64,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        id: AgentId,
        config: AgentConfig,
        goals: Vec<Goal>,
        registry: Arc<ActionRegistry>,
        bus: impl Bus + 'static,
    ) -> Result<Self, SwarmError> {
        config.validate()?;

        info!(
            agent_id = %id,
            goals = goals.len(),
            "Creating new agent"
        );

        Ok(Self {
            id,
            election: Election::new(config.election.quiescent_ticks),
            config,
            goals,
            knowledge: Knowledge::new(),
            mental_state: MentalState::Idle,
            departed: BTreeSet::new(),
            registry,
            bus: Box::new(bus),
            status: Arc::new(RwLock::new(AgentStatus::Spawning)),
            ticks: 0,
        })
    }

    /// Seed the knowledge store
    pub fn with_knowledge(mut self, knowledge: &Knowledge) -> Self {
        self.knowledge.merge(knowledge);
        self
    }

    /// Local knowledge replica
    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }

    /// Owned goal trees
    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    /// Current mental state
    pub fn mental_state(&self) -> MentalState {
        self.mental_state
    }

    /// Current lifecycle status
    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.write() = status;
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Peers known to have left
    pub fn departed(&self) -> &BTreeSet<AgentId> {
        &self.departed
    }

    /// Every owned root goal is achieved
    pub fn is_achieved(&self) -> bool {
        !self.goals.is_empty() && self.goals.iter().all(|g| g.state() == GoalState::Achieved)
    }

    /// Record something the agent perceived in its environment
    pub fn observe(&mut self, subject: &str, attribute: &str, value: impl Into<Value>) {
        self.knowledge.set(subject, attribute, value);
    }

    /// Run one reasoning cycle
    pub async fn tick(&mut self) -> Result<TickReport, SwarmError> {
        let received = self.perceive()?;

        for goal in &mut self.goals {
            goal.sync_from(&mut self.knowledge);
        }
        self.check_goal_achieved();

        self.update_mental_state();

        let mut executed = None;
        let mut resolved = Vec::new();
        match self.mental_state {
            MentalState::Working => resolved = self.poll_queries(),
            MentalState::Idle => {
                if let Some((handler, task)) = self.next_action() {
                    self.act(handler, &task).await;
                    executed = Some(task.name().to_string());
                }
            }
        }

        self.tell()?;
        self.ticks += 1;

        Ok(TickReport {
            received,
            executed,
            resolved,
            mental_state: self.mental_state,
            achieved: self.is_achieved(),
        })
    }

    /// Drain pending bus messages into knowledge
    fn perceive(&mut self) -> Result<usize, SwarmError> {
        let mut received = 0;

        for _ in 0..self.config.drain_per_tick {
            let Some(payload) = self.bus.try_receive(&self.config.topic)? else {
                break;
            };

            match Message::decode(&payload) {
                Ok(message) if message.from() == self.id => {}
                Ok(Message::Knowledge { snapshot, .. }) => {
                    self.knowledge.merge(&snapshot);
                    received += 1;
                }
                Ok(Message::Departure { from }) => {
                    info!(agent_id = %self.id, peer = %from, "Peer departed");
                    self.departed.insert(from);
                    received += 1;
                }
                Err(e) => warn!(agent_id = %self.id, error = %e, "Dropping undecodable message"),
            }
        }

        Ok(received)
    }

    /// Propagate achievement through every tree and record it in knowledge
    fn check_goal_achieved(&mut self) {
        for root in &mut self.goals {
            root.can_be_achieved();

            for goal in root.goals() {
                if goal.state() == GoalState::Achieved
                    && self.knowledge.label(goal.name()) != Some(GoalState::Achieved.label())
                {
                    info!(agent_id = %self.id, goal = %goal.name(), "Goal achieved");
                    self.knowledge
                        .set_label(goal.name(), GoalState::Achieved.label());
                }
            }
        }
    }

    /// Leaf goal of every tree, marked assigned
    fn assigned_leaves(&mut self) -> Vec<&mut Goal> {
        let knowledge = &mut self.knowledge;

        self.goals
            .iter_mut()
            .map(|root| {
                let leaf = root.leaf_mut();
                if !leaf.state().is_terminal() && leaf.state() != GoalState::Assigned {
                    leaf.set_state(GoalState::Assigned);
                    knowledge.set_label(leaf.name(), GoalState::Assigned.label());
                }
                leaf
            })
            .collect()
    }

    fn update_mental_state(&mut self) {
        let current = self.mental_state;
        let leaves = self.assigned_leaves();
        let tasks = || leaves.iter().flat_map(|leaf| leaf.tasks().iter());

        let tracking = tasks().any(|t| t.is_query() && !t.state().is_terminal());
        let claimable = tasks().any(|t| {
            t.is_general() && matches!(t.state(), TaskState::Ready | TaskState::Ping)
        });

        let next = match current {
            // nothing left to confirm
            MentalState::Working if !tracking => MentalState::Idle,
            // nothing left to claim, watch the outstanding queries
            MentalState::Idle if !claimable && tracking => MentalState::Working,
            state => state,
        };

        if next != current {
            debug!(agent_id = %self.id, from = ?current, to = ?next, "Mental state changed");
            self.mental_state = next;
        }
    }

    /// Evaluate every unresolved query of the current leaves
    fn poll_queries(&mut self) -> Vec<String> {
        let id = self.id;
        let registry = Arc::clone(&self.registry);
        let mut resolved = Vec::new();

        for root in &mut self.goals {
            let leaf = root.leaf_mut();
            for task in leaf.tasks_mut() {
                if !task.is_query() || task.state().is_terminal() {
                    continue;
                }

                let query = match registry.resolve(task) {
                    Some(Handler::Query(query)) => query,
                    _ => {
                        warn!(
                            agent_id = %id,
                            task = %task.name(),
                            action = ActionRegistry::action_id(task),
                            "No query registered for task"
                        );
                        continue;
                    }
                };

                if query.evaluate(task, &self.knowledge) {
                    task.set_state(TaskState::Done);
                    self.knowledge.set_label(task.name(), TaskState::Done.label());
                    self.knowledge.clear_ping(task.name());
                    info!(agent_id = %id, task = %task.name(), "Query satisfied");
                    resolved.push(task.name().to_string());
                }
            }
        }

        if !resolved.is_empty() {
            self.mental_state = MentalState::Idle;
        }
        resolved
    }

    /// Walk the leaf tasks through the claim protocol. At most one task is
    /// claimed per tick.
    fn next_action(&mut self) -> Option<(Handler, Task)> {
        let id = self.id;
        let registry = Arc::clone(&self.registry);

        for root in &mut self.goals {
            let leaf = root.leaf_mut();
            for task in leaf.tasks_mut() {
                match task.kind() {
                    TaskKind::General => {}
                    TaskKind::Query => continue,
                    TaskKind::Unrecognized(kind) => {
                        warn!(agent_id = %id, task = %task.name(), kind = %kind, "Skipping task of unknown kind");
                        continue;
                    }
                }

                let handler = match registry.resolve(task) {
                    Some(handler @ Handler::Effect(_)) => handler.clone(),
                    _ => {
                        if !task.state().is_terminal() {
                            warn!(
                                agent_id = %id,
                                task = %task.name(),
                                action = ActionRegistry::action_id(task),
                                "No action registered for task"
                            );
                        }
                        continue;
                    }
                };

                let step = self
                    .election
                    .step(id, task, &mut self.knowledge, &self.departed);
                if step == ClaimStep::Claimed {
                    return Some((handler, task.clone()));
                }
                if step.ends_scan() {
                    return None;
                }
            }
        }

        None
    }

    /// Execute a claimed task and record the outcome
    async fn act(&mut self, handler: Handler, task: &Task) {
        let Handler::Effect(action) = handler else {
            return;
        };

        self.mental_state = MentalState::Working;
        info!(agent_id = %self.id, task = %task.name(), "Performing task");

        let outcome = match action.perform(self.id, task).await {
            Ok(()) => TaskState::Done,
            Err(e) => {
                warn!(agent_id = %self.id, task = %task.name(), error = %e, "Task failed");
                TaskState::Failed
            }
        };

        if let Some(owned) = self.goals.iter_mut().find_map(|g| g.find_task_mut(task.name())) {
            owned.set_state(outcome);
        }
        self.knowledge.set_label(task.name(), outcome.label());
        if outcome == TaskState::Done {
            self.knowledge.clear_ping(task.name());
        }
    }

    /// Broadcast the knowledge snapshot
    fn tell(&self) -> Result<(), SwarmError> {
        let message = Message::Knowledge {
            from: self.id,
            snapshot: self.knowledge.clone(),
        };
        self.bus.publish(&self.config.topic, message.encode()?)?;
        Ok(())
    }

    /// Announce departure to the peers
    fn depart(&self) -> Result<(), SwarmError> {
        let message = Message::Departure { from: self.id };
        self.bus.publish(&self.config.topic, message.encode()?)?;
        Ok(())
    }

    fn report(self) -> AgentReport {
        AgentReport {
            id: self.id,
            ticks: self.ticks,
            achieved: self.is_achieved(),
            knowledge: self.knowledge,
            goals: self.goals,
        }
    }

    /// Tick until stopped.
    ///
    /// A stop request lets the current tick finish; the agent then publishes
    /// a last snapshot and its departure. A bus failure ends the loop with an
    /// error and nothing further is published.
    #[instrument(skip_all, fields(agent_id = %self.id))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<AgentReport, SwarmError> {
        self.set_status(AgentStatus::Running);
        info!("Agent started");

        let interval = self.config.tick_interval();
        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let started = Instant::now();
            let report = match self.tick().await {
                Ok(report) => report,
                Err(e) => break Err(e),
            };

            if self.config.stop_when_achieved && report.achieved {
                info!(ticks = self.ticks, "All goals achieved");
                break Ok(());
            }
            if self.config.max_ticks.is_some_and(|max| self.ticks >= max) {
                break Ok(());
            }

            let remaining = interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                changed = shutdown.changed() => {
                    // supervisor dropped its handle
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        self.set_status(AgentStatus::Stopping);
        let result = match outcome {
            Ok(()) => self.tell().and_then(|_| self.depart()),
            Err(e) => Err(e),
        };
        self.set_status(AgentStatus::Terminated);

        match result {
            Ok(()) => {
                info!(ticks = self.ticks, "Agent stopped");
                Ok(self.report())
            }
            Err(e) => {
                error!(error = %e, "Agent stopped on error");
                Err(e)
            }
        }
    }

    /// Run the agent on its own tokio task
    pub fn spawn(self) -> AgentHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let id = self.id;
        let status = Arc::clone(&self.status);
        let task = tokio::spawn(self.run(shutdown_rx));

        AgentHandle {
            inner: Arc::new(HandleInner {
                id,
                status,
                shutdown: shutdown_tx,
                task: Mutex::new(Some(task)),
            }),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    id: AgentId,
    status: Arc<RwLock<AgentStatus>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<AgentReport, SwarmError>>>>,
}

/// Handle to a running agent for external interaction
#[derive(Clone, Debug)]
pub struct AgentHandle {
    inner: Arc<HandleInner>,
}

impl AgentHandle {
    /// Get the agent ID
    pub fn id(&self) -> AgentId {
        self.inner.id
    }

    /// Get current status
    pub fn status(&self) -> AgentStatus {
        *self.inner.status.read()
    }

    /// Ask the agent to stop after its current tick
    pub fn stop(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        debug!(agent_id = %self.inner.id, "Stop requested");
    }

    /// Check if the agent task has exited
    pub fn is_finished(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the agent to exit and collect its report
    pub async fn join(&self) -> Result<AgentReport, SwarmError> {
        let task = self
            .inner
            .task
            .lock()
            .take()
            .ok_or_else(|| SwarmError::Join(format!("{} already joined", self.inner.id)))?;

        task.await.map_err(|e| SwarmError::Join(e.to_string()))?
    }
}
