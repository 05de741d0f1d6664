//! Goal/task tree
//!
//! A goal owns an ordered list of subgoals and a list of tasks. The structure
//! is fixed once built (see [`crate::description`]); only the state fields
//! move, driven by the owning agent reading its knowledge store.
//!
//! ```text
//! GOAL   not_assigned ─▶ assigned ─▶ active ─▶ achieved
//!                                       └────▶ failed
//! TASK   Ready ─▶ Ping ─▶ Active ─▶ Done
//!                   └───────┴─────▶ Failed
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::knowledge::Knowledge;

/// Argument key every task carries with its own name
pub const TASK_NAME: &str = "task_name";

/// State of a goal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    #[default]
    NotAssigned,
    Assigned,
    Active,
    Achieved,
    Failed,
}

impl GoalState {
    /// Label carried by the `is` attribute
    pub fn label(&self) -> &'static str {
        match self {
            GoalState::NotAssigned => "not_assigned",
            GoalState::Assigned => "assigned",
            GoalState::Active => "active",
            GoalState::Achieved => "achieved",
            GoalState::Failed => "failed",
        }
    }

    /// Whether the state is achieved or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, GoalState::Achieved | GoalState::Failed)
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GoalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_assigned" => Ok(GoalState::NotAssigned),
            "assigned" => Ok(GoalState::Assigned),
            "active" => Ok(GoalState::Active),
            "achieved" => Ok(GoalState::Achieved),
            "failed" => Ok(GoalState::Failed),
            other => Err(format!("unknown goal state `{other}`")),
        }
    }
}

/// State of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    #[default]
    Ready,
    Ping,
    Active,
    Done,
    Failed,
}

impl TaskState {
    /// Label carried by the `is` attribute
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Ready => "Ready",
            TaskState::Ping => "Ping",
            TaskState::Active => "Active",
            TaskState::Done => "Done",
            TaskState::Failed => "Failed",
        }
    }

    /// Whether the state is done or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ready" => Ok(TaskState::Ready),
            "Ping" => Ok(TaskState::Ping),
            "Active" => Ok(TaskState::Active),
            "Done" => Ok(TaskState::Done),
            "Failed" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state `{other}`")),
        }
    }
}

/// What a task asks of the agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// An effect to produce in the environment
    General,
    /// A condition to observe in knowledge
    Query,
    /// Kind label this crate does not know; never acted on
    Unrecognized(String),
}

impl TaskKind {
    /// Parse a kind label, keeping unknown labels
    pub fn from_label(label: &str) -> Self {
        match label {
            "General" => TaskKind::General,
            "Query" => TaskKind::Query,
            other => TaskKind::Unrecognized(other.to_string()),
        }
    }

    /// Label as written in descriptions
    pub fn label(&self) -> &str {
        match self {
            TaskKind::General => "General",
            TaskKind::Query => "Query",
            TaskKind::Unrecognized(label) => label,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Leaf unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    name: String,
    kind: TaskKind,
    arguments: BTreeMap<String, Value>,
    state: TaskState,
}

impl Task {
    /// Create a `Ready` task. Its own name is added to the arguments.
    pub fn new(name: impl Into<String>, kind: TaskKind, arguments: BTreeMap<String, Value>) -> Self {
        let name = name.into();
        let mut arguments = arguments;
        arguments.insert(TASK_NAME.to_string(), Value::String(name.clone()));
        Self {
            name,
            kind,
            arguments,
            state: TaskState::Ready,
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task kind
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// All arguments, including `task_name`
    pub fn arguments(&self) -> &BTreeMap<String, Value> {
        &self.arguments
    }

    /// Get one argument
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Set the state
    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    /// Check if this is a `General` task
    pub fn is_general(&self) -> bool {
        self.kind == TaskKind::General
    }

    /// Check if this is a `Query` task
    pub fn is_query(&self) -> bool {
        self.kind == TaskKind::Query
    }
}

/// Hierarchical unit of desired outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    name: String,
    subgoals: Vec<Goal>,
    tasks: Vec<Task>,
    state: GoalState,
}

impl Goal {
    /// Assemble a goal. Validation lives in [`crate::description::GoalBuilder`].
    pub(crate) fn from_parts(name: String, subgoals: Vec<Goal>, tasks: Vec<Task>) -> Self {
        Self {
            name,
            subgoals,
            tasks,
            state: GoalState::NotAssigned,
        }
    }

    /// Goal name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subgoals in declaration order
    pub fn subgoals(&self) -> &[Goal] {
        &self.subgoals
    }

    /// Tasks owned directly by this goal
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Mutable access to the owned tasks
    pub fn tasks_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    /// Current state
    pub fn state(&self) -> GoalState {
        self.state
    }

    /// Set the state
    pub fn set_state(&mut self, state: GoalState) {
        self.state = state;
    }

    /// Whether `leaf` may descend into this goal
    fn is_open(&self) -> bool {
        !matches!(
            self.state,
            GoalState::Achieved | GoalState::Failed | GoalState::Active
        )
    }

    /// Currently relevant goal and its tasks.
    ///
    /// Descends depth-first into the first subgoal that is not achieved,
    /// failed or active. When no subgoal qualifies, this goal is the leaf.
    pub fn leaf(&self) -> (&Goal, &[Task]) {
        match self.subgoals.iter().find(|g| g.is_open()) {
            Some(subgoal) => subgoal.leaf(),
            None => (self, &self.tasks),
        }
    }

    /// Mutable counterpart of [`Goal::leaf`]
    pub fn leaf_mut(&mut self) -> &mut Goal {
        match self.subgoals.iter().position(Goal::is_open) {
            Some(index) => self.subgoals[index].leaf_mut(),
            None => self,
        }
    }

    /// Marks the goal achieved once every subgoal is achieved and every task
    /// is done. Sub-trees are evaluated first.
    pub fn can_be_achieved(&mut self) -> bool {
        match self.state {
            GoalState::Achieved => return true,
            GoalState::Failed => return false,
            _ => {}
        }

        for subgoal in &mut self.subgoals {
            if !subgoal.can_be_achieved() {
                return false;
            }
        }

        if self.tasks.iter().any(|t| t.state != TaskState::Done) {
            return false;
        }

        self.state = GoalState::Achieved;
        true
    }

    /// Marks the goal active once no task in the subtree is still `Ready`.
    pub fn can_be_active(&mut self) -> bool {
        if self.state.is_terminal() {
            return self.state == GoalState::Achieved;
        }

        for subgoal in &mut self.subgoals {
            if !subgoal.can_be_active() {
                return false;
            }
        }

        if self.tasks.iter().any(|t| t.state == TaskState::Ready) {
            return false;
        }

        self.state = GoalState::Active;
        true
    }

    /// Pull state labels from knowledge into the tree.
    ///
    /// Terminal states are sticky: a stale label never reverts them, and the
    /// terminal label is written back so the next broadcast repairs peers.
    /// Done tasks have their candidate set cleared.
    pub fn sync_from(&mut self, knowledge: &mut Knowledge) {
        if self.state.is_terminal() {
            if knowledge.label(&self.name) != Some(self.state.label()) {
                knowledge.set_label(&self.name, self.state.label());
            }
        } else if let Some(label) = knowledge.label(&self.name) {
            match label.parse::<GoalState>() {
                Ok(state) => self.state = state,
                Err(e) => warn!(goal = %self.name, error = %e, "Ignoring goal label"),
            }
        }

        for subgoal in &mut self.subgoals {
            subgoal.sync_from(knowledge);
        }

        for task in &mut self.tasks {
            if task.state.is_terminal() {
                if knowledge.label(&task.name) != Some(task.state.label()) {
                    knowledge.set_label(&task.name, task.state.label());
                }
            } else if let Some(label) = knowledge.label(&task.name) {
                match label.parse::<TaskState>() {
                    Ok(state) => task.state = state,
                    Err(e) => warn!(task = %task.name, error = %e, "Ignoring task label"),
                }
            }

            if task.state == TaskState::Done {
                knowledge.clear_ping(&task.name);
            }
        }
    }

    /// Restore the whole subtree to its initial states
    pub fn reset(&mut self) {
        self.state = GoalState::NotAssigned;
        for task in &mut self.tasks {
            task.state = TaskState::Ready;
        }
        for subgoal in &mut self.subgoals {
            subgoal.reset();
        }
    }

    /// All goals in the tree, depth-first, this goal first
    pub fn goals(&self) -> Vec<&Goal> {
        let mut out = Vec::new();
        self.collect_goals(&mut out);
        out
    }

    fn collect_goals<'a>(&'a self, out: &mut Vec<&'a Goal>) {
        out.push(self);
        for subgoal in &self.subgoals {
            subgoal.collect_goals(out);
        }
    }

    /// All tasks in the tree, depth-first
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.goals().into_iter().flat_map(|g| g.tasks.iter()).collect()
    }

    /// Find a goal by name in this subtree
    pub fn find_goal(&self, name: &str) -> Option<&Goal> {
        self.goals().into_iter().find(|g| g.name == name)
    }

    /// Find a task by name in this subtree
    pub fn find_task(&self, name: &str) -> Option<&Task> {
        self.all_tasks().into_iter().find(|t| t.name == name)
    }

    /// Mutable counterpart of [`Goal::find_task`]
    pub fn find_task_mut(&mut self, name: &str) -> Option<&mut Task> {
        if let Some(index) = self.tasks.iter().position(|t| t.name == name) {
            return Some(&mut self.tasks[index]);
        }
        self.subgoals.iter_mut().find_map(|g| g.find_task_mut(name))
    }
}
