//! # Coterie
//!
//! Leaderless goal/task coordination - the inner circle.
//!
//! Peer agents share a goal tree and converge on who does what purely by
//! gossiping knowledge snapshots. There is no coordinator: every agent
//! ticks on its own, merges whatever its peers broadcast, and claims tasks
//! through a smallest-id election.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │   agent-1    │      │   agent-2    │      │   agent-3    │
//! │ ┌──────────┐ │      │ ┌──────────┐ │      │ ┌──────────┐ │
//! │ │Goal Tree │ │      │ │Goal Tree │ │      │ │Goal Tree │ │
//! │ ├──────────┤ │      │ ├──────────┤ │      │ ├──────────┤ │
//! │ │Knowledge │ │      │ │Knowledge │ │      │ │Knowledge │ │
//! │ └──────────┘ │      │ └──────────┘ │      │ └──────────┘ │
//! └──────┬───────┘      └──────┬───────┘      └──────┬───────┘
//!        │ snapshot            │ snapshot            │ snapshot
//!        ▼                     ▼                     ▼
//! ═══════════════════════ "broadcasting" ══════════════════════
//!        │ merge               │ merge               │ merge
//!        ▼                     ▼                     ▼
//!    perceive → sync → achieve → claim/poll → act → tell
//! ```
//!
//! ## Key Concepts
//!
//! - **Knowledge**: subject → attribute → value map; `ping` merges by
//!   union, everything else is last-writer-wins
//! - **Goal**: node of the tree, achieved once all subgoals and tasks are
//! - **Task**: `General` work claimed by one agent, or a `Query` that
//!   watches knowledge
//! - **Election**: candidates ping a task; the smallest id executes it
//! - **Swarm**: in-process group of agents sharing one bus

pub mod action;
pub mod agent;
pub mod channel;
pub mod claim;
pub mod config;
pub mod description;
pub mod error;
pub mod goal;
pub mod knowledge;
pub mod protocol;
pub mod swarm;

pub use action::{Action, ActionRegistry, FnAction, Handler, Query, ThresholdQuery};
pub use agent::{Agent, AgentHandle, AgentReport, AgentStatus, MentalState, TickReport};
pub use channel::{Bus, ChannelBuilder, ChannelError, LocalBus, LocalEndpoint};
pub use claim::{is_minimum, ClaimStep, Election};
pub use config::{AgentConfig, AgentSpec, ElectionConfig, SwarmConfig};
pub use description::{parse_description, parse_yaml, GoalBuilder};
pub use error::SwarmError;
pub use goal::{Goal, GoalState, Task, TaskKind, TaskState};
pub use knowledge::{Entry, Knowledge};
pub use protocol::{AgentId, Message, DEFAULT_TOPIC};
pub use swarm::Swarm;
