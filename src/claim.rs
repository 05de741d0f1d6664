//! Decentralized task claiming
//!
//! Agents announce candidacy for a `Ready` task by moving it to `Ping` and
//! adding their id to the task's `ping` set. An agent that first hears of a
//! task through a peer's `Ping` adds itself before deciding anything. Candidate
//! sets gossip and merge by union; the candidate with the smallest id claims
//! the task.
//!
//! This is best-effort mutual exclusion. A decision is only as good as the
//! candidate set the agent has seen so far, so two agents can both believe
//! they won when their pings cross in flight. The quiescence barrier narrows
//! that window: a decision is taken only after the same candidate set has
//! been observed for `quiescent_ticks` consecutive ticks. Races that outlast
//! the barrier are neither detected nor repaired.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::goal::{Task, TaskState};
use crate::knowledge::Knowledge;
use crate::protocol::AgentId;

/// Whether `me` is below every other candidate
pub fn is_minimum(me: AgentId, candidates: &BTreeSet<AgentId>) -> bool {
    candidates.iter().all(|&other| other == me || me < other)
}

/// Outcome of one claim step on one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStep {
    /// Task moved `Ready → Ping`, candidacy announced
    Announced,
    /// Candidate set not yet stable
    Waiting,
    /// Another candidate has precedence
    Yielded,
    /// Task moved `Ping → Active`; the caller executes it now
    Claimed,
    /// Someone is already executing it
    InFlight,
    /// Task is finished
    Finished,
}

impl ClaimStep {
    /// Whether the agent should stop scanning further tasks this tick
    pub fn ends_scan(&self) -> bool {
        matches!(
            self,
            ClaimStep::Announced | ClaimStep::Waiting | ClaimStep::Claimed
        )
    }
}

#[derive(Debug)]
struct Observation {
    candidates: BTreeSet<AgentId>,
    stable_ticks: u32,
}

/// Per-agent election bookkeeping
#[derive(Debug, Default)]
pub struct Election {
    quiescent_ticks: u32,
    observations: HashMap<String, Observation>,
}

impl Election {
    /// Create election state with the given barrier length
    pub fn new(quiescent_ticks: u32) -> Self {
        Self {
            quiescent_ticks,
            observations: HashMap::new(),
        }
    }

    /// Run one step of the claim protocol for `task`
    pub fn step(
        &mut self,
        me: AgentId,
        task: &mut Task,
        knowledge: &mut Knowledge,
        departed: &BTreeSet<AgentId>,
    ) -> ClaimStep {
        match task.state() {
            TaskState::Ready => {
                task.set_state(TaskState::Ping);
                knowledge.set_label(task.name(), TaskState::Ping.label());
                knowledge.start_ping(task.name(), me);
                self.observe(task.name(), BTreeSet::from([me]));
                debug!(agent_id = %me, task = %task.name(), "Announced candidacy");
                ClaimStep::Announced
            }
            TaskState::Ping => {
                let joined = knowledge
                    .ping(task.name())
                    .is_some_and(|set| set.contains(&me));
                if !joined {
                    // learned of the task from a peer; join so its barrier restarts
                    knowledge.add_ping(task.name(), me);
                    self.observations.remove(task.name());
                    debug!(agent_id = %me, task = %task.name(), "Joined candidate set");
                    return ClaimStep::Waiting;
                }

                let candidates: BTreeSet<AgentId> = knowledge
                    .ping(task.name())
                    .map(|set| set.difference(departed).copied().collect())
                    .unwrap_or_default();

                if self.observe(task.name(), candidates.clone()) < self.quiescent_ticks {
                    return ClaimStep::Waiting;
                }

                if !is_minimum(me, &candidates) {
                    debug!(agent_id = %me, task = %task.name(), ?candidates, "Yielding claim");
                    return ClaimStep::Yielded;
                }

                task.set_state(TaskState::Active);
                knowledge.set_label(task.name(), TaskState::Active.label());
                self.observations.remove(task.name());
                debug!(agent_id = %me, task = %task.name(), ?candidates, "Claimed task");
                ClaimStep::Claimed
            }
            TaskState::Active => ClaimStep::InFlight,
            TaskState::Done | TaskState::Failed => {
                self.observations.remove(task.name());
                ClaimStep::Finished
            }
        }
    }

    /// Record a candidate set, returning for how many consecutive ticks it
    /// has been unchanged
    fn observe(&mut self, task: &str, candidates: BTreeSet<AgentId>) -> u32 {
        match self.observations.get_mut(task) {
            Some(seen) if seen.candidates == candidates => {
                seen.stable_ticks = seen.stable_ticks.saturating_add(1);
                seen.stable_ticks
            }
            _ => {
                self.observations.insert(
                    task.to_string(),
                    Observation {
                        candidates,
                        stable_ticks: 0,
                    },
                );
                0
            }
        }
    }

    /// Number of tasks with a pending observation
    pub fn pending(&self) -> usize {
        self.observations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::TaskKind;
    use std::collections::BTreeMap;

    fn ids(tags: &[u64]) -> BTreeSet<AgentId> {
        tags.iter().copied().map(AgentId).collect()
    }

    fn general(name: &str) -> Task {
        Task::new(name, TaskKind::General, BTreeMap::new())
    }

    #[test]
    fn test_single_winner_under_quiescence() {
        let candidates = ids(&[3, 7, 1, 9]);
        let winners: Vec<u64> = [3, 7, 1, 9]
            .into_iter()
            .filter(|&tag| is_minimum(AgentId(tag), &candidates))
            .collect();
        assert_eq!(winners, vec![1]);
    }

    #[test]
    fn test_minimum_of_own_singleton() {
        assert!(is_minimum(AgentId(5), &ids(&[5])));
        assert!(is_minimum(AgentId(5), &ids(&[])));
        // not yet in the set but still the smallest
        assert!(is_minimum(AgentId(2), &ids(&[4, 8])));
    }

    #[test]
    fn test_ready_announces() {
        let mut election = Election::new(1);
        let mut task = general("T1");
        let mut kb = Knowledge::new();

        let step = election.step(AgentId(4), &mut task, &mut kb, &BTreeSet::new());

        assert_eq!(step, ClaimStep::Announced);
        assert_eq!(task.state(), TaskState::Ping);
        assert_eq!(kb.label("T1"), Some("Ping"));
        assert_eq!(kb.ping("T1"), Some(&ids(&[4])));
    }

    #[test]
    fn test_lone_candidate_claims_after_barrier() {
        let mut election = Election::new(1);
        let mut task = general("T1");
        let mut kb = Knowledge::new();
        let departed = BTreeSet::new();

        assert_eq!(election.step(AgentId(1), &mut task, &mut kb, &departed), ClaimStep::Announced);
        assert_eq!(election.step(AgentId(1), &mut task, &mut kb, &departed), ClaimStep::Claimed);
        assert_eq!(task.state(), TaskState::Active);
        assert_eq!(kb.label("T1"), Some("Active"));
        assert_eq!(election.pending(), 0);
    }

    #[test]
    fn test_without_barrier_decides_on_first_look() {
        let mut election = Election::new(0);
        let mut task = general("T1");
        task.set_state(TaskState::Ping);
        let mut kb = Knowledge::new();
        kb.set("T1", "ping", serde_json::json!([6, 2]));

        let step = election.step(AgentId(2), &mut task, &mut kb, &BTreeSet::new());
        assert_eq!(step, ClaimStep::Claimed);
    }

    #[test]
    fn test_changing_set_resets_barrier() {
        let mut election = Election::new(1);
        let mut task = general("T1");
        let mut kb = Knowledge::new();
        let departed = BTreeSet::new();

        election.step(AgentId(3), &mut task, &mut kb, &departed);
        // a peer's ping arrives before the decision
        kb.add_ping("T1", AgentId(8));
        assert_eq!(election.step(AgentId(3), &mut task, &mut kb, &departed), ClaimStep::Waiting);
        assert_eq!(election.step(AgentId(3), &mut task, &mut kb, &departed), ClaimStep::Claimed);
        assert_eq!(kb.ping("T1"), Some(&ids(&[3, 8])));
    }

    #[test]
    fn test_peer_announced_task_is_joined_before_deciding() {
        let mut election = Election::new(0);
        let mut task = general("T1");
        task.set_state(TaskState::Ping);
        let mut kb = Knowledge::new();
        kb.set("T1", "ping", serde_json::json!([2]));
        let departed = BTreeSet::new();

        // smallest id, but the announcing peer has not seen us yet
        assert_eq!(election.step(AgentId(1), &mut task, &mut kb, &departed), ClaimStep::Waiting);
        assert_eq!(kb.ping("T1"), Some(&ids(&[1, 2])));
        assert_eq!(task.state(), TaskState::Ping);

        assert_eq!(election.step(AgentId(1), &mut task, &mut kb, &departed), ClaimStep::Claimed);
    }

    #[test]
    fn test_larger_id_yields() {
        let mut election = Election::new(0);
        let mut task = general("T1");
        task.set_state(TaskState::Ping);
        let mut kb = Knowledge::new();
        kb.set("T1", "ping", serde_json::json!([1, 7]));

        let step = election.step(AgentId(7), &mut task, &mut kb, &BTreeSet::new());
        assert_eq!(step, ClaimStep::Yielded);
        assert_eq!(task.state(), TaskState::Ping);
        assert!(!step.ends_scan());
    }

    #[test]
    fn test_departed_candidates_are_ignored() {
        let mut election = Election::new(0);
        let mut task = general("T1");
        task.set_state(TaskState::Ping);
        let mut kb = Knowledge::new();
        kb.set("T1", "ping", serde_json::json!([1, 7]));

        let step = election.step(AgentId(7), &mut task, &mut kb, &ids(&[1]));
        assert_eq!(step, ClaimStep::Claimed);
    }

    #[test]
    fn test_active_and_finished_tasks() {
        let mut election = Election::new(0);
        let mut kb = Knowledge::new();
        let departed = BTreeSet::new();

        let mut active = general("A");
        active.set_state(TaskState::Active);
        assert_eq!(election.step(AgentId(1), &mut active, &mut kb, &departed), ClaimStep::InFlight);

        let mut done = general("D");
        done.set_state(TaskState::Done);
        assert_eq!(election.step(AgentId(1), &mut done, &mut kb, &departed), ClaimStep::Finished);
        assert!(kb.is_empty());
    }
}
