//! Action registry
//!
//! Maps action identifiers to typed handlers. A task is routed by its
//! explicit `action` argument, or else by the first word of its name
//! (`"gather 3"` → `gather`).
//!
//! - [`Action`] performs an effect in the environment. This is the seam to the
//!   external executor; only pass/fail is consumed.
//! - [`Query`] evaluates a condition against the agent's knowledge.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::goal::Task;
use crate::knowledge::{as_number, Knowledge};
use crate::protocol::AgentId;

/// Argument overriding the identifier derived from the task name
pub const ACTION_ARG: &str = "action";
/// Argument naming the subject a query looks at
pub const TARGET_ARG: &str = "target";
/// Argument overriding the attribute a threshold query tracks
pub const ATTRIBUTE_ARG: &str = "attribute";

/// Effect executed for a claimed `General` task
#[async_trait]
pub trait Action: Send + Sync {
    async fn perform(&self, agent: AgentId, task: &Task) -> anyhow::Result<()>;
}

/// Condition observed for a `Query` task
pub trait Query: Send + Sync {
    fn evaluate(&self, task: &Task, knowledge: &Knowledge) -> bool;
}

/// Adapter turning a plain closure into an [`Action`]
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: Fn(AgentId, &Task) -> anyhow::Result<()> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(AgentId, &Task) -> anyhow::Result<()> + Send + Sync,
{
    async fn perform(&self, agent: AgentId, task: &Task) -> anyhow::Result<()> {
        (self.0)(agent, task)
    }
}

/// Satisfied once `knowledge[target][attribute] >= threshold`
#[derive(Debug, Clone)]
pub struct ThresholdQuery {
    attribute: String,
    threshold_key: String,
}

impl ThresholdQuery {
    /// Track `attribute`, reading the threshold from the `threshold` argument
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            threshold_key: "threshold".to_string(),
        }
    }

    /// Read the threshold from another argument
    pub fn threshold_key(mut self, key: impl Into<String>) -> Self {
        self.threshold_key = key.into();
        self
    }
}

impl Query for ThresholdQuery {
    fn evaluate(&self, task: &Task, knowledge: &Knowledge) -> bool {
        let Some(target) = task.argument(TARGET_ARG).and_then(|v| v.as_str()) else {
            return false;
        };
        let attribute = task
            .argument(ATTRIBUTE_ARG)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.attribute);
        let Some(threshold) = task.argument(&self.threshold_key).and_then(as_number) else {
            return false;
        };

        knowledge
            .numeric(target, attribute)
            .is_some_and(|current| current >= threshold)
    }
}

/// Registered handler
#[derive(Clone)]
pub enum Handler {
    Effect(Arc<dyn Action>),
    Query(Arc<dyn Query>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Effect(_) => f.write_str("Handler::Effect"),
            Handler::Query(_) => f.write_str("Handler::Query"),
        }
    }
}

/// Static registry of the actions an agent knows
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Handler>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the stock resource queries:
    /// `check` (gathered ≥ amount) and `built` (built ≥ built)
    pub fn with_standard_queries() -> Self {
        let mut registry = Self::new();
        registry.register_query("check", ThresholdQuery::new("gathered").threshold_key("amount"));
        registry.register_query("built", ThresholdQuery::new("built").threshold_key("built"));
        registry
    }

    /// Register an effect action under `name`
    pub fn register_action(&mut self, name: impl Into<String>, action: impl Action + 'static) {
        self.handlers
            .insert(name.into(), Handler::Effect(Arc::new(action)));
    }

    /// Register a query evaluator under `name`
    pub fn register_query(&mut self, name: impl Into<String>, query: impl Query + 'static) {
        self.handlers
            .insert(name.into(), Handler::Query(Arc::new(query)));
    }

    /// Identifier a task is routed by
    pub fn action_id(task: &Task) -> &str {
        task.argument(ACTION_ARG)
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| task.name().split_whitespace().next().unwrap_or(task.name()))
    }

    /// Handler for `task`, if any
    pub fn resolve(&self, task: &Task) -> Option<&Handler> {
        self.handlers.get(Self::action_id(task))
    }

    /// Check whether a handler is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::TaskKind;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(name: &str, kind: TaskKind, args: Value) -> Task {
        let arguments: BTreeMap<String, Value> = serde_json::from_value(args).unwrap();
        Task::new(name, kind, arguments)
    }

    fn knowledge(value: Value) -> Knowledge {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_action_id_from_name_or_argument() {
        let gather = task("gather 3", TaskKind::General, json!({}));
        assert_eq!(ActionRegistry::action_id(&gather), "gather");

        let single = task("T1", TaskKind::General, json!({}));
        assert_eq!(ActionRegistry::action_id(&single), "T1");

        let explicit = task("fetch ore", TaskKind::General, json!({"action": "gather"}));
        assert_eq!(ActionRegistry::action_id(&explicit), "gather");
    }

    #[test]
    fn test_resolve_unknown_action() {
        let registry = ActionRegistry::new();
        assert!(registry.resolve(&task("dance 1", TaskKind::General, json!({}))).is_none());
    }

    #[test]
    fn test_standard_queries_registered() {
        let registry = ActionRegistry::with_standard_queries();
        assert_eq!(registry.names(), vec!["built", "check"]);
        let check_task = task("check mineral 1", TaskKind::Query, json!({}));
        assert!(matches!(registry.resolve(&check_task), Some(Handler::Query(_))));
    }

    #[tokio::test]
    async fn test_fn_action_performs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut registry = ActionRegistry::new();
        registry.register_action(
            "gather",
            FnAction::new(move |_agent, _task| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let gather = task("gather 1", TaskKind::General, json!({}));
        match registry.resolve(&gather) {
            Some(Handler::Effect(action)) => action.perform(AgentId(1), &gather).await.unwrap(),
            other => panic!("unexpected handler: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_threshold_query_met() {
        let query = ThresholdQuery::new("amount");
        let t = task("check gold", TaskKind::Query, json!({"target": "gold", "threshold": 100}));

        assert!(query.evaluate(&t, &knowledge(json!({"gold": {"amount": "150"}}))));
        assert!(query.evaluate(&t, &knowledge(json!({"gold": {"amount": 100}}))));
        assert!(!query.evaluate(&t, &knowledge(json!({"gold": {"amount": 99}}))));
    }

    #[test]
    fn test_threshold_query_absent_target() {
        let query = ThresholdQuery::new("amount");
        let t = task("check gold", TaskKind::Query, json!({"target": "gold", "threshold": 1}));

        assert!(!query.evaluate(&t, &Knowledge::new()));
        assert!(!query.evaluate(&t, &knowledge(json!({"gold": {"other": 5}}))));
    }

    #[test]
    fn test_threshold_query_attribute_override() {
        let query = ThresholdQuery::new("gathered").threshold_key("amount");
        let t = task(
            "check minerals",
            TaskKind::Query,
            json!({"target": "minerals", "amount": 100, "attribute": "stock"}),
        );

        let kb = knowledge(json!({"minerals": {"gathered": 10, "stock": 120}}));
        assert!(query.evaluate(&t, &kb));
    }

    #[test]
    fn test_threshold_query_needs_arguments() {
        let query = ThresholdQuery::new("amount");
        let kb = knowledge(json!({"gold": {"amount": 500}}));

        let no_target = task("check gold", TaskKind::Query, json!({"threshold": 1}));
        let no_threshold = task("check gold", TaskKind::Query, json!({"target": "gold"}));
        assert!(!query.evaluate(&no_target, &kb));
        assert!(!query.evaluate(&no_threshold, &kb));
    }
}
