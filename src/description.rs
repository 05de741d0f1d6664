//! Goal descriptions and the validating tree builder
//!
//! The declarative seed format is a nested `{goal, require}` structure where
//! each requirement is either a task triple `[name, arguments, kind]` or a
//! nested goal:
//!
//! ```yaml
//! goal: I have pylon
//! require:
//!   - [gather 1, {target: unit, unit_tag: 42}, General]
//!   - [check minerals, {target: minerals, amount: 100}, Query]
//!   - goal: I have a second pylon
//!     require:
//!       - [build_pylon 2, {target: point, pos_x: 39, pos_y: 27}, General]
//! ```
//!
//! Descriptions are parsed once at startup; anything malformed fails here,
//! before an agent ever ticks.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::error::SwarmError;
use crate::goal::{Goal, Task, TaskKind};

enum Requirement {
    Task {
        name: String,
        arguments: Value,
        kind: TaskKind,
    },
    Goal(GoalBuilder),
}

/// Builder for an immutable-structure goal tree
pub struct GoalBuilder {
    name: String,
    requirements: Vec<Requirement>,
}

impl GoalBuilder {
    /// Start a goal named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: Vec::new(),
        }
    }

    /// Require a task. `arguments` must be a JSON object or null.
    pub fn task(mut self, name: impl Into<String>, kind: TaskKind, arguments: Value) -> Self {
        self.requirements.push(Requirement::Task {
            name: name.into(),
            arguments,
            kind,
        });
        self
    }

    /// Add a `General` task
    pub fn general(self, name: impl Into<String>, arguments: Value) -> Self {
        self.task(name, TaskKind::General, arguments)
    }

    /// Add a `Query` task
    pub fn query(self, name: impl Into<String>, arguments: Value) -> Self {
        self.task(name, TaskKind::Query, arguments)
    }

    /// Require a nested goal
    pub fn subgoal(mut self, goal: GoalBuilder) -> Self {
        self.requirements.push(Requirement::Goal(goal));
        self
    }

    /// Read a `{goal, require}` description
    pub fn from_description(description: &Value) -> Result<Self, SwarmError> {
        let object = description.as_object().ok_or_else(|| {
            SwarmError::InvalidDescription("goal description must be an object".into())
        })?;

        let name = object
            .get("goal")
            .ok_or_else(|| SwarmError::InvalidDescription("missing `goal` key".into()))?
            .as_str()
            .ok_or_else(|| SwarmError::InvalidDescription("`goal` must be a string".into()))?;

        let mut builder = GoalBuilder::new(name);

        let requirements = match object.get("require") {
            None | Some(Value::Null) => return Ok(builder),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(SwarmError::InvalidDescription(format!(
                    "`require` of goal `{name}` must be a list"
                )))
            }
        };

        for (index, item) in requirements.iter().enumerate() {
            builder = match item {
                Value::Array(fields) => {
                    let (task, kind, arguments) = parse_triple(name, index, fields)?;
                    builder.task(task, kind, arguments)
                }
                Value::Object(_) => builder.subgoal(GoalBuilder::from_description(item)?),
                _ => {
                    return Err(SwarmError::InvalidDescription(format!(
                        "require[{index}] of goal `{name}` is neither a task nor a goal"
                    )))
                }
            };
        }

        Ok(builder)
    }

    /// Validate and build the tree
    pub fn build(self) -> Result<Goal, SwarmError> {
        let mut seen = HashSet::new();
        self.build_checked(&mut seen)
    }

    fn build_checked(self, seen: &mut HashSet<String>) -> Result<Goal, SwarmError> {
        if self.requirements.is_empty() {
            return Err(SwarmError::EmptyGoal(self.name));
        }
        claim_name(seen, &self.name)?;

        let mut subgoals = Vec::new();
        let mut tasks = Vec::new();

        for requirement in self.requirements {
            match requirement {
                Requirement::Task {
                    name,
                    arguments,
                    kind,
                } => {
                    claim_name(seen, &name)?;
                    let arguments = match arguments {
                        Value::Null => BTreeMap::new(),
                        Value::Object(map) => map.into_iter().collect(),
                        _ => {
                            return Err(SwarmError::InvalidDescription(format!(
                                "arguments of task `{name}` must be an object"
                            )))
                        }
                    };
                    tasks.push(Task::new(name, kind, arguments));
                }
                Requirement::Goal(builder) => subgoals.push(builder.build_checked(seen)?),
            }
        }

        Ok(Goal::from_parts(self.name, subgoals, tasks))
    }
}

fn claim_name(seen: &mut HashSet<String>, name: &str) -> Result<(), SwarmError> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(SwarmError::DuplicateName(name.to_string()))
    }
}

fn parse_triple(
    goal: &str,
    index: usize,
    fields: &[Value],
) -> Result<(String, TaskKind, Value), SwarmError> {
    if fields.len() < 3 {
        return Err(SwarmError::InvalidDescription(format!(
            "task require[{index}] of goal `{goal}` has {} fields, expected 3",
            fields.len()
        )));
    }

    let name = fields[0].as_str().ok_or_else(|| {
        SwarmError::InvalidDescription(format!(
            "task require[{index}] of goal `{goal}` needs a string name"
        ))
    })?;
    let kind = fields[2].as_str().ok_or_else(|| {
        SwarmError::InvalidDescription(format!("task `{name}` needs a string kind"))
    })?;

    Ok((name.to_string(), TaskKind::from_label(kind), fields[1].clone()))
}

/// Build a goal tree from a JSON description value
pub fn parse_description(description: &Value) -> Result<Goal, SwarmError> {
    GoalBuilder::from_description(description)?.build()
}

/// Build a goal tree from a YAML document
pub fn parse_yaml(document: &str) -> Result<Goal, SwarmError> {
    let value: Value = serde_yaml::from_str(document)?;
    parse_description(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::{GoalState, TaskState};
    use serde_json::json;

    #[test]
    fn test_builder_tree_shape() {
        let root = GoalBuilder::new("root")
            .general("T1", json!({"target": "unit"}))
            .subgoal(GoalBuilder::new("inner").query("Q1", json!({"target": "gold"})))
            .build()
            .unwrap();

        assert_eq!(root.name(), "root");
        assert_eq!(root.tasks().len(), 1);
        assert_eq!(root.subgoals()[0].name(), "inner");
        assert!(root.find_task("Q1").unwrap().is_query());
        assert_eq!(root.state(), GoalState::NotAssigned);
        assert_eq!(root.find_task("T1").unwrap().state(), TaskState::Ready);
    }

    #[test]
    fn test_parse_nested_description() {
        let description = json!({
            "goal": "I have GG Pylon",
            "trigger": [],
            "require": [{
                "goal": "I have pylon 1",
                "require": [
                    ["gather 1", {"target": "unit", "unit_tag": 7}, "General"],
                    ["check mineral 1", {"target": "minerals", "amount": 100}, "Query"],
                    {"goal": "I have pylon 2", "require": [
                        ["build_pylon 2", {"target": "point", "pos_x": 39, "pos_y": 27}, "General"]
                    ]}
                ]
            }]
        });

        let root = parse_description(&description).unwrap();
        let pylon1 = root.find_goal("I have pylon 1").unwrap();
        assert_eq!(pylon1.tasks().len(), 2);
        assert_eq!(pylon1.subgoals().len(), 1);

        let gather = root.find_task("gather 1").unwrap();
        assert_eq!(gather.argument("unit_tag"), Some(&json!(7)));
        assert_eq!(gather.argument("task_name"), Some(&json!("gather 1")));
    }

    #[test]
    fn test_parse_yaml() {
        let root = parse_yaml(
            r#"
goal: root
require:
  - [T1, {target: unit}, General]
  - [T2, null, General]
"#,
        )
        .unwrap();
        assert_eq!(root.tasks().len(), 2);
        assert_eq!(root.tasks()[1].arguments().len(), 1);
    }

    #[test]
    fn test_missing_goal_key_fails() {
        let err = parse_description(&json!({"require": [["T", {}, "General"]]})).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidDescription(_)));
    }

    #[test]
    fn test_short_task_triple_fails() {
        let err = parse_description(&json!({
            "goal": "g",
            "require": [["say", {"words": "hello"}]]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_bad_shapes_fail() {
        for description in [
            json!("just a string"),
            json!({"goal": 3, "require": []}),
            json!({"goal": "g", "require": "T1"}),
            json!({"goal": "g", "require": [42]}),
            json!({"goal": "g", "require": [["T", [1, 2], "General"]]}),
            json!({"goal": "g", "require": [[1, {}, "General"]]}),
        ] {
            assert!(parse_description(&description).is_err(), "{description}");
        }
    }

    #[test]
    fn test_empty_goal_rejected() {
        let err = parse_description(&json!({"goal": "idle"})).unwrap_err();
        assert!(matches!(err, SwarmError::EmptyGoal(name) if name == "idle"));

        let err = GoalBuilder::new("root")
            .subgoal(GoalBuilder::new("hollow"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SwarmError::EmptyGoal(name) if name == "hollow"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = GoalBuilder::new("root")
            .general("T1", Value::Null)
            .subgoal(GoalBuilder::new("inner").general("T1", Value::Null))
            .build()
            .unwrap_err();
        assert!(matches!(err, SwarmError::DuplicateName(name) if name == "T1"));
    }

    #[test]
    fn test_unknown_kind_is_kept() {
        let root = parse_description(&json!({
            "goal": "g",
            "require": [["T", {}, "Dance"]]
        }))
        .unwrap();
        assert_eq!(
            root.tasks()[0].kind(),
            &TaskKind::Unrecognized("Dance".into())
        );
    }
}
