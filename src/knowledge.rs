//! Per-agent knowledge store
//!
//! Every agent keeps a full replica keyed by subject. Replicas converge by
//! merging the snapshots peers broadcast:
//!
//! - `ping` (the election candidates of a task) merges by set union
//! - every other attribute merges by last-writer-wins overwrite
//!
//! The `is` attribute carries the state label of the goal or task named by the
//! subject and is how the goal tree and the store stay in step.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::protocol::AgentId;

/// Reserved attribute holding election candidates
pub const PING: &str = "ping";
/// Reserved attribute holding the state label
pub const IS: &str = "is";

/// Attributes known about one subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Agents that announced candidacy for the subject
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ping: BTreeSet<AgentId>,
    /// Plain attributes
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl Entry {
    /// Fold `other` into this entry
    pub fn merge(&mut self, other: &Entry) {
        self.ping.extend(other.ping.iter().copied());
        for (attribute, value) in &other.attributes {
            self.attributes.insert(attribute.clone(), value.clone());
        }
    }

    /// Get a plain attribute
    pub fn attribute(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// State label carried by `is`
    pub fn label(&self) -> Option<&str> {
        self.attributes.get(IS).and_then(Value::as_str)
    }
}

/// Subject → attributes map with gossip merge semantics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Knowledge {
    entries: BTreeMap<String, Entry>,
}

impl Knowledge {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an incoming snapshot. Subjects seen for the first time are created.
    pub fn merge(&mut self, incoming: &Knowledge) {
        for (subject, entry) in &incoming.entries {
            self.merge_entry(subject, entry);
        }
    }

    /// Merge a single subject
    pub fn merge_entry(&mut self, subject: &str, entry: &Entry) {
        match self.entries.get_mut(subject) {
            Some(existing) => existing.merge(entry),
            None => {
                self.entries.insert(subject.to_string(), entry.clone());
            }
        }
    }

    /// Get the entry for `subject`
    pub fn get(&self, subject: &str) -> Option<&Entry> {
        self.entries.get(subject)
    }

    /// Check if `subject` is known
    pub fn contains(&self, subject: &str) -> bool {
        self.entries.contains_key(subject)
    }

    /// Get a plain attribute of `subject`
    pub fn attribute(&self, subject: &str, attribute: &str) -> Option<&Value> {
        self.entries.get(subject).and_then(|e| e.attribute(attribute))
    }

    /// Numeric view of an attribute. Accepts JSON numbers and numeric strings.
    pub fn numeric(&self, subject: &str, attribute: &str) -> Option<f64> {
        self.attribute(subject, attribute).and_then(as_number)
    }

    /// Local write of a plain attribute (overwrites)
    ///
    /// Writing `ping` replaces the candidate set with the ids found in `value`.
    /// A value that is not a list of ids leaves the set untouched.
    pub fn set(&mut self, subject: &str, attribute: &str, value: impl Into<Value>) {
        let value = value.into();
        let entry = self.entries.entry(subject.to_string()).or_default();
        if attribute == PING {
            match serde_json::from_value(value) {
                Ok(ping) => entry.ping = ping,
                Err(e) => warn!(subject, error = %e, "Ignoring malformed ping write"),
            }
        } else {
            entry.attributes.insert(attribute.to_string(), value);
        }
    }

    /// State label of `subject`
    pub fn label(&self, subject: &str) -> Option<&str> {
        self.entries.get(subject).and_then(Entry::label)
    }

    /// Write the state label of `subject`
    pub fn set_label(&mut self, subject: &str, label: &str) {
        self.set(subject, IS, label);
    }

    /// Candidate set of `subject`
    pub fn ping(&self, subject: &str) -> Option<&BTreeSet<AgentId>> {
        self.entries.get(subject).map(|e| &e.ping)
    }

    /// Replace the candidate set of `subject` with `{id}`
    pub fn start_ping(&mut self, subject: &str, id: AgentId) {
        let entry = self.entries.entry(subject.to_string()).or_default();
        entry.ping = BTreeSet::from([id]);
    }

    /// Add `id` to the candidate set; returns false if it was already present
    pub fn add_ping(&mut self, subject: &str, id: AgentId) -> bool {
        self.entries
            .entry(subject.to_string())
            .or_default()
            .ping
            .insert(id)
    }

    /// Empty the candidate set of `subject`
    pub fn clear_ping(&mut self, subject: &str) {
        if let Some(entry) = self.entries.get_mut(subject) {
            entry.ping.clear();
        }
    }

    /// Known subjects, sorted
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of known subjects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Entry)> for Knowledge {
    fn from_iter<I: IntoIterator<Item = (String, Entry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
