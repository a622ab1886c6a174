//! Repaired stage output and its provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a stage result came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// The stage that produced the result.
    pub stage_id: String,
    /// The remote agent that ran the stage.
    pub assistant_id: String,
    /// The remote conversation identifier.
    pub thread_id: String,
    /// The remote run identifier.
    pub run_id: String,
    /// When the result was repaired and accepted.
    pub completed_at: DateTime<Utc>,
    /// Number of status polls issued for the run.
    pub poll_count: usize,
    /// Number of tool-output submissions made for the run.
    pub tool_submissions: usize,
    /// Whether the document needed any repair beyond extraction.
    pub repaired: bool,
}

/// The repaired, structured output of one stage.
///
/// Immutable once produced; shared between stages behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage identifier.
    pub stage_id: String,
    /// The repaired document.
    pub data: Map<String, Value>,
    /// Provenance metadata.
    pub provenance: Provenance,
}

impl StageResult {
    /// Creates a new stage result.
    #[must_use]
    pub fn new(data: Map<String, Value>, provenance: Provenance) -> Self {
        Self {
            stage_id: provenance.stage_id.clone(),
            data,
            provenance,
        }
    }

    /// Returns a top-level field of the document.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Finds the first value stored under `key` anywhere in the document.
    ///
    /// Objects are searched depth-first in key order, arrays in index order.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&Value> {
        find_in_map(&self.data, key)
    }
}

fn find_in_map<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    map.values().find_map(|value| find_in_value(value, key))
}

fn find_in_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => find_in_map(map, key),
        Value::Array(items) => items.iter().find_map(|item| find_in_value(item, key)),
        _ => None,
    }
}
