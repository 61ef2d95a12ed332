// Module: Context
// Carries user variables plus the engine-injected deadline and action
// metadata threaded into hooks and `run`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::action::ActionMetadata;

pub type Params = Map<String, Value>;

/// Opaque mapping threaded into hooks and `run`. Unlike `Params` it is not
/// validated by any schema; the engine only ever adds its own two fields
/// (`action_metadata`, `deadline_monotonic_ms`) and otherwise leaves it
/// alone.
#[derive(Debug, Default, Clone)]
pub struct Context {
    pub variables: HashMap<String, Value>,
    pub action_metadata: Option<ActionMetadata>,
    /// Absolute deadline, monotonic milliseconds since an arbitrary engine
    /// epoch, set by the Executor when a timeout is active (§9 "Timeout
    /// propagation via context").
    pub deadline_monotonic_ms: Option<u64>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn extend(&mut self, entries: &HashMap<String, Value>) {
        for (k, v) in entries {
            self.variables.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Remaining budget in milliseconds before `deadline_monotonic_ms`,
    /// clamped to zero. Collaborators (HTTP clients, DB calls) should use
    /// this for their own per-call timeout and refuse to dispatch when it
    /// is zero (§9).
    pub fn remaining_ms(&self, now_monotonic_ms: u64) -> Option<u64> {
        self.deadline_monotonic_ms
            .map(|deadline| deadline.saturating_sub(now_monotonic_ms))
    }
}
