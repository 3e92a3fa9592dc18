//! Cross-cutting run context: workflow state, request context, abort signal
//!
//! Two mutable values are threaded through every node of a walk:
//!
//! - [`RunState`] - the schema-declared workflow state, read with `get` and
//!   replaced with `set`; distinct from step input/output chaining and
//!   visible to siblings and all subsequent nodes.
//! - [`RequestContext`] - an ordered key/value bag scoped to one run and
//!   shared by reference with nested sub-runs; entries persist verbatim
//!   across suspend/resume, and a deleted key never reappears in later
//!   steps.
//!
//! Both are cheap clones around shared interior state, so concurrent branches
//! of a Parallel node observe each other's writes.

use runweave_snapshot::StepResult;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared per-run step result map, keyed by step id
pub(crate) type SharedResults = Arc<Mutex<HashMap<String, StepResult>>>;

/// Mutable workflow state shared across all nodes of a run
///
/// State is a single JSON value declared by the workflow's state schema.
/// `set` replaces the whole value; partial updates are done by reading,
/// modifying, and writing back.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    inner: Arc<Mutex<Value>>,
}

impl RunState {
    /// Create state holding the given initial value
    pub fn new(initial: Value) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// Read the current state value
    pub fn get(&self) -> Value {
        self.inner.lock().expect("state lock poisoned").clone()
    }

    /// Replace the state value
    pub fn set(&self, value: Value) {
        *self.inner.lock().expect("state lock poisoned") = value;
    }
}

/// Run-scoped mutable key/value bag threaded through all steps
///
/// Entries keep insertion order; `set` on an existing key updates the value
/// in place without moving it. The same context instance is propagated into
/// nested sub-runs, so a nested leaf's `delete` is visible to outer steps
/// that run afterwards.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RequestContext {
    /// Create an empty request context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, inserting or updating in place
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut entries = self.entries.lock().expect("request context lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    /// Read a key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .expect("request context lock poisoned")
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Remove a key; later steps will no longer observe it
    pub fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("request context lock poisoned")
            .retain(|(k, _)| k != key);
    }

    /// All keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("request context lock poisoned")
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Serialize the context to a JSON object for snapshot persistence
    pub fn to_value(&self) -> Value {
        let entries = self.entries.lock().expect("request context lock poisoned");
        let mut map = serde_json::Map::new();
        for (k, v) in entries.iter() {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// Rebuild a context from a persisted JSON object
    pub fn from_value(value: &Value) -> Self {
        let ctx = Self::new();
        if let Some(map) = value.as_object() {
            for (k, v) in map {
                ctx.set(k.clone(), v.clone());
            }
        }
        ctx
    }
}

/// Cooperative cancellation signal observed by the walk and by leaf handlers
///
/// `cancel()` on a run flips the flag; the engine checks it before starting
/// each leaf, and in-flight handlers may poll it to stop early. A handler
/// that ignores the signal may still complete and commit its own result.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether abort has been requested
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
