//! Persists [`CircuitBreaker`] snapshots across separate `mc` invocations,
//! keyed by service name, in `$MC_STATE_DIR/circuits.json`. The breaker
//! itself is process-local and in-memory; this is what lets `mc circuits
//! reset gateway` run in one process and have the next `mc status` see it.

use std::collections::HashMap;

use masterclaw_core::BreakerConfig;
use masterclaw_core::BreakerSnapshot;
use masterclaw_core::CircuitBreaker;
use masterclaw_core::StateDir;
use masterclaw_core::safe::dangerous_key;
use masterclaw_core::store::atomic_update;
use masterclaw_core::store::load_state;
use masterclaw_protocol::McError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Every circuit `mc circuits`/`mc heal`/`mc status` know how to name.
pub const KNOWN_CIRCUITS: &[&str] = &["core-api", "backend", "gateway", "vector-store"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitsFile {
    pub breakers: HashMap<String, BreakerSnapshot>,
}

fn validate(value: &Value) -> Result<(), McError> {
    let Value::Object(root) = value else {
        return Err(McError::integrity("circuits state root is not an object"));
    };
    for key in root.keys() {
        if dangerous_key(key) {
            return Err(McError::prototype_pollution(key.clone()));
        }
    }
    if let Some(Value::Object(breakers)) = root.get("breakers") {
        for key in breakers.keys() {
            if dangerous_key(key) {
                return Err(McError::prototype_pollution(key.clone()));
            }
        }
    }
    Ok(())
}

pub fn load(state_dir: &StateDir) -> CircuitsFile {
    load_state(&state_dir.path("circuits.json"), validate)
}

/// Restore a breaker for `name` from its persisted snapshot, or a fresh
/// closed breaker if `name` has never been seen before.
pub fn restore_breaker(file: &CircuitsFile, name: &str) -> CircuitBreaker {
    match file.breakers.get(name) {
        Some(snapshot) => CircuitBreaker::restore(BreakerConfig::default(), *snapshot),
        None => CircuitBreaker::new(BreakerConfig::default()),
    }
}

/// Snapshot `breaker` and persist it under `name` via read-modify-write, so
/// a concurrent invocation touching a different circuit is never clobbered.
pub fn persist_breaker(state_dir: &StateDir, name: &str, breaker: &CircuitBreaker) -> Result<(), McError> {
    let path = state_dir.path("circuits.json");
    let name = name.to_string();
    let snapshot = breaker.snapshot();
    atomic_update(state_dir.root(), "circuits", &path, validate, move |mut file: CircuitsFile| {
        file.breakers.insert(name, snapshot);
        Ok(file)
    })
    .map(|_| ())
}

/// Force a circuit back to closed, whether or not it had a prior snapshot.
pub fn reset_breaker(state_dir: &StateDir, name: &str) -> Result<(), McError> {
    let path = state_dir.path("circuits.json");
    let name = name.to_string();
    atomic_update(state_dir.root(), "circuits", &path, validate, move |mut file: CircuitsFile| {
        file.breakers.insert(name, CircuitBreaker::new(BreakerConfig::default()).snapshot());
        Ok(file)
    })
    .map(|_| ())
}
