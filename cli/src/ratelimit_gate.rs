//! Shared sliding-window rate-limit gate, persisted at
//! `$MC_STATE_DIR/ratelimit.json`. Wraps the pure
//! [`masterclaw_core::ratelimit::check_and_record`] in
//! [`masterclaw_core::store::atomic_update`] so admission decisions survive
//! across CLI invocations.

use masterclaw_core::AuditLog;
use masterclaw_core::StateDir;
use masterclaw_core::audit::EventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_core::ratelimit::Admission;
use masterclaw_core::ratelimit::RateLimitState;
use masterclaw_core::ratelimit::check_and_record;
use masterclaw_core::ratelimit::default_limits;
use masterclaw_core::ratelimit::limit_for;
use masterclaw_core::safe::dangerous_key;
use masterclaw_core::store::atomic_update;
use masterclaw_core::store::load_state;
use masterclaw_protocol::CorrelationId;
use masterclaw_protocol::McError;
use serde_json::Value;

pub const FILE_NAME: &str = "ratelimit.json";

/// Maximum timestamps retained per `(user, category)` window (§4.8's
/// `RateLimitEntry` invariant); a sequence longer than this, or one holding
/// a non-finite/negative/non-monotonic timestamp, is treated as corruption
/// and the whole file resets to empty.
const MAX_WINDOW_ENTRIES: usize = 200;

pub fn validate(value: &Value) -> Result<(), McError> {
    let Value::Object(root) = value else {
        return Err(McError::integrity("rate limit state root is not an object"));
    };
    if let Some(windows) = root.get("windows") {
        let Value::Object(windows) = windows else {
            return Err(McError::integrity("rate limit windows is not an object"));
        };
        for (k, entries) in windows {
            if dangerous_key(k) {
                return Err(McError::prototype_pollution(k.clone()));
            }
            let Value::Array(entries) = entries else {
                return Err(McError::integrity(format!("rate limit window {k} is not an array")));
            };
            if entries.len() > MAX_WINDOW_ENTRIES {
                return Err(McError::integrity(format!("rate limit window {k} exceeds {MAX_WINDOW_ENTRIES} entries")));
            }
            let mut previous: Option<f64> = None;
            for entry in entries {
                let Some(ts) = entry.as_f64() else {
                    return Err(McError::integrity(format!("rate limit window {k} has a non-numeric timestamp")));
                };
                if !ts.is_finite() || ts < 0.0 {
                    return Err(McError::integrity(format!("rate limit window {k} has a negative or non-finite timestamp")));
                }
                if let Some(prev) = previous {
                    if ts < prev {
                        return Err(McError::integrity(format!("rate limit window {k} is not monotonically non-decreasing")));
                    }
                }
                previous = Some(ts);
            }
        }
    }
    Ok(())
}

pub fn load(state_dir: &StateDir) -> RateLimitState {
    load_state(&state_dir.path(FILE_NAME), validate)
}

/// Check and record one admission for `(user_identity, category)`, persisting
/// the updated window atomically. If the on-disk file fails [`validate`]
/// (corruption per §4.8's `RateLimitEntry` invariants), the reset is logged
/// as a `SECURITY_VIOLATION` audit record before admission proceeds against
/// a clean state, rather than failing the command outright.
pub fn check(
    state_dir: &StateDir,
    audit: &AuditLog,
    correlation_id: &CorrelationId,
    user_identity: &str,
    category: &str,
) -> Result<Admission, McError> {
    let path = state_dir.path(FILE_NAME);
    if let Some(reason) = corruption_reason(&path) {
        let _ = audit.append(PendingRecord {
            correlation_id: correlation_id.clone(),
            user_identity: user_identity.to_string(),
            event_type: EventType::SecurityViolation,
            subject_ref: "ratelimit".to_string(),
            details: serde_json::json!({ "reason": reason }),
        });
    }

    let limits = default_limits();
    let limit = limit_for(category, &limits);
    let user = user_identity.to_string();
    let cat = category.to_string();

    let admission_cell: std::cell::Cell<Option<Admission>> = std::cell::Cell::new(None);
    atomic_update(state_dir.root(), "ratelimit", &path, validate, |current: RateLimitState| {
        let (next, decided) = check_and_record(current, &user, &cat, limit);
        admission_cell.set(Some(decided));
        Ok(next)
    })?;

    Ok(admission_cell
        .into_inner()
        .unwrap_or(Admission { allowed: true, remaining: limit.max_requests, retry_after: std::time::Duration::ZERO }))
}

/// Returns `Some(reason)` when the file exists and fails [`validate`] (or
/// cannot even be parsed as JSON); `None` when it is absent or clean.
fn corruption_reason(path: &std::path::Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => validate(&value).err().map(|e| e.message),
        Err(e) => Some(format!("invalid json: {e}")),
    }
}

/// Clear every window for `category` across all users, for `mc rate-limit reset`.
pub fn reset_category(state_dir: &StateDir, category: &str) -> Result<(), McError> {
    let path = state_dir.path(FILE_NAME);
    let suffix = format!(":{category}");
    atomic_update(state_dir.root(), "ratelimit", &path, validate, move |mut current: RateLimitState| {
        current.windows.retain(|k, _| !k.ends_with(&suffix));
        Ok(current)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_accepts_a_clean_window() {
        let value = json!({ "windows": { "alice:exec": [1, 2, 3] } });
        assert!(validate(&value).is_ok());
    }

    #[test]
    fn validate_rejects_a_window_longer_than_the_cap() {
        let entries: Vec<u64> = (0..=MAX_WINDOW_ENTRIES as u64).collect();
        let value = json!({ "windows": { "alice:exec": entries } });
        assert!(validate(&value).is_err());
    }

    #[test]
    fn validate_rejects_negative_and_non_finite_timestamps() {
        assert!(validate(&json!({ "windows": { "alice:exec": [-1] } })).is_err());
        assert!(validate(&json!({ "windows": { "alice:exec": [1.5, "oops"] } })).is_err());
    }

    #[test]
    fn validate_rejects_a_non_monotonic_sequence() {
        let value = json!({ "windows": { "alice:exec": [5, 1] } });
        assert!(validate(&value).is_err());
    }

    #[test]
    fn validate_rejects_dangerous_window_keys() {
        let value = json!({ "windows": { "__proto__": [] } });
        assert!(validate(&value).is_err());
    }

    #[test]
    fn check_resets_and_audits_a_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::at(dir.path().to_path_buf());
        let entries: Vec<u64> = (0..=MAX_WINDOW_ENTRIES as u64).collect();
        std::fs::write(
            state_dir.path(FILE_NAME),
            serde_json::to_vec(&json!({ "windows": { "alice:exec": entries } })).unwrap(),
        )
        .unwrap();

        let audit = AuditLog::open(dir.path()).unwrap();
        let correlation_id = CorrelationId::generate();
        let admission = check(&state_dir, &audit, &correlation_id, "alice", "exec").unwrap();
        assert!(admission.allowed);

        let log_contents = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        let records: Vec<masterclaw_core::audit::AuditRecord> =
            log_contents.lines().filter(|l| !l.trim().is_empty()).map(|l| serde_json::from_str(l).unwrap()).collect();
        assert!(records.iter().any(|r| r.subject_ref == "ratelimit" && r.event_type == EventType::SecurityViolation));
    }
}
