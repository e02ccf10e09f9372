//! Operator-facing event feed, persisted to `events.json`. Unlike the audit
//! log (security-relevant, HMAC-chained, append-only), events are informational
//! notices a dashboard or `mc events` invocation would want to list and
//! acknowledge — things like "service degraded" or "prune completed".

use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use masterclaw_protocol::McError;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::safe::dangerous_key;
use crate::store::atomic_update;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: EventSeverity,
    pub title: String,
    pub message: String,
    pub source: String,
    pub metadata: Value,
    pub acknowledged: bool,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
}

impl EventRecord {
    pub fn new(
        event_type: impl Into<String>,
        severity: EventSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.into(),
            severity,
            title: title.into(),
            message: message.into(),
            source: source.into(),
            metadata: Value::Null,
            acknowledged: false,
            created_at: now_millis(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// `evt_<unix-millis>_<12 hex chars>`.
fn generate_event_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .filter(|b| b.is_ascii_hexdigit())
        .take(12)
        .map(char::from)
        .collect();
    format!("evt_{}_{}", now_millis(), suffix)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    /// Newest-first.
    pub events: Vec<EventRecord>,
}

const MAX_RETAINED_EVENTS: usize = 500;

fn validate_event_log(value: &Value) -> Result<(), McError> {
    let Value::Object(root) = value else {
        return Err(McError::integrity("events state root is not an object"));
    };
    for key in root.keys() {
        if dangerous_key(key) {
            return Err(McError::prototype_pollution(key.clone()));
        }
    }
    Ok(())
}

/// Append a new event, pruning to [`MAX_RETAINED_EVENTS`] newest records.
pub fn append_event(dir: &Path, path: &Path, record: EventRecord) -> Result<EventLog, McError> {
    atomic_update(dir, "events", path, validate_event_log, move |mut log: EventLog| {
        log.events.insert(0, record);
        log.events.truncate(MAX_RETAINED_EVENTS);
        Ok(log)
    })
}

/// Mark an event acknowledged by id; no-op (not an error) if the id is
/// unknown, since acknowledging twice or acknowledging a pruned event is a
/// harmless race, not a caller mistake.
pub fn acknowledge_event(dir: &Path, path: &Path, id: &str) -> Result<EventLog, McError> {
    let id = id.to_string();
    atomic_update(dir, "events", path, validate_event_log, move |mut log: EventLog| {
        for event in &mut log.events {
            if event.id == id {
                event.acknowledged = true;
            }
        }
        Ok(log)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn event_ids_follow_the_evt_prefix_grammar() {
        let record = EventRecord::new("service_degraded", EventSeverity::Warning, "t", "m", "heal");
        assert!(record.id.starts_with("evt_"));
        let parts: Vec<&str> = record.id.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 12);
    }

    #[test]
    fn append_and_acknowledge_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        let record = EventRecord::new("prune_completed", EventSeverity::Info, "Prune", "done", "prune");
        let id = record.id.clone();
        let log = append_event(dir.path(), &path, record).unwrap();
        assert_eq!(log.events.len(), 1);
        assert!(!log.events[0].acknowledged);

        let log = acknowledge_event(dir.path(), &path, &id).unwrap();
        assert!(log.events[0].acknowledged);
    }

    #[test]
    fn newest_events_are_retained_first_when_capped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        for i in 0..3 {
            let record = EventRecord::new("x", EventSeverity::Info, format!("t{i}"), "m", "src");
            append_event(dir.path(), &path, record).unwrap();
        }
        let log = append_event(
            dir.path(),
            &path,
            EventRecord::new("x", EventSeverity::Info, "latest", "m", "src"),
        )
        .unwrap();
        assert_eq!(log.events[0].title, "latest");
    }
}
