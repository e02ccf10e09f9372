//! Process-wide handles a handler needs: the resolved state directory, the
//! logger, the audit log, and the merged configuration tree. Built once per
//! invocation in [`AppState::init`], before any rate-limit check or handler
//! runs.

use std::path::PathBuf;
use std::sync::Arc;

use masterclaw_core::AuditLog;
use masterclaw_core::ConfigTree;
use masterclaw_core::JsonLogger;
use masterclaw_core::LogLevel;
use masterclaw_core::StateDir;
use masterclaw_core::audit::EventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_core::config::collect_env_overrides;
use masterclaw_core::config::load_config;
use masterclaw_core::safe::safe_deep_merge;
use masterclaw_core::store::dangerous_keys_in;
use masterclaw_core::store::load_state;
use masterclaw_protocol::CorrelationId;
use masterclaw_protocol::McError;
use serde_json::Value;

/// The downstream services the fully-specified handlers know about by name.
/// Base URLs are overridable through `services.<name>.url` in config.
pub const KNOWN_SERVICES: &[(&str, &str)] = &[
    ("core-api", "http://localhost:8000"),
    ("backend", "http://localhost:8001"),
    ("gateway", "http://localhost:8002"),
    ("vector-store", "http://localhost:8003"),
];

pub struct AppState {
    pub state_dir: StateDir,
    pub logger: Arc<JsonLogger>,
    pub audit: AuditLog,
    pub config: ConfigTree,
}

impl AppState {
    pub fn init(correlation_id: &CorrelationId, user_identity: &str, debug_enabled: bool) -> Result<Self, McError> {
        install_tracing_subscriber(debug_enabled);

        let state_dir = StateDir::resolve()
            .map_err(|e| McError::generic(format!("failed to resolve state directory: {e}")))?;
        let logger = JsonLogger::stderr(if debug_enabled { LogLevel::Debug } else { LogLevel::Info });
        let audit = AuditLog::open(state_dir.root())
            .map_err(|e| McError::generic(format!("failed to open audit log: {e}")))?;

        let base_config_path = std::env::var_os("MC_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.path("config.toml"));
        let env_overrides = collect_env_overrides(std::env::vars());
        let loaded = load_config(&base_config_path, &env_overrides)?;

        let overlay_path = state_dir.path("config.json");
        // Scan the raw file *before* `load_state` strips dangerous keys —
        // the sanitized value it returns never has any left to find.
        let overlay_dangerous_keys = dangerous_keys_in_raw_file(&overlay_path);
        let overlay: Value = load_state(&overlay_path, validate_config_overlay);

        let mut dangerous: std::collections::BTreeSet<String> =
            loaded.dangerous_keys_stripped.iter().cloned().collect();
        dangerous.extend(overlay_dangerous_keys);

        let merged = safe_deep_merge(loaded.tree.as_value(), &overlay);
        let config = ConfigTree::from_value(merged);

        if !dangerous.is_empty() {
            let _ = audit.append(PendingRecord {
                correlation_id: correlation_id.clone(),
                user_identity: user_identity.to_string(),
                event_type: EventType::SecurityViolation,
                subject_ref: "config".to_string(),
                details: serde_json::json!({ "strippedKeys": dangerous }),
            });
        }

        Ok(Self { state_dir, logger, audit, config })
    }

    pub fn service_url(&self, name: &str, default: &str) -> String {
        self.config
            .get_str(&format!("services.{name}.url"))
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    /// Docker object name prefixes `heal`/`prune` may never touch, read from
    /// `heal.protected_prefixes` if set. Leaked once per process since
    /// [`masterclaw_heal::ScanContext`] and [`masterclaw_heal::ApplyContext`]
    /// both want `&'static [&'static str]` and a short-lived CLI invocation
    /// never needs to reclaim the memory.
    pub fn protected_prefixes(&self) -> &'static [&'static str] {
        let configured: Vec<String> = match self.config.get("heal.protected_prefixes").and_then(Value::as_array) {
            Some(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            None => vec!["mc-".to_string(), "masterclaw-".to_string()],
        };
        let leaked: Vec<&'static str> =
            configured.into_iter().map(|s| -> &'static str { Box::leak(s.into_boxed_str()) }).collect();
        Box::leak(leaked.into_boxed_slice())
    }
}

/// `tracing::warn!`/`error!` calls in `core`/`exec`/`heal` (e.g. `store.rs`'s
/// corruption fallbacks) need a subscriber to go anywhere; this is
/// independent of [`JsonLogger`], which only carries structured records a
/// handler explicitly emits. `try_init` rather than `init` since a process
/// that constructs more than one `AppState` (tests) would otherwise panic on
/// the second call.
fn install_tracing_subscriber(debug_enabled: bool) {
    let default_level = if debug_enabled { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Structural check only. A dangerous key does *not* fail validation here —
/// `load_state` strips dangerous keys recursively and keeps the rest (same
/// as `load_config`'s TOML/env path via `safe_deep_merge`), so one polluted
/// segment never costs the whole overlay.
fn validate_config_overlay(value: &Value) -> Result<(), McError> {
    if !value.is_object() {
        return Err(McError::integrity("config overlay root is not an object"));
    }
    Ok(())
}

/// Reads `path` directly and reports which dangerous keys it contains, if
/// any, without going through `load_state`'s sanitization — used solely to
/// decide whether a `SECURITY_VIOLATION` audit record is warranted.
fn dangerous_keys_in_raw_file(path: &std::path::Path) -> std::collections::BTreeSet<String> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return std::collections::BTreeSet::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => dangerous_keys_in(&value),
        Err(_) => std::collections::BTreeSet::new(),
    }
}
