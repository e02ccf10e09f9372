//! Layered static configuration: a TOML base file overlaid
//! with `MC_*` environment overrides, merged through [`crate::safe::safe_deep_merge`]
//! so a malicious override can never smuggle in a prototype-pollution key.

use std::collections::BTreeMap;
use std::path::Path;

use masterclaw_protocol::McError;
use serde_json::Value;

use crate::safe::find_dangerous_keys;
use crate::safe::safe_deep_merge;

/// A resolved, merged configuration tree. Callers navigate it with
/// [`ConfigTree::get`]/[`ConfigTree::get_str`] rather than deserializing
/// into a fixed struct, since each subcommand only cares about its own
/// corner of the tree.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    value: Value,
}

impl ConfigTree {
    /// Wrap an already-merged value, used by callers that layer a further
    /// dynamic overlay (e.g. the CLI's `config set`-backed `config.json`)
    /// on top of what [`load_config`] returns.
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    pub fn get(&self, dotted_path: &str) -> Option<&Value> {
        let mut current = &self.value;
        for segment in dotted_path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, dotted_path: &str) -> Option<&str> {
        self.get(dotted_path).and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// Result of loading config: the merged tree plus whether any dangerous key
/// was stripped along the way (callers use this to decide whether a
/// `SECURITY_VIOLATION` audit record is warranted).
pub struct LoadedConfig {
    pub tree: ConfigTree,
    pub dangerous_keys_stripped: Vec<String>,
}

/// Load `base_path` (TOML, optional — missing file is treated as `{}`),
/// convert it to JSON, overlay `env_overrides` (already parsed from
/// `MC_CONFIG_*` environment variables, dotted-path -> value), and merge
/// safely.
pub fn load_config(
    base_path: &Path,
    env_overrides: &BTreeMap<String, String>,
) -> Result<LoadedConfig, McError> {
    let base_value = read_base_toml(base_path)?;

    let mut override_tree = serde_json::json!({});
    for (dotted_path, raw_value) in env_overrides {
        set_dotted(&mut override_tree, dotted_path, parse_scalar(raw_value));
    }

    let mut dangerous = find_dangerous_keys(&base_value);
    dangerous.extend(find_dangerous_keys(&override_tree));

    let merged = safe_deep_merge(&base_value, &override_tree);
    Ok(LoadedConfig {
        tree: ConfigTree { value: merged },
        dangerous_keys_stripped: dangerous.into_iter().collect(),
    })
}

fn read_base_toml(path: &Path) -> Result<Value, McError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(serde_json::json!({})),
        Err(e) => return Err(McError::generic(format!("failed to read config file: {e}"))),
    };
    let parsed: toml::Value = toml::from_str(&raw)
        .map_err(|e| McError::validation(format!("config file is not valid TOML: {e}")))?;
    toml_to_json(&parsed)
        .ok_or_else(|| McError::validation("config file contains an unsupported TOML construct"))
}

fn toml_to_json(value: &toml::Value) -> Option<Value> {
    Some(match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number((*i).into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number)?,
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => {
            Value::Array(items.iter().map(toml_to_json).collect::<Option<Vec<_>>>()?)
        }
        toml::Value::Table(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), toml_to_json(v)?);
            }
            Value::Object(out)
        }
    })
}

fn parse_scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    Value::String(raw.to_string())
}

fn set_dotted(tree: &mut Value, dotted_path: &str, leaf: Value) {
    let segments: Vec<&str> = dotted_path.split('.').collect();
    let mut current = tree;
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = serde_json::json!({});
        }
        let map = current.as_object_mut().expect("just ensured object");
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), leaf.clone());
            return;
        }
        current = map.entry(segment.to_string()).or_insert_with(|| serde_json::json!({}));
    }
}

/// Parse `MC_CONFIG_GATEWAY_TIMEOUT=30` style environment variables into
/// `gateway.timeout -> "30"` overrides: strip the `MC_CONFIG_` prefix,
/// lowercase, and replace `_` with `.`.
pub fn collect_env_overrides<I: IntoIterator<Item = (String, String)>>(
    env: I,
) -> BTreeMap<String, String> {
    const PREFIX: &str = "MC_CONFIG_";
    let mut overrides = BTreeMap::new();
    for (key, value) in env {
        if let Some(rest) = key.strip_prefix(PREFIX) {
            let dotted = rest.to_ascii_lowercase().replace('_', ".");
            overrides.insert(dotted, value);
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_base_toml_and_applies_env_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nurl = \"http://localhost:3000\"\ntimeout = 30\n").unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert("gateway.timeout".to_string(), "60".to_string());

        let loaded = load_config(&path, &overrides).unwrap();
        assert_eq!(loaded.tree.get_str("gateway.url"), Some("http://localhost:3000"));
        assert_eq!(loaded.tree.get("gateway.timeout"), Some(&Value::Number(60.into())));
    }

    #[test]
    fn missing_base_file_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let loaded = load_config(&path, &BTreeMap::new()).unwrap();
        assert!(loaded.tree.as_value().as_object().unwrap().is_empty());
    }

    #[test]
    fn dangerous_override_keys_are_reported_and_stripped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nurl = \"http://localhost:3000\"\n").unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert("gateway.constructor".to_string(), "bad".to_string());

        let loaded = load_config(&path, &overrides).unwrap();
        assert!(!loaded.dangerous_keys_stripped.is_empty());
        assert!(loaded.tree.get("gateway.constructor").is_none());
    }

    #[test]
    fn collect_env_overrides_converts_prefix_and_case() {
        let env = vec![
            ("MC_CONFIG_GATEWAY_TIMEOUT".to_string(), "45".to_string()),
            ("UNRELATED_VAR".to_string(), "ignored".to_string()),
        ];
        let overrides = collect_env_overrides(env);
        assert_eq!(overrides.get("gateway.timeout"), Some(&"45".to_string()));
        assert_eq!(overrides.len(), 1);
    }
}
