//! `mc config`: inspect the merged configuration tree, or persist a dotted-
//! path override into the dynamic overlay (`$MC_STATE_DIR/config.json`)
//! that sits above the static TOML + env-override pipeline.

use masterclaw_core::audit::EventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_core::safe::dangerous_key;
use masterclaw_core::store::atomic_update;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;
use serde_json::Value;

use crate::cli_args::ConfigAction;
use crate::cli_args::ConfigArgs;
use crate::output::HandlerOutput;
use crate::state::AppState;

pub async fn run(ctx: &CommandContext, state: &AppState, args: ConfigArgs) -> Result<HandlerOutput, McError> {
    match args.action {
        ConfigAction::Show => Ok(HandlerOutput::new(
            state.config.as_value().clone(),
            serde_json::to_string_pretty(state.config.as_value())
                .unwrap_or_else(|_| state.config.as_value().to_string()),
        )),
        ConfigAction::Get { key } => {
            let value = state.config.get(&key).cloned().ok_or_else(|| McError::not_found(key.clone()))?;
            Ok(HandlerOutput::new(
                serde_json::json!({ "key": key, "value": value }),
                format!("{key} = {value}"),
            ))
        }
        ConfigAction::Set { key, value } => {
            for segment in key.split('.') {
                if dangerous_key(segment) {
                    return Err(McError::prototype_pollution(segment.to_string()));
                }
            }
            let leaf = parse_scalar(&value);
            let path = state.state_dir.path("config.json");
            let dir = state.state_dir.root();
            let key_for_transform = key.clone();
            let updated = atomic_update(dir, "config-overlay", &path, validate_overlay, move |current: Value| {
                let mut root = current;
                set_dotted(&mut root, &key_for_transform, leaf);
                Ok(root)
            })?;

            state
                .audit
                .append(PendingRecord {
                    correlation_id: ctx.correlation_id.clone(),
                    user_identity: ctx.user_identity.clone(),
                    event_type: EventType::ConfigChange,
                    subject_ref: key.clone(),
                    details: serde_json::json!({ "key": key, "value": value }),
                })
                .map_err(|e| McError::generic(format!("failed to write audit record: {e}")))?;

            Ok(HandlerOutput::new(
                serde_json::json!({ "key": key, "value": get_dotted(&updated, &key) }),
                format!("set {key} = {value}"),
            ))
        }
    }
}

fn validate_overlay(value: &Value) -> Result<(), McError> {
    let Value::Object(root) = value else {
        return Err(McError::integrity("config overlay root is not an object"));
    };
    for k in root.keys() {
        if dangerous_key(k) {
            return Err(McError::prototype_pollution(k.clone()));
        }
    }
    Ok(())
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

fn get_dotted<'a>(value: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in dotted_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
