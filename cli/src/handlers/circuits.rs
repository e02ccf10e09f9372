//! `mc circuits`: list every known circuit breaker's state, or force-reset one.

use masterclaw_common::elapsed::format_duration;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::circuits_store;
use crate::circuits_store::KNOWN_CIRCUITS;
use crate::cli_args::CircuitsAction;
use crate::cli_args::CircuitsArgs;
use crate::output::HandlerOutput;
use crate::state::AppState;

pub async fn run(_ctx: &CommandContext, state: &AppState, args: CircuitsArgs) -> Result<HandlerOutput, McError> {
    match args.action {
        CircuitsAction::List => {
            let file = circuits_store::load(&state.state_dir);
            let mut rows = Vec::new();
            for name in KNOWN_CIRCUITS {
                let breaker = circuits_store::restore_breaker(&file, name);
                let snapshot = breaker.snapshot();
                let opened_for = snapshot.opened_elapsed_millis.map(|ms| format_duration(std::time::Duration::from_millis(ms)));
                rows.push(serde_json::json!({
                    "name": name,
                    "state": serde_json::to_value(breaker.state()).unwrap_or(serde_json::Value::Null),
                    "openedFor": opened_for,
                }));
            }
            let human = rows
                .iter()
                .map(|r| match r["openedFor"].as_str() {
                    Some(opened_for) => format!("{}: {} (opened {opened_for} ago)", r["name"], r["state"]),
                    None => format!("{}: {}", r["name"], r["state"]),
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(HandlerOutput::new(serde_json::json!({ "circuits": rows }), human))
        }
        CircuitsAction::Reset { name } => {
            if !KNOWN_CIRCUITS.contains(&name.as_str()) {
                return Err(McError::not_found(name));
            }
            circuits_store::reset_breaker(&state.state_dir, &name)?;
            Ok(HandlerOutput::new(
                serde_json::json!({ "name": name, "reset": true }),
                format!("circuit {name} reset to closed"),
            ))
        }
    }
}
