//! `mc events`: list or acknowledge the operator-facing event feed.

use masterclaw_core::events::acknowledge_event;
use masterclaw_core::safe::dangerous_key;
use masterclaw_core::store::load_state;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;
use serde_json::Value;

use crate::cli_args::EventsAction;
use crate::cli_args::EventsArgs;
use crate::output::HandlerOutput;
use crate::state::AppState;

fn validate_events(value: &Value) -> Result<(), McError> {
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

pub async fn run(_ctx: &CommandContext, state: &AppState, args: EventsArgs) -> Result<HandlerOutput, McError> {
    let path = state.state_dir.path("events.json");

    match args.action {
        EventsAction::List => {
            let log: masterclaw_core::EventLog = load_state(&path, validate_events);
            let human = log
                .events
                .iter()
                .map(|e| format!("[{}] {} ({:?}): {}", e.id, e.title, e.severity, e.message))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(HandlerOutput::new(
                serde_json::json!({ "events": log.events }),
                if human.is_empty() { "no events".to_string() } else { human },
            ))
        }
        EventsAction::Ack { id } => {
            let log = acknowledge_event(state.state_dir.root(), &path, &id)?;
            let found = log.events.iter().any(|e| e.id == id);
            if !found {
                return Err(McError::not_found(id));
            }
            Ok(HandlerOutput::new(
                serde_json::json!({ "id": id, "acknowledged": true }),
                format!("acknowledged event {id}"),
            ))
        }
    }
}
