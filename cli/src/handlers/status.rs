//! `mc status`: a fast, non-networked summary of every known service's
//! circuit-breaker state. `mc health` is the networked counterpart that
//! actually calls each service's `/health` endpoint.

use masterclaw_common::table::Table;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::circuits_store;
use crate::output::HandlerOutput;
use crate::state::AppState;
use crate::state::KNOWN_SERVICES;

pub async fn run(_ctx: &CommandContext, state: &AppState) -> Result<HandlerOutput, McError> {
    let circuits = circuits_store::load(&state.state_dir);

    let mut table = Table::new(&["service", "url", "circuit"]);
    let mut data = Vec::new();
    for (name, default_url) in KNOWN_SERVICES {
        let url = state.service_url(name, default_url);
        let breaker = circuits_store::restore_breaker(&circuits, name);
        let circuit_state = breaker.state();
        table.push_row(vec![name.to_string(), url.clone(), format!("{circuit_state:?}")]);
        data.push(serde_json::json!({
            "service": name,
            "url": url,
            "circuit": serde_json::to_value(circuit_state).unwrap_or(serde_json::Value::Null),
        }));
    }

    Ok(HandlerOutput::new(serde_json::json!({ "services": data }), table.render()))
}
