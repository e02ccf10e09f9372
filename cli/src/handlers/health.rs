//! `mc health`: calls every known service's `/health` endpoint through its
//! circuit breaker, persisting the breaker's post-call state so a later
//! invocation in the same window sees the accumulated failure count.

use masterclaw_common::table::Table;
use masterclaw_net::ServiceFacade;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::circuits_store;
use crate::output::HandlerOutput;
use crate::state::AppState;
use crate::state::KNOWN_SERVICES;

pub async fn run(ctx: &CommandContext, state: &AppState) -> Result<HandlerOutput, McError> {
    let circuits_file = circuits_store::load(&state.state_dir);

    let mut table = Table::new(&["service", "status", "version"]);
    let mut data = Vec::new();

    for (name, default_url) in KNOWN_SERVICES {
        let url = state.service_url(name, default_url);
        let breaker = circuits_store::restore_breaker(&circuits_file, name);
        let facade = ServiceFacade::with_breaker(url, breaker);

        let (status, version) = match facade.health(ctx.correlation_id.as_str()).await {
            Ok(health) => (health.status, health.version.unwrap_or_default()),
            Err(e) => ("unreachable".to_string(), e.message),
        };

        circuits_store::persist_breaker(&state.state_dir, name, facade.breaker())?;
        table.push_row(vec![name.to_string(), status.clone(), version.clone()]);
        data.push(serde_json::json!({ "service": name, "status": status, "version": version }));
    }

    Ok(HandlerOutput::new(serde_json::json!({ "services": data }), table.render()))
}
