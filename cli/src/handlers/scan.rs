//! `mc scan`: read-only counterpart to `mc heal` — reports issues without
//! planning or applying any fix.

use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::handlers::heal::scan_and_persist;
use crate::output::HandlerOutput;
use crate::state::AppState;

pub async fn run(_ctx: &CommandContext, state: &AppState) -> Result<HandlerOutput, McError> {
    let (_breakers, issues) = scan_and_persist(state).await?;

    let critical = issues.iter().filter(|i| matches!(i.severity, masterclaw_heal::issue::Severity::Critical)).count();
    let data = serde_json::json!({
        "issues": issues.iter().map(|issue| serde_json::json!({
            "category": serde_json::to_value(issue.category).unwrap_or(serde_json::Value::Null),
            "severity": serde_json::to_value(issue.severity).unwrap_or(serde_json::Value::Null),
            "subject": issue.subject,
            "description": issue.description,
            "fixable": issue.fixable,
            "protected": issue.protected,
        })).collect::<Vec<_>>(),
    });
    let human = format!("{} issue(s) found ({} critical)", issues.len(), critical);
    Ok(HandlerOutput::new(data, human))
}
