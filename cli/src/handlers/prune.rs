//! `mc prune`: the `mc heal` machinery narrowed to just docker-artifact
//! cleanup. Other fixable issues found along the way are left for `mc heal`.

use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::confirm::confirm_dangerous;
use crate::handlers::heal::prune_only;
use crate::handlers::heal::scan_and_persist;
use crate::output::HandlerOutput;
use crate::state::AppState;
use masterclaw_core::AuditEventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_heal::ApplyContext;
use masterclaw_heal::apply;
use masterclaw_heal::plan;
use std::collections::HashMap;

pub async fn run(ctx: &CommandContext, state: &AppState, apply_fix: bool, force: bool) -> Result<HandlerOutput, McError> {
    let (breakers, issues) = scan_and_persist(state).await?;
    let (plan_result, skipped) = prune_only(plan(&issues));

    if !apply_fix {
        let data = serde_json::json!({
            "prunable": plan_result.fixable.iter().map(|a| serde_json::json!({
                "subject": a.subject,
                "description": a.description,
                "resourceKind": a.resource_kind,
            })).collect::<Vec<_>>(),
            "protected": plan_result.manual.iter().filter(|i| i.protected).map(|i| serde_json::json!({
                "subject": i.subject,
                "description": i.description,
            })).collect::<Vec<_>>(),
            "otherFixableSkipped": skipped,
        });
        let human = format!(
            "{} artifact(s) prunable (dry run; pass --apply to prune; {} other fixable issue(s) left for `mc heal`)",
            plan_result.fixable.len(),
            skipped
        );
        return Ok(HandlerOutput::new(data, human));
    }

    if plan_result.fixable.is_empty() {
        return Ok(HandlerOutput::new(serde_json::json!({ "pruned": [] }), "nothing to prune".to_string()));
    }

    confirm_dangerous(force, &format!("About to prune {} docker artifact(s).", plan_result.fixable.len()))?;

    let circuits: HashMap<String, &masterclaw_core::resilience::CircuitBreaker> =
        breakers.iter().map(|(n, b)| (n.clone(), b)).collect();
    let service_base_urls: HashMap<String, String> = crate::state::KNOWN_SERVICES
        .iter()
        .map(|(name, default_url)| (name.to_string(), state.service_url(name, default_url)))
        .collect();
    let apply_ctx = ApplyContext { circuits, service_base_urls, protected_prefixes: state.protected_prefixes() };
    let report = apply(&plan_result, &apply_ctx).await?;

    state
        .audit
        .append(PendingRecord {
            correlation_id: ctx.correlation_id.clone(),
            user_identity: ctx.user_identity.clone(),
            event_type: AuditEventType::CommandExec,
            subject_ref: "prune".to_string(),
            details: serde_json::json!({ "pruned": report.applied.len(), "failed": report.failed.len() }),
        })
        .map_err(|e| McError::generic(format!("failed to write audit record: {e}")))?;

    let data = serde_json::json!({
        "pruned": report.applied.iter().map(|a| a.subject.clone()).collect::<Vec<_>>(),
        "failed": report.failed.iter().map(|(a, reason)| serde_json::json!({
            "subject": a.subject,
            "reason": reason,
        })).collect::<Vec<_>>(),
    });
    let human = format!("pruned {} artifact(s), {} failed", report.applied.len(), report.failed.len());
    Ok(HandlerOutput::new(data, human))
}
