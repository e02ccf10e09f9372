//! `mc heal` (and its narrower sibling `mc prune`): `scan -> plan -> apply`.
//! Dry-run by default; `--apply` requires confirmation unless `--force` is
//! set, per [`crate::confirm::confirm_dangerous`].

use std::collections::HashMap;

use masterclaw_core::AuditEventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_core::resilience::CircuitBreaker;
use masterclaw_heal::ApplyContext;
use masterclaw_heal::Issue;
use masterclaw_heal::Plan;
use masterclaw_heal::apply;
use masterclaw_heal::issue::ActionKind;
use masterclaw_heal::plan;
use masterclaw_heal::scan::ConfigFileExpectation;
use masterclaw_heal::scan::ScanContext;
use masterclaw_heal::scan::scan;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::circuits_store;
use crate::confirm::confirm_dangerous;
use crate::output::HandlerOutput;
use crate::state::AppState;
use crate::state::KNOWN_SERVICES;

/// Scan every known service/circuit/config file, persisting each breaker's
/// post-scan snapshot. Returns the owned breakers (so a caller applying
/// fixes can reuse the exact same in-memory breaker instances) alongside the
/// issues found.
pub async fn scan_and_persist(state: &AppState) -> Result<(Vec<(String, CircuitBreaker)>, Vec<Issue>), McError> {
    let circuits_file = circuits_store::load(&state.state_dir);
    let breakers: Vec<(String, CircuitBreaker)> = KNOWN_SERVICES
        .iter()
        .map(|(name, _)| (name.to_string(), circuits_store::restore_breaker(&circuits_file, name)))
        .collect();

    let services: Vec<(String, String)> = KNOWN_SERVICES
        .iter()
        .map(|(name, default_url)| (name.to_string(), state.service_url(name, default_url)))
        .collect();
    let config_files = vec![
        ConfigFileExpectation { path: state.state_dir.path("audit.key"), expected_mode: 0o600 },
        ConfigFileExpectation { path: state.state_dir.path("config.json"), expected_mode: 0o600 },
    ];
    let circuits: Vec<(String, &CircuitBreaker)> = breakers.iter().map(|(n, b)| (n.clone(), b)).collect();
    let protected_prefixes = state.protected_prefixes();

    let ctx = ScanContext { services, config_files, circuits, protected_prefixes };
    let issues = scan(&ctx).await;

    for (name, breaker) in &breakers {
        circuits_store::persist_breaker(&state.state_dir, name, breaker)?;
    }

    Ok((breakers, issues))
}

pub async fn run(ctx: &CommandContext, state: &AppState, apply_fix: bool, force: bool) -> Result<HandlerOutput, McError> {
    let (breakers, issues) = scan_and_persist(state).await?;
    let plan_result = plan(&issues);

    if !apply_fix {
        return Ok(dry_run_output(&plan_result));
    }

    confirm_dangerous(force, &format!("About to apply {} fix(es).", plan_result.fixable.len()))?;

    let report = apply_fixable(state, &breakers, &plan_result).await?;

    state
        .audit
        .append(PendingRecord {
            correlation_id: ctx.correlation_id.clone(),
            user_identity: ctx.user_identity.clone(),
            event_type: AuditEventType::CommandExec,
            subject_ref: "heal".to_string(),
            details: serde_json::json!({
                "applied": report.applied.len(),
                "failed": report.failed.len(),
            }),
        })
        .map_err(|e| McError::generic(format!("failed to write audit record: {e}")))?;

    let data = serde_json::json!({
        "applied": report.applied.iter().map(|a| serde_json::json!({
            "kind": serde_json::to_value(a.kind).unwrap_or(serde_json::Value::Null),
            "subject": a.subject,
        })).collect::<Vec<_>>(),
        "failed": report.failed.iter().map(|(a, reason)| serde_json::json!({
            "subject": a.subject,
            "reason": reason,
        })).collect::<Vec<_>>(),
        "manual": plan_result.manual.iter().map(issue_json).collect::<Vec<_>>(),
    });
    let human = format!(
        "applied {} fix(es), {} failed, {} require manual attention",
        report.applied.len(),
        report.failed.len(),
        plan_result.manual.len()
    );
    Ok(HandlerOutput::new(data, human))
}

async fn apply_fixable(
    state: &AppState,
    breakers: &[(String, CircuitBreaker)],
    plan_result: &Plan,
) -> Result<masterclaw_heal::ApplyReport, McError> {
    let circuits: HashMap<String, &CircuitBreaker> =
        breakers.iter().map(|(n, b)| (n.clone(), b)).collect();
    let service_base_urls: HashMap<String, String> = KNOWN_SERVICES
        .iter()
        .map(|(name, default_url)| (name.to_string(), state.service_url(name, default_url)))
        .collect();
    let apply_ctx = ApplyContext { circuits, service_base_urls, protected_prefixes: state.protected_prefixes() };

    let report = apply(plan_result, &apply_ctx).await?;

    for (name, breaker) in breakers {
        circuits_store::persist_breaker(&state.state_dir, name, breaker)?;
    }

    Ok(report)
}

/// Restrict a plan to just `PruneArtifact` actions, for `mc prune`'s
/// narrower scope. Other fixable actions are reported but left untouched.
pub fn prune_only(plan_result: Plan) -> (Plan, usize) {
    let skipped = plan_result.fixable.iter().filter(|a| a.kind != ActionKind::PruneArtifact).count();
    let fixable = plan_result.fixable.into_iter().filter(|a| a.kind == ActionKind::PruneArtifact).collect();
    (Plan { fixable, manual: plan_result.manual }, skipped)
}

fn dry_run_output(plan_result: &Plan) -> HandlerOutput {
    let data = serde_json::json!({
        "fixable": plan_result.fixable.iter().map(|a| serde_json::json!({
            "kind": serde_json::to_value(a.kind).unwrap_or(serde_json::Value::Null),
            "subject": a.subject,
            "description": a.description,
        })).collect::<Vec<_>>(),
        "manual": plan_result.manual.iter().map(issue_json).collect::<Vec<_>>(),
    });
    let human = format!(
        "{} fixable issue(s), {} requiring manual attention (dry run; pass --apply to fix)",
        plan_result.fixable.len(),
        plan_result.manual.len()
    );
    HandlerOutput::new(data, human)
}

fn issue_json(issue: &Issue) -> serde_json::Value {
    serde_json::json!({
        "category": serde_json::to_value(issue.category).unwrap_or(serde_json::Value::Null),
        "severity": serde_json::to_value(issue.severity).unwrap_or(serde_json::Value::Null),
        "subject": issue.subject,
        "description": issue.description,
    })
}
