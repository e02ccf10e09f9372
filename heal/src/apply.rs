//! `apply`: executes a [`crate::plan::Plan`]'s fixable actions in the fixed
//! order restart → permissions → circuit reset → prune.
//! Idempotent: running twice against a clean system converges to zero
//! applied actions, since a second `scan` would not have found the issue.

use std::collections::HashMap;
use std::time::Duration;

use masterclaw_core::resilience::CircuitBreaker;
use masterclaw_exec::ProcessDescriptor;
use masterclaw_exec::SecureProcess;
use masterclaw_net::ServiceFacade;
use masterclaw_protocol::McError;

use crate::issue::Action;
use crate::issue::ActionKind;
use crate::plan::Plan;

pub struct ApplyContext<'a> {
    pub circuits: HashMap<String, &'a CircuitBreaker>,
    pub service_base_urls: HashMap<String, String>,
    pub protected_prefixes: &'static [&'static str],
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<Action>,
    pub failed: Vec<(Action, String)>,
}

pub async fn apply(plan: &Plan, ctx: &ApplyContext<'_>) -> Result<ApplyReport, McError> {
    let mut report = ApplyReport::default();

    for action in &plan.fixable {
        if action.kind == ActionKind::PruneArtifact && is_protected(&action.subject, ctx.protected_prefixes) {
            return Err(McError::generic(format!(
                "refusing to apply: {} matches a protected prefix but was planned for pruning",
                action.subject
            )));
        }

        let outcome = match action.kind {
            ActionKind::RestartService => restart_service(action, ctx).await,
            ActionKind::FixPermissions => fix_permissions(action),
            ActionKind::ResetCircuit => reset_circuit(action, ctx),
            ActionKind::PruneArtifact => prune_artifact(action).await,
        };

        match outcome {
            Ok(()) => report.applied.push(action.clone()),
            Err(message) => report.failed.push((action.clone(), message)),
        }
    }

    Ok(report)
}

fn is_protected(subject: &str, protected_prefixes: &[&str]) -> bool {
    protected_prefixes.iter().any(|prefix| subject.starts_with(prefix))
}

async fn restart_service(action: &Action, ctx: &ApplyContext<'_>) -> Result<(), String> {
    let mut descriptor = ProcessDescriptor::new("docker", vec!["restart".to_string(), action.subject.clone()]);
    descriptor.allowlist = &["docker"];
    let result = SecureProcess::run(descriptor).await.map_err(|e| e.message)?;
    if result.exit_code != 0 {
        return Err(format!("docker restart exited with code {}", result.exit_code));
    }

    if let Some(base_url) = ctx.service_base_urls.get(&action.subject) {
        let facade = ServiceFacade::new(base_url.clone());
        for _ in 0..5 {
            if facade.health("heal-apply").await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        return Err(format!("service {} did not become healthy after restart", action.subject));
    }
    Ok(())
}

fn fix_permissions(action: &Action) -> Result<(), String> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = std::path::Path::new(&action.subject);
        let mut perms = std::fs::metadata(path).map_err(|e| e.to_string())?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms).map_err(|e| e.to_string())
    }
    #[cfg(not(unix))]
    {
        Ok(())
    }
}

fn reset_circuit(action: &Action, ctx: &ApplyContext<'_>) -> Result<(), String> {
    match ctx.circuits.get(&action.subject) {
        Some(breaker) => {
            breaker.reset();
            Ok(())
        }
        None => Err(format!("no known circuit named {}", action.subject)),
    }
}

async fn prune_artifact(action: &Action) -> Result<(), String> {
    let subcommand = match action.resource_kind.as_deref() {
        Some("image") => vec!["rmi".to_string(), action.subject.clone()],
        Some("container") => vec!["rm".to_string(), action.subject.clone()],
        Some("volume") => vec!["volume".to_string(), "rm".to_string(), action.subject.clone()],
        Some("network") => vec!["network".to_string(), "rm".to_string(), action.subject.clone()],
        other => return Err(format!("unknown artifact kind: {other:?}")),
    };
    let mut descriptor = ProcessDescriptor::new("docker", subcommand);
    descriptor.allowlist = &["docker"];
    let result = SecureProcess::run(descriptor).await.map_err(|e| e.message)?;
    if result.exit_code != 0 {
        return Err(format!("docker prune command exited with code {}", result.exit_code));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_to_prune_a_protected_artifact_even_if_planned() {
        let plan = Plan {
            fixable: vec![Action {
                kind: ActionKind::PruneArtifact,
                subject: "mc-gateway".to_string(),
                description: "unused container".to_string(),
                resource_kind: Some("container".to_string()),
            }],
            manual: Vec::new(),
        };
        let ctx = ApplyContext {
            circuits: HashMap::new(),
            service_base_urls: HashMap::new(),
            protected_prefixes: &["mc-"],
        };
        let result = apply(&plan, &ctx).await;
        assert!(result.is_err());
    }

    #[test]
    fn reset_circuit_succeeds_for_a_known_circuit() {
        let breaker = CircuitBreaker::new(Default::default());
        let mut circuits: HashMap<String, &CircuitBreaker> = HashMap::new();
        circuits.insert("gateway".to_string(), &breaker);
        let ctx = ApplyContext {
            circuits,
            service_base_urls: HashMap::new(),
            protected_prefixes: &[],
        };
        let action = Action {
            kind: ActionKind::ResetCircuit,
            subject: "gateway".to_string(),
            description: "circuit open".to_string(),
            resource_kind: None,
        };
        assert!(reset_circuit(&action, &ctx).is_ok());
    }
}
