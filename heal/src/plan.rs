//! `plan`: a pure, dry-run rendering of a scan into an ordered action list,
//! split into `fixable` and `manual`. Never mutates
//! anything — `apply` is the only side-effecting step.

use crate::issue::Action;
use crate::issue::ActionKind;
use crate::issue::Category;
use crate::issue::Issue;

#[derive(Debug, Clone)]
pub struct Plan {
    pub fixable: Vec<Action>,
    pub manual: Vec<Issue>,
}

pub fn plan(issues: &[Issue]) -> Plan {
    let mut fixable = Vec::new();
    let mut manual = Vec::new();

    for issue in issues {
        if !issue.fixable {
            manual.push(issue.clone());
            continue;
        }
        // A protected docker object is reported but must never be planned
        // for pruning, even if the scanner marked it fixable by mistake.
        if issue.protected && issue.category == Category::DockerArtifact {
            manual.push(issue.clone());
            continue;
        }
        if let Some(kind) = action_kind_for(issue.category) {
            fixable.push(Action {
                kind,
                subject: issue.subject.clone(),
                description: issue.description.clone(),
                resource_kind: issue.resource_kind.clone(),
            });
        } else {
            manual.push(issue.clone());
        }
    }

    fixable.sort_by_key(|action| action_order_index(action.kind));
    Plan { fixable, manual }
}

fn action_kind_for(category: Category) -> Option<ActionKind> {
    match category {
        Category::ServiceHealth => Some(ActionKind::RestartService),
        Category::ConfigPermissions => Some(ActionKind::FixPermissions),
        Category::OpenCircuit => Some(ActionKind::ResetCircuit),
        Category::DockerArtifact => Some(ActionKind::PruneArtifact),
        Category::DockerDaemon | Category::DiskSpace | Category::MemoryPressure => None,
    }
}

fn action_order_index(kind: ActionKind) -> usize {
    crate::issue::APPLY_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(crate::issue::APPLY_ORDER.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Severity;

    #[test]
    fn protected_artifacts_are_never_planned_for_pruning() {
        let issue = Issue::new(Category::DockerArtifact, Severity::Warning, "mc-gateway", "unused container")
            .fixable()
            .protected();
        let result = plan(&[issue]);
        assert!(result.fixable.is_empty());
        assert_eq!(result.manual.len(), 1);
    }

    #[test]
    fn fixable_actions_are_ordered_restart_then_permissions_then_circuit_then_prune() {
        let issues = vec![
            Issue::new(Category::DockerArtifact, Severity::Warning, "img", "d").fixable(),
            Issue::new(Category::OpenCircuit, Severity::Warning, "gw", "d").fixable(),
            Issue::new(Category::ConfigPermissions, Severity::Warning, ".env", "d").fixable(),
            Issue::new(Category::ServiceHealth, Severity::Critical, "svc", "d").fixable(),
        ];
        let result = plan(&issues);
        let kinds: Vec<ActionKind> = result.fixable.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::RestartService,
                ActionKind::FixPermissions,
                ActionKind::ResetCircuit,
                ActionKind::PruneArtifact,
            ]
        );
    }

    #[test]
    fn non_fixable_issues_fall_through_to_manual() {
        let issue = Issue::new(Category::DiskSpace, Severity::Critical, "disk", "low space");
        let result = plan(&[issue]);
        assert!(result.fixable.is_empty());
        assert_eq!(result.manual.len(), 1);
    }
}
