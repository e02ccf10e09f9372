//! Shared vocabulary for scan findings and the actions that fix them
//!

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DockerDaemon,
    ServiceHealth,
    DiskSpace,
    MemoryPressure,
    ConfigPermissions,
    OpenCircuit,
    DockerArtifact,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    pub subject: String,
    pub fixable: bool,
    /// Docker objects matching the protected-prefix rule are reported but
    /// never pruned, even when otherwise eligible.
    pub protected: bool,
    /// For `DockerArtifact` issues: `"image" | "container" | "volume" |
    /// "network"`, so `apply` knows which `docker` subcommand removes it.
    pub resource_kind: Option<String>,
}

impl Issue {
    pub fn new(category: Category, severity: Severity, subject: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            subject: subject.into(),
            fixable: false,
            protected: false,
            resource_kind: None,
        }
    }

    pub fn fixable(mut self) -> Self {
        self.fixable = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn with_resource_kind(mut self, kind: impl Into<String>) -> Self {
        self.resource_kind = Some(kind.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartService,
    FixPermissions,
    ResetCircuit,
    PruneArtifact,
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    pub subject: String,
    pub description: String,
    pub resource_kind: Option<String>,
}

/// `apply` executes fixable actions in this fixed order: restarting
/// services first (so downstream health checks observe a stable system),
/// then permissions, then circuit resets, then pruning — pruning last so a
/// restarted service cannot race the removal of an artifact it still holds
/// open.
pub const APPLY_ORDER: [ActionKind; 4] = [
    ActionKind::RestartService,
    ActionKind::FixPermissions,
    ActionKind::ResetCircuit,
    ActionKind::PruneArtifact,
];
