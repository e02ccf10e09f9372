//! The declarative command tree (§4.9): one `clap` enum variant per
//! top-level category named in §6. `config`, `audit`, `rate-limit`,
//! `circuits`, and `events` carry their own nested action enum; every other
//! fully-specified category is a flat subcommand, and everything left over
//! goes through [`GenericArgs`] via the uniform dispatcher contract.

use clap::Args;
use clap::Parser;
use clap::Subcommand;

#[derive(Debug, Parser)]
#[command(name = "mc", version, about = "Operations toolkit for the masterclaw service fleet")]
pub struct Cli {
    /// Force JSON output (equivalent to `MC_JSON_OUTPUT=1`).
    #[arg(long, global = true)]
    pub json: bool,
    /// Suppress non-essential human-mode output.
    #[arg(long, global = true)]
    pub quiet: bool,
    /// Bypass the interactive confirmation prompt for a destructive operation.
    #[arg(long, global = true)]
    pub force: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect or change the merged configuration tree.
    Config(ConfigArgs),
    /// Summarize the state of every known service and open circuit.
    Status,
    /// Run each service's `/health` endpoint and report the result.
    Health,
    /// Run a command inside a whitelisted container.
    Exec(ExecArgs),
    /// Scan for issues, then fix the ones marked fixable.
    Heal(HealArgs),
    /// Remove unused docker artifacts (images, containers, volumes, networks).
    Prune(PruneArgs),
    /// Scan for issues without fixing anything.
    Scan,
    /// Inspect or verify the HMAC-chained audit log.
    Audit(AuditArgs),
    /// Inspect or reset rate-limit windows.
    RateLimit(RateLimitArgs),
    /// Inspect or reset circuit breakers.
    Circuits(CircuitsArgs),
    /// List or acknowledge operator-facing events.
    Events(EventsArgs),
    Deploy(GenericArgs),
    Backup(GenericArgs),
    Restore(GenericArgs),
    Logs(GenericArgs),
    Secrets(GenericArgs),
    Cost(GenericArgs),
    Slo(GenericArgs),
    Session(GenericArgs),
    Memory(GenericArgs),
    Search(GenericArgs),
    Workflow(GenericArgs),
    Dashboard(GenericArgs),
    Template(GenericArgs),
    Troubleshoot(GenericArgs),
}

impl Command {
    /// The first token of `commandPath` — the rate-limit category and the
    /// audit `subjectRef` default.
    pub fn category(&self) -> &'static str {
        match self {
            Command::Config(_) => "config",
            Command::Status => "status",
            Command::Health => "health",
            Command::Exec(_) => "exec",
            Command::Heal(_) => "heal",
            Command::Prune(_) => "prune",
            Command::Scan => "scan",
            Command::Audit(_) => "audit",
            Command::RateLimit(_) => "rate-limit",
            Command::Circuits(_) => "circuits",
            Command::Events(_) => "events",
            Command::Deploy(_) => "deploy",
            Command::Backup(_) => "backup",
            Command::Restore(_) => "restore",
            Command::Logs(_) => "logs",
            Command::Secrets(_) => "secrets",
            Command::Cost(_) => "cost",
            Command::Slo(_) => "slo",
            Command::Session(_) => "session",
            Command::Memory(_) => "memory",
            Command::Search(_) => "search",
            Command::Workflow(_) => "workflow",
            Command::Dashboard(_) => "dashboard",
            Command::Template(_) => "template",
            Command::Troubleshoot(_) => "troubleshoot",
        }
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the whole merged configuration tree.
    Show,
    /// Print a single dotted-path value.
    Get { key: String },
    /// Set a dotted-path value in the persisted overlay (`config.json`).
    Set { key: String, value: String },
}

impl ConfigAction {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigAction::Show => "show",
            ConfigAction::Get { .. } => "get",
            ConfigAction::Set { .. } => "set",
        }
    }
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Container name; must match one of the whitelisted prefixes.
    pub container: String,
    /// Run the command through `sh -c` / `bash -c` instead of argv-exec.
    #[arg(long)]
    pub shell: bool,
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct HealArgs {
    /// Apply fixable actions instead of only reporting them.
    #[arg(long)]
    pub apply: bool,
}

#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Apply the prune actions instead of only reporting them.
    #[arg(long)]
    pub apply: bool,
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub action: AuditAction,
}

#[derive(Debug, Subcommand)]
pub enum AuditAction {
    /// Walk the HMAC chain and report the first tampered record, if any.
    Verify,
    /// Print the most recent audit records.
    Tail {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

impl AuditAction {
    pub fn name(&self) -> &'static str {
        match self {
            AuditAction::Verify => "verify",
            AuditAction::Tail { .. } => "tail",
        }
    }
}

#[derive(Debug, Args)]
pub struct RateLimitArgs {
    #[command(subcommand)]
    pub action: RateLimitAction,
}

#[derive(Debug, Subcommand)]
pub enum RateLimitAction {
    /// Show remaining admission for every tracked (user, category) window.
    Show,
    /// Clear the window for one category.
    Reset { category: String },
}

impl RateLimitAction {
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitAction::Show => "show",
            RateLimitAction::Reset { .. } => "reset",
        }
    }
}

#[derive(Debug, Args)]
pub struct CircuitsArgs {
    #[command(subcommand)]
    pub action: CircuitsAction,
}

#[derive(Debug, Subcommand)]
pub enum CircuitsAction {
    /// List every known circuit and its current state.
    List,
    /// Force a circuit back to closed.
    Reset { name: String },
}

impl CircuitsAction {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitsAction::List => "list",
            CircuitsAction::Reset { .. } => "reset",
        }
    }
}

#[derive(Debug, Args)]
pub struct EventsArgs {
    #[command(subcommand)]
    pub action: EventsAction,
}

#[derive(Debug, Subcommand)]
pub enum EventsAction {
    /// List the most recent events, newest first.
    List,
    /// Mark an event acknowledged by id.
    Ack { id: String },
}

impl EventsAction {
    pub fn name(&self) -> &'static str {
        match self {
            EventsAction::List => "list",
            EventsAction::Ack { .. } => "ack",
        }
    }
}

/// Uniform payload for every category the dispatcher contract covers but
/// does not reimplement business logic for (§6's "uniform dispatcher
/// instances" list).
#[derive(Debug, Args)]
pub struct GenericArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
