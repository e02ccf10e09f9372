//! [`CommandContext`] is created once a subcommand has been resolved and
//! lives for exactly the duration of that handler invocation.

use std::collections::BTreeMap;
use std::time::SystemTime;

use sha2::Digest;
use sha2::Sha256;

use crate::correlation::CorrelationId;

/// Output rendering mode selected by `--json` or `MC_JSON_OUTPUT=1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// A single resolved command invocation: everything a handler needs and
/// nothing it should reach for through global state.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub correlation_id: CorrelationId,
    pub user_identity: String,
    pub started_at: SystemTime,
    pub command_path: Vec<String>,
    pub flags: BTreeMap<String, String>,
    pub output_mode: OutputMode,
    pub debug_enabled: bool,
}

impl CommandContext {
    pub fn new(
        correlation_id: CorrelationId,
        command_path: Vec<String>,
        flags: BTreeMap<String, String>,
        output_mode: OutputMode,
        debug_enabled: bool,
    ) -> Self {
        Self {
            correlation_id,
            user_identity: stable_user_identity(),
            started_at: SystemTime::now(),
            command_path,
            flags,
            output_mode,
            debug_enabled,
        }
    }

    /// The first token of `commandPath`, used as the rate-limit category
    /// and as the audit `subjectRef` default.
    pub fn category(&self) -> &str {
        self.command_path.first().map(String::as_str).unwrap_or("unknown")
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed().unwrap_or_default()
    }
}

/// A stable, non-reversible identity for the operating-system user running
/// the command: SHA-256 of `<os-user>@<hostname>`, hex-encoded and
/// truncated to 16 characters. Stable across invocations on the same
/// machine, never exposes the raw username in state files or logs.
pub fn stable_user_identity() -> String {
    let user = whoami_user();
    let host = whoami_host();
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(b"@");
    hasher.update(host.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..16].to_string()
}

fn whoami_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string())
}

fn whoami_host() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_user_identity_is_deterministic() {
        assert_eq!(stable_user_identity(), stable_user_identity());
        assert_eq!(stable_user_identity().len(), 16);
    }

    #[test]
    fn category_uses_first_command_token() {
        let ctx = CommandContext::new(
            CorrelationId::generate(),
            vec!["deploy".to_string(), "rolling".to_string()],
            BTreeMap::new(),
            OutputMode::Human,
            false,
        );
        assert_eq!(ctx.category(), "deploy");
    }
}
