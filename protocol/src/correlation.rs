//! Correlation IDs thread one command invocation through logs, the audit
//! log, and outbound HTTP headers.

use std::fmt;

use rand::Rng;
use rand::distr::Alphanumeric;

/// Opaque, validated correlation identifier: `[A-Za-z0-9_-]{1,64}`.
///
/// Child IDs derive as `parent:suffix` so a sub-operation's log lines can be
/// traced back to the command that spawned it without losing the parent's
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

const MAX_LEN: usize = 64;

impl CorrelationId {
    /// Generate a fresh, random correlation ID (16 alphanumeric characters).
    pub fn generate() -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self(format!("mc-{suffix}"))
    }

    /// Parse and validate an externally supplied correlation ID (from an env
    /// var or an `x-correlation-id` header). Rejects anything outside the
    /// `[A-Za-z0-9_-]{1,64}` grammar so a hostile header can never smuggle
    /// control characters into logs.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_LEN {
            return None;
        }
        if raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b':')
        {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Resolve a correlation ID the way the dispatcher does: explicit
    /// override (e.g. an inbound header) wins, then `MC_CORRELATION_ID`,
    /// otherwise a fresh one is minted.
    pub fn resolve(header_value: Option<&str>, env_value: Option<&str>) -> Self {
        header_value
            .and_then(Self::parse)
            .or_else(|| env_value.and_then(Self::parse))
            .unwrap_or_else(Self::generate)
    }

    /// Derive a child ID scoped to a sub-operation (e.g. one retry attempt,
    /// one container-exec call). Truncated to stay within `MAX_LEN`.
    pub fn derive(&self, suffix: &str) -> Self {
        let mut child = format!("{}:{}", self.0, suffix);
        child.truncate(MAX_LEN);
        Self(child)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_id() {
        let id = CorrelationId::generate();
        assert!(CorrelationId::parse(id.as_str()).is_some());
        assert!(id.as_str().len() <= MAX_LEN);
    }

    #[test]
    fn parse_rejects_control_characters() {
        assert!(CorrelationId::parse("abc\ndef").is_none());
        assert!(CorrelationId::parse("abc\r\n").is_none());
        assert!(CorrelationId::parse("").is_none());
        assert!(CorrelationId::parse(&"a".repeat(65)).is_none());
    }

    #[test]
    fn parse_accepts_grammar() {
        assert!(CorrelationId::parse("abc-123_XYZ").is_some());
    }

    #[test]
    fn resolve_prefers_header_then_env_then_generated() {
        let from_header = CorrelationId::resolve(Some("from-header"), Some("from-env"));
        assert_eq!(from_header.as_str(), "from-header");

        let from_env = CorrelationId::resolve(None, Some("from-env"));
        assert_eq!(from_env.as_str(), "from-env");

        let generated = CorrelationId::resolve(None, None);
        assert!(generated.as_str().starts_with("mc-"));
    }

    #[test]
    fn derive_builds_parent_suffix_form() {
        let parent = CorrelationId::parse("parent-id").unwrap();
        let child = parent.derive("retry-1");
        assert_eq!(child.as_str(), "parent-id:retry-1");
    }

    #[test]
    fn derive_truncates_to_max_len() {
        let parent = CorrelationId::parse(&"p".repeat(60)).unwrap();
        let child = parent.derive("suffix-that-is-long");
        assert!(child.as_str().len() <= MAX_LEN);
    }
}
