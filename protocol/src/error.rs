//! Error taxonomy.
//!
//! `ErrorKind` is the semantic *kind* a fault belongs to; `ExitCode` is the
//! concrete process exit status. A kind does not map 1:1 onto a single exit
//! code (e.g. `Security` covers both SSRF and an integrity-signature
//! mismatch), so `McError` carries both explicitly and every constructor
//! below pins the correct pair.
//!
//! Components bubble an `McError`; the dispatcher converts it to an exit
//! code and a user-visible message exactly once, at the top. No intermediate layer should catch one of these just to
//! log it and rethrow unchanged.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::exit_code::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Security,
    Dependency,
    Absent,
    Concurrency,
    Integrity,
    Budget,
    /// Not one of the seven fault kinds above, but every dispatcher needs
    /// an "argument/flag error" and a "interrupted by signal" bucket to
    /// fill out the fixed exit-code table.
    Usage,
    Cancelled,
    Generic,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct McError {
    pub kind: ErrorKind,
    pub exit_code: ExitCode,
    pub message: String,
    /// Structured, already-masked details surfaced in JSON output.
    pub details: Value,
}

impl McError {
    fn new(kind: ErrorKind, exit_code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            exit_code,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, ExitCode::Validation, message)
    }

    pub fn ssrf(destination: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Security,
            ExitCode::SsrfViolation,
            "Request blocked: destination not permitted.",
        )
        .with_details(serde_json::json!({ "destination": destination.to_string() }))
    }

    pub fn header_injection(header: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Security,
            ExitCode::Validation,
            "Request blocked: header value rejected.",
        )
        .with_details(serde_json::json!({ "header": header.into() }))
    }

    pub fn shell_escape(rule: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Security,
            ExitCode::Validation,
            "Command rejected: unsafe shell construct.",
        )
        .with_details(serde_json::json!({ "rule": rule.into() }))
    }

    pub fn prototype_pollution(key: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Security,
            ExitCode::Integrity,
            "On-disk state failed integrity check; reset required.",
        )
        .with_details(serde_json::json!({ "forbidden_key": key.into() }))
    }

    pub fn resource_limit(hint: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Security,
            ExitCode::ResourceLimit,
            "Command exceeded resource limits (memory/process count). See hint.",
        )
        .with_details(serde_json::json!({ "hint": hint.into() }))
    }

    pub fn signature_mismatch(index: usize) -> Self {
        Self::new(
            ErrorKind::Security,
            ExitCode::Integrity,
            "On-disk state failed integrity check; reset required.",
        )
        .with_details(serde_json::json!({ "tampered_index": index }))
    }

    pub fn response_too_large() -> Self {
        Self::new(
            ErrorKind::Dependency,
            ExitCode::Generic,
            "Upstream response exceeded the size limit.",
        )
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Dependency, ExitCode::Generic, "Request timed out.")
    }

    pub fn circuit_open(name: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(
            ErrorKind::Dependency,
            ExitCode::CircuitOpen,
            format!("Service is temporarily unavailable. Retry in {retry_after_secs} seconds."),
        )
        .with_details(serde_json::json!({ "circuit": name.into(), "retry_after_secs": retry_after_secs }))
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(
            ErrorKind::Absent,
            ExitCode::NotFound,
            format!("Resource not found: {resource}"),
        )
        .with_details(serde_json::json!({ "resource": resource }))
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::new(
            ErrorKind::Budget,
            ExitCode::RateLimited,
            format!(
                "Too many requests; next attempt in {} seconds.",
                retry_after_ms.div_ceil(1000)
            ),
        )
        .with_details(serde_json::json!({ "retry_after_ms": retry_after_ms }))
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Budget, ExitCode::Budget, message)
    }

    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Concurrency, ExitCode::Generic, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Integrity,
            ExitCode::Integrity,
            format!("On-disk state failed integrity check; reset required: {}", message.into()),
        )
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, ExitCode::Usage, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, ExitCode::Cancelled, "Interrupted.")
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, ExitCode::Generic, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssrf_maps_to_ssrf_exit_code() {
        let err = McError::ssrf("http://169.254.169.254/");
        assert_eq!(err.exit_code, ExitCode::SsrfViolation);
        assert_eq!(err.kind, ErrorKind::Security);
    }

    #[test]
    fn signature_mismatch_maps_to_integrity() {
        let err = McError::signature_mismatch(3);
        assert_eq!(err.exit_code, ExitCode::Integrity);
        assert_eq!(err.details["tampered_index"], 3);
    }

    #[test]
    fn rate_limited_formats_seconds_from_millis() {
        let err = McError::rate_limited(290_500);
        assert!(err.message.contains("291 seconds"));
    }
}
