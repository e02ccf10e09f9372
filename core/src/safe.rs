//! Safe primitives: building blocks that refuse invalid
//! input before it reaches a system call. Every failure raises a
//! [`masterclaw_protocol::McError`] carrying the rule that fired, never the
//! raw input that tripped it.

use std::collections::BTreeSet;

use masterclaw_protocol::McError;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const MAX_LOG_LINE_BYTES: usize = 2048;
const MAX_PATH_BYTES: usize = 4096;

const SHELL_METACHARACTERS: &[char] =
    &[';', '|', '&', '$', '`', '(', ')', '[', ']', '{', '}', '<', '>', '\\', '\n'];

static SENSITIVE_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(token|password|secret|key|apikey)").expect("valid regex"));

static IDENTIFIER_DEFAULT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

/// Strip ASCII control characters and CR/LF, then truncate to
/// [`MAX_LOG_LINE_BYTES`] bytes on a char boundary so the result is always
/// safe to write to a single log line.
pub fn sanitize_for_log(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect();
    truncate_to_byte_budget(&cleaned, MAX_LOG_LINE_BYTES)
}

fn truncate_to_byte_budget(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Recursively mask values under keys that look sensitive
/// (`/token|password|secret|key|apikey/i`), keeping the first/last four
/// characters when the value is long enough to make that safe.
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if SENSITIVE_KEY_PATTERN.is_match(k) {
                    out.insert(k.clone(), mask_value(v));
                } else {
                    out.insert(k.clone(), mask_sensitive(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}

fn mask_value(v: &Value) -> Value {
    match v {
        Value::String(s) => Value::String(mask_string(s)),
        Value::Object(_) | Value::Array(_) => mask_sensitive(v),
        other => other.clone(),
    }
}

/// `xxxx…yyyy` preserving first/last 4 characters; full mask when the input
/// is 8 characters or shorter.
pub fn mask_string(s: &str) -> String {
    let len = s.chars().count();
    if len <= 8 {
        return "*".repeat(len);
    }
    let chars: Vec<char> = s.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}…{tail}")
}

pub struct PathValidationOptions {
    pub allow_absolute: bool,
}

/// Reject a path containing `..` traversal (including URL/double-encoded
/// forms), a null byte, a shell metacharacter, an oversized byte length, or
/// (unless opted in) an absolute path.
pub fn validate_path(p: &str, opts: &PathValidationOptions) -> Result<(), McError> {
    if p.len() > MAX_PATH_BYTES {
        return Err(McError::validation("path exceeds maximum length").with_details(
            serde_json::json!({ "rule": "PATH_TOO_LONG" }),
        ));
    }
    if p.contains('\0') {
        return Err(rule_violation("PATH_NULL_BYTE", "path contains a null byte"));
    }
    if contains_traversal(p) {
        return Err(rule_violation("PATH_TRAVERSAL", "path contains a traversal segment"));
    }
    if p.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(rule_violation(
            "PATH_SHELL_METACHARACTER",
            "path contains a shell metacharacter",
        ));
    }
    if !opts.allow_absolute && (p.starts_with('/') || is_windows_absolute(p)) {
        return Err(rule_violation("PATH_ABSOLUTE_NOT_ALLOWED", "absolute paths are not allowed here"));
    }
    Ok(())
}

fn is_windows_absolute(p: &str) -> bool {
    let bytes = p.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn contains_traversal(p: &str) -> bool {
    let lowered = p.to_ascii_lowercase();
    let decoded = percent_decode_once(&lowered);
    for candidate in [lowered.as_str(), decoded.as_str()] {
        if candidate
            .split(['/', '\\'])
            .any(|segment| segment == "..")
        {
            return true;
        }
    }
    false
}

/// Single-pass percent-decoding (handles `%2e%2e` and `%252e%252e` style
/// attempts to disguise `..` as long as they were encoded at most twice,
/// which covers every rebinding trick seen against this validator so far).
fn percent_decode_once(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte as char);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    if out.contains('%') && out != s { percent_decode_once(&out) } else { out }
}

fn rule_violation(rule: &'static str, message: &str) -> McError {
    McError::validation(message).with_details(serde_json::json!({ "rule": rule }))
}

pub struct IdentifierOptions {
    pub max_len: usize,
    pub pattern: Option<Regex>,
}

impl Default for IdentifierOptions {
    fn default() -> Self {
        Self { max_len: 128, pattern: None }
    }
}

/// Reject an empty identifier, one longer than `max_len`, or one that does
/// not match `pattern` (default `^[A-Za-z0-9][A-Za-z0-9._-]*$`).
pub fn validate_identifier(s: &str, opts: &IdentifierOptions) -> Result<(), McError> {
    if s.is_empty() {
        return Err(rule_violation("IDENTIFIER_EMPTY", "identifier must not be empty"));
    }
    if s.len() > opts.max_len {
        return Err(rule_violation("IDENTIFIER_TOO_LONG", "identifier exceeds maximum length"));
    }
    let pattern = opts.pattern.as_ref().unwrap_or(&IDENTIFIER_DEFAULT_PATTERN);
    if !pattern.is_match(s) {
        return Err(rule_violation("IDENTIFIER_PATTERN_MISMATCH", "identifier does not match the required pattern"));
    }
    Ok(())
}

const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// True iff `k` equals, or contains as a substring, one of the JS
/// prototype-pollution gadget keys. Rust has no prototype chain, but state
/// files are shared with (or inspectable by) JS tooling in this ecosystem,
/// so the same key list is enforced here for defense in depth.
pub fn dangerous_key(k: &str) -> bool {
    DANGEROUS_KEYS.iter().any(|bad| k.contains(bad))
}

/// Recursive merge of `source` into `target`, skipping any key flagged by
/// [`dangerous_key`] at any depth. Never mutates in place so callers can
/// compare before/after.
pub fn safe_deep_merge(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            let mut merged = t.clone();
            for (k, v) in s {
                if dangerous_key(k) {
                    continue;
                }
                let combined = match merged.get(k) {
                    Some(existing) => safe_deep_merge(existing, v),
                    None => strip_dangerous_keys(v),
                };
                merged.insert(k.clone(), combined);
            }
            Value::Object(merged)
        }
        (_, s) => strip_dangerous_keys(s),
    }
}

/// Recursively drop any key flagged by [`dangerous_key`], used by the
/// persistent store on both load and save.
pub fn strip_dangerous_keys_pub(v: &Value) -> Value {
    strip_dangerous_keys(v)
}

fn strip_dangerous_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                if dangerous_key(k) {
                    continue;
                }
                out.insert(k.clone(), strip_dangerous_keys(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_dangerous_keys).collect()),
        other => other.clone(),
    }
}

/// Used by L6/L10 to validate container names and other docker-style
/// identifiers drawn from an operator-controlled whitelist rather than free
/// user input.
pub fn validate_container_name(name: &str) -> Result<(), McError> {
    validate_identifier(
        name,
        &IdentifierOptions {
            max_len: 64,
            pattern: None,
        },
    )
}

/// Validate a `KEY=value` environment assignment string: the key must match
/// `[A-Za-z_][A-Za-z0-9_]*` and the value must not contain CR/LF.
pub fn validate_env_assignment(assignment: &str) -> Result<(), McError> {
    let Some((key, value)) = assignment.split_once('=') else {
        return Err(rule_violation("ENV_MALFORMED", "environment assignment must contain '='"));
    };
    static ENV_KEY_PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
    if !ENV_KEY_PATTERN.is_match(key) {
        return Err(rule_violation("ENV_KEY_INVALID", "environment variable name is invalid"));
    }
    if value.contains('\r') || value.contains('\n') {
        return Err(rule_violation("ENV_VALUE_CRLF", "environment value contains CR/LF"));
    }
    Ok(())
}

/// Collect the set of dangerous keys present anywhere in a JSON value,
/// used by `loadState`/`loadConfig` to decide whether a security audit
/// record is warranted.
pub fn find_dangerous_keys(value: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_dangerous_keys(value, &mut found);
    found
}

fn collect_dangerous_keys(value: &Value, found: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if dangerous_key(k) {
                    found.insert(k.clone());
                }
                collect_dangerous_keys(v, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_dangerous_keys(item, found);
            }
        }
        _ => {}
    }
}
