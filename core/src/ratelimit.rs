//! Sliding-window rate limiting, keyed by `(userIdentity, category)`
//! State is persisted through the shared store so limits survive
//! across process invocations of the CLI.

use std::collections::HashMap;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

/// One entry per rate-limited category class; a category absent from the
/// table (or the whole table, if a caller supplies none) falls back to
/// [`DEFAULT_LIMIT`].
#[derive(Debug, Clone, Copy)]
pub struct CategoryLimit {
    pub max_requests: u32,
    pub window: Duration,
}

/// Anything not named in [`default_limits`].
pub const DEFAULT_LIMIT: CategoryLimit = CategoryLimit { max_requests: 30, window: Duration::from_secs(60) };

pub fn default_limits() -> HashMap<&'static str, CategoryLimit> {
    let mut limits = HashMap::new();
    limits.insert("restore", CategoryLimit { max_requests: 3, window: Duration::from_secs(300) });
    limits.insert("config-fix", CategoryLimit { max_requests: 5, window: Duration::from_secs(60) });
    limits.insert("exec", CategoryLimit { max_requests: 5, window: Duration::from_secs(60) });
    limits.insert("deploy", CategoryLimit { max_requests: 5, window: Duration::from_secs(300) });
    limits.insert("update", CategoryLimit { max_requests: 10, window: Duration::from_secs(60) });
    limits.insert("import", CategoryLimit { max_requests: 10, window: Duration::from_secs(60) });
    limits.insert("status", CategoryLimit { max_requests: 60, window: Duration::from_secs(60) });
    limits.insert("logs", CategoryLimit { max_requests: 60, window: Duration::from_secs(60) });
    limits.insert("validate", CategoryLimit { max_requests: 60, window: Duration::from_secs(60) });
    limits
}

/// Resolve the configured limit for a category, falling back to
/// [`DEFAULT_LIMIT`] for anything not in the table.
pub fn limit_for(category: &str, table: &HashMap<&'static str, CategoryLimit>) -> CategoryLimit {
    table.get(category).copied().unwrap_or(DEFAULT_LIMIT)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitState {
    /// `"{userIdentity}:{category}"` -> timestamps (epoch millis) of
    /// admitted requests still inside the window, oldest first.
    pub windows: HashMap<String, Vec<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: Duration,
}

fn key(user_identity: &str, category: &str) -> String {
    format!("{user_identity}:{category}")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Decide admission for a single request and return the updated state. Pure
/// function so the caller can wrap it with [`crate::store::atomic_update`]
/// for cross-process persistence.
pub fn check_and_record(
    mut state: RateLimitState,
    user_identity: &str,
    category: &str,
    limit: CategoryLimit,
) -> (RateLimitState, Admission) {
    let now = now_millis();
    let window_millis = limit.window.as_millis() as u64;
    let cutoff = now.saturating_sub(window_millis);

    let entry = state.windows.entry(key(user_identity, category)).or_default();
    entry.retain(|&ts| ts > cutoff);

    if entry.len() as u32 >= limit.max_requests {
        let oldest = entry.first().copied().unwrap_or(now);
        let retry_after = Duration::from_millis((oldest + window_millis).saturating_sub(now));
        return (
            state,
            Admission { allowed: false, remaining: 0, retry_after },
        );
    }

    entry.push(now);
    let remaining = limit.max_requests - entry.len() as u32;
    (state, Admission { allowed: true, remaining, retry_after: Duration::ZERO })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(max: u32, secs: u64) -> CategoryLimit {
        CategoryLimit { max_requests: max, window: Duration::from_secs(secs) }
    }

    #[test]
    fn admits_requests_under_the_limit() {
        let state = RateLimitState::default();
        let (state, admission) = check_and_record(state, "alice", "exec", limit(2, 60));
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 1);

        let (_, admission2) = check_and_record(state, "alice", "exec", limit(2, 60));
        assert!(admission2.allowed);
        assert_eq!(admission2.remaining, 0);
    }

    #[test]
    fn denies_requests_once_window_is_full() {
        let mut state = RateLimitState::default();
        for _ in 0..3 {
            let (next, _) = check_and_record(state, "bob", "heal", limit(3, 60));
            state = next;
        }
        let (_, admission) = check_and_record(state, "bob", "heal", limit(3, 60));
        assert!(!admission.allowed);
        assert_eq!(admission.remaining, 0);
    }

    #[test]
    fn different_users_have_independent_windows() {
        let mut state = RateLimitState::default();
        for _ in 0..3 {
            let (next, _) = check_and_record(state, "carol", "heal", limit(3, 60));
            state = next;
        }
        let (_, admission) = check_and_record(state, "dave", "heal", limit(3, 60));
        assert!(admission.allowed);
    }

    #[test]
    fn different_categories_have_independent_windows() {
        let mut state = RateLimitState::default();
        for _ in 0..3 {
            let (next, _) = check_and_record(state, "erin", "heal", limit(3, 60));
            state = next;
        }
        let (_, admission) = check_and_record(state, "erin", "exec", limit(3, 60));
        assert!(admission.allowed);
    }

    #[test]
    fn entries_older_than_window_are_evicted() {
        let mut state = RateLimitState::default();
        state
            .windows
            .insert(key("frank", "exec"), vec![now_millis().saturating_sub(120_000)]);
        let (_, admission) = check_and_record(state, "frank", "exec", limit(1, 60));
        assert!(admission.allowed);
    }
}
