//! Fixed exit-code enumeration. JSON output carries the same
//! numeric code as the process exit status.

/// The dispatcher's complete exit-code surface. Every handler outcome maps
/// to exactly one of these; the mapping happens once, at the top, in the
/// dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    Generic = 1,
    Usage = 2,
    Validation = 3,
    NotFound = 4,
    RateLimited = 5,
    CircuitOpen = 6,
    SsrfViolation = 7,
    ResourceLimit = 8,
    Cancelled = 9,
    Integrity = 10,
    Budget = 11,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::Generic => "GENERIC",
            ExitCode::Usage => "USAGE",
            ExitCode::Validation => "VALIDATION",
            ExitCode::NotFound => "NOT_FOUND",
            ExitCode::RateLimited => "RATE_LIMITED",
            ExitCode::CircuitOpen => "CIRCUIT_OPEN",
            ExitCode::SsrfViolation => "SSRF_VIOLATION",
            ExitCode::ResourceLimit => "RESOURCE_LIMIT",
            ExitCode::Cancelled => "CANCELLED",
            ExitCode::Integrity => "INTEGRITY",
            ExitCode::Budget => "BUDGET",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_fixed_enumeration() {
        assert_eq!(ExitCode::Ok.as_i32(), 0);
        assert_eq!(ExitCode::RateLimited.as_i32(), 5);
        assert_eq!(ExitCode::Budget.as_i32(), 11);
    }
}
