use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidOptions,
    StoreUnavailable,
    MalformedRecord,
    SchemaMismatch,
    ChunkFailed,
    InconsistencyLogWriteFailed,
    LockContention,
    PartitionViolation,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidOptions => "E1003",
            Self::StoreUnavailable => "E3001",
            Self::MalformedRecord => "E3002",
            Self::SchemaMismatch => "E3003",
            Self::ChunkFailed => "E4001",
            Self::InconsistencyLogWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::PartitionViolation => "E6001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidOptions => "Invalid reconstruction options",
            Self::StoreUnavailable => "Version store unavailable",
            Self::MalformedRecord => "Malformed version or activity record",
            Self::SchemaMismatch => "Store schema is newer than this binary",
            Self::ChunkFailed => "One or more chunks failed",
            Self::InconsistencyLogWriteFailed => "Inconsistency log write failed",
            Self::LockContention => "Lock contention",
            Self::PartitionViolation => "Version intervals overlap or leave gaps",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `tl init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .timeline/config.toml and retry."),
            Self::InvalidOptions => Some("Use a chunk size and worker count of at least 1."),
            Self::StoreUnavailable => Some("Check that the database file exists and is writable."),
            Self::MalformedRecord => None,
            Self::SchemaMismatch => Some("Upgrade `tl` to a version that knows this schema."),
            Self::ChunkFailed => Some(
                "Committed chunks are kept. Re-run `tl reconstruct` with the same ids to resume.",
            ),
            Self::InconsistencyLogWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => {
                Some("Retry after the other `tl` process releases its lock.")
            }
            Self::PartitionViolation => {
                Some("Inspect the entity with `tl show` and re-import its versions.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::InvalidOptions,
            ErrorCode::StoreUnavailable,
            ErrorCode::MalformedRecord,
            ErrorCode::SchemaMismatch,
            ErrorCode::ChunkFailed,
            ErrorCode::InconsistencyLogWriteFailed,
            ErrorCode::LockContention,
            ErrorCode::PartitionViolation,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::ChunkFailed.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
