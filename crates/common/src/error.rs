use serde::{Deserialize, Serialize};

/// Cross-crate classification of failures.
///
/// Every crate keeps its own error enum; each one reports which of these
/// kinds it belongs to so the HTTP layer and the admin CLI can map it
/// without knowing the crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Item, order or template absent.
    NotFound,
    /// Fast or durable ledger could not cover the quantity.
    InsufficientStock,
    /// Per-user purchase cap reached.
    LimitExceeded,
    /// Duplicate submission or concurrent idempotent retry.
    Conflict,
    /// A remote collaborator failed or timed out.
    DownstreamUnavailable,
    /// Serialization or logic defect.
    Internal,
}

impl ErrorKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorKind::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::DownstreamUnavailable => "DOWNSTREAM_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Process exit code used by the admin CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::NotFound => 2,
            ErrorKind::InsufficientStock => 3,
            ErrorKind::LimitExceeded => 4,
            ErrorKind::Conflict => 5,
            ErrorKind::DownstreamUnavailable => 6,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::InsufficientStock,
            ErrorKind::LimitExceeded,
            ErrorKind::Conflict,
            ErrorKind::DownstreamUnavailable,
            ErrorKind::Internal,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(ErrorKind::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::InsufficientStock).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_STOCK\"");
    }
}
