// ⚠️ Matching Errors - Domain failures of the quota matching core
//
// Storage, import and config failures stay in anyhow at the boundary.
// These variants are the ones callers are expected to match on.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// Source identifier does not start with a YYYYMM prefix
    #[error("malformed source identifier '{identifier}': expected a leading YYYYMM date")]
    MalformedIdentifier { identifier: String },

    /// Category is not defined in the registry
    #[error("unknown category '{category}'")]
    UnknownCategory { category: String },

    /// Decision stage could not settle on a single rate
    #[error("no decision for {file_name} ({employee}): {reason}")]
    NoDecision {
        file_name: String,
        employee: String,
        reason: String,
    },

    /// Registry configuration holds a token without a YYYYMM prefix
    #[error("invalid version token '{token}' in category '{category}'")]
    InvalidVersionToken { category: String, token: String },
}

pub type MatchResult<T> = std::result::Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MatchError::MalformedIdentifier {
            identifier: "invalid.xls".to_string(),
        };
        assert!(err.to_string().contains("invalid.xls"));

        let err = MatchError::NoDecision {
            file_name: "202005.xls".to_string(),
            employee: "张三".to_string(),
            reason: "decision rules not defined".to_string(),
        };
        assert!(err.to_string().starts_with("no decision for 202005.xls"));
    }
}
