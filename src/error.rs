//! Error types for sigdec

use std::time::Duration;

use thiserror::Error;

/// Main error type for sigdec operations
#[derive(Debug, Error)]
pub enum SigdecError {
    #[error("Cipher parse error: {0}")]
    Parse(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Algorithm not found in {stage}: looking for '{wanted}'")]
    AlgorithmNotFound { stage: &'static str, wanted: String },

    #[error("Unterminated function body: looking for '{wanted}'")]
    UnterminatedFunction { wanted: String },

    #[error("Script execution failed in {stage}: {cause}")]
    ScriptExecution { stage: &'static str, cause: String },

    #[error("Script evaluation exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("Swap applied to empty input")]
    EmptyInput,
}

impl SigdecError {
    /// Check if the error indicates the remote script format has drifted
    /// and a freshly fetched script is worth trying.
    pub fn is_format_drift(&self) -> bool {
        matches!(
            self,
            SigdecError::AlgorithmNotFound { .. } | SigdecError::UnterminatedFunction { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_drift_classification() {
        let err = SigdecError::AlgorithmNotFound {
            stage: "actions object",
            wanted: "reverse".to_string(),
        };
        assert!(err.is_format_drift());

        let err = SigdecError::UnterminatedFunction {
            wanted: "Yq".to_string(),
        };
        assert!(err.is_format_drift());

        assert!(!SigdecError::EmptyInput.is_format_drift());
        assert!(!SigdecError::Parse("missing url".to_string()).is_format_drift());
    }

    #[test]
    fn test_error_messages_carry_identifiers() {
        let err = SigdecError::AlgorithmNotFound {
            stage: "driver function",
            wanted: "Mt".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("driver function"));
        assert!(msg.contains("Mt"));
    }
}
