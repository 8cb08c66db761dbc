use std::time::Duration;

/// Errors raised while watering orchids.
///
/// Each variant maps to how far a failure reaches: configuration and
/// lookup problems end the run, contract and transaction problems end a
/// single token's iteration, notification problems are only logged.
#[derive(Debug, thiserror::Error)]
pub enum WaterError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Lookup(String),

    #[error("Contract call `{method}` failed: {reason}")]
    ContractCall { method: &'static str, reason: String },

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Watering transaction failed: {0}")]
    Transaction(String),

    #[error("`{operation}` timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl WaterError {
    pub fn contract_call(method: &'static str, reason: impl ToString) -> Self {
        Self::ContractCall {
            method,
            reason: reason.to_string(),
        }
    }

    /// Whether the run can move on to the next token after this error.
    pub fn is_token_scoped(&self) -> bool {
        matches!(
            self,
            Self::ContractCall { .. } | Self::Transaction(_) | Self::Timeout { .. }
        )
    }
}

pub type Result<T, E = WaterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_call_display_names_method() {
        let err = WaterError::contract_call("waterLevel", "execution reverted");
        assert_eq!(
            err.to_string(),
            "Contract call `waterLevel` failed: execution reverted"
        );
    }

    #[test]
    fn timeout_display_reports_seconds() {
        let err = WaterError::Timeout {
            operation: "balanceOf",
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "`balanceOf` timed out after 30s");
    }

    #[test]
    fn only_per_token_failures_are_token_scoped() {
        assert!(WaterError::contract_call("alive", "boom").is_token_scoped());
        assert!(WaterError::Transaction("reverted".into()).is_token_scoped());
        assert!(!WaterError::Configuration("DISCORD_BOT_TOKEN not set".into()).is_token_scoped());
        assert!(!WaterError::Lookup("missing".into()).is_token_scoped());
        assert!(!WaterError::Notification("503".into()).is_token_scoped());
    }
}
