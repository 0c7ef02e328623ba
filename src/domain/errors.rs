use thiserror::Error;

/// Errors surfaced by the signal lifecycle engine.
///
/// `ContextMissing` is the only variant that is a programming error rather
/// than an expected business outcome; every other variant maps to a
/// `tick()` result of `idle` plus an `error` (or `risk`) bus emission, per
/// the engine's error handling policy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no ExecutionContext installed for this task")]
    ContextMissing,

    #[error("invalid signal: {reason}")]
    InvalidSignal { reason: String },

    #[error("risk rejected: {reason}")]
    RiskRejected { reason: String },

    #[error("no data for {symbol} ({interval}): {reason}")]
    NoData {
        symbol: String,
        interval: String,
        reason: String,
    },

    #[error("persistence failure for {symbol}/{strategy_name}: {reason}")]
    PersistenceFailure {
        symbol: String,
        strategy_name: String,
        reason: String,
    },

    #[error("user callback failed: {reason}")]
    UserCallbackFailure { reason: String },

    #[error("duplicate registration: {name}")]
    DuplicateRegistration { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_signal_formatting() {
        let err = EngineError::InvalidSignal {
            reason: "take-profit below entry".to_string(),
        };
        assert!(err.to_string().contains("take-profit below entry"));
    }

    #[test]
    fn test_persistence_failure_formatting() {
        let err = EngineError::PersistenceFailure {
            symbol: "BTCUSDT".to_string(),
            strategy_name: "dual_sma".to_string(),
            reason: "disk full".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("BTCUSDT"));
        assert!(msg.contains("dual_sma"));
    }
}
