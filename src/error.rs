use thiserror::Error;

/// Failures talking to an exchange
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Transport level failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status after retries
    #[error("exchange returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The exchange answered with an error message
    #[error("exchange error: {0}")]
    Exchange(String),

    /// Payload did not have the expected shape
    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Private endpoint called without API key/secret
    #[error("missing API credentials")]
    MissingCredentials,

    /// Order has no exchange id (never submitted)
    #[error("order has no exchange id")]
    MissingOrderId,

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Replayed market data ran out
    #[error("market data exhausted")]
    Exhausted,
}

/// Errors raised by the order ledger to its callers
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The slot already holds a confirmed, unsold buy
    #[error("order '{0}' already has an open position")]
    DuplicateOrder(String),

    /// The slot already has an order waiting for confirmation
    #[error("order '{0}' is still pending")]
    PendingOrder(String),

    #[error("order '{0}' not found")]
    NotFound(String),

    #[error("insufficient balance: requested volume {requested:.8}, max {max:.8}")]
    InsufficientBalance { requested: f64, max: f64 },

    #[error("volume {volume:.8} outside pair limits [{min:.8}, {max:.8}]")]
    VolumeOutOfRange { volume: f64, min: f64, max: f64 },

    /// Multi-leg submissions cannot be accounted for
    #[error("OCO orders are not supported ({0} legs returned)")]
    UnsupportedOco(usize),

    /// More history requested than the market cache keeps
    #[error("requested {requested} candles, history limit is {max}")]
    LimitExceeded { requested: usize, max: usize },

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Fatal errors detected before the control loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    /// Live mode without keys; holds the environment variable prefix
    #[error("live trading requires {0}_API_KEY and {0}_API_SECRET")]
    MissingCredentials(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_converts_into_ledger_error() {
        let err: LedgerError = ConnectorError::Exhausted.into();
        assert!(matches!(err, LedgerError::Connector(ConnectorError::Exhausted)));
        assert_eq!(err.to_string(), "market data exhausted");
    }

    #[test]
    fn test_messages_name_the_slot() {
        assert_eq!(
            LedgerError::NotFound("entry".into()).to_string(),
            "order 'entry' not found"
        );
        let err = StartupError::InvalidParam {
            name: "fast".into(),
            reason: "not a number".into(),
        };
        assert_eq!(err.to_string(), "invalid parameter 'fast': not a number");
    }
}
