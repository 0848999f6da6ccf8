use thiserror::Error;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum StraddleError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Gateway errors
    #[error("Gateway call failed: {0}")]
    Gateway(String),

    #[error("No trading gateway bound for user: {0}")]
    GatewayUnbound(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // State machine errors
    #[error("Invalid phase transition: from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Unexpected phase: {0}")]
    UnexpectedPhase(String),

    // Parameter errors
    #[error("Unknown parameter: {scope}.{name}")]
    UnknownParameter { scope: String, name: String },

    #[error("Parameter type mismatch for {name}: expected {expected}, got {got}")]
    ParameterType {
        name: String,
        expected: String,
        got: String,
    },

    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    // Registry errors
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for StraddleError
pub type Result<T> = std::result::Result<T, StraddleError>;
