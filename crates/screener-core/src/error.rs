use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScreenerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Storage constraint violated: {0}")]
    Constraint(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Source timeout: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Gate blocked: {0}")]
    GateBlocked(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ScreenerError {
    /// Whether the error is worth another attempt at the adapter level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScreenerError::Source(_) | ScreenerError::Timeout(_))
    }
}
