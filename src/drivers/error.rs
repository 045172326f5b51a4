use thiserror::Error;
#[derive(Debug, Error)]
pub enum SenseError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("audio hardware unavailable: {0}")]
    HardwareUnavailable(String),
    #[error("operation not allowed now: {0}")]
    InvalidState(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
impl SenseError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SenseError::InvalidConfiguration(message.into())
    }
    pub(crate) fn hardware(message: impl Into<String>) -> Self {
        SenseError::HardwareUnavailable(message.into())
    }
}
