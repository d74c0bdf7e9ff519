use thiserror::Error;

/// Domain-level errors for the model cache.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("Argument `{0}` must not be null")]
    NullArgument(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transfer failed: {0}")]
    TransferFailure(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("Network request blocked: {reason}")]
    NetworkBlocked { reason: String },

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Model provider error: {0}")]
    Provider(String),
}

impl DomainError {
    /// Shorthand for an [`DomainError::InvalidArgument`].
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        DomainError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors caused by the caller's input rather than the environment.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidArgument { .. } | DomainError::NullArgument(_)
        )
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
