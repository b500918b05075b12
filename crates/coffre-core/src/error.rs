use thiserror::Error;

pub type CoffreResult<T> = Result<T, CoffreError>;

#[derive(Debug, Error)]
pub enum CoffreError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not supported by this variant: {0}")]
    NotSupported(&'static str),

    #[error("invalid package ({context}): {reason}")]
    InvalidPackage { context: &'static str, reason: String },

    #[error("integrity check failed: {0}")]
    IntegrityFailure(&'static str),

    #[error("private key required for {0}")]
    KeyUnavailable(&'static str),

    #[error("key storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoffreError {
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }

    pub fn invalid_package(context: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPackage {
            context,
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage(reason.into())
    }

    pub fn crypto(reason: impl Into<String>) -> Self {
        Self::Crypto(reason.into())
    }
}
