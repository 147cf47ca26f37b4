use thiserror::Error;

/// Failure reported by the remote store (or the transport in front of it).
///
/// The model layer treats all of these as opaque: it never retries, it only
/// wraps them into [`ModelError::RemoteCommit`] or [`ModelError::Remote`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Transaction contention: {0}")]
    Contention(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Remote returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not authenticated")]
    Unauthenticated,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failure of the external cache. Never surfaced from persistence operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

impl<T> From<std::sync::PoisonError<T>> for CacheError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Can't delete entity of kind '{0}'; no id or name defined")]
    MissingIdentity(String),

    #[error("Transaction value not set")]
    MissingTransaction,

    #[error("Malformed date '{value}': {reason}")]
    MalformedDate { value: String, reason: String },

    #[error("Unsupported property shape: {0}")]
    UnsupportedPropertyShape(String),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Property '{name}' is missing or not a {expected}")]
    PropertyMismatch { name: String, expected: &'static str },

    #[error("Commit failed: {0}")]
    RemoteCommit(#[source] GatewayError),

    #[error("Remote call failed: {0}")]
    Remote(#[source] GatewayError),
}

impl ModelError {
    /// True when the remote store rejected a transaction because of a
    /// concurrent write. Callers decide whether to rerun the transaction.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::RemoteCommit(GatewayError::Contention(_)) | Self::Remote(GatewayError::Contention(_))
        )
    }

    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::RemoteCommit(err) | Self::Remote(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
