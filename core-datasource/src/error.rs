use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Backend rejected request (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),
}

impl DataSourceError {
    /// No response was obtained (unreachable host, timeout, broken connection).
    pub fn is_transport(&self) -> bool {
        matches!(self, DataSourceError::Transport(_))
    }

    /// The backend answered with a non-success status.
    pub fn is_backend_rejection(&self) -> bool {
        matches!(
            self,
            DataSourceError::Backend { .. }
                | DataSourceError::Unauthorized(_)
                | DataSourceError::NotFound(_)
        )
    }
}

impl From<BridgeError> for DataSourceError {
    fn from(error: BridgeError) -> Self {
        DataSourceError::Transport(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataSourceError>;
