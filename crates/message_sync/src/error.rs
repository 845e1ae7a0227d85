use shared::protocol::PayloadError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport is not connected")]
    TransportUnavailable,
    #[error("persistence request failed: {0}")]
    PersistenceFailure(String),
    #[error("local identity is not resolved yet")]
    IdentityUnresolved,
    #[error("message has neither content nor attachments")]
    EmptyMessage,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<PayloadError> for SyncError {
    fn from(value: PayloadError) -> Self {
        Self::InvalidPayload(value.to_string())
    }
}
