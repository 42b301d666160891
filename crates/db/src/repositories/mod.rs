use thiserror::Error;

use navigator_core::archive::ArchiveError;

pub mod conversation;

pub use conversation::SqlConversationArchive;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<RepositoryError> for ArchiveError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Encode(message) => Self::Encode(message),
            other => Self::Storage(other.to_string()),
        }
    }
}
