use thiserror::Error;
use uuid::Uuid;

use crate::models::UploadStatus;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error, including constraint violations.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The requested parent folder is missing, deleted, or owned by someone else.
    #[error("Invalid parent folder: {0}")]
    InvalidParent(Uuid),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Following parent references revisited a folder.
    #[error("Folder tree cycle detected at {0}")]
    CycleDetected(Uuid),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Upload cannot move from {from} to {to}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },

    #[error("Chunk {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
