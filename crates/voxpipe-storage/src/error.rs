use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Invalid status transition for {id}: record is not in the expected state")]
    InvalidTransition { id: String },
}
