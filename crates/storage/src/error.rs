use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Raised only where silently doing nothing would look like success,
    /// i.e. migrations. Ordinary reads and writes treat a missing visitor ID
    /// as a miss / no-op.
    #[error("{operation} requires a resolved visitor ID")]
    MissingVisitorId { operation: &'static str },

    #[error("Entry name `{0}` is reserved for storage metadata")]
    ReservedName(String),

    #[error("Invalid table name `{0}`: use letters, digits and underscores")]
    InvalidTableName(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
