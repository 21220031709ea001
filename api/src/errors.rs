use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint in the primary store rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl Error {
    pub fn reading_not_found(id: &str) -> Self {
        Error::NotFound(format!("Could not find temperature reading {}", id))
    }

    pub fn device_not_found(id: &str) -> Self {
        Error::NotFound(format!("Device not found with id: {}", id))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
