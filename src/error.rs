use thiserror::Error;

pub type RecResult<T> = Result<T, RecError>;

/// Operational failures. Degraded outcomes (cold start, empty matrix, nothing above
/// threshold) are not errors and come back as empty lists instead.
#[derive(Error, Debug)]
pub enum RecError {
    #[error("Invalid rating: {0}")]
    InvalidRating(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RecError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            RecError::InvalidRating(_) | RecError::InvalidEvent(_) | RecError::InvalidRequest(_)
        )
    }

    /// PostgreSQL unique violation (23505). Event logging treats these as a skipped insert.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            RecError::Storage(sqlx_err) => sqlx_err
                .as_database_error()
                .and_then(|db_err| db_err.code())
                .map(|code| code == "23505")
                .unwrap_or(false),
            _ => false,
        }
    }
}
