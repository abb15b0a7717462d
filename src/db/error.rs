#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid column identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Unknown station: {0}")]
    UnknownStation(String),
}
