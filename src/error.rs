use crate::db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum QcError {
    #[error("Fetching {parameter} context for station {station_id} failed: {source}")]
    CollaboratorUnavailable {
        station_id: String,
        parameter: String,
        #[source]
        source: DbError,
    },
    #[error("Fetching {parameter} context for station {station_id} timed out after {timeout_secs}s")]
    Timeout {
        station_id: String,
        parameter: String,
        timeout_secs: u64,
    },
    #[error("Invalid QC configuration: {0}")]
    InvalidConfig(String),
    #[error("Column {parameter} has {found} values but the batch has {expected} timestamps")]
    LengthMismatch {
        parameter: String,
        expected: usize,
        found: usize,
    },
    #[error("QC task failed: {0}")]
    TaskFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QcError {
    pub fn collaborator(station_id: &str, parameter: &str, source: DbError) -> Self {
        QcError::CollaboratorUnavailable {
            station_id: station_id.to_string(),
            parameter: parameter.to_string(),
            source,
        }
    }

    /// Whether the error came from the store rather than from the input
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            QcError::CollaboratorUnavailable { .. } | QcError::Timeout { .. }
        )
    }
}

impl From<tokio::task::JoinError> for QcError {
    fn from(err: tokio::task::JoinError) -> Self {
        QcError::TaskFailed(err.to_string())
    }
}
