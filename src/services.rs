pub mod spatial_qc_service;
pub mod station_qc_service;

pub use spatial_qc_service::SpatialQcService;
pub use station_qc_service::StationQcService;

use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::db::DbError;
use crate::error::QcError;

/// Await a collaborator fetch, turning failures and timeouts into errors
/// that name the station and parameter
pub(crate) async fn guarded_fetch<T, F>(
    station_id: &str,
    parameter: &str,
    timeout: Duration,
    fetch: F,
) -> Result<T, QcError>
where
    F: Future<Output = Result<T, DbError>>,
{
    match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(station_id, parameter, error = %e, "Collaborator fetch failed");
            Err(QcError::collaborator(station_id, parameter, e))
        }
        Err(_) => {
            error!(
                station_id,
                parameter,
                timeout_secs = timeout.as_secs(),
                "Collaborator fetch timed out"
            );
            Err(QcError::Timeout {
                station_id: station_id.to_string(),
                parameter: parameter.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}
