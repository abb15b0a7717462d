use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::QcError;
use crate::providers::HistoryProvider;
use crate::qc::range::range_check;
use crate::qc::{
    aggregate_columns, column_name, persistence, spike_dip, CheckConfig, FlagColumn, Measurement,
    QcFrame, QcRegistry, Station, StationBatch, Timestamp, ValueColumn,
};
use crate::services::guarded_fetch;

/// Runs the configured temporal checks over a station batch
#[derive(Clone)]
pub struct StationQcService {
    history: Arc<dyn HistoryProvider>,
    registry: Arc<QcRegistry>,
    fetch_timeout: Duration,
    parameter_concurrency: usize,
}

impl StationQcService {
    pub fn new(history: Arc<dyn HistoryProvider>, registry: Arc<QcRegistry>) -> Self {
        Self {
            history,
            registry,
            fetch_timeout: Duration::from_secs(30),
            parameter_concurrency: 8,
        }
    }

    pub fn from_config(
        history: Arc<dyn HistoryProvider>,
        registry: Arc<QcRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(history, registry)
            .with_fetch_timeout(config.fetch_timeout)
            .with_parameter_concurrency(config.parameter_concurrency)
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_parameter_concurrency(mut self, concurrency: usize) -> Self {
        self.parameter_concurrency = concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &QcRegistry {
        &self.registry
    }

    /// Apply every configured check to every column of the batch.
    ///
    /// Flag columns come out grouped by parameter in the batch's column
    /// order, checks in registry order. A failed or timed out history fetch
    /// fails the whole batch.
    #[instrument(skip(self, batch), fields(station_id = %batch.station.station_id, rows = batch.len()))]
    pub async fn apply_qc(&self, batch: &StationBatch) -> Result<QcFrame, QcError> {
        for column in &batch.columns {
            if column.values.len() != batch.len() {
                return Err(QcError::LengthMismatch {
                    parameter: column.name.clone(),
                    expected: batch.len(),
                    found: column.values.len(),
                });
            }
        }

        let per_parameter: Vec<Vec<FlagColumn>> = stream::iter(batch.columns.iter())
            .map(|column| self.check_parameter(batch, column))
            .buffered(self.parameter_concurrency)
            .try_collect()
            .await?;
        let flags: Vec<FlagColumn> = per_parameter.into_iter().flatten().collect();

        let (qc_flagged, qc_score) = aggregate_columns(&flags, batch.len());
        let flagged_rows = qc_flagged.iter().filter(|f| **f).count();
        info!(
            "Applied {} checks, {} of {} rows flagged",
            flags.len(),
            flagged_rows,
            batch.len()
        );

        Ok(QcFrame {
            station_id: batch.station.station_id.clone(),
            measured_at: batch.measured_at.clone(),
            values: batch.columns.clone(),
            flags,
            qc_flagged,
            qc_score,
        })
    }

    #[instrument(skip(self, batch, column), fields(parameter = %column.name))]
    async fn check_parameter(
        &self,
        batch: &StationBatch,
        column: &ValueColumn,
    ) -> Result<Vec<FlagColumn>, QcError> {
        let parameter = column.name.as_str();
        if self.registry.checks_for(parameter).is_none() {
            debug!("No checks configured, passing through");
            return Ok(Vec::new());
        }

        let series = batch.series(column);
        let mut flags = Vec::new();
        for check in self.registry.temporal_checks(parameter) {
            let values = match check {
                CheckConfig::Range(params) => range_check(&column.values, params),
                CheckConfig::Persistence(params) => {
                    let history = match persistence::lookback(&series, params) {
                        Some((start, end)) => {
                            self.fetch_history(&batch.station, parameter, start, end)
                                .await?
                        }
                        None => Vec::new(),
                    };
                    persistence::evaluate(&series, &history, params)
                }
                CheckConfig::SpikeDip(params) => {
                    let previous = match spike_dip::lookback(&series) {
                        Some(before) => {
                            self.fetch_latest_before(&batch.station, parameter, before)
                                .await?
                        }
                        None => None,
                    };
                    spike_dip::evaluate(&series, previous.as_ref(), params)
                }
                // runs across stations, see SpatialQcService
                CheckConfig::Buddy(_) => continue,
            };

            let flagged = values.iter().filter(|v| **v == Some(true)).count();
            debug!("{}: {} rows flagged", check.name().as_str(), flagged);
            flags.push(FlagColumn {
                name: column_name(parameter, check.name()),
                values,
            });
        }
        Ok(flags)
    }

    async fn fetch_history(
        &self,
        station: &Station,
        parameter: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Measurement>, QcError> {
        guarded_fetch(
            &station.station_id,
            parameter,
            self.fetch_timeout,
            self.history.fetch_history(station, parameter, start, end),
        )
        .await
    }

    async fn fetch_latest_before(
        &self,
        station: &Station,
        parameter: &str,
        before: Timestamp,
    ) -> Result<Option<Measurement>, QcError> {
        guarded_fetch(
            &station.station_id,
            parameter,
            self.fetch_timeout,
            self.history.fetch_latest_before(station, parameter, before),
        )
        .await
    }
}
