use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};

use crate::db::{DbError, ObservationRow, StationRepository, ValueRow};
use crate::providers::{HistoryProvider, NeighborProvider};
use crate::qc::buddy::distance_m;
use crate::qc::{Measurement, Position, SpatialObservation, Station, StationBatch, StationKind};
use crate::utils::is_valid_identifier;

/// Table holding the readings of a station kind
pub fn table_for(kind: StationKind) -> &'static str {
    match kind {
        StationKind::Biomet | StationKind::Double => "biomet_data",
        StationKind::TempRh => "temp_rh_data",
    }
}

/// Tables that may hold readings of `parameter`
fn tables_reporting(parameter: &str) -> Vec<&'static str> {
    let mut tables = Vec::new();
    for kind in [StationKind::Biomet, StationKind::TempRh] {
        if kind.reports(parameter) {
            tables.push(table_for(kind));
        }
    }
    tables
}

fn column(parameter: &str) -> Result<&str, DbError> {
    if is_valid_identifier(parameter) {
        Ok(parameter)
    } else {
        Err(DbError::InvalidIdentifier(parameter.to_string()))
    }
}

/// Read-only access to station readings
#[derive(Clone)]
pub struct ReadingRepository {
    pool: PgPool,
    stations: StationRepository,
    slot: TimeDelta,
}

impl ReadingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            stations: StationRepository::new(pool.clone()),
            pool,
            slot: TimeDelta::minutes(5),
        }
    }

    /// Width of the time slot neighbour readings are matched in
    pub fn with_slot(mut self, slot: TimeDelta) -> Self {
        self.slot = slot;
        self
    }

    /// Load a station's readings of `parameters` with `start <= measured_at < end`
    /// as a batch ready for temporal QC
    #[instrument(skip(self, station, parameters), fields(station_id = %station.station_id))]
    pub async fn find_batch(
        &self,
        station: &Station,
        parameters: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<StationBatch, DbError> {
        let parameters: Vec<&str> = parameters
            .iter()
            .copied()
            .filter(|p| station.kind.reports(p))
            .collect();
        let mut select = String::from("measured_at");
        for parameter in &parameters {
            let col = column(parameter)?;
            select.push_str(&format!(", {col}::double precision AS {col}"));
        }
        let sql = format!(
            "SELECT {select} FROM {} \
             WHERE station_id = $1 AND measured_at >= $2 AND measured_at < $3 \
             ORDER BY measured_at",
            table_for(station.kind)
        );

        let rows = sqlx::query(&sql)
            .bind(&station.station_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load station batch");
                e
            })?;

        let measured_at = rows
            .iter()
            .map(|row| row.try_get::<DateTime<Utc>, _>("measured_at"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut batch = StationBatch::new(station.clone(), measured_at);
        for parameter in parameters {
            let values = rows
                .iter()
                .map(|row| row.try_get::<Option<f64>, _>(parameter))
                .collect::<Result<Vec<_>, _>>()?;
            batch = batch.with_column(parameter, values);
        }

        info!(
            "Loaded {} rows with {} parameters",
            batch.len(),
            batch.columns.len()
        );
        Ok(batch)
    }
}

#[async_trait]
impl HistoryProvider for ReadingRepository {
    #[instrument(skip(self, station), fields(station_id = %station.station_id))]
    async fn fetch_history(
        &self,
        station: &Station,
        parameter: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, DbError> {
        let col = column(parameter)?;
        let sql = format!(
            "SELECT measured_at, {col}::double precision AS value FROM {} \
             WHERE station_id = $1 AND measured_at >= $2 AND measured_at < $3 \
             ORDER BY measured_at",
            table_for(station.kind)
        );
        let rows = sqlx::query_as::<_, ValueRow>(&sql)
            .bind(&station.station_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        debug!("Found {} history rows", rows.len());
        Ok(rows.into_iter().map(Measurement::from).collect())
    }

    #[instrument(skip(self, station), fields(station_id = %station.station_id))]
    async fn fetch_latest_before(
        &self,
        station: &Station,
        parameter: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<Measurement>, DbError> {
        let col = column(parameter)?;
        let sql = format!(
            "SELECT measured_at, {col}::double precision AS value FROM {} \
             WHERE station_id = $1 AND measured_at < $2 AND {col} IS NOT NULL \
             ORDER BY measured_at DESC LIMIT 1",
            table_for(station.kind)
        );
        let row = sqlx::query_as::<_, ValueRow>(&sql)
            .bind(&station.station_id)
            .bind(before)
            .fetch_optional(&self.pool)
            .await?;

        if row.is_none() {
            debug!("No reading before {}", before);
        }
        Ok(row.map(Measurement::from))
    }
}

#[async_trait]
impl NeighborProvider for ReadingRepository {
    #[instrument(skip(self, position))]
    async fn fetch_neighbors(
        &self,
        position: &Position,
        radius: f64,
        at: DateTime<Utc>,
        parameter: &str,
    ) -> Result<Vec<SpatialObservation>, DbError> {
        let col = column(parameter)?;
        let half = TimeDelta::milliseconds(self.slot.num_milliseconds() / 2);

        let nearby: Vec<Station> = self
            .stations
            .find_all()
            .await?
            .into_iter()
            .filter(|s| s.kind.reports(parameter))
            .filter(|s| distance_m(position, &s.position) <= radius)
            .collect();
        if nearby.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = nearby.iter().map(|s| s.station_id.clone()).collect();
        let mut latest: Vec<(String, Option<f64>)> = Vec::new();
        for table in tables_reporting(parameter) {
            let sql = format!(
                "SELECT DISTINCT ON (station_id) station_id, {col}::double precision AS value \
                 FROM {table} \
                 WHERE station_id = ANY($1) AND measured_at >= $2 AND measured_at < $3 \
                 ORDER BY station_id, measured_at DESC"
            );
            let rows = sqlx::query(&sql)
                .bind(&ids)
                .bind(at - half)
                .bind(at + half)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                latest.push((row.try_get("station_id")?, row.try_get("value")?));
            }
        }

        let neighbors: Vec<SpatialObservation> = nearby
            .iter()
            .map(|s| {
                let value = latest
                    .iter()
                    .find(|(id, _)| *id == s.station_id)
                    .and_then(|(_, v)| *v);
                SpatialObservation::for_station(s, at, value)
            })
            .collect();
        debug!("Found {} neighbours", neighbors.len());
        Ok(neighbors)
    }

    #[instrument(skip(self))]
    async fn fetch_observations(
        &self,
        parameter: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SpatialObservation>, DbError> {
        let col = column(parameter)?;
        let mut observations = Vec::new();

        for table in tables_reporting(parameter) {
            let sql = format!(
                "SELECT d.station_id, \
                        s.latitude::double precision AS latitude, \
                        s.longitude::double precision AS longitude, \
                        s.altitude::double precision AS altitude, \
                        d.measured_at, d.{col}::double precision AS value \
                 FROM {table} d JOIN station s ON s.station_id = d.station_id \
                 WHERE d.measured_at >= $1 AND d.measured_at < $2 \
                 ORDER BY d.measured_at, d.station_id"
            );
            let rows = sqlx::query_as::<_, ObservationRow>(&sql)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?;
            debug!("Found {} observations in {}", rows.len(), table);
            observations.extend(rows.into_iter().map(SpatialObservation::from));
        }

        observations.sort_by_key(|o| o.measured_at);
        Ok(observations)
    }
}
