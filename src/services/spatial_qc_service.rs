use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::QcError;
use crate::providers::NeighborProvider;
use crate::qc::{
    aggregate_row, buddy_check, BuddyParams, QcRegistry, SpatialObservation, SpatialRow, Station,
    Timestamp,
};
use crate::services::guarded_fetch;
use crate::utils::{round_to_grid, spatial_cutoff};

/// Station id reported when a fetch across all stations fails
const ALL_STATIONS: &str = "*";

/// Runs the isolation and buddy check across stations, one time slot at a time
#[derive(Clone)]
pub struct SpatialQcService {
    neighbors: Arc<dyn NeighborProvider>,
    registry: Arc<QcRegistry>,
    fetch_timeout: Duration,
    concurrency: usize,
    grid: TimeDelta,
}

impl SpatialQcService {
    pub fn new(neighbors: Arc<dyn NeighborProvider>, registry: Arc<QcRegistry>) -> Self {
        Self {
            neighbors,
            registry,
            fetch_timeout: Duration::from_secs(30),
            concurrency: 4,
            grid: TimeDelta::minutes(5),
        }
    }

    pub fn from_config(
        neighbors: Arc<dyn NeighborProvider>,
        registry: Arc<QcRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(neighbors, registry)
            .with_fetch_timeout(config.fetch_timeout)
            .with_concurrency(config.spatial_concurrency)
            .with_grid(config.grid)
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_grid(mut self, grid: TimeDelta) -> Self {
        self.grid = grid;
        self
    }

    pub fn grid(&self) -> TimeDelta {
        self.grid
    }

    /// Check every grid slot with readings in `start <= measured_at < end`.
    ///
    /// Rows are ordered by slot, then by station id. A parameter without a
    /// spatial check configured yields no rows.
    #[instrument(skip(self))]
    pub async fn run_range(
        &self,
        parameter: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SpatialRow>, QcError> {
        let Some(params) = self.registry.buddy_params(parameter).copied() else {
            debug!("No spatial check configured, skipping");
            return Ok(Vec::new());
        };

        let observations = guarded_fetch(
            ALL_STATIONS,
            parameter,
            self.fetch_timeout,
            self.neighbors.fetch_observations(parameter, start, end),
        )
        .await?;
        let slots = align_to_grid(observations, self.grid);
        debug!("Checking {} time slots", slots.len());

        let per_slot: Vec<Vec<SpatialRow>> = stream::iter(slots.into_values())
            .map(|slot| {
                let parameter = parameter.to_string();
                tokio::task::spawn_blocking(move || run_instant(&parameter, &slot, &params))
            })
            .buffered(self.concurrency)
            .map_err(QcError::from)
            .try_collect()
            .await?;

        let rows: Vec<SpatialRow> = per_slot.into_iter().flatten().collect();
        let flagged = rows.iter().filter(|r| r.qc_flagged).count();
        info!("Checked {} station slots, {} flagged", rows.len(), flagged);
        Ok(rows)
    }

    /// Like [`run_range`](Self::run_range), but leaves out the newest grid
    /// slot before `latest` since neighbours may still be reporting into it
    pub async fn run_until(
        &self,
        parameter: &str,
        start: Timestamp,
        latest: Timestamp,
    ) -> Result<Vec<SpatialRow>, QcError> {
        let cutoff = spatial_cutoff(latest, self.grid);
        self.run_range(parameter, start, cutoff).await
    }

    /// Check a single station at one instant against the stations around it.
    ///
    /// Stations up to twice the radius away are loaded so the neighbours'
    /// own neighbours take part in the iterative exclusion.
    #[instrument(skip(self, station), fields(station_id = %station.station_id))]
    pub async fn check_station(
        &self,
        station: &Station,
        parameter: &str,
        at: Timestamp,
    ) -> Result<Option<SpatialRow>, QcError> {
        let Some(params) = self.registry.buddy_params(parameter).copied() else {
            debug!("No spatial check configured, skipping");
            return Ok(None);
        };

        let at = round_to_grid(at, self.grid);
        let mut neighbors = guarded_fetch(
            &station.station_id,
            parameter,
            self.fetch_timeout,
            self.neighbors
                .fetch_neighbors(&station.position, params.radius * 2.0, at, parameter),
        )
        .await?;
        if !neighbors.iter().any(|n| n.station_id == station.station_id) {
            neighbors.push(SpatialObservation::for_station(station, at, None));
        }

        let row = run_instant(parameter, &neighbors, &params)
            .into_iter()
            .find(|row| row.station_id == station.station_id);
        Ok(row)
    }
}

/// Move observations onto the grid, keeping the last reading of each
/// station per slot
pub fn align_to_grid(
    mut observations: Vec<SpatialObservation>,
    grid: TimeDelta,
) -> BTreeMap<Timestamp, Vec<SpatialObservation>> {
    observations.sort_by_key(|o| o.measured_at);

    let mut slots: BTreeMap<Timestamp, BTreeMap<String, SpatialObservation>> = BTreeMap::new();
    for mut observation in observations {
        let slot = round_to_grid(observation.measured_at, grid);
        observation.measured_at = slot;
        slots
            .entry(slot)
            .or_default()
            .insert(observation.station_id.clone(), observation);
    }

    slots
        .into_iter()
        .map(|(slot, stations)| (slot, stations.into_values().collect()))
        .collect()
}

/// Isolation and buddy check for one slot, with the per-row aggregate
pub fn run_instant(
    parameter: &str,
    observations: &[SpatialObservation],
    params: &BuddyParams,
) -> Vec<SpatialRow> {
    buddy_check(observations, params)
        .into_iter()
        .zip(observations)
        .map(|(verdict, observation)| {
            let outcome = aggregate_row([verdict.isolated, verdict.buddy_check]);
            SpatialRow {
                measured_at: observation.measured_at,
                station_id: verdict.station_id,
                parameter: parameter.to_string(),
                isolated: verdict.isolated,
                buddy_check: verdict.buddy_check,
                qc_flagged: outcome.qc_flagged,
                qc_score: outcome.qc_score,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qc::StationKind;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32, s: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 7, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_align_to_grid_keeps_last_reading_per_slot() {
        let station = Station::new("DOC1", StationKind::Biomet, 51.5, 7.4, 100.0);
        let other = Station::new("DOC2", StationKind::Biomet, 51.51, 7.4, 100.0);
        let observations = vec![
            SpatialObservation::for_station(&station, at(12, 1, 0), Some(2.0)),
            SpatialObservation::for_station(&station, at(11, 59, 0), Some(1.0)),
            SpatialObservation::for_station(&other, at(12, 3, 0), Some(5.0)),
        ];

        let slots = align_to_grid(observations, TimeDelta::minutes(5));
        assert_eq!(slots.len(), 2);

        let noon = &slots[&at(12, 0, 0)];
        assert_eq!(noon.len(), 1);
        assert_eq!(noon[0].value, Some(2.0));
        assert_eq!(noon[0].measured_at, at(12, 0, 0));
        assert_eq!(slots[&at(12, 5, 0)][0].station_id, "DOC2");
    }

    #[test]
    fn test_run_instant_isolated_rows_are_flagged() {
        let params = BuddyParams {
            radius: 5500.0,
            num_min: 3,
            threshold: 2.7,
            max_elev_diff: 100.0,
            elev_gradient: -0.0065,
            min_std: 2.0,
            num_iterations: 5,
        };
        let lonely = Station::new("DOC1", StationKind::Biomet, 51.5, 7.4, 100.0);
        let rows = run_instant(
            "air_temperature",
            &[SpatialObservation::for_station(&lonely, at(12, 0, 0), Some(20.0))],
            &params,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].isolated, Some(true));
        assert_eq!(rows[0].buddy_check, None);
        assert!(rows[0].qc_flagged);
        assert_eq!(rows[0].qc_score, Some(0.0));
    }
}
