//! Collaborator seams: where the QC services get context from.
//!
//! `ReadingRepository` implements these against Postgres, `MemoryStore`
//! against in-process data for tests and offline runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::debug;

use crate::db::DbError;
use crate::qc::buddy::distance_m;
use crate::qc::{Measurement, Position, SpatialObservation, Station, Timestamp};

/// Historical values of one station's parameter
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Readings with `start <= measured_at < end`, oldest first. May be empty.
    async fn fetch_history(
        &self,
        station: &Station,
        parameter: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Measurement>, DbError>;

    /// Most recent non-missing reading strictly before `before`
    async fn fetch_latest_before(
        &self,
        station: &Station,
        parameter: &str,
        before: Timestamp,
    ) -> Result<Option<Measurement>, DbError>;
}

/// Values of one parameter across stations
#[async_trait]
pub trait NeighborProvider: Send + Sync {
    /// Every station within `radius` metres of `position` that reports
    /// `parameter`, with its reading in the time slot around `at` (last one
    /// wins, `None` if it has no reading there).
    async fn fetch_neighbors(
        &self,
        position: &Position,
        radius: f64,
        at: Timestamp,
        parameter: &str,
    ) -> Result<Vec<SpatialObservation>, DbError>;

    /// All readings of `parameter` with `start <= measured_at < end`
    async fn fetch_observations(
        &self,
        parameter: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SpatialObservation>, DbError>;
}

/// In-memory store, keyed by station and parameter
#[derive(Debug, Clone)]
pub struct MemoryStore {
    stations: HashMap<String, Station>,
    series: HashMap<(String, String), Vec<Measurement>>,
    slot: TimeDelta,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            stations: HashMap::new(),
            series: HashMap::new(),
            slot: TimeDelta::minutes(5),
        }
    }

    /// Width of the slot `fetch_neighbors` matches readings in
    pub fn with_slot(mut self, slot: TimeDelta) -> Self {
        self.slot = slot;
        self
    }

    pub fn add_station(&mut self, station: Station) {
        self.stations.insert(station.station_id.clone(), station);
    }

    /// Append readings for a station's parameter. The station must have
    /// been added first.
    pub fn add_series(
        &mut self,
        station_id: &str,
        parameter: &str,
        readings: impl IntoIterator<Item = Measurement>,
    ) -> Result<(), DbError> {
        if !self.stations.contains_key(station_id) {
            return Err(DbError::UnknownStation(station_id.to_string()));
        }
        let series = self
            .series
            .entry((station_id.to_string(), parameter.to_string()))
            .or_default();
        series.extend(readings);
        series.sort_by_key(|m| m.measured_at);
        Ok(())
    }

    pub fn station(&self, station_id: &str) -> Option<&Station> {
        self.stations.get(station_id)
    }

    fn readings(&self, station_id: &str, parameter: &str) -> &[Measurement] {
        self.series
            .get(&(station_id.to_string(), parameter.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn stations_reporting<'a>(&'a self, parameter: &'a str) -> impl Iterator<Item = &'a Station> {
        let mut stations: Vec<&Station> = self
            .stations
            .values()
            .filter(move |s| s.kind.reports(parameter))
            .filter(move |s| self.series.contains_key(&(s.station_id.clone(), parameter.to_string())))
            .collect();
        stations.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        stations.into_iter()
    }
}

#[async_trait]
impl HistoryProvider for MemoryStore {
    async fn fetch_history(
        &self,
        station: &Station,
        parameter: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Measurement>, DbError> {
        let history: Vec<Measurement> = self
            .readings(&station.station_id, parameter)
            .iter()
            .filter(|m| m.measured_at >= start && m.measured_at < end)
            .copied()
            .collect();
        debug!(
            station_id = %station.station_id,
            parameter,
            "Found {} history rows",
            history.len()
        );
        Ok(history)
    }

    async fn fetch_latest_before(
        &self,
        station: &Station,
        parameter: &str,
        before: Timestamp,
    ) -> Result<Option<Measurement>, DbError> {
        Ok(self
            .readings(&station.station_id, parameter)
            .iter()
            .filter(|m| m.measured_at < before && m.value.is_some())
            .last()
            .copied())
    }
}

#[async_trait]
impl NeighborProvider for MemoryStore {
    async fn fetch_neighbors(
        &self,
        position: &Position,
        radius: f64,
        at: Timestamp,
        parameter: &str,
    ) -> Result<Vec<SpatialObservation>, DbError> {
        let half = TimeDelta::milliseconds(self.slot.num_milliseconds() / 2);
        let (start, end) = (at - half, at + half);

        let neighbors = self
            .stations_reporting(parameter)
            .filter(|s| distance_m(position, &s.position) <= radius)
            .map(|s| {
                let value = self
                    .readings(&s.station_id, parameter)
                    .iter()
                    .filter(|m| m.measured_at >= start && m.measured_at < end)
                    .last()
                    .and_then(|m| m.value);
                SpatialObservation::for_station(s, at, value)
            })
            .collect();
        Ok(neighbors)
    }

    async fn fetch_observations(
        &self,
        parameter: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SpatialObservation>, DbError> {
        let observations = self
            .stations_reporting(parameter)
            .flat_map(|s| {
                self.readings(&s.station_id, parameter)
                    .iter()
                    .filter(|m| m.measured_at >= start && m.measured_at < end)
                    .map(move |m| SpatialObservation::for_station(s, m.measured_at, m.value))
            })
            .collect();
        Ok(observations)
    }
}
