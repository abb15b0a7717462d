use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::db::DbError;
use crate::qc::{Measurement, SpatialObservation, Station, StationKind};

// Database row models
#[derive(Debug, Clone, FromRow)]
pub struct StationRow {
    pub station_id: String,
    pub station_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl TryFrom<StationRow> for Station {
    type Error = DbError;

    fn try_from(row: StationRow) -> Result<Self, Self::Error> {
        let kind: StationKind = row
            .station_type
            .parse()
            .map_err(|e: String| DbError::Unavailable(format!("station {}: {e}", row.station_id)))?;
        Ok(Station::new(
            row.station_id,
            kind,
            row.latitude,
            row.longitude,
            row.altitude.unwrap_or(0.0),
        ))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ValueRow {
    pub measured_at: DateTime<Utc>,
    pub value: Option<f64>,
}

impl From<ValueRow> for Measurement {
    fn from(row: ValueRow) -> Self {
        Measurement::from_option(row.measured_at, row.value)
    }
}

/// A reading joined with its station's metadata
#[derive(Debug, Clone, FromRow)]
pub struct ObservationRow {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub measured_at: DateTime<Utc>,
    pub value: Option<f64>,
}

impl From<ObservationRow> for SpatialObservation {
    fn from(row: ObservationRow) -> Self {
        SpatialObservation {
            station_id: row.station_id,
            position: crate::qc::Position {
                latitude: row.latitude,
                longitude: row.longitude,
            },
            elevation: row.altitude.unwrap_or(0.0),
            measured_at: row.measured_at,
            value: row.value.filter(|v| !v.is_nan()),
        }
    }
}
