use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Hardware layout of a station, which decides the parameters it reports
/// and the table its readings live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationKind {
    /// ATM41 weather sensor plus black globe
    Biomet,
    /// Biomet station with an additional SHT35
    Double,
    /// SHT35 temperature/humidity only
    TempRh,
}

/// Parameters reported by temperature/humidity-only stations
const TEMP_RH_PARAMETERS: &[&str] = &["air_temperature", "relative_humidity"];

impl StationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationKind::Biomet => "biomet",
            StationKind::Double => "double",
            StationKind::TempRh => "temprh",
        }
    }

    /// Whether stations of this kind report the given parameter at all
    pub fn reports(&self, parameter: &str) -> bool {
        match self {
            StationKind::TempRh => TEMP_RH_PARAMETERS.contains(&parameter),
            StationKind::Biomet | StationKind::Double => true,
        }
    }
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "biomet" => Ok(StationKind::Biomet),
            "double" => Ok(StationKind::Double),
            "temprh" => Ok(StationKind::TempRh),
            other => Err(format!("unknown station kind '{other}'")),
        }
    }
}

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub kind: StationKind,
    pub position: Position,
    /// Metres above sea level
    pub elevation: f64,
}

impl Station {
    pub fn new(
        station_id: impl Into<String>,
        kind: StationKind,
        latitude: f64,
        longitude: f64,
        elevation: f64,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            kind,
            position: Position {
                latitude,
                longitude,
            },
            elevation,
        }
    }
}

/// A single reading of one parameter. NaN is normalised to `None` on
/// construction so downstream code only has one notion of "missing".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub measured_at: Timestamp,
    pub value: Option<f64>,
}

impl Measurement {
    pub fn new(measured_at: Timestamp, value: f64) -> Self {
        Self::from_option(measured_at, Some(value))
    }

    pub fn missing(measured_at: Timestamp) -> Self {
        Self {
            measured_at,
            value: None,
        }
    }

    pub fn from_option(measured_at: Timestamp, value: Option<f64>) -> Self {
        Self {
            measured_at,
            value: value.filter(|v| !v.is_nan()),
        }
    }
}

/// Check identifiers, used to build output column names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Range,
    Persistence,
    SpikeDip,
    Isolated,
    Buddy,
}

impl CheckName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::Range => "range_check",
            CheckName::Persistence => "persistence_check",
            CheckName::SpikeDip => "spike_dip_check",
            CheckName::Isolated => "isolated_check",
            CheckName::Buddy => "buddy_check",
        }
    }
}

/// Deterministic result column name, e.g. `air_temperature_qc_range_check`
pub fn column_name(parameter: &str, check: CheckName) -> String {
    format!("{parameter}_qc_{}", check.as_str())
}

/// One numeric column of a station batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl ValueColumn {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One boolean result column; `None` marks rows that were not evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagColumn {
    pub name: String,
    pub values: Vec<Option<bool>>,
}

/// Newly computed values of one station, indexed by timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct StationBatch {
    pub station: Station,
    pub measured_at: Vec<Timestamp>,
    pub columns: Vec<ValueColumn>,
}

impl StationBatch {
    pub fn new(station: Station, measured_at: Vec<Timestamp>) -> Self {
        Self {
            station,
            measured_at,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        self.columns.push(ValueColumn::new(name, values));
        self
    }

    pub fn len(&self) -> usize {
        self.measured_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measured_at.is_empty()
    }

    /// Zip a column with the timestamp index
    pub fn series(&self, column: &ValueColumn) -> Vec<Measurement> {
        self.measured_at
            .iter()
            .zip(column.values.iter())
            .map(|(ts, value)| Measurement::from_option(*ts, *value))
            .collect()
    }
}

/// A station batch augmented with check results and the aggregate outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcFrame {
    pub station_id: String,
    pub measured_at: Vec<Timestamp>,
    pub values: Vec<ValueColumn>,
    pub flags: Vec<FlagColumn>,
    pub qc_flagged: Vec<bool>,
    pub qc_score: Vec<Option<f64>>,
}

impl QcFrame {
    pub fn flag_column(&self, name: &str) -> Option<&FlagColumn> {
        self.flags.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.measured_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measured_at.is_empty()
    }
}

/// One station's value of a parameter at (roughly) one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialObservation {
    pub station_id: String,
    pub position: Position,
    pub elevation: f64,
    pub measured_at: Timestamp,
    pub value: Option<f64>,
}

impl SpatialObservation {
    pub fn for_station(station: &Station, measured_at: Timestamp, value: Option<f64>) -> Self {
        Self {
            station_id: station.station_id.clone(),
            position: station.position,
            elevation: station.elevation,
            measured_at,
            value: value.filter(|v| !v.is_nan()),
        }
    }
}

/// Spatial check outcome for one station in one grid slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialRow {
    pub measured_at: Timestamp,
    pub station_id: String,
    pub parameter: String,
    pub isolated: Option<bool>,
    pub buddy_check: Option<bool>,
    pub qc_flagged: bool,
    pub qc_score: Option<f64>,
}
