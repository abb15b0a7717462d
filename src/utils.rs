//! Shared helpers for timestamp grids and SQL identifiers

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("identifier regex is valid"));

/// Whether a parameter name can be used as a bare Postgres column name.
///
/// Parameter names come from the QC registry, which may be loaded from a
/// file, and are interpolated into queries, so only lowercase snake case
/// within the Postgres identifier length limit is accepted.
///
/// # Examples
///
/// ```
/// use station_qc::utils::is_valid_identifier;
///
/// assert!(is_valid_identifier("air_temperature"));
/// assert!(!is_valid_identifier("air_temperature; DROP TABLE station"));
/// assert!(!is_valid_identifier("AirTemperature"));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Round down to a multiple of `grid` since the epoch
pub fn floor_to_grid(ts: DateTime<Utc>, grid: TimeDelta) -> DateTime<Utc> {
    let step = grid.num_milliseconds();
    if step <= 0 {
        return ts;
    }
    let millis = ts.timestamp_millis();
    let floored = millis - millis.rem_euclid(step);
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

/// Round to the nearest multiple of `grid`, halves round up
pub fn round_to_grid(ts: DateTime<Utc>, grid: TimeDelta) -> DateTime<Utc> {
    let half = TimeDelta::milliseconds(grid.num_milliseconds() / 2);
    floor_to_grid(ts + half, grid)
}

/// Latest timestamp the spatial check should consider when running up to
/// `latest`. The newest grid slot is left out since neighbours may still be
/// reporting into it.
pub fn spatial_cutoff(latest: DateTime<Utc>, grid: TimeDelta) -> DateTime<Utc> {
    floor_to_grid(latest, grid) - TimeDelta::milliseconds(grid.num_milliseconds() / 2)
}
