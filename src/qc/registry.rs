//! Configuration registry: parameter name -> ordered list of checks.
//!
//! Plausible value ranges, rates of change and minimum variability windows
//! follow the WMO guide to the global observing system as adapted by the
//! network operators. Spatial settings still need calibration.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::buddy::BuddyParams;
use super::models::CheckName;
use super::persistence::PersistenceParams;
use super::range::RangeParams;
use super::spike_dip::SpikeDipParams;
use crate::error::QcError;
use crate::utils::is_valid_identifier;

static DEFAULT_REGISTRY: LazyLock<QcRegistry> = LazyLock::new(QcRegistry::default);

/// One configured check. Temporal variants run per station, `Buddy` runs
/// across all stations of a time slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckConfig {
    Range(RangeParams),
    Persistence(PersistenceParams),
    SpikeDip(SpikeDipParams),
    Buddy(BuddyParams),
}

impl CheckConfig {
    pub fn name(&self) -> CheckName {
        match self {
            CheckConfig::Range(_) => CheckName::Range,
            CheckConfig::Persistence(_) => CheckName::Persistence,
            CheckConfig::SpikeDip(_) => CheckName::SpikeDip,
            CheckConfig::Buddy(_) => CheckName::Buddy,
        }
    }

    pub fn is_temporal(&self) -> bool {
        !matches!(self, CheckConfig::Buddy(_))
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            CheckConfig::Range(p) => p.validate(),
            CheckConfig::Persistence(p) => p.validate(),
            CheckConfig::SpikeDip(p) => p.validate(),
            CheckConfig::Buddy(p) => p.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChecks {
    pub parameter: String,
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcRegistry {
    pub parameters: Vec<ParameterChecks>,
}

impl QcRegistry {
    /// The built-in registry, shared process-wide
    pub fn global() -> &'static QcRegistry {
        &DEFAULT_REGISTRY
    }

    pub fn from_json_str(json: &str) -> Result<Self, QcError> {
        let registry: QcRegistry = serde_json::from_str(json)?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, QcError> {
        info!("Loading QC registry from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        let registry = Self::from_json_str(&json)?;
        debug!("Loaded checks for {} parameters", registry.parameters.len());
        Ok(registry)
    }

    pub fn to_json_pretty(&self) -> Result<String, QcError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// All configured checks of a parameter, in declaration order
    pub fn checks_for(&self, parameter: &str) -> Option<&[CheckConfig]> {
        self.parameters
            .iter()
            .find(|p| p.parameter == parameter)
            .map(|p| p.checks.as_slice())
    }

    /// Per-station checks of a parameter, in declaration order
    pub fn temporal_checks<'a>(
        &'a self,
        parameter: &str,
    ) -> impl Iterator<Item = &'a CheckConfig> + 'a {
        self.checks_for(parameter)
            .unwrap_or_default()
            .iter()
            .filter(|c| c.is_temporal())
    }

    pub fn buddy_params(&self, parameter: &str) -> Option<&BuddyParams> {
        self.checks_for(parameter)?.iter().find_map(|c| match c {
            CheckConfig::Buddy(p) => Some(p),
            _ => None,
        })
    }

    /// Parameters with a spatial check configured
    pub fn spatial_parameters(&self) -> impl Iterator<Item = (&str, &BuddyParams)> {
        self.parameters.iter().filter_map(|p| {
            p.checks.iter().find_map(|c| match c {
                CheckConfig::Buddy(params) => Some((p.parameter.as_str(), params)),
                _ => None,
            })
        })
    }

    pub fn validate(&self) -> Result<(), QcError> {
        let mut seen = HashSet::new();
        for entry in &self.parameters {
            if !is_valid_identifier(&entry.parameter) {
                return Err(QcError::InvalidConfig(format!(
                    "'{}' is not a valid parameter name",
                    entry.parameter
                )));
            }
            if !seen.insert(entry.parameter.as_str()) {
                return Err(QcError::InvalidConfig(format!(
                    "parameter '{}' is configured more than once",
                    entry.parameter
                )));
            }

            let mut checks = HashSet::new();
            for check in &entry.checks {
                if !checks.insert(check.name()) {
                    return Err(QcError::InvalidConfig(format!(
                        "{} is configured more than once for '{}'",
                        check.name().as_str(),
                        entry.parameter
                    )));
                }
                check.validate().map_err(|reason| {
                    QcError::InvalidConfig(format!("{}: {reason}", entry.parameter))
                })?;
            }
        }
        Ok(())
    }
}

fn range(lower: f64, upper: f64) -> CheckConfig {
    CheckConfig::Range(RangeParams::new(lower, upper))
}

fn persistence(hours: i64, excludes: &[f64]) -> CheckConfig {
    CheckConfig::Persistence(PersistenceParams::new(TimeDelta::hours(hours)).with_excludes(excludes))
}

fn spike_dip(delta: f64) -> CheckConfig {
    CheckConfig::SpikeDip(SpikeDipParams::new(delta))
}

fn entry(parameter: &str, checks: Vec<CheckConfig>) -> ParameterChecks {
    ParameterChecks {
        parameter: parameter.to_string(),
        checks,
    }
}

impl Default for QcRegistry {
    fn default() -> Self {
        let parameters = vec![
            entry(
                "air_temperature",
                vec![
                    range(-40.0, 50.0),
                    persistence(3, &[]),
                    spike_dip(0.3),
                    CheckConfig::Buddy(BuddyParams {
                        radius: 5500.0,
                        num_min: 3,
                        threshold: 2.7,
                        max_elev_diff: 100.0,
                        elev_gradient: -0.0065,
                        min_std: 2.0,
                        num_iterations: 5,
                    }),
                ],
            ),
            entry(
                "relative_humidity",
                vec![
                    range(10.0, 100.0),
                    spike_dip(4.0),
                    persistence(5, &[]),
                    CheckConfig::Buddy(BuddyParams {
                        radius: 6000.0,
                        num_min: 3,
                        threshold: 7.0,
                        // humidity is not compared by elevation
                        max_elev_diff: -1.0,
                        elev_gradient: 0.0,
                        min_std: 3.0,
                        num_iterations: 5,
                    }),
                ],
            ),
            entry(
                "atmospheric_pressure",
                vec![
                    range(860.0, 1055.0),
                    persistence(6, &[]),
                    spike_dip(0.3),
                    CheckConfig::Buddy(BuddyParams {
                        radius: 10000.0,
                        num_min: 3,
                        threshold: 3.0,
                        max_elev_diff: 100.0,
                        // hPa per metre near sea level
                        elev_gradient: 0.125,
                        min_std: 1.5,
                        num_iterations: 5,
                    }),
                ],
            ),
            entry(
                "wind_speed",
                vec![range(0.0, 30.0), persistence(5, &[]), spike_dip(20.0)],
            ),
            entry(
                "u_wind",
                vec![range(-30.0, 30.0), persistence(5, &[]), spike_dip(20.0)],
            ),
            entry(
                "v_wind",
                vec![range(-30.0, 30.0), persistence(5, &[]), spike_dip(20.0)],
            ),
            entry(
                "maximum_wind_speed",
                vec![range(0.0, 30.0), persistence(1, &[])],
            ),
            entry(
                "wind_direction",
                vec![range(0.0, 360.0), persistence(1, &[0.0, 360.0])],
            ),
            entry(
                "precipitation_sum",
                vec![range(0.0, 50.0), persistence(2, &[0.0]), spike_dip(20.0)],
            ),
            // low readings at night are expected to persist
            entry(
                "solar_radiation",
                vec![
                    range(0.0, 1400.0),
                    persistence(3, &[0.0, 1.0, 2.0]),
                    spike_dip(800.0),
                ],
            ),
            entry(
                "lightning_average_distance",
                vec![range(0.0, 40.0), persistence(1, &[0.0])],
            ),
            entry(
                "lightning_strike_count",
                vec![range(0.0, 65535.0), persistence(1, &[0.0])],
            ),
            entry(
                "x_orientation_angle",
                vec![range(-3.0, 3.0), spike_dip(1.0)],
            ),
            entry(
                "y_orientation_angle",
                vec![range(-3.0, 3.0), spike_dip(1.0)],
            ),
            entry(
                "black_globe_temperature",
                vec![range(-40.0, 90.0), persistence(3, &[]), spike_dip(40.0)],
            ),
        ];
        Self { parameters }
    }
}
