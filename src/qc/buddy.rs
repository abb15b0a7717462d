//! Spatial consistency: isolation and buddy check.
//!
//! All stations reporting a parameter in one time slot are checked together.
//! Each round works on a pool of usable neighbours; stations that were
//! isolated or failed the buddy check in one round are left out of the pool
//! for the next. Rounds repeat until the verdicts stop changing or the
//! configured iteration count is used up, and the last round wins.

use serde::{Deserialize, Serialize};

use super::models::{Position, SpatialObservation};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuddyParams {
    /// Search radius in metres
    pub radius: f64,
    /// Minimum number of neighbours for a station not to be isolated
    pub num_min: usize,
    /// Tolerated deviation from the neighbour mean, in standard deviations
    pub threshold: f64,
    /// Neighbours further apart in elevation are ignored; `<= 0` disables
    pub max_elev_diff: f64,
    /// Change of the parameter per metre of elevation
    pub elev_gradient: f64,
    /// Floor for the neighbour standard deviation
    pub min_std: f64,
    pub num_iterations: u32,
}

impl BuddyParams {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(format!("buddy radius must be positive, got {}", self.radius));
        }
        if self.num_min == 0 {
            return Err("buddy num_min must be at least 1".to_string());
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(format!("buddy threshold must be positive, got {}", self.threshold));
        }
        if !(self.min_std.is_finite() && self.min_std > 0.0) {
            return Err(format!("buddy min_std must be positive, got {}", self.min_std));
        }
        if !self.elev_gradient.is_finite() || !self.max_elev_diff.is_finite() {
            return Err("buddy elevation settings must be finite".to_string());
        }
        if self.num_iterations == 0 {
            return Err("buddy num_iterations must be at least 1".to_string());
        }
        Ok(())
    }

    fn filters_elevation(&self) -> bool {
        self.max_elev_diff > 0.0
    }
}

/// Outcome for one station. Both fields are `None` when the station had no
/// value to check; `buddy_check` is also `None` for isolated stations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialVerdict {
    pub station_id: String,
    pub isolated: Option<bool>,
    pub buddy_check: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RoundVerdict {
    isolated: bool,
    flagged: bool,
}

/// Great-circle distance in metres
pub fn distance_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Run the isolation and buddy check over one time slot.
///
/// The result is aligned with `observations`.
pub fn buddy_check(observations: &[SpatialObservation], params: &BuddyParams) -> Vec<SpatialVerdict> {
    run_rounds(observations, params).0
}

/// Verdicts of the last round together with the number of rounds run
fn run_rounds(
    observations: &[SpatialObservation],
    params: &BuddyParams,
) -> (Vec<SpatialVerdict>, u32) {
    let values: Vec<Option<f64>> = observations
        .iter()
        .map(|o| o.value.filter(|v| v.is_finite()))
        .collect();
    let candidates = candidate_neighbours(observations, &values, params.radius);

    let mut active: Vec<bool> = values.iter().map(Option::is_some).collect();
    let mut verdicts: Option<Vec<RoundVerdict>> = None;
    let mut rounds = 0;

    for _ in 0..params.num_iterations.max(1) {
        rounds += 1;
        let round: Vec<RoundVerdict> = (0..observations.len())
            .map(|i| match values[i] {
                Some(value) => judge(
                    i,
                    value,
                    observations,
                    &values,
                    &candidates[i],
                    &active,
                    params,
                ),
                None => RoundVerdict::default(),
            })
            .collect();

        let converged = verdicts.as_ref() == Some(&round);
        for (i, verdict) in round.iter().enumerate() {
            active[i] = values[i].is_some() && !verdict.isolated && !verdict.flagged;
        }
        verdicts = Some(round);
        if converged {
            break;
        }
    }

    let verdicts = verdicts.unwrap_or_default();
    let verdicts = observations
        .iter()
        .zip(values.iter())
        .zip(verdicts)
        .map(|((obs, value), verdict)| SpatialVerdict {
            station_id: obs.station_id.clone(),
            isolated: value.map(|_| verdict.isolated),
            buddy_check: value
                .filter(|_| !verdict.isolated)
                .map(|_| verdict.flagged),
        })
        .collect();
    (verdicts, rounds)
}

/// Indices of stations with a value within `radius` of each station
fn candidate_neighbours(
    observations: &[SpatialObservation],
    values: &[Option<f64>],
    radius: f64,
) -> Vec<Vec<usize>> {
    observations
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            observations
                .iter()
                .enumerate()
                .filter(|(j, other)| {
                    *j != i
                        && values[*j].is_some()
                        && distance_m(&obs.position, &other.position) <= radius
                })
                .map(|(j, _)| j)
                .collect()
        })
        .collect()
}

fn judge(
    i: usize,
    value: f64,
    observations: &[SpatialObservation],
    values: &[Option<f64>],
    candidates: &[usize],
    active: &[bool],
    params: &BuddyParams,
) -> RoundVerdict {
    let pool: Vec<usize> = candidates.iter().copied().filter(|&j| active[j]).collect();
    if pool.len() < params.num_min {
        return RoundVerdict {
            isolated: true,
            flagged: false,
        };
    }

    let elevation = observations[i].elevation;
    let corrected: Vec<f64> = pool
        .iter()
        .filter_map(|&j| {
            let neighbour_value = values[j]?;
            let elev_diff = observations[j].elevation - elevation;
            if params.filters_elevation() && elev_diff.abs() > params.max_elev_diff {
                return None;
            }
            Some(neighbour_value - params.elev_gradient * elev_diff)
        })
        .collect();

    // not enough comparable neighbours after the elevation filter
    if corrected.len() < params.num_min {
        return RoundVerdict::default();
    }

    let (mean, std) = mean_std(&corrected);
    let std = std.max(params.min_std);
    RoundVerdict {
        isolated: false,
        flagged: (value - mean).abs() / std > params.threshold,
    }
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
