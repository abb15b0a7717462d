//! Spike/dip (plausible rate of change) check.
//!
//! The change from the previous non-missing reading is normalised by the
//! elapsed minutes. Jumps flag only their first row; a single-sample spike
//! flags the spike and, when the drop back is steep enough, the row after it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{Measurement, Timestamp};
use super::window::{earliest, merge_with_history, trim_to_batch, MergedPoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeDipParams {
    /// Maximum tolerated change per minute
    pub delta: f64,
}

impl SpikeDipParams {
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.delta.is_finite() || self.delta <= 0.0 {
            return Err(format!("spike/dip delta must be positive, got {}", self.delta));
        }
        Ok(())
    }
}

/// Timestamp before which the single predecessor reading must be fetched
pub fn lookback(batch: &[Measurement]) -> Option<Timestamp> {
    earliest(batch)
}

/// Evaluate a batch, optionally seeded with the last reading before it
pub fn evaluate(
    batch: &[Measurement],
    previous: Option<&Measurement>,
    params: &SpikeDipParams,
) -> Vec<Option<bool>> {
    let history: Vec<Measurement> = previous.copied().into_iter().collect();
    let merged = merge_with_history(&history, batch);
    let flags = flag_rates(&merged, params);
    trim_to_batch(&merged, &flags, batch.len())
}

pub fn flag_rates(points: &[MergedPoint], params: &SpikeDipParams) -> Vec<Option<bool>> {
    let mut last: Option<(Timestamp, f64)> = None;

    points
        .iter()
        .map(|point| {
            let value = point.value?;
            let flagged = match last {
                Some((prev_at, prev_value)) => {
                    exceeds_rate(prev_at, prev_value, point.measured_at, value, params.delta)
                }
                None => false,
            };
            last = Some((point.measured_at, value));
            Some(flagged)
        })
        .collect()
}

/// Rate of change per minute between two readings, `None` when no time
/// has elapsed between them
pub fn rate_per_minute(
    prev_at: Timestamp,
    prev_value: f64,
    at: Timestamp,
    value: f64,
) -> Option<f64> {
    let minutes = (at - prev_at).num_milliseconds() as f64 / 60_000.0;
    if minutes <= 0.0 {
        return None;
    }
    Some((value - prev_value).abs() / minutes)
}

fn exceeds_rate(prev_at: Timestamp, prev_value: f64, at: Timestamp, value: f64, delta: f64) -> bool {
    match rate_per_minute(prev_at, prev_value, at, value) {
        Some(rate) => rate > delta,
        None => {
            debug!(
                measured_at = %at,
                "Skipping spike/dip evaluation for duplicate timestamp"
            );
            false
        }
    }
}
