//! Persistence (minimum required variability) check.
//!
//! A value is flagged once it has been repeated, uninterrupted, for at least
//! the configured window. Runs are measured from the first row of the run to
//! the row being judged, so the first row of a run is only flagged when the
//! window itself is zero-length (which validation forbids).
//!
//! History is only requested one window back. A run that began before that
//! horizon therefore appears to start at the first fetched row, and its first
//! in-batch row can stay unflagged while the rows after it are flagged.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::models::{Measurement, Timestamp};
use super::window::{lookback_range, merge_with_history, trim_to_batch, MergedPoint};

/// Longest accepted window, one leap year
pub const MAX_WINDOW_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceParams {
    /// Minimum run duration that gets flagged, in whole minutes
    pub window_minutes: i64,
    /// Values that may legitimately persist (e.g. 0 mm precipitation)
    #[serde(default)]
    pub excludes: Vec<f64>,
}

impl PersistenceParams {
    /// Windows are whole minutes, any seconds in `window` are truncated.
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window_minutes: window.num_minutes(),
            excludes: Vec::new(),
        }
    }

    pub fn with_excludes(mut self, excludes: &[f64]) -> Self {
        self.excludes = excludes.to_vec();
        self
    }

    /// Saturates for windows past what `TimeDelta` can hold, which
    /// validation rejects anyway
    pub fn window(&self) -> TimeDelta {
        TimeDelta::try_minutes(self.window_minutes).unwrap_or(TimeDelta::MAX)
    }

    pub fn is_excluded(&self, value: f64) -> bool {
        self.excludes.iter().any(|e| *e == value)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_minutes <= 0 {
            return Err(format!(
                "persistence window must be positive, got {} minutes",
                self.window_minutes
            ));
        }
        if self.window_minutes > MAX_WINDOW_MINUTES {
            return Err(format!(
                "persistence window must be at most {MAX_WINDOW_MINUTES} minutes, got {}",
                self.window_minutes
            ));
        }
        if self.excludes.iter().any(|e| !e.is_finite()) {
            return Err("persistence excludes must be finite".to_string());
        }
        Ok(())
    }
}

/// History range to fetch before evaluating `batch`
pub fn lookback(batch: &[Measurement], params: &PersistenceParams) -> Option<(Timestamp, Timestamp)> {
    lookback_range(batch, params.window())
}

/// Evaluate a batch against its (possibly empty) history
pub fn evaluate(
    batch: &[Measurement],
    history: &[Measurement],
    params: &PersistenceParams,
) -> Vec<Option<bool>> {
    let merged = merge_with_history(history, batch);
    let flags = flag_runs(&merged, params);
    trim_to_batch(&merged, &flags, batch.len())
}

/// Flag every point of a chronologically sorted sequence. Missing values
/// are left unevaluated and break the current run.
pub fn flag_runs(points: &[MergedPoint], params: &PersistenceParams) -> Vec<Option<bool>> {
    let window = params.window();
    let mut run: Option<(f64, Timestamp)> = None;

    points
        .iter()
        .map(|point| {
            let Some(value) = point.value else {
                run = None;
                return None;
            };
            let run_start = match run {
                Some((run_value, start)) if run_value == value => start,
                _ => point.measured_at,
            };
            run = Some((value, run_start));

            let elapsed = point.measured_at - run_start;
            Some(elapsed >= window && !params.is_excluded(value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(minute: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(minute)
    }

    fn series(values: &[(i64, Option<f64>)]) -> Vec<Measurement> {
        values
            .iter()
            .map(|(minute, v)| Measurement::from_option(at(*minute), *v))
            .collect()
    }

    fn window_15() -> PersistenceParams {
        PersistenceParams::new(TimeDelta::minutes(15))
    }

    #[test]
    fn test_flagging_starts_when_window_is_reached() {
        let batch = series(&[(0, Some(5.0)), (5, Some(5.0)), (10, Some(5.0)), (15, Some(5.0))]);
        assert_eq!(
            evaluate(&batch, &[], &window_15()),
            vec![Some(false), Some(false), Some(false), Some(true)]
        );
    }

    #[test]
    fn test_value_change_resets_run() {
        let batch = series(&[
            (0, Some(1.0)),
            (5, Some(1.0)),
            (10, Some(1.0)),
            (15, Some(1.0)),
            (20, Some(2.0)),
            (25, Some(3.0)),
            (30, Some(3.0)),
            (35, Some(3.0)),
            (40, Some(3.0)),
            (45, Some(5.0)),
        ]);
        let flags = evaluate(&batch, &[], &window_15());
        assert_eq!(
            flags,
            vec![
                Some(false),
                Some(false),
                Some(false),
                Some(true),
                Some(false),
                Some(false),
                Some(false),
                Some(false),
                Some(true),
                Some(false),
            ]
        );
    }

    #[test]
    fn test_excluded_value_never_flags() {
        let params = window_15().with_excludes(&[0.0]);
        let batch: Vec<_> = (0..24).map(|i| Measurement::new(at(i * 5), 0.0)).collect();
        assert!(evaluate(&batch, &[], &params)
            .iter()
            .all(|f| *f == Some(false)));
    }

    #[test]
    fn test_missing_value_breaks_run_and_stays_missing() {
        let batch = series(&[
            (0, Some(5.0)),
            (5, Some(5.0)),
            (10, None),
            (15, Some(5.0)),
            (20, Some(5.0)),
        ]);
        assert_eq!(
            evaluate(&batch, &[], &window_15()),
            vec![Some(false), Some(false), None, Some(false), Some(false)]
        );
    }

    #[test]
    fn test_history_extends_run_into_batch() {
        let history = series(&[(0, Some(1.0)), (5, Some(1.0)), (10, Some(1.0))]);
        let batch = series(&[(15, Some(1.0)), (20, Some(1.0)), (25, Some(2.0))]);
        assert_eq!(
            evaluate(&batch, &history, &window_15()),
            vec![Some(true), Some(true), Some(false)]
        );
    }

    #[test]
    fn test_run_older_than_lookback_leaves_first_batch_row_unflagged() {
        // The run really started at minute 0, but only one window of history
        // is fetched, so it appears to start at minute 7.
        let history = series(&[(7, Some(4.0)), (12, Some(4.0)), (17, Some(4.0))]);
        let batch = series(&[(20, Some(4.0)), (25, Some(4.0)), (30, Some(4.0))]);
        let (start, end) = lookback(&batch, &window_15()).unwrap();
        assert_eq!((start, end), (at(5), at(20)));

        assert_eq!(
            evaluate(&batch, &history, &window_15()),
            vec![Some(false), Some(true), Some(true)]
        );
    }

    #[test]
    fn test_unsorted_batch_is_flagged_in_input_order() {
        let batch = series(&[(15, Some(5.0)), (0, Some(5.0)), (10, Some(5.0)), (5, Some(5.0))]);
        assert_eq!(
            evaluate(&batch, &[], &window_15()),
            vec![Some(true), Some(false), Some(false), Some(false)]
        );
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        assert!(PersistenceParams::new(TimeDelta::zero()).validate().is_err());
        assert!(window_15().validate().is_ok());
    }

    #[test]
    fn test_validate_bounds_window_length() {
        let year = PersistenceParams::new(TimeDelta::minutes(MAX_WINDOW_MINUTES));
        assert!(year.validate().is_ok());
        let longer = PersistenceParams::new(TimeDelta::minutes(MAX_WINDOW_MINUTES + 1));
        assert!(longer.validate().is_err());
    }

    #[test]
    fn test_oversized_window_does_not_panic() {
        let params = PersistenceParams {
            window_minutes: 1_000_000_000_000,
            excludes: Vec::new(),
        };
        let batch = series(&[(0, Some(5.0)), (5, Some(5.0))]);
        assert_eq!(params.window(), TimeDelta::MAX);
        assert!(lookback(&batch, &params).is_none());
        assert_eq!(
            evaluate(&batch, &[], &params),
            vec![Some(false), Some(false)]
        );
    }

    #[test]
    fn test_window_is_whole_minutes() {
        let params = PersistenceParams::new(TimeDelta::seconds(90));
        assert_eq!(params.window_minutes, 1);
        assert_eq!(params.window(), TimeDelta::minutes(1));
    }
}
