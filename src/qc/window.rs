//! Merging a batch with its historical context and trimming results back.
//!
//! Checks that look past the start of a batch work on a merged, sorted view
//! of history plus batch. Every merged point remembers where it came from so
//! the flags can be scattered back into the caller's original row order.

use chrono::TimeDelta;

use super::models::{Measurement, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedPoint {
    pub measured_at: Timestamp,
    pub value: Option<f64>,
    /// Row of the original batch, `None` for historical context
    pub batch_index: Option<usize>,
}

/// Earliest timestamp of a batch
pub fn earliest(batch: &[Measurement]) -> Option<Timestamp> {
    batch.iter().map(|m| m.measured_at).min()
}

/// Range `[earliest - window, earliest)` of history needed to cover one window.
/// `None` for an empty batch or when the range start is out of range.
pub fn lookback_range(batch: &[Measurement], window: TimeDelta) -> Option<(Timestamp, Timestamp)> {
    let start = earliest(batch)?;
    start
        .checked_sub_signed(window)
        .map(|lookback_start| (lookback_start, start))
}

/// Merge history and batch into one chronological sequence.
///
/// History rows at or after the batch start are dropped since the batch is
/// authoritative for its own range. The sort is stable, so on equal
/// timestamps history comes first and batch rows keep their input order.
pub fn merge_with_history(history: &[Measurement], batch: &[Measurement]) -> Vec<MergedPoint> {
    let start = earliest(batch);
    let mut merged: Vec<MergedPoint> = history
        .iter()
        .filter(|m| start.is_some_and(|s| m.measured_at < s))
        .map(|m| MergedPoint {
            measured_at: m.measured_at,
            value: m.value,
            batch_index: None,
        })
        .chain(batch.iter().enumerate().map(|(i, m)| MergedPoint {
            measured_at: m.measured_at,
            value: m.value,
            batch_index: Some(i),
        }))
        .collect();
    merged.sort_by_key(|p| p.measured_at);
    merged
}

/// Keep only the flags of batch rows, in original batch order
pub fn trim_to_batch(
    merged: &[MergedPoint],
    flags: &[Option<bool>],
    batch_len: usize,
) -> Vec<Option<bool>> {
    let mut out = vec![None; batch_len];
    for (point, flag) in merged.iter().zip(flags) {
        if let Some(i) = point.batch_index {
            out[i] = *flag;
        }
    }
    out
}
