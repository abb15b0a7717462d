use serde::Serialize;

use super::models::FlagColumn;

/// Per-record summary over all evaluated checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QcOutcome {
    /// True if any evaluated check flagged the record
    pub qc_flagged: bool,
    /// Fraction of evaluated checks that passed, `None` if nothing was evaluated
    pub qc_score: Option<f64>,
}

pub fn aggregate_row<I>(cells: I) -> QcOutcome
where
    I: IntoIterator<Item = Option<bool>>,
{
    let mut evaluated = 0usize;
    let mut flagged = 0usize;
    for cell in cells.into_iter().flatten() {
        evaluated += 1;
        if cell {
            flagged += 1;
        }
    }

    QcOutcome {
        qc_flagged: flagged > 0,
        qc_score: (evaluated > 0).then(|| (evaluated - flagged) as f64 / evaluated as f64),
    }
}

/// Aggregate a set of equally long flag columns row by row
pub fn aggregate_columns(columns: &[FlagColumn], rows: usize) -> (Vec<bool>, Vec<Option<f64>>) {
    (0..rows)
        .map(|row| {
            let outcome = aggregate_row(
                columns
                    .iter()
                    .map(|column| column.values.get(row).copied().flatten()),
            );
            (outcome.qc_flagged, outcome.qc_score)
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_row() {
        let all_passed = aggregate_row([Some(false), Some(false), None]);
        assert!(!all_passed.qc_flagged);
        assert_eq!(all_passed.qc_score, Some(1.0));

        let one_flagged = aggregate_row([Some(false), Some(true), Some(false), Some(false)]);
        assert!(one_flagged.qc_flagged);
        assert_eq!(one_flagged.qc_score, Some(0.75));

        let nothing = aggregate_row([None, None]);
        assert!(!nothing.qc_flagged);
        assert_eq!(nothing.qc_score, None);
    }

    #[test]
    fn test_score_decreases_with_more_flags() {
        let mut previous = f64::INFINITY;
        for flagged in 0..=4 {
            let cells: Vec<Option<bool>> = (0..4).map(|i| Some(i < flagged)).collect();
            let score = aggregate_row(cells).qc_score.unwrap();
            assert!(score < previous);
            previous = score;
        }
    }

    #[test]
    fn test_aggregate_columns() {
        let columns = vec![
            FlagColumn {
                name: "a_qc_range_check".to_string(),
                values: vec![Some(false), Some(true), None],
            },
            FlagColumn {
                name: "a_qc_spike_dip_check".to_string(),
                values: vec![Some(false), Some(false), None],
            },
        ];
        let (flagged, score) = aggregate_columns(&columns, 3);
        assert_eq!(flagged, vec![false, true, false]);
        assert_eq!(score, vec![Some(1.0), Some(0.5), None]);
    }
}
