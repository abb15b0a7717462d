use serde::{Deserialize, Serialize};

/// Plausible value range, both bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeParams {
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl RangeParams {
    pub fn new(lower_bound: f64, upper_bound: f64) -> Self {
        Self {
            lower_bound,
            upper_bound,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.lower_bound.is_finite() || !self.upper_bound.is_finite() {
            return Err("range bounds must be finite".to_string());
        }
        if self.lower_bound > self.upper_bound {
            return Err(format!(
                "lower bound {} exceeds upper bound {}",
                self.lower_bound, self.upper_bound
            ));
        }
        Ok(())
    }
}

/// Flag every value outside `[lower_bound, upper_bound]`.
/// Missing values are not evaluated.
pub fn range_check(values: &[Option<f64>], params: &RangeParams) -> Vec<Option<bool>> {
    values
        .iter()
        .map(|value| {
            value
                .filter(|v| !v.is_nan())
                .map(|v| v < params.lower_bound || v > params.upper_bound)
        })
        .collect()
}
