//! Closed-form statistics shared by the model builders
//!
//! Every helper returns `None` instead of a placeholder when the input is too
//! small to define the statistic, so callers can keep "unknown" apart from zero.

use statrs::statistics::Statistics;

/// Arithmetic mean of the finite values, `None` for no values
pub fn mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().mean())
}

/// Least-squares line `y = intercept + slope * x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// x at which the line crosses `y`, `None` for a flat line
    pub fn solve_for(&self, y: f64) -> Option<f64> {
        if self.slope == 0.0 || !self.slope.is_finite() {
            return None;
        }
        Some((y - self.intercept) / self.slope)
    }
}

/// Fit a line through `(x, y)` pairs.
///
/// Needs at least two distinct x values; a single x cannot define a slope.
pub fn linear_fit(points: &[(f64, f64)]) -> Option<LinearFit> {
    let points: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();

    if distinct_count(points.iter().map(|(x, _)| *x)) < 2 {
        return None;
    }

    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();

    let var_x = xs.iter().variance();
    if var_x == 0.0 || !var_x.is_finite() {
        return None;
    }

    let slope = xs.iter().covariance(ys.iter()) / var_x;
    let intercept = ys.iter().mean() - slope * xs.iter().mean();

    if !slope.is_finite() || !intercept.is_finite() {
        return None;
    }

    Some(LinearFit { slope, intercept })
}

/// Number of distinct values, comparing bit patterns
pub fn distinct_count(values: impl Iterator<Item = f64>) -> usize {
    let mut seen: Vec<u64> = values.map(f64::to_bits).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
