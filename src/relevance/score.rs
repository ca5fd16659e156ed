//! Relevance scoring: row energy normalised against the batch maximum.
//!
//! f_i = F_MAX · E_i / (max_j E_j + eps),  E_i = Σ_d x[i, d]²
//!
//! Non-finite energies are treated as zero so a single bad row cannot poison
//! the rest of the batch.

use ndarray::{Array1, ArrayView2, Axis};

use crate::config::RuntimeConfig;
use crate::relevance::clamp_range;

/// Maps hidden states to relevance frequencies in `[0, f_max]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelevanceScorer {
    f_max: f64,
    energy_epsilon: f64,
}

impl RelevanceScorer {
    pub fn new(f_max: f64, energy_epsilon: f64) -> Self {
        Self {
            f_max,
            energy_epsilon,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.f_max, config.energy_epsilon)
    }

    pub fn f_max(&self) -> f64 {
        self.f_max
    }

    /// Per-row energy (sum of squares), accumulated in f64.
    pub fn energies(&self, x: ArrayView2<f32>) -> Array1<f64> {
        x.map_axis(Axis(1), |row| {
            let e: f64 = row.iter().map(|&v| (v as f64) * (v as f64)).sum();
            if e.is_finite() {
                e
            } else {
                0.0
            }
        })
    }

    /// Relevance frequency of every row of `x` (shape `[tokens, d]`).
    pub fn frequencies(&self, x: ArrayView2<f32>) -> Array1<f64> {
        let energy = self.energies(x);
        let max_energy = energy.iter().copied().fold(0.0_f64, f64::max);
        let denom = max_energy + self.energy_epsilon;
        energy.mapv(|e| clamp_range(e / denom * self.f_max, 0.0, self.f_max))
    }

    /// Mean row frequency; 0 for an empty batch.
    pub fn aggregate(&self, x: ArrayView2<f32>) -> f64 {
        self.frequencies(x).mean().unwrap_or(0.0)
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(crate::config::F_MAX, crate::config::ENERGY_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::F_MAX;
    use ndarray::{array, Array2};

    #[test]
    fn test_max_row_gets_f_max() {
        let scorer = RelevanceScorer::default();
        let x = array![[1.0_f32, 0.0], [3.0, 4.0], [0.0, 0.0]];
        let f = scorer.frequencies(x.view());
        assert!((f[1] - F_MAX).abs() < 1e-6);
        assert!((f[0] - F_MAX / 25.0).abs() < 1e-6);
        assert_eq!(f[2], 0.0);
    }

    #[test]
    fn test_higher_energy_higher_frequency() {
        let scorer = RelevanceScorer::default();
        let x = array![[0.5_f32, 0.5], [1.0, 1.0], [2.0, 2.0]];
        let f = scorer.frequencies(x.view());
        assert!(f[0] < f[1] && f[1] < f[2]);
    }

    #[test]
    fn test_zero_energy_batch() {
        let scorer = RelevanceScorer::default();
        let x: Array2<f32> = Array2::zeros((4, 8));
        let f = scorer.frequencies(x.view());
        assert!(f.iter().all(|&v| v == 0.0));
        assert_eq!(scorer.aggregate(x.view()), 0.0);
    }

    #[test]
    fn test_non_finite_rows_are_zeroed() {
        let scorer = RelevanceScorer::default();
        let x = array![[f32::NAN, 1.0], [f32::INFINITY, 0.0], [1.0, 1.0]];
        let f = scorer.frequencies(x.view());
        assert_eq!(f[0], 0.0);
        assert_eq!(f[1], 0.0);
        assert!((f[2] - F_MAX).abs() < 1e-6);
        assert!(f.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_degenerate_parameters_do_not_panic() {
        let x = array![[1.0_f32, 0.0], [3.0, 4.0]];
        let negative = RelevanceScorer::new(-5.0, 1e-10);
        assert!(negative.frequencies(x.view()).iter().all(|&f| f == 0.0));

        let nan = RelevanceScorer::new(F_MAX, f64::NAN);
        assert!(nan.frequencies(x.view()).iter().all(|&f| f == 0.0));
        assert_eq!(nan.aggregate(x.view()), 0.0);
    }

    #[test]
    fn test_empty_batch() {
        let scorer = RelevanceScorer::default();
        let x: Array2<f32> = Array2::zeros((0, 8));
        assert_eq!(scorer.frequencies(x.view()).len(), 0);
        assert_eq!(scorer.aggregate(x.view()), 0.0);
    }
}
