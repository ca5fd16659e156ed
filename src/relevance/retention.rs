//! Retention coefficient κ(f) = 1 − f / F_MAX.
//!
//! κ is 1 for an irrelevant signal and 0 for a maximally relevant one. It is
//! used two ways:
//! - as a weight: `1 − κ(f)` scales attention scores,
//! - as a persistence divisor: `τ(f) = τ₀ / max(κ(f), ε)` is a cache
//!   entry's lifetime, growing towards `τ₀ / ε` as `f → F_MAX`.

use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::relevance::clamp_range;

/// Clamping retention function over `[0, f_max]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Retention {
    f_max: f64,
    epsilon: f64,
}

impl Retention {
    /// Out-of-range parameters never panic; `RuntimeConfig::validate` rejects
    /// them before a runtime is built.
    pub fn new(f_max: f64, epsilon: f64) -> Self {
        Self { f_max, epsilon }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.f_max, config.retention_epsilon)
    }

    pub fn f_max(&self) -> f64 {
        self.f_max
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Map any input into `[0, f_max]`. NaN counts as zero relevance.
    pub fn clamp_frequency(&self, f: f64) -> f64 {
        clamp_range(f, 0.0, self.f_max)
    }

    /// κ(f), always in `[0, 1]`. A degenerate `f_max` gives κ = 1.
    pub fn kappa(&self, f: f64) -> f64 {
        let f = self.clamp_frequency(f);
        let k = 1.0 - f / self.f_max;
        if k.is_nan() {
            1.0
        } else {
            clamp_range(k, 0.0, 1.0)
        }
    }

    /// `1 − κ(f)`: the multiplicative weight of a token in attention.
    pub fn relevance_weight(&self, f: f64) -> f64 {
        1.0 - self.kappa(f)
    }

    /// κ floored at ε.
    pub fn floored_kappa(&self, f: f64) -> f64 {
        self.kappa(f).max(self.epsilon)
    }

    /// τ(f) = τ₀ / max(κ(f), ε).
    pub fn persistence_time(&self, f: f64, tau0: Duration) -> Duration {
        let secs = tau0.as_secs_f64() / self.floored_kappa(f);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::new(crate::config::F_MAX, crate::config::RETENTION_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::F_MAX;

    #[test]
    fn test_kappa_endpoints() {
        let r = Retention::default();
        assert_eq!(r.kappa(0.0), 1.0);
        assert_eq!(r.kappa(F_MAX), 0.0);
        assert!((r.kappa(F_MAX / 2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_kappa_range_over_domain() {
        let r = Retention::default();
        let mut prev = f64::INFINITY;
        for i in 0..=1440 {
            let k = r.kappa(i as f64);
            assert!((0.0..=1.0).contains(&k), "kappa({}) = {}", i, k);
            assert!(k <= prev, "kappa not monotone at {}", i);
            prev = k;
        }
    }

    #[test]
    fn test_kappa_clamps_out_of_range() {
        let r = Retention::default();
        assert_eq!(r.kappa(-50.0), 1.0);
        assert_eq!(r.kappa(5000.0), 0.0);
        assert_eq!(r.kappa(f64::INFINITY), 0.0);
        assert_eq!(r.kappa(f64::NAN), 1.0);
    }

    #[test]
    fn test_relevance_weight_complements_kappa() {
        let r = Retention::default();
        for f in [0.0, 144.0, 720.0, 1440.0] {
            assert!((r.kappa(f) + r.relevance_weight(f) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_degenerate_parameters_do_not_panic() {
        let negative = Retention::new(-1.0, 1e-3);
        assert_eq!(negative.clamp_frequency(5.0), 0.0);
        assert_eq!(negative.kappa(5.0), 1.0);

        let nan = Retention::new(f64::NAN, f64::NAN);
        assert_eq!(nan.clamp_frequency(5.0), 0.0);
        assert_eq!(nan.kappa(5.0), 1.0);
        assert_eq!(nan.persistence_time(5.0, Duration::from_secs(1)), Duration::from_secs(1));

        let zero = Retention::new(0.0, 1e-3);
        assert_eq!(zero.kappa(0.0), 1.0);
    }

    #[test]
    fn test_persistence_time_base_and_floor() {
        let r = Retention::default();
        let tau0 = Duration::from_secs(1);
        assert_eq!(r.persistence_time(0.0, tau0), tau0);

        let at_max = r.persistence_time(F_MAX, tau0).as_secs_f64();
        assert!((at_max - 1000.0).abs() < 1e-6, "got {}", at_max);

        let half = r.persistence_time(720.0, tau0).as_secs_f64();
        assert!((half - 2.0).abs() < 1e-9);
    }
}
