//! Runtime configuration.
//!
//! Every tunable of the optimisation layer lives in [`RuntimeConfig`], an
//! immutable value handed to constructors.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound of the relevance-frequency range.
pub const F_MAX: f64 = 1440.0;

/// Precision exponent γ = (5/9) / (3/9).
pub const GAMMA: f64 = 5.0 / 3.0;

/// Default bypass trigger (8/9).
pub const BYPASS_THRESHOLD: f64 = 8.0 / 9.0;

/// Never skip more than this fraction of the interior layers.
pub const MAX_SKIP_RATIO: f64 = 0.9;

/// Floor applied to κ before dividing by it.
pub const RETENTION_EPSILON: f64 = 1e-3;

/// Added to the batch-maximum energy before normalising.
pub const ENERGY_EPSILON: f64 = 1e-10;

/// Base cache-entry lifetime in seconds.
pub const TAU0_SECS: f64 = 1.0;

/// Default cache capacity (entries).
pub const CACHE_CAPACITY: usize = 4096;

/// Runtime parameters for one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound of the relevance-frequency range.
    pub f_max: f64,

    /// Base lifetime τ₀ of a cache entry, in seconds.
    pub tau0_secs: f64,

    /// Floor ε on κ in the persistence-time formula.
    pub retention_epsilon: f64,

    /// Guard added to the batch-maximum energy.
    pub energy_epsilon: f64,

    /// Signature level above which the bypass opens. Must lie in (0, 1).
    pub bypass_threshold: f64,

    /// Cap on the fraction of interior layers that may be skipped.
    pub max_skip_ratio: f64,

    /// Maximum number of cached layer outputs.
    pub cache_capacity: usize,

    /// Number of transformer layers.
    pub num_layers: usize,

    /// Hidden width.
    pub d_model: usize,

    /// Attention heads per layer.
    pub num_heads: usize,

    /// FFN width as a multiple of `d_model`.
    pub ffn_multiplier: usize,

    /// Precision exponent γ.
    pub gamma: f64,

    /// Tokens with κ at or above this count as low relevance in telemetry.
    pub kappa_threshold: f64,

    /// Apply a causal mask inside attention.
    pub causal: bool,

    /// Clarity used until the caller sets one.
    pub default_clarity: f64,

    /// Layer-norm epsilon.
    pub norm_eps: f32,

    /// Round layer outputs to the selected precision tier.
    pub emulate_precision: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            f_max: F_MAX,
            tau0_secs: TAU0_SECS,
            retention_epsilon: RETENTION_EPSILON,
            energy_epsilon: ENERGY_EPSILON,
            bypass_threshold: BYPASS_THRESHOLD,
            max_skip_ratio: MAX_SKIP_RATIO,
            cache_capacity: CACHE_CAPACITY,
            num_layers: 12,
            d_model: 512,
            num_heads: 8,
            ffn_multiplier: 4,
            gamma: GAMMA,
            kappa_threshold: 0.5,
            causal: true,
            default_clarity: 0.5,
            norm_eps: 1e-5,
            emulate_precision: false,
        }
    }
}

impl RuntimeConfig {
    /// Check every parameter; the first violation is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.f_max.is_finite() && self.f_max > 0.0) {
            return Err(ConfigError::InvalidFrequencyRange(self.f_max));
        }
        if !(self.tau0_secs.is_finite() && self.tau0_secs > 0.0) {
            return Err(ConfigError::InvalidBaseLifetime(self.tau0_secs));
        }
        if !(self.retention_epsilon > 0.0 && self.retention_epsilon <= 1.0) {
            return Err(ConfigError::InvalidRetentionEpsilon(self.retention_epsilon));
        }
        if !(self.energy_epsilon.is_finite() && self.energy_epsilon > 0.0) {
            return Err(ConfigError::InvalidEnergyEpsilon(self.energy_epsilon));
        }
        if !(self.bypass_threshold > 0.0 && self.bypass_threshold < 1.0) {
            return Err(ConfigError::InvalidBypassThreshold(self.bypass_threshold));
        }
        if !(0.0..=1.0).contains(&self.max_skip_ratio) {
            return Err(ConfigError::InvalidSkipRatio(self.max_skip_ratio));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if self.num_layers == 0 {
            return Err(ConfigError::NoLayers);
        }
        if self.num_heads == 0 || self.d_model == 0 || self.d_model % self.num_heads != 0 {
            return Err(ConfigError::HeadMismatch {
                d_model: self.d_model,
                num_heads: self.num_heads,
            });
        }
        if self.ffn_multiplier == 0 {
            return Err(ConfigError::ZeroFfnMultiplier);
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(ConfigError::InvalidGamma(self.gamma));
        }
        if !(self.norm_eps.is_finite() && self.norm_eps > 0.0) {
            return Err(ConfigError::InvalidNormEpsilon(self.norm_eps));
        }
        Ok(())
    }

    /// Load a (partial) JSON config; absent fields take their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config '{}'", path.display()))?;
        Ok(config)
    }

    /// Base lifetime τ₀.
    pub fn tau0(&self) -> Duration {
        Duration::try_from_secs_f64(self.tau0_secs).unwrap_or(Duration::MAX)
    }

    /// Per-head width.
    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads.max(1)
    }

    /// FFN hidden width.
    pub fn ffn_dim(&self) -> usize {
        self.d_model * self.ffn_multiplier
    }
}
