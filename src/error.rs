//! Construction-time errors.
//!
//! Nothing inside a forward pass fails; numeric edge cases are clamped where
//! they arise. Only building a runtime from a bad configuration or a model
//! that does not match it is an error.

use thiserror::Error;

/// Invalid runtime configuration or model shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cache capacity must be at least 1")]
    ZeroCacheCapacity,

    #[error("model must have at least one layer")]
    NoLayers,

    #[error("f_max must be finite and positive, got {0}")]
    InvalidFrequencyRange(f64),

    #[error("base lifetime tau0 must be finite and positive, got {0} s")]
    InvalidBaseLifetime(f64),

    #[error("retention epsilon must lie in (0, 1], got {0}")]
    InvalidRetentionEpsilon(f64),

    #[error("energy epsilon must be finite and positive, got {0}")]
    InvalidEnergyEpsilon(f64),

    #[error("bypass threshold must lie in (0, 1), got {0}")]
    InvalidBypassThreshold(f64),

    #[error("max skip ratio must lie in [0, 1], got {0}")]
    InvalidSkipRatio(f64),

    #[error("d_model {d_model} is not divisible into {num_heads} heads")]
    HeadMismatch { d_model: usize, num_heads: usize },

    #[error("ffn multiplier must be at least 1")]
    ZeroFfnMultiplier,

    #[error("gamma must be finite and positive, got {0}")]
    InvalidGamma(f64),

    #[error("norm epsilon must be finite and positive, got {0}")]
    InvalidNormEpsilon(f32),

    #[error("model has {actual} layers but config expects {expected}")]
    LayerCountMismatch { expected: usize, actual: usize },

    #[error("layer {layer} has width {actual} but config expects {expected}")]
    WidthMismatch {
        layer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("layer {layer} parameter {name} has shape {actual:?}, expected {expected:?}")]
    ParameterShape {
        layer: usize,
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}
