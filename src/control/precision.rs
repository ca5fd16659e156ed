//! Precision selection from a clarity score.
//!
//! E = clarity^γ, γ = 5/3 by default.
//!
//! | E            | tier   | numeric format |
//! |--------------|--------|----------------|
//! | E > 0.8      | Low    | fp16           |
//! | 0.5 < E ≤ 0.8| Medium | bf16           |
//! | E ≤ 0.5      | High   | fp32           |
//!
//! Selection is advisory. Out-of-range clarity is clamped, never rejected.

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;

/// Efficiency above which the fast tier is chosen.
const LOW_PRECISION_CUTOFF: f64 = 0.8;

/// Efficiency above which the medium tier is chosen.
const MEDIUM_PRECISION_CUTOFF: f64 = 0.5;

/// Numeric precision tier, ordered from fastest to most accurate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrecisionTier {
    Low,
    Medium,
    High,
}

impl PrecisionTier {
    /// Conventional format name for the tier.
    pub fn dtype(&self) -> &'static str {
        match self {
            PrecisionTier::Low => "fp16",
            PrecisionTier::Medium => "bf16",
            PrecisionTier::High => "fp32",
        }
    }

    /// Explicit mantissa bits kept by the tier's format.
    pub fn mantissa_bits(&self) -> u32 {
        match self {
            PrecisionTier::Low => 10,
            PrecisionTier::Medium => 7,
            PrecisionTier::High => 23,
        }
    }

    /// Round `x` to the tier's mantissa width (round-to-nearest-even).
    ///
    /// Only the mantissa is narrowed; the f32 exponent range is kept.
    pub fn quantize(&self, x: f32) -> f32 {
        let drop = 23 - self.mantissa_bits();
        if drop == 0 || !x.is_finite() {
            return x;
        }
        let bits = x.to_bits();
        let half = 1u32 << (drop - 1);
        let lsb = (bits >> drop) & 1;
        let rounded = bits.wrapping_add(half - 1 + lsb) & !((1u32 << drop) - 1);
        let y = f32::from_bits(rounded);
        if y.is_finite() {
            y
        } else {
            x
        }
    }
}

impl std::fmt::Display for PrecisionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dtype())
    }
}

/// Result of one precision selection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecisionChoice {
    /// Clarity after clamping.
    pub clarity: f64,

    /// E = clarity^γ.
    pub efficiency: f64,

    pub tier: PrecisionTier,

    /// 1 + 2E.
    pub throughput_multiplier: f64,
}

/// Maps clarity to a precision tier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrecisionSelector {
    gamma: f64,
}

impl PrecisionSelector {
    pub fn new(gamma: f64) -> Self {
        Self { gamma }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.gamma)
    }

    /// Clamp clarity into `[0, 1]`; NaN becomes 0.
    pub fn clamp_clarity(clarity: f64) -> f64 {
        if clarity.is_nan() {
            0.0
        } else {
            clarity.clamp(0.0, 1.0)
        }
    }

    /// E = clarity^γ.
    pub fn efficiency(&self, clarity: f64) -> f64 {
        let c = Self::clamp_clarity(clarity);
        if c <= 0.0 {
            return 0.0;
        }
        c.powf(self.gamma).clamp(0.0, 1.0)
    }

    pub fn tier(&self, clarity: f64) -> PrecisionTier {
        tier_for_efficiency(self.efficiency(clarity))
    }

    pub fn throughput_multiplier(&self, clarity: f64) -> f64 {
        1.0 + 2.0 * self.efficiency(clarity)
    }

    pub fn select(&self, clarity: f64) -> PrecisionChoice {
        let clarity = Self::clamp_clarity(clarity);
        let efficiency = self.efficiency(clarity);
        PrecisionChoice {
            clarity,
            efficiency,
            tier: tier_for_efficiency(efficiency),
            throughput_multiplier: 1.0 + 2.0 * efficiency,
        }
    }
}

impl Default for PrecisionSelector {
    fn default() -> Self {
        Self::new(crate::config::GAMMA)
    }
}

fn tier_for_efficiency(e: f64) -> PrecisionTier {
    if e > LOW_PRECISION_CUTOFF {
        PrecisionTier::Low
    } else if e > MEDIUM_PRECISION_CUTOFF {
        PrecisionTier::Medium
    } else {
        PrecisionTier::High
    }
}
