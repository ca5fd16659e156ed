//! Layer-bypass controller.
//!
//! Once per forward pass the hidden state is reduced to a signature
//! `S ∈ [0, 1]`. If `S` exceeds the threshold the bypass is Open and a
//! contiguous block of interior layers, starting at layer 1, is replaced by
//! the identity:
//!
//! ```text
//! skip_ratio = clamp((S − t) / (1 − t), 0, max_skip_ratio)
//! skip_count = floor(skip_ratio · (num_layers − 2))
//! skip_layers = {1, …, skip_count}
//! ```
//!
//! The first and last layer always run. Nothing carries over between passes.

use std::collections::BTreeSet;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::relevance::clamp_range;
use crate::relevance::score::RelevanceScorer;

/// Gain of the signature transform (8/9).
const SIGNATURE_GAIN: f64 = 8.0 / 9.0;

/// Bypass state within one forward pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BypassState {
    Closed,
    Open,
}

/// Which layers to skip in the current pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BypassDecision {
    pub active: bool,
    pub skip_layers: BTreeSet<usize>,
    pub signature: f64,
    pub skip_ratio: f64,
}

impl BypassDecision {
    pub fn closed(signature: f64) -> Self {
        Self {
            active: false,
            skip_layers: BTreeSet::new(),
            signature,
            skip_ratio: 0.0,
        }
    }

    pub fn state(&self) -> BypassState {
        if self.active {
            BypassState::Open
        } else {
            BypassState::Closed
        }
    }

    pub fn skips(&self, layer: usize) -> bool {
        self.skip_layers.contains(&layer)
    }

    pub fn skip_count(&self) -> usize {
        self.skip_layers.len()
    }
}

/// Stateless per-call bypass controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerBypassController {
    threshold: f64,
    max_skip_ratio: f64,
    num_layers: usize,
}

impl LayerBypassController {
    pub fn new(threshold: f64, max_skip_ratio: f64, num_layers: usize) -> Self {
        Self {
            threshold,
            max_skip_ratio,
            num_layers,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.bypass_threshold, config.max_skip_ratio, config.num_layers)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Aggregate signature of a hidden state.
    ///
    /// With `r` the mean relevance frequency over `F_MAX`,
    /// `S = 1 − |r·g − g|`, `g = 8/9`. An all-zero state gives `1/9`, a
    /// state whose rows carry equal energy gives `1`.
    pub fn signature(scorer: &RelevanceScorer, x: ArrayView2<f32>) -> f64 {
        let r = scorer.aggregate(x) / scorer.f_max();
        let s = 1.0 - (r * SIGNATURE_GAIN - SIGNATURE_GAIN).abs();
        clamp_unit(s)
    }

    /// Decide the skip set for a signature.
    pub fn decide(&self, signature: f64) -> BypassDecision {
        let s = clamp_unit(signature);
        if s <= self.threshold {
            return BypassDecision::closed(s);
        }

        let raw = (s - self.threshold) / (1.0 - self.threshold);
        let skip_ratio = clamp_range(raw, 0.0, self.max_skip_ratio);
        let skip_count = self.skip_count(skip_ratio);

        BypassDecision {
            active: true,
            skip_layers: (1..1 + skip_count).collect(),
            signature: s,
            skip_ratio,
        }
    }

    /// Largest skip set this controller can ever produce.
    pub fn max_skip_count(&self) -> usize {
        self.skip_count(self.max_skip_ratio)
    }

    fn skip_count(&self, skip_ratio: f64) -> usize {
        if self.num_layers < 3 {
            return 0;
        }
        let interior = self.num_layers - 2;
        ((skip_ratio * interior as f64).floor() as usize).min(interior)
    }
}

fn clamp_unit(x: f64) -> f64 {
    clamp_range(x, 0.0, 1.0)
}
