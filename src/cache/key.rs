//! Cache keys for layer outputs.
//!
//! A key pairs the layer index with a fingerprint of the tensor entering that
//! layer, so outputs of different layers can never collide.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::control::precision::PrecisionTier;

/// Key of one cached layer output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerKey {
    pub layer: usize,
    pub fingerprint: u64,
}

impl LayerKey {
    pub fn new(layer: usize, fingerprint: u64) -> Self {
        Self { layer, fingerprint }
    }

    /// Key for `layer` applied to `input`.
    pub fn for_input(layer: usize, input: ArrayView2<f32>) -> Self {
        Self::new(layer, fingerprint(input))
    }

    /// Key that also separates outputs computed at different precision tiers.
    pub fn for_input_at(layer: usize, input: ArrayView2<f32>, tier: PrecisionTier) -> Self {
        let mut hasher = DefaultHasher::new();
        fingerprint(input).hash(&mut hasher);
        tier.hash(&mut hasher);
        Self::new(layer, hasher.finish())
    }
}

/// Hash of a tensor's shape and exact element bits.
///
/// `0.0` and `-0.0` hash differently; NaN payloads are hashed as-is.
pub fn fingerprint(x: ArrayView2<f32>) -> u64 {
    let mut hasher = DefaultHasher::new();
    x.shape().hash(&mut hasher);
    for v in x.iter() {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}
