//! Relevance-scaled multi-head attention.
//!
//! Standard `softmax(QKᵀ/√d)·V` with one change: before the softmax, the
//! score column of every key position `j` is multiplied by `1 − κ(f_j)`,
//! where `f_j` is that token's relevance frequency. This biases attention
//! towards high-energy tokens without a hard mask.
//!
//! Order inside one head:
//! 1. raw scores `q·kᵀ / √d_head`
//! 2. relevance scaling (same weights for every head)
//! 3. additive causal mask
//! 4. max-subtracted row softmax

use ndarray::{s, Array1, Array2, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::kernels::tensor_ops::softmax_rows;
use crate::relevance::retention::Retention;
use crate::relevance::score::RelevanceScorer;

/// Additive mask value for future positions.
const MASK_VALUE: f32 = -1e9;

/// Pass-wide attention settings shared by every layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttentionParams {
    pub scorer: RelevanceScorer,
    pub retention: Retention,
    pub causal: bool,
    /// κ at or above this marks a token as low relevance (statistics only).
    pub kappa_threshold: f64,
}

impl AttentionParams {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            scorer: RelevanceScorer::from_config(config),
            retention: Retention::from_config(config),
            causal: config.causal,
            kappa_threshold: config.kappa_threshold,
        }
    }
}

impl Default for AttentionParams {
    fn default() -> Self {
        Self {
            scorer: RelevanceScorer::default(),
            retention: Retention::default(),
            causal: true,
            kappa_threshold: 0.5,
        }
    }
}

/// Token counts from one attention call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionStats {
    pub tokens_processed: usize,
    pub low_relevance_tokens: usize,
}

impl AttentionStats {
    pub fn merge(&mut self, other: AttentionStats) {
        self.tokens_processed += other.tokens_processed;
        self.low_relevance_tokens += other.low_relevance_tokens;
    }

    pub fn low_relevance_rate(&self) -> f64 {
        if self.tokens_processed == 0 {
            0.0
        } else {
            self.low_relevance_tokens as f64 / self.tokens_processed as f64
        }
    }
}

/// Weights for one attention layer. All projections are `[d_model, d_model]`
/// and applied as `x · W`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelevanceScaledAttention {
    pub w_q: Array2<f32>,
    pub w_k: Array2<f32>,
    pub w_v: Array2<f32>,
    pub w_o: Array2<f32>,
    pub num_heads: usize,
}

impl RelevanceScaledAttention {
    pub fn zeros(d_model: usize, num_heads: usize) -> Self {
        Self {
            w_q: Array2::zeros((d_model, d_model)),
            w_k: Array2::zeros((d_model, d_model)),
            w_v: Array2::zeros((d_model, d_model)),
            w_o: Array2::zeros((d_model, d_model)),
            num_heads,
        }
    }

    /// Gaussian init with std `1/√d_head`.
    pub fn random<R: Rng>(d_model: usize, num_heads: usize, rng: &mut R) -> Self {
        let head_dim = d_model / num_heads.max(1);
        let std = 1.0 / (head_dim.max(1) as f32).sqrt();
        let mut init = || {
            Array2::from_shape_fn((d_model, d_model), |_| rng.sample::<f32, _>(StandardNormal) * std)
        };
        Self {
            w_q: init(),
            w_k: init(),
            w_v: init(),
            w_o: init(),
            num_heads,
        }
    }

    pub fn d_model(&self) -> usize {
        self.w_q.nrows()
    }

    pub fn head_dim(&self) -> usize {
        self.d_model() / self.num_heads.max(1)
    }

    /// Attention over `x` (`[tokens, d_model]`); returns the projected output
    /// (without residual) and token statistics.
    pub fn forward(&self, x: &Array2<f32>, params: &AttentionParams) -> (Array2<f32>, AttentionStats) {
        let n = x.nrows();
        let d = self.d_model();
        if x.ncols() != d || self.num_heads == 0 || d % self.num_heads != 0 {
            tracing::warn!(
                width = x.ncols(),
                d_model = d,
                heads = self.num_heads,
                "attention shape mismatch; contributing zeros"
            );
            return (Array2::zeros(x.raw_dim()), AttentionStats::default());
        }

        // One weight per key position, shared by every head.
        let frequencies = params.scorer.frequencies(x.view());
        let weights = frequencies.mapv(|f| params.retention.relevance_weight(f) as f32);
        let stats = AttentionStats {
            tokens_processed: n,
            low_relevance_tokens: frequencies
                .iter()
                .filter(|&&f| params.retention.kappa(f) >= params.kappa_threshold)
                .count(),
        };

        let q = x.dot(&self.w_q);
        let k = x.dot(&self.w_k);
        let v = x.dot(&self.w_v);
        let hd = self.head_dim();
        let scale = (hd as f32).sqrt();

        let heads: Vec<Array2<f32>> = (0..self.num_heads)
            .into_par_iter()
            .map(|h| {
                let cols = h * hd..(h + 1) * hd;
                let probs = head_probabilities(
                    q.slice(s![.., cols.clone()]),
                    k.slice(s![.., cols.clone()]),
                    &weights,
                    params.causal,
                    scale,
                );
                probs.dot(&v.slice(s![.., cols]))
            })
            .collect();

        let mut concat = Array2::zeros((n, d));
        for (h, out) in heads.iter().enumerate() {
            concat.slice_mut(s![.., h * hd..(h + 1) * hd]).assign(out);
        }

        (concat.dot(&self.w_o), stats)
    }
}

/// Attention probabilities of one head: `[queries, keys]`.
pub fn head_probabilities(
    q: ArrayView2<f32>,
    k: ArrayView2<f32>,
    key_weights: &Array1<f32>,
    causal: bool,
    scale: f32,
) -> Array2<f32> {
    let mut scores = q.dot(&k.t());
    if scale > 0.0 {
        scores.mapv_inplace(|v| v / scale);
    }
    scale_scores(&mut scores, key_weights);
    if causal {
        apply_causal_mask(&mut scores);
    }
    softmax_rows(&mut scores);
    scores
}

/// Multiply score column `j` by `key_weights[j]`.
pub fn scale_scores(scores: &mut Array2<f32>, key_weights: &Array1<f32>) {
    for mut row in scores.rows_mut() {
        for (v, &w) in row.iter_mut().zip(key_weights.iter()) {
            *v *= w;
        }
    }
}

/// Add `MASK_VALUE` to every score whose key lies after its query.
pub fn apply_causal_mask(scores: &mut Array2<f32>) {
    for ((i, j), v) in scores.indexed_iter_mut() {
        if j > i {
            *v += MASK_VALUE;
        }
    }
}
