//! Model skeleton: a fixed-length stack of pre-norm transformer blocks plus
//! the final normalisation.
//!
//! Layers live in a `Vec` and are addressed by index; the scheduler never
//! looks a layer up by name.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::core::attention::{AttentionParams, AttentionStats, RelevanceScaledAttention};
use crate::error::ConfigError;
use crate::kernels::tensor_ops::{layer_norm, relu};

/// Std of the Gaussian FFN init.
const FFN_INIT_STD: f32 = 0.02;

/// Two-layer ReLU feed-forward network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedForward {
    /// Up projection: `[d_model, ffn_dim]`
    pub w_up: Array2<f32>,

    /// Down projection: `[ffn_dim, d_model]`
    pub w_down: Array2<f32>,
}

impl FeedForward {
    pub fn zeros(d_model: usize, ffn_dim: usize) -> Self {
        Self {
            w_up: Array2::zeros((d_model, ffn_dim)),
            w_down: Array2::zeros((ffn_dim, d_model)),
        }
    }

    pub fn random<R: Rng>(d_model: usize, ffn_dim: usize, rng: &mut R) -> Self {
        Self {
            w_up: Array2::from_shape_fn((d_model, ffn_dim), |_| {
                rng.sample::<f32, _>(StandardNormal) * FFN_INIT_STD
            }),
            w_down: Array2::from_shape_fn((ffn_dim, d_model), |_| {
                rng.sample::<f32, _>(StandardNormal) * FFN_INIT_STD
            }),
        }
    }

    /// down(relu(up(x)))
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = x.dot(&self.w_up).mapv(relu);
        hidden.dot(&self.w_down)
    }

    pub fn param_count(&self) -> usize {
        self.w_up.len() + self.w_down.len()
    }
}

/// One pre-norm block: `x + attn(norm(x))`, then `h + ffn(norm(h))`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformerBlock {
    pub attn_norm: Array1<f32>,
    pub attention: RelevanceScaledAttention,
    pub ffn_norm: Array1<f32>,
    pub ffn: FeedForward,
    pub layer_idx: usize,
}

impl TransformerBlock {
    /// Zero projections: the block is the identity.
    pub fn zeros(layer_idx: usize, d_model: usize, num_heads: usize, ffn_dim: usize) -> Self {
        Self {
            attn_norm: Array1::ones(d_model),
            attention: RelevanceScaledAttention::zeros(d_model, num_heads),
            ffn_norm: Array1::ones(d_model),
            ffn: FeedForward::zeros(d_model, ffn_dim),
            layer_idx,
        }
    }

    pub fn random<R: Rng>(
        layer_idx: usize,
        d_model: usize,
        num_heads: usize,
        ffn_dim: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            attn_norm: Array1::ones(d_model),
            attention: RelevanceScaledAttention::random(d_model, num_heads, rng),
            ffn_norm: Array1::ones(d_model),
            ffn: FeedForward::random(d_model, ffn_dim, rng),
            layer_idx,
        }
    }

    pub fn forward(
        &self,
        x: &Array2<f32>,
        params: &AttentionParams,
        norm_eps: f32,
    ) -> (Array2<f32>, AttentionStats) {
        let normed = layer_norm(x, &self.attn_norm, norm_eps);
        let (attn_out, stats) = self.attention.forward(&normed, params);
        let h = x + &attn_out;

        let normed = layer_norm(&h, &self.ffn_norm, norm_eps);
        let ffn_out = self.ffn.forward(&normed);
        (h + &ffn_out, stats)
    }

    /// Every parameter must match `config`, or `forward` would hit a shape
    /// error mid-pass. `layer` is the block's position in the stack.
    pub fn check(&self, layer: usize, config: &RuntimeConfig) -> Result<(), ConfigError> {
        let d = config.d_model;
        let h = config.ffn_dim();
        let a = &self.attention;
        let shapes: [(&'static str, &[usize], Vec<usize>); 8] = [
            ("attn_norm", self.attn_norm.shape(), vec![d]),
            ("ffn_norm", self.ffn_norm.shape(), vec![d]),
            ("w_q", a.w_q.shape(), vec![d, d]),
            ("w_k", a.w_k.shape(), vec![d, d]),
            ("w_v", a.w_v.shape(), vec![d, d]),
            ("w_o", a.w_o.shape(), vec![d, d]),
            ("ffn.w_up", self.ffn.w_up.shape(), vec![d, h]),
            ("ffn.w_down", self.ffn.w_down.shape(), vec![h, d]),
        ];
        for (name, actual, expected) in shapes {
            if actual != expected.as_slice() {
                return Err(ConfigError::ParameterShape {
                    layer,
                    name,
                    expected,
                    actual: actual.to_vec(),
                });
            }
        }
        if a.num_heads != config.num_heads {
            return Err(ConfigError::HeadMismatch {
                d_model: d,
                num_heads: a.num_heads,
            });
        }
        Ok(())
    }

    pub fn param_count(&self) -> usize {
        let a = &self.attention;
        a.w_q.len() + a.w_k.len() + a.w_v.len() + a.w_o.len()
            + self.attn_norm.len()
            + self.ffn_norm.len()
            + self.ffn.param_count()
    }
}

/// The full layer stack.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub blocks: Vec<TransformerBlock>,

    /// Scale of the final layer norm.
    pub final_norm: Array1<f32>,
}

impl Model {
    /// Identity model shaped by `config`.
    pub fn zeros(config: &RuntimeConfig) -> Self {
        Self {
            blocks: (0..config.num_layers)
                .map(|i| TransformerBlock::zeros(i, config.d_model, config.num_heads, config.ffn_dim()))
                .collect(),
            final_norm: Array1::ones(config.d_model),
        }
    }

    /// Seeded random model shaped by `config`.
    pub fn random(config: &RuntimeConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            blocks: (0..config.num_layers)
                .map(|i| {
                    TransformerBlock::random(
                        i,
                        config.d_model,
                        config.num_heads,
                        config.ffn_dim(),
                        &mut rng,
                    )
                })
                .collect(),
            final_norm: Array1::ones(config.d_model),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn d_model(&self) -> usize {
        self.final_norm.len()
    }

    pub fn layer(&self, idx: usize) -> Option<&TransformerBlock> {
        self.blocks.get(idx)
    }

    /// Final layer norm applied after the last block.
    pub fn final_normalize(&self, x: &Array2<f32>, norm_eps: f32) -> Array2<f32> {
        layer_norm(x, &self.final_norm, norm_eps)
    }

    /// Ensure the model matches `config` in depth and width.
    pub fn check(&self, config: &RuntimeConfig) -> Result<(), ConfigError> {
        if self.blocks.len() != config.num_layers {
            return Err(ConfigError::LayerCountMismatch {
                expected: config.num_layers,
                actual: self.blocks.len(),
            });
        }
        if self.final_norm.len() != config.d_model {
            return Err(ConfigError::WidthMismatch {
                layer: self.blocks.len(),
                expected: config.d_model,
                actual: self.final_norm.len(),
            });
        }
        for (i, block) in self.blocks.iter().enumerate() {
            block.check(i, config)?;
        }
        Ok(())
    }

    pub fn param_count(&self) -> usize {
        self.blocks.iter().map(|b| b.param_count()).sum::<usize>() + self.final_norm.len()
    }
}
