//! # relevance-runtime
//!
//! Adaptive inference-time optimisation for a stack of transformer layers.
//!
//! One scalar drives every decision: a token's *relevance frequency*, its
//! energy relative to the strongest signal in the batch, scaled to
//! `[0, F_MAX]`. From it the runtime derives
//!
//! 1. **Retention** κ(f) = 1 − f/F_MAX, which sets cache lifetimes and
//!    attention weights
//! 2. **Cache eviction**: a bounded layer-output cache that drops the
//!    lowest-frequency entry first and expires entries lazily
//! 3. **Layer bypass**: uniform, high-signature inputs skip a contiguous run
//!    of interior layers
//! 4. **Precision selection**: a clarity scalar picks fp16, bf16 or fp32
//!
//! [`runtime::scheduler::InferenceScheduler::forward`] ties them together and
//! returns the output with a [`runtime::telemetry::Telemetry`] record.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ndarray::Array2;
//! use relevance_runtime::{InferenceScheduler, Model, RuntimeConfig};
//!
//! let config = RuntimeConfig { num_layers: 4, d_model: 64, num_heads: 4, ..Default::default() };
//! let model = Arc::new(Model::random(&config, 0));
//! let mut scheduler = InferenceScheduler::new(config, model)?;
//! let (out, telemetry) = scheduler.forward(&Array2::ones((16, 64)), Duration::ZERO);
//! # let _ = (out, telemetry);
//! # Ok::<(), relevance_runtime::ConfigError>(())
//! ```

pub mod cache;
pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod kernels;
pub mod relevance;
pub mod runtime;

pub use cache::adaptive::{AdaptiveCache, CacheStats};
pub use cache::key::LayerKey;
pub use cache::shared::SharedCache;
pub use config::RuntimeConfig;
pub use control::bypass::{BypassDecision, LayerBypassController};
pub use control::precision::{PrecisionSelector, PrecisionTier};
pub use crate::core::model::Model;
pub use error::ConfigError;
pub use relevance::retention::Retention;
pub use relevance::score::RelevanceScorer;
pub use runtime::scheduler::InferenceScheduler;
pub use runtime::telemetry::{LayerOutcome, RuntimeStats, Telemetry};
