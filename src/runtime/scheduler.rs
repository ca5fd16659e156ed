//! Forward-pass orchestration.
//!
//! One pass, strictly layer by layer:
//!
//! ```text
//! input ─► precision tier (from clarity)
//!       ─► signature ─► bypass decision
//!       ─► for each layer:
//!            cache hit?   ─► cached output
//!            in skip set? ─► identity
//!            otherwise    ─► block forward ─► cache put
//!       ─► final norm ─► (output, telemetry)
//! ```
//!
//! Schedulers are cheap; concurrent requests each get one, sharing the
//! model through an `Arc` and the cache through a [`SharedCache`] clone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use tracing::{debug, trace, warn};

use crate::cache::key::LayerKey;
use crate::cache::shared::SharedCache;
use crate::config::RuntimeConfig;
use crate::control::bypass::{BypassDecision, LayerBypassController};
use crate::control::precision::{PrecisionChoice, PrecisionSelector};
use crate::core::attention::AttentionParams;
use crate::core::model::Model;
use crate::error::ConfigError;
use crate::relevance::score::RelevanceScorer;
use crate::runtime::clock::Clock;
use crate::runtime::telemetry::{LayerOutcome, RuntimeStats, Telemetry};

/// Cache of layer outputs keyed by layer and input fingerprint.
pub type LayerCache = SharedCache<LayerKey, Array2<f32>>;

pub struct InferenceScheduler {
    config: RuntimeConfig,
    model: Arc<Model>,
    cache: LayerCache,
    scorer: RelevanceScorer,
    selector: PrecisionSelector,
    bypass: LayerBypassController,
    attention: AttentionParams,
    clarity: f64,
    stats: RuntimeStats,
}

impl InferenceScheduler {
    /// Scheduler with a fresh private cache.
    pub fn new(config: RuntimeConfig, model: Arc<Model>) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = SharedCache::from_config(&config)?;
        Self::with_cache(config, model, cache)
    }

    /// Scheduler over an existing, possibly shared, cache.
    pub fn with_cache(
        config: RuntimeConfig,
        model: Arc<Model>,
        cache: LayerCache,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        model.check(&config)?;

        Ok(Self {
            scorer: RelevanceScorer::from_config(&config),
            selector: PrecisionSelector::from_config(&config),
            bypass: LayerBypassController::from_config(&config),
            attention: AttentionParams::from_config(&config),
            clarity: PrecisionSelector::clamp_clarity(config.default_clarity),
            stats: RuntimeStats::default(),
            config,
            model,
            cache,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    pub fn clarity(&self) -> f64 {
        self.clarity
    }

    /// Set the clarity used by subsequent passes. Clamped to `[0, 1]`.
    pub fn set_clarity(&mut self, clarity: f64) {
        self.clarity = PrecisionSelector::clamp_clarity(clarity);
    }

    /// Precision the next pass will run at.
    pub fn precision(&self) -> PrecisionChoice {
        self.selector.select(self.clarity)
    }

    /// Bypass decision for `input`, without running anything.
    pub fn plan(&self, input: &Array2<f32>) -> BypassDecision {
        let signature = LayerBypassController::signature(&self.scorer, input.view());
        self.bypass.decide(signature)
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RuntimeStats::default();
    }

    /// Run one pass at the clock's current time.
    pub fn forward_with_clock(
        &mut self,
        input: &Array2<f32>,
        clock: &dyn Clock,
    ) -> (Array2<f32>, Telemetry) {
        self.forward(input, clock.now())
    }

    /// Run one pass over `input` (`[tokens, d_model]`) at time `now`.
    ///
    /// Never fails. An input of the wrong width is returned unchanged with
    /// empty per-layer telemetry.
    pub fn forward(&mut self, input: &Array2<f32>, now: Duration) -> (Array2<f32>, Telemetry) {
        let start = Instant::now();
        let precision = self.precision();
        let num_layers = self.model.num_layers();

        if input.ncols() != self.config.d_model {
            warn!(
                width = input.ncols(),
                d_model = self.config.d_model,
                "input width mismatch; passing through"
            );
            let mut telemetry =
                Telemetry::new(precision, &BypassDecision::closed(0.0), num_layers);
            telemetry.total_elapsed = start.elapsed();
            self.stats.record(&telemetry);
            return (input.clone(), telemetry);
        }

        let decision = self.plan(input);
        debug!(
            signature = decision.signature,
            active = decision.active,
            skip = decision.skip_count(),
            tier = %precision.tier,
            "pass planned"
        );

        let mut telemetry = Telemetry::new(precision, &decision, num_layers);
        let mut x = input.clone();

        for (i, block) in self.model.blocks.iter().enumerate() {
            let layer_start = Instant::now();
            let key = if self.config.emulate_precision {
                LayerKey::for_input_at(i, x.view(), precision.tier)
            } else {
                LayerKey::for_input(i, x.view())
            };

            let outcome = if let Some(cached) = self.cache.get(&key, now) {
                x = cached;
                LayerOutcome::Cached
            } else if decision.skips(i) {
                LayerOutcome::Bypassed
            } else {
                let (mut out, stats) = block.forward(&x, &self.attention, self.config.norm_eps);
                if self.config.emulate_precision {
                    let tier = precision.tier;
                    out.mapv_inplace(|v| tier.quantize(v));
                }
                let frequency = self.scorer.aggregate(out.view());
                self.cache.put(key, out.clone(), frequency, now);
                telemetry.attention.merge(stats);
                x = out;
                LayerOutcome::Computed
            };

            let elapsed = layer_start.elapsed();
            trace!(layer = i, ?outcome, ?elapsed, "layer done");
            telemetry.record_layer(i, outcome, elapsed);
        }

        let output = self.model.final_normalize(&x, self.config.norm_eps);
        telemetry.total_elapsed = start.elapsed();
        self.stats.record(&telemetry);

        debug!(
            hits = telemetry.cache_hits,
            misses = telemetry.cache_misses,
            skipped = telemetry.layers_skipped.len(),
            elapsed = ?telemetry.total_elapsed,
            "pass complete"
        );

        (output, telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::precision::PrecisionTier;
    use std::collections::BTreeSet;
    use std::thread;

    fn config(num_layers: usize) -> RuntimeConfig {
        RuntimeConfig {
            num_layers,
            d_model: 8,
            num_heads: 2,
            ffn_multiplier: 2,
            cache_capacity: 64,
            ..Default::default()
        }
    }

    /// One dominant row: low signature, bypass stays closed.
    fn peaked_input() -> Array2<f32> {
        Array2::from_shape_fn((4, 8), |(i, j)| {
            if i == 0 {
                2.0 + j as f32 * 0.1
            } else {
                0.01 * (j as f32 - 3.5)
            }
        })
    }

    /// Row energies relative to the max: 1, 1, 1, 0.2. S ≈ 0.822.
    fn flat_input() -> Array2<f32> {
        let mut x = Array2::zeros((4, 8));
        x[[0, 0]] = 1.0;
        x[[1, 1]] = 1.0;
        x[[2, 2]] = 1.0;
        x[[3, 3]] = 0.2_f32.sqrt();
        x
    }

    fn scheduler(config: RuntimeConfig, model: Model) -> InferenceScheduler {
        InferenceScheduler::new(config, Arc::new(model)).expect("valid scheduler")
    }

    #[test]
    fn test_repeated_input_hits_cache() {
        let cfg = config(4);
        let mut sched = scheduler(cfg.clone(), Model::random(&cfg, 3));
        let x = peaked_input();

        let (out1, t1) = sched.forward(&x, Duration::ZERO);
        assert!(!t1.bypass_active);
        assert_eq!(t1.cache_hits, 0);
        assert_eq!(t1.cache_misses, 4);
        assert_eq!(t1.layers_computed(), 4);
        assert_eq!(t1.elapsed_per_layer.len(), 4);

        let (out2, t2) = sched.forward(&x, Duration::from_millis(10));
        assert_eq!(t2.cache_hits, 4);
        assert_eq!(t2.cache_misses, 0);
        assert_eq!(t2.attention.tokens_processed, 0);
        assert_eq!(out1, out2);

        assert_eq!(sched.stats().forward_calls, 2);
        assert_eq!(sched.stats().cache_hits, 4);
        assert_eq!(sched.cache().len(), 4);
    }

    #[test]
    fn test_bypass_skips_interior_layers() {
        let cfg = RuntimeConfig {
            bypass_threshold: 0.6,
            ..config(8)
        };
        let mut sched = scheduler(cfg.clone(), Model::zeros(&cfg));
        let x = flat_input();

        let decision = sched.plan(&x);
        assert!(decision.active);
        assert!((decision.signature - (1.0 / 9.0 + 8.0 / 9.0 * 0.8)).abs() < 1e-6);

        let (_, t) = sched.forward(&x, Duration::ZERO);
        assert_eq!(t.layers_skipped, BTreeSet::from([1, 2, 3]));
        assert_eq!(t.count(LayerOutcome::Bypassed), 3);
        assert_eq!(t.layers_computed(), 5);
        assert_eq!(t.layer_outcomes[0], LayerOutcome::Computed);
        assert_eq!(t.layer_outcomes[7], LayerOutcome::Computed);
        assert_eq!(sched.cache().len(), 5);
        assert_eq!(sched.stats().layers_bypassed, 3);
    }

    #[test]
    fn test_bypassed_layers_are_never_cached() {
        let cfg = RuntimeConfig {
            bypass_threshold: 0.6,
            ..config(8)
        };
        let mut sched = scheduler(cfg.clone(), Model::zeros(&cfg));
        let x = flat_input();

        sched.forward(&x, Duration::ZERO);
        let (_, t) = sched.forward(&x, Duration::from_millis(1));
        assert_eq!(t.cache_hits, 5);
        assert_eq!(t.layers_skipped, BTreeSet::from([1, 2, 3]));
        for layer in 1..=3 {
            assert!(!sched.cache().contains(&LayerKey::for_input(layer, x.view())));
        }
    }

    #[test]
    fn test_cache_hit_wins_over_bypass() {
        let cfg = config(8);
        let model = Arc::new(Model::zeros(&cfg));
        let cache = LayerCache::from_config(&cfg).expect("valid cache");
        let x = flat_input();

        // Default threshold 8/9 sits above S ≈ 0.822: every layer runs.
        let mut warm = InferenceScheduler::with_cache(cfg.clone(), Arc::clone(&model), cache.clone())
            .expect("valid scheduler");
        let (_, t) = warm.forward(&x, Duration::ZERO);
        assert!(!t.bypass_active);
        assert_eq!(t.layers_computed(), 8);

        let eager = RuntimeConfig {
            bypass_threshold: 0.6,
            ..config(8)
        };
        let mut sched = InferenceScheduler::with_cache(eager, model, cache).expect("valid scheduler");
        assert_eq!(sched.plan(&x).skip_layers, BTreeSet::from([1, 2, 3]));

        let (_, t) = sched.forward(&x, Duration::from_millis(1));
        assert!(t.bypass_active);
        assert!(t.layers_skipped.is_empty());
        assert_eq!(t.cache_hits, 8);
        for layer in 1..=3 {
            assert_eq!(t.layer_outcomes[layer], LayerOutcome::Cached);
        }
        assert_eq!(sched.stats().layers_bypassed, 0);
    }

    #[test]
    fn test_first_and_last_layers_always_run() {
        let cfg = RuntimeConfig {
            bypass_threshold: 0.05,
            ..config(6)
        };
        let mut sched = scheduler(cfg.clone(), Model::zeros(&cfg));
        let (_, t) = sched.forward(&flat_input(), Duration::ZERO);
        assert!(t.bypass_active);
        assert!(!t.layers_skipped.contains(&0));
        assert!(!t.layers_skipped.contains(&5));
        assert!(t.layers_skipped.len() <= 3);
    }

    #[test]
    fn test_zero_model_is_final_norm_of_input() {
        let cfg = config(3);
        let model = Model::zeros(&cfg);
        let expected = model.final_normalize(&peaked_input(), cfg.norm_eps);
        let mut sched = scheduler(cfg, model);
        let (out, _) = sched.forward(&peaked_input(), Duration::ZERO);
        for (a, b) in out.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_precision_follows_clarity() {
        let cfg = config(2);
        let mut sched = scheduler(cfg.clone(), Model::zeros(&cfg));
        assert!((sched.clarity() - 0.5).abs() < 1e-12);

        sched.set_clarity(0.9);
        let (_, t) = sched.forward(&peaked_input(), Duration::ZERO);
        assert_eq!(t.precision_tier, PrecisionTier::Low);
        assert!((t.efficiency - 0.9_f64.powf(5.0 / 3.0)).abs() < 1e-9);
        assert!((t.throughput_multiplier - 2.67).abs() < 0.02);

        sched.set_clarity(0.1);
        assert_eq!(sched.precision().tier, PrecisionTier::High);

        sched.set_clarity(3.0);
        assert_eq!(sched.clarity(), 1.0);
    }

    #[test]
    fn test_emulated_precision_separates_cache_entries() {
        let cfg = RuntimeConfig {
            emulate_precision: true,
            ..config(3)
        };
        let mut sched = scheduler(cfg.clone(), Model::random(&cfg, 9));
        let x = peaked_input();

        sched.set_clarity(0.95);
        sched.forward(&x, Duration::ZERO);
        sched.set_clarity(0.05);
        let (_, t) = sched.forward(&x, Duration::ZERO);
        assert_eq!(t.precision_tier, PrecisionTier::High);
        assert_eq!(t.cache_hits, 0);
        assert_eq!(sched.cache().len(), 6);
    }

    #[test]
    fn test_entries_expire_between_passes() {
        let cfg = config(2);
        let mut sched = scheduler(cfg.clone(), Model::zeros(&cfg));
        let x = peaked_input();

        sched.forward(&x, Duration::ZERO);
        let (_, warm) = sched.forward(&x, Duration::from_secs(1));
        assert_eq!(warm.cache_hits, 2);

        // Output frequency ≈ F_MAX/4, so entries live about 1.33 s.
        let (_, cold) = sched.forward(&x, Duration::from_secs(10));
        assert_eq!(cold.cache_hits, 0);
        assert_eq!(cold.layers_computed(), 2);
        assert!(sched.cache().stats().expirations >= 2);
    }

    #[test]
    fn test_width_mismatch_passes_through() {
        let cfg = config(3);
        let mut sched = scheduler(cfg.clone(), Model::random(&cfg, 1));
        let x = Array2::<f32>::ones((2, 5));
        let (out, t) = sched.forward(&x, Duration::ZERO);
        assert_eq!(out, x);
        assert!(t.layer_outcomes.is_empty());
        assert_eq!(t.cache_misses, 0);
        assert!(sched.cache().is_empty());
    }

    #[test]
    fn test_construction_errors() {
        let cfg = config(3);
        let model = Arc::new(Model::zeros(&cfg));

        let zero_cap = RuntimeConfig {
            cache_capacity: 0,
            ..config(3)
        };
        assert!(matches!(
            InferenceScheduler::new(zero_cap, Arc::clone(&model)),
            Err(ConfigError::ZeroCacheCapacity)
        ));

        let deeper = config(5);
        assert!(matches!(
            InferenceScheduler::new(deeper, model),
            Err(ConfigError::LayerCountMismatch { expected: 5, actual: 3 })
        ));
    }

    #[test]
    fn test_concurrent_schedulers_share_cache() {
        let cfg = config(4);
        let model = Arc::new(Model::random(&cfg, 5));
        let cache = LayerCache::from_config(&cfg).expect("valid cache");
        let x = peaked_input();

        let reference = {
            let mut solo = InferenceScheduler::new(cfg.clone(), Arc::clone(&model))
                .expect("valid scheduler");
            solo.forward(&x, Duration::ZERO).0
        };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut sched =
                    InferenceScheduler::with_cache(cfg.clone(), Arc::clone(&model), cache.clone())
                        .expect("valid scheduler");
                let x = x.clone();
                thread::spawn(move || {
                    (0..5)
                        .map(|_| sched.forward(&x, Duration::ZERO).0)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for h in handles {
            for out in h.join().expect("worker panicked") {
                assert_eq!(out, reference);
            }
        }
        assert!(cache.len() <= cfg.cache_capacity);
        assert_eq!(cache.len(), 4);
    }
}
