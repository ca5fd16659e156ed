//! Per-pass telemetry and cumulative runtime statistics.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::bypass::BypassDecision;
use crate::control::precision::{PrecisionChoice, PrecisionTier};
use crate::core::attention::AttentionStats;

/// What happened to one layer in a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerOutcome {
    /// Output served from the cache.
    Cached,
    /// Skipped by the bypass; identity.
    Bypassed,
    /// Executed and written to the cache.
    Computed,
}

/// Record of one forward pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub layers_skipped: BTreeSet<usize>,
    pub precision_tier: PrecisionTier,
    pub efficiency: f64,
    pub throughput_multiplier: f64,
    pub signature: f64,
    pub bypass_active: bool,
    pub layer_outcomes: Vec<LayerOutcome>,
    pub elapsed_per_layer: Vec<Duration>,
    pub attention: AttentionStats,
    pub total_elapsed: Duration,
}

impl Telemetry {
    pub fn new(precision: PrecisionChoice, decision: &BypassDecision, num_layers: usize) -> Self {
        Self {
            cache_hits: 0,
            cache_misses: 0,
            layers_skipped: BTreeSet::new(),
            precision_tier: precision.tier,
            efficiency: precision.efficiency,
            throughput_multiplier: precision.throughput_multiplier,
            signature: decision.signature,
            bypass_active: decision.active,
            layer_outcomes: Vec::with_capacity(num_layers),
            elapsed_per_layer: Vec::with_capacity(num_layers),
            attention: AttentionStats::default(),
            total_elapsed: Duration::ZERO,
        }
    }

    pub fn record_layer(&mut self, layer: usize, outcome: LayerOutcome, elapsed: Duration) {
        match outcome {
            LayerOutcome::Cached => self.cache_hits += 1,
            LayerOutcome::Bypassed => {
                self.cache_misses += 1;
                self.layers_skipped.insert(layer);
            }
            LayerOutcome::Computed => self.cache_misses += 1,
        }
        self.layer_outcomes.push(outcome);
        self.elapsed_per_layer.push(elapsed);
    }

    pub fn layers_computed(&self) -> usize {
        self.count(LayerOutcome::Computed)
    }

    pub fn count(&self, outcome: LayerOutcome) -> usize {
        self.layer_outcomes.iter().filter(|&&o| o == outcome).count()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Fraction of layers that did no work (cached or bypassed).
    pub fn skip_fraction(&self) -> f64 {
        let n = self.layer_outcomes.len();
        if n == 0 {
            0.0
        } else {
            (n - self.layers_computed()) as f64 / n as f64
        }
    }
}

/// Totals across every pass of one scheduler.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub forward_calls: u64,
    pub layers_bypassed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub attention: AttentionStats,
    pub total_time: Duration,
    /// Estimated time the bypass saved: `t·n/(n − skipped) − t`.
    pub time_saved: Duration,
}

impl RuntimeStats {
    pub fn record(&mut self, telemetry: &Telemetry) {
        self.forward_calls += 1;
        self.layers_bypassed += telemetry.layers_skipped.len() as u64;
        self.cache_hits += telemetry.cache_hits as u64;
        self.cache_misses += telemetry.cache_misses as u64;
        self.attention.merge(telemetry.attention);
        self.total_time += telemetry.total_elapsed;

        let n = telemetry.layer_outcomes.len();
        let skipped = telemetry.layers_skipped.len();
        if telemetry.bypass_active && skipped > 0 && skipped < n {
            let full = telemetry
                .total_elapsed
                .mul_f64(n as f64 / (n - skipped) as f64);
            self.time_saved += full.saturating_sub(telemetry.total_elapsed);
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
