//! Demo driver: builds a seeded random model and runs repeated forward passes
//! over one input, logging what the cache and bypass did on each pass.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing_subscriber::EnvFilter;

use relevance_runtime::runtime::clock::MonotonicClock;
use relevance_runtime::runtime::monitor::RuntimeMonitor;
use relevance_runtime::{InferenceScheduler, Model, RuntimeConfig};

/// Relevance-driven inference runtime demo.
#[derive(Parser, Debug)]
#[command(
    name = "relevance-runtime",
    about = "Run forward passes through the relevance-driven cache and bypass",
    version
)]
struct Cli {
    /// JSON config file; fields not given take their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of layers (overrides the config file).
    #[arg(long)]
    layers: Option<usize>,

    /// Hidden width (overrides the config file).
    #[arg(long)]
    d_model: Option<usize>,

    /// Attention heads (overrides the config file).
    #[arg(long)]
    heads: Option<usize>,

    /// Bypass threshold in (0, 1) (overrides the config file).
    #[arg(long)]
    threshold: Option<f64>,

    /// Tokens per input.
    #[arg(short = 't', long, default_value_t = 32)]
    seq_len: usize,

    /// Forward passes to run over the same input.
    #[arg(short = 'n', long, default_value_t = 4)]
    passes: usize,

    /// Clarity in [0, 1]; picks the precision tier.
    #[arg(long)]
    clarity: Option<f64>,

    /// Seed for weights and input.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Print a health report after the passes.
    #[arg(long, default_value_t = false)]
    health: bool,

    /// Print each pass's telemetry as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_json_file(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(layers) = cli.layers {
        config.num_layers = layers;
    }
    if let Some(d_model) = cli.d_model {
        config.d_model = d_model;
    }
    if let Some(heads) = cli.heads {
        config.num_heads = heads;
    }
    if let Some(threshold) = cli.threshold {
        config.bypass_threshold = threshold;
    }
    config.validate().context("invalid runtime configuration")?;

    tracing::info!("relevance-runtime v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Config: {} layers, d_model={}, heads={}, cache={}, threshold={:.3}",
        config.num_layers,
        config.d_model,
        config.num_heads,
        config.cache_capacity,
        config.bypass_threshold,
    );

    let model = Arc::new(Model::random(&config, cli.seed));
    tracing::info!("Model: {} parameters", model.param_count());

    let mut rng = StdRng::seed_from_u64(cli.seed.wrapping_add(1));
    let input = Array2::from_shape_fn((cli.seq_len, config.d_model), |_| {
        rng.sample::<f32, _>(StandardNormal)
    });

    let mut scheduler = InferenceScheduler::new(config, model).context("building scheduler")?;
    if let Some(clarity) = cli.clarity {
        scheduler.set_clarity(clarity);
    }

    let clock = MonotonicClock::new();
    let mut monitor = RuntimeMonitor::default();

    for pass in 0..cli.passes {
        let (_, telemetry) = scheduler.forward_with_clock(&input, &clock);
        monitor.record(&telemetry);

        tracing::info!(
            "pass {}: hits={} misses={} skipped={:?} tier={} S={:.3} in {:.2} ms",
            pass,
            telemetry.cache_hits,
            telemetry.cache_misses,
            telemetry.layers_skipped,
            telemetry.precision_tier,
            telemetry.signature,
            telemetry.total_elapsed.as_secs_f64() * 1000.0,
        );

        if cli.json {
            let line = serde_json::to_string(&telemetry).context("serialising telemetry")?;
            println!("{line}");
        }
    }

    let stats = scheduler.stats();
    tracing::info!(
        "Totals: {} passes, {} layers bypassed, cache hit rate {:.1}%, est. {:.2} ms saved",
        stats.forward_calls,
        stats.layers_bypassed,
        stats.cache_hit_rate() * 100.0,
        stats.time_saved.as_secs_f64() * 1000.0,
    );
    tracing::info!("Cache: {}", scheduler.cache().stats());

    if cli.health {
        let report = monitor.report();
        tracing::info!("Health: {}", report.status);
        tracing::info!("  Avg latency: {:.2} ms", report.avg_latency_ms);
        tracing::info!("  P99 latency: {:.2} ms", report.p99_latency_ms);
        tracing::info!("  Max latency: {:.2} ms", report.max_latency_ms);
        tracing::info!("  Avg skip fraction: {:.2}", report.avg_skip_fraction);
        tracing::info!("  Low-relevance tokens: {:.1}%", report.avg_low_relevance * 100.0);
        if cli.json {
            println!("{}", serde_json::to_string(&report).context("serialising report")?);
        }
    }

    Ok(())
}
