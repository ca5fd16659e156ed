//! Rolling health metrics over forward-pass telemetry.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::runtime::telemetry::Telemetry;

/// Health status levels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum HealthStatus {
    Healthy,
    /// A metric crossed its warning threshold.
    Degraded(String),
    /// A metric crossed its critical threshold.
    Critical(String),
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded(msg) => write!(f, "degraded ({msg})"),
            HealthStatus::Critical(msg) => write!(f, "critical ({msg})"),
        }
    }
}

/// Rolling window over one metric.
#[derive(Clone, Debug)]
pub struct MetricTracker {
    pub name: String,
    samples: VecDeque<f64>,
    max_samples: usize,
    warn: Option<f64>,
    critical: Option<f64>,
}

impl MetricTracker {
    pub fn new(name: &str, max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            name: name.to_string(),
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            warn: None,
            critical: None,
        }
    }

    /// Degraded at or above `warn`, critical at or above `critical`.
    pub fn with_thresholds(mut self, warn: f64, critical: f64) -> Self {
        self.warn = Some(warn);
        self.critical = Some(critical);
        self
    }

    pub fn record(&mut self, value: f64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (self.samples.len() - 1) as f64;
        var.sqrt()
    }

    /// Largest sample in the window; `None` when empty.
    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    pub fn p99(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut values: Vec<f64> = self.samples.iter().copied().collect();
        values.sort_by(f64::total_cmp);
        let idx = (values.len() as f64 * 0.99) as usize;
        values[idx.min(values.len() - 1)]
    }

    /// Status of the latest sample against the thresholds.
    pub fn status(&self) -> HealthStatus {
        let Some(val) = self.latest() else {
            return HealthStatus::Healthy;
        };
        if let Some(crit) = self.critical.filter(|&c| val >= c) {
            return HealthStatus::Critical(format!("{}: {:.3} >= critical {}", self.name, val, crit));
        }
        if let Some(warn) = self.warn.filter(|&w| val >= w) {
            return HealthStatus::Degraded(format!("{}: {:.3} >= warn {}", self.name, val, warn));
        }
        HealthStatus::Healthy
    }

    /// Latest sample more than three standard deviations from the mean.
    pub fn is_anomalous(&self) -> bool {
        match self.latest() {
            Some(val) => {
                let std = self.std_dev();
                std > 1e-12 && ((val - self.mean()) / std).abs() > 3.0
            }
            None => false,
        }
    }
}

/// Health view over a stream of passes.
#[derive(Clone, Debug)]
pub struct RuntimeMonitor {
    /// Pass latency (ms).
    pub latency: MetricTracker,
    /// Per-pass cache hit rate.
    pub cache_hit_rate: MetricTracker,
    /// Per-pass fraction of layers not computed.
    pub skip_fraction: MetricTracker,
    /// Low-relevance share of attended tokens.
    pub low_relevance: MetricTracker,
    pub passes: u64,
}

impl RuntimeMonitor {
    pub fn new(window: usize) -> Self {
        Self {
            latency: MetricTracker::new("latency_ms", window).with_thresholds(100.0, 500.0),
            cache_hit_rate: MetricTracker::new("cache_hit_rate", window),
            skip_fraction: MetricTracker::new("skip_fraction", window),
            low_relevance: MetricTracker::new("low_relevance", window)
                .with_thresholds(0.9, 0.99),
            passes: 0,
        }
    }

    pub fn record(&mut self, telemetry: &Telemetry) {
        self.passes += 1;
        self.latency
            .record(telemetry.total_elapsed.as_secs_f64() * 1000.0);
        self.cache_hit_rate.record(telemetry.cache_hit_rate());
        self.skip_fraction.record(telemetry.skip_fraction());
        if telemetry.attention.tokens_processed > 0 {
            self.low_relevance
                .record(telemetry.attention.low_relevance_rate());
        }
    }

    /// Worst status across the thresholded metrics.
    pub fn overall_status(&self) -> HealthStatus {
        let checks = [self.latency.status(), self.low_relevance.status()];
        if let Some(c) = checks.iter().find(|c| matches!(c, HealthStatus::Critical(_))) {
            return c.clone();
        }
        if let Some(d) = checks.iter().find(|c| matches!(c, HealthStatus::Degraded(_))) {
            return d.clone();
        }
        HealthStatus::Healthy
    }

    pub fn report(&self) -> MonitorReport {
        MonitorReport {
            status: self.overall_status(),
            passes: self.passes,
            avg_latency_ms: self.latency.mean(),
            p99_latency_ms: self.latency.p99(),
            max_latency_ms: self.latency.max().unwrap_or(0.0),
            latency_anomalous: self.latency.is_anomalous(),
            avg_cache_hit_rate: self.cache_hit_rate.mean(),
            avg_skip_fraction: self.skip_fraction.mean(),
            avg_low_relevance: self.low_relevance.mean(),
        }
    }
}

impl Default for RuntimeMonitor {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Snapshot of a [`RuntimeMonitor`].
#[derive(Clone, Debug, Serialize)]
pub struct MonitorReport {
    pub status: HealthStatus,
    pub passes: u64,
    pub avg_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub max_latency_ms: f64,
    pub latency_anomalous: bool,
    pub avg_cache_hit_rate: f64,
    pub avg_skip_fraction: f64,
    pub avg_low_relevance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::bypass::BypassDecision;
    use crate::control::precision::PrecisionSelector;
    use crate::runtime::telemetry::LayerOutcome;
    use std::time::Duration;

    fn telemetry(outcomes: &[LayerOutcome], millis: u64) -> Telemetry {
        let mut t = Telemetry::new(
            PrecisionSelector::default().select(0.5),
            &BypassDecision::closed(0.2),
            outcomes.len(),
        );
        for (i, &o) in outcomes.iter().enumerate() {
            t.record_layer(i, o, Duration::ZERO);
        }
        t.total_elapsed = Duration::from_millis(millis);
        t
    }

    #[test]
    fn test_metric_tracker_window() {
        let mut t = MetricTracker::new("test", 3);
        for i in 0..5 {
            t.record(i as f64);
        }
        assert_eq!(t.len(), 3);
        assert!((t.mean() - 3.0).abs() < 1e-12);
        assert_eq!(t.max(), Some(4.0));
        assert_eq!(t.latest(), Some(4.0));
    }

    #[test]
    fn test_empty_tracker() {
        let t = MetricTracker::new("empty", 4);
        assert!(t.is_empty());
        assert_eq!(t.max(), None);
        assert_eq!(t.latest(), None);
        assert_eq!(t.mean(), 0.0);
        assert_eq!(t.p99(), 0.0);
        assert_eq!(t.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_thresholds() {
        let mut t = MetricTracker::new("latency", 10).with_thresholds(50.0, 100.0);
        t.record(30.0);
        assert_eq!(t.status(), HealthStatus::Healthy);
        t.record(60.0);
        assert!(matches!(t.status(), HealthStatus::Degraded(_)));
        t.record(200.0);
        assert!(matches!(t.status(), HealthStatus::Critical(_)));
    }

    #[test]
    fn test_anomaly_detection() {
        let mut t = MetricTracker::new("test", 100);
        for i in 0..50 {
            t.record(10.0 + (i % 3) as f64 * 0.1);
        }
        assert!(!t.is_anomalous());
        t.record(1000.0);
        assert!(t.is_anomalous());
    }

    #[test]
    fn test_p99_and_std_dev() {
        let mut t = MetricTracker::new("test", 200);
        for i in 1..=100 {
            t.record(i as f64);
        }
        assert_eq!(t.p99(), 100.0);
        assert!(t.std_dev() > 0.0);

        let mut flat = MetricTracker::new("flat", 10);
        flat.record(5.0);
        flat.record(5.0);
        assert!(flat.std_dev() < 1e-12);
    }

    #[test]
    fn test_monitor_report() {
        use LayerOutcome::*;
        let mut mon = RuntimeMonitor::new(16);
        mon.record(&telemetry(&[Computed, Computed, Computed, Computed], 20));
        mon.record(&telemetry(&[Cached, Cached, Cached, Cached], 2));
        mon.record(&telemetry(&[Computed, Bypassed, Bypassed, Computed], 10));

        let report = mon.report();
        assert_eq!(report.passes, 3);
        assert!((report.avg_latency_ms - 32.0 / 3.0).abs() < 1e-9);
        assert!((report.avg_cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.avg_skip_fraction - 0.5).abs() < 1e-9);
        assert!((report.max_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_slow_pass_is_critical() {
        let mut mon = RuntimeMonitor::default();
        mon.record(&telemetry(&[LayerOutcome::Computed], 750));
        assert!(matches!(mon.overall_status(), HealthStatus::Critical(_)));
        assert!(mon.report().status.to_string().starts_with("critical"));
    }
}
