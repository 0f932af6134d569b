//! Statistical primitives used by the workers and the result rollups.
//!
//! Everything here is a pure function of its inputs. Latencies are reported
//! in milliseconds, matching the units of the result document.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency measurement types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyType {
    /// Time spent in the publish call until the broker acknowledged it
    Publish,
    /// Time between the embedded send timestamp and the subscriber's receive time
    Forward,
}

/// Min/max/mean/sample standard deviation over one set of samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl SampleStats {
    /// Summarize `values`; an empty slice yields all zeros
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        Self {
            count: values.len(),
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            mean: mean(values),
            std_dev: sample_std_dev(values),
        }
    }
}

/// Arithmetic mean, `0.0` for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation with Bessel's correction (divisor `n - 1`).
///
/// Fewer than two values carry no spread information and yield `0.0`.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let sum_sq: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// `numerator / denominator`, or `0.0` when the denominator is zero
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Messages per second over `elapsed`
pub fn throughput(messages: u64, elapsed: Duration) -> f64 {
    ratio(messages as f64, elapsed.as_secs_f64())
}

/// Convert a duration to fractional milliseconds
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

/// Collects latency samples for one worker
#[derive(Debug, Clone)]
pub struct LatencyCollector {
    latency_type: LatencyType,
    samples_ms: Vec<f64>,
}

impl LatencyCollector {
    pub fn new(latency_type: LatencyType) -> Self {
        Self {
            latency_type,
            samples_ms: Vec::new(),
        }
    }

    /// Pre-size the sample buffer for an expected number of messages
    pub fn with_capacity(latency_type: LatencyType, capacity: usize) -> Self {
        Self {
            latency_type,
            samples_ms: Vec::with_capacity(capacity),
        }
    }

    /// Record a latency measurement
    pub fn record(&mut self, latency: Duration) {
        self.samples_ms.push(as_millis_f64(latency));
    }

    pub fn latency_type(&self) -> LatencyType {
        self.latency_type
    }

    pub fn sample_count(&self) -> usize {
        self.samples_ms.len()
    }

    /// Summarize the recorded samples
    pub fn stats(&self) -> SampleStats {
        SampleStats::from_values(&self.samples_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sample_std_dev_uses_bessel_correction() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // Population std dev of this set is 2.0; the sample std dev is sqrt(32/7).
        assert!(approx_eq(sample_std_dev(&values), (32.0f64 / 7.0).sqrt()));
        assert!(approx_eq(mean(&values), 5.0));
    }

    #[test]
    fn test_degenerate_inputs_do_not_fault() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[42.0]), 0.0);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(SampleStats::from_values(&[]), SampleStats::default());
    }

    #[test]
    fn test_sample_stats() {
        let stats = SampleStats::from_values(&[1.2, 0.5, 3.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 0.5);
        assert_eq!(stats.max, 3.0);
        assert!(approx_eq(stats.mean, 1.5666666666666667));
        assert!(stats.std_dev > 0.0);
    }

    #[test]
    fn test_ratio_guards_zero_denominator() {
        assert_eq!(ratio(5.0, 0.0), 0.0);
        assert_eq!(ratio(0.0, 0.0), 0.0);
        assert_eq!(ratio(80.0, 100.0), 0.8);
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(100, Duration::from_secs(2)), 50.0);
        assert_eq!(throughput(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_latency_collector() {
        let mut collector = LatencyCollector::new(LatencyType::Forward);

        collector.record(Duration::from_millis(1));
        collector.record(Duration::from_millis(2));
        collector.record(Duration::from_millis(3));

        let stats = collector.stats();
        assert_eq!(collector.latency_type(), LatencyType::Forward);
        assert_eq!(collector.sample_count(), 3);
        assert!(approx_eq(stats.min, 1.0));
        assert!(approx_eq(stats.max, 3.0));
        assert!(approx_eq(stats.mean, 2.0));
        assert!(approx_eq(stats.std_dev, 1.0));
    }
}
