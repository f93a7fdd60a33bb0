//! Endpoint call metrics
//!
//! Tracks latency percentiles and success rates per endpoint family. Every
//! gated attempt is one sample, retries included.

use crate::types::EndpointFamily;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep for metrics calculation
const MAX_SAMPLES: usize = 100;

/// Metrics for a single endpoint family
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointMetrics {
    pub family: EndpointFamily,
    /// 50th percentile latency in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    /// Total number of attempts tracked
    pub total_requests: u64,
    /// Number of failed attempts
    pub failed_requests: u64,
}

impl EndpointMetrics {
    /// Creates metrics with no data
    pub fn empty(family: EndpointFamily) -> Self {
        Self {
            family,
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct Counters {
    samples: VecDeque<LatencySample>,
    total_requests: u64,
    failed_requests: u64,
}

/// Collects and computes metrics for one endpoint family
#[derive(Debug)]
pub struct MetricsCollector {
    family: EndpointFamily,
    counters: RwLock<Counters>,
}

impl MetricsCollector {
    pub fn new(family: EndpointFamily) -> Self {
        Self {
            family,
            counters: RwLock::new(Counters {
                samples: VecDeque::with_capacity(MAX_SAMPLES),
                ..Counters::default()
            }),
        }
    }

    /// Records an attempt with its duration and outcome
    pub async fn record_request(&self, duration: Duration, success: bool) {
        let mut counters = self.counters.write().await;
        counters.total_requests += 1;
        if !success {
            counters.failed_requests += 1;
        }

        if counters.samples.len() >= MAX_SAMPLES {
            counters.samples.pop_front();
        }
        counters.samples.push_back(LatencySample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            success,
        });
    }

    /// Computes current metrics from collected samples
    pub async fn get_metrics(&self) -> EndpointMetrics {
        let counters = self.counters.read().await;
        if counters.samples.is_empty() {
            return EndpointMetrics::empty(self.family);
        }

        let mut latencies: Vec<f64> = counters
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let total = counters.total_requests;
        let failed = counters.failed_requests;

        EndpointMetrics {
            family: self.family,
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate: (total - failed) as f64 / total as f64,
            total_requests: total,
            failed_requests: failed,
        }
    }
}

/// One collector per endpoint family
#[derive(Debug, Clone)]
pub struct FamilyMetrics {
    listing: Arc<MetricsCollector>,
    global: Arc<MetricsCollector>,
    ticker: Arc<MetricsCollector>,
}

impl Default for FamilyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FamilyMetrics {
    pub fn new() -> Self {
        Self {
            listing: Arc::new(MetricsCollector::new(EndpointFamily::Listing)),
            global: Arc::new(MetricsCollector::new(EndpointFamily::Global)),
            ticker: Arc::new(MetricsCollector::new(EndpointFamily::Ticker)),
        }
    }

    pub fn collector(&self, family: EndpointFamily) -> &MetricsCollector {
        match family {
            EndpointFamily::Listing => &self.listing,
            EndpointFamily::Global => &self.global,
            EndpointFamily::Ticker => &self.ticker,
        }
    }

    /// Snapshot of every family, in listing/global/ticker order
    pub async fn snapshot(&self) -> Vec<EndpointMetrics> {
        let mut result = Vec::with_capacity(3);
        for family in EndpointFamily::all() {
            result.push(self.collector(*family).get_metrics().await);
        }
        result
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_collector() {
        let collector = MetricsCollector::new(EndpointFamily::Ticker);

        collector.record_request(Duration::from_millis(100), true).await;
        collector.record_request(Duration::from_millis(200), true).await;
        collector.record_request(Duration::from_millis(150), false).await;

        let metrics = collector.get_metrics().await;

        assert_eq!(metrics.family, EndpointFamily::Ticker);
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert!(metrics.success_rate > 0.6 && metrics.success_rate < 0.7);
    }

    #[tokio::test]
    async fn test_family_metrics_are_independent() {
        let metrics = FamilyMetrics::new();
        metrics
            .collector(EndpointFamily::Global)
            .record_request(Duration::from_millis(10), true)
            .await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot[0], EndpointMetrics::empty(EndpointFamily::Listing));
        assert_eq!(snapshot[1].total_requests, 1);
        assert_eq!(snapshot[2].total_requests, 0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert_eq!(percentile(&values, 50.0), 5.0);
        assert_eq!(percentile(&values, 99.0), 9.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
