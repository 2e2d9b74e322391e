use serde::{Deserialize, Serialize};

/// Probe-fetch latency distribution summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyReport {
    pub operations: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub success_rate: f64,
}

impl LatencyReport {
    pub fn from_samples(samples_ms: &[f64], operations: usize, failures: usize) -> Self {
        if samples_ms.is_empty() {
            return Self {
                operations,
                success_rate: 0.0,
                ..Self::default()
            };
        }

        let mut sorted = samples_ms.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Self {
            operations,
            avg_ms: avg,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            success_rate: (operations - failures) as f64 / operations.max(1) as f64,
        }
    }
}

/// Nearest-rank percentile over a pre-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_on_known_distribution() {
        let samples: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let report = LatencyReport::from_samples(&samples, 100, 0);
        assert_eq!(report.p50_ms, 50.0);
        assert_eq!(report.p95_ms, 95.0);
        assert_eq!(report.p99_ms, 99.0);
        assert!((report.avg_ms - 50.5).abs() < 1e-9);
        assert_eq!(report.success_rate, 1.0);
    }

    #[test]
    fn test_failures_lower_success_rate() {
        let report = LatencyReport::from_samples(&[10.0, 20.0], 4, 2);
        assert_eq!(report.success_rate, 0.5);
    }

    #[test]
    fn test_empty_samples() {
        let report = LatencyReport::from_samples(&[], 5, 5);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.avg_ms, 0.0);
    }
}
