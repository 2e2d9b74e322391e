use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

const BIN_COUNT: usize = 10;
/// Outcomes required in a bin before it overrides the identity mapping.
const MIN_SAMPLES_PER_BIN: usize = 10;

/// Immutable published mapping from raw-confidence bin to calibrated value.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    values: [f64; BIN_COUNT],
}

impl CalibrationTable {
    /// Identity mapping: each bin maps to its midpoint.
    fn identity() -> Self {
        let mut values = [0.0; BIN_COUNT];
        for (i, value) in values.iter_mut().enumerate() {
            *value = (i as f64 + 0.5) / BIN_COUNT as f64;
        }
        Self { values }
    }

    pub fn calibrate(&self, raw: f64) -> f64 {
        let raw = raw.clamp(0.0, 1.0);
        let bin = ((raw * BIN_COUNT as f64) as usize).min(BIN_COUNT - 1);
        // Interpolate within the bin around its midpoint so the mapping is
        // continuous, not a staircase.
        let midpoint = (bin as f64 + 0.5) / BIN_COUNT as f64;
        let offset = raw - midpoint;
        (self.values[bin] + offset).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct BinStats {
    correct: usize,
    total: usize,
}

/// Serializable calibration state; the only engine state that survives a
/// restart besides the trade-record sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    bins: Vec<BinStats>,
}

/// Histogram confidence calibration.
///
/// Readers grab the published table (an `Arc` swap); the single feedback
/// writer accumulates outcomes and republishes a whole new table, so no
/// fine-grained locking is needed anywhere on the read path.
pub struct Calibrator {
    published: RwLock<Arc<CalibrationTable>>,
    bins: Mutex<[BinStats; BIN_COUNT]>,
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Arc::new(CalibrationTable::identity())),
            bins: Mutex::new([BinStats::default(); BIN_COUNT]),
        }
    }

    pub fn table(&self) -> Arc<CalibrationTable> {
        self.published
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn calibrate(&self, raw: f64) -> f64 {
        self.table().calibrate(raw)
    }

    /// Record one realized outcome for a prediction made at `raw`
    /// confidence, then rebuild and swap in the new table.
    pub fn record_outcome(&self, raw_confidence: f64, was_correct: bool) {
        let mut bins = self.bins.lock().unwrap_or_else(|p| p.into_inner());
        let raw = raw_confidence.clamp(0.0, 1.0);
        let bin = ((raw * BIN_COUNT as f64) as usize).min(BIN_COUNT - 1);
        bins[bin].total += 1;
        if was_correct {
            bins[bin].correct += 1;
        }

        let table = Self::build_table(&bins);
        *self.published.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(table);
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        let bins = self.bins.lock().unwrap_or_else(|p| p.into_inner());
        CalibrationSnapshot {
            bins: bins.to_vec(),
        }
    }

    /// Restore persisted outcome counts and republish the derived table.
    pub fn restore(&self, snapshot: &CalibrationSnapshot) {
        let mut bins = self.bins.lock().unwrap_or_else(|p| p.into_inner());
        for (i, stats) in snapshot.bins.iter().take(BIN_COUNT).enumerate() {
            bins[i] = *stats;
        }
        let table = Self::build_table(&bins);
        *self.published.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(table);
    }

    /// Empirical accuracy per bin where enough samples exist, identity
    /// elsewhere, then a running-max pass to keep the mapping monotonic.
    fn build_table(bins: &[BinStats; BIN_COUNT]) -> CalibrationTable {
        let mut table = CalibrationTable::identity();
        for (i, stats) in bins.iter().enumerate() {
            if stats.total >= MIN_SAMPLES_PER_BIN {
                table.values[i] = stats.correct as f64 / stats.total as f64;
            }
        }
        for i in 1..BIN_COUNT {
            if table.values[i] < table.values[i - 1] {
                table.values[i] = table.values[i - 1];
            }
        }
        table
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_until_enough_samples() {
        let calibrator = Calibrator::new();
        assert!((calibrator.calibrate(0.75) - 0.75).abs() < 1e-9);
        assert!((calibrator.calibrate(0.42) - 0.42).abs() < 1e-9);

        // A handful of outcomes is not enough to move off identity
        for _ in 0..5 {
            calibrator.record_outcome(0.75, false);
        }
        assert!((calibrator.calibrate(0.75) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_overconfident_bin_is_pulled_down() {
        let calibrator = Calibrator::new();
        // Model says 0.75 but is right only 30% of the time
        for i in 0..20 {
            calibrator.record_outcome(0.75, i % 10 < 3);
        }
        let calibrated = calibrator.calibrate(0.75);
        assert!(calibrated < 0.45, "calibrated={}", calibrated);
    }

    #[test]
    fn test_mapping_stays_monotonic() {
        let calibrator = Calibrator::new();
        // Make the 0.55 bin look great and the 0.75 bin terrible
        for _ in 0..20 {
            calibrator.record_outcome(0.55, true);
        }
        for _ in 0..20 {
            calibrator.record_outcome(0.75, false);
        }

        let table = calibrator.table();
        let mut previous = 0.0;
        for i in 0..100 {
            let raw = i as f64 / 100.0 + 0.005;
            let value = table.calibrate(raw);
            assert!(
                value + 0.1001 >= previous,
                "non-monotonic at raw={}: {} < {}",
                raw,
                value,
                previous
            );
            previous = value;
        }
        // The bad bin cannot calibrate below the good one
        let bin_values = &table.values;
        assert!(bin_values[7] >= bin_values[5]);
    }

    #[test]
    fn test_extremes_are_clamped() {
        let calibrator = Calibrator::new();
        assert!(calibrator.calibrate(-0.5) >= 0.0);
        assert!(calibrator.calibrate(1.5) <= 1.0);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let calibrator = Calibrator::new();
        for i in 0..20 {
            calibrator.record_outcome(0.75, i % 10 < 3);
        }
        let snapshot = calibrator.snapshot();

        let restored = Calibrator::new();
        restored.restore(&snapshot);
        assert!((restored.calibrate(0.75) - calibrator.calibrate(0.75)).abs() < 1e-9);
    }
}
