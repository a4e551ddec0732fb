//! Spectral heart-rate estimation with sampling-period aggregation

use ndarray::Array1;
use serde::Serialize;
use tracing::debug;

/// Aggregated BPM readings for the last completed sampling period.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BpmStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Per-frame spectral peak picker and per-period aggregator.
///
/// Each call appends one in-band BPM pick to the history; once a full
/// sampling period has elapsed the sorted history collapses into
/// mean/min/max and is cleared.
pub struct HeartRateEstimator {
    sampling_frequency: f64,
    time_base: f64,
    history: Vec<f64>,
    stats: BpmStats,
    last_sampling_time: i64,
}

impl HeartRateEstimator {
    #[must_use]
    pub fn new(sampling_frequency: f64, time_base: f64) -> Self {
        Self {
            sampling_frequency,
            time_base,
            history: Vec::new(),
            stats: BpmStats::default(),
            last_sampling_time: 0,
        }
    }

    /// Estimate the instantaneous BPM from the filtered signal and roll
    /// it into the running statistics. Returns the power spectrum.
    pub fn estimate(
        &mut self,
        filtered: &Array1<f64>,
        fps: f64,
        low: usize,
        high: usize,
        now: i64,
    ) -> Array1<f64> {
        let spectrum = rppg_dsp::power_spectrum(filtered);
        let n = filtered.len();

        if n > 0 && fps > 0.0 {
            let lo = low.min(n - 1);
            let hi = high.min(n - 1);
            let mut peak = lo;
            let mut peak_power = f64::NEG_INFINITY;
            for k in lo..=hi {
                if spectrum[k] > peak_power {
                    peak_power = spectrum[k];
                    peak = k;
                }
            }
            let bpm = peak as f64 * rppg_dsp::SEC_PER_MIN * fps / n as f64;
            self.history.push(bpm);
            debug!(bpm, peak, "instantaneous bpm pick");
        }

        let elapsed = (now - self.last_sampling_time) as f64 * self.time_base;
        if elapsed >= 1.0 / self.sampling_frequency {
            self.last_sampling_time = now;
            if !self.history.is_empty() {
                self.history
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mean = self.history.iter().sum::<f64>() / self.history.len() as f64;
                self.stats = BpmStats {
                    mean,
                    min: self.history[0],
                    max: self.history[self.history.len() - 1],
                };
                debug!(
                    mean = self.stats.mean,
                    min = self.stats.min,
                    max = self.stats.max,
                    samples = self.history.len(),
                    "sampling period flushed"
                );
                self.history.clear();
            }
        }

        spectrum
    }

    #[must_use]
    pub fn mean_bpm(&self) -> f64 {
        self.stats.mean
    }

    #[must_use]
    pub fn stats(&self) -> BpmStats {
        self.stats
    }

    /// Picks accumulated since the last flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinusoid(n: usize, cycles: f64) -> Array1<f64> {
        Array1::from_iter(
            (0..n).map(|i| (2.0 * std::f64::consts::PI * cycles * i as f64 / n as f64).sin()),
        )
    }

    #[test]
    fn test_pick_matches_signal_frequency() {
        // 256 samples at 30 fps, 16 cycles -> 1.875 Hz -> 112.5 BPM.
        let mut estimator = HeartRateEstimator::new(1.0, 0.001);
        let signal = sinusoid(256, 16.0);
        let (low, high) = rppg_dsp::band_limits(256, 30.0);
        estimator.estimate(&signal, 30.0, low, high, 2000);
        // 2 seconds elapsed since time zero: the single pick flushed.
        let expected = 16.0 * 60.0 * 30.0 / 256.0;
        assert!((estimator.mean_bpm() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_pick_never_leaves_band() {
        // The global spectral maximum sits at DC, outside the band
        // [1, 9]; the pick must land on the in-band bin 6 instead.
        let n = 20;
        let fps = 10.0;
        let signal = sinusoid(n, 6.0) + 10.0;
        let (low, high) = rppg_dsp::band_limits(n, fps);
        assert_eq!((low, high), (1, 9));

        let mut estimator = HeartRateEstimator::new(1.0, 0.001);
        estimator.estimate(&signal, fps, low, high, 2000);
        let expected = 6.0 * 60.0 * fps / n as f64;
        assert!((estimator.mean_bpm() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_flush_only_after_sampling_period() {
        let mut estimator = HeartRateEstimator::new(1.0, 0.001);
        let signal = sinusoid(128, 10.0);
        let (low, high) = rppg_dsp::band_limits(128, 30.0);

        // First call flushes (a full period since time zero) and seeds
        // the statistics.
        estimator.estimate(&signal, 30.0, low, high, 1000);
        let first = estimator.mean_bpm();
        assert!(first > 0.0);
        assert_eq!(estimator.pending(), 0);

        // Within the next period the history accumulates without
        // touching the stats.
        estimator.estimate(&signal, 30.0, low, high, 1300);
        estimator.estimate(&signal, 30.0, low, high, 1600);
        assert_eq!(estimator.pending(), 2);
        assert!((estimator.mean_bpm() - first).abs() < 1e-12);

        // Crossing the period boundary flushes again.
        estimator.estimate(&signal, 30.0, low, high, 2000);
        assert_eq!(estimator.pending(), 0);
    }

    #[test]
    fn test_stats_min_max_ordering() {
        let mut estimator = HeartRateEstimator::new(1.0, 0.001);
        let (low, high) = rppg_dsp::band_limits(128, 30.0);
        estimator.estimate(&sinusoid(128, 10.0), 30.0, low, high, 100);
        estimator.estimate(&sinusoid(128, 12.0), 30.0, low, high, 400);
        estimator.estimate(&sinusoid(128, 8.0), 30.0, low, high, 1200);
        let stats = estimator.stats();
        assert!(stats.min <= stats.mean && stats.mean <= stats.max);
        assert!(stats.min < stats.max);
    }

    #[test]
    fn test_empty_signal_is_harmless() {
        let mut estimator = HeartRateEstimator::new(1.0, 0.001);
        let spectrum = estimator.estimate(&Array1::zeros(0), 30.0, 0, 0, 50);
        assert_eq!(spectrum.len(), 0);
        assert_eq!(estimator.pending(), 0);
        assert_eq!(estimator.mean_bpm(), 0.0);
    }
}
