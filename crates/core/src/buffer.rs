//! Rolling raw-signal buffer fed by the ROI sampler

use ndarray::Array2;

/// Append-only rolling store of per-frame ROI color means, timestamps
/// and rescan flags. The three columns always share their length.
#[derive(Debug, Default)]
pub struct SignalBuffer {
    samples: Vec<[f64; 3]>,
    timestamps: Vec<i64>,
    rescans: Vec<u8>,
}

impl SignalBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.timestamps.clear();
        self.rescans.clear();
    }

    /// Append one sample, keeping all three columns in lockstep.
    pub fn push(&mut self, sample: [f64; 3], timestamp: i64, rescan: bool) {
        self.samples.push(sample);
        self.timestamps.push(timestamp);
        self.rescans.push(u8::from(rescan));
        debug_assert!(
            self.samples.len() == self.timestamps.len()
                && self.samples.len() == self.rescans.len()
        );
    }

    /// Drop rows from the head while the length exceeds `limit` samples.
    /// Returns how many rows were evicted.
    pub fn evict_to_limit(&mut self, limit: f64) -> usize {
        let mut drop = 0usize;
        while (self.len() - drop) as f64 > limit {
            drop += 1;
        }
        if drop > 0 {
            self.samples.drain(..drop);
            self.timestamps.drain(..drop);
            self.rescans.drain(..drop);
        }
        drop
    }

    /// The raw N×3 signal matrix (columns B, G, R).
    #[must_use]
    pub fn signal_matrix(&self) -> Array2<f64> {
        let n = self.samples.len();
        let mut matrix = Array2::zeros((n, 3));
        for (i, sample) in self.samples.iter().enumerate() {
            for c in 0..3 {
                matrix[[i, c]] = sample[c];
            }
        }
        matrix
    }

    #[must_use]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    #[must_use]
    pub fn rescans(&self) -> &[u8] {
        &self.rescans
    }
}
