//! Signal-processing primitives for pulse extraction
//!
//! The building blocks shared by the rPPG extractors: per-column
//! normalization, jump-aware denoising around re-detect boundaries,
//! smoothness-prior detrending, moving average, FFT-based bandpass and
//! spectrum conversions, and in-band PCA component selection.
//!
//! All primitives consume borrowed arrays and return fresh outputs; no
//! hidden state. Signals are column vectors (`Array1<f64>`) or N×3
//! channel matrices (`Array2<f64>`).
//!
//! # Example
//! ```
//! use ndarray::Array1;
//! use rppg_dsp::{moving_average, power_spectrum};
//!
//! let signal = Array1::from_iter((0..64).map(|i| (i as f64 * 0.4).sin()));
//! let smoothed = moving_average(&signal, 3, 2);
//! let spectrum = power_spectrum(&smoothed);
//! assert_eq!(spectrum.len(), signal.len());
//! ```

mod filters;
mod pca;
mod spectrum;

pub use filters::{denoise, detrend, moving_average, normalize};
pub use pca::pca_component;
pub use spectrum::{
    band_limits, bandpass, estimate_fps, frequency_to_time, power_spectrum, time_to_frequency,
};

/// Lower edge of the physiological heart-rate band, in beats per minute.
pub const LOW_BPM: f64 = 42.0;
/// Upper edge of the physiological heart-rate band, in beats per minute.
pub const HIGH_BPM: f64 = 240.0;
/// Seconds per minute, for BPM conversions.
pub const SEC_PER_MIN: f64 = 60.0;
