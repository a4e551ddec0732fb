//! Frequency-domain conversions, bandpass filtering and fps estimation

use ndarray::Array1;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::{HIGH_BPM, LOW_BPM, SEC_PER_MIN};

/// Forward DFT of a real signal.
#[must_use]
pub fn time_to_frequency(a: &Array1<f64>) -> Vec<Complex<f64>> {
    let mut buffer: Vec<Complex<f64>> = a.iter().map(|&v| Complex::new(v, 0.0)).collect();
    if buffer.is_empty() {
        return buffer;
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(buffer.len());
    fft.process(&mut buffer);
    buffer
}

/// Inverse DFT, scaled by `1/N`, keeping the real part.
#[must_use]
pub fn frequency_to_time(spectrum: &[Complex<f64>]) -> Array1<f64> {
    let n = spectrum.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let mut buffer = spectrum.to_vec();
    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(n);
    ifft.process(&mut buffer);
    let scale = 1.0 / n as f64;
    Array1::from_iter(buffer.iter().map(|c| c.re * scale))
}

/// Squared DFT magnitudes, full length `N` (bin `k` maps to frequency
/// `k * fps / N`).
#[must_use]
pub fn power_spectrum(a: &Array1<f64>) -> Array1<f64> {
    let spectrum = time_to_frequency(a);
    Array1::from_iter(spectrum.iter().map(Complex::norm_sqr))
}

/// Zero every spectral bin outside `[low, high]`, then transform back.
///
/// The conjugate mirror of the passband is preserved so the output stays
/// a real signal.
#[must_use]
pub fn bandpass(a: &Array1<f64>, low: usize, high: usize) -> Array1<f64> {
    let n = a.len();
    if n == 0 {
        return a.clone();
    }
    let mut spectrum = time_to_frequency(a);
    for (k, bin) in spectrum.iter_mut().enumerate() {
        let mirror = if k == 0 { 0 } else { n - k };
        let in_band = (k >= low && k <= high) || (mirror >= low && mirror <= high);
        if !in_band {
            *bin = Complex::new(0.0, 0.0);
        }
    }
    frequency_to_time(&spectrum)
}

/// Estimate frames per second from millisecond timestamps.
///
/// `N / ((t[N-1] - t[0]) * time_base)`; falls back to `fallback` when
/// fewer than two samples are present or the span is degenerate.
#[must_use]
pub fn estimate_fps(timestamps: &[i64], time_base: f64, fallback: f64) -> f64 {
    if timestamps.len() < 2 {
        return fallback;
    }
    let span = (timestamps[timestamps.len() - 1] - timestamps[0]) as f64 * time_base;
    if span <= 0.0 {
        return fallback;
    }
    timestamps.len() as f64 / span
}

/// Spectral band indices covering the physiological heart-rate range.
///
/// `low = floor(N * 42 / 60 / fps)`, `high = floor(N * 240 / 60 / fps) + 1`.
#[must_use]
pub fn band_limits(n: usize, fps: f64) -> (usize, usize) {
    if n == 0 || fps <= 0.0 {
        return (0, 0);
    }
    let low = (n as f64 * LOW_BPM / SEC_PER_MIN / fps).floor() as usize;
    let high = (n as f64 * HIGH_BPM / SEC_PER_MIN / fps).floor() as usize + 1;
    (low, high)
}
