//! The three pulse-signal extractors
//!
//! All variants share the denoise → normalize → detrend → moving-average
//! chain; they differ in which columns they consume and how channels are
//! combined. Buffer columns are B, G, R.

use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::EngineError;

/// Regularization of the smoothness-prior detrend step.
pub const DETREND_LAMBDA: f64 = 1000.0;
/// Moving-average kernel width in samples.
const SMOOTHING_KERNEL: usize = 3;

/// Which chromatic demixing algorithm recovers the pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RppgAlgorithm {
    /// Green channel only.
    G,
    /// Principal component with the strongest in-band spectrum.
    Pca,
    /// Chrominance projection `X - alpha * Y`.
    XMinAY,
}

impl FromStr for RppgAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "g" => Ok(RppgAlgorithm::G),
            "pca" => Ok(RppgAlgorithm::Pca),
            "xminay" => Ok(RppgAlgorithm::XMinAY),
            other => Err(EngineError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Number of moving-average passes for the current framerate.
#[must_use]
pub fn smoothing_passes(fps: f64) -> usize {
    ((fps / 6.0).floor() as usize).max(2)
}

/// Turn the raw buffer contents into the filtered 1-D pulse signal.
#[must_use]
pub fn extract_signal(
    algorithm: RppgAlgorithm,
    raw: &Array2<f64>,
    rescans: &[u8],
    fps: f64,
    low: usize,
    high: usize,
) -> Array1<f64> {
    let passes = smoothing_passes(fps);
    match algorithm {
        RppgAlgorithm::G => {
            let green = raw.slice(s![.., 1..2]).to_owned();
            let denoised = rppg_dsp::denoise(&green, rescans);
            let normalized = rppg_dsp::normalize(&denoised);
            let detrended = rppg_dsp::detrend(&normalized.column(0).to_owned(), DETREND_LAMBDA);
            rppg_dsp::moving_average(&detrended, SMOOTHING_KERNEL, passes)
        }
        RppgAlgorithm::Pca => {
            let denoised = rppg_dsp::denoise(raw, rescans);
            let normalized = rppg_dsp::normalize(&denoised);
            let mut detrended = Array2::zeros(normalized.dim());
            for (c, column) in normalized.axis_iter(Axis(1)).enumerate() {
                let out = rppg_dsp::detrend(&column.to_owned(), DETREND_LAMBDA);
                detrended.column_mut(c).assign(&out);
            }
            let component = rppg_dsp::pca_component(&detrended, low, high);
            rppg_dsp::moving_average(&component, SMOOTHING_KERNEL, passes)
        }
        RppgAlgorithm::XMinAY => {
            let denoised = rppg_dsp::denoise(raw, rescans);
            let normalized = rppg_dsp::normalize(&denoised);
            let n = normalized.nrows();

            // Chrominance projections; columns are B(0), G(1), R(2).
            let x_s = Array1::from_iter(
                (0..n).map(|i| 3.0 * normalized[[i, 2]] - 2.0 * normalized[[i, 1]]),
            );
            let y_s = Array1::from_iter((0..n).map(|i| {
                1.5 * normalized[[i, 2]] + normalized[[i, 1]] - 1.5 * normalized[[i, 0]]
            }));

            let x_f = rppg_dsp::bandpass(&x_s, low, high);
            let y_f = rppg_dsp::bandpass(&y_s, low, high);

            let sigma_x = std_dev(&x_f);
            let sigma_y = std_dev(&y_f);
            let alpha = if sigma_y > f64::EPSILON {
                sigma_x / sigma_y
            } else {
                warn!("flat Y chrominance signal, skipping alpha correction");
                0.0
            };

            let pulse = Array1::from_iter(
                x_f.iter().zip(y_f.iter()).map(|(x, y)| x - alpha * y),
            );
            rppg_dsp::moving_average(&pulse, SMOOTHING_KERNEL, passes)
        }
    }
}

fn std_dev(a: &Array1<f64>) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = a.sum() / n;
    (a.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PI2: f64 = 2.0 * std::f64::consts::PI;

    fn peak_bin(signal: &Array1<f64>, upper: usize) -> usize {
        let spectrum = rppg_dsp::power_spectrum(signal);
        spectrum
            .iter()
            .take(upper)
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(k, _)| k)
            .unwrap()
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("g".parse::<RppgAlgorithm>().unwrap(), RppgAlgorithm::G);
        assert_eq!("pca".parse::<RppgAlgorithm>().unwrap(), RppgAlgorithm::Pca);
        assert_eq!(
            "xminay".parse::<RppgAlgorithm>().unwrap(),
            RppgAlgorithm::XMinAY
        );
        assert!("green".parse::<RppgAlgorithm>().is_err());
    }

    #[test]
    fn test_smoothing_passes_adapts_to_framerate() {
        assert_eq!(smoothing_passes(30.0), 5);
        assert_eq!(smoothing_passes(12.0), 2);
        assert_eq!(smoothing_passes(5.0), 2);
    }

    #[test]
    fn test_green_extraction_finds_pulse_frequency() {
        // 256 samples at 30 fps with a pulse on the green channel at bin 16.
        let n = 256;
        let fps = 30.0;
        let mut raw = Array2::from_elem((n, 3), 128.0);
        for i in 0..n {
            raw[[i, 1]] += 10.0 * (PI2 * 16.0 * i as f64 / n as f64).sin();
        }
        let rescans = vec![0u8; n];
        let (low, high) = rppg_dsp::band_limits(n, fps);
        let pulse = extract_signal(RppgAlgorithm::G, &raw, &rescans, fps, low, high);
        assert_eq!(pulse.len(), n);
        assert_eq!(peak_bin(&pulse, n / 2), 16);
    }

    #[test]
    fn test_green_extraction_is_step_free_after_rescan() {
        // A +50 step at a flagged row: without the rescan flag the
        // normalized output keeps a many-sigma discontinuity, with it the
        // output stays smooth everywhere.
        let n = 300;
        let fps = 30.0;
        let step_at = 200;
        let mut raw = Array2::from_elem((n, 3), 100.0);
        for i in 0..n {
            raw[[i, 1]] += 5.0 * (PI2 * 12.0 * i as f64 / n as f64).sin();
            if i >= step_at {
                raw[[i, 1]] += 50.0;
            }
        }
        let mut rescans = vec![0u8; n];
        rescans[step_at] = 1;
        let (low, high) = rppg_dsp::band_limits(n, fps);

        let recovered = extract_signal(RppgAlgorithm::G, &raw, &rescans, fps, low, high);

        // The local differences around the flagged row stay on the same
        // scale as in an undisturbed stretch of the signal.
        let near_step = (step_at - 3..=step_at + 3)
            .map(|i| (recovered[i] - recovered[i - 1]).abs())
            .fold(0.0f64, f64::max);
        let baseline = (100..150)
            .map(|i| (recovered[i] - recovered[i - 1]).abs())
            .fold(0.0f64, f64::max);
        assert!(
            near_step < 2.0 * baseline,
            "discontinuity at rescan row: {near_step} vs baseline {baseline}"
        );
    }

    #[test]
    fn test_xminay_suppresses_shared_illumination() {
        // Pulse at bin 20 with channel-specific gains, plus a stronger
        // in-band flicker component shared equally by all channels. The
        // alpha correction cancels the shared component; the pulse mixes
        // differently into X and Y and survives.
        let n = 256;
        let fps = 25.0;
        let mut raw = Array2::from_elem((n, 3), 120.0);
        for i in 0..n {
            let pulse = (PI2 * 20.0 * i as f64 / n as f64).sin();
            let light = 8.0 * (PI2 * 30.0 * i as f64 / n as f64).sin();
            raw[[i, 0]] += light + 1.0 * pulse; // B
            raw[[i, 1]] += light + 3.0 * pulse; // G
            raw[[i, 2]] += light + 2.0 * pulse; // R
        }
        let rescans = vec![0u8; n];
        let (low, high) = rppg_dsp::band_limits(n, fps);
        let pulse = extract_signal(RppgAlgorithm::XMinAY, &raw, &rescans, fps, low, high);
        assert_eq!(peak_bin(&pulse, n / 2), 20);
    }

    #[test]
    fn test_pca_extraction_finds_pulse_frequency() {
        let n = 256;
        let fps = 30.0;
        let mut raw = Array2::from_elem((n, 3), 110.0);
        for i in 0..n {
            let pulse = (PI2 * 18.0 * i as f64 / n as f64).sin();
            raw[[i, 0]] += 2.0 * pulse;
            raw[[i, 1]] += 6.0 * pulse;
            raw[[i, 2]] += 3.0 * pulse;
        }
        let rescans = vec![0u8; n];
        let (low, high) = rppg_dsp::band_limits(n, fps);
        let pulse = extract_signal(RppgAlgorithm::Pca, &raw, &rescans, fps, low, high);
        assert_eq!(peak_bin(&pulse, n / 2), 18);
    }

    #[test]
    fn test_extraction_on_empty_buffer() {
        let raw = Array2::zeros((0, 3));
        let out = extract_signal(RppgAlgorithm::G, &raw, &[], 30.0, 0, 0);
        assert_eq!(out.len(), 0);
    }
}
