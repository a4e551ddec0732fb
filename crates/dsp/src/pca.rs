//! Principal component selection within a spectral band

use nalgebra::{Matrix3, SymmetricEigen};
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::power_spectrum;

/// Project a 3-channel signal onto its principal components and return
/// the component whose power spectrum has the strongest peak inside
/// `[low, high]`.
///
/// The covariance is taken over the (already centered or raw) input
/// columns; each eigenvector yields a candidate 1-D projection whose
/// in-band spectral maximum is compared.
#[must_use]
pub fn pca_component(a: &Array2<f64>, low: usize, high: usize) -> Array1<f64> {
    let (n, channels) = a.dim();
    if n == 0 || channels != 3 {
        return Array1::zeros(n);
    }

    let mut mean = [0.0f64; 3];
    for i in 0..n {
        for c in 0..3 {
            mean[c] += a[[i, c]];
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    let mut covariance = Matrix3::<f64>::zeros();
    for i in 0..n {
        let d = [
            a[[i, 0]] - mean[0],
            a[[i, 1]] - mean[1],
            a[[i, 2]] - mean[2],
        ];
        for p in 0..3 {
            for q in 0..3 {
                covariance[(p, q)] += d[p] * d[q];
            }
        }
    }
    covariance /= n as f64;

    let eigen = SymmetricEigen::new(covariance);

    let mut best: Option<(f64, Array1<f64>)> = None;
    for k in 0..3 {
        let axis = eigen.eigenvectors.column(k);
        let projection = Array1::from_iter(
            (0..n).map(|i| a[[i, 0]] * axis[0] + a[[i, 1]] * axis[1] + a[[i, 2]] * axis[2]),
        );
        let spectrum = power_spectrum(&projection);
        let lo = low.min(spectrum.len() - 1);
        let hi = high.min(spectrum.len() - 1);
        let peak = spectrum
            .iter()
            .skip(lo)
            .take(hi.saturating_sub(lo) + 1)
            .fold(0.0f64, |acc, &v| acc.max(v));
        debug!(component = k, peak, "pca candidate");
        if best.as_ref().map_or(true, |(b, _)| peak > *b) {
            best = Some((peak, projection));
        }
    }

    match best {
        Some((_, projection)) => projection,
        None => Array1::zeros(n),
    }
}
