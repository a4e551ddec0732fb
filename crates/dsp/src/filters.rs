//! Time-domain filters: normalization, denoising, detrending, moving average

use ndarray::{Array1, Array2, Axis};
use tracing::warn;

/// Transform every column to zero mean and unit standard deviation.
///
/// A column with (numerically) zero variance is only centered; dividing
/// by a zero deviation would poison the downstream chain with NaNs.
#[must_use]
pub fn normalize(a: &Array2<f64>) -> Array2<f64> {
    let mut out = a.clone();
    for mut col in out.axis_iter_mut(Axis(1)) {
        let n = col.len() as f64;
        if n == 0.0 {
            continue;
        }
        let mean = col.sum() / n;
        let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        if std > f64::EPSILON {
            col.mapv_inplace(|v| (v - mean) / std);
        } else {
            col.mapv_inplace(|v| v - mean);
        }
    }
    out
}

/// Cancel baseline jumps introduced by face re-detection.
///
/// Walking the rows in order, every row whose rescan flag is set
/// contributes its per-channel step `a[i] - a[i-1]` to a running offset
/// which is subtracted from that row onward. With no flags set this is
/// the identity.
#[must_use]
pub fn denoise(a: &Array2<f64>, rescans: &[u8]) -> Array2<f64> {
    let (n, channels) = a.dim();
    let mut out = Array2::zeros((n, channels));
    let mut offset = vec![0.0; channels];
    for i in 0..n {
        if i > 0 && rescans.get(i).copied().unwrap_or(0) != 0 {
            for c in 0..channels {
                offset[c] += a[[i, c]] - a[[i - 1, c]];
            }
        }
        for c in 0..channels {
            out[[i, c]] = a[[i, c]] - offset[c];
        }
    }
    out
}

/// Smoothness-prior detrending (Tarvainen et al.).
///
/// Solves `z = (I + lambda^2 * D2' * D2)^-1 * a` for the trend `z`, where
/// `D2` is the second-order difference operator, and returns `a - z`.
/// For fewer than three samples the trend equals the input and the result
/// is all zeros; a constant input likewise detrends to (approximately)
/// zero.
#[must_use]
pub fn detrend(a: &Array1<f64>, lambda: f64) -> Array1<f64> {
    let n = a.len();
    if n < 3 {
        return Array1::zeros(n);
    }

    // I + lambda^2 D2'D2 is pentadiagonal symmetric positive definite;
    // band storage: main diagonal plus the first and second
    // subdiagonals.
    let l2 = lambda * lambda;
    let mut diag = vec![1.0f64; n];
    let mut sub1 = vec![0.0f64; n - 1];
    let mut sub2 = vec![0.0f64; n - 2];
    for row in 0..n - 2 {
        // D2 row `row` touches columns row, row+1, row+2 with 1, -2, 1.
        diag[row] += l2;
        diag[row + 1] += 4.0 * l2;
        diag[row + 2] += l2;
        sub1[row] += -2.0 * l2;
        sub1[row + 1] += -2.0 * l2;
        sub2[row] += l2;
    }

    // Banded Cholesky factorization, bandwidth 2.
    let mut l0 = vec![0.0f64; n];
    let mut l1 = vec![0.0f64; n - 1];
    let mut l2v = vec![0.0f64; n - 2];
    for j in 0..n {
        let mut d = diag[j];
        if j >= 1 {
            d -= l1[j - 1] * l1[j - 1];
        }
        if j >= 2 {
            d -= l2v[j - 2] * l2v[j - 2];
        }
        if d <= 0.0 {
            warn!("detrend system lost positive definiteness, returning zeros");
            return Array1::zeros(n);
        }
        l0[j] = d.sqrt();
        if j + 1 < n {
            let mut s = sub1[j];
            if j >= 1 {
                s -= l1[j - 1] * l2v[j - 1];
            }
            l1[j] = s / l0[j];
        }
        if j + 2 < n {
            l2v[j] = sub2[j] / l0[j];
        }
    }

    // Solve L y = a, then L' z = y; the trend is z.
    let mut y = vec![0.0f64; n];
    for i in 0..n {
        let mut v = a[i];
        if i >= 1 {
            v -= l1[i - 1] * y[i - 1];
        }
        if i >= 2 {
            v -= l2v[i - 2] * y[i - 2];
        }
        y[i] = v / l0[i];
    }
    let mut trend = vec![0.0f64; n];
    for i in (0..n).rev() {
        let mut v = y[i];
        if i + 1 < n {
            v -= l1[i] * trend[i + 1];
        }
        if i + 2 < n {
            v -= l2v[i] * trend[i + 2];
        }
        trend[i] = v / l0[i];
    }

    Array1::from_iter((0..n).map(|i| a[i] - trend[i]))
}

/// Box filter of the given width, applied `passes` times.
///
/// Borders are mirrored without repeating the edge sample (reflect-101),
/// matching the reference filtering behavior.
#[must_use]
pub fn moving_average(a: &Array1<f64>, width: usize, passes: usize) -> Array1<f64> {
    let n = a.len();
    if n == 0 || width <= 1 || passes == 0 {
        return a.clone();
    }
    let half = (width / 2) as isize;
    let mut current = a.clone();
    let mut next = Array1::zeros(n);
    for _ in 0..passes {
        for i in 0..n as isize {
            let mut acc = 0.0;
            for k in -half..=half {
                acc += current[reflect101(i + k, n)];
            }
            next[i as usize] = acc / width as f64;
        }
        std::mem::swap(&mut current, &mut next);
    }
    current
}

/// Reflect an index into `[0, n)` without repeating the border sample.
fn reflect101(index: isize, n: usize) -> usize {
    let last = n as isize - 1;
    let mut i = index;
    if i < 0 {
        i = -i;
    }
    if i > last {
        i = 2 * last - i;
    }
    i.clamp(0, last) as usize
}
