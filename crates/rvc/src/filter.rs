//! Butterworth high-pass design and zero-phase (forward-backward) filtering.
//!
//! The design follows the classic analog-prototype route:
//! - Butterworth poles on the unit circle
//! - low-pass to high-pass transform at the pre-warped cutoff
//! - bilinear transform, then expansion to transfer-function polynomials
//!
//! Filtering matches `filtfilt` with odd extension and steady-state initial
//! conditions, so a constant input produces a (numerically) zero output.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::constants::{HIGHPASS_CUTOFF_HZ, HIGHPASS_ORDER, SAMPLE_RATE_HZ};

/// Transfer-function coefficients of a digital high-pass filter.
///
/// Built once per pipeline and handed to the chunk planner; it carries no
/// mutable state between calls.
#[derive(Debug, Clone)]
pub struct HighPassFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    zi: Vec<f64>,
}

impl HighPassFilter {
    /// Design an `order`-th order Butterworth high-pass.
    #[must_use]
    pub fn butterworth(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        debug_assert!(order > 0);
        debug_assert!(cutoff_hz > 0.0 && cutoff_hz < sample_rate_hz / 2.0);

        // Normalised to Nyquist, then pre-warped for the bilinear transform (fs = 2).
        let wn = cutoff_hz / (sample_rate_hz / 2.0);
        let fs = 2.0;
        let warped = 2.0 * fs * (PI * wn / fs).tan();

        let prototype: Vec<Complex64> = (0..order)
            .map(|k| {
                let m = -(order as f64) + 1.0 + 2.0 * (k as f64);
                -Complex64::from_polar(1.0, PI * m / (2.0 * order as f64))
            })
            .collect();

        // Low-pass -> high-pass: poles move to wo/p, all zeros sit at s = 0.
        let hp_poles: Vec<Complex64> = prototype.iter().map(|&p| warped / p).collect();
        // Gain comes from the prototype poles (no finite prototype zeros).
        let prod_neg_p = prototype
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, &p| acc * -p);
        let k_hp = (Complex64::new(1.0, 0.0) / prod_neg_p).re;

        // Bilinear transform: s = 0 maps to z = 1.
        let fs2 = 2.0 * fs;
        let z_zeros = vec![Complex64::new(1.0, 0.0); order];
        let z_poles: Vec<Complex64> = hp_poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
        let num = Complex64::new(fs2.powi(order as i32), 0.0);
        let den = hp_poles
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, &p| acc * (fs2 - p));
        let k_z = k_hp * (num / den).re;

        let b: Vec<f64> = poly_from_roots(&z_zeros).iter().map(|c| c.re * k_z).collect();
        let a: Vec<f64> = poly_from_roots(&z_poles).iter().map(|c| c.re).collect();
        let zi = steady_state_zi(&b, &a);
        Self { b, a, zi }
    }

    /// The fixed speech rumble filter: 5th order, 48 Hz at 16 kHz.
    #[must_use]
    pub fn speech_default() -> Self {
        Self::butterworth(HIGHPASS_ORDER, HIGHPASS_CUTOFF_HZ, f64::from(SAMPLE_RATE_HZ))
    }

    #[must_use]
    pub fn numerator(&self) -> &[f64] {
        &self.b
    }

    #[must_use]
    pub fn denominator(&self) -> &[f64] {
        &self.a
    }

    /// Magnitude response `|H(e^{jw})|` at `freq_hz`.
    #[must_use]
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate_hz;
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .enumerate()
                .fold(Complex64::new(0.0, 0.0), |acc, (k, &c)| {
                    acc + Complex64::from_polar(c, -w * k as f64)
                })
        };
        (eval(&self.b) / eval(&self.a)).norm()
    }

    /// Zero-phase filtering: forward pass, then backward pass over the result.
    #[must_use]
    pub fn filtfilt(&self, input: &[f32]) -> Vec<f32> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }

        let edge = (3 * self.a.len().max(self.b.len())).min(n - 1);
        let first = f64::from(input[0]);
        let last = f64::from(input[n - 1]);

        let mut ext = Vec::with_capacity(n + 2 * edge);
        ext.extend((1..=edge).rev().map(|i| 2.0 * first - f64::from(input[i])));
        ext.extend(input.iter().map(|&v| f64::from(v)));
        ext.extend((1..=edge).map(|i| 2.0 * last - f64::from(input[n - 1 - i])));

        let forward = self.lfilter(ext.iter().copied(), ext[0]);
        let tail = forward[forward.len() - 1];
        let mut backward = self.lfilter(forward.iter().rev().copied(), tail);
        backward.reverse();

        backward[edge..edge + n].iter().map(|&v| v as f32).collect()
    }

    /// Direct form II transposed, state initialised to `zi * x0`.
    fn lfilter(&self, input: impl Iterator<Item = f64>, x0: f64) -> Vec<f64> {
        let order = self.a.len() - 1;
        let mut z: Vec<f64> = self.zi.iter().map(|&v| v * x0).collect();
        let mut out = Vec::with_capacity(input.size_hint().0);

        for x in input {
            let y = self.b[0] * x + z.first().copied().unwrap_or(0.0);
            for i in 0..order {
                let next = if i + 1 < order { z[i + 1] } else { 0.0 };
                z[i] = self.b[i + 1] * x + next - self.a[i + 1] * y;
            }
            out.push(y);
        }
        out
    }
}

/// Expand `prod(x - r)` into coefficients, highest power first.
fn poly_from_roots(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= r * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs
}

/// Initial state for a unit step, solving `(I - companion(a)^T) zi = b[1:] - a[1:] * b[0]`.
fn steady_state_zi(b: &[f64], a: &[f64]) -> Vec<f64> {
    let m = a.len() - 1;
    if m == 0 {
        return Vec::new();
    }

    let mut mat = vec![vec![0.0f64; m]; m];
    let mut rhs = vec![0.0f64; m];
    for i in 0..m {
        mat[i][i] += 1.0;
        mat[i][0] += a[i + 1];
        if i + 1 < m {
            mat[i][i + 1] -= 1.0;
        }
        rhs[i] = b[i + 1] - a[i + 1] * b[0];
    }

    solve_dense(mat, rhs)
}

/// Gaussian elimination with partial pivoting for a small dense system.
fn solve_dense(mut mat: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Vec<f64> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| mat[x][col].abs().total_cmp(&mat[y][col].abs()))
            .unwrap_or(col);
        mat.swap(col, pivot);
        rhs.swap(col, pivot);

        let diag = mat[col][col];
        if diag == 0.0 {
            continue;
        }
        for row in col + 1..n {
            let factor = mat[row][col] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                mat[row][k] -= factor * mat[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut acc = rhs[row];
        for k in row + 1..n {
            acc -= mat[row][k] * x[k];
        }
        x[row] = if mat[row][row] == 0.0 {
            0.0
        } else {
            acc / mat[row][row]
        };
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_filter_has_binomial_zeros_at_dc() {
        let f = HighPassFilter::speech_default();
        let b = f.numerator();
        let a = f.denominator();
        assert_eq!(b.len(), 6);
        assert_eq!(a.len(), 6);
        assert!((a[0] - 1.0).abs() < 1e-12);

        let pattern = [1.0, -5.0, 10.0, -10.0, 5.0, -1.0];
        for (bi, pi) in b.iter().zip(pattern) {
            assert!((bi / b[0] - pi).abs() < 1e-9, "b={b:?}");
        }
        assert!(b.iter().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn speech_filter_has_unity_passband_gain() {
        let f = HighPassFilter::speech_default();
        let b = f.numerator();
        assert!((b[0] - 0.969_960_645_183_844_7).abs() < 1e-9, "b={b:?}");
        assert!((f.denominator()[5] + 0.940_823_653_205_460_7).abs() < 1e-9);

        let sr = SAMPLE_RATE_HZ as f32;
        let tone: Vec<f32> = (0..16_000)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sr).sin() * 0.3)
            .collect();
        let peak = f.filtfilt(&tone).iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((0.29..0.31).contains(&peak), "peak={peak}");
    }

    #[test]
    fn speech_filter_response_shape() {
        let f = HighPassFilter::speech_default();
        let sr = f64::from(SAMPLE_RATE_HZ);
        let at_cutoff = f.magnitude_at(HIGHPASS_CUTOFF_HZ, sr);
        assert!((at_cutoff - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((f.magnitude_at(sr / 2.0, sr) - 1.0).abs() < 1e-9);
        assert!(f.magnitude_at(10.0, sr) < 1e-3);
        assert!((f.magnitude_at(1000.0, sr) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn filtfilt_removes_dc_offset() {
        let f = HighPassFilter::speech_default();
        let y = f.filtfilt(&vec![0.5f32; 4000]);
        assert_eq!(y.len(), 4000);
        let max = y.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(max < 1e-6, "max={max}");
    }

    #[test]
    fn filtfilt_passes_speech_band_without_phase_shift() {
        let f = HighPassFilter::speech_default();
        let sr = SAMPLE_RATE_HZ as f32;
        let x: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sr).sin() * 0.5)
            .collect();
        let y = f.filtfilt(&x);
        for i in 2000..6000 {
            assert!((x[i] - y[i]).abs() < 1e-3, "i={i} x={} y={}", x[i], y[i]);
        }
    }

    #[test]
    fn filtfilt_handles_tiny_inputs() {
        let f = HighPassFilter::speech_default();
        assert!(f.filtfilt(&[]).is_empty());
        assert_eq!(f.filtfilt(&[0.25]).len(), 1);
        assert_eq!(f.filtfilt(&[0.1, -0.2, 0.3]).len(), 3);
    }
}
