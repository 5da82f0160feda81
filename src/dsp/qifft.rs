//! Quadratically-interpolated FFT peak refinement.
//!
//! Fits a maximum-constrained parabola to three log-magnitude points around
//! a peak bin and a general parabola to the unwrapped phase at the same
//! points, then differentiates both numerically at the refined center to
//! derive the first-order amplitude (alpha0) and frequency (beta0)
//! modulation coefficients.
//!
//! See https://ccrma.stanford.edu/files/papers/stanm118.pdf for the
//! derivation of the modulation terms.

use crate::dsp::utils::EPS;

// Eps used for the numeric derivatives
const DERIV_EPS: f32 = 1e-5;

/// Empirical correction applied to alpha0 by the tracker. Depends on the
/// window shape and overlap; changing either requires re-calibration.
pub const EMPIR_ALPHA0_COEFF: f32 = 1.422865;
/// Empirical correction applied to beta0 by the tracker.
pub const EMPIR_BETA0_COEFF: f32 = 0.0030370;

#[derive(Debug, Clone, Copy, Default)]
pub struct QifftPeak {
    /// Fractional bin index of the true peak
    pub bin_idx: f32,
    /// Normalized frequency, bin / (buffer_size/2)
    pub freq: f32,
    /// Refined amplitude, in the scale of the input magnitudes
    pub amp: f32,
    pub phase: f32,
    /// Amplitude-over-time derivative
    pub alpha0: f32,
    /// Frequency-over-time derivative
    pub beta0: f32,
}

/// Refine `peak_bin` on log-scale magnitudes and (frequency-)unwrapped
/// phases. Falls back to the unrefined values at the spectrum edges
/// (bin <= 1) and on degenerate neighborhoods.
pub fn find_peak(magns: &[f32], phases: &[f32], buffer_size: usize, peak_bin: usize) -> QifftPeak {
    let mut result = QifftPeak {
        bin_idx: peak_bin as f32,
        freq: peak_bin as f32 / (buffer_size as f32 * 0.5),
        amp: magns[peak_bin],
        phase: phases[peak_bin],
        alpha0: 0.0,
        beta0: 0.0,
    };

    if peak_bin + 1 >= magns.len() {
        return result;
    }

    // Bin 1 is the first usable bin (bin 0 is the fft DC). A peak there
    // has no left neighbor for the parabola.
    if peak_bin <= 1 {
        return result;
    }

    let alpha = magns[peak_bin - 1];
    let beta = magns[peak_bin];
    let gamma = magns[peak_bin + 1];

    // Not a true local maximum, would give a wrong negative fit
    if beta < alpha || beta < gamma {
        return result;
    }

    let (a, b, c) = match parabola_coeffs_max(alpha, beta, gamma) {
        Some(coeffs) => coeffs,
        None => return result,
    };

    // True bin and amplitude
    result.bin_idx = peak_bin as f32 + c;
    result.freq = result.bin_idx / (buffer_size as f32 * 0.5);
    result.amp = beta - 0.25 * (alpha - gamma) * c;

    // Phases, general parabola (no maximum constraint)
    let alpha_p = phases[peak_bin - 1];
    let beta_p = phases[peak_bin];
    let gamma_p = phases[peak_bin + 1];
    let (ap, bp, cp) = parabola_coeffs_gen(alpha_p, beta_p, gamma_p);

    result.phase = parabola_func_gen(c, ap, bp, cp);

    // Magnitude first derivative at the refined center
    let a0 = parabola_func_max(c - DERIV_EPS, a, b, c);
    let a1 = parabola_func_max(c + DERIV_EPS, a, b, c);
    let _up = (a1 - a0) / (2.0 * DERIV_EPS);

    // Magnitude second derivative
    let a00 = parabola_func_max(c - 2.0 * DERIV_EPS, a, b, c);
    let a10 = parabola_func_max(c, a, b, c);
    let up0 = (a10 - a00) / (2.0 * DERIV_EPS);

    let a01 = parabola_func_max(c, a, b, c);
    let a11 = parabola_func_max(c + 2.0 * DERIV_EPS, a, b, c);
    let up1 = (a11 - a01) / (2.0 * DERIV_EPS);

    let upp = (up1 - up0) / (2.0 * DERIV_EPS);

    // Phase first derivative
    let p0 = parabola_func_gen(c - DERIV_EPS, ap, bp, cp);
    let p1 = parabola_func_gen(c + DERIV_EPS, ap, bp, cp);
    let vp = (p1 - p0) / (2.0 * DERIV_EPS);

    // Phase second derivative
    let p00 = parabola_func_gen(c - 2.0 * DERIV_EPS, ap, bp, cp);
    let p10 = parabola_func_gen(c, ap, bp, cp);
    let vp0 = (p10 - p00) / (2.0 * DERIV_EPS);

    let p01 = parabola_func_gen(c, ap, bp, cp);
    let p11 = parabola_func_gen(c + 2.0 * DERIV_EPS, ap, bp, cp);
    let vp1 = (p11 - p01) / (2.0 * DERIV_EPS);

    let vpp = (vp1 - vp0) / (2.0 * DERIV_EPS);

    let denom1 = 2.0 * (upp * upp + vpp * vpp);
    if denom1.abs() < EPS {
        return result;
    }

    let p = -upp / denom1;

    // The -PI keeps alpha0 from always coming out positive
    let alpha0 = -2.0 * p * (vp - std::f32::consts::PI);

    let mut beta0 = 0.0;
    if upp.abs() > EPS {
        beta0 = p * vpp / upp;
    }

    result.alpha0 = alpha0;
    result.beta0 = beta0;

    result
}

/// Maximum-constrained parabola y(x) = a*(x - c)^2 + b through the three
/// points at x = -1, 0, 1. c is the center offset, b the peak value.
fn parabola_coeffs_max(alpha: f32, beta: f32, gamma: f32) -> Option<(f32, f32, f32)> {
    let denom0 = alpha - 2.0 * beta + gamma;
    if denom0.abs() < EPS {
        return None;
    }

    let c = 0.5 * ((alpha - gamma) / denom0);

    // See http://mural.maynoothuniversity.ie/4523/1/thesis.pdf for the
    // a and b equations
    let b = -(alpha * c * c - beta * (c + 1.0) * (c + 1.0)) / (2.0 * c + 1.0);
    let a = (alpha - b) / ((c + 1.0) * (c + 1.0));

    Some((a, b, c))
}

#[inline]
fn parabola_func_max(x: f32, a: f32, b: f32, c: f32) -> f32 {
    a * (x - c) * (x - c) + b
}

/// General parabola y(x) = a*x^2 + b*x + c through (-1, alpha), (0, beta),
/// (1, gamma).
fn parabola_coeffs_gen(alpha: f32, beta: f32, gamma: f32) -> (f32, f32, f32) {
    let a = 0.5 * (alpha + gamma - 2.0 * beta);
    let b = gamma - a - beta;
    let c = beta;

    (a, b, c)
}

#[inline]
fn parabola_func_gen(x: f32, a: f32, b: f32, c: f32) -> f32 {
    a * x * x + b * x + c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_peak_not_moved() {
        // Symmetric neighborhood: refined bin stays put
        let mut magns = vec![-10.0f32; 64];
        magns[20] = 0.0;
        magns[19] = -3.0;
        magns[21] = -3.0;
        let phases = vec![0.0f32; 64];

        let peak = find_peak(&magns, &phases, 128, 20);
        assert!((peak.bin_idx - 20.0).abs() < 1e-4);
        assert!((peak.amp - 0.0).abs() < 1e-4);
    }

    #[test]
    fn test_skewed_peak_moves_toward_higher_neighbor() {
        let mut magns = vec![-10.0f32; 64];
        magns[20] = 0.0;
        magns[19] = -4.0;
        magns[21] = -1.0;
        let phases = vec![0.0f32; 64];

        let peak = find_peak(&magns, &phases, 128, 20);
        assert!(peak.bin_idx > 20.0);
        assert!(peak.bin_idx < 21.0);
        // Refined amp is above the sampled maximum
        assert!(peak.amp > 0.0);
    }

    #[test]
    fn test_bin_one_unrefined() {
        let mut magns = vec![-10.0f32; 64];
        magns[1] = 0.0;
        let phases = vec![0.5f32; 64];

        let peak = find_peak(&magns, &phases, 128, 1);
        assert_eq!(peak.bin_idx, 1.0);
        assert_eq!(peak.amp, 0.0);
        assert_eq!(peak.phase, 0.5);
        assert_eq!(peak.alpha0, 0.0);
        assert_eq!(peak.beta0, 0.0);
    }

    #[test]
    fn test_exact_parabola_recovered() {
        // Sample y = -2*(x - 0.3)^2 + 1 at bins 29, 30, 31 (x = -1, 0, 1
        // around bin 30 with center offset 0.3)
        let f = |x: f32| -2.0 * (x - 0.3) * (x - 0.3) + 1.0;
        let mut magns = vec![-30.0f32; 64];
        magns[29] = f(-1.0);
        magns[30] = f(0.0);
        magns[31] = f(1.0);
        let phases = vec![0.0f32; 64];

        let peak = find_peak(&magns, &phases, 128, 30);
        assert!((peak.bin_idx - 30.3).abs() < 1e-3);
        assert!((peak.amp - 1.0).abs() < 1e-3);
    }
}
