//! Shared DSP utilities.
//!
//! Small free functions used across the spectral processing chain: dB
//! conversions, complex/polar splitting, buffer arithmetic, phase
//! unwrapping and a handful of geometry helpers for the partial tracker.
//!
//! All functions operate on caller-owned slices; nothing here allocates
//! unless the output buffer needs to grow.

use rustfft::num_complex::Complex32;

/// Generic epsilon for divide guards.
pub const EPS: f32 = 1e-15;

pub const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

// 20/ln(10), so amp_to_db(x) == 20*log10(x)
const AMP_DB: f32 = 8.685_89;
// ln(10)/20
const IAMP_DB: f32 = 0.115_129_255;

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

#[inline]
pub fn amp_to_db(amp: f32) -> f32 {
    AMP_DB * amp.abs().ln()
}

/// Bounded conversion: values below `eps` map to `min_db`.
#[inline]
pub fn amp_to_db_bounded(amp: f32, eps: f32, min_db: f32) -> f32 {
    let a = amp.abs();
    if a > eps {
        AMP_DB * a.ln()
    } else {
        min_db
    }
}

#[inline]
pub fn db_to_amp(db: f32) -> f32 {
    (IAMP_DB * db).exp()
}

pub fn db_to_amp_buf(buf: &mut [f32]) {
    for v in buf.iter_mut() {
        *v = db_to_amp(*v);
    }
}

pub fn complex_to_magn_phase(magns: &mut Vec<f32>, phases: &mut Vec<f32>, buf: &[Complex32]) {
    magns.resize(buf.len(), 0.0);
    phases.resize(buf.len(), 0.0);

    for (i, c) in buf.iter().enumerate() {
        magns[i] = c.norm();
        phases[i] = c.arg();
    }
}

pub fn complex_to_magn(magns: &mut Vec<f32>, buf: &[Complex32]) {
    magns.resize(buf.len(), 0.0);
    for (i, c) in buf.iter().enumerate() {
        magns[i] = c.norm();
    }
}

pub fn magn_phase_to_complex(buf: &mut Vec<Complex32>, magns: &[f32], phases: &[f32]) {
    buf.resize(magns.len(), Complex32::default());
    for i in 0..magns.len() {
        buf[i] = Complex32::from_polar(magns[i], phases[i]);
    }
}

pub fn add_buffers(buf0: &mut [f32], buf1: &[f32]) {
    for (a, b) in buf0.iter_mut().zip(buf1) {
        *a += b;
    }
}

pub fn add_buffers_complex(buf0: &mut [Complex32], buf1: &[Complex32]) {
    for (a, b) in buf0.iter_mut().zip(buf1) {
        *a += *b;
    }
}

pub fn sub_buffers_complex(buf0: &mut [Complex32], buf1: &[Complex32]) {
    for (a, b) in buf0.iter_mut().zip(buf1) {
        *a -= *b;
    }
}

pub fn mult_buffers(buf0: &mut [f32], buf1: &[f32]) {
    for (a, b) in buf0.iter_mut().zip(buf1) {
        *a *= b;
    }
}

pub fn mult_buffers_complex_real(buf0: &mut [Complex32], buf1: &[f32]) {
    for (a, b) in buf0.iter_mut().zip(buf1) {
        *a *= *b;
    }
}

pub fn mult_buffers_complex(buf0: &mut [Complex32], buf1: &[Complex32]) {
    for (a, b) in buf0.iter_mut().zip(buf1) {
        *a *= *b;
    }
}

pub fn mult_value(buf: &mut [f32], val: f32) {
    for v in buf.iter_mut() {
        *v *= val;
    }
}

pub fn mult_value_complex(buf: &mut [Complex32], val: f32) {
    for v in buf.iter_mut() {
        *v *= val;
    }
}

/// In-place `1 - x` per bin, for turning a mask into its complement.
pub fn compute_opposite(buf: &mut [f32]) {
    for v in buf.iter_mut() {
        *v = 1.0 - *v;
    }
}

/// |z|^2 as a complex value via the conjugate product. The imaginary part
/// stays zero up to numerics.
pub fn compute_square_conjugate(buf: &mut [Complex32]) {
    for c in buf.iter_mut() {
        *c = c.conj() * *c;
    }
}

pub fn compute_sum(buf: &[f32]) -> f32 {
    buf.iter().sum()
}

pub fn clip_min(buf: &mut [f32], min_val: f32) {
    for v in buf.iter_mut() {
        if *v < min_val {
            *v = min_val;
        }
    }
}

pub fn clip_max(buf: &mut [f32], max_val: f32) {
    for v in buf.iter_mut() {
        if *v > max_val {
            *v = max_val;
        }
    }
}

/// Per-bin one-pole smoothing against the previous frame. `prev` is
/// refreshed with the smoothed result. Sizes resync after a reconfigure.
pub fn smooth_buffers(current: &mut Vec<f32>, prev: &mut Vec<f32>, smooth_factor: f32) {
    if current.len() != prev.len() {
        prev.clear();
        prev.extend_from_slice(current);
        return;
    }

    for (cur, pv) in current.iter_mut().zip(prev.iter_mut()) {
        let new_val = smooth_factor * *pv + (1.0 - smooth_factor) * *cur;
        *cur = new_val;
        *pv = new_val;
    }
}

/// Insert `num` copies of `value` at `index`.
pub fn insert_values(buf: &mut Vec<f32>, index: usize, num: usize, value: f32) {
    for _ in 0..num {
        buf.insert(index, value);
    }
}

/// Remove `num` values ending at `index`, treating the buffer as cyclic.
/// A negative index counts from the end.
pub fn remove_values_cyclic(buf: &mut Vec<f32>, index: isize, num: usize) {
    if num >= buf.len() {
        buf.clear();
        return;
    }

    let len = buf.len() as isize;
    let index = (if index < 0 { index + len } else { index }) as usize;

    let result_len = buf.len() - num;
    let mut result = vec![0.0; result_len];

    let mut buf_pos = index + 1;
    // Rebase the write cursor so the value after `index` lands at the same
    // cyclic offset in the shrunk buffer.
    let mut result_pos = if index + 1 >= num {
        index + 1 - num
    } else {
        index + 1 + result_len - num
    };

    for _ in 0..result_len {
        buf_pos %= buf.len();
        result_pos %= result_len;

        result[result_pos] = buf[buf_pos];

        buf_pos += 1;
        result_pos += 1;
    }

    *buf = result;
}

#[inline]
fn fmod_negative(x: f32, y: f32) -> f32 {
    // Move input to range 0..y
    if x < 0.0 {
        x - y * (x / y).floor()
    } else {
        x % y
    }
}

/// Lift `phase` by whole turns until it is >= `ref_phase`.
pub fn find_next_phase(phase: &mut f32, ref_phase: f32) {
    if *phase >= ref_phase {
        return;
    }

    let ref_mod = fmod_negative(ref_phase, TWO_PI);
    let p_mod = fmod_negative(*phase, TWO_PI);

    let mut res = (ref_phase - ref_mod) + p_mod;
    if res < ref_phase {
        res += TWO_PI;
    }

    *phase = res;
}

/// Unwrap along frequency so the sequence is monotonically increasing.
pub fn unwrap_phases(phases: &mut [f32], adjust_first_phase: bool) {
    if phases.is_empty() {
        return;
    }

    let mut prev_phase = phases[0];
    if adjust_first_phase {
        find_next_phase(&mut prev_phase, 0.0);
    }

    for p in phases.iter_mut() {
        let mut phase = *p;
        find_next_phase(&mut phase, prev_phase);
        *p = phase;
        prev_phase = phase;
    }
}

#[inline]
pub fn trapezoid_area(a: f32, b: f32, h: f32) -> f32 {
    (a + b) * h * 0.5
}

#[inline]
fn ccw(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> bool {
    (c[1] - a[1]) * (b[0] - a[0]) > (b[1] - a[1]) * (c[0] - a[0])
}

/// Segment/segment intersection test.
pub fn seg_seg_intersect(seg0: [[f32; 2]; 2], seg1: [[f32; 2]; 2]) -> bool {
    (ccw(seg0[0], seg1[0], seg1[1]) != ccw(seg0[1], seg1[0], seg1[1]))
        && (ccw(seg0[0], seg0[1], seg1[0]) != ccw(seg0[0], seg0[1], seg1[1]))
}

/// Map a -1..+1 mix parameter to a (harmonic, noise) coefficient pair. At 0
/// both are 1; negative mix fades the noise out, positive mix fades the
/// harmonic part out.
pub fn mix_param_to_coeffs(mix: f32) -> (f32, f32) {
    if mix <= 0.0 {
        (1.0, 1.0 + mix)
    } else {
        (1.0 - mix, 1.0)
    }
}

pub fn nearest_power_of_two(value: usize) -> usize {
    if value <= 1 {
        return 1;
    }

    let log = (value as f64).log2();
    let lower = 2usize.pow(log.floor() as u32);
    let upper = 2usize.pow(log.ceil() as u32);

    if value - lower < upper - value {
        lower
    } else {
        upper
    }
}

#[inline]
pub fn apply_gamma(t: f32, gamma: f32) -> f32 {
    t / ((1.0 / gamma - 2.0) * (1.0 - t) + 1.0)
}

/// Map each FFT bin to the sample position implied by its phase advance
/// along frequency. Bin 0 is skipped (no previous phase to difference).
pub fn fft_ids_to_sample_ids(phases: &[f32], sample_ids: &mut Vec<usize>) {
    sample_ids.resize(phases.len(), 0);
    for v in sample_ids.iter_mut() {
        *v = 0;
    }

    let buf_size = phases.len();
    let mut prev = 0.0;
    for (i, &phase) in phases.iter().enumerate() {
        let mut phase_diff = phase - prev;
        prev = phase;

        // Avoid a big phase diff due to prev == 0
        if i == 0 {
            continue;
        }

        while phase_diff < 0.0 {
            phase_diff += TWO_PI;
        }

        let sample_pos = (buf_size as f32) * phase_diff / TWO_PI;

        sample_ids[i] = (sample_pos as usize).min(buf_size - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_round_trip() {
        for &db in &[-120.0, -60.0, -6.0, 0.0, 6.0] {
            let amp = db_to_amp(db);
            assert!((amp_to_db(amp) - db).abs() < 1e-3);
        }
    }

    #[test]
    fn test_unwrap_phases_monotonic() {
        let mut phases = vec![0.1, 2.5, -2.9, 1.2, -0.5, 3.0];
        unwrap_phases(&mut phases, true);
        for w in phases.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn test_nearest_power_of_two() {
        assert_eq!(nearest_power_of_two(1900), 2048);
        assert_eq!(nearest_power_of_two(2048), 2048);
        assert_eq!(nearest_power_of_two(1300), 1024);
    }

    #[test]
    fn test_mix_param_to_coeffs() {
        assert_eq!(mix_param_to_coeffs(0.0), (1.0, 1.0));
        assert_eq!(mix_param_to_coeffs(-1.0), (1.0, 0.0));
        assert_eq!(mix_param_to_coeffs(1.0), (0.0, 1.0));
    }

    #[test]
    fn test_seg_seg_intersect() {
        let s0 = [[0.0, 0.0], [1.0, 1.0]];
        let s1 = [[0.0, 1.0], [1.0, 0.0]];
        assert!(seg_seg_intersect(s0, s1));

        let s2 = [[0.0, 0.0], [0.4, 1.0]];
        let s3 = [[0.6, 0.0], [1.0, 1.0]];
        assert!(!seg_seg_intersect(s2, s3));
    }

    #[test]
    fn test_cyclic_insert_remove() {
        let mut buf = vec![1.0, 2.0, 3.0, 4.0];
        insert_values(&mut buf, 1, 2, 9.0);
        assert_eq!(buf, vec![1.0, 9.0, 9.0, 2.0, 3.0, 4.0]);

        let mut buf = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        remove_values_cyclic(&mut buf, 2, 2);
        assert_eq!(buf.len(), 4);
        // The value after the removal zone keeps its cyclic position
        assert_eq!(buf[1], 4.0);

        let mut buf = vec![1.0, 2.0];
        remove_values_cyclic(&mut buf, 0, 5);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_square_conjugate_is_real() {
        let mut buf = vec![Complex32::new(3.0, -4.0)];
        compute_square_conjugate(&mut buf);
        assert!((buf[0].re - 25.0).abs() < 1e-5);
        assert!(buf[0].im.abs() < 1e-5);
    }
}
