//! Window generation for the overlap-add engine.
//!
//! Hann analysis/synthesis pairs are normalized at construction time so the
//! summed synthesis-window shifts equal 1 (constant overlap-add). Perfect
//! reconstruction depends on this step; it must not be skipped.

use std::f32::consts::PI;

pub fn make_hann(size: usize) -> Vec<f32> {
    let mut win = vec![0.0; size];
    for (i, w) in win.iter_mut().enumerate() {
        *w = 0.5 * (1.0 - (2.0 * PI * i as f32 / (size as f32 - 1.0)).cos());
    }
    win
}

/// Periodic Hann: shifts by exact sub-multiples of `size` sum to a
/// constant, which the symmetric variant only approximates.
fn make_hann_periodic(size: usize) -> Vec<f32> {
    let mut win = vec![0.0; size];
    for (i, w) in win.iter_mut().enumerate() {
        *w = 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos());
    }
    win
}

/// Hann analysis + synthesis pair, both divided by the maximum of the sum
/// of all synthesis-window shifts by multiples of `fft_size / overlap`.
pub fn make_cola_windows(fft_size: usize, overlap: usize) -> (Vec<f32>, Vec<f32>) {
    let mut ana_win = make_hann_periodic(fft_size);
    let mut synth_win = make_hann_periodic(fft_size);

    let hop_size = fft_size / overlap;

    let mut combined = vec![0.0f32; fft_size];
    for frame in 0..overlap {
        let start = frame * hop_size;
        for i in 0..fft_size {
            let wrapped = (start + i) % fft_size;
            combined[wrapped] += synth_win[i];
        }
    }

    let norm = combined.iter().cloned().fold(f32::MIN, f32::max);

    for w in ana_win.iter_mut() {
        *w /= norm;
    }
    for w in synth_win.iter_mut() {
        *w /= norm;
    }

    (ana_win, synth_win)
}

/// Separable 2-D Hann kernel (size x size), used by the residual-noise
/// image filter.
pub fn make_hann_kernel_2d(size: usize) -> Vec<f32> {
    let line = make_hann(size);

    let mut kernel = vec![0.0; size * size];
    for j in 0..size {
        for i in 0..size {
            kernel[i + j * size] = line[i] * line[j];
        }
    }

    kernel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_shape() {
        let win = make_hann(8);
        assert!(win[0].abs() < 1e-6);
        assert!(win[7].abs() < 1e-6);
        let max = win.iter().cloned().fold(f32::MIN, f32::max);
        assert!((max - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_cola_sum_is_constant() {
        let fft_size = 1024;
        let overlap = 4;
        let (_, synth) = make_cola_windows(fft_size, overlap);

        let hop = fft_size / overlap;
        let mut combined = vec![0.0f32; fft_size];
        for frame in 0..overlap {
            for i in 0..fft_size {
                combined[(frame * hop + i) % fft_size] += synth[i];
            }
        }

        let max = combined.iter().cloned().fold(f32::MIN, f32::max);
        assert!((max - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_kernel_is_symmetric() {
        let k = make_hann_kernel_2d(5);
        assert_eq!(k.len(), 25);
        // Center is the kernel maximum
        let max = k.iter().cloned().fold(f32::MIN, f32::max);
        assert!((k[12] - max).abs() < 1e-6);
        for j in 0..5 {
            for i in 0..5 {
                assert!((k[i + j * 5] - k[j + i * 5]).abs() < 1e-6);
            }
        }
    }
}
