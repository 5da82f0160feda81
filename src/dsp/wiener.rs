//! Wiener-style soft masking over a rolling history of complex spectra.
//!
//! Each frame pushes the raw spectrum plus the squared masked/unmasked
//! components; the soft mask is the ratio of Hann-weighted power
//! expectations across the history, applied to the centered frame. Latency
//! is therefore fixed at half the history.
//!
//! Algorithm:
//!   s  = input * M
//!   n  = input * (1 - M)
//!   SM = E[|s|^2] / (E[|s|^2] + E[|n|^2])
//!   out = centered_input * SM
//!
//! See https://hal.inria.fr/hal-01881425/document.

use rustfft::num_complex::Complex32;

use crate::dsp::ring::Ring;
use crate::dsp::utils::{self, EPS};
use crate::dsp::window;

/// One time slice of the masking history.
#[derive(Debug, Clone, Default)]
pub struct HistoryLine {
    pub sum: Vec<Complex32>,
    pub masked0_square: Vec<Complex32>,
    pub masked1_square: Vec<Complex32>,
}

impl HistoryLine {
    fn resize(&mut self, size: usize) {
        self.sum.resize(size, Complex32::default());
        self.masked0_square.resize(size, Complex32::default());
        self.masked1_square.resize(size, Complex32::default());
    }
}

pub struct WienerSoftMasking {
    buffer_size: usize,
    overlap: usize,

    history_size: usize,
    history: Ring<HistoryLine>,

    processing_enabled: bool,

    // Hann weights across the history depth
    weights: Vec<f32>,

    tmp_line: HistoryLine,
    tmp_sigma0: Vec<Complex32>,
    tmp_sigma1: Vec<Complex32>,
    tmp_mask: Vec<Complex32>,
}

impl WienerSoftMasking {
    pub fn new(buffer_size: usize, overlap: usize, history_size: usize) -> Self {
        Self {
            buffer_size,
            overlap,
            history_size,
            history: Ring::new(),
            processing_enabled: true,
            weights: Vec::new(),
            tmp_line: HistoryLine::default(),
            tmp_sigma0: Vec::new(),
            tmp_sigma1: Vec::new(),
            tmp_mask: Vec::new(),
        }
    }

    pub fn reset(&mut self, buffer_size: usize, overlap: usize) {
        self.buffer_size = buffer_size;
        self.overlap = overlap;

        self.history.clear();
    }

    pub fn set_history_size(&mut self, size: usize) {
        self.history_size = size;
        self.history.clear();
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    pub fn set_processing_enabled(&mut self, flag: bool) {
        self.processing_enabled = flag;
    }

    pub fn is_processing_enabled(&self) -> bool {
        self.processing_enabled
    }

    /// Latency in samples: the distance from the newest history slot to
    /// the center one, in hops.
    pub fn latency(&self) -> usize {
        // Index 0 has 0 latency, we read at history_size/2 from the end
        let rev_index = (self.history_size - 1) - self.history_size / 2;
        rev_index * (self.buffer_size / self.overlap)
    }

    /// Push `(sum, mask)` and produce the masked centered frame. `io_sum`
    /// is replaced by the centered raw spectrum; `out_masked0` receives
    /// `centered * mask`; `out_masked1`, when wanted, receives the
    /// complement (centered - masked0).
    pub fn process_centered(
        &mut self,
        io_sum: &mut Vec<Complex32>,
        mask: &[f32],
        out_masked0: &mut Vec<Complex32>,
        mut out_masked1: Option<&mut Vec<Complex32>>,
    ) {
        let size = io_sum.len();

        self.tmp_line.resize(size);
        self.tmp_line.sum.copy_from_slice(io_sum);

        if self.processing_enabled {
            // masked0 = sum * mask, masked1 = sum - masked0, then square
            // via the complex conjugate product
            self.tmp_line.masked0_square.copy_from_slice(io_sum);
            utils::mult_buffers_complex_real(&mut self.tmp_line.masked0_square, mask);

            for i in 0..size {
                self.tmp_line.masked1_square[i] = io_sum[i] - self.tmp_line.masked0_square[i];
            }

            utils::compute_square_conjugate(&mut self.tmp_line.masked0_square);
            utils::compute_square_conjugate(&mut self.tmp_line.masked1_square);
        } else {
            // Keep pushing history so the latency stays constant, but
            // skip the square computation
            for v in self.tmp_line.masked0_square.iter_mut() {
                *v = Complex32::default();
            }
            for v in self.tmp_line.masked1_square.iter_mut() {
                *v = Complex32::default();
            }
        }

        if self.history.is_empty() {
            // Pre-fill the whole queue with the first line
            self.history.fill_with(self.history_size, &self.tmp_line);
        } else {
            // Recycle the retired line's buffers
            let old = self.history.push_pop(std::mem::take(&mut self.tmp_line));
            self.tmp_line = old;
        }

        if self.processing_enabled {
            self.compute_sigma2();

            self.tmp_mask.resize(size, Complex32::default());
            for i in 0..size {
                let s0 = self.tmp_sigma0[i];
                let s1 = self.tmp_sigma1[i];

                let csum = s0 + s1;

                let mut mask_val = Complex32::default();
                if csum.re.abs() > EPS || csum.im.abs() > EPS {
                    mask_val = s0 / csum;
                }

                // Limit the magnitude to 1
                let mask_magn = mask_val.norm();
                if mask_magn > 1.0 {
                    mask_val *= 1.0 / mask_magn;
                }

                self.tmp_mask[i] = mask_val;
            }

            // Apply mask 0 to the centered frame
            let center = &self.history[self.history.len() / 2].sum;
            out_masked0.clear();
            out_masked0.extend_from_slice(center);
            utils::mult_buffers_complex(out_masked0, &self.tmp_mask);

            if let Some(masked1) = out_masked1.as_mut() {
                // Complement of mask 0; cheaper than a second expectation
                masked1.clear();
                masked1.extend_from_slice(center);
                utils::sub_buffers_complex(masked1, out_masked0);
            }
        }

        // Recenter the input even when processing is off
        if !self.history.is_empty() {
            let center = &self.history[self.history.len() / 2].sum;
            io_sum.clear();
            io_sum.extend_from_slice(center);
        }
    }

    /// Hann-weighted expectations of the squared masked components.
    fn compute_sigma2(&mut self) {
        if self.history.is_empty() {
            return;
        }

        let size = self.history[0].sum.len();

        self.tmp_sigma0.clear();
        self.tmp_sigma0.resize(size, Complex32::default());
        self.tmp_sigma1.clear();
        self.tmp_sigma1.resize(size, Complex32::default());

        if self.weights.len() != self.history.len() {
            self.weights = window::make_hann(self.history.len());
        }

        let sum_proba = utils::compute_sum(&self.weights);

        for j in 0..self.history.len() {
            let line = &self.history[j];
            let p = self.weights[j];

            for i in 0..size {
                self.tmp_sigma0[i] += p * line.masked0_square[i];
                self.tmp_sigma1[i] += p * line.masked1_square[i];
            }
        }

        if sum_proba > EPS {
            let inv = 1.0 / sum_proba;
            utils::mult_value_complex(&mut self.tmp_sigma0, inv);
            utils::mult_value_complex(&mut self.tmp_sigma1, inv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(val: f32, size: usize) -> Vec<Complex32> {
        vec![Complex32::new(val, 0.0); size]
    }

    #[test]
    fn test_latency_formula() {
        let sm = WienerSoftMasking::new(2048, 4, 8);
        // ((8 - 1) - 4) * 512 = 1536
        assert_eq!(sm.latency(), 3 * 512);

        let sm = WienerSoftMasking::new(2048, 4, 5);
        assert_eq!(sm.latency(), 2 * 512);
    }

    #[test]
    fn test_full_mask_passes_signal() {
        let size = 16;
        let mut sm = WienerSoftMasking::new(2048, 4, 8);

        let mask = vec![1.0f32; size];
        let mut masked0 = Vec::new();

        for _ in 0..16 {
            let mut sum = spectrum(0.5, size);
            sm.process_centered(&mut sum, &mask, &mut masked0, None);
        }

        // With a unit mask everything is "signal": masked0 == centered sum
        for v in masked0.iter() {
            assert!((v.re - 0.5).abs() < 1e-4, "re {}", v.re);
            assert!(v.im.abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_mask_suppresses_signal() {
        let size = 16;
        let mut sm = WienerSoftMasking::new(2048, 4, 8);

        let mask = vec![0.0f32; size];
        let mut masked0 = Vec::new();
        let mut masked1 = Vec::new();

        for _ in 0..16 {
            let mut sum = spectrum(0.5, size);
            sm.process_centered(&mut sum, &mask, &mut masked0, Some(&mut masked1));
        }

        for (m0, m1) in masked0.iter().zip(masked1.iter()) {
            assert!(m0.norm() < 1e-5);
            assert!((m1.re - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_outputs_sum_to_center() {
        let size = 16;
        let mut sm = WienerSoftMasking::new(2048, 4, 8);

        let mask: Vec<f32> = (0..size).map(|i| i as f32 / size as f32).collect();
        let mut masked0 = Vec::new();
        let mut masked1 = Vec::new();

        let mut centered = Vec::new();
        for _ in 0..16 {
            let mut sum = spectrum(0.7, size);
            sm.process_centered(&mut sum, &mask, &mut masked0, Some(&mut masked1));
            centered = sum;
        }

        for i in 0..size {
            let recombined = masked0[i] + masked1[i];
            assert!((recombined - centered[i]).norm() < 1e-5);
        }
    }

    #[test]
    fn test_disabled_still_advances_history() {
        let size = 8;
        let mut sm = WienerSoftMasking::new(2048, 4, 4);
        sm.set_processing_enabled(false);

        let mask = vec![1.0f32; size];
        let mut masked0 = Vec::new();

        // Distinct frames so the recentering is observable
        for k in 0..8 {
            let mut sum = spectrum(k as f32, size);
            sm.process_centered(&mut sum, &mask, &mut masked0, None);

            // The returned sum is the centered history slot, one hop back
            // for a 4-deep history
            if k >= 3 {
                let expected = (k - 1) as f32;
                assert!((sum[0].re - expected).abs() < 1e-6, "k {} got {}", k, sum[0].re);
            }
        }

        // Latency does not depend on the enabled state
        assert_eq!(sm.latency(), ((4 - 1) - 2) * 512);
    }
}
