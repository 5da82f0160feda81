//! Spectral denoiser: learned noise profile, soft-elbow subtraction and
//! residual-noise filtering.
//!
//! While the learn flag is set, per-bin magnitudes accumulate into the
//! noise profile through a heavy one-pole histogram smoother. In normal
//! operation the thresholded profile is subtracted with a soft elbow, then
//! residual musical noise is cleaned either by a 2-D image filter over a
//! five-frame history (one hop of latency per history line below the
//! center) or by a pair of Wiener soft-masking units driven by a hard
//! signal/noise mask.
//!
//! The profile is kept in a sample-rate-independent "native" copy so a
//! persisted profile can be rescaled to the current spectrum size.
//!
//! See http://home.mit.bme.hu/~bako/zaozeng/chapter4.htm for the spectral
//! subtraction background.

use rustfft::num_complex::Complex32;

use crate::dsp::overlap_add::OverlapAddProcessor;
use crate::dsp::ring::Ring;
use crate::dsp::utils::{self, EPS};
use crate::dsp::wiener::WienerSoftMasking;
use crate::dsp::window;

const RESIDUAL_DENOISE_EPS: f32 = 1e-15;

const RES_NOISE_HISTORY_SIZE: usize = 5;

// Process line #2, the center of the kernel window
const RES_NOISE_LINE_NUM: usize = 2;

// Must be big, to be very smooth
const NOISE_PROFILE_SMOOTH_COEFF: f32 = 0.99;

// 8 gives more gating, but less musical noise remaining
const SOFT_MASKING_HISTORY_SIZE: usize = 8;

// Maps the 0..1 user threshold onto a wide usable amplitude range
const THRESHOLD_COEFF: f32 = 1000.0;

const RES_NOISE_KERNEL_SIZE: usize = 5;

// User residual threshold 0..1 maps linearly onto this dB range
const RES_NOISE_MIN_DB: f32 = -200.0;
const RES_NOISE_MAX_DB: f32 = 0.0;

const DB_EPS: f32 = 1e-15;
const MIN_DB: f32 = -200.0;

pub struct DenoiserProcessor {
    buffer_size: usize,
    overlap: usize,

    /// 0..1 normalized subtraction threshold
    threshold: f32,
    /// 0..1 residual filter threshold
    res_noise_thrs: f32,

    auto_res_noise: bool,
    noise_only: bool,

    is_building_noise_statistics: bool,

    noise_profile: Vec<f32>,
    // As captured, for persistence across spectrum sizes
    native_noise_profile: Vec<f32>,
    profile_histo_started: bool,

    history_magns: Ring<Vec<f32>>,
    history_noise: Ring<Vec<f32>>,
    history_phases: Ring<Vec<f32>>,

    hann_kernel: Vec<f32>,

    soft_masking_signal: WienerSoftMasking,
    soft_masking_noise: WienerSoftMasking,

    // Visualization taps
    signal_buf: Vec<f32>,
    noise_buf: Vec<f32>,

    // Scratch
    tmp_magns: Vec<f32>,
    tmp_phases: Vec<f32>,
    tmp_noise_magns: Vec<f32>,
    tmp_noise_phases: Vec<f32>,
    tmp_thrs_noise: Vec<f32>,
    tmp_image_in: Vec<f32>,
    tmp_image_db: Vec<f32>,
    tmp_line_out: Vec<f32>,
    tmp_comp: Vec<Complex32>,
    tmp_comp_copy: Vec<Complex32>,
    tmp_masked_signal: Vec<Complex32>,
    tmp_masked_noise: Vec<Complex32>,
    tmp_mask: Vec<f32>,
    tmp_mask_opp: Vec<f32>,

    // Recycled line payloads for the history rings
    recycle_magns: Vec<f32>,
    recycle_noise: Vec<f32>,
    recycle_phases: Vec<f32>,
}

impl DenoiserProcessor {
    pub fn new(buffer_size: usize, overlap: usize, threshold: f32) -> Self {
        let mut processor = Self {
            buffer_size,
            overlap,
            threshold,
            res_noise_thrs: 0.0,
            auto_res_noise: false,
            noise_only: false,
            is_building_noise_statistics: false,
            noise_profile: Vec::new(),
            native_noise_profile: Vec::new(),
            profile_histo_started: false,
            history_magns: Ring::new(),
            history_noise: Ring::new(),
            history_phases: Ring::new(),
            hann_kernel: window::make_hann_kernel_2d(RES_NOISE_KERNEL_SIZE),
            soft_masking_signal: WienerSoftMasking::new(
                buffer_size,
                overlap,
                SOFT_MASKING_HISTORY_SIZE,
            ),
            soft_masking_noise: WienerSoftMasking::new(
                buffer_size,
                overlap,
                SOFT_MASKING_HISTORY_SIZE,
            ),
            signal_buf: Vec::new(),
            noise_buf: Vec::new(),
            tmp_magns: Vec::new(),
            tmp_phases: Vec::new(),
            tmp_noise_magns: Vec::new(),
            tmp_noise_phases: Vec::new(),
            tmp_thrs_noise: Vec::new(),
            tmp_image_in: Vec::new(),
            tmp_image_db: Vec::new(),
            tmp_line_out: Vec::new(),
            tmp_comp: Vec::new(),
            tmp_comp_copy: Vec::new(),
            tmp_masked_signal: Vec::new(),
            tmp_masked_noise: Vec::new(),
            tmp_mask: Vec::new(),
            tmp_mask_opp: Vec::new(),
            recycle_magns: Vec::new(),
            recycle_noise: Vec::new(),
            recycle_phases: Vec::new(),
        };
        // The auto path starts disabled; keep its histories cheap
        processor
            .soft_masking_signal
            .set_processing_enabled(false);
        processor.soft_masking_noise.set_processing_enabled(false);

        processor.reset_res_noise_history();

        processor
    }

    pub fn reset(&mut self, buffer_size: usize, overlap: usize) {
        self.buffer_size = buffer_size;
        self.overlap = overlap;

        self.resample_noise_profile();
        self.reset_res_noise_history();

        self.soft_masking_signal.reset(buffer_size, overlap);
        self.soft_masking_noise.reset(buffer_size, overlap);
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn set_res_noise_threshold(&mut self, threshold: f32) {
        self.res_noise_thrs = threshold;
    }

    pub fn set_auto_res_noise(&mut self, flag: bool) {
        self.auto_res_noise = flag;

        // Avoid computing the expectations when the auto path is off;
        // the histories keep advancing either way
        self.soft_masking_signal.set_processing_enabled(flag);
        self.soft_masking_noise.set_processing_enabled(flag);
    }

    pub fn set_noise_only(&mut self, flag: bool) {
        self.noise_only = flag;
    }

    /// Learn flag. Starting a capture clears the previous profile.
    pub fn set_building_noise_statistics(&mut self, flag: bool) {
        if flag && !self.is_building_noise_statistics {
            self.noise_profile.clear();
            self.native_noise_profile.clear();
            self.profile_histo_started = false;
            log::debug!("noise profile capture started");
        }
        if !flag && self.is_building_noise_statistics {
            log::debug!(
                "noise profile capture stopped ({} bins)",
                self.noise_profile.len()
            );
        }

        self.is_building_noise_statistics = flag;
    }

    pub fn is_building_noise_statistics(&self) -> bool {
        self.is_building_noise_statistics
    }

    pub fn get_noise_profile(&self, profile: &mut Vec<f32>) {
        profile.clear();
        profile.extend_from_slice(&self.noise_profile);
    }

    pub fn get_native_noise_profile(&self, profile: &mut Vec<f32>) {
        profile.clear();
        profile.extend_from_slice(&self.native_noise_profile);
    }

    /// Restore a persisted profile; it is rescaled to the current
    /// spectrum size.
    pub fn set_native_noise_profile(&mut self, profile: &[f32]) {
        self.native_noise_profile.clear();
        self.native_noise_profile.extend_from_slice(profile);

        self.resample_noise_profile();
    }

    pub fn get_signal_buffer(&self, buf: &mut Vec<f32>) {
        buf.clear();
        buf.extend_from_slice(&self.signal_buf);
    }

    pub fn get_noise_buffer(&self, buf: &mut Vec<f32>) {
        buf.clear();
        buf.extend_from_slice(&self.noise_buf);
    }

    pub fn latency(&self) -> usize {
        // The two latencies do not stack: one or the other path delays
        if self.auto_res_noise {
            self.soft_masking_signal.latency()
        } else {
            RES_NOISE_LINE_NUM * self.buffer_size / self.overlap
        }
    }

    fn reset_res_noise_history(&mut self) {
        let half = self.buffer_size / 2 + 1;
        let zero = vec![0.0f32; half];

        self.history_magns.fill_with(RES_NOISE_HISTORY_SIZE, &zero);
        self.history_noise.fill_with(RES_NOISE_HISTORY_SIZE, &zero);
        self.history_phases.fill_with(RES_NOISE_HISTORY_SIZE, &zero);
    }

    fn resample_noise_profile(&mut self) {
        let half = self.buffer_size / 2 + 1;

        self.noise_profile.clear();
        self.noise_profile.extend_from_slice(&self.native_noise_profile);
        // One fft bin keeps its center frequency when the size follows
        // the sample rate, so padding/truncating is the right rescale
        self.noise_profile.resize(half, 0.0);
    }

    fn add_noise_statistics(&mut self, magns: &[f32]) {
        if !self.profile_histo_started {
            self.noise_profile.clear();
            self.noise_profile.extend_from_slice(magns);
            self.profile_histo_started = true;
        } else {
            for (p, &m) in self.noise_profile.iter_mut().zip(magns) {
                *p = NOISE_PROFILE_SMOOTH_COEFF * *p + (1.0 - NOISE_PROFILE_SMOOTH_COEFF) * m;
            }
        }

        self.native_noise_profile.clear();
        self.native_noise_profile.extend_from_slice(&self.noise_profile);
    }

    /// 2-D residual-noise filter. The histories also run when the filter
    /// threshold is zero so the latency stays constant.
    fn residual_denoise(&mut self) {
        let width = self.tmp_magns.len();

        // Rotate the three histories, reusing the retired line payloads
        let mut line = std::mem::take(&mut self.recycle_magns);
        line.clear();
        line.extend_from_slice(&self.tmp_magns);
        self.recycle_magns = self.history_magns.push_pop(line);

        let mut line = std::mem::take(&mut self.recycle_noise);
        line.clear();
        line.extend_from_slice(&self.tmp_noise_magns);
        self.recycle_noise = self.history_noise.push_pop(line);

        let mut line = std::mem::take(&mut self.recycle_phases);
        line.clear();
        line.extend_from_slice(&self.tmp_phases);
        self.recycle_phases = self.history_phases.push_pop(line);

        if self.auto_res_noise {
            // The Wiener pair carries the delay on this path
            return;
        }

        if self.res_noise_thrs < RESIDUAL_DENOISE_EPS {
            // Pure delay: pass the center lines through
            self.tmp_magns.clear();
            self.tmp_magns
                .extend_from_slice(&self.history_magns[RES_NOISE_LINE_NUM]);
            self.tmp_phases.clear();
            self.tmp_phases
                .extend_from_slice(&self.history_phases[RES_NOISE_LINE_NUM]);
            self.tmp_noise_magns.clear();
            self.tmp_noise_magns
                .extend_from_slice(&self.history_noise[RES_NOISE_LINE_NUM]);
            return;
        }

        let height = RES_NOISE_HISTORY_SIZE;

        // Assemble the log-domain image
        self.tmp_image_in.clear();
        self.tmp_image_in.resize(width * height, 0.0);
        for j in 0..height {
            let line = &self.history_magns[j];
            for i in 0..width {
                self.tmp_image_in[i + j * width] = (1.0 + line[i]).ln();
            }
        }

        // Precompute dB once for the kernel averages
        self.tmp_image_db.clear();
        self.tmp_image_db.resize(width * height, 0.0);
        for (dst, &src) in self.tmp_image_db.iter_mut().zip(self.tmp_image_in.iter()) {
            *dst = utils::amp_to_db_bounded(src, DB_EPS, MIN_DB);
        }

        self.noise_filter_center_line(width, height);

        // Reconstruct the center line from the filtered image
        self.tmp_magns.clear();
        self.tmp_magns
            .extend_from_slice(&self.history_magns[RES_NOISE_LINE_NUM]);
        for i in 0..width {
            let log_magn = self.tmp_line_out[i];
            self.tmp_magns[i] = (log_magn.exp() - 1.0).max(0.0);
        }

        self.tmp_phases.clear();
        self.tmp_phases
            .extend_from_slice(&self.history_phases[RES_NOISE_LINE_NUM]);

        // What the filter removed joins the noise part
        self.tmp_noise_magns.clear();
        self.tmp_noise_magns
            .extend_from_slice(&self.history_noise[RES_NOISE_LINE_NUM]);
        let hist_signal = &self.history_magns[RES_NOISE_LINE_NUM];
        for i in 0..width {
            let new_noise = self.tmp_noise_magns[i] + (hist_signal[i] - self.tmp_magns[i]);
            self.tmp_noise_magns[i] = new_noise.max(0.0);
        }
    }

    /// Convolve the 5x5 Hann kernel along the center line only; zero the
    /// bins whose weighted dB average falls below the threshold.
    fn noise_filter_center_line(&mut self, width: usize, height: usize) {
        let win_size = RES_NOISE_KERNEL_SIZE as isize;
        let half_win = win_size / 2;
        let j = RES_NOISE_LINE_NUM as isize;

        self.tmp_line_out.clear();
        self.tmp_line_out.resize(width, 0.0);

        let thrs =
            self.res_noise_thrs * (RES_NOISE_MAX_DB - RES_NOISE_MIN_DB) + RES_NOISE_MIN_DB;

        for i in 0..width as isize {
            let index0 = i as usize + RES_NOISE_LINE_NUM * width;

            // By default, copy the input
            let center_val = self.tmp_image_in[index0];
            self.tmp_line_out[i as usize] = center_val;

            if center_val == 0.0 {
                // Nothing to test, the value is already 0
                continue;
            }

            let mut avg = 0.0;
            let mut sum = 0.0;

            for wi in -half_win..=half_win {
                let x = i + wi;
                if x < 0 || x >= width as isize {
                    continue;
                }

                for wj in -half_win..=half_win {
                    let y = j + wj;
                    if y < 0 || y >= height as isize {
                        continue;
                    }

                    let val = self.tmp_image_db[x as usize + y as usize * width];
                    let kernel_val = self.hann_kernel
                        [(wi + half_win) as usize + (wj + half_win) as usize * RES_NOISE_KERNEL_SIZE];

                    avg += val * kernel_val;
                    sum += kernel_val;
                }
            }

            if sum > 0.0 {
                avg /= sum;
            }

            if avg < thrs {
                self.tmp_line_out[i as usize] = 0.0;
            }
        }
    }

    /// Wiener alternative to the 2-D filter: a hard mask from the
    /// subtracted magnitudes refines signal and noise on the reconstructed
    /// original spectrum.
    fn auto_residual_denoise(&mut self) {
        let size = self.tmp_magns.len();

        // Reconstruct the original magnitudes; safer than keeping the raw
        // complex buffer, which earlier stages may have delayed
        self.tmp_mask.clear();
        self.tmp_mask.resize(size, 0.0);
        for i in 0..size {
            let sig = self.tmp_magns[i];
            let noise = self.tmp_noise_magns[i];

            let sum = sig + noise;
            if sum > EPS {
                self.tmp_mask[i] = sig / sum;
            }
        }

        self.tmp_mask_opp.clear();
        self.tmp_mask_opp.extend_from_slice(&self.tmp_mask);
        utils::compute_opposite(&mut self.tmp_mask_opp);

        // Original spectrum: signal + noise magnitudes, signal phases
        self.tmp_comp.clear();
        self.tmp_comp.resize(size, Complex32::default());
        for i in 0..size {
            let orig = self.tmp_magns[i] + self.tmp_noise_magns[i];
            self.tmp_comp[i] = Complex32::from_polar(orig, self.tmp_phases[i]);
        }
        self.tmp_comp_copy.clear();
        self.tmp_comp_copy.extend_from_slice(&self.tmp_comp);

        self.soft_masking_signal.process_centered(
            &mut self.tmp_comp,
            &self.tmp_mask,
            &mut self.tmp_masked_signal,
            None,
        );

        // The copy avoids shifting the same buffer twice
        self.soft_masking_noise.process_centered(
            &mut self.tmp_comp_copy,
            &self.tmp_mask_opp,
            &mut self.tmp_masked_noise,
            None,
        );

        if !self.auto_res_noise {
            // History updated for constant latency, result unused
            return;
        }

        utils::complex_to_magn_phase(
            &mut self.tmp_magns,
            &mut self.tmp_phases,
            &self.tmp_masked_signal,
        );
        utils::complex_to_magn_phase(
            &mut self.tmp_noise_magns,
            &mut self.tmp_noise_phases,
            &self.tmp_masked_noise,
        );
    }
}

impl OverlapAddProcessor for DenoiserProcessor {
    fn process_spectrum(&mut self, spectrum: &mut [Complex32]) {
        let mut magns = std::mem::take(&mut self.tmp_magns);
        let mut phases = std::mem::take(&mut self.tmp_phases);
        utils::complex_to_magn_phase(&mut magns, &mut phases, spectrum);
        self.tmp_magns = magns;
        self.tmp_phases = phases;

        if self.is_building_noise_statistics {
            let magns = std::mem::take(&mut self.tmp_magns);
            self.add_noise_statistics(&magns);
            self.tmp_magns = magns;
        }

        self.signal_buf.clear();
        self.signal_buf.extend_from_slice(&self.tmp_magns);

        // Default noise part: zeros of the right size
        self.tmp_noise_magns.clear();
        self.tmp_noise_magns.resize(self.tmp_magns.len(), 0.0);

        if !self.is_building_noise_statistics && self.noise_profile.len() == self.tmp_magns.len() {
            self.tmp_noise_magns.copy_from_slice(&self.noise_profile);

            // Thresholded profile
            self.tmp_thrs_noise.clear();
            self.tmp_thrs_noise.extend_from_slice(&self.tmp_noise_magns);
            let thrs = self.threshold * THRESHOLD_COEFF;
            utils::mult_value(&mut self.tmp_thrs_noise, thrs);

            soft_elbow_subtract(
                &mut self.tmp_magns,
                &mut self.tmp_noise_magns,
                &self.tmp_thrs_noise,
            );
        }

        if !self.is_building_noise_statistics {
            self.residual_denoise();
        }

        self.tmp_noise_phases.clear();
        self.tmp_noise_phases.extend_from_slice(&self.tmp_phases);

        if !self.is_building_noise_statistics {
            self.auto_residual_denoise();
        }

        if !self.noise_only {
            for (i, s) in spectrum.iter_mut().enumerate() {
                *s = Complex32::from_polar(self.tmp_magns[i], self.tmp_phases[i]);
            }
        } else {
            for (i, s) in spectrum.iter_mut().enumerate() {
                *s = Complex32::from_polar(self.tmp_noise_magns[i], self.tmp_noise_phases[i]);
            }
        }

        self.noise_buf.clear();
        self.noise_buf.extend_from_slice(&self.tmp_noise_magns);
    }
}

/// Soft-elbow spectral subtraction: per bin,
/// `sig' = (|S|+1)/(N+1) - 1` clipped at 0, `noise' = |S| - sig'`.
/// The two always sum back to the input magnitude.
pub(crate) fn soft_elbow_subtract(sig_magns: &mut [f32], noise_magns: &mut [f32], thrs_noise: &[f32]) {
    for i in 0..sig_magns.len() {
        let magn = sig_magns[i];
        let noise = thrs_noise[i];

        let new_magn = ((magn + 1.0) / (noise + 1.0) - 1.0).max(0.0);
        sig_magns[i] = new_magn;

        let new_noise = (magn - new_magn).max(0.0);
        noise_magns[i] = new_noise;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 2048;
    const HALF: usize = N / 2 + 1;

    fn spectrum_from_magns(magns: &[f32]) -> Vec<Complex32> {
        magns
            .iter()
            .enumerate()
            .map(|(i, &m)| Complex32::from_polar(m, 0.1 * i as f32))
            .collect()
    }

    #[test]
    fn test_soft_elbow_conserves_energy() {
        let mut sig = vec![0.5f32, 0.1, 0.001, 0.0];
        let orig = sig.clone();
        let mut noise = vec![0.0f32; 4];
        let thrs = vec![0.2f32, 0.2, 0.2, 0.2];

        soft_elbow_subtract(&mut sig, &mut noise, &thrs);

        for i in 0..4 {
            assert!((sig[i] + noise[i] - orig[i]).abs() < 1e-6);
            assert!(sig[i] >= 0.0);
            assert!(noise[i] >= 0.0);
            assert!(sig[i] <= orig[i] + 1e-6);
        }
    }

    #[test]
    fn test_learning_accumulates_profile() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.5);
        dn.set_building_noise_statistics(true);

        for _ in 0..10 {
            let magns = vec![0.01f32; HALF];
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);
        }
        dn.set_building_noise_statistics(false);

        let mut profile = Vec::new();
        dn.get_noise_profile(&mut profile);
        assert_eq!(profile.len(), HALF);
        assert!(profile.iter().all(|&v| (v - 0.01).abs() < 1e-4));
    }

    #[test]
    fn test_identity_with_zero_profile_is_pure_delay() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.0);

        // Distinct constant frames, delay should be 2 lines
        let mut outputs = Vec::new();
        for k in 0..6 {
            let magns = vec![k as f32 + 1.0; HALF];
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);
            outputs.push(spec[10].norm());
        }

        // Frame k outputs the magnitudes of frame k-2 (zeros at startup)
        assert!(outputs[0] < 1e-6);
        assert!(outputs[1] < 1e-6);
        for k in 2..6 {
            let expected = (k - 2) as f32 + 1.0;
            assert!(
                (outputs[k] - expected).abs() < 1e-5,
                "k {} got {}",
                k,
                outputs[k]
            );
        }
    }

    #[test]
    fn test_denoise_attenuates_learned_noise() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.01);

        dn.set_building_noise_statistics(true);
        for _ in 0..20 {
            let magns = vec![0.05f32; HALF];
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);
        }
        dn.set_building_noise_statistics(false);

        // Same stationary noise plus a strong tone at bin 100
        let mut out_peak = 0.0;
        let mut out_floor = 0.0;
        for _ in 0..6 {
            let mut magns = vec![0.05f32; HALF];
            magns[100] = 0.8;
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);
            out_peak = spec[100].norm();
            out_floor = spec[300].norm();
        }

        // The floor is crushed, the tone survives the soft elbow
        assert!(out_floor < 0.005, "floor {}", out_floor);
        assert!(out_peak > 0.01, "peak {}", out_peak);
    }

    #[test]
    fn test_residual_filter_zeros_isolated_bin() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.0);
        // -30 dB residual threshold
        dn.set_res_noise_threshold(0.85);

        let floor = 1e-4f32;
        let k = 200;

        // One frame carries a bin 20 dB above its time neighbors
        let mut out_at_k = f32::MAX;
        for frame in 0..8 {
            let mut magns = vec![floor; HALF];
            if frame == 3 {
                magns[k] = floor * 10.0;
            }
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);

            // Frame 5 outputs the delayed frame 3
            if frame == 5 {
                out_at_k = spec[k].norm();
            }
        }

        assert!(out_at_k < 1e-6, "bin k {}", out_at_k);
    }

    #[test]
    fn test_latency_follows_path() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.5);
        assert_eq!(dn.latency(), 2 * (N / 4));

        dn.set_auto_res_noise(true);
        // Soft masking history of 8
        assert_eq!(dn.latency(), 3 * (N / 4));
    }

    #[test]
    fn test_noise_only_outputs_complement() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.5);

        dn.set_building_noise_statistics(true);
        for _ in 0..10 {
            let magns = vec![0.05f32; HALF];
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);
        }
        dn.set_building_noise_statistics(false);
        dn.set_noise_only(true);

        let mut out = 0.0;
        for _ in 0..6 {
            let magns = vec![0.05f32; HALF];
            let mut spec = spectrum_from_magns(&magns);
            dn.process_spectrum(&mut spec);
            out = spec[300].norm();
        }

        // The suppressed component is close to the full stationary floor
        assert!(out > 0.04, "noise-only out {}", out);
    }

    #[test]
    fn test_native_profile_rescale() {
        let mut dn = DenoiserProcessor::new(N, 4, 0.5);

        let native = vec![0.02f32; 513];
        dn.set_native_noise_profile(&native);

        let mut profile = Vec::new();
        dn.get_noise_profile(&mut profile);
        assert_eq!(profile.len(), HALF);
        assert!((profile[100] - 0.02).abs() < 1e-6);
        // Padded region is zero
        assert!(profile[1000].abs() < 1e-9);
    }
}
