//! Harmonic / air split.
//!
//! Runs the partial tracker on each spectrum, splits the frame into a
//! harmonic (tonal) envelope and a noise/air envelope, and remixes the two
//! according to the mix parameter. The split is either a hard per-bin mask
//! or a Wiener soft mask over an 8-frame history (smart resynthesis).

use rustfft::num_complex::Complex32;

use crate::dsp::overlap_add::OverlapAddProcessor;
use crate::dsp::partial_tracker::{PartialFilterKind, PartialTracker};
use crate::dsp::utils::{self, EPS};
use crate::dsp::wiener::WienerSoftMasking;

// 8 gives more gating, but less musical noise remaining
const SOFT_MASKING_HISTORY_SIZE: usize = 8;

pub struct AirProcessor {
    partial_tracker: PartialTracker,

    /// -1..+1, negative keeps the harmonics, positive keeps the air
    mix: f32,

    use_soft_masks: bool,
    soft_masking: WienerSoftMasking,

    enable_compute_sum: bool,

    noise_buffer: Vec<f32>,
    harmo_buffer: Vec<f32>,
    sum_buffer: Vec<f32>,

    // Scratch
    tmp_magns: Vec<f32>,
    tmp_phases: Vec<f32>,
    tmp_mask: Vec<f32>,
    tmp_mask_opp: Vec<f32>,
    tmp_masked0: Vec<Complex32>,
    tmp_masked1: Vec<Complex32>,
    tmp_sum: Vec<Complex32>,
}

impl AirProcessor {
    pub fn new(buffer_size: usize, overlap: usize, sample_rate: f32) -> Self {
        Self {
            partial_tracker: PartialTracker::new(buffer_size, sample_rate, PartialFilterKind::AmFm),
            mix: 0.0,
            use_soft_masks: false,
            soft_masking: WienerSoftMasking::new(buffer_size, overlap, SOFT_MASKING_HISTORY_SIZE),
            enable_compute_sum: true,
            noise_buffer: Vec::new(),
            harmo_buffer: Vec::new(),
            sum_buffer: Vec::new(),
            tmp_magns: Vec::new(),
            tmp_phases: Vec::new(),
            tmp_mask: Vec::new(),
            tmp_mask_opp: Vec::new(),
            tmp_masked0: Vec::new(),
            tmp_masked1: Vec::new(),
            tmp_sum: Vec::new(),
        }
    }

    pub fn reset(&mut self, buffer_size: usize, overlap: usize, sample_rate: f32) {
        self.partial_tracker.reset(buffer_size, sample_rate);
        self.soft_masking.reset(buffer_size, overlap);
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.partial_tracker.set_threshold(threshold);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix;
    }

    pub fn set_use_soft_masks(&mut self, flag: bool) {
        self.use_soft_masks = flag;
        self.soft_masking.set_processing_enabled(flag);
    }

    pub fn set_enable_sum(&mut self, flag: bool) {
        self.enable_compute_sum = flag;
    }

    pub fn latency(&self) -> usize {
        if self.use_soft_masks {
            self.soft_masking.latency()
        } else {
            0
        }
    }

    pub fn get_noise_buffer(&self, magns: &mut Vec<f32>) {
        magns.clear();
        magns.extend_from_slice(&self.noise_buffer);
    }

    pub fn get_harmo_buffer(&self, magns: &mut Vec<f32>) {
        magns.clear();
        magns.extend_from_slice(&self.harmo_buffer);
    }

    pub fn get_sum_buffer(&self, magns: &mut Vec<f32>) {
        magns.clear();
        magns.extend_from_slice(&self.sum_buffer);
    }

    pub fn tracker_mut(&mut self) -> &mut PartialTracker {
        &mut self.partial_tracker
    }

    fn detect_partials(&mut self, magns: &[f32], phases: &[f32]) {
        self.partial_tracker.set_data(magns, phases);
        self.partial_tracker.detect_partials();
        self.partial_tracker.filter_partials();
        self.partial_tracker.extract_noise_envelope();
    }

    /// Mask favoring `s0`; bins where both envelopes vanish stay 0.
    fn compute_mask(s0_buf: &[f32], s1_buf: &[f32], s0_mask: &mut Vec<f32>) {
        s0_mask.clear();
        s0_mask.resize(s0_buf.len(), 0.0);

        for i in 0..s0_buf.len() {
            let s0 = s0_buf[i];
            let s1 = s1_buf[i];

            let sum = s0 + s1;
            if sum > EPS {
                s0_mask[i] = s0 / sum;
            }
        }
    }
}

impl OverlapAddProcessor for AirProcessor {
    fn process_spectrum(&mut self, spectrum: &mut [Complex32]) {
        let mut magns = std::mem::take(&mut self.tmp_magns);
        let mut phases = std::mem::take(&mut self.tmp_phases);
        utils::complex_to_magn_phase(&mut magns, &mut phases, spectrum);

        self.detect_partials(&magns, &phases);

        self.tmp_magns = magns;
        self.tmp_phases = phases;

        // Envelopes, denormalized back to linear amplitudes
        let mut noise = std::mem::take(&mut self.noise_buffer);
        self.partial_tracker.get_noise_envelope(&mut noise);
        self.partial_tracker.denorm_data(&mut noise);
        self.noise_buffer = noise;

        let mut harmo = std::mem::take(&mut self.harmo_buffer);
        self.partial_tracker.get_harmonic_envelope(&mut harmo);
        self.partial_tracker.denorm_data(&mut harmo);
        self.harmo_buffer = harmo;

        let (harmo_coeff, noise_coeff) = utils::mix_param_to_coeffs(self.mix);

        // Harmonic mask
        Self::compute_mask(&self.harmo_buffer, &self.noise_buffer, &mut self.tmp_mask);

        // The DC bin never belongs to the harmonic part
        if let Some(m0) = self.tmp_mask.first_mut() {
            *m0 = 0.0;
        }

        if !self.use_soft_masks {
            // Mask the input data directly, not the denormed envelopes

            // Harmonic part
            self.tmp_masked0.clear();
            self.tmp_masked0.extend_from_slice(spectrum);
            utils::mult_buffers_complex_real(&mut self.tmp_masked0, &self.tmp_mask);
            utils::mult_value_complex(&mut self.tmp_masked0, harmo_coeff);

            // Noise part
            self.tmp_mask_opp.clear();
            self.tmp_mask_opp.extend_from_slice(&self.tmp_mask);
            utils::compute_opposite(&mut self.tmp_mask_opp);

            self.tmp_masked1.clear();
            self.tmp_masked1.extend_from_slice(spectrum);
            utils::mult_buffers_complex_real(&mut self.tmp_masked1, &self.tmp_mask_opp);
            utils::mult_value_complex(&mut self.tmp_masked1, noise_coeff);

            for (i, s) in spectrum.iter_mut().enumerate() {
                *s = self.tmp_masked0[i] + self.tmp_masked1[i];
            }
        } else {
            self.tmp_sum.clear();
            self.tmp_sum.extend_from_slice(spectrum);

            let (masked0, masked1) = (&mut self.tmp_masked0, &mut self.tmp_masked1);
            self.soft_masking.process_centered(
                &mut self.tmp_sum,
                &self.tmp_mask,
                masked0,
                Some(masked1),
            );

            if self.soft_masking.is_processing_enabled() {
                // Apply the mix on the centered split
                utils::mult_value_complex(&mut self.tmp_masked0, harmo_coeff);
                utils::mult_value_complex(&mut self.tmp_masked1, noise_coeff);

                for (i, s) in spectrum.iter_mut().enumerate() {
                    *s = self.tmp_masked0[i] + self.tmp_masked1[i];
                }
            }
        }

        if self.enable_compute_sum {
            // Keep the resulting magnitudes for the spectrum view
            utils::complex_to_magn(&mut self.sum_buffer, spectrum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 2048;
    const SR: f32 = 44100.0;

    fn lobe_spectrum(center: usize, amp: f32, floor: f32) -> Vec<Complex32> {
        let mut spec = vec![Complex32::new(floor, 0.0); N / 2 + 1];
        for d in -4i32..=4 {
            let i = (center as i32 + d) as usize;
            let w = (-0.5 * (d as f32 / 1.5) * (d as f32 / 1.5)).exp();
            let phase = std::f32::consts::PI * i as f32;
            let magn = floor.max(amp * w);
            spec[i] = Complex32::from_polar(magn, phase);
        }
        spec
    }

    #[test]
    fn test_identity_with_full_harmonic_mix() {
        // mix = -1 keeps harmonics at unity and noise at zero only in the
        // noise coefficient; with mix = 0 both coefficients are 1 and the
        // hard path reconstructs the input exactly
        let mut air = AirProcessor::new(N, 4, SR);
        air.set_threshold(-100.0);
        air.set_mix(0.0);

        let input = lobe_spectrum(100, 0.5, 1e-6);
        let mut spectrum = input.clone();
        air.process_spectrum(&mut spectrum);

        for (a, b) in spectrum.iter().skip(1).zip(input.iter().skip(1)) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn test_full_air_mix_removes_tracked_partial() {
        let mut air = AirProcessor::new(N, 4, SR);
        air.set_threshold(-110.0);
        air.set_mix(1.0);

        // Several frames so the tracker locks onto the partial
        let mut spectrum = Vec::new();
        for _ in 0..8 {
            spectrum = lobe_spectrum(100, 0.5, 0.001);
            air.process_spectrum(&mut spectrum);
        }

        // The partial bin is strongly attenuated, the floor survives
        assert!(spectrum[100].norm() < 0.25, "peak {}", spectrum[100].norm());
        assert!(spectrum[600].norm() > 1e-5);
    }

    #[test]
    fn test_latency_zero_without_soft_masks() {
        let air = AirProcessor::new(N, 4, SR);
        assert_eq!(air.latency(), 0);

        let mut air = AirProcessor::new(N, 4, SR);
        air.set_use_soft_masks(true);
        // ((8-1) - 4) * (2048/4)
        assert_eq!(air.latency(), 3 * 512);
    }

    #[test]
    fn test_envelope_taps_are_published() {
        let mut air = AirProcessor::new(N, 4, SR);
        air.set_threshold(-110.0);

        for _ in 0..4 {
            let mut spectrum = lobe_spectrum(100, 0.5, 0.001);
            air.process_spectrum(&mut spectrum);
        }

        let mut noise = Vec::new();
        air.get_noise_buffer(&mut noise);
        let mut harmo = Vec::new();
        air.get_harmo_buffer(&mut harmo);
        let mut sum = Vec::new();
        air.get_sum_buffer(&mut sum);

        assert_eq!(noise.len(), N / 2 + 1);
        assert_eq!(harmo.len(), N / 2 + 1);
        assert!(!sum.is_empty());
    }
}
