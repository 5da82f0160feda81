//! Transient shaping from spectral data.
//!
//! Computes a per-sample "transientness" curve out of the frequency
//! domain: each bin votes at the sample position implied by its phase
//! slope, weighted by its magnitude (frequency weight) and by its phase
//! derivative over time (amplitude weight). The curve modulates the
//! resynthesized time frame as a dB gain, bounded so the output never
//! exceeds the input peak by more than 6 dB.
//!
//! The detection follows Werner Van Belle's transient observations.

use rustfft::num_complex::Complex32;

use crate::dsp::cma_smoother::Cma2Smoother;
use crate::dsp::overlap_add::OverlapAddProcessor;
use crate::dsp::utils::{self, EPS, TWO_PI};

// Detection + correction
const TRANSIENTNESS_COEFF: f32 = 5.0;

const DB_THRESHOLD_TR: f32 = -64.0;
const DB_EPS_TR: f32 = 1e-15;

const TRANS_COEFF_GLOBAL: f32 = 0.5;
const TRANS_COEFF_FREQ: f32 = 3.0;
const TRANS_COEFF_AMP: f32 = 1.0;

// CMA window fraction of the frame
const SMOOTH_FACTOR_TR: f32 = 4.0;

// Reference frame size the transientness was calibrated at
const NATIVE_BUFFER_SIZE_TR: f32 = 2048.0;

const MAX_GAIN_DB: f32 = 50.0;
const MAX_GAIN_CLIP_DB: f32 = 6.0;

// Just to be sure to not reach exactly the clip bound
const CLIP_FACTOR: f32 = 0.999;

pub struct TransientShaperProcessor {
    /// 0..1, widens or narrows the smoothing of the curve
    precision: f32,
    /// -1..+1, negative softens transients, positive hardens them
    soft_hard: f32,
    /// Balance between the amplitude and frequency weights
    freq_amp_ratio: f32,

    prev_phases: Vec<f32>,
    transientness: Vec<f32>,

    smoother: Cma2Smoother,

    // Scratch
    tmp_full: Vec<Complex32>,
    tmp_magns: Vec<f32>,
    tmp_phases: Vec<f32>,
    tmp_trans_s: Vec<f32>,
    tmp_trans_p: Vec<f32>,
    tmp_smooth: Vec<f32>,
    tmp_sample_ids: Vec<usize>,
    tmp_gains: Vec<f32>,
}

impl TransientShaperProcessor {
    pub fn new(_sample_rate: f32) -> Self {
        Self {
            precision: 0.0,
            soft_hard: 0.0,
            freq_amp_ratio: 0.5,
            prev_phases: Vec::new(),
            transientness: Vec::new(),
            smoother: Cma2Smoother::new(),
            tmp_full: Vec::new(),
            tmp_magns: Vec::new(),
            tmp_phases: Vec::new(),
            tmp_trans_s: Vec::new(),
            tmp_trans_p: Vec::new(),
            tmp_smooth: Vec::new(),
            tmp_sample_ids: Vec::new(),
            tmp_gains: Vec::new(),
        }
    }

    pub fn reset(&mut self, _sample_rate: f32) {
        self.prev_phases.clear();
    }

    pub fn set_precision(&mut self, precision: f32) {
        self.precision = precision;
    }

    pub fn set_soft_hard(&mut self, soft_hard: f32) {
        self.soft_hard = soft_hard;
    }

    pub fn set_freq_amp_ratio(&mut self, ratio: f32) {
        self.freq_amp_ratio = ratio;
    }

    pub fn get_transientness(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(&self.transientness);
    }

    /// Gain ceiling in transientness units: the dB gain is
    /// MAX_GAIN * soft_hard * t, so cap t where that reaches the clip.
    fn compute_max_transientness(&self) -> f32 {
        if self.soft_hard.abs() < EPS {
            return CLIP_FACTOR;
        }

        (MAX_GAIN_CLIP_DB / (MAX_GAIN_DB * self.soft_hard.abs())) * CLIP_FACTOR
    }

    fn compute_transientness(&mut self) {
        let size = self.tmp_phases.len();

        self.transientness.clear();
        self.transientness.resize(size, 0.0);

        self.tmp_trans_s.clear();
        self.tmp_trans_s.resize(size, 0.0);
        self.tmp_trans_p.clear();
        self.tmp_trans_p.resize(size, 0.0);

        utils::fft_ids_to_sample_ids(&self.tmp_phases, &mut self.tmp_sample_ids);

        let db_threshold_inv = 1.0 / DB_THRESHOLD_TR;
        let freq_coeff = TRANS_COEFF_FREQ * TRANS_COEFF_GLOBAL;
        let amp_coeff = TRANS_COEFF_AMP * TRANS_COEFF_GLOBAL;

        let have_prev = self.prev_phases.len() == size;

        for i in 0..size {
            let sample_id = self.tmp_sample_ids[i];

            let magn = self.tmp_magns[i];

            // Ignore small magns
            let magn_db = utils::amp_to_db_bounded(magn, DB_EPS_TR, DB_THRESHOLD_TR);
            if magn_db <= DB_THRESHOLD_TR {
                continue;
            }

            let freq_weight = -(magn_db - DB_THRESHOLD_TR) * db_threshold_inv * freq_coeff;

            let mut amp_weight = 0.0;
            if have_prev {
                // Phase derivative over time, a strong transient marker
                let phase0 = self.prev_phases[i];
                let mut phase1 = self.tmp_phases[i];

                while phase1 < phase0 {
                    phase1 += TWO_PI;
                }

                let mut delta = (phase1 - phase0) % TWO_PI;
                if delta > std::f32::consts::PI {
                    delta = TWO_PI - delta;
                }

                amp_weight = delta / std::f32::consts::PI * amp_coeff;
            }

            self.tmp_trans_s[sample_id] += freq_weight;
            self.tmp_trans_p[sample_id] += amp_weight;
        }

        // The sample mapping lands reversed in time
        self.tmp_trans_s.reverse();
        self.tmp_trans_p.reverse();

        let smooth_factor = 1.0 - self.precision;
        self.smooth_transients_s(smooth_factor);
        self.smooth_transients_p(smooth_factor);

        let buf_coeff = size as f32 / NATIVE_BUFFER_SIZE_TR;
        utils::mult_value(&mut self.tmp_trans_s, buf_coeff);
        utils::mult_value(&mut self.tmp_trans_p, buf_coeff);

        for i in 0..size {
            let ts = self.tmp_trans_s[i];
            let tp = self.tmp_trans_p[i];

            let a = (tp - ts).max(0.0);

            // Without the 0.5 the global volume rises compared to bypass
            let b = ts * 0.5;

            self.transientness[i] = self.freq_amp_ratio * a + (1.0 - self.freq_amp_ratio) * b;
        }

        utils::clip_min(&mut self.transientness, 0.0);

        utils::mult_value(&mut self.transientness, TRANSIENTNESS_COEFF);
    }

    fn smooth_transients_s(&mut self, smooth_factor: f32) {
        if smooth_factor <= 0.0 {
            return;
        }

        let window = (smooth_factor * self.tmp_trans_s.len() as f32 / SMOOTH_FACTOR_TR) as usize;

        self.tmp_smooth.clear();
        self.tmp_smooth.resize(self.tmp_trans_s.len(), 0.0);
        if self
            .smoother
            .process_one(&self.tmp_trans_s, &mut self.tmp_smooth, window)
        {
            std::mem::swap(&mut self.tmp_trans_s, &mut self.tmp_smooth);
        }

        utils::clip_min(&mut self.tmp_trans_s, 0.0);
    }

    fn smooth_transients_p(&mut self, smooth_factor: f32) {
        if smooth_factor <= 0.0 {
            return;
        }

        let window = (smooth_factor * self.tmp_trans_p.len() as f32 / SMOOTH_FACTOR_TR) as usize;

        self.tmp_smooth.clear();
        self.tmp_smooth.resize(self.tmp_trans_p.len(), 0.0);
        if self
            .smoother
            .process_one(&self.tmp_trans_p, &mut self.tmp_smooth, window)
        {
            std::mem::swap(&mut self.tmp_trans_p, &mut self.tmp_smooth);
        }

        utils::clip_min(&mut self.tmp_trans_p, 0.0);
    }
}

impl OverlapAddProcessor for TransientShaperProcessor {
    fn process_spectrum(&mut self, spectrum: &mut [Complex32]) {
        if self.soft_hard.abs() < EPS {
            return;
        }

        // The sample-space mapping needs the full spectrum
        let half = spectrum.len();
        let n = (half - 1) * 2;

        self.tmp_full.clear();
        self.tmp_full.resize(n, Complex32::default());
        self.tmp_full[..half].copy_from_slice(spectrum);
        for i in 1..(half - 1) {
            self.tmp_full[n - i] = spectrum[i].conj();
        }

        utils::complex_to_magn_phase(&mut self.tmp_magns, &mut self.tmp_phases, &self.tmp_full);

        // Rescale magnitudes into the range the weights were tuned for
        let fix = self.tmp_magns.len() as f32 / 4.0;
        utils::mult_value(&mut self.tmp_magns, fix);

        self.compute_transientness();

        self.prev_phases.clear();
        self.prev_phases.extend_from_slice(&self.tmp_phases);
    }

    fn process_samples(&mut self, samples: &mut [f32]) {
        if self.soft_hard.abs() < EPS {
            return;
        }
        if self.transientness.len() != samples.len() {
            return;
        }

        // Clip so the gain never exceeds the headroom bound
        let max_trans = self.compute_max_transientness();

        self.tmp_gains.clear();
        self.tmp_gains.extend_from_slice(&self.transientness);
        utils::clip_max(&mut self.tmp_gains, max_trans);

        let gain_db = MAX_GAIN_DB * self.soft_hard;
        utils::mult_value(&mut self.tmp_gains, gain_db);
        utils::db_to_amp_buf(&mut self.tmp_gains);

        utils::mult_buffers(samples, &self.tmp_gains);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_spectrum(half: usize) -> Vec<Complex32> {
        // A click has flat magnitude and linear phase
        (0..half)
            .map(|i| Complex32::from_polar(0.5, -0.3 * i as f32))
            .collect()
    }

    #[test]
    fn test_inactive_at_zero_soft_hard() {
        let mut ts = TransientShaperProcessor::new(44100.0);

        let mut spectrum = impulse_spectrum(1025);
        let before = spectrum.clone();
        ts.process_spectrum(&mut spectrum);

        for (a, b) in spectrum.iter().zip(before.iter()) {
            assert_eq!(a, b);
        }

        let mut samples = vec![0.25f32; 2048];
        ts.process_samples(&mut samples);
        assert!(samples.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_gain_is_bounded_by_clip() {
        for &soft_hard in &[0.25f32, 0.5, 1.0, -1.0] {
            let mut ts = TransientShaperProcessor::new(44100.0);
            ts.set_soft_hard(soft_hard);

            let mut spectrum = impulse_spectrum(1025);
            ts.process_spectrum(&mut spectrum);
            let mut spectrum = impulse_spectrum(1025);
            ts.process_spectrum(&mut spectrum);

            let mut samples = vec![0.25f32; 2048];
            ts.process_samples(&mut samples);

            let max_allowed = 0.25 * utils::db_to_amp(MAX_GAIN_CLIP_DB);
            let peak = samples.iter().cloned().fold(0.0f32, |m, v| m.max(v.abs()));
            assert!(
                peak <= max_allowed + 1e-5,
                "soft_hard {} peak {} allowed {}",
                soft_hard,
                peak,
                max_allowed
            );
        }
    }

    #[test]
    fn test_hardening_boosts_somewhere() {
        let mut ts = TransientShaperProcessor::new(44100.0);
        ts.set_soft_hard(1.0);
        ts.set_freq_amp_ratio(0.0);

        let mut spectrum = impulse_spectrum(1025);
        ts.process_spectrum(&mut spectrum);

        let mut trans = Vec::new();
        ts.get_transientness(&mut trans);
        assert_eq!(trans.len(), 2048);
        assert!(trans.iter().any(|&v| v > 0.0));
    }
}
