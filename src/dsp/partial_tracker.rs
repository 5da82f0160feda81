//! Sinusoidal partial tracking.
//!
//! Per frame: preprocess the magnitudes (time smoothing, normalized dB
//! with A-weighting, a natural-log copy for detection), detect peaks with
//! the Billauer detector, refine them with QIFFT, then hand the partial
//! list to the association strategy. The tracker also extracts the noise
//! and harmonic envelopes used by the air split.
//!
//! Amplitude scales follow the association math: partials carry
//! normalized-dB amplitudes outside `filter_partials` and natural-log
//! amplitudes inside it. The empirical alpha0/beta0 corrections assume
//! this scaling.
//!
//! See https://www.dsprelated.com/freebooks/sasp/PARSHL_Program.html for
//! the tracking background.

use crate::dsp::a_weighting;
use crate::dsp::partial::{Partial, PartialState};
use crate::dsp::partial_filter::PartialFilter;
use crate::dsp::partial_filter_amfm::PartialFilterAmfm;
use crate::dsp::partial_filter_marchand::PartialFilterMarchand;
use crate::dsp::peak_detector::{Peak, PeakDetector};
use crate::dsp::qifft::{self, EMPIR_ALPHA0_COEFF, EMPIR_BETA0_COEFF};
use crate::dsp::scale::{self, Scale, ScaleType};
use crate::dsp::utils::{self, EPS};

pub const MIN_AMP_DB: f32 = -120.0;

const DISCARD_FLAT_PARTIAL_COEFF: f32 = 25000.0;

const GLUE_BARBS_AMP_RATIO: f32 = 10.0;

// Peak-index average sharpening power; higher favors the loud bins
const PEAK_INDEX_AVG_COEFF: f32 = 3.0;

// Billauer with real prominence keeps the low-frequency peaks, so start
// from the first bin
const DETECT_PARTIALS_START_INDEX: usize = 0;

const DEFAULT_TIME_SMOOTH_COEFF: f32 = 0.5;
const DEFAULT_NOISE_SMOOTH_COEFF: f32 = 0.5;

// A-weighting reference: 0 dB at 1 kHz
const A_WEIGHT_ZERO_DB_FREQ: f32 = 1000.0;

// Noise isles narrower than this are musical noise
const MUSICAL_NOISE_MAX_ISLE: usize = 2;

/// Association strategy selection, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialFilterKind {
    AmFm,
    Marchand,
}

pub struct PartialTracker {
    buffer_size: usize,
    sample_rate: f32,

    /// Peak rejection threshold in dB (MIN_AMP_DB..0)
    threshold: f32,

    /// Normalized detection ceiling, None scans the whole half spectrum
    max_detect_freq: Option<f32>,

    scale: Scale,
    x_scale: ScaleType,
    y_scale: ScaleType,
    // Natural-log scale for QIFFT and detection
    y_scale2: ScaleType,

    time_smooth_coeff: f32,
    time_smooth_noise_coeff: f32,

    a_weights: Vec<f32>,

    peak_detector: PeakDetector,
    partial_filter: Box<dyn PartialFilter>,

    // Barb gluing / flat discard / height threshold pass; off in the
    // default Billauer mode where the delta threshold does this work
    post_process_enabled: bool,

    current_magns: Vec<f32>,
    current_phases: Vec<f32>,

    linear_magns: Vec<f32>,
    log_magns: Vec<f32>,

    prev_magns: Vec<f32>,

    result: Vec<Partial>,

    noise_envelope: Vec<f32>,
    prev_noise_envelope: Vec<f32>,
    harmonic_envelope: Vec<f32>,

    // Scratch
    tmp_peaks: Vec<Peak>,
    tmp_partials: Vec<Partial>,
    tmp_twins: Vec<Partial>,
    tmp_buf0: Vec<f32>,
    tmp_buf1: Vec<f32>,
}

impl PartialTracker {
    pub fn new(buffer_size: usize, sample_rate: f32, filter_kind: PartialFilterKind) -> Self {
        // In natural-log units: a quarter of the usable dynamic range
        let max_delta = -MIN_AMP_DB / 4.0;

        let partial_filter: Box<dyn PartialFilter> = match filter_kind {
            PartialFilterKind::AmFm => Box::new(PartialFilterAmfm::new(buffer_size, sample_rate)),
            PartialFilterKind::Marchand => {
                Box::new(PartialFilterMarchand::new(buffer_size, sample_rate))
            }
        };

        Self {
            buffer_size,
            sample_rate,
            threshold: -60.0,
            max_detect_freq: None,
            scale: Scale::new(),
            x_scale: ScaleType::Linear,
            y_scale: ScaleType::Db,
            y_scale2: ScaleType::LogNoNorm,
            time_smooth_coeff: DEFAULT_TIME_SMOOTH_COEFF,
            time_smooth_noise_coeff: DEFAULT_NOISE_SMOOTH_COEFF,
            a_weights: a_weighting::compute_a_weights(buffer_size / 2, sample_rate),
            peak_detector: PeakDetector::new(max_delta),
            partial_filter,
            post_process_enabled: false,
            current_magns: Vec::new(),
            current_phases: Vec::new(),
            linear_magns: Vec::new(),
            log_magns: Vec::new(),
            prev_magns: Vec::new(),
            result: Vec::new(),
            noise_envelope: Vec::new(),
            prev_noise_envelope: Vec::new(),
            harmonic_envelope: Vec::new(),
            tmp_peaks: Vec::new(),
            tmp_partials: Vec::new(),
            tmp_twins: Vec::new(),
            tmp_buf0: Vec::new(),
            tmp_buf1: Vec::new(),
        }
    }

    pub fn reset(&mut self, buffer_size: usize, sample_rate: f32) {
        self.buffer_size = buffer_size;
        self.sample_rate = sample_rate;

        self.result.clear();
        self.current_magns.clear();
        self.current_phases.clear();
        self.prev_magns.clear();
        self.prev_noise_envelope.clear();

        self.partial_filter.reset(buffer_size, sample_rate);

        self.a_weights = a_weighting::compute_a_weights(buffer_size / 2, sample_rate);
    }

    pub fn min_amp_db(&self) -> f32 {
        MIN_AMP_DB
    }

    /// Threshold in dB; also drives the Billauer delta as a fraction of
    /// its range.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;

        let fraction = ((threshold - MIN_AMP_DB) / -MIN_AMP_DB).clamp(0.0, 1.0);
        self.peak_detector.set_threshold(fraction);
    }

    pub fn set_threshold2(&mut self, threshold2: f32) {
        self.peak_detector.set_threshold2(threshold2);
    }

    pub fn set_max_detect_freq(&mut self, max_freq: Option<f32>) {
        self.max_detect_freq = max_freq;
    }

    pub fn set_time_smooth_coeff(&mut self, coeff: f32) {
        self.time_smooth_coeff = coeff;
    }

    pub fn set_time_smooth_noise_coeff(&mut self, coeff: f32) {
        self.time_smooth_noise_coeff = coeff;
    }

    pub fn set_post_process_enabled(&mut self, flag: bool) {
        self.post_process_enabled = flag;
    }

    /// Feed one frame of linear magnitudes and wrapped phases.
    pub fn set_data(&mut self, magns: &[f32], phases: &[f32]) {
        self.current_magns.clear();
        self.current_magns.extend_from_slice(magns);
        self.current_phases.clear();
        self.current_phases.extend_from_slice(phases);

        // Time smoothing removes noise and makes neater peaks
        utils::smooth_buffers(
            &mut self.current_magns,
            &mut self.prev_magns,
            self.time_smooth_coeff,
        );

        self.pre_process();
    }

    pub fn get_pre_processed_magns(&self, magns: &mut Vec<f32>) {
        magns.clear();
        magns.extend_from_slice(&self.current_magns);
    }

    /// Normalized-dB magnitudes on the unscaled (linear) frequency axis,
    /// for display curves.
    pub fn get_linear_magns(&self, magns: &mut Vec<f32>) {
        magns.clear();
        magns.extend_from_slice(&self.linear_magns);
    }

    pub fn detect_partials(&mut self) {
        let max_index = match self.max_detect_freq {
            Some(f) => {
                let max_bin = (f * self.buffer_size as f32 * 0.5) as usize;
                max_bin.min(self.log_magns.len().saturating_sub(1))
            }
            None => self.log_magns.len().saturating_sub(1),
        };

        self.peak_detector.detect_peaks(
            &self.log_magns,
            &mut self.tmp_peaks,
            DETECT_PARTIALS_START_INDEX,
            max_index,
        );

        self.compute_partials();

        // Back from the log scale to normalized dB for the trackers
        for p in self.tmp_partials.iter_mut() {
            p.amp = qifft_scale_to_partial_scale(p.amp);
        }

        if self.post_process_enabled {
            let magns = std::mem::take(&mut self.current_magns);
            let mut partials = std::mem::take(&mut self.tmp_partials);
            self.post_process_partials(&magns, &mut partials);
            self.current_magns = magns;
            self.tmp_partials = partials;
        }

        self.result.clear();
        self.result.append(&mut self.tmp_partials);
    }

    /// Run the association strategy. Amplitudes swap to log scale around
    /// the call; the AM/FM likelihoods are calibrated for it.
    pub fn filter_partials(&mut self) {
        for p in self.result.iter_mut() {
            p.amp = partial_scale_to_qifft_scale(p.amp);
        }

        let mut result = std::mem::take(&mut self.result);
        self.partial_filter.filter_partials(&mut result);
        self.result = result;

        for p in self.result.iter_mut() {
            p.amp = qifft_scale_to_partial_scale(p.amp);
        }
    }

    pub fn get_partials(&self, partials: &mut Vec<Partial>) {
        partials.clear();
        partials.extend(self.result.iter().filter(|p| p.was_alive).cloned());
    }

    pub fn get_raw_partials(&self, partials: &mut Vec<Partial>) {
        partials.clear();
        partials.extend_from_slice(&self.result);
    }

    pub fn clear_result(&mut self) {
        self.result.clear();
    }

    /// Noise envelope: the preprocessed magnitudes with every alive
    /// partial span zeroed, time smoothed, musical noise suppressed.
    pub fn extract_noise_envelope(&mut self) {
        self.noise_envelope.clear();
        self.noise_envelope.extend_from_slice(&self.current_magns);

        for p in self.result.iter() {
            if p.state != PartialState::Alive {
                continue;
            }
            let right = p.right_index.min(self.noise_envelope.len().saturating_sub(1));
            if p.left_index > right {
                continue;
            }
            for v in self.noise_envelope[p.left_index..=right].iter_mut() {
                *v = 0.0;
            }
        }

        utils::smooth_buffers(
            &mut self.noise_envelope,
            &mut self.prev_noise_envelope,
            self.time_smooth_noise_coeff,
        );

        self.process_musical_noise();

        // Harmonic envelope is what the noise envelope leaves over
        self.harmonic_envelope.clear();
        self.harmonic_envelope.extend_from_slice(&self.current_magns);
        for (h, n) in self
            .harmonic_envelope
            .iter_mut()
            .zip(self.noise_envelope.iter())
        {
            *h = (*h - n).max(0.0);
        }
    }

    pub fn get_noise_envelope(&self, env: &mut Vec<f32>) {
        env.clear();
        env.extend_from_slice(&self.noise_envelope);
    }

    pub fn get_harmonic_envelope(&self, env: &mut Vec<f32>) {
        env.clear();
        env.extend_from_slice(&self.harmonic_envelope);
    }

    /// Bring partials back to physical units: Hz frequencies, linear
    /// amplitudes, linear-axis bin indices.
    pub fn denorm_partials(&mut self, partials: &mut [Partial]) {
        let hz_per_bin = self.sample_rate / self.buffer_size as f32;

        for p in partials.iter_mut() {
            // Reverse the frequency axis scale
            let freq = scale::apply_scale_inv(self.x_scale, p.freq, 0.0, self.sample_rate * 0.5);
            p.freq = freq * self.sample_rate * 0.5;

            // Reverse A-weighting, then back to linear amplitude
            let bin_num = (p.freq / hz_per_bin) as usize;
            p.amp = self.process_a_weighting(bin_num, self.buffer_size / 2, p.amp, true);
            p.amp = scale::apply_scale(ScaleType::DbInv, p.amp, MIN_AMP_DB, 0.0);

            p.left_index = self.denorm_bin_index(p.left_index);
            p.peak_index = self.denorm_bin_index(p.peak_index);
            p.right_index = self.denorm_bin_index(p.right_index);
        }
    }

    /// Bring an envelope back to linear amplitudes on the linear axis.
    pub fn denorm_data(&mut self, data: &mut Vec<f32>) {
        let fb_type = scale::type_to_filter_bank_type(self.x_scale);
        self.tmp_buf0.clear();
        let num = data.len();
        let sample_rate = self.sample_rate;
        let mut scaled = std::mem::take(&mut self.tmp_buf0);
        self.scale
            .apply_scale_filter_bank_inv(fb_type, &mut scaled, data, sample_rate, num);
        data.clear();
        data.extend_from_slice(&scaled);
        self.tmp_buf0 = scaled;

        self.pre_process_a_weighting(data, true);

        scale::apply_scale_for_each(ScaleType::DbInv, data, MIN_AMP_DB, 0.0);
    }

    pub fn denorm_bin_index(&self, idx: usize) -> usize {
        let freq = idx as f32 / (self.buffer_size as f32 * 0.5);
        let freq = scale::apply_scale_inv(self.x_scale, freq, 0.0, self.sample_rate * 0.5);

        let res = freq * self.buffer_size as f32 * 0.5;

        let max_bin = self.buffer_size / 2 - 1;
        (res.round().max(0.0) as usize).min(max_bin)
    }

    fn pre_process(&mut self) {
        // Raw magnitudes in normalized dB, linear frequency axis
        self.linear_magns.clear();
        self.linear_magns.extend_from_slice(&self.current_magns);
        let mut linear = std::mem::take(&mut self.linear_magns);
        self.pre_process_data_y(&mut linear);
        self.linear_magns = linear;

        // Natural-log copy, what detection and QIFFT see
        self.log_magns.clear();
        self.log_magns.extend_from_slice(&self.current_magns);
        scale::apply_scale_for_each(self.y_scale2, &mut self.log_magns, 0.0, 0.0);

        // Main magnitudes: dB + A-weighting, then the frequency axis remap
        let mut magns = std::mem::take(&mut self.current_magns);
        self.pre_process_data_y(&mut magns);
        self.pre_process_data_x(&mut magns);
        self.current_magns = magns;

        // Unwrap along frequency first, so the remapped interpolation of
        // phases is meaningful
        let mut phases = std::mem::take(&mut self.current_phases);
        utils::unwrap_phases(&mut phases, true);
        self.pre_process_data_x(&mut phases);
        self.current_phases = phases;
    }

    fn pre_process_data_y(&mut self, data: &mut Vec<f32>) {
        scale::apply_scale_for_each(self.y_scale, data, MIN_AMP_DB, 0.0);

        // Better tracking on high frequencies with this
        self.pre_process_a_weighting(data, false);
    }

    fn pre_process_data_x(&mut self, data: &mut Vec<f32>) {
        let fb_type = scale::type_to_filter_bank_type(self.x_scale);
        let num = data.len();
        let sample_rate = self.sample_rate;

        let mut scaled = std::mem::take(&mut self.tmp_buf1);
        self.scale
            .apply_scale_filter_bank(fb_type, &mut scaled, data, sample_rate, num);
        data.clear();
        data.extend_from_slice(&scaled);
        self.tmp_buf1 = scaled;
    }

    /// Additive A-weighting on normalized-dB magnitudes, above the 1 kHz
    /// reference bin only. `reverse` subtracts the weights back out.
    fn pre_process_a_weighting(&self, magns: &mut [f32], reverse: bool) {
        let num_bins = magns.len();
        if num_bins == 0 {
            return;
        }

        let hz_per_bin = 0.5 * self.sample_rate / num_bins as f32;
        let zero_db_bin = (A_WEIGHT_ZERO_DB_FREQ / hz_per_bin) as usize;

        for i in zero_db_bin..num_bins {
            let a = match self.a_weights.get(i) {
                Some(&a) => a,
                None => break,
            };

            let db = MIN_AMP_DB + magns[i] * -MIN_AMP_DB;
            let db = if reverse { db - a } else { db + a };

            magns[i] = ((db - MIN_AMP_DB) / -MIN_AMP_DB).clamp(0.0, 1.0);
        }
    }

    fn process_a_weighting(&self, bin_num: usize, num_bins: usize, magn: f32, reverse: bool) -> f32 {
        let hz_per_bin = 0.5 * self.sample_rate / num_bins as f32;
        let zero_db_bin = (A_WEIGHT_ZERO_DB_FREQ / hz_per_bin) as usize;

        if bin_num <= zero_db_bin || bin_num >= self.a_weights.len() {
            return magn;
        }

        let a = self.a_weights[bin_num];

        let db = MIN_AMP_DB + magn * -MIN_AMP_DB;
        let db = if reverse { db - a } else { db + a };

        ((db - MIN_AMP_DB) / -MIN_AMP_DB).clamp(0.0, 1.0)
    }

    fn compute_partials(&mut self) {
        self.tmp_partials.clear();

        // Phases are already frequency-unwrapped by the preprocessing
        let buffer_size = self.buffer_size;

        for peak in self.tmp_peaks.iter() {
            let qpeak = qifft::find_peak(
                &self.log_magns,
                &self.current_phases,
                buffer_size,
                peak.peak_index,
            );

            let mut p = Partial::new();
            p.peak_index = peak.peak_index;
            p.left_index = peak.left_index;
            p.right_index = peak.right_index;

            p.bin_idx_f = qpeak.bin_idx;
            p.freq = qpeak.freq;
            p.amp = qpeak.amp;
            p.phase = qpeak.phase;

            // Empirical corrections so the next frame's values match the
            // current values plus the derivative
            p.alpha0 = qpeak.alpha0 * EMPIR_ALPHA0_COEFF;
            p.beta0 = qpeak.beta0 * EMPIR_BETA0_COEFF;

            let peak_index_f = qpeak.bin_idx;
            p.peak_index = (peak_index_f.round().max(0.0) as usize)
                .min(self.log_magns.len().saturating_sub(1));

            p.kf.init_estimate(p.freq);

            self.tmp_partials.push(p);
        }
    }

    /// Optional post-detection cleanup pass: zero-frequency suppression,
    /// barb gluing, flat-partial discard, peak-height threshold.
    pub fn post_process_partials(&mut self, magns: &[f32], partials: &mut Vec<Partial>) {
        suppress_zero_freq_partials(partials);

        self.glue_partial_barbs(magns, partials);

        discard_flat_partials(magns, partials);

        self.threshold_partials_peak_height(magns, partials);
    }

    /// Glue "barbs" onto their main partial: a small peak sharing a foot
    /// with a big one, sitting in the middle of the big peak's slope, on
    /// the slope side.
    fn glue_partial_barbs(&mut self, magns: &[f32], partials: &mut Vec<Partial>) {
        partials.sort_by(Partial::order_by_freq);

        self.tmp_twins.clear();
        let result = &mut self.tmp_twins;

        let mut idx = 0;
        while idx < partials.len() {
            let current = partials[idx].clone();

            let mut twins: Vec<Partial> = vec![current.clone()];

            for other in partials.iter().skip(idx + 1) {
                if other.left_index != current.right_index {
                    continue;
                }

                // Twin partial: check the amplitude ratio
                let prom_cur = compute_peak_prominence(
                    magns,
                    current.peak_index,
                    current.left_index,
                    current.right_index,
                );
                let prom_other = compute_peak_prominence(
                    magns,
                    other.peak_index,
                    other.left_index,
                    other.right_index,
                );

                if prom_other <= EPS {
                    continue;
                }

                let ratio = prom_cur / prom_other;
                if ratio <= GLUE_BARBS_AMP_RATIO && ratio >= 1.0 / GLUE_BARBS_AMP_RATIO {
                    continue;
                }

                // The barb must sit in the middle of a side of the main
                // partial (in height), on the descending side
                let (in_the_middle, on_the_side) = if prom_cur < prom_other {
                    let hf = compute_peak_higher_foot(magns, current.left_index, current.right_index);
                    let lf = compute_peak_lower_foot(magns, other.left_index, other.right_index);

                    let middle = hf > lf && hf < other.amp;

                    let other_left = magns[other.left_index];
                    let other_right = magns[other.right_index];
                    (middle, other_left > other_right)
                } else {
                    let hf = compute_peak_higher_foot(magns, other.left_index, other.right_index);
                    let lf = compute_peak_lower_foot(magns, current.left_index, current.right_index);

                    let middle = hf > lf && hf < current.amp;

                    let cur_left = magns[current.left_index];
                    let cur_right = magns[current.right_index];
                    (middle, cur_left < cur_right)
                };

                if in_the_middle && on_the_side {
                    twins.push(other.clone());
                }
            }

            if twins.len() > 1 {
                // Compute the glued partial
                let left_index = twins[0].left_index;
                let right_index = twins[twins.len() - 1].right_index;

                let peak_index_f = compute_peak_index_avg(magns, left_index, right_index);

                let max_amp = twins
                    .iter()
                    .map(|t| t.amp)
                    .fold(f32::NEG_INFINITY, f32::max);

                let mut glued = Partial::new();
                glued.left_index = left_index;
                glued.right_index = right_index;
                // Artificial peak
                glued.peak_index = peak_index_f.round() as usize;
                glued.freq = peak_index_f / (self.buffer_size as f32 * 0.5);
                glued.amp = max_amp;
                glued.kf.init_estimate(glued.freq);

                result.push(glued);
            } else {
                result.push(twins[0].clone());
            }

            idx += twins.len();
        }

        std::mem::swap(partials, result);
    }

    fn threshold_partials_peak_height(&self, magns: &[f32], partials: &mut Vec<Partial>) {
        let thrs_norm = ((self.threshold - MIN_AMP_DB) / -MIN_AMP_DB).clamp(0.0, 1.0);

        partials.retain(|p| {
            let height =
                compute_peak_height(magns, p.peak_index, p.left_index, p.right_index).max(0.0);
            height >= thrs_norm
        });
    }

    fn process_musical_noise(&mut self) {
        let env = &mut self.noise_envelope;

        // Zero the isolated isles: short runs of energy fenced by zeroed
        // partial zones read as musical noise
        let mut i = 0;
        while i < env.len() {
            if env[i] <= EPS {
                i += 1;
                continue;
            }

            let start = i;
            while i < env.len() && env[i] > EPS {
                i += 1;
            }

            let bounded_left = start > 0;
            let bounded_right = i < env.len();
            if bounded_left && bounded_right && (i - start) <= MUSICAL_NOISE_MAX_ISLE {
                for v in env[start..i].iter_mut() {
                    *v = 0.0;
                }
            }
        }
    }
}

/// Normalized-dB amplitude to the natural-log scale the association
/// likelihoods are calibrated for.
fn partial_scale_to_qifft_scale(amp_db_norm: f32) -> f32 {
    let amp = scale::apply_scale(ScaleType::DbInv, amp_db_norm, MIN_AMP_DB, 0.0);
    scale::apply_scale(ScaleType::LogNoNorm, amp, MIN_AMP_DB, 0.0)
}

fn qifft_scale_to_partial_scale(amp_log: f32) -> f32 {
    let amp = scale::apply_scale(ScaleType::LogNoNormInv, amp_log, MIN_AMP_DB, 0.0);
    scale::apply_scale(ScaleType::Db, amp, MIN_AMP_DB, 0.0)
}

fn suppress_zero_freq_partials(partials: &mut Vec<Partial>) {
    partials.retain(|p| p.freq >= EPS);
}

fn discard_flat_partials(magns: &[f32], partials: &mut Vec<Partial>) {
    partials.retain(|p| {
        let amp = magns[p.peak_index];
        let bin_diff = (p.right_index - p.left_index) as f32;
        if amp <= EPS {
            return false;
        }
        bin_diff / amp <= DISCARD_FLAT_PARTIAL_COEFF
    });
}

fn compute_peak_prominence(magns: &[f32], peak_index: usize, left: usize, right: usize) -> f32 {
    let max_foot = magns[left].max(magns[right]);
    magns[peak_index] - max_foot
}

/// Inverse of prominence: height above the lower foot.
fn compute_peak_height(magns: &[f32], peak_index: usize, left: usize, right: usize) -> f32 {
    let min_foot = magns[left].min(magns[right]);
    magns[peak_index] - min_foot
}

fn compute_peak_higher_foot(magns: &[f32], left: usize, right: usize) -> f32 {
    magns[left].max(magns[right])
}

fn compute_peak_lower_foot(magns: &[f32], left: usize, right: usize) -> f32 {
    magns[left].min(magns[right])
}

/// Amplitude-weighted average index; smoother over time than taking the
/// raw maximum.
fn compute_peak_index_avg(magns: &[f32], left: usize, right: usize) -> f32 {
    let mut sum_index = 0.0;
    let mut sum_magns = 0.0;

    for (i, &m) in magns.iter().enumerate().take(right + 1).skip(left) {
        let m = m.powf(PEAK_INDEX_AVG_COEFF);
        sum_index += i as f32 * m;
        sum_magns += m;
    }

    if sum_magns < EPS {
        return 0.0;
    }

    sum_index / sum_magns
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 2048;
    const SR: f32 = 44100.0;

    /// Linear magnitudes with a windowed-sine-like lobe at `center`.
    fn lobe_magns(center: usize, amp: f32) -> Vec<f32> {
        let mut magns = vec![1e-9f32; N / 2];
        for d in -4i32..=4 {
            let i = (center as i32 + d) as usize;
            let w = (-0.5 * (d as f32 / 1.5) * (d as f32 / 1.5)).exp();
            magns[i] = amp * w;
        }
        magns
    }

    /// Unwrapped phases with the pi-per-bin ramp of a real analysis frame;
    /// a flat phase would read as heavy amplitude modulation in QIFFT.
    fn ramp_phases() -> Vec<f32> {
        (0..N / 2)
            .map(|i| std::f32::consts::PI * i as f32)
            .collect()
    }

    fn tracker() -> PartialTracker {
        let mut t = PartialTracker::new(N, SR, PartialFilterKind::AmFm);
        t.set_threshold(-100.0);
        t
    }

    #[test]
    fn test_detects_single_partial() {
        let mut t = tracker();

        let magns = lobe_magns(100, 0.5);
        let phases = ramp_phases();

        t.set_data(&magns, &phases);
        t.detect_partials();

        let mut partials = Vec::new();
        t.get_raw_partials(&mut partials);

        assert_eq!(partials.len(), 1);
        let p = &partials[0];
        assert!((p.bin_idx_f - 100.0).abs() < 0.5, "bin {}", p.bin_idx_f);
        // Normalized frequency
        assert!((p.freq - 100.0 / (N as f32 * 0.5)).abs() < 1e-3);
    }

    #[test]
    fn test_partial_denormalization() {
        let mut t = tracker();

        let magns = lobe_magns(100, 0.5);
        let phases = ramp_phases();

        t.set_data(&magns, &phases);
        t.detect_partials();

        let mut partials = Vec::new();
        t.get_raw_partials(&mut partials);
        t.denorm_partials(&mut partials);

        let p = &partials[0];
        let expected_hz = 100.0 * SR / N as f32;
        assert!(
            (p.freq - expected_hz).abs() < 0.02 * expected_hz,
            "freq {} vs {}",
            p.freq,
            expected_hz
        );
        assert!(p.amp > 0.1 && p.amp < 0.6, "amp {}", p.amp);
    }

    #[test]
    fn test_stable_partial_tracked_over_frames() {
        let mut t = tracker();

        let mut id = -1;
        for frame in 0..5 {
            let magns = lobe_magns(100, 0.5);
            let phases = ramp_phases();
            t.set_data(&magns, &phases);
            t.detect_partials();
            t.filter_partials();

            let mut partials = Vec::new();
            t.get_partials(&mut partials);

            if frame >= 2 {
                assert_eq!(partials.len(), 1, "frame {}", frame);
                if id < 0 {
                    id = partials[0].id;
                } else {
                    assert_eq!(partials[0].id, id);
                }
                assert_eq!(partials[0].state, PartialState::Alive);
            }
        }
    }

    #[test]
    fn test_filter_partials_with_empty_input() {
        let mut t = tracker();

        let magns = vec![1e-9f32; N / 2];
        let phases = ramp_phases();
        t.set_data(&magns, &phases);
        t.detect_partials();
        t.filter_partials();

        let mut partials = Vec::new();
        t.get_partials(&mut partials);
        assert!(partials.is_empty());
    }

    #[test]
    fn test_linear_magns_are_normalized_db() {
        let mut t = tracker();

        let magns = lobe_magns(100, 0.5);
        let phases = ramp_phases();
        t.set_data(&magns, &phases);

        let mut linear = Vec::new();
        t.get_linear_magns(&mut linear);

        // -6 dBFS maps close to 0.95 on the normalized dB axis (plus the
        // small A-weighting boost above 1 kHz)
        assert!(linear[100] > 0.9 && linear[100] <= 1.0, "{}", linear[100]);
        assert!(linear[600] < 0.2);
    }

    #[test]
    fn test_denorm_bin_index_clamps_nyquist() {
        let t = tracker();
        assert_eq!(t.denorm_bin_index(N / 2), N / 2 - 1);
        assert_eq!(t.denorm_bin_index(0), 0);
    }

    #[test]
    fn test_noise_envelope_excludes_partial() {
        let mut t = tracker();
        t.set_threshold(-110.0);

        // Flat noise floor plus a strong partial
        let mut magns = vec![0.01f32; N / 2];
        for d in -4i32..=4 {
            let i = (300 + d) as usize;
            let w = (-0.5 * (d as f32 / 1.5) * (d as f32 / 1.5)).exp();
            magns[i] = magns[i].max(0.5 * w);
        }
        let phases = ramp_phases();

        // Enough frames for the tracker to lock on and for the noise
        // smoother to pull the partial's span down
        for _ in 0..10 {
            t.set_data(&magns, &phases);
            t.detect_partials();
            t.filter_partials();
            t.extract_noise_envelope();
        }

        let mut noise = Vec::new();
        t.get_noise_envelope(&mut noise);
        let mut harmo = Vec::new();
        t.get_harmonic_envelope(&mut harmo);

        // The partial peak region is suppressed in the noise envelope and
        // present in the harmonic envelope
        assert!(noise[300] < 0.01, "noise at partial {}", noise[300]);
        assert!(harmo[300] > 0.5, "harmo at partial {}", harmo[300]);
        // Far from the partial the noise envelope carries the floor
        assert!(noise[600] > 0.0);
        assert!(harmo[600] < 1e-6);
    }

    #[test]
    fn test_post_process_discards_flat_partials() {
        let mut t = tracker();
        t.set_post_process_enabled(true);
        t.set_threshold(-119.0);

        let magns = lobe_magns(100, 0.5);
        let phases = ramp_phases();
        t.set_data(&magns, &phases);
        t.detect_partials();

        let mut partials = Vec::new();
        t.get_raw_partials(&mut partials);
        // The real lobe survives the cleanup pass
        assert_eq!(partials.len(), 1);
    }
}
