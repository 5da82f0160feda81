//! aircore - real-time spectral denoising and harmonic/air extraction.
//!
//! Two block-based pipelines wrap the DSP core:
//!
//! - [`DenoiserPipeline`] subtracts a learned stationary noise profile
//!   with a soft elbow and cleans the residual musical noise, either with
//!   a 2-D image filter or a Wiener soft-masking pair.
//! - [`AirPipeline`] decomposes the signal into a harmonic (tonal) part
//!   and a noise/air part via sinusoidal partial tracking, and remixes
//!   the two.
//!
//! Both pull fixed-size analysis frames through a COLA-normalized
//! overlap-add engine and emit exactly as many samples as they consume,
//! at a constant, queryable latency. Parameters are written lock-free
//! from any thread and picked up at the next block; visualization
//! buffers are published behind a mutex held only for the copy.

pub mod dsp;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::dsp::overlap_add::{ConfigError, OverlapAdd, OverlapAddProcessor};
use crate::dsp::param_smoother::ParamSmoother;
use crate::dsp::utils;
use crate::dsp::{
    AirProcessor, CrossoverSplitter, Delay, DenoiserProcessor, TransientShaperProcessor,
};

pub use crate::dsp::{Partial, PartialFilterKind, PartialState, PartialTracker};

const OVERLAP: usize = 4;

// fft_size = nearest power of two of sample_rate / this
const FFT_SIZE_COEFF: f32 = 23.0;

const DEFAULT_TRACKER_THRESHOLD: f32 = -100.0;

const MIN_SPLIT_FREQ: f32 = 20.0;
const DEFAULT_SPLIT_FREQ_SMOOTH_TIME_MS: f32 = 280.0;

// Persisted blob version; unknown versions are ignored on restore
const STATE_VERSION: i32 = 700;

/// f32 cell written lock-free from the host/UI thread and read at the top
/// of each processing block.
struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Host-facing parameters of the air pipeline.
pub struct AirParams {
    /// Partial rejection threshold in dB
    threshold: AtomicF32,
    /// Harmonic/air balance, -1..+1
    mix: AtomicF32,
    /// Smart resynthesis through the Wiener soft masks
    soft_masking: AtomicBool,
    out_gain_db: AtomicF32,
    wet_gain_db: AtomicF32,
    wet_split_freq: AtomicF32,
}

impl AirParams {
    fn new() -> Self {
        Self {
            threshold: AtomicF32::new(DEFAULT_TRACKER_THRESHOLD),
            mix: AtomicF32::new(0.0),
            soft_masking: AtomicBool::new(false),
            out_gain_db: AtomicF32::new(0.0),
            wet_gain_db: AtomicF32::new(0.0),
            wet_split_freq: AtomicF32::new(MIN_SPLIT_FREQ),
        }
    }

    pub fn set_threshold(&self, db: f32) {
        self.threshold.store(db);
    }

    pub fn set_mix(&self, mix: f32) {
        self.mix.store(mix.clamp(-1.0, 1.0));
    }

    pub fn set_soft_masking(&self, flag: bool) {
        self.soft_masking.store(flag, Ordering::Relaxed);
    }

    pub fn set_out_gain_db(&self, db: f32) {
        self.out_gain_db.store(db);
    }

    pub fn set_wet_gain_db(&self, db: f32) {
        self.wet_gain_db.store(db);
    }

    pub fn set_wet_split_freq(&self, hz: f32) {
        self.wet_split_freq.store(hz);
    }
}

/// Host-facing parameters of the denoiser pipeline.
pub struct DenoiserParams {
    /// Subtraction strength, 0..1
    threshold: AtomicF32,
    /// Dry/wet denoise amount, 0..1
    ratio: AtomicF32,
    /// Residual 2-D filter threshold, 0..1
    residual_threshold: AtomicF32,
    /// Wiener path instead of the 2-D filter
    auto_residual: AtomicBool,
    /// Accumulate the noise profile
    learn: AtomicBool,
    /// Output the suppressed component instead of the signal
    noise_only: AtomicBool,
    /// 1..4, maps to the overlap factor
    quality: AtomicU32,
    out_gain_db: AtomicF32,
    /// Transient shaping, -1..+1
    transient_soft_hard: AtomicF32,
    transient_precision: AtomicF32,
}

impl DenoiserParams {
    fn new() -> Self {
        Self {
            threshold: AtomicF32::new(0.1),
            ratio: AtomicF32::new(1.0),
            residual_threshold: AtomicF32::new(0.0),
            auto_residual: AtomicBool::new(false),
            learn: AtomicBool::new(false),
            noise_only: AtomicBool::new(false),
            quality: AtomicU32::new(2),
            out_gain_db: AtomicF32::new(0.0),
            transient_soft_hard: AtomicF32::new(0.0),
            transient_precision: AtomicF32::new(0.0),
        }
    }

    pub fn set_threshold(&self, threshold: f32) {
        self.threshold.store(threshold.clamp(0.0, 1.0));
    }

    pub fn set_ratio(&self, ratio: f32) {
        self.ratio.store(ratio.clamp(0.0, 1.0));
    }

    pub fn set_residual_threshold(&self, threshold: f32) {
        self.residual_threshold.store(threshold.clamp(0.0, 1.0));
    }

    pub fn set_auto_residual(&self, flag: bool) {
        self.auto_residual.store(flag, Ordering::Relaxed);
    }

    pub fn set_learn(&self, flag: bool) {
        self.learn.store(flag, Ordering::Relaxed);
    }

    pub fn set_noise_only(&self, flag: bool) {
        self.noise_only.store(flag, Ordering::Relaxed);
    }

    pub fn set_quality(&self, quality: u32) {
        self.quality.store(quality.clamp(1, 4), Ordering::Relaxed);
    }

    pub fn set_out_gain_db(&self, db: f32) {
        self.out_gain_db.store(db);
    }

    pub fn set_transient_soft_hard(&self, soft_hard: f32) {
        self.transient_soft_hard.store(soft_hard.clamp(-1.0, 1.0));
    }

    pub fn set_transient_precision(&self, precision: f32) {
        self.transient_precision.store(precision.clamp(0.0, 1.0));
    }
}

/// Analysis-only spectrum tap: keeps the magnitudes of the last frame for
/// the spectrum view.
struct MagnitudeTap {
    magns: Vec<f32>,
}

impl MagnitudeTap {
    fn new() -> Self {
        Self { magns: Vec::new() }
    }
}

impl OverlapAddProcessor for MagnitudeTap {
    fn process_spectrum(&mut self, spectrum: &mut [rustfft::num_complex::Complex32]) {
        utils::complex_to_magn(&mut self.magns, spectrum);
    }
}

/// Visualization snapshot shared with a polling UI.
#[derive(Default)]
struct VizBuffers {
    buf0: Vec<f32>,
    buf1: Vec<f32>,
    buf2: Vec<f32>,
    new_buffers_available: bool,
}

fn quality_to_overlap(quality: u32) -> usize {
    match quality {
        1 => 2,
        2 => 4,
        3 => 8,
        _ => 16,
    }
}

// =============================================================================
// Air pipeline
// =============================================================================

struct AirChannel {
    overlap_add: OverlapAdd,
    processor: AirProcessor,

    out_overlap_add: OverlapAdd,
    out_tap: MagnitudeTap,

    splitter_in: CrossoverSplitter,
    splitter_out: CrossoverSplitter,
    input_delay: Delay,

    out_gain_smoother: ParamSmoother,
    wet_gain_smoother: ParamSmoother,

    in_buf: Vec<f32>,
    out_buf: Vec<f32>,
    in_lo: Vec<f32>,
    in_hi: Vec<f32>,
    out_lo: Vec<f32>,
    out_hi: Vec<f32>,
}

pub struct AirPipeline {
    sample_rate: f32,
    fft_size: usize,
    block_size: usize,

    channels: Vec<AirChannel>,

    params: Arc<AirParams>,
    split_freq_smoother: ParamSmoother,
    prev_soft_masking: bool,

    viz: Arc<Mutex<VizBuffers>>,
}

/// Air pipeline persisted parameters.
#[derive(Serialize, Deserialize)]
struct AirState {
    version: i32,
    threshold: f32,
    mix: f32,
    soft_masking: bool,
    out_gain_db: f32,
    wet_gain_db: f32,
    wet_split_freq: f32,
}

impl AirPipeline {
    pub fn new(num_channels: usize, sample_rate: f32, block_size: usize) -> Result<Self, ConfigError> {
        if num_channels == 0 {
            return Err(ConfigError::NoChannels);
        }

        let fft_size = utils::nearest_power_of_two((sample_rate / FFT_SIZE_COEFF) as usize);

        let mut pipeline = Self {
            sample_rate,
            fft_size,
            block_size,
            channels: Vec::new(),
            params: Arc::new(AirParams::new()),
            split_freq_smoother: ParamSmoother::new(
                sample_rate,
                MIN_SPLIT_FREQ,
                // Smoothing runs once per block, not per sample
                DEFAULT_SPLIT_FREQ_SMOOTH_TIME_MS / block_size.max(1) as f32,
            ),
            prev_soft_masking: false,
            viz: Arc::new(Mutex::new(VizBuffers::default())),
        };

        for _ in 0..num_channels {
            pipeline.channels.push(pipeline.make_channel()?);
        }

        let latency = pipeline.latency(block_size);
        for ch in pipeline.channels.iter_mut() {
            ch.input_delay.set_delay(latency);
        }

        Ok(pipeline)
    }

    fn make_channel(&self) -> Result<AirChannel, ConfigError> {
        let mut processor = AirProcessor::new(self.fft_size, OVERLAP, self.sample_rate);
        processor.set_threshold(DEFAULT_TRACKER_THRESHOLD);
        // The sum is taken from the output analysis pass instead
        processor.set_enable_sum(false);

        Ok(AirChannel {
            overlap_add: OverlapAdd::new(self.fft_size, OVERLAP, true, true)?,
            processor,
            out_overlap_add: OverlapAdd::new(self.fft_size, OVERLAP, true, false)?,
            out_tap: MagnitudeTap::new(),
            splitter_in: CrossoverSplitter::new(MIN_SPLIT_FREQ, self.sample_rate),
            splitter_out: CrossoverSplitter::new(MIN_SPLIT_FREQ, self.sample_rate),
            input_delay: Delay::new(self.fft_size * 2),
            out_gain_smoother: ParamSmoother::with_default_time(self.sample_rate, 1.0),
            wet_gain_smoother: ParamSmoother::with_default_time(self.sample_rate, 1.0),
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            in_lo: Vec::new(),
            in_hi: Vec::new(),
            out_lo: Vec::new(),
            out_hi: Vec::new(),
        })
    }

    pub fn params(&self) -> Arc<AirParams> {
        Arc::clone(&self.params)
    }

    /// Discard in-flight audio and reconfigure for a new sample rate /
    /// block size.
    pub fn reset(&mut self, sample_rate: f32, block_size: usize) -> Result<(), ConfigError> {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.fft_size = utils::nearest_power_of_two((sample_rate / FFT_SIZE_COEFF) as usize);

        for ch in self.channels.iter_mut() {
            ch.overlap_add.reset();
            ch.overlap_add.configure(self.fft_size, OVERLAP)?;
            ch.out_overlap_add.reset();
            ch.out_overlap_add.configure(self.fft_size, OVERLAP)?;

            ch.processor.reset(self.fft_size, OVERLAP, sample_rate);
            ch.splitter_in.reset(sample_rate);
            ch.splitter_out.reset(sample_rate);
            ch.out_gain_smoother.reset(sample_rate);
            ch.wet_gain_smoother.reset(sample_rate);
        }

        self.split_freq_smoother.reset(sample_rate);

        let latency = self.latency(block_size);
        for ch in self.channels.iter_mut() {
            ch.input_delay.set_delay(latency);
        }

        log::debug!(
            "air pipeline reset: sr={} fft_size={} latency={}",
            sample_rate,
            self.fft_size,
            latency
        );

        Ok(())
    }

    /// Latency in samples for the given host block size.
    pub fn latency(&self, block_size: usize) -> usize {
        let hop = self.fft_size / OVERLAP;

        let mut latency = self.fft_size - hop;
        if block_size < hop {
            latency += hop - block_size;
        }

        if let Some(ch) = self.channels.first() {
            latency += ch.processor.latency();
        }

        latency
    }

    /// Process all channels in place. Each slice is one channel; every
    /// channel consumes and produces exactly its length.
    pub fn process_block(&mut self, channels: &mut [&mut [f32]]) {
        let threshold = self.params.threshold.load();
        let mix = self.params.mix.load();
        let soft_masking = self.params.soft_masking.load(Ordering::Relaxed);
        let out_gain = utils::db_to_amp(self.params.out_gain_db.load());
        let wet_gain = utils::db_to_amp(self.params.wet_gain_db.load());
        let wet_freq = self.params.wet_split_freq.load();

        let soft_masking_changed = soft_masking != self.prev_soft_masking;
        self.prev_soft_masking = soft_masking;

        for ch in self.channels.iter_mut() {
            ch.processor.set_threshold(threshold);
            ch.processor.set_mix(mix);
            ch.processor.set_use_soft_masks(soft_masking);

            ch.out_gain_smoother.set_target_value(out_gain);
            ch.wet_gain_smoother.set_target_value(wet_gain);
        }

        if soft_masking_changed {
            // The Wiener history shows up in the declared latency
            let latency = self.latency(self.block_size);
            for ch in self.channels.iter_mut() {
                ch.input_delay.set_delay(latency);
            }
            log::debug!("air latency changed: {}", latency);
        }

        self.split_freq_smoother.set_target_value(wet_freq);
        if !self.split_freq_smoother.is_stable() {
            let split_freq = self.split_freq_smoother.process();
            if split_freq >= MIN_SPLIT_FREQ {
                for ch in self.channels.iter_mut() {
                    ch.splitter_in.set_cutoff_freq(split_freq);
                    ch.splitter_out.set_cutoff_freq(split_freq);
                }
            }
        }

        for (ch, data) in self.channels.iter_mut().zip(channels.iter_mut()) {
            let num_samples = data.len();

            ch.in_buf.clear();
            ch.in_buf.extend_from_slice(data);

            ch.overlap_add
                .feed(&ch.in_buf, &mut [&mut ch.processor as &mut dyn OverlapAddProcessor]);

            let mut out_buf = std::mem::take(&mut ch.out_buf);
            let num_to_flush = ch.overlap_add.drain_output(&mut out_buf, num_samples);
            ch.overlap_add.flush_output(num_to_flush);
            ch.out_buf = out_buf;

            if wet_freq >= MIN_SPLIT_FREQ {
                let (in_lo, in_hi) = (&mut ch.in_lo, &mut ch.in_hi);
                ch.splitter_in.split(&ch.in_buf, in_lo, in_hi);

                let (out_lo, out_hi) = (&mut ch.out_lo, &mut ch.out_hi);
                ch.splitter_out.split(&ch.out_buf, out_lo, out_hi);

                // Keep the dry low band aligned with the processed path
                ch.input_delay.process_samples(&mut ch.in_lo);

                for v in ch.out_hi.iter_mut() {
                    *v *= ch.wet_gain_smoother.process();
                }

                for i in 0..num_samples {
                    ch.out_buf[i] = ch.in_lo[i] + ch.out_hi[i];
                }
            }

            // Output spectrum for the view
            ch.out_overlap_add
                .feed(&ch.out_buf, &mut [&mut ch.out_tap as &mut dyn OverlapAddProcessor]);

            for v in ch.out_buf.iter_mut() {
                *v *= ch.out_gain_smoother.process();
            }

            data.copy_from_slice(&ch.out_buf);
        }

        // Publish the curves; the lock is held only for the copies
        if let Some(ch) = self.channels.first() {
            if let Ok(mut viz) = self.viz.lock() {
                ch.processor.get_noise_buffer(&mut viz.buf0);
                ch.processor.get_harmo_buffer(&mut viz.buf1);
                viz.buf2.clear();
                viz.buf2.extend_from_slice(&ch.out_tap.magns);
                viz.new_buffers_available = true;
            }
        }
    }

    /// Copy the latest noise / harmonic / output-spectrum curves. Returns
    /// false when nothing new was published since the last call.
    pub fn get_buffers(
        &self,
        air_buffer: &mut Vec<f32>,
        harmo_buffer: &mut Vec<f32>,
        sum_buffer: &mut Vec<f32>,
    ) -> bool {
        let mut viz = match self.viz.lock() {
            Ok(viz) => viz,
            Err(_) => return false,
        };

        if !viz.new_buffers_available {
            return false;
        }

        air_buffer.clear();
        air_buffer.extend_from_slice(&viz.buf0);
        harmo_buffer.clear();
        harmo_buffer.extend_from_slice(&viz.buf1);
        sum_buffer.clear();
        sum_buffer.extend_from_slice(&viz.buf2);

        viz.new_buffers_available = false;

        true
    }

    pub fn save_state(&self) -> Vec<u8> {
        let state = AirState {
            version: STATE_VERSION,
            threshold: self.params.threshold.load(),
            mix: self.params.mix.load(),
            soft_masking: self.params.soft_masking.load(Ordering::Relaxed),
            out_gain_db: self.params.out_gain_db.load(),
            wet_gain_db: self.params.wet_gain_db.load(),
            wet_split_freq: self.params.wet_split_freq.load(),
        };

        serde_json::to_vec(&state).unwrap_or_default()
    }

    /// Restore persisted parameters. Unknown versions leave the pipeline
    /// at its defaults.
    pub fn load_state(&mut self, data: &[u8]) {
        let state: AirState = match serde_json::from_slice(data) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("air state restore failed: {}", err);
                return;
            }
        };

        if state.version != STATE_VERSION {
            log::warn!("air state version {} ignored", state.version);
            return;
        }

        self.params.set_threshold(state.threshold);
        self.params.set_mix(state.mix);
        self.params.set_soft_masking(state.soft_masking);
        self.params.set_out_gain_db(state.out_gain_db);
        self.params.set_wet_gain_db(state.wet_gain_db);
        self.params.set_wet_split_freq(state.wet_split_freq);
    }
}

// =============================================================================
// Denoiser pipeline
// =============================================================================

struct DenoiserChannel {
    overlap_add: OverlapAdd,
    processor: DenoiserProcessor,
    transient: TransientShaperProcessor,

    input_delay: Delay,
    out_gain_smoother: ParamSmoother,

    in_buf: Vec<f32>,
    out_buf: Vec<f32>,
}

pub struct DenoiserPipeline {
    sample_rate: f32,
    fft_size: usize,
    overlap: usize,
    block_size: usize,

    channels: Vec<DenoiserChannel>,

    params: Arc<DenoiserParams>,
    prev_quality: u32,
    prev_auto_residual: bool,

    viz: Arc<Mutex<VizBuffers>>,
}

/// Denoiser persisted parameters plus the sample-rate-independent noise
/// profile.
#[derive(Serialize, Deserialize)]
struct DenoiserState {
    version: i32,
    threshold: f32,
    ratio: f32,
    residual_threshold: f32,
    auto_residual: bool,
    noise_only: bool,
    quality: u32,
    out_gain_db: f32,
    transient_soft_hard: f32,
    transient_precision: f32,
    native_noise_profile: Vec<f32>,
}

impl DenoiserPipeline {
    pub fn new(
        num_channels: usize,
        sample_rate: f32,
        block_size: usize,
    ) -> Result<Self, ConfigError> {
        if num_channels == 0 {
            return Err(ConfigError::NoChannels);
        }

        let fft_size = utils::nearest_power_of_two((sample_rate / FFT_SIZE_COEFF) as usize);
        let params = Arc::new(DenoiserParams::new());
        let overlap = quality_to_overlap(params.quality.load(Ordering::Relaxed));

        let mut pipeline = Self {
            sample_rate,
            fft_size,
            overlap,
            block_size,
            channels: Vec::new(),
            prev_quality: params.quality.load(Ordering::Relaxed),
            prev_auto_residual: false,
            params,
            viz: Arc::new(Mutex::new(VizBuffers::default())),
        };

        for _ in 0..num_channels {
            pipeline.channels.push(pipeline.make_channel()?);
        }

        let latency = pipeline.latency(block_size);
        for ch in pipeline.channels.iter_mut() {
            ch.input_delay.set_delay(latency);
        }

        Ok(pipeline)
    }

    fn make_channel(&self) -> Result<DenoiserChannel, ConfigError> {
        Ok(DenoiserChannel {
            overlap_add: OverlapAdd::new(self.fft_size, self.overlap, true, true)?,
            processor: DenoiserProcessor::new(
                self.fft_size,
                self.overlap,
                self.params.threshold.load(),
            ),
            transient: TransientShaperProcessor::new(self.sample_rate),
            input_delay: Delay::new(self.fft_size * 4),
            out_gain_smoother: ParamSmoother::with_default_time(self.sample_rate, 1.0),
            in_buf: Vec::new(),
            out_buf: Vec::new(),
        })
    }

    pub fn params(&self) -> Arc<DenoiserParams> {
        Arc::clone(&self.params)
    }

    pub fn reset(&mut self, sample_rate: f32, block_size: usize) -> Result<(), ConfigError> {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.fft_size = utils::nearest_power_of_two((sample_rate / FFT_SIZE_COEFF) as usize);
        self.overlap = quality_to_overlap(self.params.quality.load(Ordering::Relaxed));

        self.reconfigure_channels()?;

        log::debug!(
            "denoiser pipeline reset: sr={} fft_size={} overlap={}",
            sample_rate,
            self.fft_size,
            self.overlap
        );

        Ok(())
    }

    fn reconfigure_channels(&mut self) -> Result<(), ConfigError> {
        for ch in self.channels.iter_mut() {
            ch.overlap_add.reset();
            ch.overlap_add.configure(self.fft_size, self.overlap)?;
            ch.processor.reset(self.fft_size, self.overlap);
            ch.transient.reset(self.sample_rate);
            ch.out_gain_smoother.reset(self.sample_rate);
        }

        let latency = self.latency(self.block_size);
        for ch in self.channels.iter_mut() {
            ch.input_delay.set_delay(latency);
        }

        Ok(())
    }

    pub fn latency(&self, block_size: usize) -> usize {
        let hop = self.fft_size / self.overlap;

        let mut latency = self.fft_size - hop;
        if block_size < hop {
            latency += hop - block_size;
        }

        if let Some(ch) = self.channels.first() {
            latency += ch.processor.latency();
        }

        latency
    }

    pub fn process_block(&mut self, channels: &mut [&mut [f32]]) {
        let threshold = self.params.threshold.load();
        let ratio = self.params.ratio.load();
        let residual_threshold = self.params.residual_threshold.load();
        let auto_residual = self.params.auto_residual.load(Ordering::Relaxed);
        let learn = self.params.learn.load(Ordering::Relaxed);
        let noise_only = self.params.noise_only.load(Ordering::Relaxed);
        let quality = self.params.quality.load(Ordering::Relaxed);
        let out_gain = utils::db_to_amp(self.params.out_gain_db.load());
        let soft_hard = self.params.transient_soft_hard.load();
        let precision = self.params.transient_precision.load();

        // Quality flips the overlap factor; that needs a reconfigure
        if quality != self.prev_quality {
            self.prev_quality = quality;
            self.overlap = quality_to_overlap(quality);
            if let Err(err) = self.reconfigure_channels() {
                log::warn!("quality change failed: {}", err);
            }
        }

        let auto_residual_changed = auto_residual != self.prev_auto_residual;
        self.prev_auto_residual = auto_residual;

        for ch in self.channels.iter_mut() {
            ch.processor.set_threshold(threshold);
            ch.processor.set_res_noise_threshold(residual_threshold);
            ch.processor.set_auto_res_noise(auto_residual);
            ch.processor.set_building_noise_statistics(learn);
            ch.processor.set_noise_only(noise_only);

            ch.transient.set_soft_hard(soft_hard);
            ch.transient.set_precision(precision);

            ch.out_gain_smoother.set_target_value(out_gain);
        }

        if auto_residual_changed {
            let latency = self.latency(self.block_size);
            for ch in self.channels.iter_mut() {
                ch.input_delay.set_delay(latency);
            }
            log::debug!("denoiser latency changed: {}", latency);
        }

        for (ch, data) in self.channels.iter_mut().zip(channels.iter_mut()) {
            let num_samples = data.len();

            ch.in_buf.clear();
            ch.in_buf.extend_from_slice(data);

            {
                let mut procs: [&mut dyn OverlapAddProcessor; 2] =
                    [&mut ch.processor, &mut ch.transient];
                ch.overlap_add.feed(&ch.in_buf, &mut procs);
            }

            let mut out_buf = std::mem::take(&mut ch.out_buf);
            let num_to_flush = ch.overlap_add.drain_output(&mut out_buf, num_samples);
            ch.overlap_add.flush_output(num_to_flush);
            ch.out_buf = out_buf;

            // Dry/wet: the dry path is the input delayed by the declared
            // latency
            ch.input_delay.process_samples(&mut ch.in_buf);
            for i in 0..num_samples {
                let wet = ch.out_buf[i];
                let dry = ch.in_buf[i];
                ch.out_buf[i] = ratio * wet + (1.0 - ratio) * dry;
            }

            for v in ch.out_buf.iter_mut() {
                *v *= ch.out_gain_smoother.process();
            }

            data.copy_from_slice(&ch.out_buf);
        }

        if let Some(ch) = self.channels.first() {
            if let Ok(mut viz) = self.viz.lock() {
                ch.processor.get_signal_buffer(&mut viz.buf0);
                ch.processor.get_noise_buffer(&mut viz.buf1);
                ch.processor.get_noise_profile(&mut viz.buf2);
                viz.new_buffers_available = true;
            }
        }
    }

    /// Copy the latest signal / noise / profile curves. Returns false
    /// when nothing new was published since the last call.
    pub fn get_buffers(
        &self,
        signal_buffer: &mut Vec<f32>,
        noise_buffer: &mut Vec<f32>,
        profile_buffer: &mut Vec<f32>,
    ) -> bool {
        let mut viz = match self.viz.lock() {
            Ok(viz) => viz,
            Err(_) => return false,
        };

        if !viz.new_buffers_available {
            return false;
        }

        signal_buffer.clear();
        signal_buffer.extend_from_slice(&viz.buf0);
        noise_buffer.clear();
        noise_buffer.extend_from_slice(&viz.buf1);
        profile_buffer.clear();
        profile_buffer.extend_from_slice(&viz.buf2);

        viz.new_buffers_available = false;

        true
    }

    pub fn save_state(&self) -> Vec<u8> {
        let mut native_noise_profile = Vec::new();
        if let Some(ch) = self.channels.first() {
            ch.processor.get_native_noise_profile(&mut native_noise_profile);
        }

        let state = DenoiserState {
            version: STATE_VERSION,
            threshold: self.params.threshold.load(),
            ratio: self.params.ratio.load(),
            residual_threshold: self.params.residual_threshold.load(),
            auto_residual: self.params.auto_residual.load(Ordering::Relaxed),
            noise_only: self.params.noise_only.load(Ordering::Relaxed),
            quality: self.params.quality.load(Ordering::Relaxed),
            out_gain_db: self.params.out_gain_db.load(),
            transient_soft_hard: self.params.transient_soft_hard.load(),
            transient_precision: self.params.transient_precision.load(),
            native_noise_profile,
        };

        serde_json::to_vec(&state).unwrap_or_default()
    }

    /// Restore persisted parameters and the noise profile; the profile is
    /// rescaled to the current spectrum size. Unknown versions are
    /// ignored.
    pub fn load_state(&mut self, data: &[u8]) {
        let state: DenoiserState = match serde_json::from_slice(data) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("denoiser state restore failed: {}", err);
                return;
            }
        };

        if state.version != STATE_VERSION {
            log::warn!("denoiser state version {} ignored", state.version);
            return;
        }

        self.params.set_threshold(state.threshold);
        self.params.set_ratio(state.ratio);
        self.params.set_residual_threshold(state.residual_threshold);
        self.params.set_auto_residual(state.auto_residual);
        self.params.set_noise_only(state.noise_only);
        self.params.set_quality(state.quality);
        self.params.set_out_gain_db(state.out_gain_db);
        self.params.set_transient_soft_hard(state.transient_soft_hard);
        self.params.set_transient_precision(state.transient_precision);

        for ch in self.channels.iter_mut() {
            ch.processor.set_native_noise_profile(&state.native_noise_profile);
        }
    }
}
