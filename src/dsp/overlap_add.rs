//! Streaming overlap-add engine.
//!
//! Consumes an arbitrary-sized sample stream, hands fixed-size analysis
//! spectra to the attached processors, and reconstructs a continuous
//! output stream with synthesis-windowed overlap-add. Analysis and
//! synthesis windows are jointly normalized at construction so a no-op
//! processor reconstructs the (delayed) input at unit gain.
//!
//! The input queue is a ring buffer; frames are peeked, the read pointer
//! advances by one hop per frame. All FFT scratch is preallocated at
//! configuration time.

use std::fmt;
use std::sync::Arc;

use ringbuf::{Consumer, Producer, RingBuffer};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::dsp::window;

// Ring capacity relative to the FFT size. Input occupancy peaks at
// fft_size - hop + chunk, and feed() chunks its input by hop.
const RINGBUF_CAP_MULT: usize = 4;

/// Spectral/time callbacks fired once per hop, in attachment order.
pub trait OverlapAddProcessor {
    /// Mutable half-spectrum (fft_size/2 + 1 bins), analysis-scaled.
    fn process_spectrum(&mut self, _spectrum: &mut [Complex32]) {}

    /// Resynthesized time frame, before the synthesis window.
    fn process_samples(&mut self, _samples: &mut [f32]) {}
}

/// Configuration errors reported synchronously; no state is mutated on
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    FftSizeNotPowerOfTwo(usize),
    OverlapDoesNotDivide { fft_size: usize, overlap: usize },
    SamplesInFlight,
    NoChannels,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FftSizeNotPowerOfTwo(n) => {
                write!(f, "fft size {} is not a power of two", n)
            }
            ConfigError::OverlapDoesNotDivide { fft_size, overlap } => {
                write!(f, "overlap {} does not divide fft size {}", overlap, fft_size)
            }
            ConfigError::SamplesInFlight => {
                write!(f, "reconfiguration with samples in flight; reset first")
            }
            ConfigError::NoChannels => write!(f, "empty channel set"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct OverlapAdd {
    fft_size: usize,
    overlap: usize,

    fft_flag: bool,
    ifft_flag: bool,

    in_prod: Producer<f32>,
    in_cons: Consumer<f32>,

    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex32>,

    ana_win: Vec<f32>,
    synth_win: Vec<f32>,
    // Forward-transform compensation, 2 / hop
    ana_coeff: f32,
    // Measured from the constructed windows so reconstruction is unit gain
    resynth_coeff: f32,

    // Scratch
    frame: Vec<f32>,
    comp_buf: Vec<Complex32>,
    half_buf: Vec<Complex32>,

    // Synthesis accumulator, shifted by hop after each frame
    ola_accum: Vec<f32>,

    // Reconstructed samples ready to drain
    out_samples: Vec<f32>,
}

impl OverlapAdd {
    /// `fft`/`ifft` flags select analysis-only or full resynthesis mode
    /// (an analysis-only instance taps spectra without producing output).
    pub fn new(fft_size: usize, overlap: usize, fft: bool, ifft: bool) -> Result<Self, ConfigError> {
        Self::validate(fft_size, overlap)?;

        let (in_prod, in_cons) = RingBuffer::new(fft_size * RINGBUF_CAP_MULT).split();

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let mut engine = Self {
            fft_size,
            overlap,
            fft_flag: fft,
            ifft_flag: ifft,
            in_prod,
            in_cons,
            fft: forward,
            ifft: inverse,
            fft_scratch: vec![Complex32::default(); scratch_len],
            ana_win: Vec::new(),
            synth_win: Vec::new(),
            ana_coeff: 0.0,
            resynth_coeff: 0.0,
            frame: vec![0.0; fft_size],
            comp_buf: vec![Complex32::default(); fft_size],
            half_buf: vec![Complex32::default(); fft_size / 2 + 1],
            ola_accum: vec![0.0; fft_size],
            out_samples: Vec::new(),
        };
        engine.make_windows();

        Ok(engine)
    }

    fn validate(fft_size: usize, overlap: usize) -> Result<(), ConfigError> {
        if fft_size == 0 || !fft_size.is_power_of_two() {
            return Err(ConfigError::FftSizeNotPowerOfTwo(fft_size));
        }
        if overlap == 0 || fft_size % overlap != 0 {
            return Err(ConfigError::OverlapDoesNotDivide { fft_size, overlap });
        }
        Ok(())
    }

    /// Recompute windows and buffers for a new size. Fails if samples are
    /// still in flight; call [`reset`](Self::reset) first.
    pub fn configure(&mut self, fft_size: usize, overlap: usize) -> Result<(), ConfigError> {
        Self::validate(fft_size, overlap)?;
        if self.in_cons.len() > 0 || !self.out_samples.is_empty() {
            return Err(ConfigError::SamplesInFlight);
        }

        self.fft_size = fft_size;
        self.overlap = overlap;

        let (in_prod, in_cons) = RingBuffer::new(fft_size * RINGBUF_CAP_MULT).split();
        self.in_prod = in_prod;
        self.in_cons = in_cons;

        let mut planner = FftPlanner::<f32>::new();
        self.fft = planner.plan_fft_forward(fft_size);
        self.ifft = planner.plan_fft_inverse(fft_size);
        let scratch_len = self
            .fft
            .get_inplace_scratch_len()
            .max(self.ifft.get_inplace_scratch_len());
        self.fft_scratch.clear();
        self.fft_scratch.resize(scratch_len, Complex32::default());

        self.frame.clear();
        self.frame.resize(fft_size, 0.0);
        self.comp_buf.clear();
        self.comp_buf.resize(fft_size, Complex32::default());
        self.half_buf.clear();
        self.half_buf.resize(fft_size / 2 + 1, Complex32::default());
        self.ola_accum.clear();
        self.ola_accum.resize(fft_size, 0.0);

        self.make_windows();

        log::debug!(
            "overlap-add configured: fft_size={} overlap={} hop={}",
            fft_size,
            overlap,
            fft_size / overlap
        );

        Ok(())
    }

    /// Discard all in-flight audio.
    pub fn reset(&mut self) {
        while self.in_cons.pop().is_some() {}
        self.ola_accum.iter_mut().for_each(|v| *v = 0.0);
        self.out_samples.clear();
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    #[inline]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.fft_size / self.overlap
    }

    /// Enqueue input samples and run zero or more hops, firing the
    /// processor callbacks for each.
    pub fn feed(&mut self, samples: &[f32], processors: &mut [&mut dyn OverlapAddProcessor]) {
        let hop = self.hop_size();

        for chunk in samples.chunks(hop.max(1)) {
            let pushed = self.in_prod.push_slice(chunk);
            debug_assert_eq!(pushed, chunk.len(), "input ring overflow");

            while self.in_cons.len() >= self.fft_size {
                self.process_hop(processors);
            }
        }
    }

    fn process_hop(&mut self, processors: &mut [&mut dyn OverlapAddProcessor]) {
        let n = self.fft_size;
        let hop = n / self.overlap;
        let half = n / 2 + 1;

        // Peek the current analysis frame, advance by one hop
        for (i, &s) in self.in_cons.iter().take(n).enumerate() {
            self.frame[i] = s;
        }
        self.in_cons.discard(hop);

        if self.fft_flag {
            for i in 0..n {
                self.comp_buf[i] = Complex32::new(self.frame[i] * self.ana_win[i], 0.0);
            }

            self.fft
                .process_with_scratch(&mut self.comp_buf, &mut self.fft_scratch);

            for i in 0..half {
                self.half_buf[i] = self.comp_buf[i] * self.ana_coeff;
            }
        }

        for p in processors.iter_mut() {
            p.process_spectrum(&mut self.half_buf);
        }

        if !self.ifft_flag {
            return;
        }

        // Rebuild the full spectrum with conjugate symmetry
        self.comp_buf[0] = Complex32::new(self.half_buf[0].re, 0.0);
        self.comp_buf[n / 2] = Complex32::new(self.half_buf[n / 2].re, 0.0);
        for i in 1..n / 2 {
            self.comp_buf[i] = self.half_buf[i];
            self.comp_buf[n - i] = self.half_buf[i].conj();
        }

        self.ifft
            .process_with_scratch(&mut self.comp_buf, &mut self.fft_scratch);

        for i in 0..n {
            self.frame[i] = self.comp_buf[i].re * self.resynth_coeff;
        }

        for p in processors.iter_mut() {
            p.process_samples(&mut self.frame);
        }

        // Synthesis window + overlap-add into the accumulator
        for i in 0..n {
            self.ola_accum[i] += self.frame[i] * self.synth_win[i];
        }

        // The first hop of the accumulator is complete
        self.out_samples.extend_from_slice(&self.ola_accum[..hop]);

        self.ola_accum.copy_within(hop..n, 0);
        for v in self.ola_accum[(n - hop)..].iter_mut() {
            *v = 0.0;
        }
    }

    /// Fill `samples` with up to `num_samples` of reconstructed output.
    /// If fewer are available, the head is zero-filled (startup latency).
    /// Returns the number of real samples delivered, i.e. how many to
    /// flush.
    pub fn drain_output(&mut self, samples: &mut Vec<f32>, num_samples: usize) -> usize {
        samples.clear();
        samples.resize(num_samples, 0.0);

        let num_zeros = num_samples.saturating_sub(self.out_samples.len());
        let num_real = num_samples - num_zeros;

        samples[num_zeros..].copy_from_slice(&self.out_samples[..num_real]);

        num_real
    }

    pub fn flush_output(&mut self, num_to_flush: usize) {
        if num_to_flush >= self.out_samples.len() {
            self.out_samples.clear();
            return;
        }
        self.out_samples.drain(..num_to_flush);
    }

    pub fn clear_output(&mut self) {
        self.out_samples.clear();
    }

    fn make_windows(&mut self) {
        let n = self.fft_size;
        let hop = n / self.overlap;

        let (ana, synth) = window::make_cola_windows(n, self.overlap);
        self.ana_win = ana;
        self.synth_win = synth;

        self.ana_coeff = 2.0 / hop as f32;

        // Reconstruction gain of the window pair: per-sample sum of
        // ana*synth over all frame shifts. The inverse transform carries a
        // factor fft_size (unnormalized), the analysis a factor ana_coeff.
        let mut combined = vec![0.0f32; n];
        for frame in 0..self.overlap {
            let start = frame * hop;
            for i in 0..n {
                combined[(start + i) % n] += self.ana_win[i] * self.synth_win[i];
            }
        }
        let gain = combined.iter().cloned().fold(f32::MIN, f32::max);

        self.resynth_coeff = 1.0 / (gain * self.ana_coeff * n as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOp;
    impl OverlapAddProcessor for NoOp {}

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            OverlapAdd::new(1000, 4, true, true),
            Err(ConfigError::FftSizeNotPowerOfTwo(1000))
        ));
        assert!(matches!(
            OverlapAdd::new(1024, 3, true, true),
            Err(ConfigError::OverlapDoesNotDivide { .. })
        ));
        assert!(OverlapAdd::new(1024, 4, true, true).is_ok());
    }

    #[test]
    fn test_reconfigure_requires_reset() {
        let mut ola = OverlapAdd::new(512, 4, true, true).unwrap();
        let mut noop = NoOp;
        ola.feed(&vec![0.5; 600], &mut [&mut noop as &mut dyn OverlapAddProcessor]);

        assert_eq!(ola.configure(1024, 4), Err(ConfigError::SamplesInFlight));

        ola.reset();
        assert!(ola.configure(1024, 4).is_ok());
    }

    #[test]
    fn test_identity_reconstruction() {
        let n = 1024;
        let overlap = 4;
        let mut ola = OverlapAdd::new(n, overlap, true, true).unwrap();
        let mut noop = NoOp;

        let sr = 44100.0;
        let total = n * 8;
        let input: Vec<f32> = (0..total)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr).sin() * 0.5)
            .collect();

        ola.feed(&input, &mut [&mut noop as &mut dyn OverlapAddProcessor]);

        let mut out = Vec::new();
        let produced = ola.drain_output(&mut out, total);
        assert!(produced > 0);

        // Output is delayed by fft_size - hop: drain pads exactly that many
        // zeros in front once the engine is past startup.
        let latency = n - n / overlap;
        let num_zeros = total - produced;
        assert_eq!(num_zeros, latency);

        // out[t + num_zeros] reconstructs input[t] on the stationary region
        for t in (2 * n)..(total - 2 * n) {
            let out_idx = t + num_zeros;
            if out_idx >= out.len() {
                break;
            }
            let diff = (out[out_idx] - input[t]).abs();
            assert!(diff < 1e-5, "t={} diff={}", t, diff);
        }
    }

    #[test]
    fn test_sample_count_conservation() {
        let mut ola = OverlapAdd::new(512, 4, true, true).unwrap();
        let mut noop = NoOp;

        let mut produced_total = 0usize;
        for _ in 0..50 {
            let block = vec![0.25f32; 441];
            ola.feed(&block, &mut [&mut noop as &mut dyn OverlapAddProcessor]);
            let mut out = Vec::new();
            let produced = ola.drain_output(&mut out, block.len());
            assert_eq!(out.len(), block.len());
            ola.flush_output(produced);
            produced_total += out.len();
        }
        assert_eq!(produced_total, 50 * 441);
    }

    #[test]
    fn test_drain_underflow_zero_prefix() {
        let mut ola = OverlapAdd::new(512, 4, true, true).unwrap();
        let mut out = Vec::new();
        let produced = ola.drain_output(&mut out, 128);
        assert_eq!(produced, 0);
        assert_eq!(out.len(), 128);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
