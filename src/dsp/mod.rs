//! DSP processing modules for the spectral denoising / air-extraction
//! core.
//!
//! ## Streaming engine
//! - [`overlap_add`] - windowed STFT analysis/resynthesis with processor
//!   callbacks
//! - [`window`] - Hann windows with COLA normalization
//!
//! ## Partial tracking
//! - [`peak_detector`] - Billauer delta-threshold peak finding
//! - [`qifft`] - parabolic true-peak refinement with AM/FM derivatives
//! - [`partial`] / [`partial_tracker`] - tracked sinusoidal components
//! - [`partial_filter`] - association strategies (AM/FM, PARSHL)
//!
//! ## Spectral processors
//! - [`denoiser_processor`] - learned-profile subtraction + residual
//!   filtering
//! - [`air_processor`] - harmonic/noise split and remix
//! - [`wiener`] - soft masking over a centered history
//! - [`transient_shaper`] - per-sample transient gain modulation
//!
//! ## Utilities
//! - [`scale`] / [`filter_bank`] - frequency-axis remapping
//! - [`a_weighting`] - equal-loudness weights for peak detection
//! - [`crossover`] / [`delay`] - wet-split crossover and dry-path alignment
//! - [`param_smoother`] / [`cma_smoother`] / [`ring`] / [`utils`]

pub mod a_weighting;
pub mod air_processor;
pub mod cma_smoother;
pub mod crossover;
pub mod delay;
pub mod denoiser_processor;
pub mod filter_bank;
pub mod overlap_add;
pub mod param_smoother;
pub mod partial;
pub mod partial_filter;
pub mod partial_filter_amfm;
pub mod partial_filter_marchand;
pub mod partial_tracker;
pub mod peak_detector;
pub mod qifft;
pub mod ring;
pub mod scale;
pub mod transient_shaper;
pub mod utils;
pub mod wiener;
pub mod window;

pub use air_processor::AirProcessor;
pub use crossover::CrossoverSplitter;
pub use delay::Delay;
pub use denoiser_processor::DenoiserProcessor;
pub use overlap_add::{ConfigError, OverlapAdd, OverlapAddProcessor};
pub use param_smoother::ParamSmoother;
pub use partial::{Partial, PartialState};
pub use partial_tracker::{PartialFilterKind, PartialTracker};
pub use peak_detector::PeakDetector;
pub use transient_shaper::TransientShaperProcessor;
pub use wiener::WienerSoftMasking;
