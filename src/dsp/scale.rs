//! Frequency and amplitude axis scales.
//!
//! A tagged variant over the scale types used by the spectral views and the
//! partial tracker, plus their inverses. Callers never branch on the tag:
//! they go through `apply_scale` / `apply_scale_for_each`, or through the
//! cached triangular filter banks on [`Scale`] when remapping whole
//! spectra (see `filter_bank`).

use crate::dsp::filter_bank::FilterBank;
use crate::dsp::utils;

const LOG_SCALE2_FACTOR: f32 = 3.5;

// Center on 1000Hz. With 100, the center freq lands between 1000 and 2000Hz.
const LOG_CENTER_FREQ: f32 = 100.0;

const LOW_ZOOM_GAMMA: f32 = 0.8;

const LOG_EPS: f32 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleType {
    Linear,
    Normalized,
    NormalizedInv,
    Db,
    DbInv,
    Log,
    LogInv,
    Log10,
    Log10Inv,
    LogFactor,
    LogFactorInv,
    Mel,
    MelFilter,
    MelInv,
    MelFilterInv,
    LowZoom,
    LowZoomInv,
    LogNoNorm,
    LogNoNormInv,
}

pub const NUM_FILTER_BANKS: usize = 6;

/// Filter-bank flavors, one per remappable frequency scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBankType {
    Linear = 0,
    Log = 1,
    Log10 = 2,
    LogFactor = 3,
    Mel = 4,
    LowZoom = 5,
}

#[inline]
pub fn hz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

#[inline]
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

pub fn apply_scale(scale_type: ScaleType, x: f32, min_value: f32, max_value: f32) -> f32 {
    match scale_type {
        ScaleType::Linear => x,
        ScaleType::Normalized => value_to_normalized(x, min_value, max_value),
        ScaleType::NormalizedInv => value_to_normalized_inv(x, min_value, max_value),
        ScaleType::Db => normalized_to_db(x, min_value, max_value),
        ScaleType::DbInv => normalized_to_db_inv(x, min_value, max_value),
        ScaleType::Log => normalized_to_log(x, min_value, max_value),
        ScaleType::LogInv => normalized_to_log_inv(x, min_value, max_value),
        ScaleType::Log10 => normalized_to_log10(x, min_value, max_value),
        ScaleType::Log10Inv => normalized_to_log10_inv(x, min_value, max_value),
        ScaleType::LogFactor => normalized_to_log_scale(x),
        ScaleType::LogFactorInv => normalized_to_log_scale_inv(x),
        ScaleType::Mel | ScaleType::MelFilter => normalized_to_mel(x, min_value, max_value),
        ScaleType::MelInv | ScaleType::MelFilterInv => {
            normalized_to_mel_inv(x, min_value, max_value)
        }
        ScaleType::LowZoom => normalized_to_low_zoom(x, min_value, max_value),
        ScaleType::LowZoomInv => normalized_to_low_zoom_inv(x, min_value, max_value),
        ScaleType::LogNoNorm => to_log(x),
        ScaleType::LogNoNormInv => to_log_inv(x),
    }
}

/// Apply the inverse of `scale_type`.
pub fn apply_scale_inv(scale_type: ScaleType, x: f32, min_value: f32, max_value: f32) -> f32 {
    apply_scale(inverse_type(scale_type), x, min_value, max_value)
}

pub fn apply_scale_for_each(
    scale_type: ScaleType,
    values: &mut [f32],
    min_value: f32,
    max_value: f32,
) {
    for v in values.iter_mut() {
        *v = apply_scale(scale_type, *v, min_value, max_value);
    }
}

fn inverse_type(scale_type: ScaleType) -> ScaleType {
    match scale_type {
        ScaleType::Linear => ScaleType::Linear,
        ScaleType::Normalized => ScaleType::NormalizedInv,
        ScaleType::NormalizedInv => ScaleType::Normalized,
        ScaleType::Db => ScaleType::DbInv,
        ScaleType::DbInv => ScaleType::Db,
        ScaleType::Log => ScaleType::LogInv,
        ScaleType::LogInv => ScaleType::Log,
        ScaleType::Log10 => ScaleType::Log10Inv,
        ScaleType::Log10Inv => ScaleType::Log10,
        ScaleType::LogFactor => ScaleType::LogFactorInv,
        ScaleType::LogFactorInv => ScaleType::LogFactor,
        ScaleType::Mel => ScaleType::MelInv,
        ScaleType::MelFilter => ScaleType::MelFilterInv,
        ScaleType::MelInv => ScaleType::Mel,
        ScaleType::MelFilterInv => ScaleType::MelFilter,
        ScaleType::LowZoom => ScaleType::LowZoomInv,
        ScaleType::LowZoomInv => ScaleType::LowZoom,
        ScaleType::LogNoNorm => ScaleType::LogNoNormInv,
        ScaleType::LogNoNormInv => ScaleType::LogNoNorm,
    }
}

pub fn type_to_filter_bank_type(scale_type: ScaleType) -> FilterBankType {
    match scale_type {
        ScaleType::Log => FilterBankType::Log,
        ScaleType::Log10 => FilterBankType::Log10,
        ScaleType::LogFactor => FilterBankType::LogFactor,
        ScaleType::Mel | ScaleType::MelFilter => FilterBankType::Mel,
        ScaleType::LowZoom => FilterBankType::LowZoom,
        _ => FilterBankType::Linear,
    }
}

pub fn filter_bank_type_to_type(fb_type: FilterBankType) -> ScaleType {
    match fb_type {
        FilterBankType::Linear => ScaleType::Linear,
        FilterBankType::Log => ScaleType::Log,
        FilterBankType::Log10 => ScaleType::Log10,
        FilterBankType::LogFactor => ScaleType::LogFactor,
        FilterBankType::Mel => ScaleType::Mel,
        FilterBankType::LowZoom => ScaleType::LowZoom,
    }
}

/// Scale dispatcher owning one lazily-built filter bank per bank type.
/// A bank is (re)built the first time a spectrum of a given size / sample
/// rate / filter count passes through it.
pub struct Scale {
    filter_banks: [Option<FilterBank>; NUM_FILTER_BANKS],
}

impl Scale {
    pub fn new() -> Self {
        Self {
            filter_banks: Default::default(),
        }
    }

    /// Remap `magns` from linear-Hz bins to `fb_type` spacing.
    pub fn apply_scale_filter_bank(
        &mut self,
        fb_type: FilterBankType,
        result: &mut Vec<f32>,
        magns: &[f32],
        sample_rate: f32,
        num_filters: usize,
    ) {
        // In linear the bank is only needed to resize
        if fb_type == FilterBankType::Linear && magns.len() == num_filters {
            result.clear();
            result.extend_from_slice(magns);
            return;
        }

        let bank = self.bank_mut(fb_type);
        bank.hz_to_target(result, magns, sample_rate, num_filters);
    }

    /// Remap `magns` back from `fb_type` spacing to linear-Hz bins.
    pub fn apply_scale_filter_bank_inv(
        &mut self,
        fb_type: FilterBankType,
        result: &mut Vec<f32>,
        magns: &[f32],
        sample_rate: f32,
        num_filters: usize,
    ) {
        if fb_type == FilterBankType::Linear && magns.len() == num_filters {
            result.clear();
            result.extend_from_slice(magns);
            return;
        }

        let bank = self.bank_mut(fb_type);
        bank.target_to_hz(result, magns, sample_rate, num_filters);
    }

    fn bank_mut(&mut self, fb_type: FilterBankType) -> &mut FilterBank {
        let idx = fb_type as usize;
        self.filter_banks[idx]
            .get_or_insert_with(|| FilterBank::new(filter_bank_type_to_type(fb_type)))
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn value_to_normalized(y: f32, min_value: f32, max_value: f32) -> f32 {
    (y - min_value) / (max_value - min_value)
}

#[inline]
fn value_to_normalized_inv(y: f32, min_value: f32, max_value: f32) -> f32 {
    y * (max_value - min_value) + min_value
}

fn normalized_to_db(x: f32, min_db: f32, max_db: f32) -> f32 {
    let x = if x.abs() < utils::EPS {
        min_db
    } else {
        utils::amp_to_db(x)
    };

    let x = (x - min_db) / (max_db - min_db);

    // Avoid negative values, for very low x dB
    x.max(0.0)
}

fn normalized_to_db_inv(x: f32, min_db: f32, max_db: f32) -> f32 {
    let x = min_db + x * (max_db - min_db);
    let x = utils::db_to_amp(x);

    x.max(0.0)
}

fn normalized_to_log10(x: f32, min_value: f32, max_value: f32) -> f32 {
    let x = x * (max_value - min_value) + min_value;
    let x = (1.0 + x).log10();

    let l_min = (1.0 + min_value).log10();
    let l_max = (1.0 + max_value).log10();

    (x - l_min) / (l_max - l_min)
}

fn normalized_to_log10_inv(x: f32, min_value: f32, max_value: f32) -> f32 {
    let l_min = (1.0 + min_value).log10();
    let l_max = (1.0 + max_value).log10();

    let x = x * (l_max - l_min) + l_min;
    let x = 10.0f32.powf(x) - 1.0;

    (x - min_value) / (max_value - min_value)
}

fn normalized_to_log(x: f32, min_value: f32, max_value: f32) -> f32 {
    let a = (10.0f32.powf(0.5) - 1.0) / LOG_CENTER_FREQ;

    let l_min = (1.0 + min_value * a).log10();
    let l_max = (1.0 + max_value * a).log10();

    let x = x * (max_value - min_value) + min_value;
    let x = (1.0 + x * a).log10();

    (x - l_min) / (l_max - l_min)
}

fn normalized_to_log_inv(x: f32, min_value: f32, max_value: f32) -> f32 {
    let a = (10.0f32.powf(0.5) - 1.0) / LOG_CENTER_FREQ;

    let l_min = (1.0 + min_value * a).log10();
    let l_max = (1.0 + max_value * a).log10();

    let x = x * (l_max - l_min) + l_min;
    let x = (10.0f32.powf(x) - 1.0) / a;

    (x - min_value) / (max_value - min_value)
}

fn normalized_to_log_scale(value: f32) -> f32 {
    (1.0 + value * (LOG_SCALE2_FACTOR.exp() - 1.0)).ln() / LOG_SCALE2_FACTOR
}

fn normalized_to_log_scale_inv(value: f32) -> f32 {
    ((value * LOG_SCALE2_FACTOR).exp() - 1.0) / (LOG_SCALE2_FACTOR.exp() - 1.0)
}

fn normalized_to_mel(x: f32, min_freq: f32, max_freq: f32) -> f32 {
    let x = x * (max_freq - min_freq) + min_freq;
    let x = hz_to_mel(x);

    let l_min = hz_to_mel(min_freq);
    let l_max = hz_to_mel(max_freq);

    (x - l_min) / (l_max - l_min)
}

fn normalized_to_mel_inv(x: f32, min_freq: f32, max_freq: f32) -> f32 {
    let min_mel = hz_to_mel(min_freq);
    let max_mel = hz_to_mel(max_freq);

    let x = x * (max_mel - min_mel) + min_mel;
    let x = mel_to_hz(x);

    (x - min_freq) / (max_freq - min_freq)
}

fn normalized_to_low_zoom(x: f32, min_value: f32, max_value: f32) -> f32 {
    // Mel plus a gamma boost on the low end
    let result = normalized_to_mel(x, min_value, max_value);
    utils::apply_gamma(result, LOW_ZOOM_GAMMA)
}

fn normalized_to_low_zoom_inv(x: f32, min_value: f32, max_value: f32) -> f32 {
    let result = utils::apply_gamma(x, 1.0 - LOW_ZOOM_GAMMA);
    normalized_to_mel_inv(result, min_value, max_value)
}

#[inline]
fn to_log(x: f32) -> f32 {
    (x + LOG_EPS).ln()
}

#[inline]
fn to_log_inv(x: f32) -> f32 {
    x.exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each scale with its stated domain: dB bounds for the amplitude
    // scale, the audible band for the frequency scales
    const ROUND_TRIP_TYPES: [(ScaleType, f32, f32); 7] = [
        (ScaleType::Normalized, 0.0, 22050.0),
        (ScaleType::Db, -120.0, 0.0),
        (ScaleType::Log, 0.0, 22050.0),
        (ScaleType::Log10, 0.0, 22050.0),
        (ScaleType::LogFactor, 0.0, 1.0),
        (ScaleType::Mel, 0.0, 22050.0),
        (ScaleType::LowZoom, 0.0, 22050.0),
    ];

    #[test]
    fn test_round_trips() {
        for &(st, min, max) in ROUND_TRIP_TYPES.iter() {
            for i in 1..20 {
                let x = i as f32 / 20.0;
                let y = apply_scale_inv(st, x, min, max);
                let x2 = apply_scale(st, y, min, max);
                assert!(
                    (x2 - x).abs() < 1e-5,
                    "round trip failed for {:?}: {} -> {} -> {}",
                    st,
                    x,
                    y,
                    x2
                );
            }
        }
    }

    #[test]
    fn test_log_no_norm_round_trip() {
        for &x in &[1e-6f32, 0.01, 0.5, 1.0] {
            let y = apply_scale(ScaleType::LogNoNorm, x, 0.0, 0.0);
            let x2 = apply_scale(ScaleType::LogNoNormInv, y, 0.0, 0.0);
            assert!((x2 - x).abs() < 1e-6 * x.max(1.0));
        }
    }

    #[test]
    fn test_mel_reference_points() {
        assert!(hz_to_mel(0.0).abs() < 1e-6);
        // 1000 Hz is about 1000 mel by construction of the formula
        assert!((hz_to_mel(1000.0) - 999.99).abs() < 1.0);
        assert!((mel_to_hz(hz_to_mel(440.0)) - 440.0).abs() < 1e-2);
    }

    #[test]
    fn test_db_scale_clamps_low_end() {
        // Zero amplitude maps to 0 (the min-dB edge), not a negative value
        let v = apply_scale(ScaleType::Db, 0.0, -120.0, 0.0);
        assert_eq!(v, 0.0);
    }
}
