//! Triangular filter banks for frequency-axis remapping.
//!
//! Remaps a spectrum between linear-Hz bins and a target scale (log, Mel,
//! low-zoom...) without the stair-step artifacts of per-bin index lookup.
//! Filters are triangles centered on scale-equidistant points; each output
//! value integrates the exact triangle/bin overlap area. Banks are built on
//! first use and rebuilt only when the data size, sample rate or filter
//! count changes.

use crate::dsp::scale::{self, ScaleType};

// Widen triangles that would cover less than this many bins, otherwise
// narrow high filters alias to single bins.
const FIX_ALIASING_MIN_TRIANGLE_WIDTH: f32 = 2.0;

#[derive(Debug, Clone, Default)]
struct Filter {
    data: Vec<f32>,
    bounds: [isize; 2],
}

#[derive(Debug, Clone, Default)]
struct FilterBankData {
    data_size: usize,
    sample_rate: f32,
    num_filters: usize,
    filters: Vec<Filter>,
}

pub struct FilterBank {
    target_scale_type: ScaleType,

    hz_to_target_bank: FilterBankData,
    target_to_hz_bank: FilterBankData,
}

impl FilterBank {
    pub fn new(target_scale_type: ScaleType) -> Self {
        Self {
            target_scale_type,
            hz_to_target_bank: FilterBankData::default(),
            target_to_hz_bank: FilterBankData::default(),
        }
    }

    pub fn hz_to_target(
        &mut self,
        result: &mut Vec<f32>,
        magns: &[f32],
        sample_rate: f32,
        num_filters: usize,
    ) {
        if magns.len() != self.hz_to_target_bank.data_size
            || sample_rate != self.hz_to_target_bank.sample_rate
            || num_filters != self.hz_to_target_bank.num_filters
        {
            self.create_hz_to_target(magns.len(), sample_rate, num_filters);
        }

        apply_filter_bank(result, magns, &self.hz_to_target_bank);
    }

    pub fn target_to_hz(
        &mut self,
        result: &mut Vec<f32>,
        magns: &[f32],
        sample_rate: f32,
        num_filters: usize,
    ) {
        if magns.len() != self.target_to_hz_bank.data_size
            || sample_rate != self.target_to_hz_bank.sample_rate
            || num_filters != self.target_to_hz_bank.num_filters
        {
            self.create_target_to_hz(magns.len(), sample_rate, num_filters);
        }

        apply_filter_bank(result, magns, &self.target_to_hz_bank);
    }

    fn create_hz_to_target(&mut self, data_size: usize, sample_rate: f32, num_filters: usize) {
        let bank = &mut self.hz_to_target_bank;
        init_bank(bank, data_size, sample_rate, num_filters);

        // Equally spaced points on the target axis, then back to Hz, then
        // to fractional bins.
        let low_target = 0.0;
        let high_target = scaled_value(
            self.target_scale_type,
            sample_rate * 0.5,
            0.0,
            sample_rate * 0.5,
        );

        let num_points = num_filters + 2;
        let hz_per_bin_inv = (data_size as f32 + 1.0) / (sample_rate * 0.5);

        let mut bin = vec![0.0f32; num_points];
        for (i, b) in bin.iter_mut().enumerate() {
            let t = i as f32 / (num_points as f32 - 1.0);
            let target = low_target + t * (high_target - low_target);
            let hz = scaled_value_inv(self.target_scale_type, target, 0.0, sample_rate * 0.5);
            *b = hz * hz_per_bin_inv;
        }

        for m in 1..(num_filters + 1) {
            build_triangle(&mut bank.filters[m - 1], &bin, m, data_size);
        }
    }

    fn create_target_to_hz(&mut self, data_size: usize, sample_rate: f32, num_filters: usize) {
        let bank = &mut self.target_to_hz_bank;
        init_bank(bank, data_size, sample_rate, num_filters);

        // Equally spaced Hz points, forward-scaled to the target axis, then
        // to fractional bins of the target-spaced input.
        let low_hz = 0.0;
        let high_hz = sample_rate * 0.5;

        let max_target = scaled_value(
            self.target_scale_type,
            sample_rate * 0.5,
            0.0,
            sample_rate * 0.5,
        );
        let target_per_bin_inv = (data_size as f32 + 1.0) / max_target;

        let num_points = num_filters + 2;
        let mut bin = vec![0.0f32; num_points];
        for (i, b) in bin.iter_mut().enumerate() {
            let t = i as f32 / (num_points as f32 - 1.0);
            let hz = low_hz + t * (high_hz - low_hz);
            let target = scaled_value(self.target_scale_type, hz, 0.0, sample_rate * 0.5);
            *b = target * target_per_bin_inv;
        }

        for m in 1..num_filters {
            build_triangle(&mut bank.filters[m], &bin, m, data_size);
        }
    }
}

fn init_bank(bank: &mut FilterBankData, data_size: usize, sample_rate: f32, num_filters: usize) {
    bank.data_size = data_size;
    bank.sample_rate = sample_rate;
    bank.num_filters = num_filters;

    bank.filters.clear();
    bank.filters.resize(num_filters, Filter::default());
    for f in bank.filters.iter_mut() {
        f.data.clear();
        f.data.resize(data_size, 0.0);
        f.bounds = [-1, -1];
    }
}

fn build_triangle(filter: &mut Filter, bin: &[f32], m: usize, data_size: usize) {
    let mut fmin = bin[m - 1]; // left
    let fmid = bin[m]; // center
    let mut fmax = bin[m + 1]; // right

    fix_small_triangles(&mut fmin, &mut fmax, data_size);

    filter.bounds[0] = fmin.floor() as isize;
    filter.bounds[1] = (fmax.ceil() as isize).min(data_size as isize - 1);

    let norm = (fmid - fmin) * 0.5 + (fmax - fmid) * 0.5;

    for i in filter.bounds[0].max(0)..=filter.bounds[1] {
        let x0 = (i as f32).max(fmin);
        let x1 = (i as f32 + 1.0).min(fmax);

        let mut tarea = compute_triangle_area_between(fmin, fmid, fmax, x0, x1);
        tarea /= norm;

        filter.data[i as usize] += tarea;
    }
}

fn fix_small_triangles(fmin: &mut f32, fmax: &mut f32, data_size: usize) {
    if (data_size as f32) < FIX_ALIASING_MIN_TRIANGLE_WIDTH {
        return;
    }

    if *fmax - *fmin < FIX_ALIASING_MIN_TRIANGLE_WIDTH {
        let diff = FIX_ALIASING_MIN_TRIANGLE_WIDTH - (*fmax - *fmin);
        *fmin -= diff * 0.5;
        *fmax += diff * 0.5;

        if *fmin < 0.0 {
            *fmax += -*fmin;
            *fmin = 0.0;
        }

        if *fmax > data_size as f32 - 1.0 {
            *fmin -= *fmax - (data_size as f32 - 1.0);
            *fmax = data_size as f32 - 1.0;
        }
    }
}

fn compute_triangle_y(txmin: f32, txmid: f32, txmax: f32, x: f32) -> f32 {
    if x <= txmin || x >= txmax {
        return 0.0;
    }

    if x <= txmid {
        (x - txmin) / (txmid - txmin)
    } else {
        1.0 - (x - txmid) / (txmax - txmid)
    }
}

/// Area under the triangle (txmin, txmid, txmax) restricted to [x0, x1].
fn compute_triangle_area_between(txmin: f32, txmid: f32, txmax: f32, x0: f32, x1: f32) -> f32 {
    if x0 > txmax || x1 < txmin {
        return 0.0;
    }

    let mut x = [txmin, txmid, txmax, x0, x1];
    x.sort_by(|a, b| a.total_cmp(b));

    let mut points = [[0.0f32; 2]; 5];
    for i in 0..5 {
        points[i][0] = x[i];
        points[i][1] = compute_triangle_y(txmin, txmid, txmax, x[i]);
    }

    let mut area = 0.0;
    for i in 0..4 {
        // Skip pieces outside [x0, x1]
        if points[i][0] >= x1 || points[i + 1][0] <= x0 {
            continue;
        }

        let mut y0 = points[i][1];
        let mut y1 = points[i + 1][1];
        if y0 > y1 {
            std::mem::swap(&mut y0, &mut y1);
        }

        area += (points[i + 1][0] - points[i][0]) * (y0 + (y1 - y0) * 0.5);
    }

    area
}

fn apply_filter_bank(result: &mut Vec<f32>, magns: &[f32], bank: &FilterBankData) {
    result.clear();
    result.resize(bank.num_filters, 0.0);

    for (m, filter) in bank.filters.iter().enumerate() {
        if filter.bounds[0] < 0 {
            continue;
        }

        for i in filter.bounds[0]..=filter.bounds[1] {
            if i < 0 || i as usize >= magns.len() {
                continue;
            }

            result[m] += filter.data[i as usize] * magns[i as usize];
        }
    }
}

// Scale a raw Hz value onto the target axis (and back), going through the
// normalized-domain scale functions.
fn scaled_value(scale_type: ScaleType, val: f32, min_freq: f32, max_freq: f32) -> f32 {
    let min_target = scale::apply_scale(scale_type, 0.0, min_freq, max_freq);
    let max_target = scale::apply_scale(scale_type, 1.0, min_freq, max_freq);

    let val = (val - min_freq) / (max_freq - min_freq);
    let val = scale::apply_scale(scale_type, val, min_freq, max_freq);

    val * (max_target - min_target) + min_target
}

fn scaled_value_inv(scale_type: ScaleType, val: f32, min_freq: f32, max_freq: f32) -> f32 {
    let min_target = scale::apply_scale(scale_type, 0.0, min_freq, max_freq);
    let max_target = scale::apply_scale(scale_type, 1.0, min_freq, max_freq);

    let val = (val - min_target) / (max_target - min_target);
    let val = scale::apply_scale_inv(scale_type, val, min_freq, max_freq);

    val * (max_freq - min_freq) + min_freq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_bank_preserves_energy_profile() {
        let mut bank = FilterBank::new(ScaleType::Linear);

        let n = 256;
        let magns: Vec<f32> = (0..n).map(|i| 1.0 + (i as f32 / n as f32)).collect();

        let mut result = Vec::new();
        bank.hz_to_target(&mut result, &magns, 44100.0, n);

        assert_eq!(result.len(), n);
        // Away from the edges the remap should be close to identity
        for i in 8..(n - 8) {
            assert!(
                (result[i] - magns[i]).abs() < 0.05,
                "bin {}: {} vs {}",
                i,
                result[i],
                magns[i]
            );
        }
    }

    #[test]
    fn test_mel_bank_moves_peak_up() {
        let mut bank = FilterBank::new(ScaleType::Mel);

        let n = 512;
        let mut magns = vec![0.0f32; n];
        // A peak at a quarter of the axis: mel spacing stretches low
        // frequencies, so the peak must land at a higher index.
        magns[n / 4] = 1.0;

        let mut result = Vec::new();
        bank.hz_to_target(&mut result, &magns, 44100.0, n);

        let max_idx = result
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!(max_idx > n / 4);
    }

    #[test]
    fn test_bank_is_rebuilt_on_size_change() {
        let mut bank = FilterBank::new(ScaleType::Mel);

        let mut result = Vec::new();
        bank.hz_to_target(&mut result, &vec![1.0; 128], 44100.0, 128);
        assert_eq!(result.len(), 128);

        bank.hz_to_target(&mut result, &vec![1.0; 64], 44100.0, 64);
        assert_eq!(result.len(), 64);
    }
}
