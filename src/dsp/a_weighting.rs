//! A-weighting response.
//!
//! Per-bin equal-loudness weights used by the partial tracker so peaks in
//! the high octaves are not drowned by the spectral tilt. 0 dB reference at
//! 1 kHz.

const DB_INF: f32 = -70.0;
const DB_EPS: f32 = 1e-15;

/// One weight in dB per bin, bin spacing `sample_rate / (num_bins * 2)`.
pub fn compute_a_weights(num_bins: usize, sample_rate: f32) -> Vec<f32> {
    let hz_per_bin = sample_rate / (num_bins as f32 * 2.0);

    (0..num_bins)
        .map(|i| compute_a(i as f32 * hz_per_bin))
        .collect()
}

fn compute_r(frequency: f32) -> f32 {
    let f2 = frequency * frequency;

    let num = 12194.0f32.powi(2) * f2 * f2;

    let denom0 = f2 + 20.6f32.powi(2);
    let denom1 = ((f2 + 107.7f32.powi(2)) * (f2 + 737.9f32.powi(2))).sqrt();
    let denom2 = f2 + 12194.0f32.powi(2);

    num / (denom0 * denom1 * denom2)
}

pub fn compute_a(frequency: f32) -> f32 {
    let r = compute_r(frequency);

    // Be careful of log(0)
    if r < DB_EPS {
        return DB_INF;
    }

    20.0 * r.log10() + 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_db_at_1khz() {
        let a = compute_a(1000.0);
        assert!(a.abs() < 0.2, "A(1kHz) = {}", a);
    }

    #[test]
    fn test_low_freq_attenuated() {
        assert!(compute_a(50.0) < -25.0);
        assert!(compute_a(0.0) <= DB_INF);
    }

    #[test]
    fn test_table_matches_pointwise() {
        let weights = compute_a_weights(1024, 44100.0);
        let hz_per_bin = 44100.0 / 2048.0;
        assert!((weights[100] - compute_a(100.0 * hz_per_bin)).abs() < 1e-6);
    }
}
