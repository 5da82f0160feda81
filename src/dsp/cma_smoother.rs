//! Central moving average smoothing.
//!
//! Used by the transient shaper to smear the per-sample transientness
//! curve. The double-pass variant chains two averages, which approaches a
//! triangular smoothing kernel. Scratch is owned by the smoother so the
//! per-frame calls stay allocation free once warmed up.

pub struct CmaSmoother {
    prefix: Vec<f64>,
}

impl CmaSmoother {
    pub fn new() -> Self {
        Self { prefix: Vec::new() }
    }

    /// One-shot central moving average with edge shrinking: near the
    /// boundaries the window is clamped to the available samples.
    pub fn process_one(&mut self, data: &[f32], smoothed: &mut [f32], window_size: usize) -> bool {
        if window_size <= 1 || data.is_empty() {
            return false;
        }

        let n = data.len();
        let half = window_size / 2;

        // Prefix sums make every output O(1)
        self.prefix.clear();
        self.prefix.resize(n + 1, 0.0);
        for i in 0..n {
            self.prefix[i + 1] = self.prefix[i] + data[i] as f64;
        }

        for i in 0..n {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n - 1);

            let sum = self.prefix[hi + 1] - self.prefix[lo];
            smoothed[i] = (sum / (hi + 1 - lo) as f64) as f32;
        }

        true
    }
}

impl Default for CmaSmoother {
    fn default() -> Self {
        Self::new()
    }
}

/// Two chained passes of the central moving average.
pub struct Cma2Smoother {
    smoother: CmaSmoother,
    tmp: Vec<f32>,
}

impl Cma2Smoother {
    pub fn new() -> Self {
        Self {
            smoother: CmaSmoother::new(),
            tmp: Vec::new(),
        }
    }

    pub fn process_one(&mut self, data: &[f32], smoothed: &mut [f32], window_size: usize) -> bool {
        if window_size <= 1 {
            return false;
        }

        self.tmp.clear();
        self.tmp.resize(data.len(), 0.0);

        let processed = self.smoother.process_one(data, &mut self.tmp, window_size);
        if processed {
            self.smoother.process_one(&self.tmp, smoothed, window_size)
        } else {
            false
        }
    }
}

impl Default for Cma2Smoother {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_input_unchanged() {
        let data = vec![0.7f32; 64];
        let mut out = vec![0.0f32; 64];
        CmaSmoother::new().process_one(&data, &mut out, 9);
        for v in out {
            assert!((v - 0.7).abs() < 1e-6);
        }
    }

    #[test]
    fn test_impulse_is_spread() {
        let mut data = vec![0.0f32; 64];
        data[32] = 1.0;
        let mut out = vec![0.0f32; 64];
        CmaSmoother::new().process_one(&data, &mut out, 9);

        assert!(out[32] < 1.0);
        assert!(out[30] > 0.0);
        assert!(out[34] > 0.0);
        // Mass is conserved away from the edges
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_double_pass_smoother_than_single() {
        let mut data = vec![0.0f32; 64];
        data[32] = 1.0;

        let mut single = vec![0.0f32; 64];
        CmaSmoother::new().process_one(&data, &mut single, 9);

        let mut double = vec![0.0f32; 64];
        Cma2Smoother::new().process_one(&data, &mut double, 9);

        assert!(double[32] < single[32]);
    }

    #[test]
    fn test_tiny_window_is_noop() {
        let data = vec![1.0f32; 8];
        let mut out = vec![0.0f32; 8];
        assert!(!CmaSmoother::new().process_one(&data, &mut out, 1));
    }
}
