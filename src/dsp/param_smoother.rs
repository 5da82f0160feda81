//! One-pole parameter smoother.
//!
//! Smooths host parameter changes with a time constant specified in
//! milliseconds, so the response does not depend on the sample rate. The
//! coefficient is `exp(-2*pi / (t_ms * 0.001 * fs))` and must be recomputed
//! on every sample-rate change.

use std::f32::consts::PI;

/// 140ms => coeff 0.999 at 44100Hz
pub const DEFAULT_SMOOTHING_TIME_MS: f32 = 140.0;

#[derive(Debug, Clone, Copy)]
pub struct ParamSmoother {
    smoothing_time_ms: f32,
    sample_rate: f32,

    a: f32,
    b: f32,
    z: f32,

    target_value: f32,
}

impl ParamSmoother {
    pub fn new(sample_rate: f32, value: f32, smoothing_time_ms: f32) -> Self {
        let mut smoother = Self {
            smoothing_time_ms,
            sample_rate,
            a: 0.0,
            b: 0.0,
            z: value,
            target_value: value,
        };
        smoother.reset(sample_rate);

        smoother
    }

    pub fn with_default_time(sample_rate: f32, value: f32) -> Self {
        Self::new(sample_rate, value, DEFAULT_SMOOTHING_TIME_MS)
    }

    /// Recompute the coefficient for a new sample rate and jump to the
    /// current target.
    pub fn reset(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;

        self.a = (-2.0 * PI / (self.smoothing_time_ms * 0.001 * sample_rate)).exp();
        self.b = 1.0 - self.a;

        self.z = self.target_value;
    }

    /// Change the smoothing time without resetting the state.
    pub fn set_smooth_time_ms(&mut self, smoothing_time_ms: f32) {
        self.smoothing_time_ms = smoothing_time_ms;

        self.a = (-2.0 * PI / (self.smoothing_time_ms * 0.001 * self.sample_rate)).exp();
        self.b = 1.0 - self.a;
    }

    #[inline]
    pub fn set_target_value(&mut self, val: f32) {
        self.target_value = val;
    }

    #[inline]
    pub fn reset_to_target_value(&mut self, val: f32) {
        self.target_value = val;
        self.z = val;
    }

    #[inline]
    pub fn process(&mut self) -> f32 {
        self.z = self.target_value * self.b + self.z * self.a;
        self.z
    }

    #[inline]
    pub fn pick_current_value(&self) -> f32 {
        self.z
    }

    #[inline]
    pub fn is_stable(&self) -> bool {
        (self.z - self.target_value).abs() < 1e-10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_to_target() {
        let mut s = ParamSmoother::new(44100.0, 0.0, 10.0);
        s.set_target_value(1.0);

        let mut v = 0.0;
        for _ in 0..44100 {
            v = s.process();
        }
        assert!((v - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_sample_rate_independent() {
        // Same smoothing time at two sample rates should land at the same
        // value after the same wall-clock duration.
        let mut s44 = ParamSmoother::new(44100.0, 0.0, 50.0);
        let mut s96 = ParamSmoother::new(96000.0, 0.0, 50.0);
        s44.set_target_value(1.0);
        s96.set_target_value(1.0);

        let mut v44 = 0.0;
        for _ in 0..4410 {
            v44 = s44.process();
        }
        let mut v96 = 0.0;
        for _ in 0..9600 {
            v96 = s96.process();
        }

        assert!((v44 - v96).abs() < 1e-3);
    }

    #[test]
    fn test_reset_to_target_is_instant() {
        let mut s = ParamSmoother::with_default_time(44100.0, 0.0);
        s.reset_to_target_value(0.5);
        assert!((s.pick_current_value() - 0.5).abs() < 1e-9);
        assert!(s.is_stable());
    }
}
