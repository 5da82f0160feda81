//! Tracked sinusoidal partials.
//!
//! A partial is one sinusoidal component followed across frames. Identity
//! comes from a process-wide monotone counter; lifecycle goes Alive ->
//! Zombie (missed one association) -> Dead. Frequency estimates are run
//! through a small one-dimensional Kalman filter so zombie partials can be
//! extrapolated.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

// Kalman tuning for normalized-frequency measurements
const KF_ERR_MEASURE: f32 = 0.01;
const KF_ERR_ESTIMATE: f32 = 0.01;
const KF_Q: f32 = 0.125;

// Process-wide id source. 63 bits of headroom; wrap is harmless.
static CURRENT_ID: AtomicI64 = AtomicI64::new(1);

/// Scalar Kalman estimator used on partial frequencies.
#[derive(Debug, Clone, Copy)]
pub struct KalmanFilter {
    err_measure: f32,
    err_estimate: f32,
    q: f32,
    last_estimate: f32,
}

impl KalmanFilter {
    pub fn new(err_measure: f32, err_estimate: f32, q: f32) -> Self {
        Self {
            err_measure,
            err_estimate,
            q,
            last_estimate: 0.0,
        }
    }

    pub fn init_estimate(&mut self, value: f32) {
        self.last_estimate = value;
    }

    pub fn update_estimate(&mut self, measure: f32) -> f32 {
        let gain = self.err_estimate / (self.err_estimate + self.err_measure);
        let estimate = self.last_estimate + gain * (measure - self.last_estimate);

        self.err_estimate = (1.0 - gain) * self.err_estimate
            + (self.last_estimate - estimate).abs() * self.q;
        self.last_estimate = estimate;

        estimate
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(KF_ERR_MEASURE, KF_ERR_ESTIMATE, KF_Q)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialState {
    Alive,
    Zombie,
    Dead,
}

#[derive(Debug, Clone)]
pub struct Partial {
    pub peak_index: usize,
    pub left_index: usize,
    pub right_index: usize,

    /// Fractional peak bin from QIFFT
    pub bin_idx_f: f32,

    /// Normalized frequency, 0..1 over the half spectrum. Scaled axis
    /// until denormalization.
    pub freq: f32,
    /// Amplitude; normalized dB outside association, natural log inside
    /// the AM/FM likelihood math.
    pub amp: f32,
    pub phase: f32,

    /// Amplitude-over-time derivative (QIFFT alpha0)
    pub alpha0: f32,
    /// Frequency-over-time derivative (QIFFT beta0)
    pub beta0: f32,

    /// -1 until minted or inherited
    pub id: i64,
    /// Association scratch, index into the other frame's partial list
    pub linked_id: isize,

    pub state: PartialState,
    pub was_alive: bool,
    pub zombie_age: u32,
    pub age: u32,

    pub kf: KalmanFilter,
}

impl Partial {
    pub fn new() -> Self {
        Self {
            peak_index: 0,
            left_index: 0,
            right_index: 0,
            bin_idx_f: 0.0,
            freq: 0.0,
            amp: 0.0,
            phase: 0.0,
            alpha0: 0.0,
            beta0: 0.0,
            id: -1,
            linked_id: -1,
            state: PartialState::Alive,
            was_alive: false,
            zombie_age: 0,
            age: 0,
            kf: KalmanFilter::default(),
        }
    }

    pub fn gen_new_id(&mut self) {
        self.id = CURRENT_ID.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn order_by_freq(a: &Partial, b: &Partial) -> Ordering {
        a.freq.partial_cmp(&b.freq).unwrap_or(Ordering::Equal)
    }

    pub fn order_by_amp(a: &Partial, b: &Partial) -> Ordering {
        a.amp.partial_cmp(&b.amp).unwrap_or(Ordering::Equal)
    }

    pub fn order_by_id(a: &Partial, b: &Partial) -> Ordering {
        a.id.cmp(&b.id)
    }
}

impl Default for Partial {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_positive() {
        let mut a = Partial::new();
        let mut b = Partial::new();
        a.gen_new_id();
        b.gen_new_id();

        assert!(a.id > 0);
        assert!(b.id > 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_kalman_converges() {
        let mut kf = KalmanFilter::default();
        kf.init_estimate(0.5);

        let mut est = 0.5;
        for _ in 0..200 {
            est = kf.update_estimate(0.7);
        }
        assert!((est - 0.7).abs() < 1e-3);
    }

    #[test]
    fn test_kalman_smooths_jitter() {
        let mut kf = KalmanFilter::default();
        kf.init_estimate(0.5);

        // One outlier measurement should not drag the estimate far
        kf.update_estimate(0.5);
        let est = kf.update_estimate(0.9);
        assert!(est < 0.75);
    }
}
