//! Billauer delta-threshold peak detection.
//!
//! Single-pass min/max alternation over a magnitude sequence: a maximum is
//! emitted once the signal drops `delta` below the running max, a minimum
//! once it rises `delta` above the running min. Peak bounds start at the
//! adjacent minima and are then tightened from the peak prominence and
//! symmetrized.
//!
//! See the Matlab findpeaks/prominence documentation for the canonical
//! prominence definition used by `compute_peak_prominence`.

// Keep 20 peaks and suppress only if more than 20 peaks
const SUPPRESS_MIN_NUM_PEAKS: usize = 20;

// Fraction of the prominence at which the tightened peak feet stop
const PEAKS_WIDTH_RATIO2: f32 = 0.75;

#[derive(Debug, Clone, Copy, Default)]
pub struct Peak {
    pub peak_index: usize,
    pub left_index: usize,
    pub right_index: usize,
    pub prominence: f32,
}

pub struct PeakDetector {
    max_delta: f32,
    delta: f32,
    threshold2: f32,
}

impl PeakDetector {
    /// `max_delta` is the full range of the input values; the detection
    /// threshold is a fraction of it.
    pub fn new(max_delta: f32) -> Self {
        let threshold = 0.01;

        Self {
            max_delta,
            delta: threshold * max_delta,
            threshold2: 1.0,
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.delta = threshold * self.max_delta;
    }

    /// Frequency-based suppression ratio, 1.0 keeps everything.
    pub fn set_threshold2(&mut self, threshold2: f32) {
        self.threshold2 = threshold2;
    }

    pub fn detect_peaks(
        &self,
        data: &[f32],
        peaks: &mut Vec<Peak>,
        min_index: usize,
        max_index: usize,
    ) {
        peaks.clear();

        let max_index = max_index.min(data.len().saturating_sub(1));
        if max_index <= min_index {
            return;
        }

        let mut mintab: Vec<usize> = Vec::new();
        let mut maxtab: Vec<usize> = Vec::new();

        let mut mn = f32::INFINITY;
        let mut mx = f32::NEG_INFINITY;
        let mut mnpos = min_index;
        let mut mxpos = min_index;

        // Look for max first
        let mut lookformax = true;

        // Check if we start on a descending slope; then the first sample is
        // itself a peak and we start by looking for a minimum.
        let mut startedbypeak = false;
        if max_index - min_index >= 2 && data[min_index] > data[min_index + 1] {
            maxtab.push(min_index);
            mx = data[min_index];
            lookformax = false;
            startedbypeak = true;
        }

        for i in min_index..=max_index {
            let t = data[i];

            if t > mx {
                mx = t;
                mxpos = i;
            }
            if t < mn {
                mn = t;
                mnpos = i;
            }

            if lookformax {
                if t < mx - self.delta {
                    maxtab.push(mxpos);
                    mn = t;
                    mnpos = i;
                    lookformax = false;
                }
            } else if t > mn + self.delta {
                mintab.push(mnpos);
                mx = t;
                mxpos = i;
                lookformax = true;
            }
        }

        // When we started on a peak, keep it only if it stands at least
        // delta above the first minimum.
        let mut keepfirstpeak = true;
        if startedbypeak
            && !maxtab.is_empty()
            && !mintab.is_empty()
            && data[maxtab[0]] < data[mintab[0]] + self.delta
        {
            keepfirstpeak = false;
        }

        for (i, &mxi) in maxtab.iter().enumerate() {
            if i == 0 && !keepfirstpeak {
                continue;
            }

            let left = if i >= 1 && i - 1 < mintab.len() {
                mintab[i - 1]
            } else {
                min_index
            };
            let right = if i < mintab.len() { mintab[i] } else { max_index };

            peaks.push(Peak {
                peak_index: mxi,
                left_index: left,
                right_index: right,
                prominence: 0.0,
            });
        }

        self.adjust_peaks_width_simple(data, peaks, min_index, max_index);

        self.suppress_small_peaks_frequency(peaks);
    }

    /// With raw Billauer bounds a lone peak would span the whole range.
    /// Tighten each side to the point where the magnitude first drops below
    /// `peak - 0.75*|prominence|`, never crossing the original minima, then
    /// symmetrize to the smaller half-width.
    fn adjust_peaks_width_simple(
        &self,
        data: &[f32],
        peaks: &mut [Peak],
        min_index: usize,
        max_index: usize,
    ) {
        for peak in peaks.iter_mut() {
            let peak_amp = data[peak.peak_index];

            compute_peak_prominence_simple(data, peak);
            let thrs = peak_amp - (peak.prominence * PEAKS_WIDTH_RATIO2).abs();

            let origin_left = peak.left_index;
            let origin_right = peak.right_index;

            // Left foot
            let mut j = peak.peak_index;
            while j > min_index {
                j -= 1;
                if j <= origin_left {
                    break;
                }
                if data[j] < thrs {
                    peak.left_index = j;
                    break;
                }
            }

            // Right foot
            let mut j = peak.peak_index;
            while j < max_index {
                j += 1;
                if j >= origin_right {
                    break;
                }
                if data[j] < thrs {
                    peak.right_index = j;
                    break;
                }
            }

            // Make the peak symmetric, using the minimal width
            let left_width = peak.peak_index - peak.left_index;
            let right_width = peak.right_index - peak.peak_index;
            if left_width > right_width {
                peak.left_index = peak.peak_index - right_width;
            } else if right_width > left_width {
                peak.right_index = peak.peak_index + left_width;
            }
        }
    }

    /// When more than 20 peaks are present and threshold2 < 1, keep only
    /// the first `ceil(threshold2 * n)` peaks in bin order.
    fn suppress_small_peaks_frequency(&self, peaks: &mut Vec<Peak>) {
        if self.threshold2 >= 1.0 {
            return;
        }
        if peaks.len() < SUPPRESS_MIN_NUM_PEAKS {
            return;
        }

        peaks.sort_by_key(|p| p.peak_index);

        let mut num_to_take = (peaks.len() as f32 * self.threshold2).ceil() as usize;
        if num_to_take < SUPPRESS_MIN_NUM_PEAKS && peaks.len() > SUPPRESS_MIN_NUM_PEAKS {
            num_to_take = SUPPRESS_MIN_NUM_PEAKS;
        }

        peaks.truncate(num_to_take);
    }
}

/// Prominence from the higher of the two feet. Cheap, used for the width
/// adjustment.
pub fn compute_peak_prominence_simple(data: &[f32], peak: &mut Peak) {
    let lm = data[peak.left_index];
    let rm = data[peak.right_index];

    let base = lm.max(rm);

    peak.prominence = data[peak.peak_index] - base;
}

/// Canonical prominence: extend a horizontal line at peak level until it
/// crosses the signal or reaches the range end, find the minimum in each
/// interval, and measure against the higher of the two. At a range
/// boundary the opposite side's minimum is used so edge peaks do not get
/// zero prominence.
pub fn compute_peak_prominence(data: &[f32], peak: &mut Peak, min_index: usize, max_index: usize) {
    let peak_val = data[peak.peak_index];

    let mut left_index = peak.peak_index;
    let mut j = peak.peak_index;
    loop {
        if data[j] > peak_val {
            break;
        }
        left_index = j;
        if j == min_index {
            break;
        }
        j -= 1;
    }

    let mut right_index = peak.peak_index;
    for j in peak.peak_index..=max_index {
        if data[j] > peak_val {
            break;
        }
        right_index = j;
    }

    let mut left_min = peak_val;
    for j in left_index..=peak.peak_index {
        left_min = left_min.min(data[j]);
    }

    let mut right_min = peak_val;
    for j in peak.peak_index..=right_index {
        right_min = right_min.min(data[j]);
    }

    let mut prominence = if left_min > right_min {
        peak_val - left_min
    } else {
        peak_val - right_min
    };

    if left_index == min_index {
        prominence = peak_val - right_min;
    }
    if right_index == max_index {
        prominence = peak_val - left_min;
    }

    peak.prominence = prominence;
}

pub fn compute_peaks_prominence(
    data: &[f32],
    peaks: &mut [Peak],
    min_index: usize,
    max_index: usize,
) {
    for peak in peaks.iter_mut() {
        compute_peak_prominence(data, peak, min_index, max_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump(center: usize, width: f32, height: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let d = (i as f32 - center as f32) / width;
                height * (-0.5 * d * d).exp()
            })
            .collect()
    }

    #[test]
    fn test_single_peak() {
        let data = bump(50, 4.0, 1.0, 128);
        let det = PeakDetector::new(1.0);

        let mut peaks = Vec::new();
        det.detect_peaks(&data, &mut peaks, 0, 127);

        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].peak_index, 50);
    }

    #[test]
    fn test_bounds_invariant_and_symmetry() {
        let mut data = bump(40, 3.0, 1.0, 128);
        let data2 = bump(80, 5.0, 0.7, 128);
        for (a, b) in data.iter_mut().zip(&data2) {
            *a += b;
        }

        let det = PeakDetector::new(1.0);
        let mut peaks = Vec::new();
        det.detect_peaks(&data, &mut peaks, 0, 127);

        assert_eq!(peaks.len(), 2);
        for p in &peaks {
            assert!(p.left_index <= p.peak_index);
            assert!(p.peak_index <= p.right_index);
            assert_eq!(
                p.peak_index - p.left_index,
                p.right_index - p.peak_index,
                "widths not symmetric"
            );
        }
    }

    #[test]
    fn test_small_peaks_below_delta_ignored() {
        let mut data = bump(60, 4.0, 1.0, 128);
        // Tiny ripple far below delta
        for (i, v) in data.iter_mut().enumerate() {
            *v += 0.001 * ((i as f32) * 1.3).sin();
        }

        let mut det = PeakDetector::new(1.0);
        det.set_threshold(0.05);

        let mut peaks = Vec::new();
        det.detect_peaks(&data, &mut peaks, 0, 127);
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn test_canonical_prominence_edge_peak() {
        // Descending ramp: first sample is a border peak; canonical
        // prominence must not be zero.
        let data: Vec<f32> = (0..64).map(|i| 1.0 - i as f32 / 64.0).collect();

        let mut peak = Peak {
            peak_index: 0,
            left_index: 0,
            right_index: 10,
            prominence: 0.0,
        };
        compute_peak_prominence(&data, &mut peak, 0, 63);
        assert!(peak.prominence > 0.5);
    }

    #[test]
    fn test_threshold2_suppression() {
        // A comb of 40 identical peaks
        let mut data = vec![0.0f32; 410];
        for k in 0..40 {
            let c = 5 + k * 10;
            data[c] = 1.0;
        }

        let mut det = PeakDetector::new(1.0);
        det.set_threshold(0.1);
        det.set_threshold2(0.6);

        let mut peaks = Vec::new();
        det.detect_peaks(&data, &mut peaks, 0, 409);

        assert_eq!(peaks.len(), 24);
        // Kept in bin order from the bottom
        assert!(peaks[0].peak_index < peaks[1].peak_index);
    }
}
