//! AM/FM partial association.
//!
//! Associates partials across frames from the likelihood that one
//! partial's amplitude/frequency line segment (value plus its alpha0/beta0
//! derivative) continues into the other. Both the amplitude and the
//! frequency likelihood must clear 0.5; contested candidates are awarded
//! by joint likelihood. A three-frame history feeds a crossing-repair pass
//! that swaps ids when extrapolated and actual trajectories disagree about
//! an intersection.
//!
//! Amplitudes are expected in natural-log scale here; the tracker converts
//! around the call.

use std::collections::VecDeque;

use crate::dsp::partial::{Partial, PartialState};
use crate::dsp::partial_filter::{find_partial_by_id_sorted, PartialFilter};
use crate::dsp::utils::{self, EPS};

const MAX_ZOMBIE_AGE: u32 = 1;

// Must keep history size >= 3, for the crossing repair
const PARTIALS_HISTORY_SIZE: usize = 3;

const MAX_NUM_ITER: usize = 10;

// Local scan span around the nearest-frequency candidate
const NUM_STEPS_LOOKUP: isize = 8;

const BIG_JUMP_COEFF: f32 = 16.0;

// Crossing repair only considers settled partials close in frequency
const MIN_PARTIAL_AGE: u32 = 5;
const MAX_SWAP_FREQ_HZ: f32 = 100.0;

pub struct PartialFilterAmfm {
    buffer_size: usize,
    sample_rate: f32,

    // history[0] is the newest frame
    history: VecDeque<Vec<Partial>>,

    tmp_current: Vec<Partial>,
    tmp_prev: Vec<Partial>,
    tmp_remaining: Vec<Partial>,
    tmp_new: Vec<Partial>,
    tmp_zombies: Vec<Partial>,
}

impl PartialFilterAmfm {
    pub fn new(buffer_size: usize, sample_rate: f32) -> Self {
        Self {
            buffer_size,
            sample_rate,
            history: VecDeque::new(),
            tmp_current: Vec::new(),
            tmp_prev: Vec::new(),
            tmp_remaining: Vec::new(),
            tmp_new: Vec::new(),
            tmp_zombies: Vec::new(),
        }
    }

    fn associate_partials(&mut self) {
        let buffer_size = self.buffer_size;
        let prev = &mut self.tmp_prev;
        let current = &mut self.tmp_current;

        current.sort_by(Partial::order_by_freq);
        prev.sort_by(Partial::order_by_freq);

        // Reset the links
        for p in prev.iter_mut() {
            p.linked_id = -1;
        }
        for c in current.iter_mut() {
            c.linked_id = -1;
            c.id = -1;
        }

        let mut num_iters = 0;
        loop {
            let mut stop_flag = true;
            num_iters += 1;

            for i in 0..prev.len() {
                // Skip stable links
                if prev[i].id != -1 && prev[i].linked_id != -1 {
                    let j = prev[i].linked_id as usize;
                    if current[j].linked_id == i as isize {
                        continue;
                    }
                }

                if current.is_empty() {
                    break;
                }

                let nearest = find_nearest_freq_id(current, prev[i].freq, i);

                for j in (nearest - NUM_STEPS_LOOKUP / 2)..(nearest + NUM_STEPS_LOOKUP / 2) {
                    if j < 0 || j >= current.len() as isize {
                        continue;
                    }
                    let j = j as usize;

                    if current[j].id == prev[i].id {
                        continue;
                    }

                    if check_discard_big_jump(buffer_size, &prev[i], &current[j]) {
                        continue;
                    }

                    let la = compute_la(&prev[i], &current[j]);
                    let lf = compute_lf(&prev[i], &current[j]);

                    // As in the paper
                    if la <= 0.5 || lf <= 0.5 {
                        continue;
                    }

                    // Current partial already has an id
                    let must_fight0 = current[j].id != -1;

                    // Prev partial already has an association
                    let fight1_idx = prev[i].linked_id;
                    let must_fight1 = fight1_idx != -1;

                    if !must_fight0 && !must_fight1 {
                        current[j].id = prev[i].id;
                        current[j].age = prev[i].age;

                        current[j].linked_id = i as isize;
                        prev[i].linked_id = j as isize;

                        stop_flag = false;
                        continue;
                    }

                    // Fight: compare against the incumbent pair
                    let other_prev_idx = current[j].linked_id;
                    if other_prev_idx == -1 && must_fight0 {
                        continue;
                    }
                    if fight1_idx == -1 && !must_fight0 {
                        continue;
                    }

                    let (fight_prev, fight_cur) = if must_fight0 {
                        (&prev[other_prev_idx as usize], &current[j])
                    } else {
                        (&prev[i], &current[fight1_idx as usize])
                    };

                    let other_la = compute_la(fight_prev, fight_cur);
                    let other_lf = compute_lf(fight_prev, fight_cur);

                    // Joint likelihood decides
                    let j0 = la * lf;
                    let j1 = other_la * other_lf;
                    if j0 > j1 {
                        // Current pair won; detach the loser
                        if must_fight1 {
                            let loser = fight1_idx as usize;
                            let loser_prev = current[loser].linked_id;
                            if loser_prev != -1 {
                                prev[loser_prev as usize].linked_id = -1;
                            }
                            current[loser].id = -1;
                            current[loser].linked_id = -1;
                        }

                        current[j].id = prev[i].id;
                        current[j].age = prev[i].age;

                        current[j].linked_id = i as isize;
                        prev[i].linked_id = j as isize;

                        stop_flag = false;
                    }
                    // Other pair won: keep it like it is
                }
            }

            if stop_flag || num_iters > MAX_NUM_ITER {
                break;
            }
        }

        // Keep the associated partials, set the rest aside as births
        self.tmp_new.clear();
        self.tmp_remaining.clear();
        for c in current.iter() {
            if c.id != -1 {
                let mut c = c.clone();
                c.state = PartialState::Alive;
                c.was_alive = true;
                c.age += 1;
                self.tmp_new.push(c);
            } else {
                self.tmp_remaining.push(c.clone());
            }
        }

        std::mem::swap(current, &mut self.tmp_new);
    }

    fn compute_zombie_dead_partials(&mut self) {
        self.tmp_zombies.clear();

        let prev = match self.history.get(1) {
            Some(prev) => prev,
            None => return,
        };

        for prev_partial in prev.iter() {
            let found = self
                .tmp_current
                .iter()
                .any(|c| c.id == prev_partial.id);
            if found {
                continue;
            }

            match prev_partial.state {
                PartialState::Alive => {
                    let mut zombie = prev_partial.clone();
                    zombie.state = PartialState::Zombie;
                    zombie.zombie_age = 0;

                    if zombie.zombie_age < MAX_ZOMBIE_AGE {
                        self.tmp_zombies.push(zombie);
                    }
                }
                PartialState::Zombie => {
                    let mut zombie = prev_partial.clone();
                    zombie.zombie_age += 1;
                    if zombie.zombie_age >= MAX_ZOMBIE_AGE {
                        zombie.state = PartialState::Dead;
                    }
                    self.tmp_zombies.push(zombie);
                }
                // Dead partials are forgotten
                PartialState::Dead => {}
            }
        }
    }

    /// Swap ids between pairs whose extrapolated paths and actual paths
    /// disagree about intersecting. `partials0` is the oldest frame,
    /// both history frames sorted by id.
    fn fix_partials_crossing(
        partials0: &[Partial],
        partials1: &[Partial],
        partials2: &mut [Partial],
        max_swap_freq: f32,
    ) {
        for i in 0..partials2.len() {
            let p0_2 = partials2[i].clone();
            if p0_2.id == -1 || p0_2.age < MIN_PARTIAL_AGE {
                continue;
            }

            let idx01 = match find_partial_by_id_sorted(partials1, p0_2.id) {
                Some(idx) => idx,
                None => continue,
            };
            let p0_1 = &partials1[idx01];

            let idx00 = match find_partial_by_id_sorted(partials0, p0_2.id) {
                Some(idx) => idx,
                None => continue,
            };
            let p0_0 = &partials0[idx00];

            let mut swapped = false;
            for j in (i + 1)..partials2.len() {
                let p1_2 = partials2[j].clone();
                if p1_2.id == -1 {
                    continue;
                }

                if (p1_2.freq - p0_2.freq).abs() > max_swap_freq {
                    continue;
                }

                let idx11 = match find_partial_by_id_sorted(partials1, p1_2.id) {
                    Some(idx) => idx,
                    None => continue,
                };
                let p1_1 = &partials1[idx11];

                let idx10 = match find_partial_by_id_sorted(partials0, p1_2.id) {
                    Some(idx) => idx,
                    None => continue,
                };
                let p1_0 = &partials0[idx10];

                // Extrapolated end points
                let extra_p0 = p0_1.freq + (p0_1.freq - p0_0.freq);
                let extra_p1 = p1_1.freq + (p1_1.freq - p1_0.freq);

                let extra_seg0 = [[p0_1.freq, 0.0], [extra_p0, 1.0]];
                let extra_seg1 = [[p1_1.freq, 0.0], [extra_p1, 1.0]];
                let extra_intersect = utils::seg_seg_intersect(extra_seg0, extra_seg1);

                let seg0 = [[p0_1.freq, 0.0], [p0_2.freq, 1.0]];
                let seg1 = [[p1_1.freq, 0.0], [p1_2.freq, 1.0]];
                let intersect = utils::seg_seg_intersect(seg0, seg1);

                if intersect != extra_intersect {
                    let tmp_id = partials2[i].id;
                    partials2[i].id = partials2[j].id;
                    partials2[j].id = tmp_id;

                    swapped = true;
                }

                if swapped {
                    break;
                }
            }
        }
    }
}

impl PartialFilter for PartialFilterAmfm {
    fn filter_partials(&mut self, partials: &mut Vec<Partial>) {
        // Push the newest frame, recycling the oldest vec once the ring
        // is full
        let mut frame = if self.history.len() >= PARTIALS_HISTORY_SIZE {
            self.history.pop_back().unwrap()
        } else {
            Vec::new()
        };
        frame.clear();
        frame.extend_from_slice(partials);
        self.history.push_front(frame);

        partials.clear();

        if self.history.len() == 1 {
            // Assign ids to the first series of partials; two frames are
            // needed before any filtering can happen
            for p in self.history[0].iter_mut() {
                p.gen_new_id();
            }
            return;
        }

        self.tmp_prev.clear();
        self.tmp_prev.extend_from_slice(&self.history[1]);
        self.tmp_current.clear();
        self.tmp_current.extend_from_slice(&self.history[0]);

        self.associate_partials();

        self.compute_zombie_dead_partials();
        let mut zombies = std::mem::take(&mut self.tmp_zombies);
        self.tmp_current.append(&mut zombies);
        self.tmp_zombies = zombies;

        if self.history.len() >= PARTIALS_HISTORY_SIZE {
            let max_swap_freq = MAX_SWAP_FREQ_HZ / (self.sample_rate * 0.5);

            self.history[1].sort_by(Partial::order_by_id);
            self.history[2].sort_by(Partial::order_by_id);

            Self::fix_partials_crossing(
                &self.history[2],
                &self.history[1],
                &mut self.tmp_current,
                max_swap_freq,
            );
        }

        // Births: the unmatched current partials get fresh ids
        for p in self.tmp_remaining.iter_mut() {
            p.gen_new_id();
            self.tmp_current.push(p.clone());
        }

        self.tmp_current.sort_by(Partial::order_by_freq);

        // Refresh the newest history frame, dead partials removed
        self.history[0].clear();
        for p in self.tmp_current.iter() {
            if p.state != PartialState::Dead {
                self.history[0].push(p.clone());
            }
        }

        partials.extend_from_slice(&self.history[0]);
    }

    fn reset(&mut self, buffer_size: usize, sample_rate: f32) {
        self.buffer_size = buffer_size;
        self.sample_rate = sample_rate;

        self.history.clear();
    }
}

fn check_discard_big_jump(buffer_size: usize, prev: &Partial, current: &Partial) -> bool {
    let one_bin_eps = 1.0 / buffer_size as f32;

    // Very close partials keep their id even when beta0 is tiny
    if (prev.freq - current.freq).abs() < one_bin_eps * BIG_JUMP_COEFF {
        return false;
    }

    // Extrapolated from the previous partial
    let extra_freq0 = prev.freq + prev.beta0;
    let flag0 = current.freq > extra_freq0 + BIG_JUMP_COEFF * (extra_freq0 - prev.freq);
    let flag1 = current.freq < extra_freq0 - BIG_JUMP_COEFF * (extra_freq0 - prev.freq);

    // Extrapolated back from the current partial
    let extra_freq1 = current.freq - current.beta0;
    let flag2 = prev.freq > extra_freq1 + BIG_JUMP_COEFF * (extra_freq1 - current.freq);
    let flag3 = prev.freq < extra_freq1 - BIG_JUMP_COEFF * (extra_freq1 - current.freq);

    // Mixed flags give a chance to pairs where one side's beta0 is almost
    // zero but the other's is significant
    (flag0 && flag3) || (flag1 && flag2)
}

/// Amplitude likelihood: high when each partial's amplitude plus its
/// alpha0 segment lands on the other.
fn compute_la(prev: &Partial, current: &Partial) -> f32 {
    let a = (prev.amp - (current.amp - current.alpha0)).abs();
    let b = (current.amp - (prev.amp + prev.alpha0)).abs();
    let area = utils::trapezoid_area(a, b, 1.0);

    let denom = (current.amp * prev.amp).sqrt();
    let ua = if denom > EPS { area / denom } else { 0.0 };

    1.0 / (1.0 + ua)
}

/// Frequency likelihood, same structure on freq and beta0.
fn compute_lf(prev: &Partial, current: &Partial) -> f32 {
    let a = (prev.freq - (current.freq - current.beta0)).abs();
    let b = (current.freq - (prev.freq + prev.beta0)).abs();
    let area = utils::trapezoid_area(a, b, 1.0);

    let denom = (current.freq * prev.freq).sqrt();
    let uf = if denom > EPS { area / denom } else { 0.0 };

    1.0 / (1.0 + uf)
}

/// Nearest-frequency index in a freq-sorted list, starting the walk at
/// `index`.
fn find_nearest_freq_id(partials: &[Partial], freq: f32, index: usize) -> isize {
    let index = index.min(partials.len() - 1);

    if partials[index].freq < freq {
        for i in index..partials.len() {
            if partials[i].freq > freq {
                let d20 = partials[i].freq - freq;
                let d21 = freq - partials[i - 1].freq;
                return if d20 < d21 { i as isize } else { i as isize - 1 };
            }
        }
        return partials.len() as isize - 1;
    } else if partials[index].freq > freq {
        for i in (0..=index).rev() {
            if partials[i].freq < freq {
                let d20 = freq - partials[i].freq;
                let d21 = partials[i + 1].freq - freq;
                return if d20 < d21 { i as isize } else { i as isize + 1 };
            }
        }
        return 0;
    }

    index as isize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_partial(freq: f32, amp: f32) -> Partial {
        let mut p = Partial::new();
        p.freq = freq;
        p.amp = amp;
        p.kf.init_estimate(freq);
        p
    }

    #[test]
    fn test_first_frame_is_withheld() {
        let mut filter = PartialFilterAmfm::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.1, -3.0)];
        filter.filter_partials(&mut partials);
        assert!(partials.is_empty());
    }

    #[test]
    fn test_stable_partial_keeps_id() {
        let mut filter = PartialFilterAmfm::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.1, -3.0)];
        filter.filter_partials(&mut partials);

        let mut partials = vec![make_partial(0.1001, -3.01)];
        filter.filter_partials(&mut partials);
        assert_eq!(partials.len(), 1);
        let id = partials[0].id;
        assert!(id > 0);

        let mut partials = vec![make_partial(0.1002, -3.0)];
        filter.filter_partials(&mut partials);
        let alive: Vec<_> = partials
            .iter()
            .filter(|p| p.state == PartialState::Alive)
            .collect();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, id);
        assert!(alive[0].age >= 2);
    }

    #[test]
    fn test_disappearance_makes_zombie_then_dead() {
        let mut filter = PartialFilterAmfm::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);
        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);
        let id = partials[0].id;

        // The partial disappears
        let mut partials = Vec::new();
        filter.filter_partials(&mut partials);
        let zombie: Vec<_> = partials.iter().filter(|p| p.id == id).collect();
        assert_eq!(zombie.len(), 1);
        assert_eq!(zombie[0].state, PartialState::Zombie);

        // Still missing: the zombie dies and is dropped from the history
        let mut partials = Vec::new();
        filter.filter_partials(&mut partials);
        assert!(partials.iter().all(|p| p.id != id));
    }

    #[test]
    fn test_no_two_current_partials_share_an_id() {
        let mut filter = PartialFilterAmfm::new(2048, 44100.0);

        for _ in 0..6 {
            let mut partials = vec![
                make_partial(0.10, -3.0),
                make_partial(0.1003, -3.2),
                make_partial(0.30, -2.0),
            ];
            filter.filter_partials(&mut partials);

            let mut ids: Vec<i64> = partials
                .iter()
                .filter(|p| p.state == PartialState::Alive)
                .map(|p| p.id)
                .collect();
            ids.sort_unstable();
            let n = ids.len();
            ids.dedup();
            assert_eq!(ids.len(), n, "duplicate id after association");
        }
    }

    #[test]
    fn test_empty_input_is_fine() {
        let mut filter = PartialFilterAmfm::new(2048, 44100.0);
        for _ in 0..4 {
            let mut partials = Vec::new();
            filter.filter_partials(&mut partials);
            assert!(partials.is_empty());
        }
    }

    #[test]
    fn test_crossing_repair_swaps_ids() {
        // Two tracks heading into each other: the extrapolation says they
        // cross, but the associated ids did not cross. The repair swaps.
        let track = |id: i64, freq: f32, age: u32| {
            let mut p = make_partial(freq, -3.0);
            p.id = id;
            p.age = age;
            p
        };

        // Oldest and middle frames, sorted by id
        let partials0 = vec![track(1, 0.1180, 5), track(2, 0.1240, 5)];
        let partials1 = vec![track(1, 0.1200, 6), track(2, 0.1220, 6)];

        // Current frame: the ids stayed on their own side even though the
        // extrapolated paths intersect
        let mut partials2 = vec![track(1, 0.1205, 7), track(2, 0.1215, 7)];

        let max_swap_freq = 100.0 / (44100.0 * 0.5);
        PartialFilterAmfm::fix_partials_crossing(
            &partials0,
            &partials1,
            &mut partials2,
            max_swap_freq,
        );

        assert_eq!(partials2[0].id, 2);
        assert_eq!(partials2[1].id, 1);
    }

    #[test]
    fn test_crossing_repair_leaves_consistent_tracks_alone() {
        let track = |id: i64, freq: f32, age: u32| {
            let mut p = make_partial(freq, -3.0);
            p.id = id;
            p.age = age;
            p
        };

        // Parallel tracks: no intersection predicted, none happened
        let partials0 = vec![track(1, 0.1180, 5), track(2, 0.1204, 5)];
        let partials1 = vec![track(1, 0.1190, 6), track(2, 0.1214, 6)];
        let mut partials2 = vec![track(1, 0.1200, 7), track(2, 0.1224, 7)];

        let max_swap_freq = 100.0 / (44100.0 * 0.5);
        PartialFilterAmfm::fix_partials_crossing(
            &partials0,
            &partials1,
            &mut partials2,
            max_swap_freq,
        );

        assert_eq!(partials2[0].id, 1);
        assert_eq!(partials2[1].id, 2);
    }

    #[test]
    fn test_likelihood_symmetry_on_perfect_continuation() {
        // A partial whose alpha0/beta0 exactly predict the next frame
        let mut prev = make_partial(0.2, -4.0);
        prev.alpha0 = 0.1;
        prev.beta0 = 0.001;
        let mut cur = make_partial(0.201, -3.9);
        cur.alpha0 = 0.1;
        cur.beta0 = 0.001;

        assert!(compute_la(&prev, &cur) > 0.9);
        assert!(compute_lf(&prev, &cur) > 0.9);
    }
}
