//! PARSHL-style partial association.
//!
//! The simple alternative to the AM/FM strategy: pure frequency proximity
//! with a bin-dependent delta and a fight/winner/loser disambiguation when
//! two current partials claim the same predecessor. Zombie frequencies are
//! extrapolated through the partial's Kalman estimator.
//!
//! See the PARSHL peak-matching description (Step 5) in the SASP book
//! appendix.

use std::collections::VecDeque;

use crate::dsp::partial::{Partial, PartialState};
use crate::dsp::partial_filter::{find_partial_by_id, PartialFilter};

const MAX_ZOMBIE_AGE: u32 = 2;

// For normalized freqs. Around 100Hz.
const DELTA_FREQ_ASSOC: f32 = 0.01;

const PARTIALS_HISTORY_SIZE: usize = 2;

// Delta taper at the top of the spectrum
const END_COEFF: f32 = 0.25;

// The association relaxation converges in a few passes; this only bounds
// the degenerate cases.
const MAX_NUM_ITER: usize = 100;

pub struct PartialFilterMarchand {
    buffer_size: usize,

    // history[0] is the newest frame
    history: VecDeque<Vec<Partial>>,

    tmp_current: Vec<Partial>,
    tmp_prev: Vec<Partial>,
    tmp_remaining: Vec<Partial>,
    tmp_new: Vec<Partial>,
}

impl PartialFilterMarchand {
    pub fn new(buffer_size: usize, _sample_rate: f32) -> Self {
        Self {
            buffer_size,
            history: VecDeque::new(),
            tmp_current: Vec::new(),
            tmp_prev: Vec::new(),
            tmp_remaining: Vec::new(),
            tmp_new: Vec::new(),
        }
    }

    fn associate_partials_parshl(&mut self) {
        let buffer_size = self.buffer_size;

        let current = &mut self.tmp_current;
        let prev = &mut self.tmp_prev;

        current.sort_by(Partial::order_by_freq);
        prev.sort_by(Partial::order_by_freq);

        let mut num_iters = 0;
        loop {
            let mut stop_flag = true;
            num_iters += 1;

            for i in 0..prev.len() {
                for j in 0..current.len() {
                    if current[j].id != -1 {
                        // Already associated, nothing to do on this step
                        continue;
                    }

                    let diff_freq = (prev[i].freq - current[j].freq).abs();

                    let bin_num = current[j].freq * buffer_size as f32 * 0.5;
                    let t = bin_num / (buffer_size as f32 * 0.5);
                    let diff_coeff = 1.0 - (1.0 - END_COEFF) * t;

                    if diff_freq >= DELTA_FREQ_ASSOC * diff_coeff {
                        continue;
                    }

                    match find_partial_by_id(current, prev[i].id) {
                        None => {
                            // Not yet claimed, no fight
                            current[j].id = prev[i].id;
                            current[j].age = prev[i].age;
                            current[j].kf = prev[i].kf;

                            stop_flag = false;
                        }
                        Some(other_idx) => {
                            // Fight: the closer frequency wins
                            let other_diff = (prev[i].freq - current[other_idx].freq).abs();
                            if diff_freq < other_diff {
                                current[j].id = prev[i].id;
                                current[j].age = prev[i].age;
                                current[j].kf = prev[i].kf;

                                // Detach the other
                                current[other_idx].id = -1;

                                stop_flag = false;
                            }
                        }
                    }
                }
            }

            if stop_flag || num_iters > MAX_NUM_ITER {
                break;
            }
        }

        self.tmp_new.clear();
        self.tmp_remaining.clear();
        for c in current.iter() {
            if c.id != -1 {
                let mut c = c.clone();
                c.state = PartialState::Alive;
                c.was_alive = true;
                c.age += 1;
                c.freq = c.kf.update_estimate(c.freq);
                self.tmp_new.push(c);
            } else {
                self.tmp_remaining.push(c.clone());
            }
        }

        std::mem::swap(current, &mut self.tmp_new);
    }
}

impl PartialFilter for PartialFilterMarchand {
    fn filter_partials(&mut self, partials: &mut Vec<Partial>) {
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
            for p in self.history[0].iter_mut() {
                p.gen_new_id();
            }
            return;
        }

        self.tmp_prev.clear();
        self.tmp_prev.extend_from_slice(&self.history[1]);
        self.tmp_current.clear();
        self.tmp_current.extend_from_slice(&self.history[0]);

        self.associate_partials_parshl();

        // Zombies and deaths for the previous partials that disappeared
        for i in 0..self.history[1].len() {
            let prev_partial = self.history[1][i].clone();

            let found = self.tmp_current.iter().any(|c| c.id == prev_partial.id);
            if found {
                continue;
            }

            match prev_partial.state {
                PartialState::Alive => {
                    let mut zombie = prev_partial;
                    zombie.state = PartialState::Zombie;
                    zombie.zombie_age = 0;

                    // Extrapolate the zombie
                    zombie.freq = zombie.kf.update_estimate(zombie.freq);

                    self.tmp_current.push(zombie);
                }
                PartialState::Zombie => {
                    let mut zombie = prev_partial;
                    zombie.zombie_age += 1;
                    if zombie.zombie_age >= MAX_ZOMBIE_AGE {
                        zombie.state = PartialState::Dead;
                    }

                    zombie.freq = zombie.kf.update_estimate(zombie.freq);

                    self.tmp_current.push(zombie);
                }
                // If dead, do not add, forget it
                PartialState::Dead => {}
            }
        }

        // Births get fresh ids
        for p in self.tmp_remaining.iter_mut() {
            p.gen_new_id();
            self.tmp_current.push(p.clone());
        }

        self.tmp_current.sort_by(Partial::order_by_freq);

        // Dead partials stay in the history one frame, for fade out
        self.history[0].clear();
        for p in self.tmp_current.iter() {
            self.history[0].push(p.clone());
        }

        partials.extend_from_slice(&self.history[0]);
    }

    fn reset(&mut self, buffer_size: usize, _sample_rate: f32) {
        self.buffer_size = buffer_size;

        self.history.clear();
    }
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
    fn test_association_by_proximity() {
        let mut filter = PartialFilterMarchand::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);

        let mut partials = vec![make_partial(0.202, -2.0)];
        filter.filter_partials(&mut partials);

        assert_eq!(partials.len(), 1);
        assert!(partials[0].id > 0);
        assert_eq!(partials[0].state, PartialState::Alive);
    }

    #[test]
    fn test_distant_partial_is_a_birth() {
        let mut filter = PartialFilterMarchand::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);
        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);
        let old_id = partials[0].id;

        // Far outside the association delta
        let mut partials = vec![make_partial(0.5, -2.0)];
        filter.filter_partials(&mut partials);

        let alive: Vec<_> = partials
            .iter()
            .filter(|p| p.state == PartialState::Alive)
            .collect();
        assert_eq!(alive.len(), 1);
        assert_ne!(alive[0].id, old_id);
    }

    #[test]
    fn test_fight_goes_to_closest() {
        let mut filter = PartialFilterMarchand::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);
        let mut partials = vec![make_partial(0.2, -2.0)];
        filter.filter_partials(&mut partials);
        let id = partials[0].id;

        // Two candidates inside the delta: the closer inherits the id
        let mut partials = vec![make_partial(0.2005, -2.0), make_partial(0.203, -2.0)];
        filter.filter_partials(&mut partials);

        let winner = partials.iter().find(|p| p.id == id).unwrap();
        assert!((winner.freq - 0.2005).abs() < 1e-3);
    }

    #[test]
    fn test_zombie_max_age_two() {
        let mut filter = PartialFilterMarchand::new(2048, 44100.0);

        let mut partials = vec![make_partial(0.3, -2.0)];
        filter.filter_partials(&mut partials);
        let mut partials = vec![make_partial(0.3, -2.0)];
        filter.filter_partials(&mut partials);
        let id = partials[0].id;

        // Frame 1 missing: zombie age 0
        let mut partials = Vec::new();
        filter.filter_partials(&mut partials);
        let z = partials.iter().find(|p| p.id == id).unwrap();
        assert_eq!(z.state, PartialState::Zombie);

        // Frame 2 missing: zombie age 1, still a zombie
        let mut partials = Vec::new();
        filter.filter_partials(&mut partials);
        let z = partials.iter().find(|p| p.id == id).unwrap();
        assert_eq!(z.state, PartialState::Zombie);

        // Frame 3 missing: dead
        let mut partials = Vec::new();
        filter.filter_partials(&mut partials);
        if let Some(z) = partials.iter().find(|p| p.id == id) {
            assert_eq!(z.state, PartialState::Dead);
        }
    }
}
