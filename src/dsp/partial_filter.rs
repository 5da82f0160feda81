//! Partial association strategies.
//!
//! A partial filter consumes the raw per-frame partial list and mutates
//! ids and states in place: inherited ids for associated partials, fresh
//! ids for births, zombie/dead bookkeeping for disappearances. Strategies
//! are interchangeable behind this trait and chosen at tracker
//! construction.

use crate::dsp::partial::Partial;

pub trait PartialFilter {
    /// Associate the given frame against the internal history. On return
    /// `partials` holds the tracked set for this frame (empty until two
    /// frames have been seen).
    fn filter_partials(&mut self, partials: &mut Vec<Partial>);

    fn reset(&mut self, buffer_size: usize, sample_rate: f32);
}

/// Linear scan for a partial by id.
pub(crate) fn find_partial_by_id(partials: &[Partial], id: i64) -> Option<usize> {
    partials.iter().position(|p| p.id == id)
}

/// Binary search in an id-sorted list.
pub(crate) fn find_partial_by_id_sorted(partials: &[Partial], id: i64) -> Option<usize> {
    partials
        .binary_search_by(|p| p.id.cmp(&id))
        .ok()
}
