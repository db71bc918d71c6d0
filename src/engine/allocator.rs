//! Fractional position allocation.
//!
//! Every ordered entity (cards within a container, columns within a board)
//! carries an `f64` position and is ranked by ascending sort. Inserting
//! between two neighbours takes their midpoint, so a move touches exactly
//! one row. Midpoints halve the gap each time; once adjacent positions get
//! closer than the renumber threshold the container is respaced with
//! [`renumber`], which is a maintenance pass and never part of a move.
//!
//! Everything here is pure and safe to call speculatively (drag previews).

/// Position handed to the first entity of an empty container.
pub const BASE_POSITION: f64 = 1024.0;

/// Spacing used for appends and for renumbered containers.
pub const POSITION_INCREMENT: f64 = 1024.0;

/// Adjacent gap below which a container should be renumbered.
pub const DEFAULT_RENUMBER_THRESHOLD: f64 = 1e-9;

/// An entity that has a stable id and a sortable position.
pub trait Positioned {
    fn entity_id(&self) -> i64;
    fn position(&self) -> f64;
}

impl<T: Positioned + ?Sized> Positioned for &T {
    fn entity_id(&self) -> i64 {
        (**self).entity_id()
    }

    fn position(&self) -> f64 {
        (**self).position()
    }
}

/// Result of a position computation.
///
/// `valid` is false when `position` does not land strictly between the
/// requested neighbours: either the gap has been exhausted by repeated
/// midpoint insertion, or the neighbours themselves collide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub position: f64,
    pub valid: bool,
}

/// Compute a position strictly between `prev` and `next`.
///
/// `None` means the corresponding end is open.
pub fn allocate(prev: Option<f64>, next: Option<f64>) -> Allocation {
    let position = match (prev, next) {
        (None, None) => BASE_POSITION,
        (None, Some(n)) => n / 2.0,
        (Some(p), None) => p + POSITION_INCREMENT,
        (Some(p), Some(n)) => (p + n) / 2.0,
    };
    let above = prev.is_none_or(|p| position > p);
    let below = next.is_none_or(|n| position < n);
    Allocation {
        position,
        valid: position.is_finite() && above && below,
    }
}

/// Creation-time position: one increment past the current last entity.
pub fn append_position(last: Option<f64>) -> f64 {
    allocate(last, None).position
}

/// Neighbour positions flanking `index` in `ordered` once `moving` is
/// taken out. `index` past the end clamps to an append.
pub fn neighbors_at<T: Positioned>(
    ordered: &[T],
    moving: Option<i64>,
    index: usize,
) -> (Option<f64>, Option<f64>) {
    let remaining: Vec<f64> = ordered
        .iter()
        .filter(|e| Some(e.entity_id()) != moving)
        .map(Positioned::position)
        .collect();
    let index = index.min(remaining.len());
    let prev = index.checked_sub(1).map(|i| remaining[i]);
    let next = remaining.get(index).copied();
    (prev, next)
}

/// Allocate the position an entity would take at `index` of `ordered`.
///
/// `ordered` must already be sorted ascending by position.
pub fn allocate_at_index<T: Positioned>(
    ordered: &[T],
    moving: Option<i64>,
    index: usize,
) -> Allocation {
    let (prev, next) = neighbors_at(ordered, moving, index);
    allocate(prev, next)
}

/// True when any two adjacent positions collide or sit closer than
/// `threshold`. `positions` must be sorted ascending.
pub fn needs_renumber<I>(positions: I, threshold: f64) -> bool
where
    I: IntoIterator<Item = f64>,
{
    let mut prev: Option<f64> = None;
    for pos in positions {
        if let Some(p) = prev {
            let gap = pos - p;
            if gap <= 0.0 || gap < threshold {
                return true;
            }
        }
        prev = Some(pos);
    }
    false
}

/// Respace `ordered_ids` to `1024, 2048, ...` keeping their order.
pub fn renumber(ordered_ids: &[i64]) -> Vec<(i64, f64)> {
    ordered_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, (i as f64 + 1.0) * POSITION_INCREMENT))
        .collect()
}
