//! Multi-card moves.
//!
//! A batch is planned in one pass: the whole selection is lifted out of
//! the destination, a base position is allocated at the drop index, and
//! each following card is offset by a fixed step. Later cards therefore
//! never depend on where earlier cards actually land. Each planned move is
//! then committed on its own; a failure rolls back only that card.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::board::models::{Card, ContainerRef};
use crate::engine::allocator::{POSITION_INCREMENT, allocate, neighbors_at};
use crate::engine::model::BoardModel;
use crate::engine::validator::{RejectReason, check_container, wip_exceeded};

/// How the cards of a selection are ordered in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOrder {
    /// Where the cards currently sit: column, lane, then position.
    #[default]
    Position,
    /// The order the user selected them in.
    Selection,
}

impl std::fmt::Display for BatchOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchOrder::Position => write!(f, "position"),
            BatchOrder::Selection => write!(f, "selection"),
        }
    }
}

impl FromStr for BatchOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "position" => Ok(BatchOrder::Position),
            "selection" => Ok(BatchOrder::Selection),
            _ => anyhow::bail!(
                "Invalid batch order '{}'. Valid values: position, selection",
                s
            ),
        }
    }
}

/// Cards the acting client has multi-selected, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: Vec<i64>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `card_id`; selecting twice keeps the first position.
    pub fn select(&mut self, card_id: i64) {
        if !self.ids.contains(&card_id) {
            self.ids.push(card_id);
        }
    }

    pub fn deselect(&mut self, card_id: i64) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| *id != card_id);
        self.ids.len() != before
    }

    /// Flip membership. Returns whether the card is selected afterwards.
    pub fn toggle(&mut self, card_id: i64) -> bool {
        if self.deselect(card_id) {
            false
        } else {
            self.ids.push(card_id);
            true
        }
    }

    pub fn contains(&self, card_id: i64) -> bool {
        self.ids.contains(&card_id)
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub card_id: i64,
    pub destination: ContainerRef,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchPlan {
    /// Moves in destination order; positions strictly increase.
    pub moves: Vec<PlannedMove>,
    /// Selected ids that could not be planned (stale or archived).
    pub skipped: Vec<(i64, RejectReason)>,
    pub wip_exceeded: bool,
}

/// Plan moving `ids` into `destination` starting at `base_index`.
///
/// Whole-batch problems (missing destination, negative index, exhausted
/// spacing) are returned as `Err`; per-card problems end up in
/// `BatchPlan::skipped`.
pub fn sequence(
    model: &BoardModel,
    ids: &[i64],
    destination: ContainerRef,
    base_index: i64,
    order: BatchOrder,
) -> Result<BatchPlan, RejectReason> {
    check_container(model, destination)?;
    if base_index < 0 {
        return Err(RejectReason::NegativeIndex { index: base_index });
    }

    let mut seen = HashSet::new();
    let mut cards: Vec<&Card> = Vec::new();
    let mut skipped = Vec::new();
    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        match model.card(id) {
            None => skipped.push((id, RejectReason::ItemNotFound { card_id: id })),
            Some(card) if card.archived => {
                skipped.push((id, RejectReason::ItemArchived { card_id: id }))
            }
            Some(card) => cards.push(card),
        }
    }
    if cards.is_empty() {
        return Ok(BatchPlan {
            skipped,
            ..BatchPlan::default()
        });
    }

    if order == BatchOrder::Position {
        cards.sort_by(|a, b| {
            let ra = model.board_rank(a.id);
            let rb = model.board_rank(b.id);
            ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let staying: Vec<&Card> = model
        .items_of(destination)
        .into_iter()
        .filter(|c| !seen.contains(&c.id))
        .collect();
    let (prev, next) = neighbors_at(&staying, None, base_index as usize);
    let base = allocate(prev, next);
    if !base.valid {
        return Err(RejectReason::NeedsRenumber {
            container: destination,
        });
    }

    let count = cards.len();
    let step = match next {
        Some(n) => (n - base.position) / count as f64,
        None => POSITION_INCREMENT,
    };

    let mut moves = Vec::with_capacity(count);
    let mut last = prev;
    for (i, card) in cards.iter().enumerate() {
        let position = base.position + i as f64 * step;
        let ordered = last.is_none_or(|l| position > l) && next.is_none_or(|n| position < n);
        if !ordered || !position.is_finite() {
            return Err(RejectReason::NeedsRenumber {
                container: destination,
            });
        }
        last = Some(position);
        moves.push(PlannedMove {
            card_id: card.id,
            destination,
            position,
        });
    }

    let already_there = cards
        .iter()
        .filter(|c| c.column_id == destination.column_id)
        .count();
    Ok(BatchPlan {
        moves,
        skipped,
        wip_exceeded: wip_exceeded(model, destination.column_id, count, already_there),
    })
}
