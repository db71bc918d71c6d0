//! Move admission.
//!
//! Turns a drag-release (card, destination container, destination index)
//! into either an admitted move carrying its final position, or a
//! rejection. WIP limits are advisory: exceeding one still admits the move
//! and only raises `wip_exceeded` so the caller can ask before going ahead.
//!
//! Nothing here mutates the model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::models::{ActorId, ContainerRef};
use crate::engine::allocator::allocate_at_index;
use crate::engine::model::BoardModel;

/// A proposed relocation of one card, as seen by the acting client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub card_id: i64,
    pub destination: ContainerRef,
    /// 0-based index into the destination's current, filtered view.
    pub index: i64,
}

impl MoveIntent {
    pub fn new(card_id: i64, destination: ContainerRef, index: i64) -> Self {
        Self {
            card_id,
            destination,
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("column {column_id} does not exist")]
    ContainerNotFound { column_id: i64 },

    #[error("swimlane {lane_id} does not exist")]
    LaneNotFound { lane_id: i64 },

    #[error("destination index {index} is negative")]
    NegativeIndex { index: i64 },

    #[error("card {card_id} is not on this board")]
    ItemNotFound { card_id: i64 },

    #[error("card {card_id} is archived")]
    ItemArchived { card_id: i64 },

    #[error("card is being edited by {actor}")]
    LockedBy { actor: ActorId },

    #[error("card {card_id} already has a move in flight")]
    MoveInFlight { card_id: i64 },

    #[error("column {column_id} already has a move in flight")]
    ColumnMoveInFlight { column_id: i64 },

    #[error("{container} has no room left between neighbours")]
    NeedsRenumber { container: ContainerRef },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveDecision {
    Admitted { position: f64, wip_exceeded: bool },
    Rejected { reason: RejectReason },
}

impl MoveDecision {
    pub fn rejected(reason: RejectReason) -> Self {
        MoveDecision::Rejected { reason }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, MoveDecision::Admitted { .. })
    }
}

/// Check that `destination` exists on the board.
pub fn check_container(model: &BoardModel, destination: ContainerRef) -> Result<(), RejectReason> {
    if model.column(destination.column_id).is_none() {
        return Err(RejectReason::ContainerNotFound {
            column_id: destination.column_id,
        });
    }
    if let Some(lane_id) = destination.lane_id
        && model.lane(lane_id).is_none()
    {
        return Err(RejectReason::LaneNotFound { lane_id });
    }
    Ok(())
}

/// Would moving `incoming` cards into `column_id` push it over its limit?
///
/// `already_there` counts incoming cards that are members of the column
/// now; they do not add to its occupancy.
pub fn wip_exceeded(
    model: &BoardModel,
    column_id: i64,
    incoming: usize,
    already_there: usize,
) -> bool {
    let Some(limit) = model.column(column_id).and_then(|c| c.wip_limit) else {
        return false;
    };
    let after = model.occupancy_of(column_id).saturating_sub(already_there) + incoming;
    after > limit as usize
}

/// Decide whether `intent` is admissible against the current model and
/// compute the position the card would take.
pub fn validate(model: &BoardModel, intent: &MoveIntent) -> MoveDecision {
    if let Err(reason) = check_container(model, intent.destination) {
        return MoveDecision::rejected(reason);
    }
    if intent.index < 0 {
        return MoveDecision::rejected(RejectReason::NegativeIndex {
            index: intent.index,
        });
    }
    let Some(card) = model.card(intent.card_id) else {
        return MoveDecision::rejected(RejectReason::ItemNotFound {
            card_id: intent.card_id,
        });
    };
    if card.archived {
        return MoveDecision::rejected(RejectReason::ItemArchived {
            card_id: intent.card_id,
        });
    }

    let items = model.items_of(intent.destination);
    let alloc = allocate_at_index(&items, Some(intent.card_id), intent.index as usize);
    if !alloc.valid {
        return MoveDecision::rejected(RejectReason::NeedsRenumber {
            container: intent.destination,
        });
    }

    let already_there = usize::from(card.column_id == intent.destination.column_id);
    MoveDecision::Admitted {
        position: alloc.position,
        wip_exceeded: wip_exceeded(model, intent.destination.column_id, 1, already_there),
    }
}

/// Same contract as [`validate`] for reordering a column on its board.
/// WIP limits do not apply to columns.
pub fn validate_column_move(model: &BoardModel, column_id: i64, index: i64) -> MoveDecision {
    if model.column(column_id).is_none() {
        return MoveDecision::rejected(RejectReason::ContainerNotFound { column_id });
    }
    if index < 0 {
        return MoveDecision::rejected(RejectReason::NegativeIndex { index });
    }
    let columns = model.columns_ordered();
    let alloc = allocate_at_index(&columns, Some(column_id), index as usize);
    if !alloc.valid {
        return MoveDecision::rejected(RejectReason::NeedsRenumber {
            container: ContainerRef::column(column_id),
        });
    }
    MoveDecision::Admitted {
        position: alloc.position,
        wip_exceeded: false,
    }
}
