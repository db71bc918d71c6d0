//! Client-side container model.
//!
//! Owns the ordering state of one board: columns, swimlanes and cards.
//! Reads are public. Runtime mutations are `pub(crate)` and are only
//! reached through the mutation coordinator, so the validator and the
//! allocator can never change what they are reasoning about.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::board::models::{BoardView, Card, Column, ContainerRef, Swimlane};
use crate::engine::allocator::needs_renumber;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardModel {
    board_id: i64,
    columns: BTreeMap<i64, Column>,
    lanes: BTreeMap<i64, Swimlane>,
    cards: HashMap<i64, Card>,
}

/// Ascending by position, ties broken by id.
pub(crate) fn rank_cmp(a: (f64, i64), b: (f64, i64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

impl BoardModel {
    pub fn new(board_id: i64) -> Self {
        Self {
            board_id,
            ..Self::default()
        }
    }

    /// Build a model from the server's board view.
    pub fn from_view(view: &BoardView) -> Self {
        let mut model = Self::new(view.board.id);
        for lane in &view.lanes {
            model.lanes.insert(lane.id, lane.clone());
        }
        for col in &view.columns {
            model.columns.insert(col.column.id, col.column.clone());
            for card in &col.cards {
                model.cards.insert(card.id, card.clone());
            }
        }
        model
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.insert(column.id, column);
        self
    }

    pub fn with_lane(mut self, lane: Swimlane) -> Self {
        self.lanes.insert(lane.id, lane);
        self
    }

    pub fn with_card(mut self, card: Card) -> Self {
        self.cards.insert(card.id, card);
        self
    }

    pub fn board_id(&self) -> i64 {
        self.board_id
    }

    pub fn column(&self, id: i64) -> Option<&Column> {
        self.columns.get(&id)
    }

    pub fn lane(&self, id: i64) -> Option<&Swimlane> {
        self.lanes.get(&id)
    }

    pub fn card(&self, id: i64) -> Option<&Card> {
        self.cards.get(&id)
    }

    pub fn has_container(&self, container: ContainerRef) -> bool {
        self.columns.contains_key(&container.column_id)
            && container.lane_id.is_none_or(|l| self.lanes.contains_key(&l))
    }

    pub fn columns_ordered(&self) -> Vec<&Column> {
        let mut cols: Vec<&Column> = self.columns.values().collect();
        cols.sort_by(|a, b| rank_cmp((a.position, a.id), (b.position, b.id)));
        cols
    }

    pub fn lanes_ordered(&self) -> Vec<&Swimlane> {
        let mut lanes: Vec<&Swimlane> = self.lanes.values().collect();
        lanes.sort_by(|a, b| rank_cmp((a.position, a.id), (b.position, b.id)));
        lanes
    }

    /// Non-archived cards of `container`, ascending by position.
    pub fn items_of(&self, container: ContainerRef) -> Vec<&Card> {
        let mut items: Vec<&Card> = self
            .cards
            .values()
            .filter(|c| !c.archived && c.container() == container)
            .collect();
        items.sort_by(|a, b| rank_cmp((a.position, a.id), (b.position, b.id)));
        items
    }

    /// Non-archived cards in the column, across every lane.
    pub fn occupancy_of(&self, column_id: i64) -> usize {
        self.cards
            .values()
            .filter(|c| !c.archived && c.column_id == column_id)
            .count()
    }

    /// A container is dirty while two of its cards share a position.
    pub fn is_dirty(&self, container: ContainerRef) -> bool {
        needs_renumber(self.items_of(container).iter().map(|c| c.position), 0.0)
    }

    /// Rank key used to order a multi-card selection by where the cards
    /// currently sit on the board: column, then lane, then position.
    pub fn board_rank(&self, card_id: i64) -> Option<(f64, f64, f64, i64)> {
        let card = self.cards.get(&card_id)?;
        let col_pos = self.columns.get(&card.column_id).map_or(f64::MAX, |c| c.position);
        let lane_pos = card
            .lane_id
            .and_then(|l| self.lanes.get(&l))
            .map_or(f64::MIN, |l| l.position);
        Some((col_pos, lane_pos, card.position, card.id))
    }

    // ── Mutation hooks (coordinator only) ─────────────────────────────

    pub(crate) fn set_position(&mut self, card_id: i64, position: f64) -> bool {
        match self.cards.get_mut(&card_id) {
            Some(card) => {
                card.position = position;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_container(&mut self, card_id: i64, container: ContainerRef) -> bool {
        match self.cards.get_mut(&card_id) {
            Some(card) => {
                card.column_id = container.column_id;
                card.lane_id = container.lane_id;
                true
            }
            None => false,
        }
    }

    /// Put a full card record back, exactly as captured.
    pub(crate) fn restore_card(&mut self, card: Card) {
        self.cards.insert(card.id, card);
    }

    pub(crate) fn set_column_position(&mut self, column_id: i64, position: f64) -> bool {
        match self.columns.get_mut(&column_id) {
            Some(col) => {
                col.position = position;
                true
            }
            None => false,
        }
    }

    pub(crate) fn restore_column(&mut self, column: Column) {
        self.columns.insert(column.id, column);
    }
}
