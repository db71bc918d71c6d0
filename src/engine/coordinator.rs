//! Optimistic mutation coordinator.
//!
//! Every move runs `Idle -> Applied -> {Confirmed | RolledBack}`. The local
//! model changes first, then the store is asked. If the store fails or does
//! not answer within `commit_timeout`, the card captured before the change
//! is put back exactly as it was.
//!
//! Moves of different cards may overlap freely and resolve in any order. A
//! second move of a card whose first move is still unresolved is refused
//! with `MoveInFlight`.
//!
//! The coordinator reads the presence map but never writes to it.
//!
//! Renumbering is normally left to the server, which respaces a container
//! in the background after a move. A move that is otherwise admissible
//! into a container whose positions have already collided or crowded
//! below `renumber_threshold` renumbers it first, so the allocated
//! position never ties with a neighbour. Refused moves never renumber.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use uuid::Uuid;

use crate::board::models::{ActorId, BoardView, Card, Column, ContainerRef};
use crate::engine::allocator::{DEFAULT_RENUMBER_THRESHOLD, needs_renumber};
use crate::engine::batch::{BatchOrder, BatchPlan, SelectionSet, sequence};
use crate::engine::events::RealtimeEvent;
use crate::engine::model::BoardModel;
use crate::engine::presence::PresenceMap;
use crate::engine::store::BoardStore;
use crate::engine::validator::{
    MoveDecision, MoveIntent, RejectReason, check_container, validate, validate_column_move,
};
use crate::errors::EngineError;

pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_millis(5000);

// ── WIP policy ──────────────────────────────────────────────────────────

/// What a WIP policy gets to look at before deciding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipContext {
    pub column_id: i64,
    pub limit: u32,
    /// Non-archived cards in the column before the move.
    pub occupancy: usize,
    /// Cards about to enter the column.
    pub incoming: Vec<i64>,
}

/// Decides whether a move that exceeds a WIP limit goes ahead.
pub trait WipPolicy: Send + Sync {
    fn on_wip_exceeded(&self, ctx: &WipContext) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

impl WipPolicy for AlwaysProceed {
    fn on_wip_exceeded(&self, _ctx: &WipContext) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDecline;

impl WipPolicy for AlwaysDecline {
    fn on_wip_exceeded(&self, _ctx: &WipContext) -> bool {
        false
    }
}

impl<F> WipPolicy for F
where
    F: Fn(&WipContext) -> bool + Send + Sync,
{
    fn on_wip_exceeded(&self, ctx: &WipContext) -> bool {
        self(ctx)
    }
}

// ── Settings and outcomes ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    pub commit_timeout: Duration,
    pub batch_order: BatchOrder,
    pub renumber_threshold: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            batch_order: BatchOrder::default(),
            renumber_threshold: DEFAULT_RENUMBER_THRESHOLD,
        }
    }
}

/// Correlates the log lines of one mutation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Applied,
    Confirmed,
    RolledBack,
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationState::Idle => write!(f, "idle"),
            MutationState::Applied => write!(f, "applied"),
            MutationState::Confirmed => write!(f, "confirmed"),
            MutationState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome<T = Card> {
    /// The store accepted the move; carries its canonical record.
    Confirmed(T),
    /// Already there. Nothing was sent.
    Unchanged,
    /// The WIP policy said no. Nothing was applied.
    Declined,
    Rejected(RejectReason),
    /// Applied locally, then undone.
    RolledBack { reason: String },
}

impl<T> CommitOutcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, CommitOutcome::Confirmed(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, CommitOutcome::RolledBack { .. })
    }
}

/// Per-card results of a batch, planned moves first in destination order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    pub items: Vec<(i64, CommitOutcome)>,
    pub wip_exceeded: bool,
    /// False when the batch was refused or declined before any store call.
    pub dispatched: bool,
}

impl BatchOutcome {
    pub fn outcome_of(&self, card_id: i64) -> Option<&CommitOutcome> {
        self.items
            .iter()
            .find(|(id, _)| *id == card_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn confirmed(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter(|(_, o)| o.is_confirmed())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn rolled_back(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter(|(_, o)| o.is_rolled_back())
            .map(|(id, _)| *id)
            .collect()
    }
}

// ── Local state ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LocalState {
    model: BoardModel,
    /// Rollback snapshots of cards with a move in flight.
    in_flight: HashMap<i64, Card>,
    columns_in_flight: HashMap<i64, Column>,
    selection: SelectionSet,
}

impl LocalState {
    /// Take the store's version of a card. While a move of it is in flight
    /// the snapshot is replaced instead, so a later rollback lands on it.
    fn reconcile_card(&mut self, card: Card) {
        match self.in_flight.get_mut(&card.id) {
            Some(snapshot) => *snapshot = card,
            None => self.model.restore_card(card),
        }
    }

    fn reconcile_column(&mut self, column: Column) {
        match self.columns_in_flight.get_mut(&column.id) {
            Some(snapshot) => *snapshot = column,
            None => self.model.restore_column(column),
        }
    }
}

/// True when `id` already sits at `index` of `ids` (clamped to the end).
fn sits_at_index(ids: &[i64], id: i64, index: i64) -> bool {
    match ids.iter().position(|x| *x == id) {
        Some(current) => current == (index.max(0) as usize).min(ids.len() - 1),
        None => false,
    }
}

fn dedup_in_order(ids: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

// ── Coordinator ─────────────────────────────────────────────────────────

pub struct MutationCoordinator<S> {
    state: Arc<Mutex<LocalState>>,
    store: Arc<S>,
    presence: PresenceMap,
    actor: ActorId,
    wip_policy: Arc<dyn WipPolicy>,
    settings: SyncSettings,
}

impl<S> Clone for MutationCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            store: Arc::clone(&self.store),
            presence: self.presence.clone(),
            actor: self.actor.clone(),
            wip_policy: Arc::clone(&self.wip_policy),
            settings: self.settings,
        }
    }
}

impl<S: BoardStore> MutationCoordinator<S> {
    pub fn new(model: BoardModel, store: Arc<S>, presence: PresenceMap, actor: ActorId) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState {
                model,
                ..LocalState::default()
            })),
            store,
            presence,
            actor,
            wip_policy: Arc::new(AlwaysProceed),
            settings: SyncSettings::default(),
        }
    }

    pub fn with_wip_policy(mut self, policy: impl WipPolicy + 'static) -> Self {
        self.wip_policy = Arc::new(policy);
        self
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalState>, EngineError> {
        self.state.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// A copy of the local model as it stands, optimistic moves included.
    pub fn model(&self) -> Result<BoardModel, EngineError> {
        Ok(self.lock()?.model.clone())
    }

    pub fn card(&self, card_id: i64) -> Result<Option<Card>, EngineError> {
        Ok(self.lock()?.model.card(card_id).cloned())
    }

    pub fn items_of(&self, container: ContainerRef) -> Result<Vec<Card>, EngineError> {
        let state = self.lock()?;
        Ok(state.model.items_of(container).into_iter().cloned().collect())
    }

    /// Cards whose move has not resolved yet, ascending.
    pub fn in_flight(&self) -> Result<Vec<i64>, EngineError> {
        let mut ids: Vec<i64> = self.lock()?.in_flight.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Who is editing `card_id`, if anyone.
    pub fn query_lock(&self, card_id: i64) -> Option<ActorId> {
        self.presence.holder(card_id)
    }

    /// Replace the local model with a freshly fetched board. Cards with a
    /// move in flight keep their local guess; the fetched version becomes
    /// their rollback snapshot.
    pub fn refresh(&self, view: &BoardView) -> Result<(), EngineError> {
        let fresh = BoardModel::from_view(view);
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let mut guesses = Vec::new();
        for (id, snapshot) in state.in_flight.iter_mut() {
            if let Some(server) = fresh.card(*id) {
                *snapshot = server.clone();
                if let Some(local) = state.model.card(*id) {
                    guesses.push(local.clone());
                }
            }
        }
        let mut column_guesses = Vec::new();
        for (id, snapshot) in state.columns_in_flight.iter_mut() {
            if let Some(server) = fresh.column(*id) {
                *snapshot = server.clone();
                if let Some(local) = state.model.column(*id) {
                    column_guesses.push(local.clone());
                }
            }
        }

        state.model = fresh;
        for card in guesses {
            state.model.restore_card(card);
        }
        for column in column_guesses {
            state.model.restore_column(column);
        }
        tracing::debug!(board_id = state.model.board_id(), "local board refreshed");
        Ok(())
    }

    fn precheck(&self, state: &LocalState, card_id: i64) -> Option<RejectReason> {
        if let Some(actor) = self.presence.holder(card_id)
            && actor != self.actor
        {
            return Some(RejectReason::LockedBy { actor });
        }
        if state.in_flight.contains_key(&card_id) {
            return Some(RejectReason::MoveInFlight { card_id });
        }
        None
    }

    fn consult_wip(&self, column_id: i64, incoming: Vec<i64>) -> Result<bool, EngineError> {
        let ctx = {
            let state = self.lock()?;
            WipContext {
                column_id,
                limit: state
                    .model
                    .column(column_id)
                    .and_then(|c| c.wip_limit)
                    .unwrap_or_default(),
                occupancy: state.model.occupancy_of(column_id),
                incoming,
            }
        };
        let proceed = self.wip_policy.on_wip_exceeded(&ctx);
        tracing::info!(
            column_id,
            limit = ctx.limit,
            occupancy = ctx.occupancy,
            incoming = ctx.incoming.len(),
            proceed,
            "WIP limit exceeded"
        );
        Ok(proceed)
    }

    // ── Single-card moves ──

    /// Validate a drag-release without changing anything.
    pub fn propose_move(
        &self,
        card_id: i64,
        destination: ContainerRef,
        index: i64,
    ) -> Result<MoveDecision, EngineError> {
        let state = self.lock()?;
        if let Some(reason) = self.precheck(&state, card_id) {
            return Ok(MoveDecision::rejected(reason));
        }
        Ok(validate(
            &state.model,
            &MoveIntent::new(card_id, destination, index),
        ))
    }

    /// Validate, consult the WIP policy if needed, then apply and commit.
    pub async fn commit_move(
        &self,
        card_id: i64,
        destination: ContainerRef,
        index: i64,
    ) -> Result<CommitOutcome, EngineError> {
        let mut decision = self.propose_move(card_id, destination, index)?;
        let renumbered = match &decision {
            MoveDecision::Rejected {
                reason: RejectReason::NeedsRenumber { container },
            } => {
                self.renumber(*container).await?;
                true
            }
            MoveDecision::Rejected { .. } => false,
            MoveDecision::Admitted { .. } => self.renumber_if_due(destination).await?,
        };
        if renumbered {
            decision = self.propose_move(card_id, destination, index)?;
            if let MoveDecision::Rejected {
                reason: RejectReason::NeedsRenumber { container },
            } = decision
            {
                return Err(EngineError::PrecisionExhausted {
                    container,
                    count: 1,
                });
            }
        }

        let (position, wip_exceeded) = match decision {
            MoveDecision::Admitted {
                position,
                wip_exceeded,
            } => (position, wip_exceeded),
            MoveDecision::Rejected { reason } => {
                tracing::debug!(card_id, %reason, "move rejected");
                return Ok(CommitOutcome::Rejected(reason));
            }
        };

        let unchanged = {
            let state = self.lock()?;
            let ids: Vec<i64> = state
                .model
                .items_of(destination)
                .iter()
                .map(|c| c.id)
                .collect();
            sits_at_index(&ids, card_id, index)
        };
        if unchanged {
            return Ok(CommitOutcome::Unchanged);
        }

        if wip_exceeded && !self.consult_wip(destination.column_id, vec![card_id])? {
            return Ok(CommitOutcome::Declined);
        }

        self.commit_position(card_id, destination, position).await
    }

    /// Apply a move to an already computed position and commit it.
    pub async fn commit_position(
        &self,
        card_id: i64,
        destination: ContainerRef,
        position: f64,
    ) -> Result<CommitOutcome, EngineError> {
        let mutation = MutationId::new();
        {
            let mut state = self.lock()?;
            if let Some(reason) = self.precheck(&state, card_id) {
                return Ok(CommitOutcome::Rejected(reason));
            }
            if let Err(reason) = check_container(&state.model, destination) {
                return Ok(CommitOutcome::Rejected(reason));
            }
            let Some(card) = state.model.card(card_id).cloned() else {
                return Ok(CommitOutcome::Rejected(RejectReason::ItemNotFound {
                    card_id,
                }));
            };
            if card.archived {
                return Ok(CommitOutcome::Rejected(RejectReason::ItemArchived {
                    card_id,
                }));
            }
            if card.is_at(destination, position) {
                return Ok(CommitOutcome::Unchanged);
            }
            state.model.set_container(card_id, destination);
            state.model.set_position(card_id, position);
            state.in_flight.insert(card_id, card);
        }
        tracing::debug!(
            %mutation,
            card_id,
            %destination,
            position,
            state = %MutationState::Applied,
            "optimistic move applied"
        );

        let result = tokio::time::timeout(
            self.settings.commit_timeout,
            self.store.move_item(card_id, destination, position),
        )
        .await;

        let mut state = self.lock()?;
        let snapshot = state.in_flight.remove(&card_id);
        let reason = match result {
            Ok(Ok(card)) => {
                if !card.is_at(destination, position) {
                    tracing::debug!(
                        %mutation,
                        card_id,
                        position = card.position,
                        "store placed card differently, taking its version"
                    );
                }
                state.model.restore_card(card.clone());
                tracing::info!(%mutation, card_id, state = %MutationState::Confirmed, "move confirmed");
                return Ok(CommitOutcome::Confirmed(card));
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!(
                "no confirmation within {} ms",
                self.settings.commit_timeout.as_millis()
            ),
        };

        if let Some(snapshot) = snapshot {
            state.model.restore_card(snapshot);
        }
        tracing::warn!(
            %mutation,
            card_id,
            state = %MutationState::RolledBack,
            reason = %reason,
            "move rolled back"
        );
        Ok(CommitOutcome::RolledBack { reason })
    }

    // ── Column moves ──

    pub fn propose_column_move(
        &self,
        column_id: i64,
        index: i64,
    ) -> Result<MoveDecision, EngineError> {
        let state = self.lock()?;
        if state.columns_in_flight.contains_key(&column_id) {
            return Ok(MoveDecision::rejected(RejectReason::ColumnMoveInFlight {
                column_id,
            }));
        }
        Ok(validate_column_move(&state.model, column_id, index))
    }

    pub async fn commit_column_move(
        &self,
        column_id: i64,
        index: i64,
    ) -> Result<CommitOutcome<Column>, EngineError> {
        let position = match self.propose_column_move(column_id, index)? {
            MoveDecision::Admitted { position, .. } => position,
            MoveDecision::Rejected { reason } => return Ok(CommitOutcome::Rejected(reason)),
        };

        let mutation = MutationId::new();
        {
            let mut state = self.lock()?;
            if state.columns_in_flight.contains_key(&column_id) {
                return Ok(CommitOutcome::Rejected(RejectReason::ColumnMoveInFlight {
                    column_id,
                }));
            }
            let Some(column) = state.model.column(column_id).cloned() else {
                return Ok(CommitOutcome::Rejected(RejectReason::ContainerNotFound {
                    column_id,
                }));
            };
            let ids: Vec<i64> = state.model.columns_ordered().iter().map(|c| c.id).collect();
            if sits_at_index(&ids, column_id, index) {
                return Ok(CommitOutcome::Unchanged);
            }
            state.model.set_column_position(column_id, position);
            state.columns_in_flight.insert(column_id, column);
        }
        tracing::debug!(%mutation, column_id, position, state = %MutationState::Applied, "optimistic column move applied");

        let result = tokio::time::timeout(
            self.settings.commit_timeout,
            self.store.move_container(column_id, position),
        )
        .await;

        let mut state = self.lock()?;
        let snapshot = state.columns_in_flight.remove(&column_id);
        let reason = match result {
            Ok(Ok(column)) => {
                state.model.restore_column(column.clone());
                tracing::info!(%mutation, column_id, state = %MutationState::Confirmed, "column move confirmed");
                return Ok(CommitOutcome::Confirmed(column));
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!(
                "no confirmation within {} ms",
                self.settings.commit_timeout.as_millis()
            ),
        };
        if let Some(snapshot) = snapshot {
            state.model.restore_column(snapshot);
        }
        tracing::warn!(%mutation, column_id, state = %MutationState::RolledBack, reason = %reason, "column move rolled back");
        Ok(CommitOutcome::RolledBack { reason })
    }

    // ── Renumbering ──

    /// Ask the store to respace `container` and take its result.
    pub async fn renumber(&self, container: ContainerRef) -> Result<Vec<Card>, EngineError> {
        let cards = self
            .store
            .renumber_container(container)
            .await
            .map_err(|source| EngineError::RenumberFailed { container, source })?;
        let mut state = self.lock()?;
        for card in &cards {
            state.reconcile_card(card.clone());
        }
        tracing::info!(%container, cards = cards.len(), "container renumbered");
        Ok(cards)
    }

    /// Renumber `container` first if its cards collide or sit closer than
    /// the configured threshold. Returns whether it did.
    async fn renumber_if_due(&self, container: ContainerRef) -> Result<bool, EngineError> {
        let due = {
            let state = self.lock()?;
            let positions: Vec<f64> = state
                .model
                .items_of(container)
                .iter()
                .map(|c| c.position)
                .collect();
            needs_renumber(positions, self.settings.renumber_threshold)
        };
        if due {
            self.renumber(container).await?;
        }
        Ok(due)
    }

    // ── Real-time ──

    /// Fold a card or column event from the real-time channel into the
    /// local model. Presence events are not handled here.
    pub fn apply_remote(&self, event: &RealtimeEvent) -> Result<bool, EngineError> {
        let mut state = self.lock()?;
        let board_id = state.model.board_id();
        match event {
            RealtimeEvent::CardMoved { card } if card.board_id == board_id => {
                state.reconcile_card(card.clone());
            }
            RealtimeEvent::ColumnMoved { column } if column.board_id == board_id => {
                state.reconcile_column(column.clone());
            }
            RealtimeEvent::ContainerRenumbered { cards, .. } => {
                for card in cards.iter().filter(|c| c.board_id == board_id) {
                    state.reconcile_card(card.clone());
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    // ── Selection and batches ──

    pub fn select(&self, card_id: i64) -> Result<(), EngineError> {
        self.lock()?.selection.select(card_id);
        Ok(())
    }

    pub fn toggle_selection(&self, card_id: i64) -> Result<bool, EngineError> {
        Ok(self.lock()?.selection.toggle(card_id))
    }

    pub fn deselect_all(&self) -> Result<(), EngineError> {
        self.lock()?.selection.clear();
        Ok(())
    }

    pub fn selected(&self) -> Result<Vec<i64>, EngineError> {
        Ok(self.lock()?.selection.ids().to_vec())
    }

    fn plan_batch(
        &self,
        state: &LocalState,
        ids: &[i64],
        destination: ContainerRef,
        base_index: i64,
    ) -> (Vec<(i64, RejectReason)>, Result<BatchPlan, RejectReason>) {
        let mut refused = Vec::new();
        let mut movable = Vec::new();
        for id in dedup_in_order(ids) {
            match self.precheck(state, id) {
                Some(reason) => refused.push((id, reason)),
                None => movable.push(id),
            }
        }
        let plan = sequence(
            &state.model,
            &movable,
            destination,
            base_index,
            self.settings.batch_order,
        );
        (refused, plan)
    }

    /// Per-card decisions for moving `ids` into `destination`.
    pub fn propose_batch_move(
        &self,
        ids: &[i64],
        destination: ContainerRef,
        base_index: i64,
    ) -> Result<Vec<(i64, MoveDecision)>, EngineError> {
        let state = self.lock()?;
        let (refused, plan) = self.plan_batch(&state, ids, destination, base_index);
        let mut decisions = Vec::with_capacity(ids.len());
        match plan {
            Ok(plan) => {
                decisions.extend(plan.moves.iter().map(|m| {
                    (
                        m.card_id,
                        MoveDecision::Admitted {
                            position: m.position,
                            wip_exceeded: plan.wip_exceeded,
                        },
                    )
                }));
                decisions.extend(
                    plan.skipped
                        .into_iter()
                        .map(|(id, reason)| (id, MoveDecision::rejected(reason))),
                );
            }
            Err(reason) => {
                let refused_ids: Vec<i64> = refused.iter().map(|(id, _)| *id).collect();
                decisions.extend(
                    dedup_in_order(ids)
                        .into_iter()
                        .filter(|id| !refused_ids.contains(id))
                        .map(|id| (id, MoveDecision::rejected(reason.clone()))),
                );
            }
        }
        decisions.extend(
            refused
                .into_iter()
                .map(|(id, reason)| (id, MoveDecision::rejected(reason))),
        );
        Ok(decisions)
    }

    /// Move `ids` into `destination` starting at `base_index`. Each card is
    /// committed on its own; one failure rolls back only that card.
    pub async fn commit_batch(
        &self,
        ids: &[i64],
        destination: ContainerRef,
        base_index: i64,
    ) -> Result<BatchOutcome, EngineError> {
        let (mut refused, mut planned) = {
            let state = self.lock()?;
            self.plan_batch(&state, ids, destination, base_index)
        };
        let renumbered = match &planned {
            Err(RejectReason::NeedsRenumber { container }) => {
                self.renumber(*container).await?;
                true
            }
            Ok(plan) if !plan.moves.is_empty() => self.renumber_if_due(destination).await?,
            _ => false,
        };
        if renumbered {
            (refused, planned) = {
                let state = self.lock()?;
                self.plan_batch(&state, ids, destination, base_index)
            };
            if let Err(RejectReason::NeedsRenumber { container }) = planned {
                return Err(EngineError::PrecisionExhausted {
                    container,
                    count: ids.len(),
                });
            }
        }

        let plan = match planned {
            Ok(plan) => plan,
            Err(reason) => {
                let refused_ids: Vec<i64> = refused.iter().map(|(id, _)| *id).collect();
                let mut items: Vec<(i64, CommitOutcome)> = dedup_in_order(ids)
                    .into_iter()
                    .filter(|id| !refused_ids.contains(id))
                    .map(|id| (id, CommitOutcome::Rejected(reason.clone())))
                    .collect();
                items.extend(
                    refused
                        .into_iter()
                        .map(|(id, r)| (id, CommitOutcome::Rejected(r))),
                );
                return Ok(BatchOutcome {
                    items,
                    ..BatchOutcome::default()
                });
            }
        };
        refused.extend(plan.skipped.iter().cloned());
        let refused = refused
            .into_iter()
            .map(|(id, r)| (id, CommitOutcome::Rejected(r)));

        if plan.wip_exceeded {
            let incoming = plan.moves.iter().map(|m| m.card_id).collect();
            if !self.consult_wip(destination.column_id, incoming)? {
                let mut items: Vec<(i64, CommitOutcome)> = plan
                    .moves
                    .iter()
                    .map(|m| (m.card_id, CommitOutcome::Declined))
                    .collect();
                items.extend(refused);
                return Ok(BatchOutcome {
                    items,
                    wip_exceeded: true,
                    dispatched: false,
                });
            }
        }

        tracing::info!(
            %destination,
            cards = plan.moves.len(),
            "dispatching batch move"
        );
        let results = join_all(
            plan.moves
                .iter()
                .map(|m| self.commit_position(m.card_id, m.destination, m.position)),
        )
        .await;

        let mut items = Vec::with_capacity(results.len());
        for (planned, result) in plan.moves.iter().zip(results) {
            items.push((planned.card_id, result?));
        }
        items.extend(refused);
        Ok(BatchOutcome {
            items,
            wip_exceeded: plan.wip_exceeded,
            dispatched: true,
        })
    }

    /// Move the current selection. The selection is cleared once the batch
    /// has been dispatched, whatever the per-card outcomes.
    pub async fn commit_selection(
        &self,
        destination: ContainerRef,
        base_index: i64,
    ) -> Result<BatchOutcome, EngineError> {
        let ids = self.selected()?;
        if ids.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let outcome = self.commit_batch(&ids, destination, base_index).await?;
        if outcome.dispatched {
            self.deselect_all()?;
        }
        Ok(outcome)
    }
}
