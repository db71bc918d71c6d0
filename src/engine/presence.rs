//! Advisory "who is editing what" signal.
//!
//! A lock here never blocks the actor holding it, and the store never
//! consults it: it only lets the board refuse to start a drag or edit on a
//! card somebody else has open. Entries have no expiry; they go away when
//! the holder releases them or disconnects.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::models::ActorId;
use crate::engine::events::{PresenceScope, RealtimeEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceLock {
    pub actor: ActorId,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PresenceState {
    locks: HashMap<i64, PresenceLock>,
    rosters: HashMap<PresenceScope, BTreeSet<ActorId>>,
}

/// Shared, cloneable handle to the presence state.
#[derive(Debug, Clone, Default)]
pub struct PresenceMap {
    inner: Arc<RwLock<PresenceState>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a writer panicked mid-update of advisory
    // data; the map stays usable.
    fn read(&self) -> RwLockReadGuard<'_, PresenceState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PresenceState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one real-time event. Returns false for events that are not
    /// about presence.
    pub fn apply(&self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::ActorEditingStarted { card_id, actor } => {
                self.acquire(*card_id, actor.clone());
            }
            RealtimeEvent::ActorEditingEnded { card_id, actor } => {
                self.release(*card_id, actor);
            }
            RealtimeEvent::ActorPresence { scope, actors } => {
                self.set_roster(*scope, actors.iter().cloned());
            }
            RealtimeEvent::ActorDisconnected { actor } => {
                self.release_actor(actor);
            }
            _ => return false,
        }
        true
    }

    /// Mark `card_id` as being edited by `actor`. The latest editor wins.
    pub fn acquire(&self, card_id: i64, actor: ActorId) {
        tracing::debug!(card_id, actor = %actor, "editing lock acquired");
        self.write().locks.insert(
            card_id,
            PresenceLock {
                actor,
                since: Utc::now(),
            },
        );
    }

    /// Release `card_id` if `actor` holds it. Returns whether it was held.
    pub fn release(&self, card_id: i64, actor: &ActorId) -> bool {
        let mut state = self.write();
        let held = state
            .locks
            .get(&card_id)
            .is_some_and(|lock| &lock.actor == actor);
        if held {
            state.locks.remove(&card_id);
            tracing::debug!(card_id, actor = %actor, "editing lock released");
        }
        held
    }

    /// Drop every lock and roster entry of a disconnected actor. Returns
    /// the cards that were released.
    pub fn release_actor(&self, actor: &ActorId) -> Vec<i64> {
        let mut state = self.write();
        let mut released: Vec<i64> = state
            .locks
            .iter()
            .filter(|(_, lock)| &lock.actor == actor)
            .map(|(id, _)| *id)
            .collect();
        released.sort_unstable();
        for id in &released {
            state.locks.remove(id);
        }
        for roster in state.rosters.values_mut() {
            roster.remove(actor);
        }
        state.rosters.retain(|_, roster| !roster.is_empty());
        released
    }

    /// True only when someone other than `acting` holds the card.
    pub fn is_locked(&self, card_id: i64, acting: &ActorId) -> bool {
        self.read()
            .locks
            .get(&card_id)
            .is_some_and(|lock| &lock.actor != acting)
    }

    pub fn holder(&self, card_id: i64) -> Option<ActorId> {
        self.read().locks.get(&card_id).map(|l| l.actor.clone())
    }

    pub fn lock(&self, card_id: i64) -> Option<PresenceLock> {
        self.read().locks.get(&card_id).cloned()
    }

    pub fn locks_held_by(&self, actor: &ActorId) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .read()
            .locks
            .iter()
            .filter(|(_, lock)| &lock.actor == actor)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Replace the roster of `scope` wholesale.
    pub fn set_roster(&self, scope: PresenceScope, actors: impl IntoIterator<Item = ActorId>) {
        let roster: BTreeSet<ActorId> = actors.into_iter().collect();
        let mut state = self.write();
        if roster.is_empty() {
            state.rosters.remove(&scope);
        } else {
            state.rosters.insert(scope, roster);
        }
    }

    /// Add `actor` to `scope` and return the updated roster.
    pub fn join(&self, scope: PresenceScope, actor: ActorId) -> Vec<ActorId> {
        let mut state = self.write();
        let roster = state.rosters.entry(scope).or_default();
        roster.insert(actor);
        roster.iter().cloned().collect()
    }

    /// Remove `actor` from `scope` and return what remains.
    pub fn leave(&self, scope: PresenceScope, actor: &ActorId) -> Vec<ActorId> {
        let mut state = self.write();
        let Some(roster) = state.rosters.get_mut(&scope) else {
            return Vec::new();
        };
        roster.remove(actor);
        let remaining: Vec<ActorId> = roster.iter().cloned().collect();
        if remaining.is_empty() {
            state.rosters.remove(&scope);
        }
        remaining
    }

    pub fn actors_in(&self, scope: PresenceScope) -> Vec<ActorId> {
        self.read()
            .rosters
            .get(&scope)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}
