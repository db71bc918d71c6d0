use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::AppState;
use super::models::*;
use crate::engine::events::{PresenceScope, RealtimeEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

/// Server → client broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    BoardCreated {
        board: Board,
    },
    ColumnCreated {
        column: Column,
    },
    LaneCreated {
        lane: Swimlane,
    },
    CardCreated {
        card: Card,
    },
    CardMoved {
        card: Card,
    },
    CardArchived {
        card: Card,
    },
    CardDeleted {
        card_id: i64,
    },
    ColumnMoved {
        column: Column,
    },
    ContainerRenumbered {
        container: ContainerRef,
        cards: Vec<Card>,
    },
    EditingStarted {
        card_id: i64,
        actor: ActorId,
    },
    EditingEnded {
        card_id: i64,
        actor: ActorId,
    },
    Presence {
        scope: PresenceScope,
        actors: Vec<ActorId>,
    },
    ActorDisconnected {
        actor: ActorId,
    },
}

impl WsMessage {
    /// The engine-facing event carried by this message, if any.
    pub fn into_realtime(self) -> Option<RealtimeEvent> {
        match self {
            WsMessage::CardMoved { card } => Some(RealtimeEvent::CardMoved { card }),
            WsMessage::ColumnMoved { column } => Some(RealtimeEvent::ColumnMoved { column }),
            WsMessage::ContainerRenumbered { container, cards } => {
                Some(RealtimeEvent::ContainerRenumbered { container, cards })
            }
            WsMessage::EditingStarted { card_id, actor } => {
                Some(RealtimeEvent::ActorEditingStarted { card_id, actor })
            }
            WsMessage::EditingEnded { card_id, actor } => {
                Some(RealtimeEvent::ActorEditingEnded { card_id, actor })
            }
            WsMessage::Presence { scope, actors } => {
                Some(RealtimeEvent::ActorPresence { scope, actors })
            }
            WsMessage::ActorDisconnected { actor } => {
                Some(RealtimeEvent::ActorDisconnected { actor })
            }
            WsMessage::BoardCreated { .. }
            | WsMessage::ColumnCreated { .. }
            | WsMessage::LaneCreated { .. }
            | WsMessage::CardCreated { .. }
            | WsMessage::CardArchived { .. }
            | WsMessage::CardDeleted { .. } => None,
        }
    }
}

/// Client → server text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    EditingStarted { card_id: i64 },
    EditingEnded { card_id: i64 },
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub actor: String,
    pub board: Option<i64>,
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let actor = ActorId::new(query.actor);
    let scope = query.board.map(|board_id| PresenceScope::Board { board_id });
    ws.on_upgrade(move |socket| handle_socket(socket, state, actor, scope))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    actor: ActorId,
    scope: Option<PresenceScope>,
) {
    tracing::info!(actor = %actor, "websocket connected");
    let rx = state.ws_tx.subscribe();
    if let Some(scope) = scope {
        let actors = state.presence.join(scope, actor.clone());
        broadcast_message(&state.ws_tx, &WsMessage::Presence { scope, actors });
    }

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, &state, &actor).await;

    let released = state.presence.release_actor(&actor);
    tracing::info!(actor = %actor, released = released.len(), "websocket disconnected");
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ActorDisconnected {
            actor: actor.clone(),
        },
    );
    if let Some(scope) = scope {
        let actors = state.presence.actors_in(scope);
        broadcast_message(&state.ws_tx, &WsMessage::Presence { scope, actors });
    }
}

/// Apply one client frame to the presence map and fan it out.
fn handle_client_text(state: &AppState, actor: &ActorId, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(actor = %actor, error = %e, "ignoring unrecognised client frame");
            return;
        }
    };
    match msg {
        ClientMessage::EditingStarted { card_id } => {
            state.presence.acquire(card_id, actor.clone());
            broadcast_message(
                &state.ws_tx,
                &WsMessage::EditingStarted {
                    card_id,
                    actor: actor.clone(),
                },
            );
        }
        ClientMessage::EditingEnded { card_id } => {
            if state.presence.release(card_id, actor) {
                broadcast_message(
                    &state.ws_tx,
                    &WsMessage::EditingEnded {
                        card_id,
                        actor: actor.clone(),
                    },
                );
            }
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    state: &AppState,
    actor: &ActorId,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(actor = %actor, "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(actor = %actor, skipped, "websocket subscriber lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => handle_client_text(state, actor, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WsMessage");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::{BoardDb, DbHandle};
    use crate::engine::presence::PresenceMap;

    fn card() -> Card {
        Card {
            id: 3,
            board_id: 1,
            column_id: 2,
            lane_id: None,
            title: "Write release notes".to_string(),
            position: 1536.0,
            archived: false,
            updated_at: "2024-01-01 00:00:00".to_string(),
        }
    }

    fn state() -> (AppState, broadcast::Receiver<String>) {
        let (ws_tx, rx) = broadcast::channel(16);
        let state = AppState {
            db: DbHandle::new(BoardDb::new_in_memory().unwrap()),
            ws_tx,
            presence: PresenceMap::new(),
            renumber_threshold: 1e-9,
        };
        (state, rx)
    }

    #[test]
    fn test_card_moved_serialization() {
        let json = serde_json::to_string(&WsMessage::CardMoved { card: card() }).unwrap();
        assert!(json.contains("\"type\":\"CardMoved\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"position\":1536.0"));
    }

    #[test]
    fn test_ws_message_roundtrip_deserialization() {
        let msg = WsMessage::ContainerRenumbered {
            container: ContainerRef::new(2, Some(5)),
            cards: vec![card()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_into_realtime_maps_engine_events() {
        let moved = WsMessage::CardMoved { card: card() }.into_realtime();
        assert_eq!(moved, Some(RealtimeEvent::CardMoved { card: card() }));

        let started = WsMessage::EditingStarted {
            card_id: 3,
            actor: ActorId::new("alice"),
        }
        .into_realtime();
        assert_eq!(
            started,
            Some(RealtimeEvent::ActorEditingStarted {
                card_id: 3,
                actor: ActorId::new("alice"),
            })
        );

        assert_eq!(WsMessage::CardDeleted { card_id: 3 }.into_realtime(), None);
    }

    #[test]
    fn test_client_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"EditingStarted","data":{"card_id":9}}"#).unwrap();
        assert_eq!(msg, ClientMessage::EditingStarted { card_id: 9 });
    }

    #[tokio::test]
    async fn test_client_editing_frames_update_presence_and_broadcast() {
        let (state, mut rx) = state();
        let alice = ActorId::new("alice");
        let bob = ActorId::new("bob");

        handle_client_text(&state, &alice, r#"{"type":"EditingStarted","data":{"card_id":4}}"#);
        assert_eq!(state.presence.holder(4), Some(alice.clone()));
        assert!(rx.recv().await.unwrap().contains("EditingStarted"));

        // Only the holder's release is broadcast.
        handle_client_text(&state, &bob, r#"{"type":"EditingEnded","data":{"card_id":4}}"#);
        assert_eq!(state.presence.holder(4), Some(alice.clone()));
        handle_client_text(&state, &alice, r#"{"type":"EditingEnded","data":{"card_id":4}}"#);
        assert_eq!(state.presence.holder(4), None);
        assert!(rx.recv().await.unwrap().contains("EditingEnded"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_garbage_client_frame_is_ignored() {
        let (state, mut rx) = state();
        handle_client_text(&state, &ActorId::new("alice"), "not json");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_no_receivers_does_not_panic() {
        let (tx, _) = broadcast::channel::<String>(16);
        broadcast_message(&tx, &WsMessage::CardDeleted { card_id: 1 });
    }

    #[test]
    fn test_keepalive_constants() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
        assert_eq!(PING_INTERVAL, Duration::from_secs(30));
        assert_eq!(PONG_TIMEOUT, Duration::from_secs(60));
    }
}
