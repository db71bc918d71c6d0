use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::db::DbHandle;
use super::models::ContainerRef;
use super::ws::{WsMessage, broadcast_message, ws_handler};
use crate::engine::presence::{PresenceLock, PresenceMap};
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    /// Who is editing what. Broadcast only; never consulted for moves.
    pub presence: PresenceMap,
    pub renumber_threshold: f64,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateBoardRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateColumnRequest {
    pub name: String,
    pub wip_limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct CreateLaneRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateCardRequest {
    pub title: String,
    pub column_id: i64,
    pub lane_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveCardRequest {
    pub column_id: i64,
    pub lane_id: Option<i64>,
    pub position: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveColumnRequest {
    pub position: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenumberQuery {
    pub lane_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SettingRequest {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CardLockResponse {
    pub card_id: i64,
    pub lock: Option<PresenceLock>,
}

#[derive(Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<BoardError>() {
            Some(e) if e.is_not_found() => ApiError::NotFound(e.to_string()),
            Some(
                e @ (BoardError::CrossBoardMove { .. }
                | BoardError::InvalidWipLimit { .. }
                | BoardError::InvalidPosition { .. }
                | BoardError::BadRequest(_)),
            ) => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/boards", get(list_boards).post(create_board))
        .route("/api/boards/{id}", get(get_board))
        .route("/api/boards/{id}/view", get(get_board_view))
        .route("/api/boards/{id}/columns", post(create_column))
        .route("/api/boards/{id}/lanes", post(create_lane))
        .route("/api/boards/{id}/cards", post(create_card))
        .route("/api/cards/{id}", get(get_card).delete(delete_card))
        .route("/api/cards/{id}/archive", post(archive_card))
        .route("/api/cards/{id}/move", patch(move_card))
        .route("/api/cards/{id}/lock", get(get_card_lock))
        .route("/api/columns/{id}/move", patch(move_column))
        .route("/api/columns/{id}/renumber", post(renumber_column))
        .route(
            "/api/settings/{key}",
            get(get_setting).put(put_setting).delete(delete_setting),
        )
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Respace `container` off the request path when a move has left its
/// cards too close together, and tell every client.
fn schedule_renumber_if_needed(state: &SharedState, container: ContainerRef) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let threshold = state.renumber_threshold;
        let result = state
            .db
            .call(move |db| {
                if db.container_needs_renumber(container, threshold)? {
                    db.renumber_container(container).map(Some)
                } else {
                    Ok(None)
                }
            })
            .await;
        match result {
            Ok(Some(cards)) => {
                tracing::info!(%container, cards = cards.len(), "container renumbered after move");
                broadcast_message(
                    &state.ws_tx,
                    &WsMessage::ContainerRenumbered { container, cards },
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%container, error = %e, "background renumber failed"),
        }
    });
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_boards(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let boards = state.db.call(move |db| db.list_boards()).await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Board name must not be empty".into()));
    }
    let board = state.db.call(move |db| db.create_board(&name)).await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::BoardCreated {
            board: board.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.get_board(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Board {} not found", id)))?;
    Ok(Json(board))
}

async fn get_board_view(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.db.call(move |db| db.board_view(id)).await?;
    Ok(Json(view))
}

async fn create_column(
    State(state): State<SharedState>,
    Path(board_id): Path<i64>,
    Json(req): Json<CreateColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state
        .db
        .call(move |db| db.create_column(board_id, &req.name, req.wip_limit))
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ColumnCreated {
            column: column.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(column)))
}

async fn create_lane(
    State(state): State<SharedState>,
    Path(board_id): Path<i64>,
    Json(req): Json<CreateLaneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let lane = state
        .db
        .call(move |db| db.create_lane(board_id, &req.name))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::LaneCreated { lane: lane.clone() });
    Ok((StatusCode::CREATED, Json(lane)))
}

async fn create_card(
    State(state): State<SharedState>,
    Path(board_id): Path<i64>,
    Json(req): Json<CreateCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let container = ContainerRef::new(req.column_id, req.lane_id);
    let card = state
        .db
        .call(move |db| db.create_card(board_id, container, &req.title))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::CardCreated { card: card.clone() });
    Ok((StatusCode::CREATED, Json(card)))
}

async fn get_card(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .call(move |db| db.get_card(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Card {} not found", id)))?;
    Ok(Json(card))
}

async fn delete_card(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.db.call(move |db| db.delete_card(id)).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Card {} not found", id)));
    }
    broadcast_message(&state.ws_tx, &WsMessage::CardDeleted { card_id: id });
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_card(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state.db.call(move |db| db.archive_card(id)).await?;
    broadcast_message(&state.ws_tx, &WsMessage::CardArchived { card: card.clone() });
    Ok(Json(card))
}

async fn move_card(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let container = ContainerRef::new(req.column_id, req.lane_id);
    let position = req.position;
    let card = state
        .db
        .call(move |db| db.move_card(id, container, position))
        .await?;
    tracing::debug!(card_id = id, %container, position, "card moved");
    broadcast_message(&state.ws_tx, &WsMessage::CardMoved { card: card.clone() });
    schedule_renumber_if_needed(&state, container);
    Ok(Json(card))
}

async fn get_card_lock(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(CardLockResponse {
        card_id: id,
        lock: state.presence.lock(id),
    }))
}

async fn move_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let position = req.position;
    let column = state
        .db
        .call(move |db| db.move_column(id, position))
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ColumnMoved {
            column: column.clone(),
        },
    );
    Ok(Json(column))
}

async fn renumber_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Query(query): Query<RenumberQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let container = ContainerRef::new(id, query.lane_id);
    let cards = state
        .db
        .call(move |db| db.renumber_container(container))
        .await?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ContainerRenumbered {
            container,
            cards: cards.clone(),
        },
    );
    Ok(Json(cards))
}

async fn get_setting(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = key.clone();
    let value = state
        .db
        .call(move |db| db.get_setting(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Setting '{}' not found", key)))?;
    Ok(Json(SettingResponse { key, value }))
}

async fn put_setting(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(req): Json<SettingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = key.clone();
    let value = req.value.clone();
    state
        .db
        .call(move |db| db.set_setting(&stored, &value))
        .await?;
    Ok(Json(SettingResponse {
        key,
        value: req.value,
    }))
}

async fn delete_setting(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = key.clone();
    let deleted = state.db.call(move |db| db.delete_setting(&lookup)).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Setting '{}' not found", key)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let db = BoardDb::new_in_memory().unwrap();
        let (ws_tx, _) = broadcast::channel(64);
        Arc::new(AppState {
            db: DbHandle::new(db),
            ws_tx,
            presence: PresenceMap::new(),
            renumber_threshold: 1e-9,
        })
    }

    fn test_app() -> Router {
        api_router().with_state(test_state())
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    /// Board 1 with columns 1 ("Todo") and 2 ("Doing", WIP 1) and one card in Todo.
    async fn seeded_app() -> Router {
        let app = test_app();
        for req in [
            json_request("POST", "/api/boards", serde_json::json!({"name": "Team"})),
            json_request("POST", "/api/boards/1/columns", serde_json::json!({"name": "Todo"})),
            json_request(
                "POST",
                "/api/boards/1/columns",
                serde_json::json!({"name": "Doing", "wip_limit": 1}),
            ),
            json_request(
                "POST",
                "/api/boards/1/cards",
                serde_json::json!({"title": "First", "column_id": 1}),
            ),
        ] {
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }
        app
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = test_app().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_list_boards_empty() {
        let response = test_app().oneshot(empty_request("GET", "/api/boards")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let boards: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(boards.is_empty());
    }

    #[tokio::test]
    async fn test_create_board_rejects_blank_name() {
        let response = test_app()
            .oneshot(json_request("POST", "/api/boards", serde_json::json!({"name": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_get_board_not_found() {
        let response = test_app().oneshot(empty_request("GET", "/api/boards/42")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_board_view_lists_columns_in_order() {
        let app = seeded_app().await;
        let response = app.oneshot(empty_request("GET", "/api/boards/1/view")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(view["board"]["name"], "Team");
        assert_eq!(view["columns"][0]["column"]["name"], "Todo");
        assert_eq!(view["columns"][0]["occupancy"], 1);
        assert_eq!(view["columns"][1]["column"]["wip_limit"], 1);
        assert_eq!(view["columns"][1]["wip_exceeded"], false);
    }

    #[tokio::test]
    async fn test_move_card_persists_and_broadcasts() {
        let state = test_state();
        let mut rx = state.ws_tx.subscribe();
        let app = api_router().with_state(Arc::clone(&state));
        for req in [
            json_request("POST", "/api/boards", serde_json::json!({"name": "Team"})),
            json_request("POST", "/api/boards/1/columns", serde_json::json!({"name": "Todo"})),
            json_request("POST", "/api/boards/1/columns", serde_json::json!({"name": "Doing"})),
            json_request(
                "POST",
                "/api/boards/1/cards",
                serde_json::json!({"title": "First", "column_id": 1}),
            ),
        ] {
            app.clone().oneshot(req).await.unwrap();
        }
        while rx.try_recv().is_ok() {}

        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/cards/1/move",
                serde_json::json!({"column_id": 2, "lane_id": null, "position": 1536.0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let card: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(card["column_id"], 2);
        assert_eq!(card["position"], 1536.0);

        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("\"type\":\"CardMoved\""));

        let response = app.oneshot(empty_request("GET", "/api/cards/1")).await.unwrap();
        let card: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(card["column_id"], 2);
    }

    #[tokio::test]
    async fn test_move_card_to_missing_column_is_not_found() {
        let app = seeded_app().await;
        let response = app
            .oneshot(json_request(
                "PATCH",
                "/api/cards/1/move",
                serde_json::json!({"column_id": 99, "position": 1.0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_move_card_across_boards_is_bad_request() {
        let app = seeded_app().await;
        app.clone()
            .oneshot(json_request("POST", "/api/boards", serde_json::json!({"name": "Other"})))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request("POST", "/api/boards/2/columns", serde_json::json!({"name": "X"})))
            .await
            .unwrap();
        let response = app
            .oneshot(json_request(
                "PATCH",
                "/api/cards/1/move",
                serde_json::json!({"column_id": 3, "position": 1.0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_column_with_zero_wip_is_bad_request() {
        let app = seeded_app().await;
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/boards/1/columns",
                serde_json::json!({"name": "Review", "wip_limit": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_archive_then_delete_card() {
        let app = seeded_app().await;
        let response = app
            .clone()
            .oneshot(empty_request("POST", "/api/cards/1/archive"))
            .await
            .unwrap();
        let card: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(card["archived"], true);

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", "/api/cards/1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.oneshot(empty_request("DELETE", "/api/cards/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_move_column_reorders_board() {
        let app = seeded_app().await;
        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/columns/2/move",
                serde_json::json!({"position": 512.0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(empty_request("GET", "/api/boards/1/view")).await.unwrap();
        let view: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(view["columns"][0]["column"]["name"], "Doing");
    }

    #[tokio::test]
    async fn test_renumber_column_returns_respaced_cards() {
        let app = seeded_app().await;
        app.clone()
            .oneshot(json_request(
                "PATCH",
                "/api/cards/1/move",
                serde_json::json!({"column_id": 1, "position": 0.25}),
            ))
            .await
            .unwrap();
        let response = app
            .oneshot(empty_request("POST", "/api/columns/1/renumber"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cards: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0]["position"], 1024.0);
    }

    #[tokio::test]
    async fn test_card_lock_reflects_presence() {
        let state = test_state();
        state.presence.acquire(1, crate::board::models::ActorId::new("bob"));
        let app = api_router().with_state(state);

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/api/cards/1/lock"))
            .await
            .unwrap();
        let lock: CardLockResponse = body_json(response.into_body()).await;
        assert_eq!(lock.lock.map(|l| l.actor.to_string()), Some("bob".to_string()));

        let response = app.oneshot(empty_request("GET", "/api/cards/2/lock")).await.unwrap();
        let lock: CardLockResponse = body_json(response.into_body()).await;
        assert!(lock.lock.is_none());
    }

    #[tokio::test]
    async fn test_settings_crud() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/settings/theme",
                serde_json::json!({"value": "dark"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/api/settings/theme"))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["value"], "dark");

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", "/api/settings/theme"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(empty_request("GET", "/api/settings/theme")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_board_errors_map_to_status() {
        let not_found: ApiError = anyhow::Error::from(BoardError::CardNotFound { id: 1 }).into();
        assert!(matches!(not_found, ApiError::NotFound(_)));
        let bad: ApiError = anyhow::Error::from(BoardError::InvalidPosition {
            position: f64::INFINITY,
        })
        .into();
        assert!(matches!(bad, ApiError::BadRequest(_)));
        let other: ApiError = anyhow::anyhow!("disk full").into();
        assert!(matches!(other, ApiError::Internal(_)));
    }
}
