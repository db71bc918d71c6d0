use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;

use crate::board::models::{Board, BoardView, Card, Column, ContainerRef, Swimlane};
use crate::board::ws::WsMessage;
use crate::engine::events::RealtimeEvent;
use crate::engine::store::BoardStore;
use crate::errors::BoardError;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// `BoardStore` backed by the board server's REST API.
#[derive(Debug, Clone)]
pub struct HttpBoardStore {
    client: Client,
    base_url: String,
}

impl HttpBoardStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// WebSocket URL for `actor`, optionally scoped to one board's presence.
    pub fn ws_url(&self, actor: &str, board_id: Option<i64>) -> Result<String> {
        let base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let mut url = Url::parse(&format!("{}/ws", base))
            .with_context(|| format!("Invalid board server URL: {}", self.base_url))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("actor", actor);
            if let Some(id) = board_id {
                query.append_pair("board", &id.to_string());
            }
        }
        Ok(url.into())
    }

    pub async fn fetch_board_view(&self, board_id: i64) -> Result<BoardView> {
        let resp = self
            .client
            .get(self.url(&format!("/api/boards/{}/view", board_id)))
            .send()
            .await
            .context("Failed to send board view request")?;
        read_json(resp, "board view").await
    }

    pub async fn create_board(&self, name: &str) -> Result<Board> {
        let resp = self
            .client
            .post(self.url("/api/boards"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .context("Failed to send create board request")?;
        read_json(resp, "created board").await
    }

    pub async fn create_column(
        &self,
        board_id: i64,
        name: &str,
        wip_limit: Option<u32>,
    ) -> Result<Column> {
        let resp = self
            .client
            .post(self.url(&format!("/api/boards/{}/columns", board_id)))
            .json(&serde_json::json!({ "name": name, "wip_limit": wip_limit }))
            .send()
            .await
            .context("Failed to send create column request")?;
        read_json(resp, "created column").await
    }

    pub async fn create_lane(&self, board_id: i64, name: &str) -> Result<Swimlane> {
        let resp = self
            .client
            .post(self.url(&format!("/api/boards/{}/lanes", board_id)))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .context("Failed to send create lane request")?;
        read_json(resp, "created lane").await
    }

    pub async fn create_card(
        &self,
        board_id: i64,
        container: ContainerRef,
        title: &str,
    ) -> Result<Card> {
        let resp = self
            .client
            .post(self.url(&format!("/api/boards/{}/cards", board_id)))
            .json(&serde_json::json!({
                "title": title,
                "column_id": container.column_id,
                "lane_id": container.lane_id,
            }))
            .send()
            .await
            .context("Failed to send create card request")?;
        read_json(resp, "created card").await
    }
}

#[async_trait]
impl BoardStore for HttpBoardStore {
    async fn move_item(
        &self,
        card_id: i64,
        container: ContainerRef,
        position: f64,
    ) -> Result<Card> {
        let resp = self
            .client
            .patch(self.url(&format!("/api/cards/{}/move", card_id)))
            .json(&serde_json::json!({
                "column_id": container.column_id,
                "lane_id": container.lane_id,
                "position": position,
            }))
            .send()
            .await
            .context("Failed to send card move request")?;
        read_json(resp, "moved card").await
    }

    async fn move_container(&self, column_id: i64, position: f64) -> Result<Column> {
        let resp = self
            .client
            .patch(self.url(&format!("/api/columns/{}/move", column_id)))
            .json(&serde_json::json!({ "position": position }))
            .send()
            .await
            .context("Failed to send column move request")?;
        read_json(resp, "moved column").await
    }

    async fn renumber_container(&self, container: ContainerRef) -> Result<Vec<Card>> {
        let mut req = self
            .client
            .post(self.url(&format!("/api/columns/{}/renumber", container.column_id)));
        if let Some(lane_id) = container.lane_id {
            req = req.query(&[("lane_id", lane_id)]);
        }
        let resp = req
            .send()
            .await
            .context("Failed to send renumber request")?;
        read_json(resp, "renumbered cards").await
    }
}

/// Decode a success body, or turn the server's `{"error": ..}` body into an
/// error. Not-found and bad-request statuses become `BoardError`s so callers
/// can tell them apart from transport failures.
async fn read_json<T: serde::de::DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse {} response", what));
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
            Err(BoardError::BadRequest(message).into())
        }
        _ => anyhow::bail!("Board server returned {}: {}", status, message),
    }
}

/// Decode one WebSocket text frame into the event the engine consumes.
/// Frames the engine has no use for (creations, deletions, garbage) yield
/// `None`.
pub fn parse_event(text: &str) -> Option<RealtimeEvent> {
    match serde_json::from_str::<WsMessage>(text) {
        Ok(msg) => msg.into_realtime(),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring undecodable frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::ActorId;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = HttpBoardStore::new("http://localhost:3141/");
        assert_eq!(store.base_url(), "http://localhost:3141");
        assert_eq!(store.url("/health"), "http://localhost:3141/health");
    }

    #[test]
    fn test_ws_url_scheme() {
        let store = HttpBoardStore::new("http://localhost:3141");
        assert_eq!(
            store.ws_url("alice", Some(3)).unwrap(),
            "ws://localhost:3141/ws?actor=alice&board=3"
        );
        let secure = HttpBoardStore::new("https://boards.example.com");
        assert_eq!(
            secure.ws_url("bob", None).unwrap(),
            "wss://boards.example.com/ws?actor=bob"
        );
    }

    #[test]
    fn test_ws_url_encodes_actor() {
        let store = HttpBoardStore::new("http://localhost:3141");
        let url = store.ws_url("mallory&board=9 #x", Some(3)).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("actor".to_string(), "mallory&board=9 #x".to_string()),
                ("board".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(parsed.fragment(), None);
    }

    #[test]
    fn test_ws_url_rejects_garbage_base() {
        let store = HttpBoardStore::new("not a url");
        assert!(store.ws_url("alice", None).is_err());
    }

    #[test]
    fn test_parse_event_editing_started() {
        let text = r#"{"type":"EditingStarted","data":{"card_id":7,"actor":"bob"}}"#;
        assert_eq!(
            parse_event(text),
            Some(RealtimeEvent::ActorEditingStarted {
                card_id: 7,
                actor: ActorId::new("bob"),
            })
        );
    }

    #[test]
    fn test_parse_event_ignores_non_engine_frames() {
        assert_eq!(
            parse_event(r#"{"type":"CardDeleted","data":{"card_id":1}}"#),
            None
        );
        assert_eq!(parse_event("not json"), None);
        assert_eq!(parse_event(r#"{"type":"Unknown","data":{}}"#), None);
    }

    #[test]
    fn test_parse_event_round_trips_server_message() {
        let msg = WsMessage::ActorDisconnected {
            actor: ActorId::new("carol"),
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            parse_event(&text),
            Some(RealtimeEvent::ActorDisconnected {
                actor: ActorId::new("carol"),
            })
        );
    }
}
