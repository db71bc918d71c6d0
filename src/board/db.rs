use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::engine::allocator::{append_position, needs_renumber, renumber};
use crate::engine::store::BoardStore;
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

#[async_trait]
impl BoardStore for DbHandle {
    async fn move_item(
        &self,
        card_id: i64,
        container: ContainerRef,
        position: f64,
    ) -> Result<Card> {
        self.call(move |db| db.move_card(card_id, container, position))
            .await
    }

    async fn move_container(&self, column_id: i64, position: f64) -> Result<Column> {
        self.call(move |db| db.move_column(column_id, position)).await
    }

    async fn renumber_container(&self, container: ContainerRef) -> Result<Vec<Card>> {
        self.call(move |db| db.renumber_container(container)).await
    }
}

const CARD_FIELDS: &str = "id, board_id, column_id, lane_id, title, position, archived, updated_at";
const COLUMN_FIELDS: &str = "id, board_id, name, position, wip_limit";
const LANE_FIELDS: &str = "id, board_id, name, position";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        board_id: row.get(1)?,
        column_id: row.get(2)?,
        lane_id: row.get(3)?,
        title: row.get(4)?,
        position: row.get(5)?,
        archived: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        wip_limit: row.get(4)?,
    })
}

fn lane_from_row(row: &Row<'_>) -> rusqlite::Result<Swimlane> {
    Ok(Swimlane {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
    })
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS boards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS board_columns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    position REAL NOT NULL,
                    wip_limit INTEGER
                );

                CREATE TABLE IF NOT EXISTS swimlanes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    position REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS cards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    column_id INTEGER NOT NULL REFERENCES board_columns(id) ON DELETE CASCADE,
                    lane_id INTEGER REFERENCES swimlanes(id) ON DELETE SET NULL,
                    title TEXT NOT NULL,
                    position REAL NOT NULL,
                    archived INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_columns_board ON board_columns(board_id, position);
                CREATE INDEX IF NOT EXISTS idx_lanes_board ON swimlanes(board_id, position);
                CREATE INDEX IF NOT EXISTS idx_cards_container ON cards(column_id, lane_id, position);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(&self, name: &str) -> Result<Board> {
        self.conn
            .execute("INSERT INTO boards (name) VALUES (?1)", params![name])
            .context("Failed to insert board")?;
        let id = self.conn.last_insert_rowid();
        self.get_board(id)?.context("Board not found after insert")
    }

    pub fn list_boards(&self) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM boards ORDER BY id")
            .context("Failed to prepare list_boards")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Board {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            boards.push(row.context("Failed to read board row")?);
        }
        Ok(boards)
    }

    pub fn get_board(&self, id: i64) -> Result<Option<Board>> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM boards WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Board {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query board")
    }

    fn require_board(&self, id: i64) -> Result<Board> {
        self.get_board(id)?
            .ok_or_else(|| BoardError::BoardNotFound { id }.into())
    }

    // ── Columns ───────────────────────────────────────────────────────

    /// Append a column to the right end of the board.
    pub fn create_column(&self, board_id: i64, name: &str, wip_limit: Option<u32>) -> Result<Column> {
        self.require_board(board_id)?;
        if let Some(limit) = wip_limit
            && limit == 0
        {
            return Err(BoardError::InvalidWipLimit { limit }.into());
        }
        let last: Option<f64> = self
            .conn
            .query_row(
                "SELECT MAX(position) FROM board_columns WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )
            .context("Failed to get max column position")?;
        self.conn
            .execute(
                "INSERT INTO board_columns (board_id, name, position, wip_limit) VALUES (?1, ?2, ?3, ?4)",
                params![board_id, name, append_position(last), wip_limit],
            )
            .context("Failed to insert column")?;
        let id = self.conn.last_insert_rowid();
        self.get_column(id)?.context("Column not found after insert")
    }

    pub fn get_column(&self, id: i64) -> Result<Option<Column>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM board_columns WHERE id = ?1", COLUMN_FIELDS),
                params![id],
                column_from_row,
            )
            .optional()
            .context("Failed to query column")
    }

    pub fn list_columns(&self, board_id: i64) -> Result<Vec<Column>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM board_columns WHERE board_id = ?1 ORDER BY position, id",
                COLUMN_FIELDS
            ))
            .context("Failed to prepare list_columns")?;
        let rows = stmt
            .query_map(params![board_id], column_from_row)
            .context("Failed to query columns")?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.context("Failed to read column row")?);
        }
        Ok(columns)
    }

    pub fn move_column(&self, id: i64, position: f64) -> Result<Column> {
        if !position.is_finite() {
            return Err(BoardError::InvalidPosition { position }.into());
        }
        let changed = self
            .conn
            .execute(
                "UPDATE board_columns SET position = ?1 WHERE id = ?2",
                params![position, id],
            )
            .context("Failed to move column")?;
        if changed == 0 {
            return Err(BoardError::ColumnNotFound { id }.into());
        }
        self.get_column(id)?.context("Column not found after move")
    }

    /// Respace the columns of a board to `1024, 2048, ...` in their current order.
    pub fn renumber_columns(&self, board_id: i64) -> Result<Vec<Column>> {
        self.require_board(board_id)?;
        let ids: Vec<i64> = self.list_columns(board_id)?.iter().map(|c| c.id).collect();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin column renumber")?;
        for (id, position) in renumber(&ids) {
            tx.execute(
                "UPDATE board_columns SET position = ?1 WHERE id = ?2",
                params![position, id],
            )
            .context("Failed to renumber column")?;
        }
        tx.commit().context("Failed to commit column renumber")?;
        self.list_columns(board_id)
    }

    // ── Swimlanes ─────────────────────────────────────────────────────

    pub fn create_lane(&self, board_id: i64, name: &str) -> Result<Swimlane> {
        self.require_board(board_id)?;
        let last: Option<f64> = self
            .conn
            .query_row(
                "SELECT MAX(position) FROM swimlanes WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )
            .context("Failed to get max lane position")?;
        self.conn
            .execute(
                "INSERT INTO swimlanes (board_id, name, position) VALUES (?1, ?2, ?3)",
                params![board_id, name, append_position(last)],
            )
            .context("Failed to insert swimlane")?;
        let id = self.conn.last_insert_rowid();
        self.get_lane(id)?.context("Swimlane not found after insert")
    }

    pub fn get_lane(&self, id: i64) -> Result<Option<Swimlane>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM swimlanes WHERE id = ?1", LANE_FIELDS),
                params![id],
                lane_from_row,
            )
            .optional()
            .context("Failed to query swimlane")
    }

    pub fn list_lanes(&self, board_id: i64) -> Result<Vec<Swimlane>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM swimlanes WHERE board_id = ?1 ORDER BY position, id",
                LANE_FIELDS
            ))
            .context("Failed to prepare list_lanes")?;
        let rows = stmt
            .query_map(params![board_id], lane_from_row)
            .context("Failed to query swimlanes")?;
        let mut lanes = Vec::new();
        for row in rows {
            lanes.push(row.context("Failed to read swimlane row")?);
        }
        Ok(lanes)
    }

    // ── Cards ─────────────────────────────────────────────────────────

    /// Check that `container` exists and lies on `board_id`.
    fn check_container(&self, board_id: i64, container: ContainerRef) -> Result<()> {
        let column = self
            .get_column(container.column_id)?
            .ok_or(BoardError::ColumnNotFound {
                id: container.column_id,
            })?;
        if column.board_id != board_id {
            return Err(BoardError::CrossBoardMove {
                board_id,
                column_id: column.id,
            }
            .into());
        }
        if let Some(lane_id) = container.lane_id {
            let lane = self
                .get_lane(lane_id)?
                .ok_or(BoardError::LaneNotFound { id: lane_id })?;
            if lane.board_id != board_id {
                return Err(BoardError::LaneNotFound { id: lane_id }.into());
            }
        }
        Ok(())
    }

    /// Append a card to the end of `container`.
    pub fn create_card(&self, board_id: i64, container: ContainerRef, title: &str) -> Result<Card> {
        self.require_board(board_id)?;
        self.check_container(board_id, container)?;
        let last: Option<f64> = self
            .conn
            .query_row(
                "SELECT MAX(position) FROM cards
                 WHERE column_id = ?1 AND lane_id IS ?2 AND archived = 0",
                params![container.column_id, container.lane_id],
                |row| row.get(0),
            )
            .context("Failed to get max card position")?;
        self.conn
            .execute(
                "INSERT INTO cards (board_id, column_id, lane_id, title, position) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    board_id,
                    container.column_id,
                    container.lane_id,
                    title,
                    append_position(last)
                ],
            )
            .context("Failed to insert card")?;
        let id = self.conn.last_insert_rowid();
        self.get_card(id)?.context("Card not found after insert")
    }

    pub fn get_card(&self, id: i64) -> Result<Option<Card>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM cards WHERE id = ?1", CARD_FIELDS),
                params![id],
                card_from_row,
            )
            .optional()
            .context("Failed to query card")
    }

    fn require_card(&self, id: i64) -> Result<Card> {
        self.get_card(id)?
            .ok_or_else(|| BoardError::CardNotFound { id }.into())
    }

    /// Non-archived cards of `container`, ascending by position.
    pub fn container_cards(&self, container: ContainerRef) -> Result<Vec<Card>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM cards
                 WHERE column_id = ?1 AND lane_id IS ?2 AND archived = 0
                 ORDER BY position, id",
                CARD_FIELDS
            ))
            .context("Failed to prepare container_cards")?;
        let rows = stmt
            .query_map(params![container.column_id, container.lane_id], card_from_row)
            .context("Failed to query container cards")?;
        let mut cards = Vec::new();
        for row in rows {
            cards.push(row.context("Failed to read card row")?);
        }
        Ok(cards)
    }

    /// Non-archived cards of a column across every lane, ordered by lane
    /// (unlaned first) and then position.
    fn column_cards(&self, column_id: i64) -> Result<Vec<Card>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.board_id, c.column_id, c.lane_id, c.title, c.position, c.archived, c.updated_at
                 FROM cards c LEFT JOIN swimlanes l ON l.id = c.lane_id
                 WHERE c.column_id = ?1 AND c.archived = 0
                 ORDER BY c.lane_id IS NOT NULL, l.position, c.lane_id, c.position, c.id",
            )
            .context("Failed to prepare column_cards")?;
        let rows = stmt
            .query_map(params![column_id], card_from_row)
            .context("Failed to query column cards")?;
        let mut cards = Vec::new();
        for row in rows {
            cards.push(row.context("Failed to read card row")?);
        }
        Ok(cards)
    }

    /// Relocate a card. Last write wins; the position is taken as given.
    pub fn move_card(&self, id: i64, container: ContainerRef, position: f64) -> Result<Card> {
        if !position.is_finite() {
            return Err(BoardError::InvalidPosition { position }.into());
        }
        let card = self.require_card(id)?;
        self.check_container(card.board_id, container)?;
        self.conn
            .execute(
                "UPDATE cards SET column_id = ?1, lane_id = ?2, position = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![container.column_id, container.lane_id, position, id],
            )
            .context("Failed to move card")?;
        self.get_card(id)?.context("Card not found after move")
    }

    pub fn archive_card(&self, id: i64) -> Result<Card> {
        self.require_card(id)?;
        self.conn
            .execute(
                "UPDATE cards SET archived = 1, updated_at = datetime('now') WHERE id = ?1",
                params![id],
            )
            .context("Failed to archive card")?;
        self.get_card(id)?.context("Card not found after archive")
    }

    pub fn delete_card(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM cards WHERE id = ?1", params![id])
            .context("Failed to delete card")?;
        Ok(deleted > 0)
    }

    /// True when adjacent cards of `container` collide or sit closer than
    /// `threshold`.
    pub fn container_needs_renumber(&self, container: ContainerRef, threshold: f64) -> Result<bool> {
        let cards = self.container_cards(container)?;
        Ok(needs_renumber(cards.iter().map(|c| c.position), threshold))
    }

    /// Respace `container` to `1024, 2048, ...` keeping the current order.
    pub fn renumber_container(&self, container: ContainerRef) -> Result<Vec<Card>> {
        if self.get_column(container.column_id)?.is_none() {
            return Err(BoardError::ColumnNotFound {
                id: container.column_id,
            }
            .into());
        }
        let ids: Vec<i64> = self
            .container_cards(container)?
            .iter()
            .map(|c| c.id)
            .collect();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin renumber")?;
        for (id, position) in renumber(&ids) {
            tx.execute(
                "UPDATE cards SET position = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![position, id],
            )
            .context("Failed to renumber card")?;
        }
        tx.commit().context("Failed to commit renumber")?;
        self.container_cards(container)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn board_view(&self, board_id: i64) -> Result<BoardView> {
        let board = self.require_board(board_id)?;
        let lanes = self.list_lanes(board_id)?;
        let mut columns = Vec::new();
        for column in self.list_columns(board_id)? {
            let cards = self.column_cards(column.id)?;
            let occupancy = cards.len();
            let wip_exceeded = column
                .wip_limit
                .is_some_and(|limit| occupancy > limit as usize);
            columns.push(ColumnView {
                column,
                occupancy,
                wip_exceeded,
                cards,
            });
        }
        Ok(BoardView {
            board,
            lanes,
            columns,
        })
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to query setting")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .context("Failed to upsert setting")?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .context("Failed to delete setting")?;
        Ok(deleted > 0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
