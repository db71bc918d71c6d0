//! End-to-end tests: a board server on a loopback port, clients committing
//! through `HttpBoardStore`, and the broadcast frames folded back into a
//! second client's model.

use std::sync::Arc;

use corkboard::board::api::SharedState;
use corkboard::board::db::BoardDb;
use corkboard::board::models::{ActorId, ContainerRef};
use corkboard::board::server::{build_state, run_server};
use corkboard::client::{HttpBoardStore, parse_event};
use corkboard::engine::allocator::DEFAULT_RENUMBER_THRESHOLD;
use corkboard::engine::{
    AlwaysDecline, BoardModel, CommitOutcome, MutationCoordinator, PresenceMap, RealtimeEvent,
};
use tokio::net::TcpListener;

const TODO: i64 = 1;
const DOING: i64 = 2;
const DONE: i64 = 3;

/// Board 1: Todo (cards a, b), Doing (WIP 1, card c), Done (empty).
fn seeded_db() -> BoardDb {
    let db = BoardDb::new_in_memory().unwrap();
    let board = db.create_board("Team").unwrap();
    db.create_column(board.id, "Todo", None).unwrap();
    db.create_column(board.id, "Doing", Some(1)).unwrap();
    db.create_column(board.id, "Done", None).unwrap();
    db.create_card(board.id, ContainerRef::column(TODO), "a").unwrap();
    db.create_card(board.id, ContainerRef::column(TODO), "b").unwrap();
    db.create_card(board.id, ContainerRef::column(DOING), "c").unwrap();
    db
}

async fn spawn_server(db: BoardDb) -> (SharedState, HttpBoardStore) {
    let state = build_state(db, DEFAULT_RENUMBER_THRESHOLD);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_server(
        listener,
        Arc::clone(&state),
        false,
        std::future::pending(),
    ));
    (state, HttpBoardStore::new(format!("http://{}", addr)))
}

async fn client(store: &HttpBoardStore, actor: &str) -> MutationCoordinator<HttpBoardStore> {
    let view = store.fetch_board_view(1).await.unwrap();
    MutationCoordinator::new(
        BoardModel::from_view(&view),
        Arc::new(store.clone()),
        PresenceMap::new(),
        ActorId::new(actor),
    )
}

async fn titles_in(store: &HttpBoardStore, column_id: i64) -> Vec<String> {
    let view = store.fetch_board_view(1).await.unwrap();
    view.columns
        .into_iter()
        .find(|c| c.column.id == column_id)
        .map(|c| c.cards.into_iter().map(|card| card.title).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_move_is_persisted_and_reaches_other_clients() {
    let (state, store) = spawn_server(seeded_db()).await;
    let alice = client(&store, "alice").await;
    let bob = client(&store, "bob").await;
    let mut frames = state.ws_tx.subscribe();

    let outcome = alice.commit_move(1, ContainerRef::column(DONE), 0).await.unwrap();
    let CommitOutcome::Confirmed(card) = outcome else {
        panic!("expected confirmation, got {:?}", outcome);
    };
    assert_eq!(card.column_id, DONE);
    assert_eq!(titles_in(&store, DONE).await, vec!["a"]);

    let mut applied = false;
    while let Ok(text) = frames.try_recv() {
        if let Some(event @ RealtimeEvent::CardMoved { .. }) = parse_event(&text) {
            applied |= bob.apply_remote(&event).unwrap();
        }
    }
    assert!(applied);
    assert_eq!(bob.card(1).unwrap().unwrap().column_id, DONE);
}

#[tokio::test]
async fn test_wip_decline_leaves_server_untouched() {
    let (_state, store) = spawn_server(seeded_db()).await;
    let alice = client(&store, "alice").await.with_wip_policy(AlwaysDecline);

    let outcome = alice.commit_move(1, ContainerRef::column(DOING), 0).await.unwrap();
    assert_eq!(outcome, CommitOutcome::Declined);
    assert_eq!(titles_in(&store, DOING).await, vec!["c"]);
    assert_eq!(alice.card(1).unwrap().unwrap().column_id, TODO);
}

#[tokio::test]
async fn test_wip_overflow_proceeds_by_default() {
    let (_state, store) = spawn_server(seeded_db()).await;
    let alice = client(&store, "alice").await;

    let outcome = alice.commit_move(1, ContainerRef::column(DOING), 0).await.unwrap();
    assert!(outcome.is_confirmed());

    let view = store.fetch_board_view(1).await.unwrap();
    let doing = view.columns.iter().find(|c| c.column.id == DOING).unwrap();
    assert_eq!(doing.occupancy, 2);
    assert!(doing.wip_exceeded);
}

#[tokio::test]
async fn test_store_rejection_rolls_back_local_move() {
    let (_state, store) = spawn_server(seeded_db()).await;
    let alice = client(&store, "alice").await;
    let before = alice.card(2).unwrap().unwrap();

    let resp = reqwest::Client::new()
        .delete(format!("{}/api/cards/2", store.base_url()))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let outcome = alice.commit_move(2, ContainerRef::column(DONE), 0).await.unwrap();
    assert!(outcome.is_rolled_back(), "got {:?}", outcome);
    assert_eq!(alice.card(2).unwrap().unwrap(), before);
    assert!(alice.in_flight().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_selection_lands_in_order() {
    let (_state, store) = spawn_server(seeded_db()).await;
    let alice = client(&store, "alice").await;

    alice.toggle_selection(2).unwrap();
    alice.toggle_selection(1).unwrap();
    let outcome = alice
        .commit_selection(ContainerRef::column(DONE), 0)
        .await
        .unwrap();

    assert!(outcome.dispatched);
    let mut confirmed = outcome.confirmed();
    confirmed.sort();
    assert_eq!(confirmed, vec![1, 2]);
    // Default order is board position, not selection order.
    assert_eq!(titles_in(&store, DONE).await, vec!["a", "b"]);
    assert!(alice.selected().unwrap().is_empty());
}

#[tokio::test]
async fn test_collided_destination_is_renumbered_before_move() {
    let db = seeded_db();
    db.move_card(1, ContainerRef::column(TODO), 5.0).unwrap();
    db.move_card(2, ContainerRef::column(TODO), 5.0).unwrap();
    let (_state, store) = spawn_server(db).await;
    let alice = client(&store, "alice").await;

    let outcome = alice.commit_move(3, ContainerRef::column(TODO), 1).await.unwrap();
    let CommitOutcome::Confirmed(card) = outcome else {
        panic!("expected confirmation, got {:?}", outcome);
    };
    assert_eq!(card.position, 1536.0);
    assert_eq!(titles_in(&store, TODO).await, vec!["a", "c", "b"]);
}

#[tokio::test]
async fn test_column_reorder_round_trip() {
    let (_state, store) = spawn_server(seeded_db()).await;
    let alice = client(&store, "alice").await;

    let outcome = alice.commit_column_move(DONE, 0).await.unwrap();
    assert!(outcome.is_confirmed());

    let view = store.fetch_board_view(1).await.unwrap();
    let order: Vec<i64> = view.columns.iter().map(|c| c.column.id).collect();
    assert_eq!(order, vec![DONE, TODO, DOING]);
}
