//! Offline board commands: `corkboard show` and `corkboard renumber`.
//!
//! Both open the SQLite file directly; run them while the server is
//! stopped or accept that connected clients only see the result on their
//! next refresh.

use std::path::Path;

use anyhow::Result;
use corkboard::board::models::ContainerRef;

use super::open_existing_db;

pub fn cmd_show(project_dir: &Path, db_path: Option<&Path>, board_id: i64, json: bool) -> Result<()> {
    let db = open_existing_db(project_dir, db_path)?;
    let view = db.board_view(board_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("{} (board {})", view.board.name, view.board.id);
    for column in &view.columns {
        let limit = match column.column.wip_limit {
            Some(limit) => format!("{}/{}", column.occupancy, limit),
            None => column.occupancy.to_string(),
        };
        let flag = if column.wip_exceeded { "  [over WIP]" } else { "" };
        println!(
            "  {} [{}] @{}{}",
            column.column.name, limit, column.column.position, flag
        );
        for card in &column.cards {
            let lane = card
                .lane_id
                .map(|id| format!(" lane {}", id))
                .unwrap_or_default();
            println!("    #{} {} @{}{}", card.id, card.title, card.position, lane);
        }
    }
    Ok(())
}

pub fn cmd_renumber(
    project_dir: &Path,
    db_path: Option<&Path>,
    column: Option<i64>,
    lane: Option<i64>,
    columns_of: Option<i64>,
) -> Result<()> {
    let db = open_existing_db(project_dir, db_path)?;

    if let Some(board_id) = columns_of {
        let columns = db.renumber_columns(board_id)?;
        tracing::info!(board_id, columns = columns.len(), "columns renumbered");
        println!("Renumbered {} columns of board {}", columns.len(), board_id);
        for column in &columns {
            println!("  {} @{}", column.name, column.position);
        }
        return Ok(());
    }

    let Some(column_id) = column else {
        anyhow::bail!("Specify --column <id> or --columns-of <board>");
    };
    let container = ContainerRef::new(column_id, lane);
    let cards = db.renumber_container(container)?;
    tracing::info!(%container, cards = cards.len(), "container renumbered");
    println!("Renumbered {} cards in {}", cards.len(), container);
    for card in &cards {
        println!("  #{} @{}", card.id, card.position);
    }
    Ok(())
}
