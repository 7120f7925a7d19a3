use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::db_types::{Actor, HistoryEntity, Metadata, StatusHistory};

/// Appends one status change to the history journal. Always called inside the transaction that made the change.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn record(
    entity: HistoryEntity,
    entity_id: i64,
    from_status: Option<&str>,
    to_status: &str,
    actor: &Actor,
    reason: Option<&str>,
    metadata: &Metadata,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<StatusHistory, sqlx::Error> {
    let row: StatusHistory = sqlx::query_as(
        r#"
        INSERT INTO status_history (entity_type, entity_id, from_status, to_status, actor, reason, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(entity)
    .bind(entity_id)
    .bind(from_status)
    .bind(to_status)
    .bind(actor.as_str())
    .bind(reason)
    .bind(metadata.to_json_string())
    .bind(now)
    .fetch_one(conn)
    .await?;
    trace!("🗃️ History: {entity} #{entity_id} {} -> {to_status} by {actor}", from_status.unwrap_or("∅"));
    Ok(row)
}

pub async fn fetch_history(
    entity: HistoryEntity,
    entity_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StatusHistory>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM status_history WHERE entity_type = $1 AND entity_id = $2 ORDER BY id")
        .bind(entity)
        .bind(entity_id)
        .fetch_all(conn)
        .await
}
