use chrono::{DateTime, Utc};
use sqlx::Row;
use trestle_models::{AvatarId, ContentUri, RemoteUserId};

use crate::{
    bool_from_any_row, datetime_from_millis, datetime_to_millis, json_from_db_text, DbError,
    DbPool,
};

/// Virtual homeserver user representing a remote-network account.
#[derive(Debug, Clone, Default)]
pub struct GhostRow {
    pub id: RemoteUserId,
    pub name: String,
    pub avatar_id: AvatarId,
    pub avatar_mxc: ContentUri,
    pub name_set: bool,
    pub avatar_set: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

const GHOST_COLUMNS: &str =
    "id, name, avatar_id, avatar_mxc, name_set, avatar_set, last_sync, metadata";

fn ghost_from_row(row: &sqlx::any::AnyRow) -> Result<GhostRow, sqlx::Error> {
    let last_sync: i64 = row.try_get("last_sync")?;
    Ok(GhostRow {
        id: RemoteUserId(row.try_get("id")?),
        name: row.try_get("name")?,
        avatar_id: AvatarId(row.try_get("avatar_id")?),
        avatar_mxc: ContentUri(row.try_get("avatar_mxc")?),
        name_set: bool_from_any_row(row, "name_set")?,
        avatar_set: bool_from_any_row(row, "avatar_set")?,
        last_sync: (last_sync != 0).then(|| datetime_from_millis(last_sync)),
        metadata: json_from_db_text(&row.try_get::<String, _>("metadata")?)?,
    })
}

pub async fn get_by_id(pool: &DbPool, id: &RemoteUserId) -> Result<Option<GhostRow>, DbError> {
    let row = sqlx::query(&format!("SELECT {GHOST_COLUMNS} FROM ghosts WHERE id = $1"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(ghost_from_row).transpose().map_err(Into::into)
}

pub async fn insert(pool: &DbPool, ghost: &GhostRow) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO ghosts (id, name, avatar_id, avatar_mxc, name_set, avatar_set, last_sync, metadata)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(ghost.id.as_str())
    .bind(ghost.name.as_str())
    .bind(ghost.avatar_id.as_str())
    .bind(ghost.avatar_mxc.as_str())
    .bind(ghost.name_set)
    .bind(ghost.avatar_set)
    .bind(ghost.last_sync.map(datetime_to_millis).unwrap_or(0))
    .bind(ghost.metadata.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update(pool: &DbPool, ghost: &GhostRow) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE ghosts SET name = $2, avatar_id = $3, avatar_mxc = $4, name_set = $5, \
         avatar_set = $6, last_sync = $7, metadata = $8
         WHERE id = $1",
    )
    .bind(ghost.id.as_str())
    .bind(ghost.name.as_str())
    .bind(ghost.avatar_id.as_str())
    .bind(ghost.avatar_mxc.as_str())
    .bind(ghost.name_set)
    .bind(ghost.avatar_set)
    .bind(ghost.last_sync.map(datetime_to_millis).unwrap_or(0))
    .bind(ghost.metadata.to_string())
    .execute(pool)
    .await?;
    Ok(())
}
