use chrono::{DateTime, Utc};
use sqlx::Row;
use trestle_models::{EventId, MessageId, PartId, PortalId, RemoteUserId};

use crate::{datetime_from_millis, datetime_to_millis, json_from_db_text, DbError, DbPool};

/// One homeserver event belonging to a remote message. A remote message
/// that bridges into several events gets one row per part.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub row_id: i64,
    pub id: MessageId,
    pub part_id: PartId,
    pub mxid: EventId,
    pub room_id: PortalId,
    pub sender_id: RemoteUserId,
    pub timestamp: DateTime<Utc>,
    /// Row id of the reply target or thread root this message hangs off.
    pub relates_to: Option<i64>,
    pub metadata: serde_json::Value,
}

impl MessageRow {
    /// The homeserver user the bridged event was sent as. Stamped into
    /// metadata on insert; used for reply mentions.
    pub fn sender_mxid(&self) -> Option<&str> {
        self.metadata.get("sender_mxid").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub part_id: PartId,
    pub mxid: EventId,
    pub room_id: PortalId,
    pub sender_id: RemoteUserId,
    pub timestamp: DateTime<Utc>,
    pub relates_to: Option<i64>,
    pub metadata: serde_json::Value,
}

const MESSAGE_COLUMNS: &str =
    "row_id, id, part_id, mxid, room_id, sender_id, timestamp, relates_to, metadata";

fn message_from_row(row: &sqlx::any::AnyRow) -> Result<MessageRow, sqlx::Error> {
    Ok(MessageRow {
        row_id: row.try_get("row_id")?,
        id: MessageId(row.try_get("id")?),
        part_id: PartId(row.try_get("part_id")?),
        mxid: EventId(row.try_get("mxid")?),
        room_id: PortalId(row.try_get("room_id")?),
        sender_id: RemoteUserId(row.try_get("sender_id")?),
        timestamp: datetime_from_millis(row.try_get("timestamp")?),
        relates_to: row.try_get("relates_to")?,
        metadata: json_from_db_text(&row.try_get::<String, _>("metadata")?)?,
    })
}

pub async fn insert(pool: &DbPool, message: &NewMessage) -> Result<MessageRow, DbError> {
    let row = sqlx::query(&format!(
        "INSERT INTO messages (id, part_id, mxid, room_id, sender_id, timestamp, relates_to, metadata)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(message.id.as_str())
    .bind(message.part_id.as_str())
    .bind(message.mxid.as_str())
    .bind(message.room_id.as_str())
    .bind(message.sender_id.as_str())
    .bind(datetime_to_millis(message.timestamp))
    .bind(message.relates_to)
    .bind(message.metadata.to_string())
    .fetch_one(pool)
    .await?;
    Ok(message_from_row(&row)?)
}

pub async fn get_part_by_mxid(
    pool: &DbPool,
    mxid: &EventId,
) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE mxid = $1"
    ))
    .bind(mxid.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(message_from_row).transpose().map_err(Into::into)
}

pub async fn get_first_part_by_id(
    pool: &DbPool,
    room_id: &PortalId,
    id: &MessageId,
) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE room_id = $1 AND id = $2 ORDER BY row_id ASC LIMIT 1"
    ))
    .bind(room_id.as_str())
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(message_from_row).transpose().map_err(Into::into)
}

pub async fn get_part_by_id(
    pool: &DbPool,
    room_id: &PortalId,
    id: &MessageId,
    part_id: &PartId,
) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE room_id = $1 AND id = $2 AND part_id = $3"
    ))
    .bind(room_id.as_str())
    .bind(id.as_str())
    .bind(part_id.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(message_from_row).transpose().map_err(Into::into)
}

/// Resolves a remote message reference that may or may not name a
/// specific part.
pub async fn get_first_or_specific_part_by_id(
    pool: &DbPool,
    room_id: &PortalId,
    id: &MessageId,
    part_id: Option<&PartId>,
) -> Result<Option<MessageRow>, DbError> {
    match part_id {
        Some(part) => get_part_by_id(pool, room_id, id, part).await,
        None => get_first_part_by_id(pool, room_id, id).await,
    }
}

pub async fn get_all_parts_by_id(
    pool: &DbPool,
    room_id: &PortalId,
    id: &MessageId,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE room_id = $1 AND id = $2 ORDER BY row_id ASC"
    ))
    .bind(room_id.as_str())
    .bind(id.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(message_from_row).collect::<Result<_, _>>().map_err(Into::into)
}

pub async fn update_metadata(
    pool: &DbPool,
    row_id: i64,
    metadata: &serde_json::Value,
) -> Result<(), DbError> {
    sqlx::query("UPDATE messages SET metadata = $2 WHERE row_id = $1")
        .bind(row_id)
        .bind(metadata.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &DbPool, row_id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM messages WHERE row_id = $1")
        .bind(row_id)
        .execute(pool)
        .await?;
    Ok(())
}
