use chrono::{DateTime, Utc};
use sqlx::Row;
use trestle_models::{EmojiId, EventId, MessageId, PartId, PortalId, RemoteUserId};

use crate::{datetime_from_millis, datetime_to_millis, json_from_db_text, DbError, DbPool};

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub message_id: MessageId,
    pub part_id: PartId,
    pub sender_id: RemoteUserId,
    pub emoji_id: EmojiId,
    pub room_id: PortalId,
    pub mxid: EventId,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

const REACTION_COLUMNS: &str =
    "message_id, part_id, sender_id, emoji_id, room_id, mxid, timestamp, metadata";

fn reaction_from_row(row: &sqlx::any::AnyRow) -> Result<ReactionRow, sqlx::Error> {
    Ok(ReactionRow {
        message_id: MessageId(row.try_get("message_id")?),
        part_id: PartId(row.try_get("part_id")?),
        sender_id: RemoteUserId(row.try_get("sender_id")?),
        emoji_id: EmojiId(row.try_get("emoji_id")?),
        room_id: PortalId(row.try_get("room_id")?),
        mxid: EventId(row.try_get("mxid")?),
        timestamp: datetime_from_millis(row.try_get("timestamp")?),
        metadata: json_from_db_text(&row.try_get::<String, _>("metadata")?)?,
    })
}

/// One reaction per (message part, sender, emoji); re-reacting replaces
/// the stored event id.
pub async fn upsert(pool: &DbPool, reaction: &ReactionRow) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO reactions (message_id, part_id, sender_id, emoji_id, room_id, mxid, timestamp, metadata)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (message_id, part_id, sender_id, emoji_id)
         DO UPDATE SET mxid = excluded.mxid, timestamp = excluded.timestamp, metadata = excluded.metadata",
    )
    .bind(reaction.message_id.as_str())
    .bind(reaction.part_id.as_str())
    .bind(reaction.sender_id.as_str())
    .bind(reaction.emoji_id.as_str())
    .bind(reaction.room_id.as_str())
    .bind(reaction.mxid.as_str())
    .bind(datetime_to_millis(reaction.timestamp))
    .bind(reaction.metadata.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_by_id(
    pool: &DbPool,
    message_id: &MessageId,
    part_id: &PartId,
    sender_id: &RemoteUserId,
    emoji_id: &EmojiId,
) -> Result<Option<ReactionRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {REACTION_COLUMNS} FROM reactions
         WHERE message_id = $1 AND part_id = $2 AND sender_id = $3 AND emoji_id = $4"
    ))
    .bind(message_id.as_str())
    .bind(part_id.as_str())
    .bind(sender_id.as_str())
    .bind(emoji_id.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(reaction_from_row).transpose().map_err(Into::into)
}

pub async fn get_by_mxid(pool: &DbPool, mxid: &EventId) -> Result<Option<ReactionRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {REACTION_COLUMNS} FROM reactions WHERE mxid = $1"
    ))
    .bind(mxid.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(reaction_from_row).transpose().map_err(Into::into)
}

pub async fn delete(pool: &DbPool, reaction: &ReactionRow) -> Result<(), DbError> {
    sqlx::query(
        "DELETE FROM reactions
         WHERE message_id = $1 AND part_id = $2 AND sender_id = $3 AND emoji_id = $4",
    )
    .bind(reaction.message_id.as_str())
    .bind(reaction.part_id.as_str())
    .bind(reaction.sender_id.as_str())
    .bind(reaction.emoji_id.as_str())
    .execute(pool)
    .await?;
    Ok(())
}
