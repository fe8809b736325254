use sqlx::Row;
use trestle_models::{AvatarId, BridgeId, ContentUri, LoginId, PortalId, RoomId};

use crate::{bool_from_any_row, DbError, DbPool};

#[derive(Debug, Clone, Default)]
pub struct PortalRow {
    pub bridge_id: BridgeId,
    pub id: PortalId,
    pub mxid: Option<RoomId>,
    pub parent_id: Option<PortalId>,
    pub relay_login_id: Option<LoginId>,
    pub name: String,
    pub topic: String,
    pub avatar_id: AvatarId,
    pub avatar_mxc: ContentUri,
    pub avatar_hash: Option<[u8; 32]>,
    pub name_set: bool,
    pub topic_set: bool,
    pub avatar_set: bool,
}

const PORTAL_COLUMNS: &str = "bridge_id, id, mxid, parent_id, relay_login_id, name, topic, \
     avatar_id, avatar_mxc, avatar_hash, name_set, topic_set, avatar_set";

fn portal_from_row(row: &sqlx::any::AnyRow) -> Result<PortalRow, sqlx::Error> {
    let avatar_hash = row
        .try_get::<Option<Vec<u8>>, _>("avatar_hash")?
        .and_then(|raw| <[u8; 32]>::try_from(raw.as_slice()).ok());
    Ok(PortalRow {
        bridge_id: BridgeId(row.try_get("bridge_id")?),
        id: PortalId(row.try_get("id")?),
        mxid: row.try_get::<Option<String>, _>("mxid")?.map(RoomId),
        parent_id: row
            .try_get::<Option<String>, _>("parent_id")?
            .map(PortalId),
        relay_login_id: row
            .try_get::<Option<String>, _>("relay_login_id")?
            .map(LoginId),
        name: row.try_get("name")?,
        topic: row.try_get("topic")?,
        avatar_id: AvatarId(row.try_get("avatar_id")?),
        avatar_mxc: ContentUri(row.try_get("avatar_mxc")?),
        avatar_hash,
        name_set: bool_from_any_row(row, "name_set")?,
        topic_set: bool_from_any_row(row, "topic_set")?,
        avatar_set: bool_from_any_row(row, "avatar_set")?,
    })
}

pub async fn insert(pool: &DbPool, portal: &PortalRow) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO portals (bridge_id, id, mxid, parent_id, relay_login_id, name, topic, \
         avatar_id, avatar_mxc, avatar_hash, name_set, topic_set, avatar_set)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(portal.bridge_id.as_str())
    .bind(portal.id.as_str())
    .bind(portal.mxid.as_ref().map(RoomId::as_str))
    .bind(portal.parent_id.as_ref().map(PortalId::as_str))
    .bind(portal.relay_login_id.as_ref().map(LoginId::as_str))
    .bind(portal.name.as_str())
    .bind(portal.topic.as_str())
    .bind(portal.avatar_id.as_str())
    .bind(portal.avatar_mxc.as_str())
    .bind(portal.avatar_hash.as_ref().map(|hash| hash.to_vec()))
    .bind(portal.name_set)
    .bind(portal.topic_set)
    .bind(portal.avatar_set)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_by_id(
    pool: &DbPool,
    bridge_id: &BridgeId,
    id: &PortalId,
) -> Result<Option<PortalRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {PORTAL_COLUMNS} FROM portals WHERE bridge_id = $1 AND id = $2"
    ))
    .bind(bridge_id.as_str())
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(portal_from_row).transpose().map_err(Into::into)
}

pub async fn get_by_mxid(pool: &DbPool, mxid: &RoomId) -> Result<Option<PortalRow>, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {PORTAL_COLUMNS} FROM portals WHERE mxid = $1"
    ))
    .bind(mxid.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(portal_from_row).transpose().map_err(Into::into)
}

pub async fn update(pool: &DbPool, portal: &PortalRow) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE portals SET mxid = $3, parent_id = $4, relay_login_id = $5, name = $6, \
         topic = $7, avatar_id = $8, avatar_mxc = $9, avatar_hash = $10, name_set = $11, \
         topic_set = $12, avatar_set = $13
         WHERE bridge_id = $1 AND id = $2",
    )
    .bind(portal.bridge_id.as_str())
    .bind(portal.id.as_str())
    .bind(portal.mxid.as_ref().map(RoomId::as_str))
    .bind(portal.parent_id.as_ref().map(PortalId::as_str))
    .bind(portal.relay_login_id.as_ref().map(LoginId::as_str))
    .bind(portal.name.as_str())
    .bind(portal.topic.as_str())
    .bind(portal.avatar_id.as_str())
    .bind(portal.avatar_mxc.as_str())
    .bind(portal.avatar_hash.as_ref().map(|hash| hash.to_vec()))
    .bind(portal.name_set)
    .bind(portal.topic_set)
    .bind(portal.avatar_set)
    .execute(pool)
    .await?;
    Ok(())
}
