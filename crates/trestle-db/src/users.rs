use sqlx::Row;
use trestle_models::{LoginId, PortalId, UserId};

use crate::{DbError, DbPool};

#[derive(Debug, Clone)]
pub struct UserLoginRow {
    pub id: LoginId,
    pub user_mxid: UserId,
    pub remote_name: String,
}

fn login_from_row(row: &sqlx::any::AnyRow) -> Result<UserLoginRow, sqlx::Error> {
    Ok(UserLoginRow {
        id: LoginId(row.try_get("id")?),
        user_mxid: UserId(row.try_get("user_mxid")?),
        remote_name: row.try_get("remote_name")?,
    })
}

pub async fn ensure_user(pool: &DbPool, mxid: &UserId) -> Result<(), DbError> {
    sqlx::query("INSERT INTO users (mxid) VALUES ($1) ON CONFLICT (mxid) DO NOTHING")
        .bind(mxid.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_login(pool: &DbPool, login: &UserLoginRow) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO user_logins (id, user_mxid, remote_name) VALUES ($1, $2, $3)
         ON CONFLICT (id) DO UPDATE SET remote_name = excluded.remote_name",
    )
    .bind(login.id.as_str())
    .bind(login.user_mxid.as_str())
    .bind(login.remote_name.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_logins_by_user(
    pool: &DbPool,
    user_mxid: &UserId,
) -> Result<Vec<UserLoginRow>, DbError> {
    let rows = sqlx::query(
        "SELECT id, user_mxid, remote_name FROM user_logins WHERE user_mxid = $1 ORDER BY id",
    )
    .bind(user_mxid.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter().map(login_from_row).collect::<Result<_, _>>().map_err(Into::into)
}

/// Associates a login with a portal it participates in. Drives
/// preferred-login resolution for outgoing events.
pub async fn link_login_to_portal(
    pool: &DbPool,
    login_id: &LoginId,
    portal_id: &PortalId,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO user_portals (login_id, portal_id) VALUES ($1, $2)
         ON CONFLICT (login_id, portal_id) DO NOTHING",
    )
    .bind(login_id.as_str())
    .bind(portal_id.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_login_ids_by_portal(
    pool: &DbPool,
    user_mxid: &UserId,
    portal_id: &PortalId,
) -> Result<Vec<LoginId>, DbError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT ul.id FROM user_logins ul
         JOIN user_portals up ON up.login_id = ul.id
         WHERE ul.user_mxid = $1 AND up.portal_id = $2
         ORDER BY ul.id",
    )
    .bind(user_mxid.as_str())
    .bind(portal_id.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| LoginId(id)).collect())
}

pub async fn get_login_ids_in_portal(
    pool: &DbPool,
    portal_id: &PortalId,
) -> Result<Vec<LoginId>, DbError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT login_id FROM user_portals WHERE portal_id = $1 ORDER BY login_id",
    )
    .bind(portal_id.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| LoginId(id)).collect())
}
