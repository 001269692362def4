//! Credential store: live (not soft-deleted) user rows.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::models::dashboard::DashboardStats;
use crate::models::user::{DbUser, UpdateUserRequest};
use crate::utils::{hash_password, normalize_email, require_name, utc_now};

const USER_COLUMNS: &str = "id, name, email, password_hash, active, created_at, updated_at, deleted_at";

pub async fn find_live(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL");
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_parsers::db_user_from_row).transpose()
}

pub async fn get_live(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    find_live(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ? COLLATE NOCASE AND deleted_at IS NULL");
    let row = sqlx::query(&sql)
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_parsers::db_user_from_row).transpose()
}

async fn ensure_email_available(pool: &SqlitePool, email: &str, except: Option<Uuid>) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM users WHERE email = ? COLLATE NOCASE AND deleted_at IS NULL AND id != ?",
    )
    .bind(email)
    .bind(except.map(|id| id.to_string()).unwrap_or_default())
    .fetch_one(pool)
    .await?;

    if count > 0 {
        return Err(AppError::duplicate_key("the email has already been taken"));
    }
    Ok(())
}

pub async fn insert_user(pool: &SqlitePool, name: &str, email: &str, password: &str, active: bool) -> AppResult<DbUser> {
    let name = require_name("name", name)?;
    let email = normalize_email(email)?;
    ensure_email_available(pool, &email, None).await?;

    let password_hash = hash_password(password)?;
    let now = utc_now().to_rfc3339();
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(&name)
    .bind(&email)
    .bind(password_hash)
    .bind(active)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|err| AppError::from_write(err, "the email has already been taken"))?;

    get_live(pool, user_id).await
}

pub async fn update_user(pool: &SqlitePool, user_id: Uuid, changes: &UpdateUserRequest) -> AppResult<DbUser> {
    let current = get_live(pool, user_id).await?;

    let name = match &changes.name {
        Some(name) => require_name("name", name)?,
        None => current.name.clone(),
    };
    let email = match &changes.email {
        Some(email) => {
            let email = normalize_email(email)?;
            ensure_email_available(pool, &email, Some(user_id)).await?;
            email
        }
        None => current.email.clone(),
    };
    let password_hash = match changes.password.as_deref() {
        Some(password) if !password.is_empty() => hash_password(password)?,
        _ => current.password_hash.clone(),
    };
    let active = changes.active.unwrap_or(current.active);

    sqlx::query(
        "UPDATE users SET name = ?, email = ?, password_hash = ?, active = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(&name)
    .bind(&email)
    .bind(&password_hash)
    .bind(active)
    .bind(utc_now().to_rfc3339())
    .bind(user_id.to_string())
    .execute(pool)
    .await
    .map_err(|err| AppError::from_write(err, "the email has already been taken"))?;

    get_live(pool, user_id).await
}

/// Marks the row deleted; it stays in the table but drops out of every live query.
pub async fn soft_delete(pool: &SqlitePool, user_id: Uuid) -> AppResult<()> {
    let now = utc_now().to_rfc3339();
    let result = sqlx::query("UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(&now)
        .bind(&now)
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }
    Ok(())
}

pub async fn page(pool: &SqlitePool, page: u32, per_page: u32) -> AppResult<(Vec<DbUser>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;

    let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at, email LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query(&sql)
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let users = rows
        .iter()
        .map(row_parsers::db_user_from_row)
        .collect::<AppResult<Vec<_>>>()?;
    Ok((users, total))
}

pub async fn recent(pool: &SqlitePool, limit: u32) -> AppResult<Vec<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT ?");
    let rows = sqlx::query(&sql)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_parsers::db_user_from_row).collect()
}

pub async fn first_user(pool: &SqlitePool) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at LIMIT 1");
    let row = sqlx::query(&sql).fetch_optional(pool).await?;
    row.as_ref().map(row_parsers::db_user_from_row).transpose()
}

pub async fn stats(pool: &SqlitePool) -> AppResult<DashboardStats> {
    let (users, active_users): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(1), COALESCE(SUM(CASE WHEN active THEN 1 ELSE 0 END), 0) FROM users WHERE deleted_at IS NULL",
    )
    .fetch_one(pool)
    .await?;

    Ok(DashboardStats {
        users,
        active_users,
        inactive_users: users - active_users,
    })
}
