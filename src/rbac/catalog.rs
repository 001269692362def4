use std::collections::HashMap;

use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{unique_names, user_ids, Rbac};
use crate::authz::{roles, DEFAULT_GUARD};
use crate::db::row_parsers::{self, parse_uuid};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Permission, PermissionSummary, Role, RoleDetail, RoleSummary, RoleUpdateRequest};
use crate::utils::{require_name, utc_now};

const ROLE_COLUMNS: &str = "id, name, guard, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, guard, created_at, updated_at";

const ROLE_HOLDERS_SQL: &str = "SELECT user_id FROM user_roles WHERE role_id = ?1";

const PERMISSION_HOLDERS_SQL: &str = r#"
    SELECT user_id FROM user_permissions WHERE permission_id = ?1
    UNION
    SELECT ur.user_id
    FROM user_roles ur
    INNER JOIN role_permissions rp ON rp.role_id = ur.role_id
    WHERE rp.permission_id = ?1
"#;

const LIST_ROLES_SQL: &str = r#"
    SELECT r.id, r.name, r.guard,
        (SELECT COUNT(1) FROM role_permissions rp WHERE rp.role_id = r.id) AS permissions_count,
        (SELECT COUNT(1) FROM user_roles ur
            INNER JOIN users u ON u.id = ur.user_id
            WHERE ur.role_id = r.id AND u.deleted_at IS NULL) AS users_count
    FROM roles r
    ORDER BY r.name, r.guard
"#;

const LIST_PERMISSIONS_SQL: &str = r#"
    SELECT p.id, p.name, p.guard,
        (SELECT COUNT(1) FROM role_permissions rp WHERE rp.permission_id = p.id) AS roles_count,
        (SELECT COUNT(1) FROM user_permissions up
            INNER JOIN users u ON u.id = up.user_id
            WHERE up.permission_id = p.id AND u.deleted_at IS NULL) AS users_count
    FROM permissions p
    ORDER BY p.name, p.guard
"#;

fn guard_or_default(guard: Option<&str>) -> AppResult<String> {
    match guard.map(str::trim) {
        Some(guard) if !guard.is_empty() => require_name("guard", guard),
        _ => Ok(DEFAULT_GUARD.to_string()),
    }
}

impl Rbac {
    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    pub async fn create_permission(&self, name: &str, guard: Option<&str>) -> AppResult<Permission> {
        let name = require_name("name", name)?;
        let guard = guard_or_default(guard)?;
        let id = Uuid::new_v4();
        let now = utc_now().to_rfc3339();

        sqlx::query("INSERT INTO permissions (id, name, guard, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(&name)
            .bind(&guard)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|err| AppError::from_write(err, format!("permission '{name}' already exists for guard '{guard}'")))?;

        tracing::info!(permission = %name, guard = %guard, "permission created");
        self.get_permission(id).await
    }

    pub async fn find_permission(&self, id: Uuid) -> AppResult<Option<Permission>> {
        let mut conn = self.pool.acquire().await?;
        find_permission(&mut conn, id).await
    }

    pub async fn get_permission(&self, id: Uuid) -> AppResult<Permission> {
        self.find_permission(id)
            .await?
            .ok_or_else(|| AppError::not_found("permission not found"))
    }

    pub async fn permission_by_name(&self, name: &str, guard: &str) -> AppResult<Option<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = ? AND guard = ?");
        let row = sqlx::query(&sql)
            .bind(name.trim())
            .bind(guard)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_parsers::permission_from_row).transpose()
    }

    pub async fn list_permissions(&self) -> AppResult<Vec<PermissionSummary>> {
        let rows = sqlx::query(LIST_PERMISSIONS_SQL).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> AppResult<PermissionSummary> {
                let id: String = row.try_get("id")?;
                Ok(PermissionSummary {
                    id: parse_uuid(&id)?,
                    name: row.try_get("name")?,
                    guard: row.try_get("guard")?,
                    roles_count: row.try_get("roles_count")?,
                    users_count: row.try_get("users_count")?,
                })
            })
            .collect()
    }

    /// Renames a permission. Holders see the new name on their next check.
    pub async fn update_permission(&self, id: Uuid, name: &str) -> AppResult<Permission> {
        let name = require_name("name", name)?;
        let mut tx = self.pool.begin().await?;

        let current = find_permission(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("permission not found"))?;

        sqlx::query("UPDATE permissions SET name = ?, updated_at = ? WHERE id = ?")
            .bind(&name)
            .bind(utc_now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                AppError::from_write(err, format!("permission '{name}' already exists for guard '{}'", current.guard))
            })?;

        let affected = user_ids(&mut tx, PERMISSION_HOLDERS_SQL, &id.to_string()).await?;
        let updated = find_permission(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("permission not found"))?;
        tx.commit().await?;

        self.resolver.forget_all(affected);
        Ok(updated)
    }

    /// Deletes a permission, dropping it from every role and direct grant.
    pub async fn delete_permission(&self, id: Uuid) -> AppResult<Permission> {
        let mut tx = self.pool.begin().await?;

        let permission = find_permission(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("permission not found"))?;
        let affected = user_ids(&mut tx, PERMISSION_HOLDERS_SQL, &id.to_string()).await?;

        sqlx::query("DELETE FROM permissions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.resolver.forget_all(affected);
        tracing::info!(permission = %permission.name, "permission deleted");
        Ok(permission)
    }

    // =========================================================================
    // ROLES
    // =========================================================================

    /// Creates a role and, in the same transaction, links its initial permissions.
    pub async fn create_role(&self, name: &str, guard: Option<&str>, permissions: Option<&[String]>) -> AppResult<RoleDetail> {
        let name = require_name("name", name)?;
        let guard = guard_or_default(guard)?;
        let id = Uuid::new_v4();
        let now = utc_now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO roles (id, name, guard, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(&name)
            .bind(&guard)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|err| AppError::from_write(err, format!("role '{name}' already exists for guard '{guard}'")))?;

        if let Some(names) = permissions {
            replace_role_permissions(&mut tx, id, &guard, names).await?;
        }
        tx.commit().await?;

        tracing::info!(role = %name, guard = %guard, "role created");
        self.role_detail(id).await
    }

    pub async fn find_role(&self, id: Uuid) -> AppResult<Option<Role>> {
        let mut conn = self.pool.acquire().await?;
        find_role(&mut conn, id).await
    }

    pub async fn get_role(&self, id: Uuid) -> AppResult<Role> {
        self.find_role(id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))
    }

    pub async fn role_by_name(&self, name: &str, guard: &str) -> AppResult<Option<Role>> {
        let mut conn = self.pool.acquire().await?;
        role_by_name(&mut conn, name, guard).await
    }

    pub async fn role_detail(&self, id: Uuid) -> AppResult<RoleDetail> {
        let mut conn = self.pool.acquire().await?;
        let role = find_role(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;
        let permissions = permissions_of_role(&mut conn, id).await?;
        Ok(RoleDetail::new(role, permissions))
    }

    pub async fn list_roles(&self) -> AppResult<Vec<RoleSummary>> {
        let rows = sqlx::query(LIST_ROLES_SQL).fetch_all(&self.pool).await?;

        let links = sqlx::query(
            r#"
            SELECT rp.role_id, p.name
            FROM role_permissions rp
            INNER JOIN permissions p ON p.id = rp.permission_id
            ORDER BY p.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut names_by_role: HashMap<String, Vec<String>> = HashMap::new();
        for link in &links {
            let role_id: String = link.try_get("role_id")?;
            names_by_role.entry(role_id).or_default().push(link.try_get("name")?);
        }

        rows.iter()
            .map(|row| -> AppResult<RoleSummary> {
                let id: String = row.try_get("id")?;
                Ok(RoleSummary {
                    id: parse_uuid(&id)?,
                    name: row.try_get("name")?,
                    guard: row.try_get("guard")?,
                    permissions: names_by_role.remove(&id).unwrap_or_default(),
                    permissions_count: row.try_get("permissions_count")?,
                    users_count: row.try_get("users_count")?,
                })
            })
            .collect()
    }

    /// Renames a role and/or replaces its permission set in one transaction.
    ///
    /// Protected roles keep their name; their permission set may still change.
    pub async fn update_role(&self, id: Uuid, changes: &RoleUpdateRequest) -> AppResult<RoleDetail> {
        let mut tx = self.pool.begin().await?;

        let role = find_role(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;

        if let Some(name) = &changes.name {
            let name = require_name("name", name)?;
            if name != role.name {
                if roles::is_protected(&role.name) {
                    return Err(AppError::forbidden(format!("the '{}' role cannot be renamed", role.name)));
                }

                sqlx::query("UPDATE roles SET name = ?, updated_at = ? WHERE id = ?")
                    .bind(&name)
                    .bind(utc_now().to_rfc3339())
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(|err| {
                        AppError::from_write(err, format!("role '{name}' already exists for guard '{}'", role.guard))
                    })?;
            }
        }

        if let Some(names) = &changes.permissions {
            replace_role_permissions(&mut tx, id, &role.guard, names).await?;
        }

        let affected = user_ids(&mut tx, ROLE_HOLDERS_SQL, &id.to_string()).await?;
        tx.commit().await?;

        self.resolver.forget_all(affected);
        self.role_detail(id).await
    }

    /// Replaces the role's permission set with exactly `names`.
    ///
    /// An unknown name fails with `NotFound` and leaves the previous set intact.
    pub async fn sync_permissions(&self, id: Uuid, names: &[String]) -> AppResult<RoleDetail> {
        let mut tx = self.pool.begin().await?;

        let role = find_role(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;
        replace_role_permissions(&mut tx, id, &role.guard, names).await?;

        let affected = user_ids(&mut tx, ROLE_HOLDERS_SQL, &id.to_string()).await?;
        tx.commit().await?;

        self.resolver.forget_all(affected);
        tracing::info!(role = %role.name, count = names.len(), "role permissions synced");
        self.role_detail(id).await
    }

    /// Deletes a role together with its assignments and permission links.
    pub async fn delete_role(&self, id: Uuid) -> AppResult<Role> {
        let mut tx = self.pool.begin().await?;

        let role = find_role(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;

        if roles::is_protected(&role.name) {
            return Err(AppError::forbidden(format!("the '{}' role cannot be deleted", role.name)));
        }

        let affected = user_ids(&mut tx, ROLE_HOLDERS_SQL, &id.to_string()).await?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.resolver.forget_all(affected);
        tracing::info!(role = %role.name, "role deleted");
        Ok(role)
    }
}

pub(super) async fn find_role(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Role>> {
    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(conn).await?;
    row.as_ref().map(row_parsers::role_from_row).transpose()
}

pub(super) async fn role_by_name(conn: &mut SqliteConnection, name: &str, guard: &str) -> AppResult<Option<Role>> {
    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = ? AND guard = ?");
    let row = sqlx::query(&sql)
        .bind(name.trim())
        .bind(guard)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(row_parsers::role_from_row).transpose()
}

async fn find_permission(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Permission>> {
    let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?");
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(conn).await?;
    row.as_ref().map(row_parsers::permission_from_row).transpose()
}

pub(super) async fn permissions_of_role(conn: &mut SqliteConnection, role_id: Uuid) -> AppResult<Vec<Permission>> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.name, p.guard, p.created_at, p.updated_at
        FROM permissions p
        INNER JOIN role_permissions rp ON rp.permission_id = p.id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(conn)
    .await?;

    rows.iter().map(row_parsers::permission_from_row).collect()
}

/// Looks up every name within `guard`; the first unknown name aborts with `NotFound`.
pub(super) async fn permission_ids(conn: &mut SqliteConnection, names: &[String], guard: &str) -> AppResult<Vec<String>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in unique_names(names) {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM permissions WHERE name = ? AND guard = ?")
            .bind(&name)
            .bind(guard)
            .fetch_optional(&mut *conn)
            .await?;

        match id {
            Some(id) => ids.push(id),
            None => {
                return Err(AppError::not_found(format!(
                    "there is no permission named '{name}' for guard '{guard}'"
                )))
            }
        }
    }
    Ok(ids)
}

async fn replace_role_permissions(conn: &mut SqliteConnection, role_id: Uuid, guard: &str, names: &[String]) -> AppResult<()> {
    let ids = permission_ids(&mut *conn, names, guard).await?;
    let role_id = role_id.to_string();
    let now = utc_now().to_rfc3339();

    sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
        .bind(&role_id)
        .execute(&mut *conn)
        .await?;

    for permission_id in ids {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)")
            .bind(&role_id)
            .bind(permission_id)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
