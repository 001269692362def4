use sqlx::SqliteConnection;
use uuid::Uuid;

use super::catalog::{permission_ids, role_by_name};
use super::{unique_names, Rbac};
use crate::authz::DEFAULT_GUARD;
use crate::db::{row_parsers, users};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Permission, PermissionGrant, Role, RoleAssignment, UserAccess, UserRef};
use crate::utils::utc_now;

const USER_ROLES_SQL: &str = r#"
    SELECT r.id, r.name, r.guard, r.created_at, r.updated_at
    FROM roles r
    INNER JOIN user_roles ur ON ur.role_id = r.id
    WHERE ur.user_id = ?
    ORDER BY r.name
"#;

const DIRECT_PERMISSIONS_SQL: &str = r#"
    SELECT p.id, p.name, p.guard, p.created_at, p.updated_at
    FROM permissions p
    INNER JOIN user_permissions up ON up.permission_id = p.id
    WHERE up.user_id = ?
    ORDER BY p.name
"#;

const ALL_PERMISSIONS_SQL: &str = r#"
    SELECT p.id, p.name, p.guard, p.created_at, p.updated_at
    FROM permissions p
    WHERE p.id IN (
        SELECT rp.permission_id
        FROM role_permissions rp
        INNER JOIN user_roles ur ON ur.role_id = rp.role_id
        WHERE ur.user_id = ?1
        UNION
        SELECT up.permission_id FROM user_permissions up WHERE up.user_id = ?1
    )
    ORDER BY p.name
"#;

async fn role_ids(conn: &mut SqliteConnection, names: &[String]) -> AppResult<Vec<String>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in unique_names(names) {
        match role_by_name(&mut *conn, &name, DEFAULT_GUARD).await? {
            Some(role) => ids.push(role.id.to_string()),
            None => {
                return Err(AppError::not_found(format!(
                    "there is no role named '{name}' for guard '{DEFAULT_GUARD}'"
                )))
            }
        }
    }
    Ok(ids)
}

async fn role_names(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Vec<String>> {
    let rows = sqlx::query(USER_ROLES_SQL)
        .bind(user_id.to_string())
        .fetch_all(conn)
        .await?;

    rows.iter()
        .map(|row| row_parsers::role_from_row(row).map(|role| role.name))
        .collect()
}

async fn direct_permission_names(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Vec<String>> {
    let rows = sqlx::query(DIRECT_PERMISSIONS_SQL)
        .bind(user_id.to_string())
        .fetch_all(conn)
        .await?;

    rows.iter()
        .map(|row| row_parsers::permission_from_row(row).map(|permission| permission.name))
        .collect()
}

impl Rbac {
    /// Replaces the user's roles with exactly `names`.
    ///
    /// Any unknown name fails with `NotFound` before anything is written.
    pub async fn assign_roles(&self, user_id: Uuid, names: &[String]) -> AppResult<RoleAssignment> {
        users::get_live(&self.pool, user_id).await?;

        let mut tx = self.pool.begin().await?;
        let ids = role_ids(&mut tx, names).await?;
        let now = utc_now().to_rfc3339();

        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        for role_id in ids {
            sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
                .bind(user_id.to_string())
                .bind(role_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        let roles = role_names(&mut tx, user_id).await?;
        tx.commit().await?;

        self.resolver.forget(user_id);
        tracing::info!(user_id = %user_id, roles = ?roles, "user roles synced");
        Ok(RoleAssignment { user_id, roles })
    }

    /// Adds one role on top of whatever the user already holds.
    pub async fn grant_role(&self, user_id: Uuid, name: &str) -> AppResult<RoleAssignment> {
        users::get_live(&self.pool, user_id).await?;

        let mut tx = self.pool.begin().await?;
        let ids = role_ids(&mut tx, &[name.to_string()]).await?;

        for role_id in ids {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
                .bind(user_id.to_string())
                .bind(role_id)
                .bind(utc_now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
        }

        let roles = role_names(&mut tx, user_id).await?;
        tx.commit().await?;

        self.resolver.forget(user_id);
        Ok(RoleAssignment { user_id, roles })
    }

    /// Removes one role. Removing a role the user does not hold is a no-op.
    pub async fn remove_role(&self, user_id: Uuid, name: &str) -> AppResult<RoleAssignment> {
        users::get_live(&self.pool, user_id).await?;

        let mut tx = self.pool.begin().await?;
        let ids = role_ids(&mut tx, &[name.to_string()]).await?;

        for role_id in ids {
            sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
                .bind(user_id.to_string())
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        }

        let roles = role_names(&mut tx, user_id).await?;
        tx.commit().await?;

        self.resolver.forget(user_id);
        tracing::info!(user_id = %user_id, role = name, "role removed from user");
        Ok(RoleAssignment { user_id, roles })
    }

    /// Replaces the user's direct grants with exactly `names`.
    pub async fn assign_permissions(&self, user_id: Uuid, names: &[String]) -> AppResult<PermissionGrant> {
        users::get_live(&self.pool, user_id).await?;

        let mut tx = self.pool.begin().await?;
        let ids = permission_ids(&mut tx, names, DEFAULT_GUARD).await?;
        let now = utc_now().to_rfc3339();

        sqlx::query("DELETE FROM user_permissions WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        for permission_id in ids {
            sqlx::query("INSERT INTO user_permissions (user_id, permission_id, created_at) VALUES (?, ?, ?)")
                .bind(user_id.to_string())
                .bind(permission_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        let permissions = direct_permission_names(&mut tx, user_id).await?;
        tx.commit().await?;

        self.resolver.forget(user_id);
        tracing::info!(user_id = %user_id, permissions = ?permissions, "direct permissions synced");
        Ok(PermissionGrant { user_id, permissions })
    }

    /// Revokes one direct grant. Capabilities the user gets through a role are untouched.
    pub async fn revoke_permission(&self, user_id: Uuid, name: &str) -> AppResult<PermissionGrant> {
        users::get_live(&self.pool, user_id).await?;

        let mut tx = self.pool.begin().await?;
        let ids = permission_ids(&mut tx, &[name.to_string()], DEFAULT_GUARD).await?;

        for permission_id in ids {
            sqlx::query("DELETE FROM user_permissions WHERE user_id = ? AND permission_id = ?")
                .bind(user_id.to_string())
                .bind(permission_id)
                .execute(&mut *tx)
                .await?;
        }

        let permissions = direct_permission_names(&mut tx, user_id).await?;
        tx.commit().await?;

        self.resolver.forget(user_id);
        tracing::info!(user_id = %user_id, permission = name, "direct permission revoked");
        Ok(PermissionGrant { user_id, permissions })
    }

    pub async fn user_roles(&self, user_id: Uuid) -> AppResult<Vec<Role>> {
        let rows = sqlx::query(USER_ROLES_SQL)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_parsers::role_from_row).collect()
    }

    pub async fn direct_permissions(&self, user_id: Uuid) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query(DIRECT_PERMISSIONS_SQL)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_parsers::permission_from_row).collect()
    }

    /// Role-derived and direct permissions, each listed once.
    pub async fn all_permissions(&self, user_id: Uuid) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query(ALL_PERMISSIONS_SQL)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_parsers::permission_from_row).collect()
    }

    pub async fn user_access(&self, user_id: Uuid) -> AppResult<UserAccess> {
        let user = users::get_live(&self.pool, user_id).await?;

        Ok(UserAccess {
            user: UserRef {
                id: user.id,
                name: user.name,
                email: user.email,
            },
            roles: self.user_roles(user_id).await?,
            direct_permissions: self.direct_permissions(user_id).await?,
            all_permissions: self.all_permissions(user_id).await?,
        })
    }
}
