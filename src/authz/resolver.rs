use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::principal::{AccessSnapshot, Principal};
use crate::cache::{self, Cache};
use crate::errors::AppResult;
use crate::models::user::DbUser;

const ROLE_NAMES_SQL: &str = r#"
    SELECT r.name
    FROM roles r
    INNER JOIN user_roles ur ON r.id = ur.role_id
    WHERE ur.user_id = ?
    ORDER BY r.name
"#;

// Role-derived and direct grants; UNION removes duplicates.
const EFFECTIVE_PERMISSIONS_SQL: &str = r#"
    SELECT p.name AS name
    FROM permissions p
    INNER JOIN role_permissions rp ON p.id = rp.permission_id
    INNER JOIN user_roles ur ON ur.role_id = rp.role_id
    WHERE ur.user_id = ?
    UNION
    SELECT p.name AS name
    FROM permissions p
    INNER JOIN user_permissions up ON p.id = up.permission_id
    WHERE up.user_id = ?
    ORDER BY name
"#;

/// Answers role/permission questions about a user.
///
/// Effective permissions are `union(permissions of every assigned role) ∪ direct grants`.
/// There is no deny rule: a capability disappears only when every role or
/// direct grant providing it is removed.
#[derive(Clone)]
pub struct Resolver {
    pool: SqlitePool,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl Resolver {
    pub fn new(pool: SqlitePool, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { pool, cache, ttl }
    }

    pub fn cache_key(user_id: Uuid) -> String {
        format!("rbac.access.{user_id}")
    }

    /// Role and permission names of `user_id`, served from the cache when present.
    pub async fn snapshot(&self, user_id: Uuid) -> AppResult<AccessSnapshot> {
        let key = Self::cache_key(user_id);
        cache::get_or_compute(self.cache.as_ref(), &key, self.ttl, || load_snapshot(&self.pool, user_id)).await
    }

    pub async fn has_role(&self, user_id: Uuid, role: &str) -> AppResult<bool> {
        Ok(self.snapshot(user_id).await?.roles.iter().any(|r| r == role))
    }

    pub async fn has_permission(&self, user_id: Uuid, permission: &str) -> AppResult<bool> {
        let allowed = self
            .snapshot(user_id)
            .await?
            .permissions
            .iter()
            .any(|p| p == permission);

        tracing::debug!(user_id = %user_id, permission, allowed, "permission check");
        Ok(allowed)
    }

    pub async fn effective_permissions(&self, user_id: Uuid) -> AppResult<BTreeSet<String>> {
        Ok(self.snapshot(user_id).await?.permissions.into_iter().collect())
    }

    pub async fn principal(&self, user: &DbUser) -> AppResult<Principal> {
        let snapshot = self.snapshot(user.id).await?;
        Ok(Principal::from_snapshot(user.id, user.active, snapshot))
    }

    /// Drops the cached snapshot of one user. Called by every ledger/registry write.
    pub fn forget(&self, user_id: Uuid) {
        self.cache.invalidate(&Self::cache_key(user_id));
    }

    pub fn forget_all(&self, user_ids: impl IntoIterator<Item = Uuid>) {
        for user_id in user_ids {
            self.forget(user_id);
        }
    }
}

async fn load_snapshot(pool: &SqlitePool, user_id: Uuid) -> AppResult<AccessSnapshot> {
    let id = user_id.to_string();

    let roles = sqlx::query(ROLE_NAMES_SQL)
        .bind(&id)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<Vec<_>, _>>()?;

    let permissions = sqlx::query(EFFECTIVE_PERMISSIONS_SQL)
        .bind(&id)
        .bind(&id)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AccessSnapshot { roles, permissions })
}
