//! Seeds the standard permission catalog and roles.

use serde::Serialize;

use super::Rbac;
use crate::authz::{permissions, roles, DEFAULT_GUARD};
use crate::db::{row_parsers::parse_uuid, users};
use crate::errors::AppResult;

#[derive(Debug, Clone, Serialize)]
pub struct RoleSeed {
    pub name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupSummary {
    pub permissions_created: usize,
    pub permissions_total: usize,
    pub roles: Vec<RoleSeed>,
    /// Email of the first user, when it was given the admin role.
    pub admin_assigned_to: Option<String>,
}

fn standard_roles() -> Vec<(&'static str, Vec<&'static str>)> {
    use permissions::*;

    vec![
        (roles::EDITOR, vec![VIEW_USERS, CREATE_USERS, EDIT_USERS, VIEW_ROLES, VIEW_DASHBOARD]),
        (roles::USER, vec![VIEW_DASHBOARD]),
        (
            roles::ROLE_MANAGER,
            vec![VIEW_ROLES, CREATE_ROLES, EDIT_ROLES, DELETE_ROLES, VIEW_DASHBOARD],
        ),
    ]
}

/// Creates missing catalog permissions and the admin/editor/user/role_manager
/// roles, then gives the first live user the admin role.
///
/// With `fresh`, every existing role and permission (and so every assignment)
/// is removed first. Without it the run is idempotent.
pub async fn setup_permissions(rbac: &Rbac, fresh: bool) -> AppResult<SetupSummary> {
    if fresh {
        wipe(rbac).await?;
    }

    let mut permissions_created = 0;
    for (name, _) in permissions::CATALOG {
        if rbac.permission_by_name(name, DEFAULT_GUARD).await?.is_none() {
            rbac.create_permission(name, Some(DEFAULT_GUARD)).await?;
            permissions_created += 1;
        }
    }

    // admin owns every permission in the guard, including custom ones
    let every_permission: Vec<String> = rbac
        .list_permissions()
        .await?
        .into_iter()
        .filter(|p| p.guard == DEFAULT_GUARD)
        .map(|p| p.name)
        .collect();

    let mut seeds = vec![(roles::ADMIN.to_string(), every_permission.clone())];
    seeds.extend(
        standard_roles()
            .into_iter()
            .map(|(name, perms)| (name.to_string(), perms.into_iter().map(String::from).collect())),
    );

    let mut summary_roles = Vec::with_capacity(seeds.len());
    for (name, perms) in seeds {
        let detail = match rbac.role_by_name(&name, DEFAULT_GUARD).await? {
            Some(role) => rbac.sync_permissions(role.id, &perms).await?,
            None => rbac.create_role(&name, Some(DEFAULT_GUARD), Some(&perms)).await?,
        };
        tracing::info!(role = %detail.name, permissions = detail.permissions.len(), "role seeded");
        summary_roles.push(RoleSeed {
            permissions: detail.permission_names(),
            name: detail.name,
        });
    }

    let admin_assigned_to = match users::first_user(rbac.pool()).await? {
        Some(user) => {
            rbac.grant_role(user.id, roles::ADMIN).await?;
            tracing::info!(email = %user.email, "admin role assigned to first user");
            Some(user.email)
        }
        None => None,
    };

    Ok(SetupSummary {
        permissions_created,
        permissions_total: every_permission.len(),
        roles: summary_roles,
        admin_assigned_to,
    })
}

async fn wipe(rbac: &Rbac) -> AppResult<()> {
    let mut tx = rbac.pool().begin().await?;

    let holders: Vec<String> = sqlx::query_scalar(
        "SELECT user_id FROM user_roles UNION SELECT user_id FROM user_permissions",
    )
    .fetch_all(&mut *tx)
    .await?;

    for table in ["user_permissions", "user_roles", "role_permissions", "roles", "permissions"] {
        sqlx::query(&format!("DELETE FROM {table}")).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    let holders = holders.iter().map(|id| parse_uuid(id)).collect::<AppResult<Vec<_>>>()?;
    rbac.resolver().forget_all(holders);
    tracing::warn!("existing roles and permissions removed");
    Ok(())
}
