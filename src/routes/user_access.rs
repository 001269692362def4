//! Role and direct-permission assignments of a single user.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, Action, Resource};
use crate::db::users;
use crate::errors::AppResult;
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::rbac::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:id/roles",
            get(get_user_roles).post(assign_roles).delete(remove_role),
        )
        .route(
            "/users/:id/permissions",
            get(get_user_access).post(assign_permissions).delete(revoke_permission),
        )
}

#[utoipa::path(
    get,
    path = "/users/{id}/roles",
    tag = "User access",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Roles held by the user", body = Vec<Role>),
        (status = 403, description = "Neither the user nor an admin"),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Role>>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::ViewAccess, Resource::User(id))?;

    users::get_live(&state.pool, id).await?;
    Ok(Json(state.rbac.user_roles(id).await?))
}

#[utoipa::path(
    post,
    path = "/users/{id}/roles",
    tag = "User access",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = AssignRolesRequest,
    responses(
        (status = 200, description = "Role set replaced", body = RoleAssignment),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User or role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRolesRequest>,
) -> AppResult<Json<RoleAssignment>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::AssignAccess, Resource::User(id))?;

    let assignment = state.rbac.assign_roles(id, &req.roles).await?;

    log_activity_with_context(
        &state.event_bus,
        "synced",
        Some(auth.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(assignment))
}

#[utoipa::path(
    delete,
    path = "/users/{id}/roles",
    tag = "User access",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = RemoveRoleRequest,
    responses(
        (status = 200, description = "Role removed (no-op if not held)", body = RoleAssignment),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User or role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RemoveRoleRequest>,
) -> AppResult<Json<RoleAssignment>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::AssignAccess, Resource::User(id))?;

    let assignment = state.rbac.remove_role(id, &req.role).await?;

    log_activity_with_context(
        &state.event_bus,
        "revoked",
        Some(auth.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(assignment))
}

#[utoipa::path(
    get,
    path = "/users/{id}/permissions",
    tag = "User access",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Roles, direct grants and effective permissions", body = UserAccess),
        (status = 403, description = "Neither the user nor an admin"),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_access(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserAccess>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::ViewAccess, Resource::User(id))?;

    Ok(Json(state.rbac.user_access(id).await?))
}

#[utoipa::path(
    post,
    path = "/users/{id}/permissions",
    tag = "User access",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = AssignPermissionsRequest,
    responses(
        (status = 200, description = "Direct grants replaced", body = PermissionGrant),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User or permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignPermissionsRequest>,
) -> AppResult<Json<PermissionGrant>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::AssignAccess, Resource::User(id))?;

    let grant = state.rbac.assign_permissions(id, &req.permissions).await?;

    log_activity_with_context(
        &state.event_bus,
        "synced",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(grant))
}

#[utoipa::path(
    delete,
    path = "/users/{id}/permissions",
    tag = "User access",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = RevokePermissionRequest,
    responses(
        (status = 200, description = "Direct grant revoked", body = PermissionGrant),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User or permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RevokePermissionRequest>,
) -> AppResult<Json<PermissionGrant>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::AssignAccess, Resource::User(id))?;

    let grant = state.rbac.revoke_permission(id, &req.permission).await?;

    log_activity_with_context(
        &state.event_bus,
        "revoked",
        Some(auth.user_id),
        &grant,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(grant))
}
