use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, Action, Resource};
use crate::errors::AppResult;
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::rbac::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:id", get(get_role).put(update_role).delete(delete_role))
        .route("/roles/:id/permissions", put(sync_role_permissions))
}

#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    responses(
        (status = 200, description = "Roles with permission and user counts", body = Vec<RoleSummary>),
        (status = 403, description = "Admin role required")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<RoleSummary>>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::ViewAny, Resource::Roles)?;
    Ok(Json(state.rbac.list_roles().await?))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = RoleDetail),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Unknown permission name"),
        (status = 422, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<RoleDetail>)> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Create, Resource::Roles)?;

    let role = state
        .rbac
        .create_role(&req.name, req.guard.as_deref(), req.permissions.as_deref())
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role with its permissions", body = RoleDetail),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RoleDetail>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::View, Resource::Role(id))?;
    Ok(Json(state.rbac.role_detail(id).await?))
}

#[utoipa::path(
    put,
    path = "/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleDetail),
        (status = 403, description = "Admin role required, or renaming a protected role"),
        (status = 404, description = "Role or permission not found"),
        (status = 422, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleUpdateRequest>,
) -> AppResult<Json<RoleDetail>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Update, Resource::Role(id))?;

    let old = state.rbac.role_detail(id).await?;
    let role = state.rbac.update_role(id, &req).await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &role,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(role))
}

#[utoipa::path(
    put,
    path = "/roles/{id}/permissions",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = SyncPermissionsRequest,
    responses(
        (status = 200, description = "Permission set replaced", body = RoleDetail),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Role or permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn sync_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<SyncPermissionsRequest>,
) -> AppResult<Json<RoleDetail>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Update, Resource::Role(id))?;

    let old = state.rbac.role_detail(id).await?;
    let role = state.rbac.sync_permissions(id, &req.permissions).await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &role,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(role))
}

#[utoipa::path(
    delete,
    path = "/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted with its assignments"),
        (status = 403, description = "Admin role required, or a protected role"),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Delete, Resource::Role(id))?;

    let role = state.rbac.delete_role(id).await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}
