use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
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
        .route("/permissions", get(list_permissions).post(create_permission))
        .route(
            "/permissions/:id",
            get(get_permission).put(update_permission).delete(delete_permission),
        )
}

#[utoipa::path(
    get,
    path = "/permissions",
    tag = "Permissions",
    responses(
        (status = 200, description = "Permissions with role and user counts", body = Vec<PermissionSummary>),
        (status = 403, description = "Admin role required")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<PermissionSummary>>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::ViewAny, Resource::Permissions)?;
    Ok(Json(state.rbac.list_permissions().await?))
}

#[utoipa::path(
    post,
    path = "/permissions",
    tag = "Permissions",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 403, description = "Admin role required"),
        (status = 422, description = "Permission already exists for the guard")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Create, Resource::Permissions)?;

    let permission = state.rbac.create_permission(&req.name, req.guard.as_deref()).await?;

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    get,
    path = "/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission detail", body = Permission),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Permission>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::View, Resource::Permission(id))?;
    Ok(Json(state.rbac.get_permission(id).await?))
}

#[utoipa::path(
    put,
    path = "/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 200, description = "Permission renamed", body = Permission),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Permission not found"),
        (status = 422, description = "Permission already exists for the guard")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<PermissionUpdateRequest>,
) -> AppResult<Json<Permission>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Update, Resource::Permission(id))?;

    let old = state.rbac.get_permission(id).await?;
    let permission = state.rbac.update_permission(id, &req.name).await?;

    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &permission,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(permission))
}

#[utoipa::path(
    delete,
    path = "/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 204, description = "Permission deleted from every role and grant"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Delete, Resource::Permission(id))?;

    let permission = state.rbac.delete_permission(id).await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}
