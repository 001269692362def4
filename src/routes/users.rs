use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use super::dashboard::invalidate_dashboard;
use crate::app::AppState;
use crate::authz::{authorize, Action, Resource};
use crate::db::users;
use crate::errors::AppResult;
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::user::{CreateUserRequest, PageQuery, UpdateUserRequest, User, UserPage};

const DEFAULT_PER_PAGE: u32 = 10;
const MAX_PER_PAGE: u32 = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    params(
        ("page" = Option<u32>, Query, description = "Page number, starting at 1"),
        ("per_page" = Option<u32>, Query, description = "Page size (default 10, max 100)")
    ),
    responses(
        (status = 200, description = "One page of live users", body = UserPage),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<UserPage>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::ViewAny, Resource::Users)?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let (rows, total) = users::page(&state.pool, page, per_page).await?;

    Ok(Json(UserPage {
        data: rows.into_iter().map(User::from).collect(),
        page,
        per_page,
        total,
    }))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Missing the create users permission"),
        (status = 422, description = "Invalid input or email already taken")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Create, Resource::Users)?;

    let created = users::insert_user(
        &state.pool,
        &payload.name,
        &payload.email,
        &payload.password,
        payload.active.unwrap_or(true),
    )
    .await?;
    let user = User::from(created);

    invalidate_dashboard(state.cache.as_ref());
    // publishes `user.created`
    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(user_id = %user.id, created_by = %auth.user_id, "user created");

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User detail", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::View, Resource::User(id))?;

    let user = users::get_live(&state.pool, id).await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Not your account and missing the edit users permission"),
        (status = 404, description = "User not found"),
        (status = 422, description = "Invalid input or email already taken")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Update, Resource::User(id))?;

    let old = User::from(users::get_live(&state.pool, id).await?);
    let user = User::from(users::update_user(&state.pool, id, &payload).await?);

    invalidate_dashboard(state.cache.as_ref());
    log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &user,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );
    if old.active && !user.active {
        tracing::info!(user_id = %id, deactivated_by = %auth.user_id, "user deactivated");
    }

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User soft deleted"),
        (status = 403, description = "Own account, or missing the delete users permission"),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(state.policy.as_ref(), &auth.principal, Action::Delete, Resource::User(id))?;

    let user = User::from(users::get_live(&state.pool, id).await?);
    users::soft_delete(&state.pool, id).await?;
    state.resolver.forget(id);

    invalidate_dashboard(state.cache.as_ref());
    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(user_id = %id, deleted_by = %auth.user_id, "user deleted");

    Ok(StatusCode::NO_CONTENT)
}
