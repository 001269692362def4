use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::app::AppState;
use crate::cache::{get_or_compute, Cache};
use crate::db::users;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::dashboard::{Dashboard, DashboardStats};
use crate::models::user::User;

pub const STATS_KEY: &str = "dashboard.stats";
pub const RECENT_USERS_KEY: &str = "dashboard.recent_users";
pub const ALL_KEY: &str = "dashboard.all";

const STATS_TTL: Duration = Duration::from_secs(300);
const RECENT_USERS_TTL: Duration = Duration::from_secs(120);
const ALL_TTL: Duration = Duration::from_secs(300);

const RECENT_USERS_LIMIT: u32 = 10;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/dashboard/stats", get(stats))
        .route("/dashboard/recent-users", get(recent_users))
}

/// Drops every cached dashboard view. Called after any user create, update or delete.
pub fn invalidate_dashboard(cache: &dyn Cache) {
    for key in [STATS_KEY, RECENT_USERS_KEY, ALL_KEY] {
        cache.invalidate(key);
    }
}

async fn recent(state: &AppState) -> AppResult<Vec<User>> {
    let rows = users::recent(&state.pool, RECENT_USERS_LIMIT).await?;
    Ok(rows.into_iter().map(User::from).collect())
}

#[utoipa::path(
    get,
    path = "/dashboard/stats",
    tag = "Dashboard",
    responses(
        (status = 200, description = "User counts", body = DashboardStats),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn stats(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<DashboardStats>> {
    let stats = get_or_compute(state.cache.as_ref(), STATS_KEY, STATS_TTL, || users::stats(&state.pool)).await?;
    Ok(Json(stats))
}

#[utoipa::path(
    get,
    path = "/dashboard/recent-users",
    tag = "Dashboard",
    responses(
        (status = 200, description = "Ten newest users", body = Vec<User>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn recent_users(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<User>>> {
    let users = get_or_compute(state.cache.as_ref(), RECENT_USERS_KEY, RECENT_USERS_TTL, || recent(&state)).await?;
    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/dashboard",
    tag = "Dashboard",
    responses(
        (status = 200, description = "Stats and recent users", body = Dashboard),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn dashboard(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Dashboard>> {
    let dashboard = get_or_compute(state.cache.as_ref(), ALL_KEY, ALL_TTL, || async {
        Ok(Dashboard {
            stats: users::stats(&state.pool).await?,
            recent_users: recent(&state).await?,
        })
    })
    .await?;
    Ok(Json(dashboard))
}
