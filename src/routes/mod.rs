use axum::routing::get;
use axum::Router;

use crate::app::AppState;

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod permissions;
pub mod roles;
pub mod user_access;
pub mod users;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth::routes())
        .merge(users::routes())
        .merge(user_access::routes())
        .merge(roles::routes())
        .merge(permissions::routes())
        .merge(dashboard::routes())
}
