use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::user::{AuthResponse, LoginRequest, MeResponse, SessionActivity};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

/// Request context for the activity log: forwarded headers, then the socket peer.
fn client_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestContext {
    let context = RequestContext::from_headers(headers);
    match (&context.ip, peer) {
        (None, Some(addr)) => context.with_ip(addr.ip().to_string()),
        _ => context,
    }
}

/// Address the login throttle is keyed on.
///
/// Forwarded headers are client controlled, so they only count when the
/// service is configured to sit behind a trusted proxy. Otherwise the socket
/// peer is used.
fn throttle_client(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    let forwarded = trust_proxy_headers
        .then(|| RequestContext::from_headers(headers).ip)
        .flatten();

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many login attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let client = throttle_client(&headers, peer, state.config.trust_proxy_headers);
    let context = client_context(&headers, peer);

    let session = state
        .authenticator
        .attempt_login(&payload.email, &payload.password, &client)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "login",
        Some(session.user.id),
        &SessionActivity {
            user_id: session.user.id,
            token_id: session.jti,
        },
        None,
        Some(context),
    );

    Ok(Json(AuthResponse {
        token: session.token,
        token_type: "Bearer".to_string(),
        expires_at: session.expires_at,
        user: session.user,
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user with roles and permissions", body = MeResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn me(auth: AuthUser) -> AppResult<Json<MeResponse>> {
    Ok(Json(MeResponse {
        roles: auth.principal.role_names(),
        permissions: auth.principal.permission_names(),
        user: auth.user,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Token revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<Json<MessageResponse>> {
    state
        .authenticator
        .logout(auth.jti, auth.user_id, auth.expires_at)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "logout",
        Some(auth.user_id),
        &SessionActivity {
            user_id: auth.user_id,
            token_id: auth.jti,
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}
