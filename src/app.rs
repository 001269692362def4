use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, ThrottleConfig};
use crate::authz::{PolicyEvaluator, PolicyTable, Resolver};
use crate::cache::{Cache, MemoryCache, NoopCache};
use crate::config::AppConfig;
use crate::docs;
use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::jwt::JwtConfig;
use crate::rbac::Rbac;
use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub config: Arc<AppConfig>,
    pub cache: Arc<dyn Cache>,
    pub resolver: Resolver,
    pub rbac: Rbac,
    pub authenticator: Authenticator,
    pub policy: Arc<dyn PolicyEvaluator>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        config: AppConfig,
        throttle: ThrottleConfig,
        event_bus: EventBus,
    ) -> Self {
        let cache: Arc<dyn Cache> = if config.cache_enabled {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(NoopCache)
        };
        let jwt = Arc::new(jwt);
        let resolver = Resolver::new(pool.clone(), cache.clone(), config.access_cache_ttl);

        Self {
            rbac: Rbac::new(pool.clone(), resolver.clone()),
            authenticator: Authenticator::new(pool.clone(), jwt.clone(), throttle),
            policy: Arc::new(PolicyTable::standard()),
            config: Arc::new(config),
            pool,
            jwt,
            cache,
            resolver,
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let (event_bus, rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(rx, pool.clone()));

    let state = AppState::new(
        pool,
        JwtConfig::from_env()?,
        AppConfig::from_env()?,
        ThrottleConfig::from_env()?,
        event_bus,
    );
    create_app_with_state(state)
}

pub fn create_app_with_state(state: AppState) -> Result<Router, AppError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let openapi = docs::build_openapi(state.config.port)?;

    let router = Router::new()
        .merge(routes::routes())
        .with_state(state)
        .merge(docs::swagger_routes(openapi))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
