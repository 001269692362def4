#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use user_admin::auth::ThrottleConfig;
use user_admin::config::AppConfig;
use user_admin::db::users;
use user_admin::events;
use user_admin::jwt::JwtConfig;
use user_admin::rbac::setup_permissions;
use user_admin::{create_app_with_state, AppState};

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Fresh SQLite file with every migration applied.
pub async fn migrated_pool() -> Result<(SqlitePool, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((pool, dir))
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with(ThrottleConfig::default()).await
}

pub async fn spawn_app_with(throttle: ThrottleConfig) -> Result<TestApp> {
    let (pool, dir) = migrated_pool().await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let (event_bus, rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(rx, pool.clone()));

    let state = AppState::new(
        pool.clone(),
        JwtConfig::from_env()?,
        AppConfig::default(),
        throttle,
        event_bus,
    );
    let router = create_app_with_state(state.clone())?;

    Ok(TestApp {
        router,
        state,
        pool,
        _dir: dir,
    })
}

impl TestApp {
    /// Standard permissions and the admin/editor/user/role_manager roles.
    pub async fn seed_rbac(&self) -> Result<()> {
        setup_permissions(&self.state.rbac, false).await?;
        Ok(())
    }

    pub async fn create_user(&self, name: &str, email: &str, active: bool) -> Result<Uuid> {
        let user = users::insert_user(&self.pool, name, email, PASSWORD, active).await?;
        Ok(user.id)
    }

    pub async fn create_user_with_role(&self, name: &str, email: &str, role: &str) -> Result<Uuid> {
        let id = self.create_user(name, email, true).await?;
        self.state.rbac.grant_role(id, role).await?;
        Ok(id)
    }

    pub async fn login(&self, email: &str) -> Result<String> {
        let resp = self
            .send("POST", "/auth/login", None, Some(serde_json::json!({ "email": email, "password": PASSWORD })))
            .await?;
        assert_eq!(resp.status, StatusCode::OK, "login failed for {}: {}", email, resp.body);

        let token = resp
            .body
            .get("token")
            .and_then(Value::as_str)
            .context("login response has no token")?;
        Ok(token.to_string())
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<TestResponse> {
        self.send("GET", uri, Some(token), None).await
    }

    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<TestResponse> {
        self.send_with_headers(method, uri, token, body, &[]).await
    }

    pub async fn send_with_headers(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        extra: &[(&str, &str)],
    ) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in extra {
            builder = builder.header(*name, *value);
        }

        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.router.clone().oneshot(req).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok(TestResponse { status, headers, body })
    }

    /// Waits for the activity listener to record `event_name` for `subject_id`.
    pub async fn wait_for_activity(&self, event_name: &str, subject_id: Uuid) -> Result<i64> {
        for _ in 0..50 {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM activity_log WHERE event_name = ? AND subject_id = ?")
                .bind(event_name)
                .bind(subject_id.to_string())
                .fetch_one(&self.pool)
                .await?;
            if count > 0 {
                return Ok(count);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(0)
    }
}

pub fn names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().or_else(|| item.get("name").and_then(Value::as_str)))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
