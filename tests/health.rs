mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::Value;

use common::spawn_app;

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let app = spawn_app().await?;

    let resp = app.send("GET", "/api/health", None, None).await?;
    assert_eq!(resp.status, StatusCode::OK, "health endpoint did not return 200");

    let db_ok = resp.body.get("db_ok").and_then(Value::as_bool).unwrap_or(false);
    assert!(db_ok, "expected db_ok: true, got: {}", resp.body);
    assert_eq!(resp.body["status"], "ok");
    assert_eq!(resp.body["cache_enabled"], true);

    Ok(())
}

#[tokio::test]
async fn health_reports_a_closed_pool_as_degraded() -> Result<()> {
    let app = spawn_app().await?;
    app.pool.close().await;

    let resp = app.send("GET", "/api/health", None, None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["status"], "degraded");
    assert_eq!(resp.body["db_ok"], false);
    assert!(resp.body["db_error"].is_string());

    Ok(())
}
