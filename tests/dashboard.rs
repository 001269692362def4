mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use user_admin::cache::Cache;
use user_admin::routes::dashboard::{ALL_KEY, RECENT_USERS_KEY, STATS_KEY};

use common::spawn_app;

#[tokio::test]
async fn dashboard_reflects_user_writes_immediately() -> Result<()> {
    let app = spawn_app().await?;
    app.seed_rbac().await?;
    app.create_user_with_role("Admin", "admin@example.com", "admin").await?;
    app.create_user("Idle", "idle@example.com", false).await?;
    let token = app.login("admin@example.com").await?;

    let resp = app.get("/dashboard/stats", &token).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, json!({ "users": 2, "active_users": 1, "inactive_users": 1 }));
    assert!(app.state.cache.get(STATS_KEY).is_some(), "stats should be cached after a read");

    // prime the other views too
    app.get("/dashboard/recent-users", &token).await?;
    app.get("/dashboard", &token).await?;

    let resp = app
        .send(
            "POST",
            "/users",
            Some(&token),
            Some(json!({ "name": "Newest", "email": "newest@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(resp.status, StatusCode::CREATED);
    let id = resp.body["id"].clone();

    for key in [STATS_KEY, RECENT_USERS_KEY, ALL_KEY] {
        assert!(app.state.cache.get(key).is_none(), "{} should have been invalidated", key);
    }

    let resp = app.get("/dashboard/stats", &token).await?;
    assert_eq!(resp.body["users"], 3);
    assert_eq!(resp.body["active_users"], 2);

    let resp = app.get("/dashboard/recent-users", &token).await?;
    assert_eq!(resp.body[0]["id"], id);

    let resp = app.send("DELETE", &format!("/users/{}", id.as_str().unwrap_or_default()), Some(&token), None).await?;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app.get("/dashboard", &token).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["stats"]["users"], 2);
    assert!(resp.body["recent_users"]
        .as_array()
        .map(|users| users.iter().all(|u| u["id"] != id))
        .unwrap_or(false));

    Ok(())
}

#[tokio::test]
async fn recent_users_are_capped_at_ten() -> Result<()> {
    let app = spawn_app().await?;
    app.create_user("Viewer", "viewer@example.com", true).await?;
    for i in 0..12 {
        app.create_user(&format!("Bulk {}", i), &format!("bulk{}@example.com", i), true).await?;
    }
    let token = app.login("viewer@example.com").await?;

    let resp = app.get("/dashboard/recent-users", &token).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body.as_array().map(Vec::len), Some(10));

    Ok(())
}

#[tokio::test]
async fn dashboard_requires_authentication() -> Result<()> {
    let app = spawn_app().await?;

    for uri in ["/dashboard", "/dashboard/stats", "/dashboard/recent-users"] {
        let resp = app.send("GET", uri, None, None).await?;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "{}", uri);
    }

    Ok(())
}
