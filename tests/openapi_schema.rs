mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::Value;

use common::spawn_app;

#[test]
fn openapi_documents_every_route() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = user_admin::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let paths = v
        .get("paths")
        .and_then(Value::as_object)
        .expect("paths must exist");

    let expected = [
        ("/auth/login", "post"),
        ("/auth/logout", "post"),
        ("/auth/me", "get"),
        ("/users", "get"),
        ("/users", "post"),
        ("/users/{id}", "delete"),
        ("/users/{id}/roles", "post"),
        ("/users/{id}/permissions", "get"),
        ("/roles", "get"),
        ("/roles/{id}/permissions", "put"),
        ("/permissions/{id}", "put"),
        ("/dashboard/stats", "get"),
        ("/api/health", "get"),
    ];
    for (path, method) in expected {
        let op = paths.get(path).and_then(|item| item.get(method));
        assert!(op.is_some(), "OpenAPI is missing {} {}", method, path);
    }

    let schemas = v
        .pointer("/components/schemas")
        .and_then(Value::as_object)
        .expect("components.schemas must exist");
    for name in ["User", "UserAccess", "RoleDetail", "PermissionSummary", "DashboardStats"] {
        assert!(schemas.contains_key(name), "OpenAPI is missing schema '{}'", name);
    }

    // the credential hash never leaks into the public user schema
    let user_props = schemas
        .get("User")
        .and_then(|u| u.get("properties"))
        .and_then(Value::as_object)
        .expect("User.properties must exist");
    assert!(!user_props.contains_key("password_hash"));

    assert!(v.pointer("/components/securitySchemes/bearerAuth").is_some());
    let servers = v.get("servers").and_then(Value::as_array).cloned().unwrap_or_default();
    assert!(servers.iter().any(|s| s["url"] == "http://localhost:8000"));

    Ok(())
}

#[tokio::test]
async fn openapi_json_is_served() -> Result<()> {
    let app = spawn_app().await?;

    let resp = app.send("GET", "/api-docs/openapi.json", None, None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body.pointer("/paths/~1roles").is_some());

    Ok(())
}
