mod common;

use std::time::Duration;

use anyhow::Result;
use axum::http::{header, StatusCode};
use serde_json::{json, Value};

use user_admin::auth::ThrottleConfig;
use user_admin::errors::GENERIC_LOGIN_FAILURE;

use common::{names, spawn_app, spawn_app_with, PASSWORD};

#[tokio::test]
async fn login_issues_a_token_that_resolves_roles_and_permissions() -> Result<()> {
    let app = spawn_app().await?;
    app.seed_rbac().await?;
    let id = app.create_user_with_role("Eve Editor", "eve@example.com", "editor").await?;

    let resp = app
        .send("POST", "/auth/login", None, Some(json!({ "email": "EVE@example.com", "password": PASSWORD })))
        .await?;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.body["token_type"], "Bearer");
    assert_eq!(resp.body["user"]["id"], id.to_string());
    assert!(resp.body["user"].get("password_hash").is_none());

    let token = resp.body["token"].as_str().unwrap_or_default().to_string();
    let me = app.get("/auth/me", &token).await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(names(&me.body["roles"]), vec!["editor".to_string()]);
    let permissions = names(&me.body["permissions"]);
    assert!(permissions.contains(&"edit users".to_string()));
    assert!(!permissions.contains(&"delete users".to_string()));

    Ok(())
}

#[tokio::test]
async fn every_login_failure_looks_the_same() -> Result<()> {
    let app = spawn_app().await?;
    app.create_user("Active", "active@example.com", true).await?;
    app.create_user("Dormant", "dormant@example.com", false).await?;

    let attempts = [
        json!({ "email": "active@example.com", "password": "wrong-password" }),
        json!({ "email": "nobody@example.com", "password": PASSWORD }),
        json!({ "email": "dormant@example.com", "password": PASSWORD }),
    ];

    let mut messages = Vec::new();
    for body in attempts {
        let resp = app.send("POST", "/auth/login", None, Some(body)).await?;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "{}", resp.body);
        messages.push(resp.body["message"].clone());
    }

    assert!(messages[0].as_str().unwrap_or_default().contains(GENERIC_LOGIN_FAILURE));
    assert!(messages.iter().all(|m| m == &messages[0]), "messages differ: {:?}", messages);

    Ok(())
}

#[tokio::test]
async fn missing_credentials_are_a_validation_error() -> Result<()> {
    let app = spawn_app().await?;

    let resp = app
        .send("POST", "/auth/login", None, Some(json!({ "email": "", "password": "" })))
        .await?;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn repeated_failures_are_throttled() -> Result<()> {
    let app = spawn_app_with(ThrottleConfig {
        max_attempts: 3,
        decay: Duration::from_secs(60),
    })
    .await?;
    app.create_user("Target", "target@example.com", true).await?;

    let wrong = json!({ "email": "target@example.com", "password": "wrong-password" });
    for _ in 0..3 {
        let resp = app.send("POST", "/auth/login", None, Some(wrong.clone())).await?;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    }

    // even the right password is refused while locked out
    let right = json!({ "email": "target@example.com", "password": PASSWORD });
    let resp = app.send("POST", "/auth/login", None, Some(right)).await?;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = resp
        .headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    assert!((1..=60).contains(&retry_after), "retry-after was {}", retry_after);

    // another account from the same client is unaffected
    app.create_user("Bystander", "bystander@example.com", true).await?;
    app.login("bystander@example.com").await?;

    Ok(())
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_reset_the_throttle() -> Result<()> {
    let app = spawn_app_with(ThrottleConfig {
        max_attempts: 3,
        decay: Duration::from_secs(60),
    })
    .await?;
    app.create_user("Target", "target@example.com", true).await?;

    let wrong = json!({ "email": "target@example.com", "password": "wrong-password" });
    let mut statuses = Vec::new();
    for i in 0..6 {
        let ip = format!("10.0.0.{}", i);
        let resp = app
            .send_with_headers("POST", "/auth/login", None, Some(wrong.clone()), &[("x-forwarded-for", ip.as_str())])
            .await?;
        statuses.push(resp.status);
    }
    assert_eq!(&statuses[..3], &[StatusCode::UNAUTHORIZED; 3]);
    assert!(statuses[3..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS), "{:?}", statuses);

    let right = json!({ "email": "target@example.com", "password": PASSWORD });
    let resp = app
        .send_with_headers("POST", "/auth/login", None, Some(right), &[("x-forwarded-for", "10.0.0.99")])
        .await?;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);

    Ok(())
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() -> Result<()> {
    let app = spawn_app_with(ThrottleConfig {
        max_attempts: 2,
        decay: Duration::from_secs(60),
    })
    .await?;
    app.create_user("Resetter", "reset@example.com", true).await?;

    let wrong = json!({ "email": "reset@example.com", "password": "wrong-password" });
    let resp = app.send("POST", "/auth/login", None, Some(wrong.clone())).await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    app.login("reset@example.com").await?;

    let resp = app.send("POST", "/auth/login", None, Some(wrong)).await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "counter should have been cleared");

    Ok(())
}

#[tokio::test]
async fn logout_revokes_the_token() -> Result<()> {
    let app = spawn_app().await?;
    let id = app.create_user("Leaver", "leaver@example.com", true).await?;
    let token = app.login("leaver@example.com").await?;

    let resp = app.send("POST", "/auth/logout", Some(&token), None).await?;
    assert_eq!(resp.status, StatusCode::OK);

    let me = app.get("/auth/me", &token).await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);

    // a new login works and yields a different token
    let fresh = app.login("leaver@example.com").await?;
    assert_ne!(fresh, token);
    assert_eq!(app.get("/auth/me", &fresh).await?.status, StatusCode::OK);

    assert!(app.wait_for_activity("session.logout", id).await? > 0);

    Ok(())
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() -> Result<()> {
    let app = spawn_app().await?;

    let resp = app.send("GET", "/auth/me", None, None).await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app.get("/users", "not-a-jwt").await?;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], Value::from("token"));

    Ok(())
}

#[tokio::test]
async fn deactivation_ends_existing_sessions() -> Result<()> {
    let app = spawn_app().await?;
    app.seed_rbac().await?;
    app.create_user_with_role("Admin", "admin@example.com", "admin").await?;
    let member = app.create_user_with_role("Member", "member@example.com", "user").await?;

    let admin_token = app.login("admin@example.com").await?;
    let member_token = app.login("member@example.com").await?;
    assert_eq!(app.get("/auth/me", &member_token).await?.status, StatusCode::OK);

    let resp = app
        .send(
            "PUT",
            &format!("/users/{}", member),
            Some(&admin_token),
            Some(json!({ "active": false })),
        )
        .await?;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.body["active"], false);

    let me = app.get("/auth/me", &member_token).await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);

    // the token stays revoked after reactivation
    app.send(
        "PUT",
        &format!("/users/{}", member),
        Some(&admin_token),
        Some(json!({ "active": true })),
    )
    .await?;
    let me = app.get("/auth/me", &member_token).await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert!(app.wait_for_activity("session.terminated", member).await? > 0);

    Ok(())
}
