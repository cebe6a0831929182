// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface tests: auth, scopes, rate limits, and the JSON
//! contract, driven through the router without a listener.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use berth_core::scopes::Scope;
use berth_server::http::{self, AppState};
use berth_server::rate_limit::ApiLimits;
use common::TestContext;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() && std::env::var("DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL or DATABASE_URL not set");
            return;
        }
    };
}

fn app(ctx: &TestContext, limits: ApiLimits) -> Router {
    http::router(Arc::new(AppState {
        store: ctx.store.clone(),
        creds: ctx.creds.clone(),
        environments: ctx.environments.clone(),
        engine: ctx.engine.clone(),
        limits,
    }))
}

async fn call(
    router: &Router,
    method: &str,
    path: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(path);
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Mint a key with the given scopes through the magic-link flow.
async fn mint_key(ctx: &TestContext, router: &Router, scopes: &[Scope]) -> String {
    let link = ctx
        .creds
        .issue_magic_link(&ctx.user.user_id, scopes)
        .await
        .unwrap();
    let (status, body) = call(
        router,
        "GET",
        &format!("/auth/verify?token={}", link.token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["apiKey"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_answers_without_credentials() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());

    let (status, body) = call(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn requests_without_a_key_are_unauthenticated() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());

    let (status, body) = call(&router, "GET", "/environments", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = call(
        &router,
        "GET",
        "/environments",
        Some("rw_prod_not-a-real-keypair.not-a-real-secret-not-a-real-se"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn magic_link_redeems_once_and_lists_one_key() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());

    let link = ctx
        .creds
        .issue_magic_link(&ctx.user.user_id, &[Scope::EnvRead, Scope::EnvWrite])
        .await
        .unwrap();

    let (status, body) = call(
        &router,
        "GET",
        &format!("/auth/verify?token={}", link.token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let api_key = body["apiKey"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("rw_prod_"));

    // Second redemption is a 401.
    let (status, _) = call(
        &router,
        "GET",
        &format!("/auth/verify?token={}", link.token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The minted key authenticates and lists exactly itself.
    let (status, body) = call(&router, "GET", "/auth/keys", Some(&api_key), None).await;
    assert_eq!(status, StatusCode::OK);
    let keys = body.as_array().unwrap();
    assert_eq!(keys.len(), 1);
    let scopes = keys[0]["scopes"].as_array().unwrap();
    assert!(scopes.contains(&json!("env.read")));
    assert!(scopes.contains(&json!("env.write")));
    assert!(keys[0]["lastUsedAt"].is_string() || keys[0]["lastUsedAt"].is_null());
}

#[tokio::test]
async fn scope_mismatch_is_forbidden() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());
    let read_only = mint_key(&ctx, &router, &[Scope::EnvRead]).await;

    let (status, body) = call(
        &router,
        "POST",
        "/environments",
        Some(&read_only),
        Some(json!({"name": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // Admin passes everything.
    let admin = mint_key(&ctx, &router, &[Scope::Admin]).await;
    let (status, _) = call(
        &router,
        "POST",
        "/environments",
        Some(&admin),
        Some(json!({"name": "http-admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn environment_routes_enforce_the_error_taxonomy() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());
    let key = mint_key(&ctx, &router, &[Scope::EnvRead, Scope::EnvWrite]).await;

    // Bad name → 400.
    let (status, _) = call(
        &router,
        "POST",
        "/environments",
        Some(&key),
        Some(json!({"name": "bad name!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Create → 201 with camelCase row.
    let (status, body) = call(
        &router,
        "POST",
        "/environments",
        Some(&key),
        Some(json!({"name": "http-env"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "http-env");
    assert_eq!(body["status"], "ACTIVE");
    let env_id = body["environmentId"].as_str().unwrap().to_string();

    // Duplicate → 409.
    let (status, _) = call(
        &router,
        "POST",
        "/environments",
        Some(&key),
        Some(json!({"name": "http-env"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Show includes deployments; unknown id → 404.
    let (status, body) = call(
        &router,
        "GET",
        &format!("/environments/{env_id}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["deployments"].as_array().unwrap().is_empty());

    let (status, _) = call(&router, "GET", "/environments/nope", Some(&key), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Delete, then the row reads as gone and re-delete conflicts.
    let (status, _) = call(
        &router,
        "DELETE",
        &format!("/environments/{env_id}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(
        &router,
        "GET",
        &format!("/environments/{env_id}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(
        &router,
        "DELETE",
        &format!("/environments/{env_id}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn deployment_routes_cover_the_polling_contract() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    // Polling loops below exceed the default general budget.
    let router = app(&ctx, ApiLimits::new(10_000, Duration::from_secs(60)));
    let key = mint_key(
        &ctx,
        &router,
        &[
            Scope::EnvWrite,
            Scope::DeployRead,
            Scope::DeployWrite,
            Scope::LogsRead,
        ],
    )
    .await;

    let (_, env) = call(
        &router,
        "POST",
        "/environments",
        Some(&key),
        Some(json!({"name": "http-dep"})),
    )
    .await;
    let env_id = env["environmentId"].as_str().unwrap();

    let (status, ticket) = call(
        &router,
        "POST",
        "/deployments",
        Some(&key),
        Some(json!({
            "environmentId": env_id,
            "image": "nginx",
            "tag": "alpine",
            "replicas": 1,
            "ports": [{"container": 80, "host": 8080}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "PENDING");
    let job_id = ticket["jobId"].as_str().unwrap().to_string();
    let deployment_id = ticket["deploymentId"].as_str().unwrap().to_string();

    // Poll until RUNNING; observed statuses only ever advance.
    let order = [
        "PENDING",
        "BUILDING_IMAGE",
        "PULLING_IMAGE",
        "CREATING_VOLUMES",
        "STARTING_CONTAINERS",
        "RUNNING",
    ];
    let mut last_index = 0;
    let mut running = false;
    for _ in 0..250 {
        let (status, body) = call(
            &router,
            "GET",
            &format!("/deployments/job/{job_id}"),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let observed = body["status"].as_str().unwrap();
        assert_ne!(observed, "FAILED", "deployment failed unexpectedly");
        let index = order.iter().position(|s| *s == observed).unwrap();
        assert!(index >= last_index, "status went backwards");
        last_index = index;
        if observed == "RUNNING" {
            assert_eq!(body["service"]["status"], "RUNNING");
            assert_eq!(body["environment"]["environmentId"], env_id);
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(running, "deployment never reached RUNNING");

    // Environment-scoped listing is newest-first and owned.
    let (status, listing) = call(
        &router,
        "GET",
        &format!("/deployments/environment/{env_id}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing.as_array().unwrap().len(), 1);

    // Logs come back as a JSON string.
    let (status, body) = call(
        &router,
        "GET",
        &format!("/deployments/{deployment_id}/logs?tail=50"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["logs"].as_str().unwrap().is_empty());

    // Delete and poll → 404.
    let (status, _) = call(
        &router,
        "DELETE",
        &format!("/deployments/{deployment_id}?preserveVolumes=false"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(
        &router,
        "GET",
        &format!("/deployments/job/{job_id}"),
        Some(&key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registry_deploys_are_rate_limited_per_key() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());
    let key = mint_key(&ctx, &router, &[Scope::EnvWrite, Scope::DeployWrite]).await;

    let (_, env) = call(
        &router,
        "POST",
        "/environments",
        Some(&key),
        Some(json!({"name": "http-rate"})),
    )
    .await;
    let env_id = env["environmentId"].as_str().unwrap();

    let mut last = StatusCode::CREATED;
    for _ in 0..6 {
        let (status, _) = call(
            &router,
            "POST",
            "/deployments",
            Some(&key),
            Some(json!({"environmentId": env_id, "image": "nginx"})),
        )
        .await;
        last = status;
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);

    // A different key has its own bucket.
    let other = mint_key(&ctx, &router, &[Scope::DeployWrite]).await;
    let (status, _) = call(
        &router,
        "POST",
        "/deployments",
        Some(&other),
        Some(json!({"environmentId": env_id, "image": "nginx"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn general_budget_applies_to_read_routes() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let router = app(&ctx, ApiLimits::new(2, Duration::from_secs(60)));
    let key = mint_key(&ctx, &router, &[Scope::EnvRead]).await;

    let (first, _) = call(&router, "GET", "/environments", Some(&key), None).await;
    let (second, _) = call(&router, "GET", "/environments", Some(&key), None).await;
    let (third, _) = call(&router, "GET", "/environments", Some(&key), None).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn revocation_is_owner_scoped() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let other = TestContext::new().await;
    let router = app(&ctx, TestContext::limits());

    let key = mint_key(&ctx, &router, &[Scope::EnvRead]).await;
    let victim = other
        .creds
        .issue_magic_link(&other.user.user_id, &[Scope::EnvRead])
        .await
        .unwrap();
    let other_router = app(&other, TestContext::limits());
    let (_, redeemed) = call(
        &other_router,
        "GET",
        &format!("/auth/verify?token={}", victim.token),
        None,
        None,
    )
    .await;
    let victim_key_id = redeemed["apiKey"]
        .as_str()
        .unwrap()
        .strip_prefix("rw_prod_")
        .unwrap()
        .split('.')
        .next()
        .unwrap()
        .to_string();

    // Revoking a foreign key reads as not-found.
    let (status, _) = call(
        &router,
        "POST",
        "/auth/revoke",
        Some(&key),
        Some(json!({"keyId": victim_key_id})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Revoking one's own key works, and the key stops authenticating.
    let own_key_id = key
        .strip_prefix("rw_prod_")
        .unwrap()
        .split('.')
        .next()
        .unwrap()
        .to_string();
    let (status, _) = call(
        &router,
        "POST",
        "/auth/revoke",
        Some(&key),
        Some(json!({"keyId": own_key_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&router, "GET", "/auth/keys", Some(&key), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
