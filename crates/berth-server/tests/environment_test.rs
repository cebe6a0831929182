// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment lifecycle tests: creation, public exposure, cascade
//! deletion.

mod common;

use berth_core::error::CoreError;
use berth_core::model::DeploymentStatus;
use berth_docker::Driver;
use berth_server::error::ServerError;
use common::{PROXY_CONTAINER, TestContext};

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() && std::env::var("DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL or DATABASE_URL not set");
            return;
        }
    };
}

#[tokio::test]
async fn create_activates_and_enforces_per_user_uniqueness() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let env = ctx
        .environments
        .create(&ctx.user.user_id, "env-a")
        .await
        .unwrap();
    assert_eq!(env.status, "ACTIVE");
    assert!(env.overlay_name.starts_with("overlay_env_env-a_"));
    assert!(env.driver_network_id.is_some());
    assert!(ctx.driver.network_names().contains(&env.overlay_name));

    let dup = ctx.environments.create(&ctx.user.user_id, "env-a").await;
    assert!(matches!(
        dup,
        Err(ServerError::Core(CoreError::Conflict(_)))
    ));

    // A different user may reuse the logical name.
    let other = TestContext::new().await;
    other
        .environments
        .create(&other.user.user_id, "env-a")
        .await
        .unwrap();
}

#[tokio::test]
async fn bad_names_are_rejected_before_any_side_effect() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    for bad in ["has space", "dot.name", "", "x/y"] {
        let result = ctx.environments.create(&ctx.user.user_id, bad).await;
        assert!(
            matches!(
                result,
                Err(ServerError::Core(CoreError::Validation { .. }))
            ),
            "{bad:?} should be rejected"
        );
    }
    assert!(ctx.driver.network_names().is_empty());
}

#[tokio::test]
async fn make_public_attaches_proxy_and_patches_running_services() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let env = ctx
        .environments
        .create(&ctx.user.user_id, "env-pub")
        .await
        .unwrap();
    let ticket = ctx
        .engine
        .create_from_registry(&ctx.user.user_id, ctx.registry_request(&env.env_id))
        .await
        .unwrap();
    assert_eq!(
        ctx.wait_for_terminal(&ticket.job_id).await,
        DeploymentStatus::Running
    );

    let updated = ctx
        .environments
        .make_public(&ctx.user.user_id, &env.env_id, "app.example.com")
        .await
        .unwrap();
    assert!(updated.is_public);
    assert_eq!(updated.public_domain.as_deref(), Some("app.example.com"));

    // The proxy sidecar is attached to the overlay.
    assert!(ctx
        .driver
        .network_containers(&env.overlay_name)
        .contains(&PROXY_CONTAINER.to_string()));

    // The running service's spec now carries the proxy vars.
    let service_name = format!("job_env-pub_{}", ticket.job_id);
    let service_env = ctx.driver.service_env(&service_name).unwrap();
    assert!(service_env.contains(&"VIRTUAL_HOST=app.example.com".to_string()));
    assert!(service_env.contains(&"LETSENCRYPT_HOST=app.example.com".to_string()));

    // Already public and duplicate domains both conflict.
    let again = ctx
        .environments
        .make_public(&ctx.user.user_id, &env.env_id, "other.example.com")
        .await;
    assert!(matches!(
        again,
        Err(ServerError::Core(CoreError::Conflict(_)))
    ));

    let second = ctx
        .environments
        .create(&ctx.user.user_id, "env-pub2")
        .await
        .unwrap();
    let stolen = ctx
        .environments
        .make_public(&ctx.user.user_id, &second.env_id, "app.example.com")
        .await;
    assert!(matches!(
        stolen,
        Err(ServerError::Core(CoreError::Conflict(_)))
    ));
}

#[tokio::test]
async fn make_public_validates_domains() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let env = ctx
        .environments
        .create(&ctx.user.user_id, "env-dom")
        .await
        .unwrap();

    for bad in ["localhost", "no spaces.com x", "under_score.com!"] {
        let result = ctx
            .environments
            .make_public(&ctx.user.user_id, &env.env_id, bad)
            .await;
        assert!(
            matches!(
                result,
                Err(ServerError::Core(CoreError::Validation { .. }))
            ),
            "{bad:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn cascade_delete_removes_services_volumes_and_network() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let env = ctx
        .environments
        .create(&ctx.user.user_id, "env-del")
        .await
        .unwrap();

    // Two running deployments in the environment.
    let mut tickets = Vec::new();
    for _ in 0..2 {
        let ticket = ctx
            .engine
            .create_from_registry(&ctx.user.user_id, ctx.registry_request(&env.env_id))
            .await
            .unwrap();
        assert_eq!(
            ctx.wait_for_terminal(&ticket.job_id).await,
            DeploymentStatus::Running
        );
        tickets.push(ticket);
    }
    assert_eq!(ctx.driver.service_names().len(), 2);

    ctx.environments
        .delete(&ctx.user.user_id, &env.env_id)
        .await
        .unwrap();

    // No services, no managed volumes for the env, no overlay network.
    assert!(ctx.driver.service_names().is_empty());
    assert!(ctx
        .driver
        .list_volumes_by_label("berth.env_id", &env.env_id)
        .await
        .unwrap()
        .is_empty());
    assert!(!ctx.driver.network_names().contains(&env.overlay_name));

    // No child deployment rows survive.
    assert!(ctx
        .store
        .deployments
        .list_for_env(&env.env_id)
        .await
        .unwrap()
        .is_empty());

    // The environment reads as gone.
    let gone = ctx.environments.get(&ctx.user.user_id, &env.env_id).await;
    assert!(matches!(
        gone,
        Err(ServerError::Core(CoreError::NotFound { .. }))
    ));

    // Deleting again is a conflict, not an error amplifier.
    let again = ctx.environments.delete(&ctx.user.user_id, &env.env_id).await;
    assert!(matches!(
        again,
        Err(ServerError::Core(CoreError::Conflict(_)))
    ));
}

#[tokio::test]
async fn deleted_names_can_be_recreated_with_fresh_overlays() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;

    let first = ctx
        .environments
        .create(&ctx.user.user_id, "env-re")
        .await
        .unwrap();
    ctx.environments
        .delete(&ctx.user.user_id, &first.env_id)
        .await
        .unwrap();

    let second = ctx
        .environments
        .create(&ctx.user.user_id, "env-re")
        .await
        .unwrap();
    assert_ne!(first.env_id, second.env_id);
    assert_ne!(first.overlay_name, second.overlay_name);
}
