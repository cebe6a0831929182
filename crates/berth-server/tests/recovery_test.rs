// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recovery supervisor tests: boot reconciliation against the mock
//! driver.

mod common;

use std::sync::atomic::Ordering;

use berth_core::events::DomainEvent;
use berth_core::model::DeploymentStatus;
use berth_server::config::ProxySettings;
use berth_server::recovery::RecoverySupervisor;
use common::TestContext;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() && std::env::var("DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL or DATABASE_URL not set");
            return;
        }
    };
}

// A sweep reconciles every RUNNING row in the shared database, so the
// tests in this file must not interleave.
static SWEEP: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

fn supervisor(ctx: &TestContext) -> RecoverySupervisor {
    RecoverySupervisor::new(
        ctx.store.clone(),
        ctx.driver.clone(),
        ctx.bus.clone(),
        None,
        ProxySettings {
            letsencrypt_email: "ops@example.com".to_string(),
            letsencrypt_staging: false,
        },
    )
}

/// Stand up one RUNNING deployment and return its service name.
async fn running_deployment(ctx: &TestContext, env_name: &str) -> (String, String) {
    let env = ctx
        .environments
        .create(&ctx.user.user_id, env_name)
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
    (
        ticket.job_id.clone(),
        format!("job_{env_name}_{}", ticket.job_id),
    )
}

#[tokio::test]
async fn intact_services_are_left_alone() {
    skip_if_no_db!();
    let _sweep = SWEEP.lock().await;
    let ctx = TestContext::new().await;
    let (_job, service) = running_deployment(&ctx, "rec-intact").await;

    let report = supervisor(&ctx).run().await.unwrap();
    assert!(report.examined >= 1);
    assert_eq!(report.failed, 0);
    assert!(ctx.driver.service_launch(&service).is_some());
}

#[tokio::test]
async fn missing_services_are_relaunched_from_persisted_state() {
    skip_if_no_db!();
    let _sweep = SWEEP.lock().await;
    let ctx = TestContext::new().await;
    let mut events = ctx.bus.subscribe();
    let (job_id, service) = running_deployment(&ctx, "rec-lost").await;

    // Simulate a crash that took the service with it.
    ctx.driver.lose_service(&service);
    assert!(ctx.driver.service_launch(&service).is_none());

    let report = supervisor(&ctx).run().await.unwrap();
    assert!(report.recovered >= 1);

    // The service is back with the persisted spec, still RUNNING.
    let launch = ctx.driver.service_launch(&service).expect("relaunched");
    assert_eq!(launch.image, "nginx:alpine");
    assert!(launch.env.contains(&"APP_MODE=test".to_string()));

    let detail = ctx
        .engine
        .get_status(&ctx.user.user_id, &job_id)
        .await
        .unwrap();
    assert_eq!(detail.deployment.status, "RUNNING");

    let mut recovered = false;
    for _ in 0..8 {
        match tokio::time::timeout(std::time::Duration::from_secs(2), events.recv()).await {
            Ok(Ok(DomainEvent::DeploymentRecovered { job_id: j, .. })) if j == job_id => {
                recovered = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(recovered, "deployment.recovered was not published");
}

#[tokio::test]
async fn lost_networks_are_recreated_before_relaunch() {
    skip_if_no_db!();
    let _sweep = SWEEP.lock().await;
    let ctx = TestContext::new().await;
    let (_job, service) = running_deployment(&ctx, "rec-net").await;

    let env = ctx
        .store
        .environments
        .list_for_user(&ctx.user.user_id)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.name == "rec-net")
        .unwrap();

    ctx.driver.lose_service(&service);
    ctx.driver.lose_network(&env.overlay_name);

    let report = supervisor(&ctx).run().await.unwrap();
    assert!(report.recovered >= 1);
    assert!(ctx.driver.network_names().contains(&env.overlay_name));
    assert!(ctx.driver.service_launch(&service).is_some());
}

#[tokio::test]
async fn unrecoverable_rows_flip_to_failed_and_do_not_block_others() {
    skip_if_no_db!();
    let _sweep = SWEEP.lock().await;
    let ctx = TestContext::new().await;
    let mut events = ctx.bus.subscribe();
    let (job_id, service) = running_deployment(&ctx, "rec-fail").await;

    ctx.driver.lose_service(&service);
    ctx.driver.fail_service_create.store(true, Ordering::SeqCst);

    let report = supervisor(&ctx).run().await.unwrap();
    assert!(report.failed >= 1);
    ctx.driver.fail_service_create.store(false, Ordering::SeqCst);

    let detail = ctx
        .engine
        .get_status(&ctx.user.user_id, &job_id)
        .await
        .unwrap();
    assert_eq!(detail.deployment.status, "FAILED");
    assert!(detail.deployment.error_message.is_some());

    let mut failed = false;
    for _ in 0..8 {
        match tokio::time::timeout(std::time::Duration::from_secs(2), events.recv()).await {
            Ok(Ok(DomainEvent::DeploymentRecoveryFailed { job_id: j, .. })) if j == job_id => {
                failed = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(failed, "deployment.recovery-failed was not published");
}
