// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store and credential tests against a live PostgreSQL.
//!
//! Set `TEST_DATABASE_URL` (or `DATABASE_URL`) to run; tests are skipped
//! otherwise so `cargo test` stays green on machines without a database.

use berth_core::credentials::CredentialService;
use berth_core::error::CoreError;
use berth_core::ids;
use berth_core::model::{
    DeploymentStatus, PortMapping, ServiceHealth, ServiceStatus, VolumeSpec,
};
use berth_core::scopes::Scope;
use berth_core::store::deployments::NewDeployment;
use berth_core::store::Store;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() && std::env::var("DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL or DATABASE_URL not set");
            return;
        }
    };
}

async fn connect() -> Store {
    let url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .expect("database url");
    let pool = sqlx::PgPool::connect(&url).await.expect("connect");
    berth_core::migrations::run(&pool).await.expect("migrations");
    Store::new(pool)
}

fn unique_chat_id() -> i64 {
    // Unique enough per test run; collisions only recycle a user row.
    (uuid::Uuid::new_v4().as_u128() % (i64::MAX as u128)) as i64
}

async fn new_user(store: &Store) -> berth_core::store::UserRow {
    store
        .users
        .ensure(unique_chat_id(), Some("tester"))
        .await
        .expect("ensure user")
}

#[tokio::test]
async fn ensure_user_is_idempotent_per_chat_id() {
    skip_if_no_db!();
    let store = connect().await;

    let chat_id = unique_chat_id();
    let first = store.users.ensure(chat_id, Some("alice")).await.unwrap();
    let second = store.users.ensure(chat_id, None).await.unwrap();

    assert_eq!(first.user_id, second.user_id);
    // A missing handle on re-registration keeps the stored one.
    assert_eq!(second.handle.as_deref(), Some("alice"));
}

#[tokio::test]
async fn magic_link_round_trip_issues_exactly_one_key() {
    skip_if_no_db!();
    let store = connect().await;
    let creds = CredentialService::new(store.pool().clone());

    let user = new_user(&store).await;
    let link = creds
        .issue_magic_link(&user.user_id, &[Scope::EnvRead, Scope::EnvWrite])
        .await
        .unwrap();
    assert_eq!(link.token.len(), 32);

    let redeemed = creds.redeem_magic_link(&link.token).await.unwrap();
    assert!(redeemed.api_key.starts_with("rw_prod_"));

    // Second redemption of the same token fails.
    let again = creds.redeem_magic_link(&link.token).await;
    assert!(matches!(again, Err(CoreError::Unauthenticated(_))));

    // Exactly one key exists, carrying the link's scopes.
    let keys = store.keys.list_for_user(&user.user_id).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].scopes, vec!["env.read", "env.write"]);
}

#[tokio::test]
async fn racing_redemptions_produce_one_winner() {
    skip_if_no_db!();
    let store = connect().await;
    let creds = CredentialService::new(store.pool().clone());

    let user = new_user(&store).await;
    let link = creds
        .issue_magic_link(&user.user_id, &[Scope::DeployRead])
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        creds.redeem_magic_link(&link.token),
        creds.redeem_magic_link(&link.token),
    );
    assert!(
        a.is_ok() ^ b.is_ok(),
        "exactly one racing redemption must win"
    );

    let keys = store.keys.list_for_user(&user.user_id).await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn authentication_accepts_the_minted_key_and_rejects_mutations() {
    skip_if_no_db!();
    let store = connect().await;
    let creds = CredentialService::new(store.pool().clone());

    let user = new_user(&store).await;
    let link = creds
        .issue_magic_link(&user.user_id, &[Scope::LogsRead])
        .await
        .unwrap();
    let redeemed = creds.redeem_magic_link(&link.token).await.unwrap();

    let (auth_user, auth_key) = creds.authenticate(&redeemed.api_key).await.unwrap();
    assert_eq!(auth_user.user_id, user.user_id);
    assert_eq!(auth_key.key_id, redeemed.key_id);

    // Any single-character mutation of the credential is rejected.
    let mut mutated = redeemed.api_key.clone();
    let last = mutated.pop().unwrap();
    mutated.push(if last == 'A' { 'B' } else { 'A' });
    assert!(creds.authenticate(&mutated).await.is_err());

    assert!(creds.authenticate("rw_prod_nonsense").await.is_err());
}

#[tokio::test]
async fn revoked_keys_stop_authenticating_but_are_not_purged() {
    skip_if_no_db!();
    let store = connect().await;
    let creds = CredentialService::new(store.pool().clone());

    let user = new_user(&store).await;
    let link = creds
        .issue_magic_link(&user.user_id, &[Scope::EnvRead])
        .await
        .unwrap();
    let redeemed = creds.redeem_magic_link(&link.token).await.unwrap();

    assert!(store
        .keys
        .revoke(&user.user_id, &redeemed.key_id)
        .await
        .unwrap());
    assert!(creds.authenticate(&redeemed.api_key).await.is_err());

    // The row survives revocation.
    let keys = store.keys.list_for_user(&user.user_id).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].revoked_at.is_some());

    // Revoking a key the user does not own reports absence.
    assert!(!store.keys.revoke(&user.user_id, "missingmissing00").await.unwrap());
}

#[tokio::test]
async fn environment_names_are_unique_per_user_among_live_rows() {
    skip_if_no_db!();
    let store = connect().await;
    let user = new_user(&store).await;

    let env_id = uuid::Uuid::new_v4().to_string();
    store
        .environments
        .insert(&env_id, &user.user_id, "demo", &format!("overlay_env_demo_{env_id}"))
        .await
        .unwrap();

    let dup = store
        .environments
        .insert(
            &uuid::Uuid::new_v4().to_string(),
            &user.user_id,
            "demo",
            &format!("overlay_env_demo_dup_{env_id}"),
        )
        .await;
    assert!(matches!(dup, Err(CoreError::Conflict(_))));

    // A DELETED row frees the name.
    store
        .environments
        .set_status(&env_id, berth_core::model::EnvironmentStatus::Deleted)
        .await
        .unwrap();
    store
        .environments
        .insert(
            &uuid::Uuid::new_v4().to_string(),
            &user.user_id,
            "demo",
            &format!("overlay_env_demo_again_{env_id}"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn status_transitions_stamp_timestamps_once() {
    skip_if_no_db!();
    let store = connect().await;
    let user = new_user(&store).await;

    let env_id = uuid::Uuid::new_v4().to_string();
    store
        .environments
        .insert(&env_id, &user.user_id, "stamps", &format!("overlay_env_stamps_{env_id}"))
        .await
        .unwrap();

    let deployment_id = uuid::Uuid::new_v4().to_string();
    let sealed = berth_core::crypto::seal_envelope(None, b"{}").unwrap();
    store
        .deployments
        .insert(NewDeployment {
            deployment_id: &deployment_id,
            env_id: &env_id,
            job_id: &ids::new_job_id(),
            image: "nginx",
            tag: "alpine",
            replicas: 1,
            ports: &[PortMapping {
                container: 80,
                host: 8080,
            }],
            env_vars: &sealed,
            volumes: &[VolumeSpec {
                name: "data".into(),
                mount_path: "/data".into(),
            }],
            virtual_host: None,
            virtual_port: None,
            healthcheck_cmd: None,
            cpu_limit: None,
            memory_limit_mb: None,
            git_url: None,
            git_branch: None,
        })
        .await
        .unwrap();

    store
        .deployments
        .set_status(&deployment_id, DeploymentStatus::PullingImage)
        .await
        .unwrap();
    let pulled = store.deployments.get(&deployment_id).await.unwrap().unwrap();
    let started_at = pulled.started_at.expect("started_at stamped");
    assert!(pulled.completed_at.is_none());

    store
        .deployments
        .set_status(&deployment_id, DeploymentStatus::CreatingVolumes)
        .await
        .unwrap();
    store
        .deployments
        .set_status(&deployment_id, DeploymentStatus::Running)
        .await
        .unwrap();

    let running = store.deployments.get(&deployment_id).await.unwrap().unwrap();
    assert_eq!(running.started_at, Some(started_at));
    assert!(running.completed_at.is_some());
}

#[tokio::test]
async fn service_projection_is_one_to_one() {
    skip_if_no_db!();
    let store = connect().await;
    let user = new_user(&store).await;

    let env_id = uuid::Uuid::new_v4().to_string();
    store
        .environments
        .insert(&env_id, &user.user_id, "svc", &format!("overlay_env_svc_{env_id}"))
        .await
        .unwrap();

    let deployment_id = uuid::Uuid::new_v4().to_string();
    let sealed = berth_core::crypto::seal_envelope(None, b"{}").unwrap();
    store
        .deployments
        .insert(NewDeployment {
            deployment_id: &deployment_id,
            env_id: &env_id,
            job_id: &ids::new_job_id(),
            image: "nginx",
            tag: "latest",
            replicas: 1,
            ports: &[],
            env_vars: &sealed,
            volumes: &[],
            virtual_host: None,
            virtual_port: None,
            healthcheck_cmd: None,
            cpu_limit: None,
            memory_limit_mb: None,
            git_url: None,
            git_branch: None,
        })
        .await
        .unwrap();

    store
        .deployments
        .upsert_service(
            &deployment_id,
            "job_svc_abc",
            Some("drv1"),
            ServiceStatus::Creating,
            ServiceHealth::None,
        )
        .await
        .unwrap();
    // Upsert replaces, never duplicates.
    store
        .deployments
        .upsert_service(
            &deployment_id,
            "job_svc_abc",
            Some("drv2"),
            ServiceStatus::Running,
            ServiceHealth::Starting,
        )
        .await
        .unwrap();

    let svc = store
        .deployments
        .get_service(&deployment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(svc.driver_service_id.as_deref(), Some("drv2"));
    assert_eq!(svc.status, "RUNNING");

    // Deleting the deployment cascades the service row.
    store.deployments.delete(&deployment_id).await.unwrap();
    assert!(store
        .deployments
        .get_service(&deployment_id)
        .await
        .unwrap()
        .is_none());
}
