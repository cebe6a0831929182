// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chat dispatcher tests: the command surface over a real store.

mod common;

use berth_server::chat::ChatDispatcher;
use common::TestContext;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() && std::env::var("DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL or DATABASE_URL not set");
            return;
        }
    };
}

fn dispatcher(ctx: &TestContext) -> ChatDispatcher {
    ChatDispatcher::new(ctx.creds.clone(), "https://berth.example.com".to_string())
}

fn fresh_chat_id() -> i64 {
    (uuid::Uuid::new_v4().as_u128() % (i64::MAX as u128)) as i64
}

#[tokio::test]
async fn start_registers_and_key_flow_round_trips() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let chat = dispatcher(&ctx);
    let chat_id = fresh_chat_id();

    let welcome = chat.dispatch(chat_id, Some("pat"), "/start").await;
    assert!(welcome.contains("/key"));

    // The user row exists after the first message.
    let user = ctx
        .store
        .users
        .get_by_chat(chat_id)
        .await
        .unwrap()
        .expect("registered");
    assert_eq!(user.handle.as_deref(), Some("pat"));

    // Issue a link and redeem it through the credential service.
    let reply = chat.dispatch(chat_id, None, "/key env.read").await;
    let token = reply
        .split("token=")
        .nth(1)
        .expect("magic-link url in reply")
        .trim();
    assert_eq!(token.len(), 32);
    assert!(reply.contains("https://berth.example.com/auth/verify?token="));

    let redeemed = ctx.creds.redeem_magic_link(token).await.unwrap();
    assert!(redeemed.api_key.starts_with("rw_prod_"));

    // Listing shows the key; revoking removes it from use.
    let listing = chat.dispatch(chat_id, None, "/keys").await;
    assert!(listing.contains(&redeemed.key_id));
    assert!(listing.contains("env.read"));

    let revoke = chat
        .dispatch(chat_id, None, &format!("/revoke {}", redeemed.key_id))
        .await;
    assert!(revoke.contains("revoked"));
    assert!(ctx.creds.authenticate(&redeemed.api_key).await.is_err());
}

#[tokio::test]
async fn notify_toggles_the_preference_row() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let chat = dispatcher(&ctx);
    let chat_id = fresh_chat_id();

    chat.dispatch(chat_id, None, "/start").await;
    let reply = chat.dispatch(chat_id, None, "/notify deployments off").await;
    assert!(reply.contains("disabled"));

    let user = ctx
        .store
        .users
        .get_by_chat(chat_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!user.notify_deployments);
    assert!(user.notify_environments);
}

#[tokio::test]
async fn unknown_commands_get_help() {
    skip_if_no_db!();
    let ctx = TestContext::new().await;
    let chat = dispatcher(&ctx);

    let reply = chat.dispatch(fresh_chat_id(), None, "what is this").await;
    assert!(reply.contains("Commands:"));
}
