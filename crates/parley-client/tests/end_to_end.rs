//! Client against a live server: optimistic sends, push merge, read receipts.

use std::sync::Arc;
use std::time::Duration;

use parley_client::{ChatClient, HttpApi, PushConnection};
use parley_core::ids::UserId;
use parley_core::messages::MessageDraft;
use parley_server::{ParleyConfig, ServerHandle};
use parley_store::Database;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot() -> (ServerHandle, String, String) {
    let mut config = ParleyConfig::default();
    config.server.port = 0;
    let handle = parley_server::start(config, Database::in_memory().unwrap())
        .await
        .unwrap();
    let http = format!("http://{}", handle.addr);
    let ws = format!("ws://{}", handle.addr);
    (handle, http, ws)
}

/// Poll `check` until it holds.
async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn conversation_between_two_clients() {
    let (server, http, ws) = boot().await;
    let (alice_api, alice) = HttpApi::signup(&http, "Alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let (bob_api, bob) = HttpApi::signup(&http, "Bob", "bob@example.com", "secret1")
        .await
        .unwrap();

    let alice_client = Arc::new(ChatClient::new(alice.id.clone(), alice_api.clone()));
    let bob_client = Arc::new(ChatClient::new(bob.id.clone(), bob_api.clone()));

    let alice_push = PushConnection::connect(&ws, &alice.id, Some(alice_api.token()))
        .await
        .unwrap();
    let bob_push = PushConnection::connect(&ws, &bob.id, Some(bob_api.token()))
        .await
        .unwrap();
    let pump = Arc::clone(&alice_client);
    tokio::spawn(async move { pump.run_push(alice_push).await });
    let pump = Arc::clone(&bob_client);
    tokio::spawn(async move { pump.run_push(bob_push).await });

    let bob_store = bob_client.store();
    let alice_id = alice.id.clone();
    eventually(|| bob_store.lock().is_online(&alice_id)).await;

    alice_client.open_conversation(bob.id.clone()).await.unwrap();
    bob_client.open_conversation(alice.id.clone()).await.unwrap();

    let sent = alice_client.send(MessageDraft::text("hello bob")).await.unwrap();
    {
        let store = alice_client.store();
        let store = store.lock();
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.entries()[0].message.id, sent.id);
        assert!(!store.entries()[0].is_pending());
    }

    let sent_id = sent.id.clone();
    eventually(|| bob_store.lock().messages().any(|m| m.id == sent_id)).await;

    // Bob reads; Alice's copy flips to read through the receipt push.
    assert_eq!(bob_client.api().unread_counts().await.unwrap().get(&alice.id), Some(&1));
    bob_client.open_conversation(alice.id.clone()).await.unwrap();
    let alice_store = alice_client.store();
    eventually(|| alice_store.lock().messages().all(|m| m.is_read)).await;

    let err = alice_client
        .send(MessageDraft::text("   "))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(alice_client.store().lock().entries().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn typing_and_login() {
    let (server, http, ws) = boot().await;
    let (_, alice) = HttpApi::signup(&http, "Alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let (bob_api, bob) = HttpApi::signup(&http, "Bob", "bob@example.com", "secret1")
        .await
        .unwrap();

    let (alice_api, again) = HttpApi::login(&http, "alice@example.com", "secret1").await.unwrap();
    assert_eq!(again.id, alice.id);
    let bad = HttpApi::login(&http, "alice@example.com", "wrong!!").await.unwrap_err();
    assert_eq!(bad.status(), Some(400));

    let users = alice_api.users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, bob.id);

    let bob_client = Arc::new(ChatClient::new(bob.id.clone(), bob_api));
    let bob_push = PushConnection::connect(&ws, &bob.id, None).await.unwrap();
    let pump = Arc::clone(&bob_client);
    tokio::spawn(async move { pump.run_push(bob_push).await });
    let bob_store = bob_client.store();
    let bob_id = bob.id.clone();
    eventually(|| bob_store.lock().is_online(&bob_id)).await;

    let mut alice_push = PushConnection::connect(&ws, &alice.id, None).await.unwrap();
    alice_push.send_typing(&bob.id, true).await.unwrap();
    let alice_id: UserId = alice.id.clone();
    eventually(|| bob_store.lock().is_typing(&alice_id)).await;

    alice_push.send_typing(&bob.id, false).await.unwrap();
    eventually(|| !bob_store.lock().is_typing(&alice_id)).await;
    alice_push.close().await.unwrap();

    server.shutdown().await;
}
