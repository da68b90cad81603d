mod common;

use common::{json_result, rpc, MockMcpServer, TOKEN};
use salvager_mcp::{PoolOptions, SessionPool};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, query_param};
use wiremock::Mock;

fn quick_options() -> PoolOptions {
    PoolOptions {
        idle_timeout: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(25),
    }
}

#[tokio::test]
async fn same_key_reuses_one_session() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 1).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());

    let first = {
        let session = pool.get_session("default", TOKEN).await.unwrap();
        assert!(session.is_ready());
        session.instance_id()
    };
    let second = pool.get_session("default", TOKEN).await.unwrap().instance_id();

    assert_eq!(first, second);
    assert_eq!(pool.active_session_count().await, 1);
}

#[tokio::test]
async fn different_keys_get_independent_sessions() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 2).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());

    let a = pool.get_session("a", TOKEN).await.unwrap().instance_id();
    let b = pool.get_session("b", TOKEN).await.unwrap().instance_id();

    assert_ne!(a, b);
    assert_eq!(pool.active_session_count().await, 2);
    assert!(pool.contains("a").await && pool.contains("b").await);
}

#[tokio::test]
async fn concurrent_requests_for_one_key_initialize_once() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 1).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());

    // Each future drops its guard before finishing so the other can proceed
    let pool = &pool;
    let checkout = || async move { pool.get_session("shared", TOKEN).await.unwrap().instance_id() };
    let (a, b) = tokio::join!(checkout(), checkout());

    assert_eq!(a, b);
    assert_eq!(mock.requests_for("initialize").await.len(), 1);
}

#[tokio::test]
async fn rotated_token_replaces_the_session() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 2).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());

    let old = pool.get_session("default", "old-token").await.unwrap().instance_id();
    let new = {
        let session = pool.get_session("default", "new-token").await.unwrap();
        assert!(session.uses_token("new-token"));
        session.instance_id()
    };

    assert_ne!(old, new);
    assert_eq!(pool.active_session_count().await, 1);
}

#[tokio::test]
async fn user_sessions_are_keyed_by_user() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 1).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());
    {
        let session = pool.get_user_session("u1", TOKEN).await.unwrap();
        assert_eq!(session.key(), "user:u1");
        assert_eq!(session.owner(), Some("u1"));
    }

    assert!(pool.contains("user:u1").await);
}

#[tokio::test]
async fn sweep_evicts_idle_sessions_only() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 3).await;

    let pool = SessionPool::new(mock.settings(), quick_options());
    drop(pool.get_session("idle", TOKEN).await.unwrap());
    let busy = pool.get_session("busy", TOKEN).await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(pool.sweep().await, 1);
    assert!(!pool.contains("idle").await);
    assert!(pool.contains("busy").await);

    drop(busy);
    assert_eq!(pool.sweep().await, 1);
    assert_eq!(pool.active_session_count().await, 0);

    // An evicted key gets a fresh handshake on the next checkout
    let again = pool.get_session("idle", TOKEN).await.unwrap();
    assert!(again.is_ready());
    assert_eq!(mock.requests_for("initialize").await.len(), 3);
}

#[tokio::test]
async fn fresh_session_survives_sweep() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 1).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());
    drop(pool.get_session("default", TOKEN).await.unwrap());

    assert_eq!(pool.sweep().await, 0);
    assert!(pool.contains("default").await);
}

#[tokio::test]
async fn reaper_evicts_in_the_background() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 2).await;

    let pool = SessionPool::new(mock.settings(), quick_options());
    pool.start();
    drop(pool.get_session("default", TOKEN).await.unwrap());

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(!pool.contains("default").await);
    pool.stop();

    let session = pool.get_session("default", TOKEN).await.unwrap();
    assert!(session.is_ready());
    assert_eq!(mock.requests_for("initialize").await.len(), 2);
}

#[tokio::test]
async fn discarded_session_is_recreated_on_next_checkout() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 2).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());

    let session = pool.get_session("default", TOKEN).await.unwrap();
    let first = session.instance_id();
    session.discard();

    let second = pool.get_session("default", TOKEN).await.unwrap().instance_id();
    assert_ne!(first, second);
}

#[tokio::test]
async fn close_session_and_shutdown() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 2).await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());
    drop(pool.get_session("a", TOKEN).await.unwrap());
    drop(pool.get_session("b", TOKEN).await.unwrap());

    assert!(pool.close_session("a").await);
    assert!(!pool.close_session("a").await);

    pool.start();
    pool.shutdown().await;
    assert!(!pool.is_running());
    assert_eq!(pool.active_session_count().await, 0);
    assert!(!pool.contains("b").await);
}

#[tokio::test]
async fn pooled_session_calls_tools_with_its_session_id() {
    let mock = MockMcpServer::start().await;
    mock.mount_handshake("sess-1", 1).await;
    Mock::given(method("POST"))
        .and(rpc("tools/call"))
        .and(query_param("sessionId", "sess-1"))
        .respond_with(json_result(common::text_content(r#"{"id":"r1"}"#)))
        .expect(2)
        .mount(&mock.server)
        .await;

    let pool = SessionPool::new(mock.settings(), PoolOptions::default());
    for _ in 0..2 {
        let mut session = pool.get_session("default", TOKEN).await.unwrap();
        let result = session.call_tool("get-actor-run", json!({ "runId": "r1" })).await.unwrap();
        assert!(result.success);
    }
}
