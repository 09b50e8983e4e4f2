//! Integration tests for the realtime endpoints.

use http::StatusCode;
use serde_json::{Value, json};

use crate::helpers::{TestApp, token};

#[tokio::test]
async fn test_stream_starts_with_connect_event() {
    let app = TestApp::new().await;
    let mut stream = app.open_stream().await;

    let event = stream.next_event().await;
    assert_eq!(event.event, "PB_CONNECT");

    let data: Value = serde_json::from_str(&event.data).expect("connect data is JSON");
    assert_eq!(data["clientId"], json!(event.id));
}

#[tokio::test]
async fn test_stream_delivers_subscribed_changes() {
    let app = TestApp::new().await;
    let mut stream = app.open_stream().await;
    let client_id = stream.next_event().await.id;

    let response = app.subscribe(&client_id, &["posts/*"], None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let post = app.record("posts", json!({"id": "p1", "title": "Hello"}));
    assert_eq!(app.engine.after_create(&post).await, 1);

    let event = stream.next_event().await;
    assert_eq!(event.id, client_id);
    assert_eq!(event.event, "posts/*");

    let data: Value = serde_json::from_str(&event.data).expect("change data is JSON");
    assert_eq!(data["action"], "create");
    assert_eq!(data["record"]["id"], "p1");
    assert_eq!(data["record"]["title"], "Hello");
    assert_eq!(data["record"]["collectionName"], "posts");
}

#[tokio::test]
async fn test_unknown_client_is_not_found() {
    let app = TestApp::new().await;

    let unknown = livebase_core::types::ClientId::new().to_string();
    let response = app.subscribe(&unknown, &["posts/*"], None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = app.subscribe("not-a-client-id", &["posts/*"], None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_client_id_is_rejected() {
    let app = TestApp::new().await;

    let response = app.subscribe("", &["posts/*"], None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_too_many_subscriptions_are_rejected() {
    let app = TestApp::new().await;
    let (client_id, _inbox) = app.connect().await;

    let response = app
        .subscribe(
            &client_id.to_string(),
            &["posts/1", "posts/2", "posts/3", "posts/4"],
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .subscribe(&client_id.to_string(), &["posts/1", "posts/2", "posts/3"], None)
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_identity_is_bound_on_first_subscribe() {
    let app = TestApp::new().await;
    let (client_id, _inbox) = app.connect().await;
    let client_id = client_id.to_string();

    let alice = token("u_alice", "editor");
    let bob = token("u_bob", "viewer");

    let response = app.subscribe(&client_id, &["posts/*"], Some(&alice)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app.subscribe(&client_id, &["users/*"], Some(&alice)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app.subscribe(&client_id, &["posts/*"], Some(&bob)).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app.subscribe(&client_id, &["posts/*"], None).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let app = TestApp::new().await;
    let (client_id, _inbox) = app.connect().await;

    let response = app
        .subscribe(&client_id.to_string(), &["posts/*"], Some("not.a.token"))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_changes_skip_unsubscribed_clients() {
    let app = TestApp::new().await;
    let (subscribed, mut subscribed_inbox) = app.connect().await;
    let (_idle, mut idle_inbox) = app.connect().await;

    let response = app
        .subscribe(&subscribed.to_string(), &["posts/p7"], None)
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let post = app.record("posts", json!({"id": "p7", "title": "Only for one"}));
    assert_eq!(app.engine.after_update(&post).await, 1);

    let message = subscribed_inbox.recv().await.expect("change message");
    assert_eq!(message.name, "posts/p7");
    assert!(idle_inbox.try_recv().is_err());
}
