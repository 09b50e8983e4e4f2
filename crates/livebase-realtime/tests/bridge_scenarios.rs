//! Multi-instance scenarios: several engines sharing one in-memory hub.

mod helpers;

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;

use livebase_core::error::ErrorKind;
use livebase_core::types::ClientId;
use livebase_entity::record::{Collection, CollectionKind};
use livebase_realtime::{BridgeEnvelope, BridgeTransport, MemoryBridgeHub, Message, SessionEnd};

use helpers::*;

#[tokio::test]
async fn test_create_on_sibling_reaches_remote_client() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let mut client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;

    let post = record(&collections, "posts", json!({"id": "p1", "title": "Hello"}));
    assert_eq!(b.after_create(&post).await, 1);

    let message = client.recv().await;
    assert_eq!(message.name, "posts/*");
    let body = payload(&message);
    assert_eq!(body["action"], json!("create"));
    assert_eq!(body["record"]["title"], json!("Hello"));

    assert_eq!(b.metrics.snapshot().messages_bridged, 1);
    // The connect message plus the bridged create.
    assert_eq!(a.metrics.snapshot().messages_delivered, 2);
    client.assert_quiet().await;
}

#[tokio::test]
async fn test_mirror_is_remote_and_never_uses_a_local_mailbox() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let mut client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;

    let mirror = b.broker.client_by_id(client.id).expect("mirror");
    assert!(mirror.is_remote());
    assert!(!mirror.client().has_mailbox());
    assert_eq!(mirror.channel_id(), a.channel_id());
    assert_eq!(b.broker.total_local_clients(), 0);

    let local = a.broker.client_by_id(client.id).expect("local client");
    assert!(!local.is_remote());

    mirror.send(Message::new("custom", r#"{"hello":"world"}"#));
    let message = client.recv().await;
    assert_eq!(message.name, "custom");
    assert_eq!(message.data_str(), r#"{"hello":"world"}"#);
    assert_eq!(b.metrics.snapshot().messages_delivered, 0);
}

#[tokio::test]
async fn test_new_instance_bootstraps_existing_clients() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;

    let client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");

    let b = node(&hub, Arc::clone(&collections)).await;
    let mirror = b
        .broker
        .client_by_id(client.id)
        .expect("mirrored during start");
    assert!(mirror.is_remote());
    assert_eq!(mirror.client().subscriptions().await, topics(&["posts/*"]));
}

#[tokio::test]
async fn test_expired_instance_clients_are_evicted() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let client = connect(&a).await;
    let client_id = client.id;
    a.set_subscriptions(client_id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client_id).await;

    hub.expire_lease(a.channel_id()).await;
    let report = b.bridge.heartbeat_once().await.expect("heartbeat");
    assert_eq!(report.evicted.len(), 1);
    assert_eq!(report.evicted[0].client_id, client_id);
    assert_eq!(report.evicted[0].channel_id, a.channel_id());
    assert_eq!(b.broker.total_clients(), 0);
    assert!(hub.row(client_id).await.is_none());

    // The stalled owner hears the eviction as well.
    let end = tokio::time::timeout(PROPAGATION, client.task)
        .await
        .expect("session should end")
        .expect("session task");
    assert_eq!(end, SessionEnd::Discarded);
    wait_forgotten(&a, client_id).await;

    let again = b.bridge.heartbeat_once().await.expect("heartbeat");
    assert!(again.evicted.is_empty());
}

#[tokio::test]
async fn test_instance_that_missed_its_eviction_reannounces_clients() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let transport = PartitionedTransport::new(hub.transport());
    let a = node_on(Arc::new(transport.clone()), Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let mut client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;

    transport.partition();
    hub.expire_lease(a.channel_id()).await;
    let report = b.bridge.heartbeat_once().await.expect("sweep");
    assert_eq!(report.evicted.len(), 1);
    assert!(hub.row(client.id).await.is_none());
    assert!(b.broker.client_by_id(client.id).is_none());

    // The eviction is lost on the way to a.
    tokio::time::sleep(QUIET).await;
    assert!(a.broker.client_by_id(client.id).is_some());

    transport.heal();
    let report = a.bridge.heartbeat_once().await.expect("heartbeat");
    assert_eq!(report.reannounced, 1);
    assert!(report.evicted.is_empty());
    assert!(hub.row(client.id).await.is_some());
    wait_known(&b, client.id).await;

    let post = record(&collections, "posts", json!({"id": "p1"}));
    assert_eq!(b.after_create(&post).await, 1);
    let message = client.recv().await;
    assert_eq!(message.name, "posts/*");
    assert_eq!(payload(&message)["record"]["id"], json!("p1"));

    let again = a.bridge.heartbeat_once().await.expect("heartbeat");
    assert_eq!(again.reannounced, 0);
}

#[tokio::test]
async fn test_identity_refresh_reaches_mirror_and_rules() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let mut client = connect(&b).await;
    b.set_subscriptions(
        client.id,
        Some(user(&collections, "u1", "viewer")),
        &topics(&["drafts/*"]),
    )
    .await
    .expect("subscribe");
    wait_known(&a, client.id).await;

    let first = record(&collections, "drafts", json!({"id": "d1"}));
    assert_eq!(a.after_create(&first).await, 0);
    client.assert_quiet().await;

    let promoted = record(&collections, "users", json!({"id": "u1", "role": "editor"}));
    b.after_update(&promoted).await;

    let (engine, client_id) = (&a, client.id);
    eventually("refreshed identity on the mirror", move || async move {
        match engine.broker.client_by_id(client_id) {
            Some(mirror) => {
                mirror
                    .client()
                    .auth()
                    .await
                    .and_then(|auth| auth.get("role"))
                    == Some(json!("editor"))
            }
            None => false,
        }
    })
    .await;

    let second = record(&collections, "drafts", json!({"id": "d2"}));
    assert_eq!(a.after_create(&second).await, 1);
    let message = client.recv().await;
    assert_eq!(message.name, "drafts/*");
    assert_eq!(payload(&message)["record"]["id"], json!("d2"));
}

#[tokio::test]
async fn test_delete_crosses_instances_only_after_commit() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let mut client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/p1"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;

    let post = record(&collections, "posts", json!({"id": "p1"}));
    assert_eq!(b.before_delete(&post).await, 1);
    client.assert_quiet().await;

    assert_eq!(b.after_delete(&post).await, 1);
    let message = client.recv().await;
    assert_eq!(payload(&message)["action"], json!("delete"));

    assert_eq!(b.after_delete(&post).await, 0);
    client.assert_quiet().await;
}

#[tokio::test]
async fn test_connecting_without_subscriptions_writes_nothing() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let mut notifications = hub.transport().listen().await.expect("listen");

    let idle = connect(&a).await;
    let active = connect(&a).await;
    a.set_subscriptions(active.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");

    let first = tokio::time::timeout(PROPAGATION, notifications.next())
        .await
        .expect("notification should arrive")
        .expect("stream open")
        .expect("notification");
    assert!(matches!(
        first,
        BridgeEnvelope::SubscriptionUpsert { client_id, .. } if client_id == active.id
    ));
    assert!(hub.row(idle.id).await.is_none());
    assert_eq!(hub.row_count().await, 1);
}

#[tokio::test]
async fn test_empty_subscriptions_take_client_offline() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;
    assert!(hub.row(client.id).await.is_some());

    a.set_subscriptions(client.id, None, &[])
        .await
        .expect("clear");
    assert!(hub.row(client.id).await.is_none());
    wait_forgotten(&b, client.id).await;

    // The connection itself stays open.
    assert!(a.broker.client_by_id(client.id).is_some());
}

#[tokio::test]
async fn test_subscription_change_landing_on_sibling() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let mut client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;

    b.set_subscriptions(client.id, None, &topics(&["posts/p9"]))
        .await
        .expect("sibling accepts the change");

    let (engine, client_id) = (&a, client.id);
    eventually("owner to apply the sibling's change", move || async move {
        match engine.broker.client_by_id(client_id) {
            Some(local) => local.client().subscriptions().await == topics(&["posts/p9"]),
            None => false,
        }
    })
    .await;

    let post = record(&collections, "posts", json!({"id": "p9"}));
    assert_eq!(a.after_create(&post).await, 1);
    assert_eq!(client.recv().await.name, "posts/p9");
}

#[tokio::test]
async fn test_identity_mismatch_is_rejected_on_any_instance() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let client = connect(&a).await;
    a.set_subscriptions(
        client.id,
        Some(user(&collections, "u1", "viewer")),
        &topics(&["posts/*"]),
    )
    .await
    .expect("subscribe");
    wait_known(&b, client.id).await;

    for engine in [&a, &b] {
        let err = engine
            .set_subscriptions(
                client.id,
                Some(user(&collections, "u2", "viewer")),
                &topics(&["posts/*"]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authorization);

        let err = engine
            .set_subscriptions(client.id, None, &topics(&["posts/*"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authorization);
    }

    let err = b
        .set_subscriptions(ClientId::new(), None, &topics(&["posts/*"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_unknown_identity_collection_is_not_mirrored_as_guest() {
    let hub = MemoryBridgeHub::new();
    let a_collections = registry();
    a_collections.insert(Collection {
        kind: CollectionKind::Auth,
        ..Collection::public("pbc_staff", "staff")
    });
    let b_collections = registry();
    let a = node(&hub, Arc::clone(&a_collections)).await;
    let b = node(&hub, Arc::clone(&b_collections)).await;

    let mut staff = connect(&a).await;
    let identity = Arc::new(record(&a_collections, "staff", json!({"id": "s1"})));
    a.set_subscriptions(staff.id, Some(identity), &topics(&["posts/*"]))
        .await
        .expect("subscribe");

    let mut guest = connect(&a).await;
    a.set_subscriptions(guest.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");

    // Notifications are applied in order, so once the guest is known the
    // staff client's upsert has been handled.
    wait_known(&b, guest.id).await;
    assert!(b.broker.client_by_id(staff.id).is_none());

    let post = record(&b_collections, "posts", json!({"id": "p1"}));
    assert_eq!(b.after_create(&post).await, 1);
    assert_eq!(guest.recv().await.name, "posts/*");
    staff.assert_quiet().await;
}

#[tokio::test]
async fn test_duplicate_and_stale_notifications_are_harmless() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let client = connect(&a).await;
    a.set_subscriptions(client.id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client.id).await;

    let row = hub.row(client.id).await.expect("stored row");
    b.bridge.apply(BridgeEnvelope::upsert(&row)).await;
    b.bridge.apply(BridgeEnvelope::upsert(&row)).await;
    b.bridge
        .apply(BridgeEnvelope::upsert(&row).without_row())
        .await;
    assert_eq!(b.broker.total_clients(), 1);

    b.bridge
        .apply(BridgeEnvelope::SubscriptionDelete {
            client_id: ClientId::new(),
            updated_by: a.channel_id(),
        })
        .await;
    assert_eq!(b.broker.total_clients(), 1);

    // An echo of b's own write is ignored.
    b.bridge
        .apply(BridgeEnvelope::SubscriptionDelete {
            client_id: client.id,
            updated_by: b.channel_id(),
        })
        .await;
    assert!(b.broker.client_by_id(client.id).is_some());
}

#[tokio::test]
async fn test_shutdown_withdraws_clients_from_siblings() {
    let hub = MemoryBridgeHub::new();
    let collections = registry();
    let a = node(&hub, Arc::clone(&collections)).await;
    let b = node(&hub, Arc::clone(&collections)).await;

    let client = connect(&a).await;
    let client_id = client.id;
    a.set_subscriptions(client_id, None, &topics(&["posts/*"]))
        .await
        .expect("subscribe");
    wait_known(&b, client_id).await;

    a.shutdown().await.expect("shutdown");
    let end = tokio::time::timeout(PROPAGATION, client.task)
        .await
        .expect("session should end")
        .expect("session task");
    assert_eq!(end, SessionEnd::Discarded);

    wait_forgotten(&b, client_id).await;
    assert_eq!(hub.row_count().await, 0);

    let status = b.status().await.expect("status");
    assert_eq!(status.live_channels, 1);
    assert_eq!(status.total_clients, 0);
}
