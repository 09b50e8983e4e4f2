//! Shared test helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use futures::StreamExt;
use http::{Request, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;

use livebase_api::{AppState, IdentityResolver, JwtIdentityResolver, build_app};
use livebase_core::config::AppConfig;
use livebase_core::types::ClientId;
use livebase_entity::record::{CollectionRegistry, Record};
use livebase_realtime::{Message, RealtimeEngine};

/// Secret shared by the test tokens and the resolver.
pub const SECRET: &str = "integration-secret";

const CONFIG: &str = r#"
[database]
url = "postgres://unused/livebase"

[realtime]
bridge_enabled = false
max_subscriptions_per_client = 3

[auth]
jwt_secret = "integration-secret"
leeway_seconds = 0

[logging]
format = "pretty"

[[collections]]
id = "pbc_users"
name = "users"
kind = "auth"
list_rule = ""
view_rule = ""

[[collections]]
id = "pbc_posts"
name = "posts"
list_rule = ""
view_rule = ""
"#;

/// Test application context
pub struct TestApp {
    /// The Axum app for making test requests
    pub router: Router,
    /// The engine behind the app
    pub engine: RealtimeEngine,
    /// Collections known to the app
    pub collections: Arc<CollectionRegistry>,
}

impl TestApp {
    /// Create a stand-alone app on the in-process bridge
    pub async fn new() -> Self {
        let config = Arc::new(AppConfig::from_toml(CONFIG).expect("Failed to parse test config"));
        let collections = Arc::new(CollectionRegistry::from_configs(&config.collections));

        let engine = RealtimeEngine::in_memory(config.realtime.clone(), Arc::clone(&collections));
        engine.start().await.expect("Failed to start engine");

        let identity: Arc<dyn IdentityResolver> = Arc::new(JwtIdentityResolver::new(
            &config.auth,
            Arc::clone(&collections),
        ));
        let state = AppState::new(config, None, engine.clone(), identity);

        Self {
            router: build_app(state),
            engine,
            collections,
        }
    }

    /// Connect a client directly on the engine and return its id and inbox.
    pub async fn connect(&self) -> (ClientId, mpsc::Receiver<Message>) {
        let session = self.engine.connect().await.expect("Failed to connect");
        let client_id = session.client().id();
        let (tx, mut rx) = mpsc::channel(16);
        let engine = self.engine.clone();
        tokio::spawn(async move {
            engine.serve(session, tx).await;
        });

        let first = rx.recv().await.expect("No connect message");
        assert_eq!(first.name, "PB_CONNECT");
        (client_id, rx)
    }

    /// A record of `collection` built from `row`
    pub fn record(&self, collection: &str, row: Value) -> Record {
        let collection = self.collections.require(collection).expect("Unknown collection");
        Record::from_row(collection, &row).expect("Failed to build record")
    }

    /// Make an HTTP request to the test app
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let body_str = body
            .map(|b| serde_json::to_string(&b).expect("Failed to serialize body"))
            .unwrap_or_default();

        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", "application/json");

        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let req = req
            .body(Body::from(body_str))
            .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body }
    }

    /// Replace the subscriptions of `client_id`
    pub async fn subscribe(
        &self,
        client_id: &str,
        subscriptions: &[&str],
        token: Option<&str>,
    ) -> TestResponse {
        self.request(
            "POST",
            "/api/realtime",
            Some(json!({ "clientId": client_id, "subscriptions": subscriptions })),
            token,
        )
        .await
    }

    /// Open the event stream over HTTP
    pub async fn open_stream(&self) -> EventStream {
        let req = Request::builder()
            .method("GET")
            .uri("/api/realtime")
            .body(Body::empty())
            .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        EventStream {
            body: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }
}

/// Token for a `users` record
pub fn token(user_id: &str, role: &str) -> String {
    let claims = json!({
        "sub": user_id,
        "collection": "users",
        "exp": chrono::Utc::now().timestamp() + 3600,
        "role": role,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("Failed to encode token")
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Parsed JSON body
    pub body: Value,
}

/// One parsed server-sent event
#[derive(Debug, Default)]
pub struct SseEvent {
    pub id: String,
    pub event: String,
    pub data: String,
}

/// Reads server-sent events off a response body
pub struct EventStream {
    body: axum::body::BodyDataStream,
    buffer: String,
}

impl EventStream {
    /// Next non-comment event, failing after two seconds
    pub async fn next_event(&mut self) -> SseEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..end + 2).collect();
                    if let Some(event) = parse_event(&block) {
                        return event;
                    }
                    continue;
                }
                let chunk = self
                    .body
                    .next()
                    .await
                    .expect("Event stream ended")
                    .expect("Failed to read event stream");
                self.buffer.push_str(std::str::from_utf8(&chunk).expect("utf-8"));
            }
        })
        .await
        .expect("Timed out waiting for an event")
    }
}

fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut seen = false;
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("id:") {
            event.id = value.trim_start().to_string();
            seen = true;
        } else if let Some(value) = line.strip_prefix("event:") {
            event.event = value.trim_start().to_string();
            seen = true;
        } else if let Some(value) = line.strip_prefix("data:") {
            event.data.push_str(value.trim_start());
            seen = true;
        }
    }
    seen.then_some(event)
}
