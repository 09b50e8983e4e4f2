//! Integration tests for the health endpoint.

use http::StatusCode;

use crate::helpers::TestApp;

#[tokio::test]
async fn test_health_reports_engine_status() {
    let app = TestApp::new().await;

    let response = app.request("GET", "/api/health", None, None).await;
    assert_eq!(response.status, StatusCode::OK);

    let data = &response.body["data"];
    assert_eq!(response.body["success"], true);
    assert_eq!(data["status"], "ok");
    assert_eq!(data["database"], "disabled");
    assert_eq!(data["realtime"]["local_clients"], 0);
    assert_eq!(data["realtime"]["live_channels"], 1);
}

#[tokio::test]
async fn test_health_counts_connected_clients() {
    let app = TestApp::new().await;
    let (_first, _first_inbox) = app.connect().await;
    let (_second, _second_inbox) = app.connect().await;

    let response = app.request("GET", "/api/health", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["realtime"]["local_clients"], 2);
    assert_eq!(response.body["data"]["realtime"]["total_clients"], 2);
}
