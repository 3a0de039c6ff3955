//! End-to-end tests over real HTTP.
//!
//! Cluster nodes are wiremock servers; an unreachable node is a local port
//! nobody listens on.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vellum_client::{ExecutorConfig, RequestExecutor, ReqwestTransport};
use vellum_core::{
    HttpMethod, HttpRequest, HttpTransport, RequestDescriptor, TransportError, VellumError,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// URL of a local port that refuses connections.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn test_transport_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/databases/orders/docs"))
        .and(query_param("id", "users/1"))
        .and(header("Raft-Request-Id", "abc"))
        .and(body_json(json!({"name": "Ada"})))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!({"ChangeVector": "v1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let mut request = HttpRequest::new(
        HttpMethod::Put,
        format!("{}/databases/orders/docs?id=users/1", server.uri()),
    )
    .with_header("Raft-Request-Id", "abc")
    .with_header("Content-Type", "application/json");
    request.body = Some(serde_json::to_vec(&json!({"name": "Ada"})).unwrap());

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.etag(), Some("\"v1\""));
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["ChangeVector"], "v1");
}

#[tokio::test]
async fn test_transport_reports_refused_connection() {
    let transport = ReqwestTransport::new().unwrap();
    let result = transport
        .send(HttpRequest::new(
            HttpMethod::Get,
            format!("{}/docs", closed_port_url()),
        ))
        .await;

    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_transport_client_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::with_timeout(Duration::from_millis(50)).unwrap();
    let result = transport
        .send(HttpRequest::new(
            HttpMethod::Get,
            format!("{}/slow", server.uri()),
        ))
        .await;

    assert!(matches!(result, Err(TransportError::Timeout)));
}

#[tokio::test]
async fn test_executor_fails_over_across_real_nodes() {
    let healthy = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/databases/orders/docs"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ada"})))
        .expect(1)
        .mount(&healthy)
        .await;

    let config = ExecutorConfig::builder()
        .url(closed_port_url())
        .url(healthy.uri())
        .database("orders")
        .api_key("secret")
        .topology_updates(false)
        .build()
        .unwrap();
    let executor = RequestExecutor::new(config).unwrap();

    let execution = executor
        .execute_detailed(&RequestDescriptor::get("/docs?id=users/1"))
        .await
        .unwrap();

    assert_eq!(execution.result, Some(json!({"name": "Ada"})));
    assert_eq!(execution.failed_attempts.len(), 1);
    assert!(matches!(
        execution.failed_attempts[0].error,
        VellumError::Transport {
            source: TransportError::ConnectionFailed(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_executor_bootstraps_topology_from_server() {
    let seed = MockServer::start().await;
    let data = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/topology"))
        .and(query_param("name", "orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Etag": 12,
            "Nodes": [
                {"Url": data.uri(), "ClusterTag": "B", "Database": "orders", "ServerRole": "Member"},
                {"Url": seed.uri(), "ClusterTag": "A", "Database": "orders", "ServerRole": "Member"}
            ]
        })))
        .expect(1)
        .mount(&seed)
        .await;

    Mock::given(method("GET"))
        .and(path("/databases/orders/stats"))
        .and(header("Topology-Etag", "12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CountOfDocuments": 3})))
        .expect(1)
        .mount(&data)
        .await;

    let config = ExecutorConfig::builder()
        .url(seed.uri())
        .database("orders")
        .build()
        .unwrap();
    let executor = Arc::new(RequestExecutor::new(config).unwrap());

    let stats = executor
        .execute(&RequestDescriptor::get("/stats"))
        .await
        .unwrap();

    assert_eq!(stats, Some(json!({"CountOfDocuments": 3})));
    assert_eq!(executor.topology().etag, 12);
    assert_eq!(executor.topology().nodes[0].cluster_tag, "B");
    executor.close();
}

#[tokio::test]
async fn test_executor_conditional_get_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/databases/orders/docs"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/databases/orders/docs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!({"name": "Ada"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ExecutorConfig::builder()
        .url(server.uri())
        .database("orders")
        .topology_updates(false)
        .build()
        .unwrap();
    let executor = RequestExecutor::new(config).unwrap();
    let read = RequestDescriptor::get("/docs?id=users/1");

    let first = executor.execute_detailed(&read).await.unwrap();
    let second = executor.execute_detailed(&read).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.result, Some(json!({"name": "Ada"})));
}
