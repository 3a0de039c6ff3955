//! Raw request commands - send an arbitrary route through the executor.

use super::ConnectionArgs;
use anyhow::{Context, Result};
use vellum_client::RequestExecutor;
use vellum_core::{HttpMethod, RequestDescriptor};

/// Options for the send command.
#[derive(Debug, Clone)]
pub struct SendOptions<'a> {
    /// HTTP method.
    pub method: HttpMethod,
    /// Route relative to the database (or server with `server_scoped`).
    pub route: &'a str,
    /// JSON body.
    pub body: Option<&'a str>,
    /// Attach an idempotency token.
    pub raft: bool,
    /// Send to the server root instead of the database.
    pub server_scoped: bool,
    /// Version the target must be at.
    pub expected_version: Option<&'a str>,
}

/// Run the get command.
pub async fn get(
    conn: &ConnectionArgs,
    route: &str,
    server_scoped: bool,
    required: bool,
) -> Result<()> {
    let mut descriptor = RequestDescriptor::get(route);
    if server_scoped {
        descriptor = descriptor.server_scoped();
    }
    if required {
        descriptor = descriptor.require_existence();
    }

    let executor = conn.connect()?;
    let result = run(&executor, &descriptor).await;
    executor.close();

    match result? {
        Some(value) => println!("{}", value),
        None => eprintln!("Not found: {}", route),
    }
    Ok(())
}

/// Run the send command.
pub async fn send(conn: &ConnectionArgs, options: SendOptions<'_>) -> Result<()> {
    let descriptor = build_descriptor(&options)?;

    let executor = conn.connect()?;
    let result = run(&executor, &descriptor).await;
    executor.close();

    if let Some(value) = result? {
        println!("{}", value);
    }
    Ok(())
}

fn build_descriptor(options: &SendOptions<'_>) -> Result<RequestDescriptor> {
    let mut descriptor = RequestDescriptor::new(options.method, options.route);

    if let Some(body) = options.body {
        let value: serde_json::Value =
            serde_json::from_str(body).context("--body must be valid JSON")?;
        descriptor = descriptor.with_json_body(&value)?;
    }
    if options.raft {
        descriptor = descriptor.raft();
    }
    if options.server_scoped {
        descriptor = descriptor.server_scoped();
    }
    if let Some(version) = options.expected_version {
        descriptor = descriptor.expect_version(version);
    }
    Ok(descriptor)
}

/// Execute and pretty-print the JSON result.
async fn run(
    executor: &RequestExecutor,
    descriptor: &RequestDescriptor,
) -> Result<Option<String>> {
    tracing::info!(method = %descriptor.method, route = %descriptor.route, "Sending request");

    let execution = executor.execute_detailed(descriptor).await?;
    for failure in &execution.failed_attempts {
        tracing::warn!(node = %failure.node.url, error = %failure.error, "Attempt failed");
    }
    tracing::info!(
        node = %execution.node.url,
        from_cache = execution.from_cache,
        "Request completed"
    );

    execution
        .result
        .map(|value| serde_json::to_string_pretty(&value))
        .transpose()
        .context("Failed to format response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(route: &str) -> SendOptions<'_> {
        SendOptions {
            method: HttpMethod::Put,
            route,
            body: None,
            raft: false,
            server_scoped: false,
            expected_version: None,
        }
    }

    #[test]
    fn descriptor_from_options() {
        let descriptor = build_descriptor(&SendOptions {
            body: Some(r#"{"name": "Ada"}"#),
            raft: true,
            expected_version: Some("V1"),
            ..options("/docs?id=users/1")
        })
        .unwrap();

        assert_eq!(descriptor.method, HttpMethod::Put);
        assert!(descriptor.raft_id_required);
        assert_eq!(descriptor.expected_version.as_deref(), Some("V1"));
        let body: serde_json::Value =
            serde_json::from_slice(descriptor.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"name": "Ada"}));
    }

    #[test]
    fn invalid_body_is_rejected() {
        let err = build_descriptor(&SendOptions {
            body: Some("{not json"),
            ..options("/docs")
        })
        .unwrap_err();
        assert!(err.to_string().contains("--body"));
    }

    #[tokio::test]
    async fn send_carries_raft_id_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/admin/databases"))
            .and(header_exists("Raft-Request-Id"))
            .and(body_json(json!({"Name": "orders"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"RaftCommandIndex": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let conn = ConnectionArgs {
            urls: vec![server.uri()],
            ..Default::default()
        };
        let result = send(
            &conn,
            SendOptions {
                body: Some(r#"{"Name": "orders"}"#),
                raft: true,
                server_scoped: true,
                ..options("/admin/databases")
            },
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn get_reads_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/databases/orders/docs"))
            .and(query_param("id", "users/1"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ada"})))
            .mount(&server)
            .await;

        let conn = ConnectionArgs {
            urls: vec![server.uri()],
            database: Some("orders".into()),
            ..Default::default()
        };
        let executor = conn.connect().unwrap();
        let out = run(&executor, &RequestDescriptor::get("/docs?id=users/1"))
            .await
            .unwrap();
        executor.close();

        let value: serde_json::Value = serde_json::from_str(&out.unwrap()).unwrap();
        assert_eq!(value, json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn required_read_fails_on_missing_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/databases/orders/docs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let conn = ConnectionArgs {
            urls: vec![server.uri()],
            database: Some("orders".into()),
            ..Default::default()
        };
        assert!(get(&conn, "/docs?id=users/404", false, true).await.is_err());
        assert!(get(&conn, "/docs?id=users/404", false, false).await.is_ok());
    }
}
