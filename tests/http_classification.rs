//! HTTP failures from a mock API server, classified and retried.

use mockito::Server;
use ops_resilience::resilience::retry;
use ops_resilience::{Error, ErrorKind, RetryConfig, StandardErrorCode};
use std::time::Duration;

async fn get_json(client: &reqwest::Client, url: &str) -> ops_resilience::Result<serde_json::Value> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::from_response(resp).await);
    }
    Ok(resp.json().await?)
}

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(attempts)
        .with_initial_delay(Duration::from_millis(5))
        .with_jitter(false)
}

#[tokio::test]
async fn test_server_errors_are_retried_until_exhausted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/status")
        .with_status(503)
        .with_body("kibana is restarting")
        .expect(3)
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/api/status", server.url());
    let err = retry::execute(&fast_retry(3), || get_json(&client, &url))
        .await
        .unwrap_err();

    mock.assert_async().await;
    let last = err.last_error().expect("exhausted error carries the last failure");
    assert_eq!(last.kind(), ErrorKind::Transient);
    assert_eq!(last.status_code(), Some(503));
    assert!(last.to_string().contains("kibana is restarting"));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/saved_objects/missing")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/api/saved_objects/missing", server.url());
    let err = retry::execute(&fast_retry(3), || get_json(&client, &url))
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(err.standard_code(), Some(StandardErrorCode::NotFound));
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/search")
        .with_status(429)
        .with_header("retry-after", "7")
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let err = get_json(&client, &format!("{}/api/search", server.url()))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.standard_code(), Some(StandardErrorCode::RateLimited));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let mut server = Server::new_async().await;
    let primary = server
        .mock("GET", "/api/health")
        .with_status(502)
        .expect(1)
        .create_async()
        .await;
    let replica = server
        .mock("GET", "/api/health/replica")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"green"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = reqwest::Client::new();
    // first attempt hits the failing primary, the retry goes to the replica
    let urls = [
        format!("{}/api/health", server.url()),
        format!("{}/api/health/replica", server.url()),
    ];
    let mut attempt = 0usize;
    let body = retry::execute(&fast_retry(3), || {
        let url = &urls[attempt.min(1)];
        attempt += 1;
        get_json(&client, url)
    })
    .await
    .unwrap();

    primary.assert_async().await;
    replica.assert_async().await;
    assert_eq!(body["status"], "green");
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // nothing listens on port 9 (discard) in test environments
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let err = get_json(&client, "http://127.0.0.1:9/").await.unwrap_err();
    assert!(err.is_transient(), "{:?}", err);
}
