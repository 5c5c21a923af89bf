//! Unit tests for the live log client against a mock service.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::backoff::ExponentialSettings;

const FAST: ExponentialSettings = ExponentialSettings {
    initial_interval: Duration::from_millis(5),
    max_interval: Duration::from_millis(20),
    max_elapsed: Duration::from_millis(300),
};

fn client(server: &MockServer) -> LogClient {
    LogClient::new(server.uri(), "acct-1", "s3cret", false)
        .expect("client")
        .with_backoff(FAST)
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map_or(0, |requests| requests.len())
}

#[tokio::test]
async fn open_retries_server_errors_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stream"))
        .and(query_param("accountID", "acct-1"))
        .and(query_param("key", "step-1"))
        .and(header(AUTH_HEADER, "s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let logs = client(&server);
    let started = tokio::time::Instant::now();
    logs
        .open("step-1", &CancellationToken::new())
        .await
        .expect("open succeeds on the third attempt");
    assert_eq!(request_count(&server).await, 3);
    assert!(started.elapsed() <= FAST.max_elapsed);
}

#[tokio::test]
async fn open_gives_up_after_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = client(&server)
        .open("step-1", &CancellationToken::new())
        .await
        .expect_err("persistent 503");
    assert_eq!(
        err,
        LogError::Server {
            status: 503,
            message: String::from("overloaded"),
        }
    );
    assert!(err.is_transient());
    assert!(request_count(&server).await > 1);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/blob"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"message": "invalid token"})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .upload("step-1", Bytes::from_static(b"log"), &CancellationToken::new())
        .await
        .expect_err("unauthorised");
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.to_string(), "live log service returned 401: invalid token");
    assert!(!err.is_transient());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn batch_puts_lines_as_json() {
    let server = MockServer::start().await;
    let lines = vec![
        Line {
            number: 0,
            message: String::from("+ cargo build"),
            timestamp: 12,
        },
        Line {
            number: 1,
            message: String::from("   Compiling buildvm"),
            timestamp: 480,
        },
    ];
    Mock::given(method("PUT"))
        .and(path("/stream"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!([
            {"pos": 0, "out": "+ cargo build", "time": 12},
            {"pos": 1, "out": "   Compiling buildvm", "time": 480}
        ])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .batch("step-1", &lines, &CancellationToken::new())
        .await
        .expect("batch accepted");
}

#[tokio::test]
async fn close_is_a_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server)
        .close("step-1", &CancellationToken::new())
        .await
        .expect_err("server error");
    assert_eq!(
        err,
        LogError::Server {
            status: 500,
            message: String::from("Internal Server Error"),
        }
    );
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn upload_sends_raw_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/blob"))
        .and(query_param("key", "step-9"))
        .and(body_bytes(b"line one\nline two\n".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .upload(
            "step-9",
            Bytes::from_static(b"line one\nline two\n"),
            &CancellationToken::new(),
        )
        .await
        .expect("upload");
}

#[tokio::test]
async fn upload_retries_server_errors_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/blob"))
        .and(query_param("key", "step-9"))
        .and(body_bytes(b"full log\n".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let logs = client(&server);
    let started = tokio::time::Instant::now();
    logs
        .upload(
            "step-9",
            Bytes::from_static(b"full log\n"),
            &CancellationToken::new(),
        )
        .await
        .expect("upload succeeds on the third attempt");
    assert_eq!(request_count(&server).await, 3);
    assert!(started.elapsed() <= FAST.max_elapsed);
}

#[tokio::test]
async fn cancelled_token_sends_nothing() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client(&server)
        .open("step-1", &cancel)
        .await
        .expect_err("cancelled");
    assert_eq!(err, LogError::Cancelled);
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .mount(&server)
        .await;

    let err = client(&server)
        .close("step-1", &CancellationToken::new())
        .await
        .expect_err("redirect is an error");
    assert_eq!(err.status(), Some(302));
    assert_eq!(request_count(&server).await, 1);
}
