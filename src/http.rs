//! JSON-over-HTTP with retry and exponential backoff.
//!
//! Shared by the embedding providers and the answer generator.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::warn;

/// Why a request ultimately failed.
#[derive(Debug)]
pub enum HttpFailure {
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// The request never produced a usable response.
    Transport(String),
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            Self::Transport(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for HttpFailure {}

/// Build a client with a whole-request timeout.
pub fn client_with_timeout(timeout_secs: u64) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// POST `body` to `url` and return the parsed JSON response.
///
/// `service` names the remote API in logs and error messages.
pub async fn post_json_with_retry(
    client: &Client,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
    max_retries: u32,
    service: &str,
) -> Result<Value, HttpFailure> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json::<Value>().await.map_err(|e| {
                        HttpFailure::Transport(format!("{} returned invalid JSON: {}", service, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let failure = HttpFailure::Status {
                    status: status.as_u16(),
                    body: body_text,
                };

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(service, attempt, status = status.as_u16(), "retryable API error");
                    last_err = Some(failure);
                    continue;
                }

                return Err(failure);
            }
            Err(e) => {
                warn!(service, attempt, error = %e, "request failed");
                last_err = Some(HttpFailure::Transport(format!(
                    "{} request failed: {}",
                    service, e
                )));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        HttpFailure::Transport(format!("{} request failed after retries", service))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Hits = Arc<AtomicUsize>;

    async fn flaky_then_ok(State(hits): State<Hits>) -> (StatusCode, Json<Value>) {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "overloaded" })))
        } else {
            (StatusCode::OK, Json(json!({ "ok": true })))
        }
    }

    async fn bad_request(State(hits): State<Hits>) -> (StatusCode, String) {
        hits.fetch_add(1, Ordering::SeqCst);
        (StatusCode::BAD_REQUEST, "invalid model".to_string())
    }

    async fn serve(hits: Hits) -> String {
        let app = Router::new()
            .route("/flaky", post(flaky_then_ok))
            .route("/bad", post(bad_request))
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let hits = Hits::default();
        let base = serve(hits.clone()).await;
        let client = client_with_timeout(5).unwrap();

        let value = post_json_with_retry(
            &client,
            &format!("{}/flaky", base),
            &[],
            &json!({}),
            1,
            "test",
        )
        .await
        .unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let hits = Hits::default();
        let base = serve(hits.clone()).await;
        let client = client_with_timeout(5).unwrap();

        let err = post_json_with_retry(
            &client,
            &format!("{}/bad", base),
            &[],
            &json!({}),
            1,
            "test",
        )
        .await
        .unwrap_err();

        match err {
            HttpFailure::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid model");
            }
            other => panic!("expected status failure, got {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let client = client_with_timeout(5).unwrap();

        let err = post_json_with_retry(
            &client,
            &format!("http://127.0.0.1:{}/x", port),
            &[],
            &json!({}),
            0,
            "test",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HttpFailure::Transport(_)));
    }
}
