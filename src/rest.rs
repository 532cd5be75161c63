//! Retrying HTTP executor
//!
//! Outbound calls go through a bounded retry loop. Transport failures and 5xx
//! responses are retried after a fixed backoff; 4xx responses fail at once.

mod error;

pub use error::{FailedAttempt, RequestError};

use crate::session::SessionConfig;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Read timeout applied to every request
pub const READ_TIMEOUT: Duration = Duration::from_secs(35);
pub const MAX_ATTEMPTS: u32 = 3;
pub const BACKOFF: Duration = Duration::from_secs(2);

/// Retry settings for [`retryable_request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff: BACKOFF,
            timeout: READ_TIMEOUT,
        }
    }
}

/// Status and body of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(|e| RequestError::Decode(e.to_string()))
    }
}

/// Run `send` until it succeeds, fails with a 4xx, or attempts run out.
///
/// Every transport error and every 5xx response is recorded and followed by
/// one backoff sleep. Exhausting all attempts yields
/// [`RequestError::Application`] whose trace holds one entry per attempt.
pub async fn retryable_request<F, Fut, E>(
    config: &SessionConfig,
    url: &str,
    policy: &RetryPolicy,
    mut send: F,
) -> Result<RawResponse, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RawResponse, E>>,
    E: Display,
{
    let mut attempts = Vec::new();

    for attempt in 1..=policy.max_attempts {
        let response = match send().await {
            Ok(response) => response,
            // most of the time a timeout
            Err(e) => {
                tracing::error!(
                    url,
                    attempt,
                    error = %e,
                    "Request failed before a response arrived"
                );
                attempts.push(FailedAttempt::transport(e.to_string()));
                tokio::time::sleep(policy.backoff).await;
                continue;
            }
        };

        if response.status < 400 {
            return Ok(response);
        }

        if response.status < 500 {
            log_failure(config, url, &response, "user");
            return Err(RequestError::user_request(response.status, response.text()));
        }

        log_failure(config, url, &response, "application");
        attempts.push(FailedAttempt::status(response.status, response.text()));
        tokio::time::sleep(policy.backoff).await;
    }

    Err(RequestError::application(
        500,
        format!("Request failed after {} attempts.", policy.max_attempts),
        attempts,
    ))
}

fn log_failure(config: &SessionConfig, url: &str, response: &RawResponse, error_type: &str) {
    tracing::error!(
        url,
        details = %config.log_details(),
        status = response.status,
        error_type,
        response = %response.text(),
        "Request failed"
    );
}

/// Execute a prepared reqwest request and collect its status and body
pub async fn execute(request: reqwest::RequestBuilder) -> Result<RawResponse, reqwest::Error> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?.to_vec();
    Ok(RawResponse { status, body })
}

/// JSON-over-HTTP client with the retry loop built in
#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(policy: RetryPolicy) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| {
                RequestError::application(500, format!("Failed to create HTTP client: {e}"), vec![])
            })?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// POST `body` as JSON, retrying per the policy
    pub async fn post_json(
        &self,
        config: &SessionConfig,
        url: &str,
        body: &Value,
        headers: &[(&str, String)],
    ) -> Result<RawResponse, RequestError> {
        retryable_request(config, url, &self.policy, || {
            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, value.as_str());
            }
            execute(request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn config() -> SessionConfig {
        SessionConfig::new("retry-test")
    }

    fn scripted(
        responses: Vec<Result<RawResponse, String>>,
    ) -> (
        AtomicU32,
        Mutex<VecDeque<Result<RawResponse, String>>>,
    ) {
        (AtomicU32::new(0), Mutex::new(responses.into()))
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let response = retryable_request(&config(), "http://test", &RetryPolicy::default(), || async {
            Ok::<_, String>(RawResponse::new(200, br#"{"response":"hello world"}"#.to_vec()))
        })
        .await
        .unwrap();

        let json: Value = response.json().unwrap();
        assert_eq!(json["response"], "hello world");
        assert_eq!(response.text(), r#"{"response":"hello world"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_on_transport_error_then_succeeds() {
        let (calls, queue) = scripted(vec![
            Err("timeout".to_string()),
            Ok(RawResponse::new(200, b"{}".to_vec())),
        ]);
        let started = tokio::time::Instant::now();

        let result = retryable_request(&config(), "http://test", &RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            let next = queue.lock().unwrap().pop_front().unwrap();
            async move { next }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // exactly one backoff sleep
        assert_eq!(started.elapsed(), BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_request_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let err = retryable_request(&config(), "http://test", &RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(RawResponse::new(404, b"Not Found".to_vec())) }
        })
        .await
        .unwrap_err();

        match err {
            RequestError::UserRequest { code, message } => {
                assert_eq!(code, 404);
                assert_eq!(message, "Not Found");
            }
            other => panic!("Expected UserRequest, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_error_after_all_attempts() {
        let (calls, queue) = scripted(vec![
            Err("timeout".to_string()),
            Ok(RawResponse::new(500, b"Internal Server Error".to_vec())),
            Ok(RawResponse::new(500, b"Internal Server Error".to_vec())),
        ]);
        let started = tokio::time::Instant::now();

        let err = retryable_request(&config(), "http://test", &RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            let next = queue.lock().unwrap().pop_front().unwrap();
            async move { next }
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), 500);
        assert_eq!(err.trace().len(), 3);
        assert_eq!(err.trace()[0], FailedAttempt::transport("timeout"));
        assert_eq!(err.trace()[1].status_code, Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // one backoff after every failed attempt
        assert_eq!(started.elapsed(), BACKOFF * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_count_follows_policy() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
            timeout: READ_TIMEOUT,
        };
        let calls = AtomicU32::new(0);

        let err = retryable_request(&config(), "http://test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<RawResponse, _>("connection reset") }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(err.trace().len(), 5);
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn test_decode_error_on_bad_json() {
        let response = RawResponse::new(200, b"not json".to_vec());
        assert!(matches!(
            response.json::<Value>(),
            Err(RequestError::Decode(_))
        ));
    }
}
