//! Resilient execution of back-end HTTP calls.
//!
//! Every outbound call made by an adapter goes through [`Executor`], which
//! applies one policy in one place:
//!
//! - a timeout per attempt
//! - on 429, a wait for the server's `Retry-After` (or a fallback), then the
//!   same call again; these waits do not consume the attempt budget
//! - on transport failure, exponential backoff (`base * 2^n`) up to
//!   `max_attempts`, then [`ProviderError::Transport`]
//! - any other non-2xx status is returned as [`ProviderError::NotFound`] (404)
//!   or [`ProviderError::Api`] without retrying
//!
//! The HTTP client sits behind [`HttpTransport`] so tests can script
//! responses without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{ProviderError, Result};

/// Header carrying a per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "client-request-id";

/// Request body variants understood by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One logical HTTP call: method, URL, headers and optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_json(body)
    }

    pub fn patch_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, url).with_json(body)
    }

    pub fn post_form(url: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            body: Some(RequestBody::Form(fields)),
            ..Self::new(Method::POST, url)
        }
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    /// Same request against another URL; used to follow next-page links.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }

    /// Looks up a header value, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a form field in a form-encoded body.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            Some(RequestBody::Form(fields)) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Returns the JSON body, if any.
    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            Some(RequestBody::Json(value)) => Some(value),
            _ => None,
        }
    }
}

/// A response reduced to what the executor and adapters need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Internal`] when the body does not decode.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body)
            .map_err(|e| ProviderError::Internal(format!("parse response: {}", e)))
    }
}

/// A request that never produced an HTTP status.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
    pub timed_out: bool,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }
}

/// Sends a single HTTP request once.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> std::result::Result<ApiResponse, TransportFailure>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> std::result::Result<ApiResponse, TransportFailure> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Timeouts, retry budget and pagination bound applied by [`Executor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound for one attempt.
    pub timeout: Duration,
    /// Attempts allowed for transport failures (429 waits excluded).
    pub max_attempts: u32,
    /// First backoff; doubled after every further failure.
    pub backoff_base: Duration,
    /// Wait used when a 429 carries no usable `Retry-After`.
    pub retry_after_fallback: Duration,
    /// Upper bound for any single 429 wait.
    pub max_retry_after: Duration,
    /// Pages followed before a paginated fetch stops.
    pub max_pages: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            retry_after_fallback: Duration::from_secs(5),
            max_retry_after: Duration::from_secs(120),
            max_pages: 50,
        }
    }
}

/// Records of one page plus the URL of the next, if any.
#[derive(Debug, Default)]
pub struct PageParts {
    pub records: Vec<Value>,
    pub next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ODataPage {
    #[serde(default)]
    value: Option<Vec<Value>>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

impl PageParts {
    /// Splits an OData collection page (`value` + `@odata.nextLink`).
    pub fn odata(page: Value) -> Result<Self> {
        let page: ODataPage = serde_json::from_value(page)
            .map_err(|e| ProviderError::Internal(format!("parse page: {}", e)))?;
        Ok(Self {
            records: page.value.unwrap_or_default(),
            next_url: page.next_link.filter(|link| !link.is_empty()),
        })
    }
}

/// Wraps an [`HttpTransport`] with the retry, backoff and pagination policy.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one logical call to completion under the retry policy.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotFound`] on 404
    /// - [`ProviderError::Api`] on any other non-2xx status except 429
    /// - [`ProviderError::Transport`] once `max_attempts` transport failures
    ///   have occurred
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let request = self.tagged(request);
        let mut failures: u32 = 0;

        loop {
            tracing::debug!(method = %request.method, url = %request.url, "sending request");

            match self.attempt(&request).await {
                Ok(response) if response.status == 429 => {
                    let wait = self.retry_after(&response);
                    tracing::warn!(
                        url = %request.url,
                        wait_secs = wait.as_secs(),
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.status == 404 => {
                    return Err(ProviderError::NotFound(response.body));
                }
                Ok(response) => {
                    return Err(ProviderError::Api {
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(failure) => {
                    failures += 1;
                    if failures >= self.policy.max_attempts {
                        tracing::error!(
                            url = %request.url,
                            attempts = failures,
                            error = %failure,
                            "transport retries exhausted"
                        );
                        return Err(ProviderError::Transport {
                            attempts: failures,
                            message: failure.message,
                        });
                    }
                    let backoff = self.backoff(failures);
                    tracing::warn!(
                        url = %request.url,
                        attempt = failures,
                        timed_out = failure.timed_out,
                        backoff_secs = backoff.as_secs(),
                        error = %failure,
                        "transport failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Runs a call and decodes its JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        self.execute(request).await?.json()
    }

    /// Follows next-page links from `first`, converting every record.
    ///
    /// `split` turns a decoded page into records and the next URL; `convert`
    /// turns one record into an item. A record that fails to convert is
    /// logged and skipped. Pages are fetched strictly in sequence and at most
    /// `max_pages` are followed.
    pub async fn paginate<T, S, C>(
        &self,
        first: ApiRequest,
        split: S,
        convert: C,
    ) -> Result<Vec<T>>
    where
        S: Fn(Value) -> Result<PageParts> + Send + Sync,
        C: Fn(Value) -> Result<T> + Send + Sync,
        T: Send,
    {
        let mut items = Vec::new();
        let mut request = first;
        let mut pages = 0usize;

        loop {
            pages += 1;
            let page: Value = self.execute_json(&request).await?;
            let parts = split(page)?;

            for record in parts.records {
                match convert(record) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        tracing::warn!(url = %request.url, error = %e, "skipping malformed record");
                    }
                }
            }

            match parts.next_url {
                Some(next) if pages < self.policy.max_pages => request = request.with_url(next),
                Some(_) => {
                    tracing::warn!(
                        url = %request.url,
                        max_pages = self.policy.max_pages,
                        "page limit reached, returning partial results"
                    );
                    break;
                }
                None => break,
            }
        }

        Ok(items)
    }

    /// One transport call, bounded by the policy timeout whether or not the
    /// transport honours it.
    async fn attempt(
        &self,
        request: &ApiRequest,
    ) -> std::result::Result<ApiResponse, TransportFailure> {
        let timeout = self.policy.timeout;
        match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportFailure {
                message: format!("request timed out after {}s", timeout.as_secs()),
                timed_out: true,
            }),
        }
    }

    fn tagged(&self, request: &ApiRequest) -> ApiRequest {
        if request.header(REQUEST_ID_HEADER).is_some() {
            return request.clone();
        }
        request
            .clone()
            .with_header(REQUEST_ID_HEADER, uuid::Uuid::new_v4().to_string())
    }

    fn retry_after(&self, response: &ApiResponse) -> Duration {
        response
            .header("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.policy.retry_after_fallback)
            .min(self.policy.max_retry_after)
    }

    fn backoff(&self, failures: u32) -> Duration {
        self.policy.backoff_base * 2u32.saturating_pow(failures.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Answers requests from a queue and records every call.
    struct Script {
        replies: Mutex<VecDeque<std::result::Result<ApiResponse, TransportFailure>>>,
        calls: Mutex<Vec<(ApiRequest, Instant)>>,
    }

    impl Script {
        fn new(
            replies: Vec<std::result::Result<ApiResponse, TransportFailure>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(vec![]),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for Script {
        async fn send(
            &self,
            request: &ApiRequest,
            _timeout: Duration,
        ) -> std::result::Result<ApiResponse, TransportFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((request.clone(), Instant::now()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::new("script exhausted")))
        }
    }

    fn executor(script: &Arc<Script>) -> Executor {
        Executor::new(script.clone(), RetryPolicy::default())
    }

    /// Never answers within any reasonable timeout.
    struct Stalled;

    #[async_trait]
    impl HttpTransport for Stalled {
        async fn send(
            &self,
            _request: &ApiRequest,
            _timeout: Duration,
        ) -> std::result::Result<ApiResponse, TransportFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ApiResponse::new(200, "{}"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_cut_off_at_policy_timeout() {
        let executor = Executor::new(Arc::new(Stalled), RetryPolicy::default());
        let started = Instant::now();

        let err = executor
            .execute(&ApiRequest::get("https://api.test/slow"))
            .await
            .unwrap_err();

        match err {
            ProviderError::Transport { attempts, message } => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "request timed out after 30s");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        // three 30s attempts with 1s and 2s backoff between them
        assert_eq!(started.elapsed(), Duration::from_secs(93));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_for_retry_after_then_returns_payload() {
        let script = Script::new(vec![
            Ok(ApiResponse::new(429, "").with_header("Retry-After", "30")),
            Ok(ApiResponse::new(200, r#"{"ok":true}"#)),
        ]);
        let started = Instant::now();

        let response = executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await
            .unwrap();

        assert_eq!(response.body, r#"{"ok":true}"#);
        assert_eq!(script.call_count(), 2);
        let times = script.call_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(30));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_header_uses_fallback() {
        let script = Script::new(vec![
            Ok(ApiResponse::new(429, "")),
            Ok(ApiResponse::new(204, "")),
        ]);

        executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await
            .unwrap();

        let times = script.call_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_wait_is_clamped() {
        let script = Script::new(vec![
            Ok(ApiResponse::new(429, "").with_header("retry-after", "86400")),
            Ok(ApiResponse::new(200, "{}")),
        ]);

        executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await
            .unwrap();

        let times = script.call_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_do_not_consume_attempt_budget() {
        let script = Script::new(vec![
            Err(TransportFailure::new("connection reset")),
            Ok(ApiResponse::new(429, "").with_header("Retry-After", "1")),
            Ok(ApiResponse::new(429, "").with_header("Retry-After", "1")),
            Err(TransportFailure::new("connection reset")),
            Ok(ApiResponse::new(200, "{}")),
        ]);

        let result = executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await;

        assert!(result.is_ok());
        assert_eq!(script.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_exhaust_after_three_attempts() {
        let script = Script::new(vec![
            Err(TransportFailure::new("dns failure")),
            Err(TransportFailure::new("connection reset")),
            Err(TransportFailure::new("timed out")),
            Ok(ApiResponse::new(200, "{}")),
        ]);

        let err = executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await
            .unwrap_err();

        match err {
            ProviderError::Transport { attempts, message } => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "timed out");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(script.call_count(), 3);
        let times = script.call_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test]
    async fn not_found_is_distinct() {
        let script = Script::new(vec![Ok(ApiResponse::new(404, "missing"))]);
        let err = executor(&script)
            .execute(&ApiRequest::get("https://api.test/items/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(body) if body == "missing"));
        assert_eq!(script.call_count(), 1);
    }

    #[tokio::test]
    async fn other_statuses_are_not_retried() {
        let script = Script::new(vec![
            Ok(ApiResponse::new(500, "Internal Server Error")),
            Ok(ApiResponse::new(200, "{}")),
        ]);
        let err = executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await
            .unwrap_err();
        match err {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "Internal Server Error");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(script.call_count(), 1);
    }

    #[tokio::test]
    async fn requests_carry_correlation_id() {
        let script = Script::new(vec![Ok(ApiResponse::new(200, "{}"))]);
        executor(&script)
            .execute(&ApiRequest::get("https://api.test/items"))
            .await
            .unwrap();
        let calls = script.calls.lock().unwrap();
        assert!(calls[0].0.header(REQUEST_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn pagination_follows_next_links_and_skips_bad_records() {
        let script = Script::new(vec![
            Ok(ApiResponse::new(
                200,
                json!({
                    "value": [{"n": 1}, {"bad": true}],
                    "@odata.nextLink": "https://api.test/items?page=2"
                })
                .to_string(),
            )),
            Ok(ApiResponse::new(200, json!({"value": [{"n": 3}]}).to_string())),
        ]);

        let items: Vec<u64> = executor(&script)
            .paginate(
                ApiRequest::get("https://api.test/items").bearer("token"),
                PageParts::odata,
                |record| {
                    record["n"]
                        .as_u64()
                        .ok_or_else(|| ProviderError::Internal("no n".into()))
                },
            )
            .await
            .unwrap();

        assert_eq!(items, vec![1, 3]);
        let calls = script.calls.lock().unwrap();
        assert_eq!(calls[1].0.url, "https://api.test/items?page=2");
        assert_eq!(calls[1].0.header("authorization"), Some("Bearer token"));
    }

    #[tokio::test]
    async fn pagination_stops_at_page_limit() {
        let page = |n: u64| {
            Ok(ApiResponse::new(
                200,
                json!({"value": [{"n": n}], "@odata.nextLink": "https://api.test/next"})
                    .to_string(),
            ))
        };
        let script = Script::new(vec![page(1), page(2), page(3)]);
        let executor = Executor::new(
            script.clone(),
            RetryPolicy {
                max_pages: 2,
                ..RetryPolicy::default()
            },
        );

        let items: Vec<u64> = executor
            .paginate(ApiRequest::get("https://api.test/first"), PageParts::odata, |r| {
                Ok(r["n"].as_u64().unwrap_or_default())
            })
            .await
            .unwrap();

        assert_eq!(items, vec![1, 2]);
        assert_eq!(script.call_count(), 2);
    }

    #[test]
    fn form_requests_expose_fields() {
        let request = ApiRequest::post_form("https://auth.test/token", &[("grant_type", "x")]);
        assert_eq!(request.form_field("grant_type"), Some("x"));
        assert_eq!(request.form_field("missing"), None);
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let value: Value = ApiResponse::new(202, "").json().unwrap();
        assert!(value.is_null());
    }
}
