//! RFC 8628 Device Authorization Grant.
//!
//! Used when no cached refresh token can produce an access token. The user
//! is shown a verification URL and a one-time code, completes sign-in on any
//! browser, and this module polls the token endpoint until that happens or
//! the code expires.
//!
//! # Flow Overview
//!
//! 1. Request a device code from the authorization server.
//! 2. Present `user_code` and `verification_uri` through a [`DevicePrompt`].
//! 3. Poll the token endpoint every `interval` seconds (`slow_down` adds 5).
//!
//! Both endpoints are called through the [`Executor`], so rate limiting and
//! transport retries behave as for every other back-end call.

use std::time::Duration;

use serde::Deserialize;

use crate::providers::executor::{ApiRequest, ApiResponse, Executor};
use crate::providers::{ProviderError, Result};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Endpoints and client identity for one device flow.
#[derive(Debug, Clone)]
pub struct DeviceCodeConfig {
    pub client_id: String,
    /// Sent on token requests for confidential clients.
    pub client_secret: Option<String>,
    pub device_auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// What the user needs to complete authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Human-readable instruction supplied by the server, if any.
    pub message: Option<String>,
    /// Lifetime of the code in seconds.
    pub expires_in: u64,
    /// Minimum polling interval in seconds.
    pub interval: u64,
}

impl DeviceCode {
    /// Instruction to show the user.
    pub fn instructions(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                self.verification_uri, self.user_code
            )
        })
    }
}

/// Raw device authorization response.
///
/// Some servers use `verification_url` instead of `verification_uri`.
#[derive(Debug, Deserialize)]
struct RawDeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: Option<String>,
    verification_url: Option<String>,
    message: Option<String>,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Tokens issued by a successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

/// OAuth error body (`error` + `error_description`).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Decodes a successful token endpoint response.
pub(crate) fn parse_token_grant(response: &ApiResponse) -> Result<TokenGrant> {
    let raw: RawTokenResponse = serde_json::from_str(&response.body)
        .map_err(|e| ProviderError::Authentication(format!("invalid token response: {}", e)))?;
    Ok(TokenGrant {
        access_token: raw.access_token,
        refresh_token: raw.refresh_token,
        expires_in: raw.expires_in.unwrap_or(3600),
        scopes: raw
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
    })
}

/// Turns an authorization-server failure into an auth error carrying the
/// server's own description.
pub(crate) fn authorization_error(context: &str, response: &ApiResponse) -> ProviderError {
    match serde_json::from_str::<OAuthErrorResponse>(&response.body) {
        Ok(err) => ProviderError::Authentication(format!(
            "{context}: {} ({})",
            err.error_description.unwrap_or_else(|| err.error.clone()),
            err.error
        )),
        Err(_) => ProviderError::Authentication(format!(
            "{context}: HTTP {}: {}",
            response.status, response.body
        )),
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Shows the verification URL and user code to a human.
#[cfg_attr(test, mockall::automock)]
pub trait DevicePrompt: Send + Sync {
    fn present(&self, code: &DeviceCode);
}

/// Prints the server's instruction to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompt;

impl DevicePrompt for ConsolePrompt {
    fn present(&self, code: &DeviceCode) {
        tracing::info!(
            verification_uri = %code.verification_uri,
            expires_in = code.expires_in,
            "device authorization required"
        );
        eprintln!("{}", code.instructions());
    }
}

// ---------------------------------------------------------------------------
// Device code flow
// ---------------------------------------------------------------------------

/// Runs one device authorization grant against an authorization server.
pub struct DeviceCodeFlow {
    config: DeviceCodeConfig,
    executor: Executor,
}

impl DeviceCodeFlow {
    pub fn new(config: DeviceCodeConfig, executor: Executor) -> Self {
        Self { config, executor }
    }

    /// Requests a device code.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Authentication`] if the server refuses or the
    /// response is unusable, [`ProviderError::Transport`] if it is unreachable.
    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        let scope = self.config.scopes.join(" ");
        let request = ApiRequest::post_form(
            &self.config.device_auth_url,
            &[("client_id", self.config.client_id.as_str()), ("scope", scope.as_str())],
        );

        tracing::debug!(device_auth_url = %self.config.device_auth_url, "requesting device code");

        let response = self.send(&request).await?;
        if !response.is_success() {
            return Err(authorization_error("device code request failed", &response));
        }

        let raw: RawDeviceCodeResponse = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::Authentication(format!("invalid device code response: {}", e))
        })?;
        let verification_uri = raw.verification_uri.or(raw.verification_url).ok_or_else(|| {
            ProviderError::Authentication(
                "device code response missing verification_uri".to_string(),
            )
        })?;

        Ok(DeviceCode {
            device_code: raw.device_code,
            user_code: raw.user_code,
            verification_uri,
            message: raw.message,
            expires_in: raw.expires_in,
            interval: raw.interval.max(1),
        })
    }

    /// Polls the token endpoint until the user completes authorization.
    ///
    /// Gives up once the code's `expires_in` has elapsed. A poll whose
    /// transport retries are exhausted is logged and polling continues.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Authentication`] if the user denies access,
    /// the code expires, or the server reports any other error.
    pub async fn poll_for_token(&self, code: &DeviceCode) -> Result<TokenGrant> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = code.interval;

        tracing::debug!(interval, expires_in = code.expires_in, "polling for device code token");

        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;

            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Authentication(
                    "device code expired before the user completed authorization".to_string(),
                ));
            }

            let mut fields = vec![
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", code.device_code.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ];
            if let Some(secret) = self.config.client_secret.as_deref() {
                fields.push(("client_secret", secret));
            }
            let request = ApiRequest::post_form(&self.config.token_url, &fields);

            let response = match self.send(&request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "device code poll failed, will retry");
                    continue;
                }
            };

            if response.is_success() {
                tracing::info!("device code flow completed");
                return parse_token_grant(&response);
            }

            let poll_error = serde_json::from_str::<OAuthErrorResponse>(&response.body)
                .map_err(|_| authorization_error("unexpected token response", &response))?;

            match poll_error.error.as_str() {
                "authorization_pending" => {
                    tracing::trace!("authorization pending, will retry");
                }
                "slow_down" => {
                    // RFC 8628 section 3.5
                    interval += 5;
                    tracing::debug!(new_interval = interval, "slow_down received");
                }
                "access_denied" => {
                    return Err(authorization_error("user denied authorization", &response));
                }
                "expired_token" => {
                    return Err(authorization_error("device code expired", &response));
                }
                _ => return Err(authorization_error("device code flow failed", &response)),
            }
        }
    }

    /// Non-2xx answers come back as responses so their OAuth error body can
    /// be read.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        match self.executor.execute(request).await {
            Ok(response) => Ok(response),
            Err(ProviderError::Api { status, body }) => Ok(ApiResponse::new(status, body)),
            Err(ProviderError::NotFound(body)) => Ok(ApiResponse::new(404, body)),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::executor::{HttpTransport, RetryPolicy, TransportFailure};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct Script {
        replies: Mutex<VecDeque<std::result::Result<ApiResponse, TransportFailure>>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl Script {
        fn new(replies: Vec<std::result::Result<ApiResponse, TransportFailure>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for Script {
        async fn send(
            &self,
            request: &ApiRequest,
            _timeout: Duration,
        ) -> std::result::Result<ApiResponse, TransportFailure> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::new("script exhausted")))
        }
    }

    fn flow(script: &Arc<Script>) -> DeviceCodeFlow {
        DeviceCodeFlow::new(config(), Executor::new(script.clone(), RetryPolicy::default()))
    }

    fn config() -> DeviceCodeConfig {
        DeviceCodeConfig {
            client_id: "client".to_string(),
            client_secret: Some("secret".to_string()),
            device_auth_url: "https://login.test/devicecode".to_string(),
            token_url: "https://login.test/token".to_string(),
            scopes: vec!["User.Read".to_string(), "offline_access".to_string()],
        }
    }

    fn code(expires_in: u64) -> DeviceCode {
        DeviceCode {
            device_code: "dev".to_string(),
            user_code: "ABCD-1234".to_string(),
            verification_uri: "https://login.test/device".to_string(),
            message: None,
            expires_in,
            interval: 5,
        }
    }

    fn pending(error: &str) -> std::result::Result<ApiResponse, TransportFailure> {
        Ok(ApiResponse::new(
            400,
            format!(r#"{{"error":"{error}","error_description":"{error} described"}}"#),
        ))
    }

    fn token() -> std::result::Result<ApiResponse, TransportFailure> {
        Ok(ApiResponse::new(
            200,
            r#"{"access_token":"at","refresh_token":"rt","expires_in":3599,"scope":"User.Read Mail.Send"}"#,
        ))
    }

    #[tokio::test]
    async fn device_code_response_parsing() {
        let script = Script::new(vec![Ok(ApiResponse::new(
            200,
            r#"{"device_code":"dev","user_code":"ABCD","verification_url":"https://login.test/device","expires_in":900,"message":"Go sign in"}"#,
        ))]);
        let flow = flow(&script);

        let code = flow.request_device_code().await.unwrap();

        assert_eq!(code.verification_uri, "https://login.test/device");
        assert_eq!(code.interval, 5);
        assert_eq!(code.instructions(), "Go sign in");
        let requests = script.requests.lock().unwrap();
        assert_eq!(requests[0].form_field("scope"), Some("User.Read offline_access"));
    }

    #[tokio::test]
    async fn device_code_refusal_carries_description() {
        let script = Script::new(vec![Ok(ApiResponse::new(
            400,
            r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret"}"#,
        ))]);
        let flow = flow(&script);

        let err = flow.request_device_code().await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(msg) if msg.contains("AADSTS7000215")));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_continues_through_pending_and_slow_down() {
        let script = Script::new(vec![
            pending("authorization_pending"),
            pending("slow_down"),
            Err(TransportFailure::new("connection reset")),
            token(),
        ]);
        let flow = flow(&script);
        let started = tokio::time::Instant::now();

        let grant = flow.poll_for_token(&code(900)).await.unwrap();

        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
        assert_eq!(grant.scopes, vec!["User.Read", "Mail.Send"]);
        // 5 + 5, 10 after slow_down, then 1s executor backoff for the reset
        assert_eq!(started.elapsed(), Duration::from_secs(21));
        let requests = script.requests.lock().unwrap();
        assert_eq!(requests[0].form_field("grant_type"), Some(DEVICE_CODE_GRANT));
        assert_eq!(requests[0].form_field("client_secret"), Some("secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_poll_waits_and_continues() {
        let script = Script::new(vec![
            Ok(ApiResponse::new(429, "").with_header("retry-after", "3")),
            token(),
        ]);
        let flow = flow(&script);
        let started = tokio::time::Instant::now();

        let grant = flow.poll_for_token(&code(900)).await.unwrap();

        assert_eq!(grant.access_token, "at");
        assert_eq!(started.elapsed(), Duration::from_secs(8));
        assert_eq!(script.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn device_code_request_retries_transport_failures() {
        let script = Script::new(vec![
            Err(TransportFailure::new("dns lookup failed")),
            Ok(ApiResponse::new(
                200,
                r#"{"device_code":"dev","user_code":"ABCD","verification_uri":"https://login.test/device","expires_in":900}"#,
            )),
        ]);

        let code = flow(&script).request_device_code().await.unwrap();

        assert_eq!(code.user_code, "ABCD");
        assert_eq!(script.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_stops_polling() {
        let script = Script::new(vec![pending("access_denied"), token()]);
        let flow = flow(&script);

        let err = flow.poll_for_token(&code(900)).await.unwrap_err();

        assert!(matches!(err, ProviderError::Authentication(msg) if msg.contains("access_denied described")));
        assert_eq!(script.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_polling() {
        let replies = (0..10).map(|_| pending("authorization_pending")).collect();
        let script = Script::new(replies);
        let flow = flow(&script);

        let err = flow.poll_for_token(&code(12)).await.unwrap_err();

        assert!(matches!(err, ProviderError::Authentication(msg) if msg.contains("expired")));
        // polls at 5s and 10s; the 15s wake-up is past the deadline
        assert_eq!(script.requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn console_prompt_falls_back_to_formatted_instructions() {
        assert_eq!(
            code(900).instructions(),
            "To sign in, open https://login.test/device and enter the code ABCD-1234"
        );
    }
}
