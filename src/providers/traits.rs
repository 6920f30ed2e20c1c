//! Mail provider trait definition.
//!
//! This module defines the [`MailProvider`] trait which abstracts over the
//! consumer and enterprise back ends. The calling workflow only ever holds a
//! `Box<dyn MailProvider>` obtained from the factory.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{CanonicalEmail, ConfigError, InviteError, InviteRequest, ProviderKind};

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during provider operations.
///
/// Rate limiting has no variant: the executor always waits and retries.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Missing or invalid configuration, detected before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials could not be obtained or required auth parameters are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The back end answered 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// The back end was unreachable after the retry budget was spent.
    #[error("transport failed after {attempts} attempts: {message}")]
    Transport {
        /// Attempts made, including the last one.
        attempts: u32,
        /// The last underlying failure.
        message: String,
    },

    /// Any other non-2xx answer, carried verbatim.
    #[error("API error (status {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Caller-supplied arguments were rejected before any I/O.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A success response could not be decoded.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for ProviderError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.0)
    }
}

impl From<InviteError> for ProviderError {
    fn from(err: InviteError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Canonical mail and calendar operations, implemented once per back end.
///
/// Every operation obtains fresh credentials; adapters never hold a token
/// beyond one call.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Which back end this adapter talks to.
    fn provider_kind(&self) -> ProviderKind;

    /// Local check that the required configuration fields are present.
    ///
    /// Never performs network I/O.
    fn validate_configuration(&self) -> bool;

    /// Fetches messages received within the last `since_minutes` minutes.
    ///
    /// Ordering within the window is not guaranteed. Malformed records are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Authentication`] if credentials cannot be obtained,
    /// [`ProviderError::Transport`] if the back end stays unreachable.
    async fn fetch_emails(&self, account: &str, since_minutes: u32)
        -> Result<Vec<CanonicalEmail>>;

    /// Replies to `message_id` with a plain-text body.
    ///
    /// The reply goes to the original sender, keeps the original CC list and
    /// appends `extra_recipients` to CC. `true` means the back end accepted
    /// the send request.
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotFound`] if the original message is unknown.
    async fn send_reply(
        &self,
        message_id: &str,
        body: &str,
        account: &str,
        extra_recipients: &[String],
    ) -> Result<bool>;

    /// Marks one message as read.
    async fn mark_read(&self, message_id: &str, account: &str) -> Result<bool>;

    /// Marks several messages as read, reporting the outcome per id.
    ///
    /// Empty ids are skipped. The default implementation issues one
    /// [`mark_read`](Self::mark_read) per id; a failure for one id is logged
    /// and recorded as `false`.
    async fn mark_read_batch(
        &self,
        message_ids: &[String],
        account: &str,
    ) -> Result<HashMap<String, bool>> {
        let mut results = HashMap::new();
        for id in message_ids.iter().filter(|id| !id.trim().is_empty()) {
            let outcome = match self.mark_read(id, account).await {
                Ok(done) => done,
                Err(e @ ProviderError::Authentication(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "Failed to mark message as read");
                    false
                }
            };
            results.insert(id.clone(), outcome);
        }
        Ok(results)
    }

    /// Lists events for each `dd-mm-yyyy` day, one text block per day.
    ///
    /// Every block starts with a day header, including days without events
    /// and days whose string does not parse.
    async fn list_events(&self, days: &[String], account: &str) -> Result<String>;

    /// Creates an event and invites the attendees.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidRequest`] if the invite fails validation.
    async fn send_invite(&self, invite: &InviteRequest, account: &str) -> Result<bool>;
}
