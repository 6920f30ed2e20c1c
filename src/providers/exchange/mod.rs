//! Enterprise mail provider over Microsoft Graph.
//!
//! This module provides a [`MailProvider`] implementation backed by the
//! Microsoft Graph v1.0 REST API.
//!
//! # Authentication
//!
//! Every operation asks the [`CredentialManager`] for a fresh access token.
//! The manager answers from its token cache when it can, refreshes silently
//! when the cached token is stale, and falls back to the device flow.
//!
//! # API Usage
//!
//! - `GET /me/messages` for fetching, following `@odata.nextLink`
//! - `GET /me/messages/{id}` + `POST /me/sendMail` for replies
//! - `PATCH /me/messages/{id}` and `POST /$batch` for read state
//! - `GET /me/calendarView` per day and `POST /me/events` for the calendar

mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::json;
use url::Url;

use super::executor::{ApiRequest, Executor, PageParts};
use super::{MailProvider, ProviderError, Result};
use crate::auth::CredentialManager;
use crate::domain::{CalendarEvent, CanonicalEmail, InviteRequest, ProviderKind};
use crate::normalize::{day_block, invalid_day_block, parse_day, reply_subject, ReplyRecipients};

use wire::{BatchResponse, GraphMessage, SendMailRequest};

/// Graph v1.0 root.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

const PAGE_SIZE: &str = "50";

/// Sub-requests per `$batch` call; Graph rejects more than 20.
const BATCH_LIMIT: usize = 20;

/// Enterprise back end adapter.
pub struct ExchangeProvider {
    credentials: Arc<CredentialManager>,
    executor: Executor,
    base_url: String,
}

impl ExchangeProvider {
    pub fn new(credentials: Arc<CredentialManager>, executor: Executor) -> Self {
        Self {
            credentials,
            executor,
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Points the adapter at another Graph root (tests, national clouds).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    async fn access_token(&self, account: &str) -> Result<String> {
        Ok(self.credentials.acquire(account).await?.access_token)
    }

    /// Builds `{base}/{segments...}` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Config(format!("invalid Graph base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Config("Graph base URL cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn message_url(&self, message_id: &str) -> Result<Url> {
        self.url(&["me", "messages", message_id])
    }

    async fn resolve_original(&self, message_id: &str, token: &str) -> Result<GraphMessage> {
        let mut url = self.message_url(message_id)?;
        url.query_pairs_mut().append_pair("$select", wire::REPLY_FIELDS);

        let request = ApiRequest::get(url.as_str()).bearer(token);
        match self.executor.execute_json(&request).await {
            Err(ProviderError::NotFound(_)) => Err(ProviderError::NotFound(format!(
                "Message with ID {message_id} not found"
            ))),
            other => other,
        }
    }

    /// Events overlapping the UTC day, all-day and multi-day ones included.
    async fn events_for_day(&self, day: NaiveDate, token: &str) -> Result<Vec<CalendarEvent>> {
        let next = day
            .succ_opt()
            .ok_or_else(|| ProviderError::InvalidRequest(format!("no day after {day}")))?;
        let mut url = self.url(&["me", "calendarView"])?;
        url.query_pairs_mut()
            .append_pair("startDateTime", &format!("{}T00:00:00Z", day.format("%Y-%m-%d")))
            .append_pair("endDateTime", &format!("{}T00:00:00Z", next.format("%Y-%m-%d")))
            .append_pair("$orderby", "start/dateTime")
            .append_pair("$top", PAGE_SIZE)
            .append_pair("$select", wire::EVENT_FIELDS);

        let request = ApiRequest::get(url.as_str()).bearer(token);
        self.executor
            .paginate(request, PageParts::odata, wire::to_event)
            .await
    }

    async fn mark_chunk(
        &self,
        chunk: &[&str],
        token: &str,
        results: &mut HashMap<String, bool>,
    ) -> Result<()> {
        let request =
            ApiRequest::post_json(self.url(&["$batch"])?.as_str(), wire::mark_read_batch(chunk))
                .bearer(token);

        let response: BatchResponse = match self.executor.execute_json(&request).await {
            Ok(response) => response,
            Err(e @ ProviderError::Authentication(_)) => return Err(e),
            Err(e) => {
                tracing::error!(count = chunk.len(), error = %e, "Batch mark-as-read failed");
                for id in chunk {
                    results.insert(id.to_string(), false);
                }
                return Ok(());
            }
        };

        let statuses: HashMap<usize, u16> = response
            .responses
            .into_iter()
            .filter_map(|item| item.id.parse().ok().map(|index| (index, item.status)))
            .collect();

        for (index, id) in chunk.iter().enumerate() {
            let done = match statuses.get(&index) {
                Some(status) if (200..300).contains(status) => true,
                Some(status) => {
                    tracing::warn!(message_id = %id, status = *status, "Failed to mark message as read");
                    false
                }
                None => {
                    tracing::warn!(message_id = %id, "No batch response for message");
                    false
                }
            };
            results.insert(id.to_string(), done);
        }
        Ok(())
    }
}

#[async_trait]
impl MailProvider for ExchangeProvider {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Enterprise
    }

    fn validate_configuration(&self) -> bool {
        self.credentials.params().is_complete()
    }

    async fn fetch_emails(&self, account: &str, since_minutes: u32) -> Result<Vec<CanonicalEmail>> {
        let token = self.access_token(account).await?;

        let cutoff = Utc::now() - ChronoDuration::minutes(i64::from(since_minutes));
        let mut url = self.url(&["me", "messages"])?;
        url.query_pairs_mut()
            .append_pair(
                "$filter",
                &format!("receivedDateTime ge {}", cutoff.format("%Y-%m-%dT%H:%M:%SZ")),
            )
            .append_pair("$orderby", "receivedDateTime desc")
            .append_pair("$top", PAGE_SIZE)
            .append_pair("$select", wire::MESSAGE_FIELDS);

        let request = ApiRequest::get(url.as_str()).bearer(&token);
        let emails = self
            .executor
            .paginate(request, PageParts::odata, wire::to_canonical)
            .await?;

        tracing::info!(account, count = emails.len(), since_minutes, "Fetched Exchange messages");
        Ok(emails)
    }

    async fn send_reply(
        &self,
        message_id: &str,
        body: &str,
        account: &str,
        extra_recipients: &[String],
    ) -> Result<bool> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "Invalid message ID provided".to_string(),
            ));
        }

        let token = self.access_token(account).await?;
        let original = self.resolve_original(message_id, &token).await?;

        let recipients = ReplyRecipients::for_reply(original.sender(), original.cc(), extra_recipients);
        let payload = SendMailRequest::reply(
            reply_subject(original.subject.as_deref().unwrap_or_default()),
            body,
            &recipients.to,
            &recipients.cc,
            original.internet_message_id.as_deref(),
        );
        let payload = serde_json::to_value(&payload)
            .map_err(|e| ProviderError::Internal(format!("encode sendMail: {e}")))?;

        let request =
            ApiRequest::post_json(self.url(&["me", "sendMail"])?.as_str(), payload).bearer(&token);
        self.executor.execute(&request).await?;

        tracing::info!(account, message_id, "Reply sent via Graph");
        Ok(true)
    }

    async fn mark_read(&self, message_id: &str, account: &str) -> Result<bool> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "Invalid message ID provided".to_string(),
            ));
        }

        let token = self.access_token(account).await?;
        let request = ApiRequest::patch_json(
            self.message_url(message_id)?.as_str(),
            json!({ "isRead": true }),
        )
        .bearer(&token);
        self.executor.execute(&request).await?;

        tracing::debug!(account, message_id, "Marked message as read");
        Ok(true)
    }

    async fn mark_read_batch(
        &self,
        message_ids: &[String],
        account: &str,
    ) -> Result<HashMap<String, bool>> {
        let ids: Vec<&str> = message_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .collect();
        let mut results = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(results);
        }

        let token = self.access_token(account).await?;
        for chunk in ids.chunks(BATCH_LIMIT) {
            self.mark_chunk(chunk, &token, &mut results).await?;
        }

        let succeeded = results.values().filter(|done| **done).count();
        tracing::info!(account, total = results.len(), succeeded, "Batch mark-as-read finished");
        Ok(results)
    }

    async fn list_events(&self, days: &[String], account: &str) -> Result<String> {
        let mut token: Option<String> = None;
        let mut text = String::new();

        for day in days {
            let Some(date) = parse_day(day) else {
                tracing::warn!(day = %day, "Invalid day string");
                text.push_str(&invalid_day_block(day));
                continue;
            };

            let bearer = match &token {
                Some(bearer) => bearer.clone(),
                None => {
                    let fresh = self.access_token(account).await?;
                    token = Some(fresh.clone());
                    fresh
                }
            };

            let events = self.events_for_day(date, &bearer).await?;
            text.push_str(&day_block(day, &events));
        }

        Ok(text)
    }

    async fn send_invite(&self, invite: &InviteRequest, account: &str) -> Result<bool> {
        let invite = invite.validate(account)?;
        let token = self.access_token(account).await?;

        let request = ApiRequest::post_json(
            self.url(&["me", "events"])?.as_str(),
            wire::invite_event(&invite),
        )
        .bearer(&token);
        self.executor.execute(&request).await?;

        tracing::info!(
            account,
            attendees = invite.attendees.len(),
            title = %invite.title,
            "Calendar invite sent via Graph"
        );
        Ok(true)
    }
}
