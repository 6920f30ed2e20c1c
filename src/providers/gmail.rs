//! Gmail API provider implementation.
//!
//! This module provides a [`MailProvider`] implementation using the Gmail
//! REST API for mail and the Google Calendar API for events.
//!
//! # Authentication
//!
//! The consumer configuration carries two JSON documents: the OAuth client
//! secrets (`installed` or `web` section) and an authorized-user token
//! (`token`, `refresh_token`, `expiry`). Access tokens are refreshed through
//! the token endpoint when they are within five minutes of expiry and kept in
//! memory for the life of the provider.
//!
//! # API Usage
//!
//! This provider uses the Gmail API v1 and Calendar API v3:
//! - `users.messages.list` + `users.messages.get` for fetching
//! - `users.messages.send` for replies
//! - `users.messages.modify` for read state
//! - `events.list` / `events.insert` on the `primary` calendar

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::executor::{ApiRequest, Executor, PageParts};
use super::{MailProvider, ProviderError, Result};
use crate::domain::{
    Address, CalendarEvent, CanonicalEmail, ConsumerParams, EmailFields, EventTiming,
    InviteRequest, ProviderKind, ValidatedInvite, ZonedDateTime,
};
use crate::normalize::{
    all_day_date, day_block, html_to_text, iana_timezone, invalid_day_block, parse_day,
    plain_text, reply_subject, ReplyRecipients,
};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/calendars/primary";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// Message bodies fetched concurrently after listing.
const FETCH_CONCURRENCY: usize = 8;
const REFRESH_SKEW_SECS: i64 = 300;

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
}

/// Gmail API message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: Option<String>,
    thread_id: Option<String>,
    snippet: Option<String>,
    payload: Option<GmailMessagePayload>,
    internal_date: Option<String>,
}

/// Gmail message payload (headers and body parts).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessagePayload {
    headers: Option<Vec<GmailHeader>>,
    parts: Option<Vec<GmailPart>>,
    body: Option<GmailBody>,
    mime_type: Option<String>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message part (for multipart messages).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

/// Gmail modify request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

/// Gmail send request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// One section of a Google client-secrets document.
#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// An authorized-user token document.
#[derive(Debug, Deserialize)]
struct AuthorizedUser {
    token: Option<String>,
    refresh_token: Option<String>,
    expiry: Option<String>,
    token_uri: Option<String>,
}

/// Calendar API date or date-time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventTime {
    date: Option<String>,
    date_time: Option<String>,
    time_zone: Option<String>,
}

/// Calendar API event.
#[derive(Debug, Deserialize)]
struct GoogleEvent {
    summary: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
    location: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > ChronoDuration::seconds(REFRESH_SKEW_SECS)
    }
}

/// Gmail API provider.
///
/// Implements [`MailProvider`] using the Gmail and Calendar REST APIs.
///
/// # Example
///
/// ```ignore
/// use mailbridge::providers::{GmailProvider, MailProvider};
///
/// let provider = GmailProvider::new(params, executor);
/// let emails = provider.fetch_emails("me@gmail.com", 30).await?;
/// ```
pub struct GmailProvider {
    params: ConsumerParams,
    executor: Executor,
    access_token: tokio::sync::Mutex<Option<AccessToken>>,
}

impl GmailProvider {
    /// Creates a provider. Credentials are parsed on first use.
    pub fn new(params: ConsumerParams, executor: Executor) -> Self {
        Self {
            params,
            executor,
            access_token: tokio::sync::Mutex::new(None),
        }
    }

    fn client_secrets(&self) -> Result<ClientSecrets> {
        let file: ClientSecretsFile = serde_json::from_str(self.params.secret())
            .map_err(|e| ProviderError::Config(format!("invalid client secrets: {}", e)))?;
        file.installed.or(file.web).ok_or_else(|| {
            ProviderError::Config("client secrets have no installed or web section".to_string())
        })
    }

    fn authorized_user(&self) -> Result<AuthorizedUser> {
        serde_json::from_str(self.params.token())
            .map_err(|e| ProviderError::Config(format!("invalid authorized-user token: {}", e)))
    }

    /// Returns a bearer token, refreshing it when close to expiry.
    async fn bearer(&self) -> Result<String> {
        let mut current = self.access_token.lock().await;
        let now = Utc::now();
        if let Some(token) = current.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let user = self.authorized_user()?;
        if current.is_none() {
            let stored = user.token.clone().zip(user.expiry.as_deref().and_then(parse_expiry));
            if let Some((value, expires_at)) = stored {
                let token = AccessToken { value, expires_at };
                if token.is_fresh(now) {
                    *current = Some(token.clone());
                    return Ok(token.value);
                }
            }
        }

        let token = self.refresh_access_token(&user).await?;
        *current = Some(token.clone());
        Ok(token.value)
    }

    /// Refreshes the OAuth access token using the refresh token.
    async fn refresh_access_token(&self, user: &AuthorizedUser) -> Result<AccessToken> {
        let secrets = self.client_secrets()?;
        let refresh_token = user.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::Authentication("authorized-user token has no refresh_token".to_string())
        })?;
        let token_url = user
            .token_uri
            .as_deref()
            .or(secrets.token_uri.as_deref())
            .unwrap_or(GOOGLE_TOKEN_URL);

        let request = ApiRequest::post_form(
            token_url,
            &[
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
        );

        let response: TokenResponse = match self.executor.execute_json(&request).await {
            Ok(response) => response,
            Err(ProviderError::Api { status, body }) => {
                return Err(ProviderError::Authentication(format!(
                    "token refresh failed ({}): {}",
                    status, body
                )));
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(expires_in = response.expires_in, "Gmail access token refreshed");
        Ok(AccessToken {
            value: response.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(response.expires_in),
        })
    }

    fn gmail_url(segments: &[&str]) -> Result<Url> {
        api_url(GMAIL_API_BASE, segments)
    }

    fn calendar_url(segments: &[&str]) -> Result<Url> {
        api_url(CALENDAR_API_BASE, segments)
    }

    async fn list_message_ids(&self, query: &str, token: &str) -> Result<Vec<String>> {
        let mut url = Self::gmail_url(&["messages"])?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("maxResults", "100");

        let request = ApiRequest::get(url.as_str()).bearer(token);
        self.executor
            .paginate(request, google_pages(url, "messages"), |record| {
                serde_json::from_value::<MessageRef>(record)
                    .map(|m| m.id)
                    .map_err(|e| ProviderError::Internal(format!("invalid message ref: {}", e)))
            })
            .await
    }

    async fn fetch_message(&self, id: &str, token: &str) -> Result<CanonicalEmail> {
        let mut url = Self::gmail_url(&["messages", id])?;
        url.query_pairs_mut().append_pair("format", "full");

        let message: GmailMessage = self
            .executor
            .execute_json(&ApiRequest::get(url.as_str()).bearer(token))
            .await?;
        gmail_message_to_email(&message)
    }

    async fn events_for_day(&self, day: NaiveDate, token: &str) -> Result<Vec<CalendarEvent>> {
        let next = day.succ_opt().unwrap_or(day);
        let mut url = Self::calendar_url(&["events"])?;
        url.query_pairs_mut()
            .append_pair("timeMin", &format!("{}T00:00:00Z", day.format("%Y-%m-%d")))
            .append_pair("timeMax", &format!("{}T00:00:00Z", next.format("%Y-%m-%d")))
            .append_pair("singleEvents", "true")
            .append_pair("orderBy", "startTime");

        let request = ApiRequest::get(url.as_str()).bearer(token);
        self.executor
            .paginate(request, google_pages(url, "items"), google_event_to_event)
            .await
    }
}

/// Builds `{base}/{segments...}` with every segment percent-encoded.
fn api_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ProviderError::Internal(format!("invalid API URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| ProviderError::Internal("API URL cannot take a path".to_string()))?
        .extend(segments);
    Ok(url)
}

/// Page splitter for Google list responses: records under `key`, next page
/// requested by repeating the first URL with `pageToken`.
fn google_pages(first: Url, key: &'static str) -> impl Fn(Value) -> Result<PageParts> + Send + Sync {
    move |mut page: Value| {
        let records = match page.get_mut(key).map(Value::take) {
            Some(Value::Array(records)) => records,
            _ => Vec::new(),
        };
        let next_url = page
            .get("nextPageToken")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(|token| {
                let mut next = first.clone();
                next.query_pairs_mut().append_pair("pageToken", token);
                next.to_string()
            });
        Ok(PageParts { records, next_url })
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn header<'a>(payload: Option<&'a GmailMessagePayload>, name: &str) -> Option<&'a str> {
    payload?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn decode_part(body: Option<&GmailBody>) -> Option<String> {
    let data = body?.data.as_deref()?;
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Extracts the text and HTML bodies from a Gmail message.
fn extract_body(payload: &GmailMessagePayload) -> (Option<String>, Option<String>) {
    let mut text = None;
    let mut html = None;

    if let Some(decoded) = decode_part(payload.body.as_ref()) {
        match payload.mime_type.as_deref() {
            Some("text/html") => html = Some(decoded),
            _ => text = Some(decoded),
        }
    }

    if let Some(parts) = &payload.parts {
        extract_body_from_parts(parts, &mut text, &mut html);
    }

    (text, html)
}

/// Recursively extracts body from message parts.
fn extract_body_from_parts(parts: &[GmailPart], text: &mut Option<String>, html: &mut Option<String>) {
    for part in parts {
        match part.mime_type.as_deref().unwrap_or("") {
            "text/plain" if text.is_none() => *text = decode_part(part.body.as_ref()),
            "text/html" if html.is_none() => *html = decode_part(part.body.as_ref()),
            _ => {}
        }

        if let Some(nested) = &part.parts {
            extract_body_from_parts(nested, text, html);
        }
    }
}

/// Converts a Gmail message to a [`CanonicalEmail`].
///
/// Plain-text parts win over HTML; a message without either falls back to
/// its snippet.
fn gmail_message_to_email(msg: &GmailMessage) -> Result<CanonicalEmail> {
    let id = msg
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Internal("Invalid Gmail message format".to_string()))?;
    let payload = msg.payload.as_ref();

    let received_at = msg
        .internal_date
        .as_ref()
        .and_then(|d| d.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| ProviderError::Internal(format!("message {} has no internalDate", id)))?;

    let body = match payload.map(extract_body).unwrap_or((None, None)) {
        (Some(text), _) if !text.trim().is_empty() => plain_text(&text),
        (_, Some(html)) => html_to_text(&html),
        _ => plain_text(msg.snippet.as_deref().unwrap_or_default()),
    };

    Ok(CanonicalEmail::new(EmailFields {
        id,
        thread_id: msg.thread_id.clone(),
        from_email: header(payload, "From")
            .map(|v| Address::parse(v).email)
            .unwrap_or_default(),
        to_email: header(payload, "To")
            .and_then(|v| Address::parse_list(v).into_iter().next())
            .map(|a| a.email)
            .unwrap_or_default(),
        subject: header(payload, "Subject").unwrap_or_default().to_string(),
        body: Some(body),
        received_at,
    }))
}

/// Builds an RFC 5322 reply message.
fn build_raw_message(
    from_address: &str,
    recipients: &ReplyRecipients,
    subject: &str,
    in_reply_to: Option<&str>,
    references: Option<&str>,
    body: &str,
) -> String {
    let join = |addresses: &[Address]| {
        addresses
            .iter()
            .map(Address::display)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut message = String::new();
    message.push_str(&format!("From: {}\r\n", from_address));
    message.push_str(&format!("To: {}\r\n", join(&recipients.to)));
    if !recipients.cc.is_empty() {
        message.push_str(&format!("Cc: {}\r\n", join(&recipients.cc)));
    }
    message.push_str(&format!("Subject: {}\r\n", subject));

    if let Some(in_reply_to) = in_reply_to {
        message.push_str(&format!("In-Reply-To: {}\r\n", in_reply_to));
        let chain = match references {
            Some(previous) if !previous.trim().is_empty() => format!("{} {}", previous.trim(), in_reply_to),
            _ => in_reply_to.to_string(),
        };
        message.push_str(&format!("References: {}\r\n", chain));
    }

    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("\r\n");
    message.push_str(body);

    message
}

fn event_time(value: GoogleEventTime) -> ZonedDateTime {
    ZonedDateTime {
        date_time: value.date_time.unwrap_or_default(),
        time_zone: value
            .time_zone
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string()),
    }
}

/// Converts a Calendar API event. All-day events carry `date` instead of
/// `dateTime`.
fn google_event_to_event(record: Value) -> Result<CalendarEvent> {
    let event: GoogleEvent = serde_json::from_value(record)
        .map_err(|e| ProviderError::Internal(format!("invalid event: {}", e)))?;
    let (Some(start), Some(end)) = (event.start, event.end) else {
        return Err(ProviderError::Internal("event without start or end".to_string()));
    };

    let timing = match (start.date.as_deref(), end.date.as_deref()) {
        (Some(start_date), Some(end_date)) => {
            match (all_day_date(start_date), all_day_date(end_date)) {
                (Some(start), Some(end)) => EventTiming::AllDay { start, end },
                _ => {
                    return Err(ProviderError::Internal(format!(
                        "invalid all-day date: {}",
                        start_date
                    )))
                }
            }
        }
        _ if start.date_time.is_some() && end.date_time.is_some() => EventTiming::Timed {
            start: event_time(start),
            end: event_time(end),
        },
        _ => return Err(ProviderError::Internal("event mixes date and dateTime".to_string())),
    };

    Ok(CalendarEvent {
        title: event.summary.unwrap_or_default(),
        timing,
        location: event.location.filter(|l| !l.is_empty()),
        description: event.description.filter(|d| !d.trim().is_empty()),
    })
}

/// Calendar API body for an invite with a Meet conference.
fn invite_event(invite: &ValidatedInvite) -> Value {
    let timezone = iana_timezone(&invite.timezone);
    let attendees: Vec<Value> = invite
        .attendees
        .iter()
        .map(|email| json!({ "email": email }))
        .collect();

    json!({
        "summary": invite.title,
        "start": {
            "dateTime": invite.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "timeZone": timezone,
        },
        "end": {
            "dateTime": invite.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "timeZone": timezone,
        },
        "attendees": attendees,
        "conferenceData": {
            "createRequest": {
                "requestId": uuid::Uuid::new_v4().to_string(),
                "conferenceSolutionKey": {"type": "hangoutsMeet"},
            }
        },
    })
}

#[async_trait]
impl MailProvider for GmailProvider {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Consumer
    }

    fn validate_configuration(&self) -> bool {
        self.params.is_complete()
    }

    async fn fetch_emails(&self, account: &str, since_minutes: u32) -> Result<Vec<CanonicalEmail>> {
        let token = self.bearer().await?;

        let after = (Utc::now() - ChronoDuration::minutes(i64::from(since_minutes))).timestamp();
        let query = format!("(to:{account} OR from:{account}) after:{after}");
        let ids = self.list_message_ids(&query, &token).await?;

        let fetched: Vec<(String, Result<CanonicalEmail>)> = stream::iter(ids)
            .map(|id| {
                let token = token.as_str();
                async move {
                    let result = self.fetch_message(&id, token).await;
                    (id, result)
                }
            })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut emails = Vec::with_capacity(fetched.len());
        for (id, result) in fetched {
            match result {
                Ok(email) => emails.push(email),
                Err(e @ (ProviderError::Internal(_) | ProviderError::NotFound(_))) => {
                    tracing::warn!(message_id = %id, error = %e, "Skipping unreadable Gmail message");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(account, count = emails.len(), since_minutes, "Fetched Gmail messages");
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
        let token = self.bearer().await?;

        let mut url = Self::gmail_url(&["messages", message_id])?;
        url.query_pairs_mut().append_pair("format", "metadata");
        for name in ["From", "Cc", "Subject", "Message-ID", "References"] {
            url.query_pairs_mut().append_pair("metadataHeaders", name);
        }
        let original: GmailMessage = match self
            .executor
            .execute_json(&ApiRequest::get(url.as_str()).bearer(&token))
            .await
        {
            Err(ProviderError::NotFound(_)) => {
                return Err(ProviderError::NotFound(format!(
                    "Message with ID {} not found",
                    message_id
                )));
            }
            other => other?,
        };
        let payload = original.payload.as_ref();

        let recipients = ReplyRecipients::for_reply(
            header(payload, "From").map(Address::parse),
            header(payload, "Cc").map(Address::parse_list).unwrap_or_default(),
            extra_recipients,
        );
        let raw = build_raw_message(
            account,
            &recipients,
            &reply_subject(header(payload, "Subject").unwrap_or_default()),
            header(payload, "Message-ID"),
            header(payload, "References"),
            body,
        );

        let send = SendRequest {
            raw: BASE64_URL_SAFE_NO_PAD.encode(raw.as_bytes()),
            thread_id: original.thread_id.clone(),
        };
        let send = serde_json::to_value(&send)
            .map_err(|e| ProviderError::Internal(format!("encode send request: {}", e)))?;
        let request =
            ApiRequest::post_json(Self::gmail_url(&["messages", "send"])?.as_str(), send)
                .bearer(&token);
        self.executor.execute(&request).await?;

        tracing::info!(account, message_id, "Reply sent via Gmail API");
        Ok(true)
    }

    async fn mark_read(&self, message_id: &str, account: &str) -> Result<bool> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "Invalid message ID provided".to_string(),
            ));
        }
        let token = self.bearer().await?;

        let body = ModifyRequest {
            add_label_ids: vec![],
            remove_label_ids: vec!["UNREAD".to_string()],
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ProviderError::Internal(format!("encode modify request: {}", e)))?;
        let request = ApiRequest::post_json(
            Self::gmail_url(&["messages", message_id, "modify"])?.as_str(),
            body,
        )
        .bearer(&token);
        self.executor.execute(&request).await?;

        tracing::debug!(account, message_id, "Marked Gmail message as read");
        Ok(true)
    }

    async fn list_events(&self, days: &[String], account: &str) -> Result<String> {
        let mut token: Option<String> = None;
        let mut text = String::new();

        for day in days {
            let Some(date) = parse_day(day) else {
                tracing::warn!(account, day = %day, "Invalid day string");
                text.push_str(&invalid_day_block(day));
                continue;
            };

            let bearer = match &token {
                Some(bearer) => bearer.clone(),
                None => {
                    let fresh = self.bearer().await?;
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
        let token = self.bearer().await?;

        let mut url = Self::calendar_url(&["events"])?;
        url.query_pairs_mut()
            .append_pair("conferenceDataVersion", "1")
            .append_pair("sendUpdates", "all");
        let request = ApiRequest::post_json(url.as_str(), invite_event(&invite)).bearer(&token);
        self.executor.execute(&request).await?;

        tracing::info!(
            account,
            attendees = invite.attendees.len(),
            title = %invite.title,
            "Calendar invite sent via Google Calendar"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::executor::{ApiResponse, HttpTransport, RetryPolicy, TransportFailure};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const ACCOUNT: &str = "me@gmail.com";
    const SECRETS: &str = r#"{"installed":{"client_id":"cid","client_secret":"csecret","token_uri":"https://oauth2.googleapis.com/token"}}"#;

    type Handler = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

    struct Google {
        handler: Handler,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl Google {
        fn new(handler: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                requests: Mutex::new(vec![]),
            })
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Google {
        async fn send(
            &self,
            request: &ApiRequest,
            _timeout: Duration,
        ) -> std::result::Result<ApiResponse, TransportFailure> {
            self.requests.lock().unwrap().push(request.clone());
            Ok((self.handler)(request))
        }
    }

    fn fresh_token() -> String {
        let expiry = (Utc::now() + ChronoDuration::hours(1)).to_rfc3339();
        json!({"token": "live-token", "refresh_token": "rt", "expiry": expiry}).to_string()
    }

    fn provider(google: &Arc<Google>, token: String) -> GmailProvider {
        GmailProvider::new(
            ConsumerParams::new(SECRETS, token).unwrap(),
            Executor::new(google.clone(), RetryPolicy::default()),
        )
    }

    fn encoded(text: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(text)
    }

    fn path(request: &ApiRequest) -> String {
        Url::parse(&request.url).unwrap().path().to_string()
    }

    fn query(request: &ApiRequest, name: &str) -> Option<String> {
        Url::parse(&request.url)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn plain_text_part_preferred_over_html() {
        let message: GmailMessage = serde_json::from_value(json!({
            "id": "g1",
            "threadId": "t1",
            "internalDate": "1705314600000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "Alice <alice@example.com>"},
                    {"name": "To", "value": "me@gmail.com, other@example.com"},
                    {"name": "Subject", "value": "Lunch"}
                ],
                "parts": [
                    {"mimeType": "text/html", "body": {"data": encoded("<p>html</p>")}},
                    {"mimeType": "text/plain", "body": {"data": encoded("plain  text\n")}}
                ]
            }
        }))
        .unwrap();

        let email = gmail_message_to_email(&message).unwrap();

        assert_eq!(email.from_email(), "alice@example.com");
        assert_eq!(email.to_email(), "me@gmail.com");
        assert_eq!(email.thread_id().as_str(), "t1");
        assert_eq!(email.body(), "plain text");
        assert_eq!(email.send_time(), "2024-01-15T10:30:00Z");
    }

    #[test]
    fn html_only_body_is_converted() {
        let message: GmailMessage = serde_json::from_value(json!({
            "id": "g2",
            "internalDate": "1705314600000",
            "payload": {
                "mimeType": "text/html",
                "body": {"data": encoded("<p>Price: $100 &amp; free</p>")}
            }
        }))
        .unwrap();

        let email = gmail_message_to_email(&message).unwrap();
        assert_eq!(email.body(), "Price: $100 & free");
        assert_eq!(email.thread_id().as_str(), "g2");
    }

    #[test]
    fn reply_message_threads_and_ccs() {
        let recipients = ReplyRecipients::for_reply(
            Some(Address::with_name("alice@example.com", "Alice")),
            vec![Address::new("cc@example.com")],
            &["extra@example.com".to_string()],
        );
        let raw = build_raw_message(
            ACCOUNT,
            &recipients,
            "Re: Lunch",
            Some("<m1@example.com>"),
            Some("<m0@example.com>"),
            "Sure",
        );

        assert!(raw.contains("To: Alice <alice@example.com>\r\n"));
        assert!(raw.contains("Cc: cc@example.com, extra@example.com\r\n"));
        assert!(raw.contains("In-Reply-To: <m1@example.com>\r\n"));
        assert!(raw.contains("References: <m0@example.com> <m1@example.com>\r\n"));
        assert!(raw.ends_with("\r\n\r\nSure"));
    }

    #[tokio::test]
    async fn fetch_lists_then_gets_each_message() {
        let google = Google::new(|request| {
            let path = Url::parse(&request.url).unwrap().path().to_string();
            if path.ends_with("/messages") {
                if request.url.contains("pageToken") {
                    ApiResponse::new(200, json!({"messages": [{"id": "b"}]}).to_string())
                } else {
                    ApiResponse::new(
                        200,
                        json!({"messages": [{"id": "a"}, {"id": "bad"}], "nextPageToken": "p2"}).to_string(),
                    )
                }
            } else if path.ends_with("/bad") {
                ApiResponse::new(200, json!({"id": "bad"}).to_string())
            } else {
                let id = path.rsplit('/').next().unwrap().to_string();
                ApiResponse::new(
                    200,
                    json!({
                        "id": id,
                        "threadId": "t",
                        "internalDate": "1705314600000",
                        "payload": {"mimeType": "text/plain", "body": {"data": encoded("hi")}}
                    })
                    .to_string(),
                )
            }
        });

        let emails = provider(&google, fresh_token()).fetch_emails(ACCOUNT, 60).await.unwrap();

        let ids: Vec<&str> = emails.iter().map(|e| e.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let first = &google.requests()[0];
        let q = query(first, "q").unwrap();
        assert!(q.starts_with("(to:me@gmail.com OR from:me@gmail.com) after:"));
        assert_eq!(first.header("authorization"), Some("Bearer live-token"));
        assert_eq!(query(&google.requests()[1], "pageToken").as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once() {
        let google = Google::new(|request| {
            if request.url.starts_with(GOOGLE_TOKEN_URL) {
                ApiResponse::new(200, r#"{"access_token":"new-token","expires_in":3600}"#)
            } else {
                ApiResponse::new(200, "{}")
            }
        });
        let token = json!({"token": "old", "refresh_token": "rt", "expiry": "2020-01-01T00:00:00Z"}).to_string();
        let provider = provider(&google, token);

        provider.mark_read("m1", ACCOUNT).await.unwrap();
        provider.mark_read("m2", ACCOUNT).await.unwrap();

        let requests = google.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].form_field("refresh_token"), Some("rt"));
        assert_eq!(requests[0].form_field("client_id"), Some("cid"));
        assert_eq!(requests[1].header("authorization"), Some("Bearer new-token"));
        assert_eq!(path(&requests[2]), "/gmail/v1/users/me/messages/m2/modify");
        assert_eq!(
            requests[2].json_body(),
            Some(&json!({"removeLabelIds": ["UNREAD"]}))
        );
    }

    #[tokio::test]
    async fn refused_refresh_is_authentication_error() {
        let google = Google::new(|_| ApiResponse::new(400, r#"{"error":"invalid_grant"}"#));
        let token = json!({"refresh_token": "rt"}).to_string();

        let err = provider(&google, token).mark_read("m1", ACCOUNT).await.unwrap_err();

        assert!(matches!(err, ProviderError::Authentication(msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn unparseable_secrets_are_config_errors() {
        let google = Google::new(|_| ApiResponse::new(200, "{}"));
        let provider = GmailProvider::new(
            ConsumerParams::new("not json", "also not json").unwrap(),
            Executor::new(google.clone(), RetryPolicy::default()),
        );

        assert!(provider.validate_configuration());
        assert!(matches!(
            provider.mark_read("m1", ACCOUNT).await,
            Err(ProviderError::Config(_))
        ));
        assert!(google.requests().is_empty());
    }

    #[tokio::test]
    async fn reply_sends_raw_message_in_thread() {
        let google = Google::new(|request| {
            if request.method == reqwest::Method::GET {
                ApiResponse::new(
                    200,
                    json!({
                        "id": "m1",
                        "threadId": "t1",
                        "payload": {"headers": [
                            {"name": "From", "value": "Alice <alice@example.com>"},
                            {"name": "Subject", "value": "RE: Lunch"},
                            {"name": "Message-ID", "value": "<m1@example.com>"}
                        ]}
                    })
                    .to_string(),
                )
            } else {
                ApiResponse::new(200, r#"{"id":"sent"}"#)
            }
        });

        assert!(provider(&google, fresh_token())
            .send_reply("m1", "Sure", ACCOUNT, &[])
            .await
            .unwrap());

        let requests = google.requests();
        assert_eq!(query(&requests[0], "format").as_deref(), Some("metadata"));
        let send = requests[1].json_body().unwrap();
        assert_eq!(send["threadId"], json!("t1"));
        let raw = BASE64_URL_SAFE_NO_PAD
            .decode(send["raw"].as_str().unwrap())
            .unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.contains("Subject: RE: Lunch\r\n"));
        assert!(raw.contains("From: me@gmail.com\r\n"));
    }

    #[tokio::test]
    async fn reply_to_missing_message_is_not_found() {
        let google = Google::new(|_| ApiResponse::new(404, "gone"));

        let err = provider(&google, fresh_token())
            .send_reply("m9", "x", ACCOUNT, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::NotFound(msg) if msg == "Message with ID m9 not found"));
    }

    #[tokio::test]
    async fn events_use_primary_calendar() {
        let google = Google::new(|_| {
            ApiResponse::new(
                200,
                json!({"items": [{
                    "summary": "Dentist",
                    "start": {"dateTime": "2024-01-15T10:00:00-08:00", "timeZone": "America/Los_Angeles"},
                    "end": {"dateTime": "2024-01-15T11:00:00-08:00", "timeZone": "America/Los_Angeles"}
                }]})
                .to_string(),
            )
        });

        let text = provider(&google, fresh_token())
            .list_events(&["15-01-2024".to_string()], ACCOUNT)
            .await
            .unwrap();

        assert!(text.starts_with("***FOR DAY 15-01-2024***\n\nEvent: Dentist\n"));
        assert!(text.contains("Starts: 2024-01-15 10:00 AM PST\n"));
        let request = &google.requests()[0];
        assert_eq!(path(request), "/calendar/v3/calendars/primary/events");
        assert_eq!(query(request, "timeMin").as_deref(), Some("2024-01-15T00:00:00Z"));
        assert_eq!(query(request, "timeMax").as_deref(), Some("2024-01-16T00:00:00Z"));
    }

    #[tokio::test]
    async fn invite_requests_meet_and_notifies() {
        let google = Google::new(|_| ApiResponse::new(200, r#"{"id":"evt"}"#));
        let invite = InviteRequest::new(
            vec!["guest@example.com".to_string()],
            "Sync",
            "2024-07-01T14:00:00",
            "2024-07-01T15:00:00",
            "PST",
        );

        assert!(provider(&google, fresh_token()).send_invite(&invite, ACCOUNT).await.unwrap());

        let request = &google.requests()[0];
        assert_eq!(query(request, "sendUpdates").as_deref(), Some("all"));
        let body = request.json_body().unwrap();
        assert_eq!(
            body["start"],
            json!({"dateTime": "2024-07-01T14:00:00", "timeZone": "America/Los_Angeles"})
        );
        assert_eq!(
            body["conferenceData"]["createRequest"]["conferenceSolutionKey"]["type"],
            json!("hangoutsMeet")
        );
    }

    #[test]
    fn mixed_event_times_are_rejected() {
        let err = google_event_to_event(json!({
            "summary": "odd",
            "start": {"date": "2024-01-15"},
            "end": {"dateTime": "2024-01-15T10:00:00Z"}
        }))
        .unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
    }
}
