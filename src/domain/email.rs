//! Canonical email types.
//!
//! [`CanonicalEmail`] is the one shape every back end's messages are
//! converted into before they reach the calling workflow.

use chrono::{DateTime, SecondsFormat, Utc};
use mailparse::{MailAddr, SingleInfo};
use serde::{Deserialize, Serialize};

use super::{EmailId, ThreadId};

/// Body text used when a message carries no readable content.
pub const NO_BODY: &str = "No message body available.";

/// An inbound message in provider-agnostic form.
///
/// Built once per message during a fetch. The thread id is never empty and
/// the body is never empty; [`CanonicalEmail::new`] substitutes the message
/// id and [`NO_BODY`] respectively.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEmail {
    id: EmailId,
    thread_id: ThreadId,
    from_email: String,
    to_email: String,
    subject: String,
    body: String,
    #[serde(rename = "send_time")]
    received_at: DateTime<Utc>,
}

/// Raw field values handed to [`CanonicalEmail::new`] by a converter.
#[derive(Debug, Clone, Default)]
pub struct EmailFields {
    /// Provider-native message id.
    pub id: String,
    /// Provider-native conversation id, if the back end has one.
    pub thread_id: Option<String>,
    /// Sender address.
    pub from_email: String,
    /// Primary recipient address, or empty when there is none.
    pub to_email: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: Option<String>,
    /// Receipt timestamp.
    pub received_at: DateTime<Utc>,
}

impl CanonicalEmail {
    /// Builds a canonical email, applying the thread-id and body fallbacks.
    pub fn new(fields: EmailFields) -> Self {
        let thread_id = match fields.thread_id {
            Some(thread) if !thread.trim().is_empty() => thread,
            _ => fields.id.clone(),
        };
        let body = match fields.body {
            Some(body) if !body.trim().is_empty() => body,
            _ => NO_BODY.to_string(),
        };

        Self {
            id: EmailId::from(fields.id),
            thread_id: ThreadId::from(thread_id),
            from_email: fields.from_email,
            to_email: fields.to_email,
            subject: fields.subject,
            body,
            received_at: fields.received_at,
        }
    }

    pub fn id(&self) -> &EmailId {
        &self.id
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn from_email(&self) -> &str {
        &self.from_email
    }

    pub fn to_email(&self) -> &str {
        &self.to_email
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Receipt time as an ISO 8601 UTC string (`2024-01-15T10:30:00Z`).
    pub fn send_time(&self) -> String {
        self.received_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates a new address with email and display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// Parses a header value like `"Name" <email@example.com>`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let (Some(start), Some(end)) = (value.find('<'), value.rfind('>')) {
            if start < end {
                let email = value[start + 1..end].trim().to_string();
                let name = value[..start].trim().trim_matches('"').to_string();
                return Self {
                    email,
                    name: if name.is_empty() { None } else { Some(name) },
                };
            }
        }
        Self::new(value)
    }

    /// Parses an RFC 5322 address-list header value, dropping empty entries.
    ///
    /// Quoted display names may contain commas and group members are
    /// flattened. A value mailparse rejects is split on commas instead.
    pub fn parse_list(value: &str) -> Vec<Self> {
        let addresses: Vec<Self> = match mailparse::addrparse(value) {
            Ok(list) => list
                .iter()
                .flat_map(|entry| match entry {
                    MailAddr::Single(info) => vec![Self::from_single(info)],
                    MailAddr::Group(group) => group.addrs.iter().map(Self::from_single).collect(),
                })
                .collect(),
            Err(_) => value.split(',').map(Self::parse).collect(),
        };
        addresses
            .into_iter()
            .filter(|addr| !addr.email.is_empty())
            .collect()
    }

    fn from_single(info: &SingleInfo) -> Self {
        Self {
            email: info.addr.trim().to_string(),
            name: info
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    /// Returns the display representation of this address.
    ///
    /// If a name is present, returns "Name <email>", otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }

    /// The part of the address before `@`.
    pub fn local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or_default()
    }
}

/// Shallow syntactic check: one `@`, a non-empty local part and a dotted domain.
pub fn is_valid_address(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = value.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}
