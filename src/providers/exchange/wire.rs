//! Microsoft Graph v1.0 wire types and their conversion to the canonical model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{
    Address, CalendarEvent, CanonicalEmail, EmailFields, EventTiming, ValidatedInvite,
    ZonedDateTime,
};
use crate::normalize::{all_day_date, body_to_text, exchange_datetime, windows_timezone};
use crate::providers::{ProviderError, Result};

/// Fields requested when listing messages.
pub(super) const MESSAGE_FIELDS: &str =
    "id,conversationId,subject,from,toRecipients,ccRecipients,body,receivedDateTime,internetMessageId";

/// Fields requested when resolving the message being replied to.
pub(super) const REPLY_FIELDS: &str = "id,conversationId,subject,from,ccRecipients,internetMessageId";

/// Fields requested when listing events.
pub(super) const EVENT_FIELDS: &str = "subject,start,end,isAllDay,location,bodyPreview";

const INVALID_MESSAGE: &str = "Invalid Exchange message format";

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub(super) struct GraphEmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphRecipient {
    #[serde(default)]
    pub email_address: GraphEmailAddress,
}

impl GraphRecipient {
    fn from_address(address: &Address) -> Self {
        Self {
            email_address: GraphEmailAddress {
                address: Some(address.email.clone()),
                name: address.name.clone(),
            },
        }
    }

    fn to_address(&self) -> Option<Address> {
        let email = self
            .email_address
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())?;
        Some(Address {
            email: email.to_string(),
            name: self.email_address.name.clone().filter(|n| !n.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphBody {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A message as returned by `/me/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphMessage {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<GraphRecipient>,
    pub to_recipients: Option<Vec<GraphRecipient>>,
    pub cc_recipients: Option<Vec<GraphRecipient>>,
    pub body: Option<GraphBody>,
    pub received_date_time: Option<String>,
    pub internet_message_id: Option<String>,
}

impl GraphMessage {
    pub fn sender(&self) -> Option<Address> {
        self.from.as_ref().and_then(GraphRecipient::to_address)
    }

    pub fn cc(&self) -> Vec<Address> {
        self.cc_recipients
            .iter()
            .flatten()
            .filter_map(GraphRecipient::to_address)
            .collect()
    }
}

/// Converts one `/me/messages` record into a [`CanonicalEmail`].
///
/// The id is required. A missing conversation id falls back to the message
/// id, HTML bodies are reduced to text.
pub(super) fn to_canonical(record: Value) -> Result<CanonicalEmail> {
    let message: GraphMessage = serde_json::from_value(record)
        .map_err(|e| ProviderError::Internal(format!("{INVALID_MESSAGE}: {e}")))?;

    let id = message
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ProviderError::Internal(INVALID_MESSAGE.to_string()))?;

    let received_at = message
        .received_date_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            ProviderError::Internal(format!("{INVALID_MESSAGE}: bad receivedDateTime"))
        })?;

    let to_email = message
        .to_recipients
        .iter()
        .flatten()
        .find_map(GraphRecipient::to_address)
        .map(|a| a.email)
        .unwrap_or_default();

    let body = message.body.as_ref().map(|b| {
        body_to_text(b.content_type.as_deref(), b.content.as_deref().unwrap_or_default())
    });

    Ok(CanonicalEmail::new(EmailFields {
        from_email: message.sender().map(|a| a.email).unwrap_or_default(),
        thread_id: message.conversation_id,
        subject: message.subject.unwrap_or_default(),
        id,
        to_email,
        body,
        received_at,
    }))
}

// ---------------------------------------------------------------------------
// Outgoing mail
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct MessageHeader {
    pub name: &'static str,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OutgoingMessage {
    pub subject: String,
    pub body: GraphBody,
    pub to_recipients: Vec<GraphRecipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc_recipients: Vec<GraphRecipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub internet_message_headers: Vec<MessageHeader>,
}

/// Body of `POST /me/sendMail`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMailRequest {
    pub message: OutgoingMessage,
    pub save_to_sent_items: bool,
}

impl SendMailRequest {
    pub fn reply(
        subject: String,
        text: &str,
        to: &[Address],
        cc: &[Address],
        in_reply_to: Option<&str>,
    ) -> Self {
        let internet_message_headers = in_reply_to
            .filter(|id| !id.is_empty())
            .map(|id| {
                vec![
                    MessageHeader {
                        name: "In-Reply-To",
                        value: id.to_string(),
                    },
                    MessageHeader {
                        name: "References",
                        value: id.to_string(),
                    },
                ]
            })
            .unwrap_or_default();

        Self {
            message: OutgoingMessage {
                subject,
                body: GraphBody {
                    content_type: Some("Text".to_string()),
                    content: Some(text.to_string()),
                },
                to_recipients: to.iter().map(GraphRecipient::from_address).collect(),
                cc_recipients: cc.iter().map(GraphRecipient::from_address).collect(),
                internet_message_headers,
            },
            save_to_sent_items: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Sub-requests addressed by their index within the chunk.
pub(super) fn mark_read_batch(ids: &[&str]) -> Value {
    let requests: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(index, id)| {
            json!({
                "id": index.to_string(),
                "method": "PATCH",
                "url": format!("/me/messages/{id}"),
                "headers": {"Content-Type": "application/json"},
                "body": {"isRead": true},
            })
        })
        .collect();
    json!({ "requests": requests })
}

#[derive(Debug, Deserialize)]
pub(super) struct BatchItem {
    pub id: String,
    pub status: u16,
}

#[derive(Debug, Deserialize)]
pub(super) struct BatchResponse {
    #[serde(default)]
    pub responses: Vec<BatchItem>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    subject: Option<String>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    #[serde(default)]
    is_all_day: bool,
    location: Option<GraphLocation>,
    body_preview: Option<String>,
}

fn zoned(value: GraphDateTime) -> ZonedDateTime {
    ZonedDateTime {
        date_time: value.date_time,
        time_zone: value
            .time_zone
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string()),
    }
}

/// Converts one `/me/events` record into a [`CalendarEvent`].
pub(super) fn to_event(record: Value) -> Result<CalendarEvent> {
    let event: GraphEvent = serde_json::from_value(record)
        .map_err(|e| ProviderError::Internal(format!("invalid event: {e}")))?;
    let (Some(start), Some(end)) = (event.start, event.end) else {
        return Err(ProviderError::Internal("event without start or end".to_string()));
    };

    let timing = if event.is_all_day {
        match (all_day_date(&start.date_time), all_day_date(&end.date_time)) {
            (Some(start), Some(end)) => EventTiming::AllDay { start, end },
            _ => {
                return Err(ProviderError::Internal(format!(
                    "invalid all-day date: {}",
                    start.date_time
                )))
            }
        }
    } else {
        EventTiming::Timed {
            start: zoned(start),
            end: zoned(end),
        }
    };

    Ok(CalendarEvent {
        title: event.subject.unwrap_or_default(),
        timing,
        location: event
            .location
            .and_then(|l| l.display_name)
            .filter(|l| !l.is_empty()),
        description: event.body_preview.filter(|d| !d.trim().is_empty()),
    })
}

/// `POST /me/events` body for an invite.
pub(super) fn invite_event(invite: &ValidatedInvite) -> Value {
    let timezone = windows_timezone(&invite.timezone);
    let attendees: Vec<Value> = invite
        .attendees
        .iter()
        .map(|email| {
            let address = Address::new(email.as_str());
            json!({
                "emailAddress": {"address": email, "name": address.local_part()},
                "type": "required",
            })
        })
        .collect();

    json!({
        "subject": invite.title,
        "body": {
            "contentType": "HTML",
            "content": format!("Meeting invitation: {}", invite.title),
        },
        "start": {"dateTime": exchange_datetime(&invite.start), "timeZone": timezone},
        "end": {"dateTime": exchange_datetime(&invite.end), "timeZone": timezone},
        "attendees": attendees,
        "isOnlineMeeting": true,
        "onlineMeetingProvider": "teamsForBusiness",
        "isReminderOn": true,
        "reminderMinutesBeforeStart": 15,
        "showAs": "busy",
        "importance": "normal",
        "sensitivity": "normal",
        "allowNewTimeProposals": true,
    })
}
