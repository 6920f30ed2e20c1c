//! Canonical calendar types.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

use super::email::is_valid_address;

/// A date-time as the back end stated it, with its timezone name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZonedDateTime {
    /// Wall-clock or RFC 3339 value, unmodified.
    pub date_time: String,
    /// Timezone name (IANA or Windows), `UTC` when the back end gave none.
    pub time_zone: String,
}

/// When an event happens.
///
/// All-day events carry dates only and timed events carry zoned date-times
/// on both ends, so a single event can never mix the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTiming {
    AllDay { start: NaiveDate, end: NaiveDate },
    Timed { start: ZonedDateTime, end: ZonedDateTime },
}

/// A calendar event in provider-agnostic form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub title: String,
    pub timing: EventTiming,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        matches!(self.timing, EventTiming::AllDay { .. })
    }
}

/// Why an invite was rejected before reaching the back end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InviteError {
    #[error("Emails must be a non-empty list")]
    NoAttendees,

    #[error("Invalid email address: {0}")]
    InvalidAttendee(String),

    #[error("Title must be a non-empty string")]
    EmptyTitle,

    #[error("Invalid user email address: {0}")]
    InvalidOrganizer(String),

    #[error("Invalid datetime format: {0}")]
    InvalidDateTime(String),

    #[error("End time must be after start time")]
    EndBeforeStart,
}

/// A meeting invitation as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRequest {
    /// Attendee addresses.
    pub attendees: Vec<String>,
    /// Event title.
    pub title: String,
    /// Start as ISO 8601 (`2024-07-01T14:00:00Z` or without offset).
    pub start: String,
    /// End, same format as `start`.
    pub end: String,
    /// Timezone name or abbreviation (`PST`, `America/New_York`, ...).
    pub timezone: String,
}

/// An invite whose fields have passed [`InviteRequest::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedInvite {
    pub attendees: Vec<String>,
    pub title: String,
    /// Wall-clock start in `timezone`.
    pub start: NaiveDateTime,
    /// Wall-clock end in `timezone`.
    pub end: NaiveDateTime,
    pub timezone: String,
}

impl InviteRequest {
    pub fn new(
        attendees: Vec<String>,
        title: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            attendees,
            title: title.into(),
            start: start.into(),
            end: end.into(),
            timezone: timezone.into(),
        }
    }

    /// Checks attendees, title, organizer and time window.
    ///
    /// # Errors
    ///
    /// Returns the first [`InviteError`] encountered, in that order.
    pub fn validate(&self, organizer: &str) -> Result<ValidatedInvite, InviteError> {
        if self.attendees.is_empty() {
            return Err(InviteError::NoAttendees);
        }
        let attendees: Vec<String> = self.attendees.iter().map(|a| a.trim().to_string()).collect();
        if let Some(bad) = attendees.iter().find(|a| !is_valid_address(a)) {
            return Err(InviteError::InvalidAttendee(bad.clone()));
        }

        let title = self.title.trim();
        if title.is_empty() {
            return Err(InviteError::EmptyTitle);
        }

        if !is_valid_address(organizer.trim()) {
            return Err(InviteError::InvalidOrganizer(organizer.to_string()));
        }

        let start = parse_wall_clock(&self.start)
            .ok_or_else(|| InviteError::InvalidDateTime(self.start.clone()))?;
        let end = parse_wall_clock(&self.end)
            .ok_or_else(|| InviteError::InvalidDateTime(self.end.clone()))?;
        if end <= start {
            return Err(InviteError::EndBeforeStart);
        }

        Ok(ValidatedInvite {
            attendees,
            title: title.to_string(),
            start,
            end,
            timezone: self.timezone.trim().to_string(),
        })
    }
}

/// Parses an ISO 8601 date-time and keeps its wall-clock reading.
///
/// An offset, if present, is dropped rather than applied.
pub fn parse_wall_clock(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .ok()
}
