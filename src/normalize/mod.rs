//! Conversion between back-end wire formats and the canonical model.
//!
//! - [`html`] - message bodies to plain text
//! - [`reply`] - reply subject and recipient rules
//! - [`time`] - dates, timezone names and date-time rendering
//! - [`agenda`] - the per-day text blocks returned by `list_events`

pub mod agenda;
pub mod html;
pub mod reply;
pub mod time;

pub use crate::domain::NO_BODY;
pub use agenda::{day_block, day_header, format_event, invalid_day_block};
pub use html::{body_to_text, collapse_whitespace, decode_entities, html_to_text, plain_text};
pub use reply::{reply_subject, ReplyRecipients};
pub use time::{
    all_day_date, exchange_datetime, format_in_timezone, iana_timezone, parse_day,
    windows_timezone,
};
