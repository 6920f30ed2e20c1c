//! Plain-text agenda blocks returned by `list_events`.

use std::fmt::Write;

use crate::domain::{CalendarEvent, EventTiming, ZonedDateTime};

use super::time::format_in_timezone;

pub const NO_EVENTS: &str = "No events found for this day.";
pub const INVALID_DAY: &str = "Error: Invalid date format. Expected dd-mm-yyyy.";

const SEPARATOR_WIDTH: usize = 40;

/// Header opening every day block.
pub fn day_header(day: &str) -> String {
    format!("***FOR DAY {day}***\n\n")
}

/// Block for a day string that did not parse.
pub fn invalid_day_block(day: &str) -> String {
    format!("{}{INVALID_DAY}\n\n", day_header(day))
}

/// Block listing `events` under the header for `day`.
pub fn day_block(day: &str, events: &[CalendarEvent]) -> String {
    let mut block = day_header(day);
    if events.is_empty() {
        block.push_str(NO_EVENTS);
        block.push_str("\n\n");
        return block;
    }
    for event in events {
        block.push_str(&format_event(event));
    }
    block.push('\n');
    block
}

/// One event: title, start, end, optional location and description, then a
/// dashed separator.
pub fn format_event(event: &CalendarEvent) -> String {
    let (starts, ends) = match &event.timing {
        EventTiming::AllDay { start, end } => (
            format!("{} (all day)", start.format("%Y-%m-%d")),
            format!("{} (all day)", end.format("%Y-%m-%d")),
        ),
        EventTiming::Timed { start, end } => (render(start), render(end)),
    };

    let mut text = String::new();
    let _ = writeln!(text, "Event: {}", event.title);
    let _ = writeln!(text, "Starts: {starts}");
    let _ = writeln!(text, "Ends: {ends}");
    if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
        let _ = writeln!(text, "Location: {location}");
    }
    if let Some(description) = event.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(text, "Description: {description}");
    }
    text.push_str(&"-".repeat(SEPARATOR_WIDTH));
    text.push('\n');
    text
}

fn render(value: &ZonedDateTime) -> String {
    format_in_timezone(&value.date_time, &value.time_zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn standup() -> CalendarEvent {
        CalendarEvent {
            title: "Standup".to_string(),
            timing: EventTiming::Timed {
                start: ZonedDateTime {
                    date_time: "2024-01-15T09:00:00.0000000".to_string(),
                    time_zone: "UTC".to_string(),
                },
                end: ZonedDateTime {
                    date_time: "2024-01-15T09:15:00.0000000".to_string(),
                    time_zone: "UTC".to_string(),
                },
            },
            location: Some("Room 1".to_string()),
            description: None,
        }
    }

    #[test]
    fn empty_day_still_has_header() {
        assert_eq!(
            day_block("15-01-2024", &[]),
            "***FOR DAY 15-01-2024***\n\nNo events found for this day.\n\n"
        );
    }

    #[test]
    fn invalid_day_has_header_and_error() {
        let block = invalid_day_block("2024-01-15");
        assert!(block.starts_with("***FOR DAY 2024-01-15***"));
        assert!(block.contains(INVALID_DAY));
    }

    #[test]
    fn timed_event_lines() {
        let block = day_block("15-01-2024", &[standup()]);
        assert_eq!(
            block,
            "***FOR DAY 15-01-2024***\n\n\
             Event: Standup\n\
             Starts: 2024-01-15 09:00 AM UTC\n\
             Ends: 2024-01-15 09:15 AM UTC\n\
             Location: Room 1\n\
             ----------------------------------------\n\n"
        );
    }

    #[test]
    fn all_day_event_shows_dates_only() {
        let event = CalendarEvent {
            title: "Holiday".to_string(),
            timing: EventTiming::AllDay {
                start: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
            },
            location: None,
            description: Some("Office closed".to_string()),
        };
        let text = format_event(&event);
        assert!(text.contains("Starts: 2024-01-15 (all day)"));
        assert!(text.contains("Description: Office closed"));
        assert!(!text.contains("Location:"));
    }
}
