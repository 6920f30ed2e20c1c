//! Dates, timezones and date-time rendering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;

/// Maps a timezone abbreviation to its Windows name, as the enterprise back
/// end expects. Unrecognized names are returned unchanged.
pub fn windows_timezone(name: &str) -> String {
    let mapped = match name.trim().to_ascii_uppercase().as_str() {
        "PST" | "PDT" | "PT" => "Pacific Standard Time",
        "MST" | "MDT" | "MT" => "Mountain Standard Time",
        "CST" | "CDT" | "CT" => "Central Standard Time",
        "EST" | "EDT" | "ET" => "Eastern Standard Time",
        "UTC" | "GMT" | "Z" => "UTC",
        _ => return name.trim().to_string(),
    };
    mapped.to_string()
}

/// Maps a timezone abbreviation to an IANA name, as the consumer back end
/// expects. Unrecognized names are returned unchanged.
pub fn iana_timezone(name: &str) -> String {
    let mapped = match name.trim().to_ascii_uppercase().as_str() {
        "PST" | "PDT" | "PT" => "America/Los_Angeles",
        "MST" | "MDT" | "MT" => "America/Denver",
        "CST" | "CDT" | "CT" => "America/Chicago",
        "EST" | "EDT" | "ET" => "America/New_York",
        "UTC" | "GMT" | "Z" => "UTC",
        _ => return name.trim().to_string(),
    };
    mapped.to_string()
}

/// Renders a wall-clock time the way the enterprise back end writes them:
/// `2024-07-01T14:00:00.0000000`.
pub fn exchange_datetime(value: &NaiveDateTime) -> String {
    format!(
        "{}.{:07}",
        value.format("%Y-%m-%dT%H:%M:%S"),
        value.nanosecond() % 1_000_000_000 / 100
    )
}

/// Date of an all-day event: the raw value truncated at the `T` separator.
pub fn all_day_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.split('T').next().unwrap_or(raw).trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Parses a `dd-mm-yyyy` day string.
pub fn parse_day(day: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(day.trim(), "%d-%m-%Y").ok()
}

/// Renders `value` in the timezone `tz` as `2024-01-15 02:00 AM PST`.
///
/// Instants with an offset are converted into `tz`; wall-clock values are
/// read as local to `tz`. When `tz` is not an IANA name the wall-clock
/// reading is kept and the name appended. Unparseable input is returned
/// unchanged.
pub fn format_in_timezone(value: &str, tz: &str) -> String {
    let zone = tz.trim().parse::<Tz>().ok();

    if let Ok(instant) = DateTime::parse_from_rfc3339(value.trim()) {
        return match zone {
            Some(zone) => instant
                .with_timezone(&zone)
                .format("%Y-%m-%d %I:%M %p %Z")
                .to_string(),
            None => instant.format("%Y-%m-%d %I:%M %p %:z").to_string(),
        };
    }

    let Ok(naive) = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f") else {
        return value.to_string();
    };
    match zone.and_then(|zone| zone.from_local_datetime(&naive).earliest()) {
        Some(local) => local.format("%Y-%m-%d %I:%M %p %Z").to_string(),
        None if tz.trim().is_empty() => naive.format("%Y-%m-%d %I:%M %p").to_string(),
        None => format!("{} {}", naive.format("%Y-%m-%d %I:%M %p"), tz.trim()),
    }
}
