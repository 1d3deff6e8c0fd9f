//! Clock formatting for message timestamps.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Wire format of message timestamps.
pub const CLOCK_FORMAT: &str = "%H:%M:%S";

/// Format a DateTime<Utc> in the given timezone.
///
/// Falls back to UTC when the timezone name is unknown.
pub fn format_utc_datetime(dt: &DateTime<Utc>, timezone: &str, format: &str) -> String {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return dt.format(format).to_string(),
    };
    dt.with_timezone(&tz).format(format).to_string()
}

/// Current wall-clock time as `HH:MM:SS` in the given timezone.
pub fn clock_now(timezone: &str) -> String {
    format_utc_datetime(&Utc::now(), timezone, CLOCK_FORMAT)
}
