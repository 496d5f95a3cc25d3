//! Recording names.

use chrono::{DateTime, FixedOffset, Utc};

/// Display format of the recording timestamp, e.g. `3:04pm Jan 02 2025`.
const RECORDING_TIME_FORMAT: &str = "%-I:%M%P %b %d %Y";

/// Resolve a team timezone to a fixed offset.
///
/// Accepts UTC aliases and fixed offsets (`+05:30`, `-0800`, `UTC+2`).
/// Returns `None` for anything else so callers can fall back to UTC.
pub fn parse_timezone(timezone: &str) -> Option<FixedOffset> {
    let tz = timezone.trim();
    match tz.to_ascii_uppercase().as_str() {
        "UTC" | "GMT" | "Z" | "ETC/UTC" | "ETC/GMT" => return FixedOffset::east_opt(0),
        _ => {}
    }

    let offset = tz
        .strip_prefix("UTC")
        .or_else(|| tz.strip_prefix("GMT"))
        .unwrap_or(tz);

    let (sign, rest) = match offset.chars().next()? {
        '+' => (1, &offset[1..]),
        '-' => (-1, &offset[1..]),
        _ => return None,
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Name a finished recording, e.g. `Zoom Recording 3:04pm Jan 02 2025`.
///
/// The second value is `false` when the timezone was not recognized and UTC
/// was used instead.
pub fn recording_name(prefix: &str, timezone: &str, now: DateTime<Utc>) -> (String, bool) {
    match parse_timezone(timezone) {
        Some(offset) => {
            let local = now.with_timezone(&offset);
            (format!("{} {}", prefix, local.format(RECORDING_TIME_FORMAT)), true)
        }
        None => (format!("{} {}", prefix, now.format(RECORDING_TIME_FORMAT)), false),
    }
}
