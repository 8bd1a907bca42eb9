use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// A peer counts as online when its last handshake is at most this old.
pub const ONLINE_WINDOW_SECONDS: i64 = 60;

const NO_HANDSHAKE_MARKERS: [&str; 4] = ["never", "-", "(none)", "нет данных"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Online,
    Offline,
    /// No handshake was ever seen, or the handshake text was unreadable.
    Unknown,
}

fn unit_to_duration(count: i64, unit: &str) -> Option<Duration> {
    if unit.starts_with("second") {
        Duration::try_seconds(count)
    } else if unit.starts_with("minute") {
        Duration::try_minutes(count)
    } else if unit.starts_with("hour") {
        Duration::try_hours(count)
    } else if unit.starts_with("day") {
        Duration::try_days(count)
    } else if unit.starts_with("week") {
        Duration::try_weeks(count)
    } else if unit.starts_with("month") {
        count.checked_mul(30).and_then(Duration::try_days)
    } else if unit.starts_with("year") {
        count.checked_mul(365).and_then(Duration::try_days)
    } else {
        None
    }
}

/// Turns `wg show`'s `latest handshake` text (e.g. `"3 minutes, 12 seconds ago"`)
/// into an absolute instant relative to `now`.
///
/// Returns `None` for "never" markers and for anything it cannot read; callers
/// treat that as offline/unknown.
pub fn parse_relative_time(relative: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lowered = relative.trim().to_lowercase();
    if lowered.is_empty() || NO_HANDSHAKE_MARKERS.contains(&lowered.as_str()) {
        return None;
    }
    if lowered == "now" {
        return Some(now);
    }
    let body = lowered.strip_suffix("ago").unwrap_or(&lowered).trim();

    let mut total = Duration::zero();
    let mut recognised = false;
    for part in body.split(',') {
        let mut words = part.split_whitespace();
        let (Some(count), Some(unit)) = (words.next(), words.next()) else {
            debug!(input = %relative, "Malformed relative time component.");
            return None;
        };
        let Ok(count) = count.parse::<i64>() else {
            debug!(input = %relative, "Non-numeric relative time component.");
            return None;
        };
        if let Some(step) = unit_to_duration(count, unit) {
            total = total.checked_add(&step)?;
            recognised = true;
        }
    }

    if !recognised {
        return None;
    }
    now.checked_sub_signed(total)
}

pub fn classify_handshake(
    last_handshake: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ConnectionStatus {
    match last_handshake {
        Some(at) if now - at <= Duration::seconds(ONLINE_WINDOW_SECONDS) => {
            ConnectionStatus::Online
        }
        Some(_) => ConnectionStatus::Offline,
        None => ConnectionStatus::Unknown,
    }
}
