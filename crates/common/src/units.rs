use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("Unrecognised transfer string: {0:?}")]
    Transfer(String),
    #[error("Unknown size unit: {0:?}")]
    UnknownUnit(String),
    #[error("Unrecognised traffic limit: {0:?}")]
    Quota(String),
    #[error("Unknown lifetime choice: {0:?}")]
    Lifetime(String),
}

/// Raw per-peer counters as reported by the interface, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReading {
    pub received: u64,
    pub sent: u64,
}

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*([A-Za-z]+)").expect("static regex"));

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*([A-Za-z]+)$").expect("static regex"));

static LIFETIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([1-9][0-9]*)\s*([hdwm])$").expect("static regex"));

const UNLIMITED_WORDS: [&str; 4] = ["unlimited", "неограниченно", "∞", "♾️"];

/// Multiplier for a unit as printed by `wg show`. Case matters: `KiB` and
/// `KB` are different prefixes.
fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit {
        "B" => 1,
        "KB" | "kB" => 1_000,
        "KiB" => 1 << 10,
        "MB" => 1_000_000,
        "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "GiB" => 1 << 30,
        "TB" => 1_000_000_000_000,
        "TiB" => 1 << 40,
        _ => return None,
    };
    Some(multiplier)
}

fn size_to_bytes(value: &str, unit: &str) -> Result<u64, UnitParseError> {
    let multiplier =
        unit_multiplier(unit).ok_or_else(|| UnitParseError::UnknownUnit(unit.to_string()))?;
    let value: f64 = value
        .parse()
        .map_err(|_| UnitParseError::Transfer(value.to_string()))?;
    Ok((value * multiplier as f64).round() as u64)
}

fn parse_size_prefix(part: &str, whole: &str) -> Result<u64, UnitParseError> {
    let caps = SIZE_RE
        .captures(part)
        .ok_or_else(|| UnitParseError::Transfer(whole.to_string()))?;
    size_to_bytes(&caps[1], &caps[2])
}

/// Parses the `transfer:` field of `wg show`.
///
/// Both `"1.50 MiB received, 200.00 KB sent"` and the compact
/// `"1.50 MiB/200.00 KB"` shapes are accepted. The first figure is what the
/// server received from the peer.
pub fn parse_transfer(transfer: &str) -> Result<TransferReading, UnitParseError> {
    let (received, sent) = match transfer.split_once('/') {
        Some(pair) => pair,
        None => transfer
            .split_once(',')
            .ok_or_else(|| UnitParseError::Transfer(transfer.to_string()))?,
    };
    Ok(TransferReading {
        received: parse_size_prefix(received, transfer)?,
        sent: parse_size_prefix(sent, transfer)?,
    })
}

/// Parses an admin-facing traffic limit such as `"10 GB"`.
/// Returns `None` for the unlimited choice.
pub fn parse_traffic_limit(limit: &str) -> Result<Option<u64>, UnitParseError> {
    let trimmed = limit.trim();
    if UNLIMITED_WORDS
        .iter()
        .any(|word| trimmed.to_lowercase() == *word)
    {
        return Ok(None);
    }
    let caps = LIMIT_RE
        .captures(trimmed)
        .ok_or_else(|| UnitParseError::Quota(limit.to_string()))?;
    let unit = &caps[2];
    // Admin input is case-insensitive for decimal units; binary units keep
    // their exact spelling.
    let normalized = match unit.to_ascii_uppercase().as_str() {
        upper @ ("B" | "KB" | "MB" | "GB" | "TB") => upper.to_string(),
        _ => unit.to_string(),
    };
    let bytes = size_to_bytes(&caps[1], &normalized)
        .map_err(|_| UnitParseError::Quota(limit.to_string()))?;
    if bytes == 0 {
        return Err(UnitParseError::Quota(limit.to_string()));
    }
    Ok(Some(bytes))
}

/// Parses a lifetime choice: `1h`, `1d`, `1w`, `1m` (30 days) or `unlimited`.
/// Any positive count is accepted for the four units.
pub fn parse_lifetime(choice: &str) -> Result<Option<Duration>, UnitParseError> {
    let trimmed = choice.trim();
    if UNLIMITED_WORDS
        .iter()
        .any(|word| trimmed.to_lowercase() == *word)
    {
        return Ok(None);
    }
    let caps = LIFETIME_RE
        .captures(trimmed)
        .ok_or_else(|| UnitParseError::Lifetime(choice.to_string()))?;
    let count: i64 = caps[1]
        .parse()
        .map_err(|_| UnitParseError::Lifetime(choice.to_string()))?;
    let duration = match &caps[2] {
        "h" => Duration::try_hours(count),
        "d" => Duration::try_days(count),
        "w" => Duration::try_weeks(count),
        "m" => count.checked_mul(30).and_then(Duration::try_days),
        _ => None,
    };
    duration
        .map(Some)
        .ok_or_else(|| UnitParseError::Lifetime(choice.to_string()))
}

/// Formats a byte count with decimal prefixes, e.g. `11.00 MB`.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1_000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1_000.0 {
            break;
        }
        value /= 1_000.0;
        unit = next;
    }
    format!("{value:.2} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_keeps_binary_and_decimal_prefixes_apart() {
        let reading = parse_transfer("1.50 MiB received, 200.00 KB sent").unwrap();
        assert_eq!(reading.received, 1_572_864);
        assert_eq!(reading.sent, 200_000);
    }

    #[test]
    fn test_parse_transfer_compact_form() {
        let reading = parse_transfer("2 GiB/512 B").unwrap();
        assert_eq!(reading.received, 2 * 1024 * 1024 * 1024);
        assert_eq!(reading.sent, 512);
    }

    #[test]
    fn test_parse_transfer_rejects_garbage() {
        assert!(matches!(
            parse_transfer("no data"),
            Err(UnitParseError::Transfer(_))
        ));
        assert!(matches!(
            parse_transfer("1.0 XB received, 2 B sent"),
            Err(UnitParseError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_parse_traffic_limit() {
        assert_eq!(parse_traffic_limit("10 GB").unwrap(), Some(10_000_000_000));
        assert_eq!(parse_traffic_limit("5gb").unwrap(), Some(5_000_000_000));
        assert_eq!(parse_traffic_limit("1 GiB").unwrap(), Some(1 << 30));
        assert_eq!(parse_traffic_limit("Неограниченно").unwrap(), None);
        assert_eq!(parse_traffic_limit("unlimited").unwrap(), None);
        assert!(parse_traffic_limit("0 GB").is_err());
        assert!(parse_traffic_limit("lots").is_err());
    }

    #[test]
    fn test_parse_lifetime() {
        assert_eq!(parse_lifetime("1h").unwrap(), Some(Duration::hours(1)));
        assert_eq!(parse_lifetime("1w").unwrap(), Some(Duration::weeks(1)));
        assert_eq!(parse_lifetime("1m").unwrap(), Some(Duration::days(30)));
        assert_eq!(parse_lifetime("unlimited").unwrap(), None);
        assert!(parse_lifetime("0d").is_err());
        assert!(parse_lifetime("soon").is_err());
    }

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(999), "999 B");
        assert_eq!(humanize_bytes(11_000_000), "11.00 MB");
        assert_eq!(humanize_bytes(1_500), "1.50 KB");
    }
}
