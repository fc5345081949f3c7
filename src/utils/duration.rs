//! Duration parsing utilities.

use std::time::Duration;
use crate::constants::time;

/// Parses a duration string like "250ms", "30s", "5m", "1h" into a Duration.
///
/// # Arguments
/// * `s` - Duration string (e.g., "500ms", "30s", "5m", "1h")
///
/// # Returns
/// * `Ok(Duration)` on success
/// * `Err(&str)` with error message on failure
pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration");
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or("Missing duration unit")?;
    let (number, unit) = s.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| "Invalid number in duration")?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * time::SECONDS_PER_MINUTE)),
        "h" => Ok(Duration::from_secs(value * time::SECONDS_PER_HOUR)),
        _ => Err("Invalid duration unit")
    }
}
