//! Conversion between SRT timestamps and milliseconds

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DubSyncError, Result};

lazy_static! {
    static ref TIMECODE_RE: Regex =
        Regex::new(r"^(\d{2,}):(\d{2}):(\d{2})[,.](\d{3})$").expect("valid timecode regex");
}

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// Parse `HH:MM:SS,mmm` or `HH:MM:SS.mmm` into milliseconds.
///
/// Hours may have more than two digits; minutes and seconds must be below 60.
pub fn parse(text: &str) -> Result<u64> {
    let text = text.trim();
    let caps = TIMECODE_RE
        .captures(text)
        .ok_or_else(|| DubSyncError::MalformedTimecode(text.to_string()))?;

    let field = |i: usize| -> Result<u64> {
        caps[i]
            .parse::<u64>()
            .map_err(|_| DubSyncError::MalformedTimecode(text.to_string()))
    };

    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let millis = field(4)?;

    if minutes >= 60 || seconds >= 60 {
        return Err(DubSyncError::MalformedTimecode(text.to_string()));
    }

    hours
        .checked_mul(MS_PER_HOUR)
        .and_then(|ms| ms.checked_add(minutes * MS_PER_MINUTE + seconds * MS_PER_SECOND + millis))
        .ok_or_else(|| DubSyncError::MalformedTimecode(text.to_string()))
}

/// Format milliseconds as `HH:MM:SS,mmm`
pub fn format(ms: u64) -> String {
    let hours = ms / MS_PER_HOUR;
    let minutes = (ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (ms % MS_PER_MINUTE) / MS_PER_SECOND;
    let millis = ms % MS_PER_SECOND;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Milliseconds as fractional seconds, the unit ffmpeg expects for `-ss`/`-t`
pub fn to_seconds(ms: u64) -> f64 {
    ms as f64 / MS_PER_SECOND as f64
}
