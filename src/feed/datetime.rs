//! Atom date-time handling.
//!
//! Feeds written by this program carry timestamps like
//! `2024-03-01T10:15:00.250000+01:00`. Reading is deliberately narrow: the
//! date, the time, an optional fraction and an optional hour-only offset.
//! Whatever follows the offset hours (`:00`, `Z`, ...) is ignored, and a
//! missing offset reads as UTC.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, TimeZone, Timelike};

/// Timestamp type used throughout the feed model.
pub type Timestamp = DateTime<FixedOffset>;

const SECONDS_PER_HOUR: i32 = 3600;

/// Sentinel for unknown dates: 0001-01-01T00:00:00+00:00.
pub fn min_timestamp() -> Timestamp {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| utc().from_utc_datetime(&naive))
        .expect("0001-01-01 is representable")
}

/// Current local time with its UTC offset rounded to whole hours and the
/// clock truncated to microseconds, so that [`parse_atom_date`] reads back
/// exactly what [`format_atom_date`] writes.
pub fn now_local() -> Timestamp {
    let now = Local::now();
    let now = now
        .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now);
    let seconds = now.offset().fix().local_minus_utc();
    let hours = (seconds as f64 / SECONDS_PER_HOUR as f64).round() as i32;
    let offset = FixedOffset::east_opt(hours * SECONDS_PER_HOUR)
        .unwrap_or_else(utc);
    now.with_timezone(&offset)
}

/// `ts` at an offset [`parse_atom_date`] can read back: unchanged when the
/// offset is whole hours, otherwise the same instant in UTC.
pub fn with_hour_offset(ts: Timestamp) -> Timestamp {
    if ts.offset().local_minus_utc() % SECONDS_PER_HOUR == 0 {
        ts
    } else {
        ts.with_timezone(&utc())
    }
}

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).expect("zero offset is valid")
}

/// Render a timestamp as `YYYY-MM-DDTHH:MM:SS[.ffffff]+HH:MM`.
///
/// The fraction is written only when the microsecond part is non-zero.
pub fn format_atom_date(ts: &Timestamp) -> String {
    let micros = ts.nanosecond() / 1_000;
    let base = ts.format("%Y-%m-%dT%H:%M:%S");
    let offset = ts.format("%:z");
    if micros == 0 {
        format!("{base}{offset}")
    } else {
        format!("{base}.{micros:06}{offset}")
    }
}

/// Parse the narrow Atom grammar. Returns `None` if the fixed-width
/// date/time prefix is malformed or out of range.
pub fn parse_atom_date(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    let bytes = text.as_bytes();
    if bytes.len() < 19
        || bytes[4] != b'-'
        || bytes[7] != b'-'
        || bytes[10] != b'T'
        || bytes[13] != b':'
        || bytes[16] != b':'
    {
        return None;
    }

    let field = |range: std::ops::Range<usize>| -> Option<u32> {
        let s = text.get(range)?;
        if s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };
    let year = field(0..4)? as i32;
    let month = field(5..7)?;
    let day = field(8..10)?;
    let hour = field(11..13)?;
    let minute = field(14..16)?;
    let second = field(17..19)?;

    let mut rest = &text[19..];
    let mut micros = 0u32;
    if let Some(frac) = rest.strip_prefix('.') {
        let digits = frac.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            // Right-pad to microseconds; anything past six digits is dropped.
            let kept = &frac[..digits.min(6)];
            micros = format!("{kept:0<6}").parse().ok()?;
            rest = &frac[digits..];
        }
    }

    let mut offset_hours = 0i32;
    let rb = rest.as_bytes();
    if rb.len() >= 3
        && (rb[0] == b'+' || rb[0] == b'-')
        && rb[1].is_ascii_digit()
        && rb[2].is_ascii_digit()
    {
        let hours: i32 = rest[1..3].parse().ok()?;
        offset_hours = if rb[0] == b'-' { -hours } else { hours };
    }

    let offset = FixedOffset::east_opt(offset_hours * SECONDS_PER_HOUR)?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_micro_opt(hour, minute, second, micros)?;
    offset.from_local_datetime(&naive).single()
}
