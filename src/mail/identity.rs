//! Stable identity for a message: its fingerprint, its date and its author.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use log::warn;
use mailparse::{MailAddr, MailHeader, MailHeaderMap};
use sha2::{Digest, Sha256};

use crate::domain::feed::Author;
use crate::feed::datetime::{Timestamp, min_timestamp, with_hour_offset};

const FINGERPRINT_HEADERS: [&str; 3] = ["From", "Subject", "Date"];

/// Raw bytes of the first header named `name`, exactly as received.
pub fn raw_header<'a>(headers: &'a [MailHeader<'a>], name: &str) -> Option<&'a [u8]> {
    headers.get_first_header(name).map(|h| h.get_value_raw())
}

/// Hex SHA-256 over the raw `From`, `Subject` and `Date` values, in that
/// order. Missing headers contribute nothing.
pub fn fingerprint(headers: &[MailHeader<'_>]) -> String {
    let mut hasher = Sha256::new();
    for name in FINGERPRINT_HEADERS {
        if let Some(value) = raw_header(headers, name) {
            hasher.update(value);
        }
    }
    format!("{:x}", hasher.finalize())
}

/// The message's `Date`. A whole-hour UTC offset is kept; any other offset
/// is converted to UTC so the value survives the feed's date format.
///
/// Unparseable or missing dates log a warning and give the minimum timestamp.
pub fn published_date(headers: &[MailHeader<'_>]) -> Timestamp {
    let Some(raw) = headers.get_first_value("Date") else {
        warn!("Message has no Date header");
        return min_timestamp();
    };
    let value = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return with_hour_offset(date);
    }
    // Lenient fallback; mailparse only yields an epoch, so the offset is lost.
    if let Some(date) = mailparse::dateparse(value)
        .ok()
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
    {
        let utc = FixedOffset::east_opt(0).expect("zero offset is valid");
        return date.with_timezone(&utc);
    }
    warn!("Unable to parse date '{value}'");
    min_timestamp()
}

/// Split a decoded `From` value into an Atom author.
///
/// Only a display name together with an address gives a separate email;
/// anything else keeps the whole header text as the name.
pub fn author_from(decoded_from: &str) -> Author {
    let single = mailparse::addrparse(decoded_from)
        .ok()
        .and_then(|list| match list.iter().next() {
            Some(MailAddr::Single(info)) => Some(info.clone()),
            _ => None,
        });
    match single {
        Some(info)
            if !info.addr.is_empty()
                && info.display_name.as_deref().is_some_and(|n| !n.trim().is_empty()) =>
        {
            Author {
                name: info.display_name.unwrap_or_default().trim().to_string(),
                email: Some(info.addr),
            }
        }
        _ => Author {
            name: decoded_from.to_string(),
            email: None,
        },
    }
}
