use base64::{Engine as _, engine::general_purpose};
use log::warn;
use mailparse::ParsedMail;
use regex::Regex;
use std::sync::OnceLock;

use crate::domain::feed::ContentType;

/// Charset used when a header or body carries 8-bit bytes but declares none.
pub const DEFAULT_CHARSET: &str = "iso-8859-1";

/// Which body part to publish when a message has both text and HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPreference {
    #[default]
    Text,
    Html,
}

pub fn decode_mime_words(raw: &[u8]) -> String {
    // mailparse expects a full "Key: value" header line
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value(), // decodes RFC 2047 encoded-words
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Decode `bytes` with the charset named by `label`, replacing malformed
/// sequences. Unknown labels fall back to Latin-1.
pub fn decode_with_charset(bytes: &[u8], label: &str) -> String {
    if bytes.is_ascii() {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    // mailparse reaches its charset table only through encoded-word
    // decoding, so the bytes travel as one base64 word. Only 8-bit input
    // pays for this; ASCII returned above.
    let word = format!("=?{}?B?{}?=", label.trim(), general_purpose::STANDARD.encode(bytes));
    let decoded = decode_mime_words(word.as_bytes());
    if decoded == word {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        decoded
    }
}

/// Decode a raw header value.
///
/// Encoded-words use their declared charset. Raw 8-bit values declare
/// nothing, so they are read with `default_charset`. A missing or blank
/// header yields `fallback`.
pub fn decode_header_text(raw: Option<&[u8]>, fallback: &str, default_charset: &str) -> String {
    let raw = match raw {
        Some(r) if !r.iter().all(u8::is_ascii_whitespace) => r,
        _ => return fallback.to_string(),
    };
    if raw.is_ascii() {
        decode_mime_words(raw)
    } else {
        unfold(&decode_with_charset(raw, default_charset))
    }
}

fn unfold(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim_start)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Collect every `text/plain` and `text/html` leaf in document order.
pub fn extract_content(part: &ParsedMail<'_>, default_charset: &str) -> Vec<(ContentType, String)> {
    let mut out = Vec::new();
    collect_content(part, default_charset, &mut out);
    out
}

fn collect_content(part: &ParsedMail<'_>, default_charset: &str, out: &mut Vec<(ContentType, String)>) {
    if !part.subparts.is_empty() || part.ctype.mimetype.starts_with("multipart/") {
        for sp in &part.subparts {
            collect_content(sp, default_charset, out);
        }
        return;
    }

    let kind = match part.ctype.mimetype.to_ascii_lowercase().as_str() {
        "text/plain" => ContentType::Text,
        "text/html" => ContentType::Html,
        _ => return,
    };

    let raw = match part.get_body_raw() {
        Ok(raw) if !raw.is_empty() => raw,
        Ok(_) => {
            warn!("Missing payload in message");
            return;
        }
        Err(e) => {
            warn!("Unable to decode message payload: {e}");
            return;
        }
    };

    let text = if part.ctype.params.contains_key("charset") {
        part.get_body()
            .unwrap_or_else(|_| decode_with_charset(&raw, &part.ctype.charset))
    } else {
        decode_with_charset(&raw, default_charset)
    };
    out.push((kind, text));
}

/// Pick the body to publish: the first leaf of the preferred type, else the
/// first leaf of any type.
pub fn preferred_content(
    contents: Vec<(ContentType, String)>,
    preference: ContentPreference,
) -> Option<(ContentType, String)> {
    let wanted = match preference {
        ContentPreference::Text => ContentType::Text,
        ContentPreference::Html => ContentType::Html,
    };
    let index = contents
        .iter()
        .position(|(kind, _)| *kind == wanted)
        .unwrap_or(0);
    contents.into_iter().nth(index)
}

/// Remove mailing-list tags such as `[dev-list]` from a subject.
pub fn strip_list_tags(subject: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"\[[a-zA-Z0-9:_. -]*\]\s*").expect("valid tag regex"));
    tag.replace_all(subject, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_header_encoded_words() {
        let raw = b"=?UTF-8?Q?Caf=C3=A9?= au lait";
        assert_eq!(decode_header_text(Some(raw), "x", DEFAULT_CHARSET), "Café au lait");
    }

    #[test]
    fn test_decode_header_raw_8bit_uses_default_charset() {
        let raw = b"Caf\xe9 cr\xe8me";
        assert_eq!(decode_header_text(Some(raw), "x", "iso-8859-1"), "Café crème");
    }

    #[test]
    fn test_decode_header_fallback() {
        assert_eq!(decode_header_text(None, "(No Subject)", DEFAULT_CHARSET), "(No Subject)");
        assert_eq!(decode_header_text(Some(b"  "), "Anonymous", DEFAULT_CHARSET), "Anonymous");
    }

    #[test]
    fn test_decode_with_unknown_charset_is_latin1() {
        assert_eq!(decode_with_charset(b"na\xefve", "x-no-such-charset"), "naïve");
    }

    #[test]
    fn test_decode_multiline_latin1_body() {
        let body = b"Gr\xfc\xdfe,\r\n\r\nfa\xe7ade r\xe9nov\xe9e.\r\n";
        assert_eq!(
            decode_with_charset(body, "iso-8859-1"),
            "Grüße,\r\n\r\nfaçade rénovée.\r\n"
        );
    }

    #[test]
    fn test_strip_list_tags() {
        assert_eq!(strip_list_tags("[dev-list] Release 1.0"), "Release 1.0");
        assert_eq!(strip_list_tags("Re: [PATCH v2] fix"), "Re: fix");
        assert_eq!(strip_list_tags("No tags here"), "No tags here");
    }

    #[test]
    fn test_extract_multipart_in_order() {
        let raw = b"Content-Type: multipart/alternative; boundary=\"b\"\r\n\r\n\
--b\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nplain body\r\n\
--b\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<p>html body</p>\r\n\
--b\r\nContent-Type: image/png\r\n\r\nxx\r\n\
--b--\r\n";
        let parsed = mailparse::parse_mail(raw).unwrap();
        let contents = extract_content(&parsed, DEFAULT_CHARSET);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].0, ContentType::Text);
        assert!(contents[0].1.starts_with("plain body"));
        assert_eq!(contents[1].0, ContentType::Html);
        assert!(contents[1].1.starts_with("<p>html body</p>"));
    }

    #[test]
    fn test_extract_skips_empty_payload() {
        let raw = b"Content-Type: text/plain\r\n\r\n";
        let parsed = mailparse::parse_mail(raw).unwrap();
        assert!(extract_content(&parsed, DEFAULT_CHARSET).is_empty());
    }

    #[test]
    fn test_extract_undeclared_charset_uses_default() {
        let raw = b"Content-Type: text/plain\r\n\r\nd\xe9j\xe0 vu\r\n";
        let parsed = mailparse::parse_mail(raw).unwrap();
        let contents = extract_content(&parsed, "iso-8859-1");
        assert!(contents[0].1.starts_with("déjà vu"));
    }

    #[test]
    fn test_preferred_content() {
        let both = vec![
            (ContentType::Html, "<b>h</b>".to_string()),
            (ContentType::Text, "t".to_string()),
        ];
        assert_eq!(
            preferred_content(both.clone(), ContentPreference::Text).unwrap().0,
            ContentType::Text
        );
        assert_eq!(
            preferred_content(both, ContentPreference::Html).unwrap().0,
            ContentType::Html
        );
        let html_only = vec![(ContentType::Html, "<i>x</i>".to_string())];
        assert_eq!(
            preferred_content(html_only, ContentPreference::Text).unwrap().0,
            ContentType::Html
        );
        assert!(preferred_content(Vec::new(), ContentPreference::Text).is_none());
    }
}
