//! Atom 1.0 reading and writing.
//!
//! This is the only place that knows about XML. Everything else works on
//! [`Feed`] and [`Entry`] values.

use anyhow::{Result, anyhow, bail};
use log::warn;
use std::borrow::Cow;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::domain::feed::{Author, Content, ContentType, Entry, Feed, Generator};
use crate::feed::datetime::{format_atom_date, min_timestamp, parse_atom_date};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Serialize a feed as an indented UTF-8 Atom document.
pub fn write_feed(feed: &Feed) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("feed");
    root.push_attribute(("xmlns", ATOM_NS));
    writer.write_event(Event::Start(root))?;

    text_element(&mut writer, "id", feed.id())?;
    text_element(&mut writer, "title", feed.title())?;

    let mut link = BytesStart::new("link");
    link.push_attribute(("rel", "self"));
    link.push_attribute(("href", &*xml_text(feed.self_link())));
    writer.write_event(Event::Empty(link))?;

    text_element(&mut writer, "updated", &format_atom_date(&feed.updated()))?;

    if let Some(generator) = feed.generator() {
        let mut start = BytesStart::new("generator");
        start.push_attribute(("version", &*xml_text(&generator.version)));
        start.push_attribute(("uri", &*xml_text(&generator.uri)));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&xml_text(&generator.name))))?;
        writer.write_event(Event::End(BytesEnd::new("generator")))?;
    }

    for entry in feed.entries() {
        write_entry(&mut writer, entry)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;

    let mut xml = String::from_utf8(writer.into_inner())?;
    xml.push('\n');
    Ok(xml)
}

fn write_entry(writer: &mut Writer<Vec<u8>>, entry: &Entry) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("entry")))?;
    text_element(writer, "id", &entry.id)?;

    writer.write_event(Event::Start(BytesStart::new("author")))?;
    text_element(writer, "name", &entry.author.name)?;
    if let Some(email) = &entry.author.email {
        text_element(writer, "email", email)?;
    }
    writer.write_event(Event::End(BytesEnd::new("author")))?;

    text_element(writer, "published", &format_atom_date(&entry.published))?;
    if let Some(updated) = &entry.updated {
        text_element(writer, "updated", &format_atom_date(updated))?;
    }
    text_element(writer, "title", &entry.title)?;

    let mut content = BytesStart::new("content");
    content.push_attribute(("type", entry.content.kind.as_str()));
    writer.write_event(Event::Start(content))?;
    writer.write_event(Event::Text(BytesText::new(&xml_text(&entry.content.body))))?;
    writer.write_event(Event::End(BytesEnd::new("content")))?;

    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(&xml_text(text))))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Mail text may hold control characters (form feeds, terminal escapes)
/// that XML 1.0 forbids; those become U+FFFD.
fn xml_text(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(
            text.chars()
                .map(|c| if is_xml_char(c) { c } else { '\u{FFFD}' })
                .collect(),
        )
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

#[derive(Default)]
struct EntryBuilder {
    id: Option<String>,
    author_name: Option<String>,
    author_email: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    title: Option<String>,
    content_type: Option<String>,
    content: Option<String>,
}

impl EntryBuilder {
    fn build(self) -> Option<Entry> {
        let id = self.id.filter(|id| !id.is_empty())?;
        Some(Entry {
            author: Author {
                name: self.author_name.unwrap_or_default(),
                email: self.author_email.filter(|e| !e.is_empty()),
            },
            published: self
                .published
                .as_deref()
                .and_then(parse_atom_date)
                .unwrap_or_else(min_timestamp),
            updated: self.updated.as_deref().and_then(parse_atom_date),
            title: self.title.unwrap_or_default(),
            content: Content {
                kind: ContentType::from_attr(self.content_type.as_deref()),
                body: self.content.unwrap_or_default(),
            },
            id,
        })
    }
}

#[derive(Default)]
struct FeedBuilder {
    id: Option<String>,
    title: Option<String>,
    link: Option<String>,
    updated: Option<String>,
    generator: Option<Generator>,
    entries: Vec<Entry>,
    current: Option<EntryBuilder>,
}

impl FeedBuilder {
    fn open(&mut self, path: &[&str], attrs: &[(String, String)]) {
        let attr = |name: &str| {
            attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        match path {
            ["feed", "entry"] => self.current = Some(EntryBuilder::default()),
            ["feed", "link"] => {
                let rel = attr("rel");
                if self.link.is_none() || rel.as_deref() == Some("self") {
                    self.link = attr("href");
                }
            }
            ["feed", "generator"] => {
                self.generator = Some(Generator {
                    name: String::new(),
                    version: attr("version").unwrap_or_default(),
                    uri: attr("uri").unwrap_or_default(),
                });
            }
            ["feed", "entry", "content"] => {
                if let Some(entry) = self.current.as_mut() {
                    entry.content_type = attr("type");
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, path: &[&str], text: String) {
        match path {
            ["feed", "id"] => self.id = Some(text),
            ["feed", "title"] => self.title = Some(text),
            ["feed", "updated"] => self.updated = Some(text),
            ["feed", "generator"] => {
                if let Some(generator) = self.generator.as_mut() {
                    generator.name = text;
                }
            }
            ["feed", "entry"] => {
                if let Some(entry) = self.current.take().and_then(EntryBuilder::build) {
                    self.entries.push(entry);
                } else {
                    warn!("Dropping feed entry without an id");
                }
            }
            ["feed", "entry", leaf] => {
                let Some(entry) = self.current.as_mut() else {
                    return;
                };
                match *leaf {
                    "id" => entry.id = Some(text),
                    "published" => entry.published = Some(text),
                    "updated" => entry.updated = Some(text),
                    "title" => entry.title = Some(text),
                    "content" => entry.content = Some(text),
                    _ => {}
                }
            }
            ["feed", "entry", "author", "name"] => {
                if let Some(entry) = self.current.as_mut() {
                    entry.author_name = Some(text);
                }
            }
            ["feed", "entry", "author", "email"] => {
                if let Some(entry) = self.current.as_mut() {
                    entry.author_email = Some(text);
                }
            }
            _ => {}
        }
    }

    fn build(self) -> Feed {
        let mut feed = Feed::new(self.id.unwrap_or_default(), self.title.unwrap_or_default());
        if let Some(link) = self.link {
            feed.set_link(link);
        }
        if let Some(updated) = self.updated.as_deref().and_then(parse_atom_date) {
            feed.set_updated(updated);
        }
        if let Some(generator) = self.generator {
            feed.set_generator(generator);
        }
        for entry in self.entries {
            feed.append_entry(entry);
        }
        feed
    }
}

/// Parse an Atom document. Fails on malformed XML, on a truncated document
/// and on a root element other than `feed`.
pub fn read_feed(xml: &str) -> Result<Feed> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut builder = FeedBuilder::default();
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| anyhow!("XML error at position {}: {e}", reader.buffer_position()))?;
        match event {
            Event::Start(e) | Event::Empty(e) if seen_root && stack.is_empty() => {
                bail!(
                    "unexpected element `{}` after the feed root",
                    String::from_utf8_lossy(e.local_name().as_ref())
                );
            }
            Event::Start(e) => {
                let (name, attrs) = element_parts(&e)?;
                open_element(&mut stack, &mut builder, &mut seen_root, name, &attrs)?;
                text.clear();
            }
            Event::Empty(e) => {
                let (name, attrs) = element_parts(&e)?;
                open_element(&mut stack, &mut builder, &mut seen_root, name, &attrs)?;
                close_element(&mut stack, &mut builder, String::new());
                text.clear();
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => {
                close_element(&mut stack, &mut builder, std::mem::take(&mut text));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        bail!("document has no root element");
    }
    if !stack.is_empty() {
        bail!("document ends inside <{}>", stack.join("/"));
    }
    Ok(builder.build())
}

fn element_parts(e: &BytesStart<'_>) -> Result<(String, Vec<(String, String)>)> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        attrs.push((key, attr.unescape_value()?.into_owned()));
    }
    Ok((name, attrs))
}

fn open_element(
    stack: &mut Vec<String>,
    builder: &mut FeedBuilder,
    seen_root: &mut bool,
    name: String,
    attrs: &[(String, String)],
) -> Result<()> {
    if stack.is_empty() {
        if name != "feed" {
            bail!("root element is `{name}`, expected `feed`");
        }
        *seen_root = true;
    }
    stack.push(name);
    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
    builder.open(&path, attrs);
    Ok(())
}

fn close_element(stack: &mut Vec<String>, builder: &mut FeedBuilder, text: String) {
    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
    builder.close(&path, text);
    stack.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    const LEGACY_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?><feed xmlns="http://www.w3.org/2005/Atom"><id>http://example.com/list</id><link href="http://example.com/list" rel="self"/><title>List &amp; friends</title><updated>2024-03-01T10:15:00.250000+01:00</updated><generator uri="http://el-tramo.be/software/atomail" version="0.9-dev">AtoMail</generator><entry><id>http://example.com/list#0123</id><author><email>bob@example.com</email><name>Bob</name></author><published>2024-02-29T08:00:00+01:00</published><updated>2024-03-01T10:15:00.250000+01:00</updated><title>Hello</title><content type="html">&lt;p&gt;Hi&lt;/p&gt;</content></entry></feed>"#;

    #[test]
    fn test_read_legacy_layout() {
        let feed = read_feed(LEGACY_FEED).unwrap();
        assert_eq!(feed.id(), "http://example.com/list");
        assert_eq!(feed.title(), "List & friends");
        assert_eq!(feed.self_link(), "http://example.com/list");
        assert_eq!(
            feed.updated(),
            DateTime::parse_from_rfc3339("2024-03-01T10:15:00.25+01:00").unwrap()
        );
        assert_eq!(feed.generator().unwrap().version, "0.9-dev");

        let entry = &feed.entries()[0];
        assert_eq!(entry.id, "http://example.com/list#0123");
        assert_eq!(entry.author.name, "Bob");
        assert_eq!(entry.author.email.as_deref(), Some("bob@example.com"));
        assert_eq!(entry.content.kind, ContentType::Html);
        assert_eq!(entry.content.body, "<p>Hi</p>");
    }

    #[test]
    fn test_write_orders_singletons_before_entries() {
        let feed = read_feed(LEGACY_FEED).unwrap();
        let xml = write_feed(&feed).unwrap();
        let positions: Vec<usize> = ["<id>", "<title>", "<link", "<updated>", "<generator", "<entry>"]
            .iter()
            .map(|tag| xml.find(tag).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{xml}");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains(r#"<feed xmlns="http://www.w3.org/2005/Atom">"#));
        assert_eq!(xml.matches("<title>").count(), 2);
    }

    #[test]
    fn test_content_whitespace_survives() {
        let mut feed = read_feed(LEGACY_FEED).unwrap();
        feed.entries[0].content.body = "line one\n\n  indented\n".to_string();
        let back = read_feed(&write_feed(&feed).unwrap()).unwrap();
        assert_eq!(back.entries()[0].content.body, "line one\n\n  indented\n");
    }

    #[test]
    fn test_control_characters_are_replaced() {
        let mut feed = read_feed(LEGACY_FEED).unwrap();
        feed.entries[0].title = "bell\x07 here".to_string();
        feed.entries[0].content.body = "form\x0cfeed\ttab\nline".to_string();
        feed.entries[0].author.name = "esc\x1b[1m".to_string();

        let xml = write_feed(&feed).unwrap();
        assert!(!xml.contains('\x07'));
        assert!(!xml.contains('\x0c'));
        assert!(!xml.contains('\x1b'));

        let back = read_feed(&xml).unwrap();
        assert_eq!(back.entries()[0].title, "bell\u{FFFD} here");
        assert_eq!(back.entries()[0].content.body, "form\u{FFFD}feed\ttab\nline");
        assert_eq!(back.entries()[0].author.name, "esc\u{FFFD}[1m");
    }

    #[test]
    fn test_rejects_broken_documents() {
        assert!(read_feed("").is_err());
        assert!(read_feed("not xml at all").is_err());
        assert!(read_feed("<feed><id>x</id>").is_err());
        assert!(read_feed("<feed><id>x</title></feed>").is_err());
        assert!(read_feed("<rss><channel/></rss>").is_err());
    }
}
