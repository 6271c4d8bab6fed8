//! Feed synchronization: load, ingest newest-first until a known message,
//! trim, save.

use anyhow::Result;
use log::{debug, info, warn};
use mailparse::ParsedMail;
use std::path::PathBuf;

use crate::domain::feed::{Content, ContentType, Entry, Feed, RetentionPolicy};
use crate::feed::datetime::{Timestamp, format_atom_date};
use crate::mail::decoders::{
    ContentPreference, decode_header_text, extract_content, preferred_content, strip_list_tags,
};
use crate::mail::identity::{author_from, fingerprint, published_date, raw_header};
use crate::source::MessageSource;

/// How one message becomes an entry.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub strip_subject: bool,
    pub charset: String,
    pub prefer: ContentPreference,
}

/// Why ingestion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source had nothing more.
    Exhausted,
    /// Reached a message already in the feed.
    KnownMessage,
    /// Added more than `max_items` in this run.
    ItemCap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub skipped: usize,
    pub stop: StopReason,
    pub entries: usize,
}

pub struct FeedSync {
    pub feed_path: PathBuf,
    pub uri: String,
    pub title: String,
    pub retention: RetentionPolicy,
    pub entry: EntryOptions,
}

impl FeedSync {
    /// One complete run. Only transport errors and the final write fail it.
    pub fn run(&self, source: &mut dyn MessageSource, now: Timestamp) -> Result<SyncReport> {
        let mut feed = Feed::load(&self.feed_path, &self.uri, &self.title);
        debug!("Current time: {}", format_atom_date(&now));
        debug!("Feed last updated: {}", format_atom_date(&feed.updated()));

        let (added, skipped, stop) = self.ingest(&mut feed, source, now)?;

        feed.set_updated(now);
        feed.save(&self.feed_path, self.retention, now)?;
        Ok(SyncReport {
            added,
            skipped,
            stop,
            entries: feed.entries().len(),
        })
    }

    fn ingest(
        &self,
        feed: &mut Feed,
        source: &mut dyn MessageSource,
        now: Timestamp,
    ) -> Result<(usize, usize, StopReason)> {
        let mut added = 0usize;
        let mut skipped = 0usize;
        let max_items = self.retention.max_items;

        for raw in source.messages()? {
            let raw = raw?;
            let message = match mailparse::parse_mail(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Unable to parse message ({e}); skipping");
                    skipped += 1;
                    continue;
                }
            };

            let entry_id = feed.entry_id(&fingerprint(&message.headers));
            if feed.contains_entry(&entry_id) {
                info!("Message already in feed. Stopped retrieving.");
                return Ok((added, skipped, StopReason::KnownMessage));
            }

            info!("Adding new message to the feed");
            feed.append_entry(build_entry(entry_id, &message, &self.entry, now));
            added += 1;
            if max_items > 0 && added as i64 > max_items {
                info!("Maximum # of items reached. Stopped retrieving.");
                return Ok((added, skipped, StopReason::ItemCap));
            }
        }
        Ok((added, skipped, StopReason::Exhausted))
    }
}

/// Turn a parsed message into a feed entry stamped with `now`.
pub fn build_entry(id: String, message: &ParsedMail<'_>, opts: &EntryOptions, now: Timestamp) -> Entry {
    let headers = &message.headers;

    let from = decode_header_text(raw_header(headers, "From"), "Anonymous", &opts.charset);
    let author = author_from(&from);
    debug!("Author: {} ({})", author.name, author.email.as_deref().unwrap_or(""));

    let published = published_date(headers);
    debug!("Published: {}", format_atom_date(&published));

    let mut title = decode_header_text(raw_header(headers, "Subject"), "(No Subject)", &opts.charset);
    if opts.strip_subject {
        title = strip_list_tags(&title);
    }
    debug!("Title: {title}");

    // Parts without a charset inherit the message's, then the configured one.
    let default_charset = if message.ctype.params.contains_key("charset") {
        message.ctype.charset.as_str()
    } else {
        opts.charset.as_str()
    };
    let content = match preferred_content(extract_content(message, default_charset), opts.prefer) {
        Some((kind, body)) => Content { kind, body },
        None => {
            warn!("No valid contents found");
            Content {
                kind: ContentType::Text,
                body: title.clone(),
            }
        }
    };

    Entry {
        id,
        author,
        published,
        updated: Some(now),
        title,
        content,
    }
}
