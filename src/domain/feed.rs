use chrono::Duration;
use log::debug;

use crate::feed::datetime::{Timestamp, min_timestamp};

pub const PROGRAM_NAME: &str = "AtoMail";
pub const PROGRAM_URI: &str = "http://el-tramo.be/software/atomail";
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Html,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Html => "html",
        }
    }

    /// Atom treats a missing or unknown `type` as text.
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("html") => ContentType::Html,
            _ => ContentType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub kind: ContentType,
    pub body: String,
}

/// One feed item, built from one ingested message.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub author: Author,
    pub published: Timestamp,
    /// `None` when a loaded entry had no readable `updated`; sorts oldest.
    pub updated: Option<Timestamp>,
    pub title: String,
    pub content: Content,
}

impl Entry {
    fn sort_key(&self) -> Timestamp {
        self.updated.unwrap_or_else(min_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generator {
    pub name: String,
    pub version: String,
    pub uri: String,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            name: PROGRAM_NAME.to_string(),
            version: PROGRAM_VERSION.to_string(),
            uri: PROGRAM_URI.to_string(),
        }
    }
}

/// Retention limits applied on save. A value `<= 0` disables that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_items: i64,
    pub max_age_minutes: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_items: 10,
            max_age_minutes: -1,
        }
    }
}

/// An Atom feed of messages.
///
/// Every feed-level singleton is a single field, so a `set_*` call always
/// replaces and never duplicates. The XML form lives in [`crate::feed::atom`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) self_link: String,
    pub(crate) updated: Timestamp,
    pub(crate) generator: Option<Generator>,
    pub(crate) entries: Vec<Entry>,
}

impl Feed {
    /// A fresh feed with no entries and the minimum `updated` timestamp.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            self_link: id.clone(),
            id,
            title: title.into(),
            updated: min_timestamp(),
            generator: None,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn self_link(&self) -> &str {
        &self.self_link
    }

    pub fn updated(&self) -> Timestamp {
        self.updated
    }

    pub fn generator(&self) -> Option<&Generator> {
        self.generator.as_ref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_link(&mut self, uri: impl Into<String>) {
        self.self_link = uri.into();
    }

    pub fn set_updated(&mut self, time: Timestamp) {
        self.updated = time;
    }

    pub fn set_generator(&mut self, generator: Generator) {
        self.generator = Some(generator);
    }

    /// Entry id for a message fingerprint, namespaced by the feed id.
    pub fn entry_id(&self, fingerprint: &str) -> String {
        format!("{}#{}", self.id, fingerprint)
    }

    pub fn contains_entry(&self, entry_id: &str) -> bool {
        self.entries.iter().any(|e| e.id == entry_id)
    }

    pub fn append_entry(&mut self, entry: Entry) {
        debug!("Appending entry {}", entry.id);
        self.entries.push(entry);
    }

    /// Drop redundant and outdated entries.
    ///
    /// Entries end up in ascending `updated` order (stable for ties). The
    /// count rule runs first, then the age rule against `now`.
    pub fn trim(&mut self, policy: RetentionPolicy, now: Timestamp) {
        debug!("Trimming entries");
        self.entries.sort_by_key(Entry::sort_key);

        if policy.max_items > 0 {
            let max = usize::try_from(policy.max_items).unwrap_or(usize::MAX);
            if self.entries.len() > max {
                let excess = self.entries.len() - max;
                debug!("Removing {excess} redundant entries");
                self.entries.drain(..excess);
            }
        }

        if policy.max_age_minutes > 0 {
            let cutoff = Duration::try_minutes(policy.max_age_minutes)
                .and_then(|age| now.checked_sub_signed(age))
                .unwrap_or_else(min_timestamp);
            let outdated = self
                .entries
                .iter()
                .take_while(|e| e.sort_key() < cutoff)
                .count();
            if outdated > 0 {
                debug!("Removing {outdated} outdated entries");
                self.entries.drain(..outdated);
            }
        }
    }
}
