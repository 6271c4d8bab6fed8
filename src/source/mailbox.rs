//! Local mailbox files: mbox and Maildir.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use super::{MessageIter, MessageSource, RawMessage};

/// A Unix mbox file. Messages are separated by lines starting with `From `.
pub struct MboxSource {
    path: PathBuf,
}

impl MboxSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Initializing mbox source (file={})", path.display());
        Self { path }
    }
}

impl MessageSource for MboxSource {
    fn messages(&mut self) -> Result<MessageIter<'_>> {
        info!("Reading mails from {}", self.path.display());
        let data = fs::read(&self.path)
            .with_context(|| format!("reading mbox {}", self.path.display()))?;
        let mut mails = split_mbox(&data);
        mails.reverse();
        Ok(Box::new(mails.into_iter().map(Ok)))
    }
}

/// Split mbox contents into messages, dropping the `From ` separator lines.
/// Anything before the first separator is ignored.
pub fn split_mbox(data: &[u8]) -> Vec<RawMessage> {
    let mut messages = Vec::new();
    let mut current: Option<RawMessage> = None;

    for line in data.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b"From ") {
            messages.extend(current.take());
            current = Some(Vec::new());
        } else if let Some(message) = current.as_mut() {
            message.extend_from_slice(line);
        }
    }
    messages.extend(current);
    messages
}

/// A Maildir directory; reads `new/` and `cur/`.
pub struct MaildirSource {
    path: PathBuf,
}

impl MaildirSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Initializing maildir source (dir={})", path.display());
        Self { path }
    }

    /// Message files sorted oldest first. Maildir names begin with the
    /// delivery time, so name order is delivery order.
    fn message_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for sub in ["new", "cur"] {
            let dir = self.path.join(sub);
            if !dir.is_dir() {
                debug!("Skipping missing {}", dir.display());
                continue;
            }
            for entry in
                fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))?
            {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                if entry.file_type()?.is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort_by(|a, b| file_name(a).cmp(file_name(b)));
        Ok(files)
    }
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or_default()
}

impl MessageSource for MaildirSource {
    fn messages(&mut self) -> Result<MessageIter<'_>> {
        info!("Reading mails from {}", self.path.display());
        let files = self.message_files()?;
        Ok(Box::new(files.into_iter().rev().map(|path| {
            fs::read(&path).with_context(|| format!("reading {}", path.display()))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_mbox() {
        let data = b"From alice Fri Mar  1 10:00:00 2024\nSubject: one\n\nfirst\n\n\
From bob Fri Mar  1 11:00:00 2024\nSubject: two\n\nsecond\n";
        let messages = split_mbox(data);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], b"Subject: one\n\nfirst\n\n".to_vec());
        assert_eq!(messages[1], b"Subject: two\n\nsecond\n".to_vec());
    }

    #[test]
    fn test_mbox_newest_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("box");
        fs::write(&path, "From a\nSubject: old\n\nx\nFrom b\nSubject: new\n\ny\n").unwrap();

        let mut source = MboxSource::new(&path);
        let messages: Vec<_> = source.messages().unwrap().collect::<Result<_>>().unwrap();
        assert!(messages[0].starts_with(b"Subject: new"));
        assert!(messages[1].starts_with(b"Subject: old"));
    }

    #[test]
    fn test_maildir_newest_first() {
        let dir = TempDir::new().unwrap();
        for sub in ["new", "cur", "tmp"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
        }
        fs::write(dir.path().join("cur/1700000000.1.host:2,S"), "Subject: oldest\n\n").unwrap();
        fs::write(dir.path().join("new/1700000200.3.host"), "Subject: newest\n\n").unwrap();
        fs::write(dir.path().join("cur/1700000100.2.host:2,"), "Subject: middle\n\n").unwrap();
        fs::write(dir.path().join("new/.hidden"), "Subject: ignored\n\n").unwrap();
        fs::write(dir.path().join("tmp/1700000300.4.host"), "Subject: partial\n\n").unwrap();

        let mut source = MaildirSource::new(dir.path());
        let subjects: Vec<String> = source
            .messages()
            .unwrap()
            .map(|m| String::from_utf8(m.unwrap()).unwrap())
            .collect();
        assert_eq!(
            subjects,
            vec![
                "Subject: newest\n\n",
                "Subject: middle\n\n",
                "Subject: oldest\n\n"
            ]
        );
    }
}
