pub mod atom;
pub mod datetime;

use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;

use crate::domain::feed::{Feed, Generator, RetentionPolicy};
use datetime::Timestamp;

impl Feed {
    /// Load the feed stored at `path`, or start a fresh one.
    ///
    /// A file that cannot be read or parsed is replaced by an empty feed
    /// (its entries are lost). The id, self link and title are applied in
    /// every case.
    pub fn load(path: &Path, uri: &str, title: &str) -> Feed {
        let mut feed = if path.is_file() {
            info!("Reading feed from {}", path.display());
            match fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|xml| atom::read_feed(&xml))
            {
                Ok(feed) => feed,
                Err(e) => {
                    warn!("Unable to parse feed ({e:#}). Resetting the file.");
                    Feed::new(uri, title)
                }
            }
        } else {
            info!("Creating new file {}", path.display());
            Feed::new(uri, title)
        };
        feed.set_id(uri);
        feed.set_link(uri);
        feed.set_title(title);
        feed
    }

    /// Stamp the generator, trim, and write the feed to `path`.
    pub fn save(&mut self, path: &Path, policy: RetentionPolicy, now: Timestamp) -> Result<()> {
        info!("Saving feed");
        self.set_generator(Generator::default());
        self.trim(policy, now);
        let xml = atom::write_feed(self)?;
        info!("Writing feed to file {}", path.display());
        fs::write(path, xml).with_context(|| format!("writing feed to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_fresh() {
        let dir = TempDir::new().unwrap();
        let feed = Feed::load(&dir.path().join("feed.xml"), "urn:x", "Title");
        assert_eq!(feed.id(), "urn:x");
        assert_eq!(feed.self_link(), "urn:x");
        assert_eq!(feed.title(), "Title");
        assert_eq!(feed.updated(), datetime::min_timestamp());
        assert!(feed.entries().is_empty());
    }

    #[test]
    fn test_load_reapplies_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.xml");
        let mut feed = Feed::load(&path, "urn:old", "Old");
        feed.save(&path, RetentionPolicy::default(), datetime::now_local())
            .unwrap();

        let reloaded = Feed::load(&path, "urn:new", "New");
        assert_eq!(reloaded.id(), "urn:new");
        assert_eq!(reloaded.self_link(), "urn:new");
        assert_eq!(reloaded.title(), "New");
        assert!(reloaded.generator().is_some());
    }

    #[test]
    fn test_load_corrupt_file_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.xml");
        fs::write(&path, "<feed><entry><id>half").unwrap();
        let feed = Feed::load(&path, "urn:x", "Title");
        assert!(feed.entries().is_empty());
        assert_eq!(feed.updated(), datetime::min_timestamp());
    }
}
