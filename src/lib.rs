//! Convert mail into an Atom (RFC 4287) feed.
//!
//! Messages are read from stdin, an mbox file, a Maildir, POP3, IMAP or
//! NNTP, newest first. Each run appends the messages not yet in the feed,
//! trims the feed to its retention limits and rewrites the file.

pub mod config;
pub mod domain;
pub mod feed;
pub mod logging;
pub mod mail;
pub mod source;
pub mod sync;
