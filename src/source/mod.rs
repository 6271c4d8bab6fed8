//! Message sources. Each yields raw RFC 822 messages, newest first.

pub mod imap_client;
pub mod line;
pub mod mailbox;
pub mod nntp;
pub mod pipe;
pub mod pop3;

use anyhow::Result;
use log::info;

use crate::config::SourceConfig;

/// One undecoded message as delivered by a transport.
pub type RawMessage = Vec<u8>;

/// Pull-based, finite, not restartable. An `Err` item is a transport
/// failure and ends the run.
pub type MessageIter<'a> = Box<dyn Iterator<Item = Result<RawMessage>> + 'a>;

pub trait MessageSource {
    /// All available messages, newest first.
    fn messages(&mut self) -> Result<MessageIter<'_>>;
}

/// Connect to the configured source.
pub fn open(config: &SourceConfig) -> Result<Box<dyn MessageSource>> {
    info!("Initializing the message source");
    let source: Box<dyn MessageSource> = match config {
        SourceConfig::Pipe => Box::new(pipe::PipeSource::stdin()),
        SourceConfig::Mbox { path } => Box::new(mailbox::MboxSource::new(path)),
        SourceConfig::Maildir { path } => Box::new(mailbox::MaildirSource::new(path)),
        SourceConfig::Pop3 {
            endpoint,
            credentials,
            ssl,
        } => {
            if *ssl {
                Box::new(pop3::Pop3Client::connect_tls(endpoint, credentials)?)
            } else {
                Box::new(pop3::Pop3Client::connect(endpoint, credentials)?)
            }
        }
        SourceConfig::Imap {
            endpoint,
            credentials,
            mailbox,
            ssl,
        } => {
            if *ssl {
                Box::new(imap_client::ImapClient::connect_tls(endpoint, credentials, mailbox)?)
            } else {
                Box::new(imap_client::ImapClient::connect(endpoint, credentials, mailbox)?)
            }
        }
        SourceConfig::Nntp {
            endpoint,
            group,
            credentials,
        } => Box::new(nntp::NntpClient::connect(endpoint, group, credentials.as_ref())?),
    };
    Ok(source)
}
