use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use native_tls::TlsStream;
use std::io::{Read, Write};
use std::net::TcpStream;

use super::line::{connect_tcp, connect_tls};
use super::{MessageIter, MessageSource, RawMessage};
use crate::config::{Credentials, Endpoint};

const IMAP_PORT: u16 = 143;
const IMAPS_PORT: u16 = 993;

pub struct ImapClient<T: Read + Write> {
    session: imap::Session<T>,
    mailbox: String,
    logged_out: bool,
}

impl ImapClient<TcpStream> {
    pub fn connect(endpoint: &Endpoint, credentials: &Credentials, mailbox: &str) -> Result<Self> {
        info!("Initializing IMAP client");
        Self::login(connect_tcp(endpoint, IMAP_PORT)?, credentials, mailbox)
    }
}

impl ImapClient<TlsStream<TcpStream>> {
    pub fn connect_tls(endpoint: &Endpoint, credentials: &Credentials, mailbox: &str) -> Result<Self> {
        info!("Initializing IMAP client (TLS)");
        Self::login(connect_tls(endpoint, IMAPS_PORT)?, credentials, mailbox)
    }
}

impl<T: Read + Write> ImapClient<T> {
    fn login(stream: T, credentials: &Credentials, mailbox: &str) -> Result<Self> {
        let mut client = imap::Client::new(stream);
        client.read_greeting().context("IMAP greeting")?;

        info!("Authenticating");
        let mut session = client
            .login(&credentials.user, &credentials.password)
            .map_err(|(e, _)| anyhow!("IMAP login failed: {e}"))?;

        info!("Opening mailbox '{mailbox}'");
        let selected = session
            .select(mailbox)
            .with_context(|| format!("selecting mailbox {mailbox}"))?;
        debug!("{} has {} messages", mailbox, selected.exists);

        Ok(Self {
            session,
            mailbox: mailbox.to_string(),
            logged_out: false,
        })
    }

    /// Fetch one message by sequence number without setting `\Seen`.
    /// `Ok(None)` if the server returned no body even after a retry.
    fn fetch_message(&mut self, seq: u32) -> Result<Option<RawMessage>> {
        info!("Fetching message {seq}");
        let fetches = self.session.fetch(seq.to_string(), "BODY.PEEK[]")?;
        if let Some(body) = fetches.iter().next().and_then(|f| f.body()) {
            return Ok(Some(body.to_vec()));
        }

        // Retry once
        let retry = self.session.fetch(seq.to_string(), "RFC822")?;
        if let Some(body) = retry.iter().next().and_then(|f| f.body()) {
            return Ok(Some(body.to_vec()));
        }

        warn!("Message {} in {} has no body even after retry; skipping", seq, self.mailbox);
        Ok(None)
    }

    pub fn logout(&mut self) -> Result<()> {
        if !self.logged_out {
            self.logged_out = true;
            self.session.logout()?;
        }
        Ok(())
    }
}

impl<T: Read + Write> Drop for ImapClient<T> {
    fn drop(&mut self) {
        if let Err(e) = self.logout() {
            warn!("IMAP logout failed: {e}");
        }
    }
}

impl<T: Read + Write> MessageSource for ImapClient<T> {
    fn messages(&mut self) -> Result<MessageIter<'_>> {
        info!("Retrieving relevant message numbers");
        let mut seqs: Vec<u32> = self.session.search("ALL")?.into_iter().collect();
        seqs.sort_unstable_by(|a, b| b.cmp(a)); // newest first
        Ok(Box::new(
            seqs.into_iter()
                .filter_map(move |seq| self.fetch_message(seq).transpose()),
        ))
    }
}
