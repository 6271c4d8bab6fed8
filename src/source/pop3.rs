use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use native_tls::TlsStream;
use std::io::{Read, Write};
use std::net::TcpStream;

use super::line::{LineStream, connect_tcp, connect_tls};
use super::{MessageIter, MessageSource, RawMessage};
use crate::config::{Credentials, Endpoint};

const POP3_PORT: u16 = 110;
const POP3S_PORT: u16 = 995;

pub struct Pop3Client<S: Read + Write> {
    stream: LineStream<S>,
    closed: bool,
}

impl Pop3Client<TcpStream> {
    pub fn connect(endpoint: &Endpoint, credentials: &Credentials) -> Result<Self> {
        info!("Initializing POP3 client");
        Self::login(connect_tcp(endpoint, POP3_PORT)?, credentials)
    }
}

impl Pop3Client<TlsStream<TcpStream>> {
    pub fn connect_tls(endpoint: &Endpoint, credentials: &Credentials) -> Result<Self> {
        info!("Initializing POP3 client (TLS)");
        Self::login(connect_tls(endpoint, POP3S_PORT)?, credentials)
    }
}

impl<S: Read + Write> Pop3Client<S> {
    /// Read the greeting and authenticate with USER/PASS.
    pub fn login(stream: S, credentials: &Credentials) -> Result<Self> {
        let mut client = Self {
            stream: LineStream::new(stream),
            closed: false,
        };
        client.expect_ok().context("POP3 greeting")?;
        info!("Authenticating");
        client.command(&format!("USER {}", credentials.user), None)?;
        client
            .command(&format!("PASS {}", credentials.password), Some("PASS ****"))
            .map_err(|e| anyhow!("POP3 authentication failed: {e}"))?;
        Ok(client)
    }

    fn expect_ok(&mut self) -> Result<String> {
        let line = self.stream.read_line()?;
        debug!("< {line}");
        match line.strip_prefix("+OK") {
            Some(rest) => Ok(rest.trim().to_string()),
            None => bail!("server replied `{line}`"),
        }
    }

    fn command(&mut self, command: &str, shown: Option<&str>) -> Result<String> {
        self.stream.send(command, shown)?;
        self.expect_ok()
    }

    /// Number of messages in the maildrop.
    pub fn stat(&mut self) -> Result<u32> {
        let reply = self.command("STAT", None)?;
        reply
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow!("malformed STAT reply `{reply}`"))
    }

    pub fn retrieve(&mut self, number: u32) -> Result<RawMessage> {
        debug!("Retrieving message {number}");
        self.command(&format!("RETR {number}"), None)
            .with_context(|| format!("RETR {number}"))?;
        self.stream.read_multiline()
    }

    pub fn quit(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.command("QUIT", None)?;
        }
        Ok(())
    }
}

impl<S: Read + Write> Drop for Pop3Client<S> {
    fn drop(&mut self) {
        if let Err(e) = self.quit() {
            warn!("POP3 QUIT failed: {e}");
        }
    }
}

impl<S: Read + Write> MessageSource for Pop3Client<S> {
    fn messages(&mut self) -> Result<MessageIter<'_>> {
        info!("Retrieving POP3 list");
        let count = self.stat()?;
        debug!("{count} messages waiting");
        Ok(Box::new((1..=count).rev().map(move |n| self.retrieve(n))))
    }
}
