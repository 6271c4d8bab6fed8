use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::net::TcpStream;

use super::line::{LineStream, connect_tcp};
use super::{MessageIter, MessageSource, RawMessage};
use crate::config::{Credentials, Endpoint};

const NNTP_PORT: u16 = 119;

struct Reply {
    code: u16,
    text: String,
}

pub struct NntpClient<S: Read + Write> {
    stream: LineStream<S>,
    group: String,
    closed: bool,
}

impl NntpClient<TcpStream> {
    pub fn connect(endpoint: &Endpoint, group: &str, credentials: Option<&Credentials>) -> Result<Self> {
        info!("Initializing NNTP client");
        Self::login(connect_tcp(endpoint, NNTP_PORT)?, group, credentials)
    }
}

impl<S: Read + Write> NntpClient<S> {
    /// Read the greeting and, when credentials are given, AUTHINFO.
    pub fn login(stream: S, group: &str, credentials: Option<&Credentials>) -> Result<Self> {
        let mut client = Self {
            stream: LineStream::new(stream),
            group: group.to_string(),
            closed: false,
        };
        let greeting = client.reply()?;
        if !matches!(greeting.code, 200 | 201) {
            bail!("NNTP server refused connection: {} {}", greeting.code, greeting.text);
        }
        if let Some(creds) = credentials {
            info!("Authenticating");
            let reply = client.command(&format!("AUTHINFO USER {}", creds.user), None)?;
            let reply = if reply.code == 381 {
                client.command(&format!("AUTHINFO PASS {}", creds.password), Some("AUTHINFO PASS ****"))?
            } else {
                reply
            };
            if reply.code != 281 {
                bail!("NNTP authentication failed: {} {}", reply.code, reply.text);
            }
        }
        Ok(client)
    }

    fn reply(&mut self) -> Result<Reply> {
        let line = self.stream.read_line()?;
        debug!("< {line}");
        let (code, text) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let code = code
            .parse()
            .map_err(|_| anyhow!("malformed NNTP reply `{line}`"))?;
        Ok(Reply {
            code,
            text: text.to_string(),
        })
    }

    fn command(&mut self, command: &str, shown: Option<&str>) -> Result<Reply> {
        self.stream.send(command, shown)?;
        self.reply()
    }

    /// Select the group; returns the first and last article numbers.
    fn select_group(&mut self) -> Result<(u64, u64)> {
        let reply = self.command(&format!("GROUP {}", self.group), None)?;
        if reply.code != 211 {
            bail!("cannot select group {}: {} {}", self.group, reply.code, reply.text);
        }
        let fields: Vec<u64> = reply
            .text
            .split_whitespace()
            .take(3)
            .map(|f| f.parse())
            .collect::<Result<_, _>>()
            .with_context(|| format!("malformed GROUP reply `{}`", reply.text))?;
        match fields[..] {
            [_count, first, last] => Ok((first, last)),
            _ => bail!("malformed GROUP reply `{}`", reply.text),
        }
    }

    /// Fetch one article. `Ok(None)` when the server has no such article.
    pub fn article(&mut self, number: u64) -> Result<Option<RawMessage>> {
        debug!("Retrieving article {number}");
        let reply = self.command(&format!("ARTICLE {number}"), None)?;
        match reply.code {
            220 => Ok(Some(self.stream.read_multiline()?)),
            400..=499 => {
                debug!("Skipping article {number}: {} {}", reply.code, reply.text);
                Ok(None)
            }
            code => bail!("ARTICLE {number} failed: {code} {}", reply.text),
        }
    }

    pub fn quit(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.command("QUIT", None)?;
        }
        Ok(())
    }
}

impl<S: Read + Write> Drop for NntpClient<S> {
    fn drop(&mut self) {
        if let Err(e) = self.quit() {
            warn!("NNTP QUIT failed: {e}");
        }
    }
}

impl<S: Read + Write> MessageSource for NntpClient<S> {
    fn messages(&mut self) -> Result<MessageIter<'_>> {
        info!("Retrieving article list");
        let (first, last) = self.select_group()?;
        Ok(Box::new(
            (first..=last)
                .rev()
                .filter_map(move |n| self.article(n).transpose()),
        ))
    }
}
