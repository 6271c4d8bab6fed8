//! Shared plumbing for the text-line protocols (POP3, NNTP).

use anyhow::{Context, Result, bail};
use log::debug;
use native_tls::{TlsConnector, TlsStream};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::config::Endpoint;

/// A CRLF line protocol over any byte stream.
pub struct LineStream<S: Read + Write> {
    inner: BufReader<S>,
}

impl<S: Read + Write> LineStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Read one line without its line terminator.
    pub fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf)?;
        if n == 0 {
            bail!("connection closed by server");
        }
        strip_eol(&mut buf);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a command line. `shown` replaces it in the debug log so that
    /// passwords stay out of log files.
    pub fn send(&mut self, command: &str, shown: Option<&str>) -> Result<()> {
        debug!("> {}", shown.unwrap_or(command));
        let stream = self.inner.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        Ok(())
    }

    /// Read a dot-terminated block, undoing dot-stuffing. Lines are joined
    /// with `\n`.
    pub fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let mut buf = Vec::new();
            let n = self.inner.read_until(b'\n', &mut buf)?;
            if n == 0 {
                bail!("connection closed inside a multi-line response");
            }
            strip_eol(&mut buf);
            if buf == b"." {
                return Ok(out);
            }
            let line = if buf.starts_with(b"..") {
                &buf[1..]
            } else {
                &buf[..]
            };
            out.extend_from_slice(line);
            out.push(b'\n');
        }
    }
}

fn strip_eol(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}

pub fn connect_tcp(endpoint: &Endpoint, default_port: u16) -> Result<TcpStream> {
    let port = endpoint.port.unwrap_or(default_port);
    let stream = TcpStream::connect((endpoint.host.as_str(), port))
        .with_context(|| format!("connecting to {}:{}", endpoint.host, port))?;
    apply_timeout(&stream, endpoint.timeout)?;
    Ok(stream)
}

pub fn connect_tls(endpoint: &Endpoint, default_port: u16) -> Result<TlsStream<TcpStream>> {
    let tcp = connect_tcp(endpoint, default_port)?;
    let tls = TlsConnector::builder().build()?;
    tls.connect(endpoint.host.as_str(), tcp)
        .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", endpoint.host))
}

fn apply_timeout(stream: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    if timeout.is_some() {
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::io::{Cursor, Read, Write};
    use std::rc::Rc;

    /// Scripted server: reads come from `input`, writes go to a shared log
    /// that outlives the client owning the stream.
    pub struct MockStream {
        input: Cursor<Vec<u8>>,
        written: Rc<RefCell<Vec<u8>>>,
    }

    impl MockStream {
        pub fn new(script: impl AsRef<[u8]>) -> Self {
            Self {
                input: Cursor::new(script.as_ref().to_vec()),
                written: Rc::default(),
            }
        }

        pub fn log(&self) -> SentLog {
            SentLog(Rc::clone(&self.written))
        }
    }

    pub struct SentLog(Rc<RefCell<Vec<u8>>>);

    impl SentLog {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockStream;
    use super::*;

    #[test]
    fn test_multiline_unstuffs_dots() {
        let mut stream = LineStream::new(MockStream::new("a\r\n..b\r\n.\r\nrest\r\n"));
        assert_eq!(stream.read_multiline().unwrap(), b"a\n.b\n".to_vec());
        assert_eq!(stream.read_line().unwrap(), "rest");
    }

    #[test]
    fn test_closed_connection_is_an_error() {
        let mut stream = LineStream::new(MockStream::new("partial\r\n"));
        assert!(stream.read_multiline().is_err());
    }
}
