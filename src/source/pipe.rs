use anyhow::{Context, Result};
use log::info;
use std::io::Read;

use super::{MessageIter, MessageSource};

/// Reads exactly one message from a stream, normally stdin.
pub struct PipeSource<R> {
    input: Option<R>,
}

impl PipeSource<std::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(std::io::stdin())
    }
}

impl<R: Read> PipeSource<R> {
    pub fn new(input: R) -> Self {
        Self { input: Some(input) }
    }
}

impl<R: Read> MessageSource for PipeSource<R> {
    fn messages(&mut self) -> Result<MessageIter<'_>> {
        let Some(mut input) = self.input.take() else {
            return Ok(Box::new(std::iter::empty()));
        };
        info!("Reading message from stdin");
        let mut raw = Vec::new();
        input.read_to_end(&mut raw).context("reading message from stdin")?;
        Ok(Box::new(std::iter::once(Ok(raw))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_single_message_once() {
        let mut source = PipeSource::new(Cursor::new(b"Subject: hi\r\n\r\nbody".to_vec()));
        let first: Vec<_> = source.messages().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(first, vec![b"Subject: hi\r\n\r\nbody".to_vec()]);
        assert_eq!(source.messages().unwrap().count(), 0);
    }
}
