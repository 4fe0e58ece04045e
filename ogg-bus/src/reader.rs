use std::io::{ErrorKind, Read};

use anyhow::Context;

use crate::{page::Page, sync::SyncState};

/// Size of each read request made against the source.
pub const BLOCK_SIZE: usize = 8192;

/// Pulls pages off a non-seekable byte source.
pub struct PageReader<R> {
    source: R,
    sync: SyncState,
    block: Box<[u8]>,
    eof: bool,
    bytes_read: u64,
}

impl<R: Read> PageReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            sync: SyncState::new(),
            block: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            eof: false,
            bytes_read: 0,
        }
    }

    /// Next framed page; `Ok(None)` once the source is exhausted on a page
    /// boundary. Running out of input in the middle of a page is an error.
    pub fn next_page(&mut self) -> anyhow::Result<Option<Page>> {
        loop {
            if let Some(page) = self.sync.next_page()? {
                return Ok(Some(page));
            }
            if self.eof {
                if self.sync.buffered() > 0 {
                    anyhow::bail!(
                        "truncated page at end of input: {}",
                        self.sync.describe_partial()
                    );
                }
                log::debug!("end of input after {} bytes", self.bytes_read);
                return Ok(None);
            }

            let n = match self.source.read(&mut self.block) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("read input stream"),
            };
            if n == 0 {
                self.eof = true;
            } else {
                self.bytes_read += n as u64;
                self.sync.feed(&self.block[..n]);
            }
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{FLAG_BOS, FLAG_EOS};

    /// Hands out at most `max` bytes per read call.
    struct Trickle<'a> {
        data: &'a [u8],
        max: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.data.len().min(self.max).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn stream_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(Page::build(FLAG_BOS, 0, 5, 0, &[3], b"abc").as_bytes());
        bytes.extend_from_slice(Page::build(0, 1, 5, 1, &[255, 10], &[7u8; 265]).as_bytes());
        bytes.extend_from_slice(Page::build(FLAG_EOS, 2, 5, 2, &[1], b"z").as_bytes());
        bytes
    }

    #[test]
    fn test_short_reads() -> anyhow::Result<()> {
        let bytes = stream_bytes();
        let mut reader = PageReader::new(Trickle {
            data: &bytes,
            max: 3,
        });

        let mut sequences = Vec::new();
        while let Some(page) = reader.next_page()? {
            sequences.push(page.sequence());
        }
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(reader.bytes_read(), bytes.len() as u64);
        Ok(())
    }

    #[test]
    fn test_empty_input_is_clean() -> anyhow::Result<()> {
        let mut reader = PageReader::new(std::io::empty());
        assert!(reader.next_page()?.is_none());
        Ok(())
    }

    #[test]
    fn test_truncated_payload_is_error() -> anyhow::Result<()> {
        let bytes = stream_bytes();
        let cut = &bytes[..bytes.len() - 1];
        let mut reader = PageReader::new(cut);

        assert!(reader.next_page()?.is_some());
        assert!(reader.next_page()?.is_some());
        let err = reader.next_page().unwrap_err();
        assert!(err.to_string().contains("truncated page"));
        Ok(())
    }
}
