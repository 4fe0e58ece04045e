//! Incremental page framer.
//!
//! Bytes are fed in arbitrary pieces; complete pages are cut off the front of
//! the buffer once their header, segment table and body are all present.
//! Anything that does not start with the capture pattern is a framing error,
//! the framer never skips forward looking for the next `OggS`.

use bytes::BytesMut;

use crate::page::{CAPTURE_PATTERN, HEADER_LEN, Page, page_checksum};

#[derive(Default)]
pub struct SyncState {
    buffer: BytesMut,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes fed but not yet returned as part of a page.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete page, or `None` when more input is needed.
    pub fn next_page(&mut self) -> anyhow::Result<Option<Page>> {
        let available = self.buffer.len();
        let probe = available.min(CAPTURE_PATTERN.len());
        if self.buffer[..probe] != CAPTURE_PATTERN[..probe] {
            anyhow::bail!(
                "lost sync: expected page capture pattern, found {:02x?}",
                &self.buffer[..probe]
            );
        }
        if available < HEADER_LEN {
            return Ok(None);
        }

        let version = self.buffer[4];
        if version != 0 {
            anyhow::bail!("unsupported page version {}", version);
        }

        let header_len = HEADER_LEN + self.buffer[26] as usize;
        if available < header_len {
            return Ok(None);
        }
        let body_len: usize = self.buffer[HEADER_LEN..header_len]
            .iter()
            .map(|&lace| lace as usize)
            .sum();
        if available < header_len + body_len {
            return Ok(None);
        }

        let data = self.buffer.split_to(header_len + body_len).freeze();
        let page = Page::from_validated(data);
        let computed = page_checksum(page.as_bytes());
        if computed != page.checksum() {
            anyhow::bail!(
                "checksum mismatch on page {} of stream {}: stored {:#010x}, computed {:#010x}",
                page.sequence(),
                page.serial(),
                page.checksum(),
                computed
            );
        }

        log::trace!("framed {:?}", page);
        Ok(Some(page))
    }

    /// Describes the partial page left in the buffer, for end-of-input errors.
    pub fn describe_partial(&self) -> String {
        let available = self.buffer.len();
        if available < HEADER_LEN {
            return format!("{} bytes of an incomplete page header", available);
        }
        let header_len = HEADER_LEN + self.buffer[26] as usize;
        if available < header_len {
            return format!(
                "page header claims {} segments but only {} header bytes remain",
                self.buffer[26],
                available
            );
        }
        let body_len: usize = self.buffer[HEADER_LEN..header_len]
            .iter()
            .map(|&lace| lace as usize)
            .sum();
        format!(
            "page claims {} payload bytes but only {} remain",
            body_len,
            available - header_len
        )
    }
}
