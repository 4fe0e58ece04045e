//! Ogg page representation (RFC 3533).
//!
//! A [`Page`] keeps the raw page bytes exactly as read or built, so pages can be
//! forwarded verbatim; header fields are decoded on access.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
/// Fixed part of the page header, before the segment table.
pub const HEADER_LEN: usize = 27;
/// Maximum number of lacing values in one segment table.
pub const MAX_SEGMENTS: usize = 255;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

const CHECKSUM_OFFSET: usize = 22;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

fn crc_update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// Ogg CRC-32: polynomial 0x04c11db7, zero initial value, no reflection.
pub fn crc32(data: &[u8]) -> u32 {
    crc_update(0, data)
}

/// Checksum of a complete page, computed as if the checksum field were zero.
pub(crate) fn page_checksum(page: &[u8]) -> u32 {
    let crc = crc_update(0, &page[..CHECKSUM_OFFSET]);
    let crc = crc_update(crc, &[0u8; 4]);
    crc_update(crc, &page[CHECKSUM_OFFSET + 4..])
}

#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Bytes,
    header_len: usize,
}

impl Page {
    /// Wraps bytes already validated by the framer.
    pub(crate) fn from_validated(data: Bytes) -> Self {
        let header_len = HEADER_LEN + data[26] as usize;
        Self { data, header_len }
    }

    /// Builds a page and fills in its checksum.
    pub fn build(
        flags: u8,
        granule: i64,
        serial: u32,
        sequence: u32,
        lacing: &[u8],
        body: &[u8],
    ) -> Self {
        debug_assert!(lacing.len() <= MAX_SEGMENTS);
        debug_assert_eq!(
            lacing.iter().map(|&l| l as usize).sum::<usize>(),
            body.len()
        );

        let header_len = HEADER_LEN + lacing.len();
        let mut buf = BytesMut::with_capacity(header_len + body.len());
        buf.put_slice(CAPTURE_PATTERN);
        buf.put_u8(0);
        buf.put_u8(flags);
        buf.put_i64_le(granule);
        buf.put_u32_le(serial);
        buf.put_u32_le(sequence);
        buf.put_u32_le(0);
        buf.put_u8(lacing.len() as u8);
        buf.put_slice(lacing);
        buf.put_slice(body);

        let crc = page_checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

        Self {
            data: buf.freeze(),
            header_len,
        }
    }

    /// The whole page, header and body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..self.header_len]
    }

    pub fn body(&self) -> &[u8] {
        &self.data[self.header_len..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn version(&self) -> u8 {
        self.data[4]
    }

    pub fn flags(&self) -> u8 {
        self.data[5]
    }

    pub fn is_continued(&self) -> bool {
        self.flags() & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags() & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags() & FLAG_EOS != 0
    }

    pub fn granule(&self) -> i64 {
        i64::from_le_bytes(self.field::<8>(6))
    }

    pub fn serial(&self) -> u32 {
        u32::from_le_bytes(self.field::<4>(14))
    }

    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.field::<4>(18))
    }

    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.field::<4>(CHECKSUM_OFFSET))
    }

    /// Lacing values of the segment table.
    pub fn segments(&self) -> &[u8] {
        &self.data[HEADER_LEN..self.header_len]
    }

    /// Number of packets that end on this page.
    pub fn completed_packets(&self) -> usize {
        self.segments().iter().filter(|&&lace| lace < 255).count()
    }

    fn field<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[offset..offset + N]);
        out
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("serial", &self.serial())
            .field("sequence", &self.sequence())
            .field("granule", &self.granule())
            .field("flags", &format_args!("{:#04x}", self.flags()))
            .field("segments", &self.segments().len())
            .field("body_len", &self.body().len())
            .finish()
    }
}
