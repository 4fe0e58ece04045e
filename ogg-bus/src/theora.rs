//! Theora header parsing and granule position arithmetic.
//!
//! Only the identification and comment headers are interpreted; the setup
//! header is carried as opaque bytes for the decoder.

use bytes::{BufMut, Bytes, BytesMut};

use crate::packet::Packet;

pub const IDENTIFICATION: u8 = 0x80;
pub const COMMENT: u8 = 0x81;
pub const SETUP: u8 = 0x82;
const MAGIC: &[u8; 6] = b"theora";
const IDENTIFICATION_LEN: usize = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Yuv420,
    Yuv422,
    Yuv444,
}

/// Fields of the identification header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TheoraInfo {
    pub version: (u8, u8, u8),
    /// Coded frame size, always a multiple of 16.
    pub frame_width: u32,
    pub frame_height: u32,
    pub pic_width: u32,
    pub pic_height: u32,
    pub pic_x: u8,
    pub pic_y: u8,
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    pub aspect_numerator: u32,
    pub aspect_denominator: u32,
    pub colorspace: u8,
    pub target_bitrate: u32,
    /// 0..=63
    pub quality: u8,
    pub keyframe_granule_shift: u8,
    pub pixel_layout: PixelLayout,
}

impl TheoraInfo {
    pub fn parse(packet: &[u8]) -> anyhow::Result<Self> {
        if packet.len() < IDENTIFICATION_LEN {
            anyhow::bail!(
                "theora identification header too short: {} bytes",
                packet.len()
            );
        }
        check_magic(packet, IDENTIFICATION)?;

        let u16_at = |o: usize| u16::from_be_bytes([packet[o], packet[o + 1]]) as u32;
        let u24_at = |o: usize| {
            (packet[o] as u32) << 16 | (packet[o + 1] as u32) << 8 | packet[o + 2] as u32
        };
        let u32_at = |o: usize| {
            u32::from_be_bytes([packet[o], packet[o + 1], packet[o + 2], packet[o + 3]])
        };

        let version = (packet[7], packet[8], packet[9]);
        if version.0 != 3 || version.1 != 2 {
            anyhow::bail!(
                "unsupported theora bitstream version {}.{}.{}",
                version.0,
                version.1,
                version.2
            );
        }

        let pixel_layout = match (packet[41] >> 3) & 0x03 {
            0 => PixelLayout::Yuv420,
            2 => PixelLayout::Yuv422,
            3 => PixelLayout::Yuv444,
            other => anyhow::bail!("reserved theora pixel format {}", other),
        };

        let info = Self {
            version,
            frame_width: u16_at(10) * 16,
            frame_height: u16_at(12) * 16,
            pic_width: u24_at(14),
            pic_height: u24_at(17),
            pic_x: packet[20],
            pic_y: packet[21],
            fps_numerator: u32_at(22),
            fps_denominator: u32_at(26),
            aspect_numerator: u24_at(30),
            aspect_denominator: u24_at(33),
            colorspace: packet[36],
            target_bitrate: u24_at(37),
            quality: packet[40] >> 2,
            keyframe_granule_shift: (packet[40] & 0x03) << 3 | packet[41] >> 5,
            pixel_layout,
        };

        if info.frame_width == 0 || info.frame_height == 0 {
            anyhow::bail!("theora frame size is zero");
        }
        if info.pic_x as u32 + info.pic_width > info.frame_width
            || info.pic_y as u32 + info.pic_height > info.frame_height
        {
            anyhow::bail!(
                "theora picture region {}x{}+{}+{} exceeds frame {}x{}",
                info.pic_width,
                info.pic_height,
                info.pic_x,
                info.pic_y,
                info.frame_width,
                info.frame_height
            );
        }
        if info.fps_numerator == 0 || info.fps_denominator == 0 {
            anyhow::bail!(
                "invalid theora frame rate {}/{}",
                info.fps_numerator,
                info.fps_denominator
            );
        }
        Ok(info)
    }

    /// Serializes the identification header.
    pub fn identification_header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(IDENTIFICATION_LEN);
        buf.put_u8(IDENTIFICATION);
        buf.put_slice(MAGIC);
        buf.put_slice(&[self.version.0, self.version.1, self.version.2]);
        buf.put_u16((self.frame_width / 16) as u16);
        buf.put_u16((self.frame_height / 16) as u16);
        put_u24(&mut buf, self.pic_width);
        put_u24(&mut buf, self.pic_height);
        buf.put_u8(self.pic_x);
        buf.put_u8(self.pic_y);
        buf.put_u32(self.fps_numerator);
        buf.put_u32(self.fps_denominator);
        put_u24(&mut buf, self.aspect_numerator);
        put_u24(&mut buf, self.aspect_denominator);
        buf.put_u8(self.colorspace);
        put_u24(&mut buf, self.target_bitrate);
        let pf = match self.pixel_layout {
            PixelLayout::Yuv420 => 0u8,
            PixelLayout::Yuv422 => 2,
            PixelLayout::Yuv444 => 3,
        };
        let shift = self.keyframe_granule_shift & 0x1f;
        buf.put_u8((self.quality & 0x3f) << 2 | shift >> 3);
        buf.put_u8((shift & 0x07) << 5 | pf << 3);
        buf.freeze()
    }

    /// The codec's natural maximum distance between keyframes.
    pub fn keyframe_frequency(&self) -> u32 {
        1u32 << self.keyframe_granule_shift.min(31)
    }

    /// Frame numbers start at 1 from bitstream 3.2.1 on.
    fn frame_offset(&self) -> u64 {
        if self.version >= (3, 2, 1) { 1 } else { 0 }
    }

    /// Granule position of the zero based `frame`, whose most recent keyframe
    /// is the zero based `keyframe`.
    pub fn granule_position(&self, keyframe: u64, frame: u64) -> i64 {
        let key = keyframe + self.frame_offset();
        ((key << self.keyframe_granule_shift) | (frame - keyframe)) as i64
    }

    /// Zero based frame index encoded by a granule position, -1 for none.
    pub fn granule_frame(&self, granule: i64) -> i64 {
        if granule < 0 {
            return -1;
        }
        let shift = self.keyframe_granule_shift;
        let key = granule >> shift;
        let delta = granule - (key << shift);
        key + delta - self.frame_offset() as i64
    }

    /// About half a second of video, never less than one packet.
    pub fn default_packets_per_chunk(&self) -> u32 {
        (self.fps_numerator as u64 / (2 * self.fps_denominator as u64)).max(1) as u32
    }

    pub fn frame_rate(&self) -> f64 {
        self.fps_numerator as f64 / self.fps_denominator as f64
    }
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_slice(&value.to_be_bytes()[1..]);
}

fn check_magic(packet: &[u8], kind: u8) -> anyhow::Result<()> {
    if packet.len() < 7 || packet[0] != kind || &packet[1..7] != MAGIC {
        anyhow::bail!("expected theora header {:#04x}", kind);
    }
    Ok(())
}

/// True for a data packet coding an intra frame.
pub fn is_keyframe(packet: &[u8]) -> bool {
    packet.first().is_some_and(|b| b & 0x80 == 0 && b & 0x40 == 0)
}

pub fn is_header(packet: &[u8]) -> bool {
    packet.first().is_some_and(|b| b & 0x80 != 0)
}

/// Vendor string and user comments of the comment header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TheoraComment {
    pub vendor: String,
    pub user_comments: Vec<String>,
}

impl TheoraComment {
    pub fn parse(packet: &[u8]) -> anyhow::Result<Self> {
        check_magic(packet, COMMENT)?;
        let mut rest = &packet[7..];
        let vendor_len = read_len(&mut rest)?;
        let vendor = read_str(&mut rest, vendor_len)?;
        let count = read_len(&mut rest)?;
        let mut user_comments = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let len = read_len(&mut rest)?;
            user_comments.push(read_str(&mut rest, len)?);
        }
        Ok(Self {
            vendor,
            user_comments,
        })
    }

    pub fn to_packet(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(COMMENT);
        buf.put_slice(MAGIC);
        buf.put_u32_le(self.vendor.len() as u32);
        buf.put_slice(self.vendor.as_bytes());
        buf.put_u32_le(self.user_comments.len() as u32);
        for comment in &self.user_comments {
            buf.put_u32_le(comment.len() as u32);
            buf.put_slice(comment.as_bytes());
        }
        buf.freeze()
    }
}

fn read_len(rest: &mut &[u8]) -> anyhow::Result<usize> {
    if rest.len() < 4 {
        anyhow::bail!("theora comment header truncated");
    }
    let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    *rest = &rest[4..];
    Ok(len)
}

fn read_str(rest: &mut &[u8], len: usize) -> anyhow::Result<String> {
    if rest.len() < len {
        anyhow::bail!("theora comment length {} exceeds header", len);
    }
    let s = String::from_utf8_lossy(&rest[..len]).into_owned();
    *rest = &rest[len..];
    Ok(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    NeedMore,
    Complete,
}

/// Collects the three Theora header packets in order.
#[derive(Default)]
pub struct TheoraHeaders {
    info: Option<TheoraInfo>,
    identification: Option<Bytes>,
    comment: Option<(TheoraComment, Bytes)>,
    setup: Option<Bytes>,
}

impl TheoraHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_in(&mut self, packet: &Packet) -> anyhow::Result<HeaderStatus> {
        let data = packet.data();
        if !is_header(data) {
            anyhow::bail!(
                "theora data packet {} arrived before the headers were complete",
                packet.packetno()
            );
        }

        let seen = (
            self.identification.is_some(),
            self.comment.is_some(),
            self.setup.is_some(),
        );
        match (data[0], seen) {
            (IDENTIFICATION, (false, _, _)) => {
                let info = TheoraInfo::parse(data)?;
                log::debug!("theora identification header: {:?}", info);
                self.info = Some(info);
                self.identification = Some(data.clone());
            }
            (COMMENT, (true, false, _)) => {
                let comment = TheoraComment::parse(data)?;
                log::debug!(
                    "theora comment header: vendor {:?}, {} user comments",
                    comment.vendor,
                    comment.user_comments.len()
                );
                self.comment = Some((comment, data.clone()));
            }
            (SETUP, (true, true, false)) => {
                check_magic(data, SETUP)?;
                self.setup = Some(data.clone());
            }
            (kind, _) => anyhow::bail!("unexpected theora header {:#04x}", kind),
        }

        Ok(if self.is_complete() {
            HeaderStatus::Complete
        } else {
            HeaderStatus::NeedMore
        })
    }

    pub fn is_complete(&self) -> bool {
        self.setup.is_some()
    }

    pub fn info(&self) -> Option<&TheoraInfo> {
        self.info.as_ref()
    }

    pub fn comment(&self) -> Option<&TheoraComment> {
        self.comment.as_ref().map(|(comment, _)| comment)
    }

    /// The comment header exactly as received.
    pub fn comment_packet(&self) -> Option<&Bytes> {
        self.comment.as_ref().map(|(_, packet)| packet)
    }

    /// Headers in FFmpeg's extradata layout: each one prefixed by its
    /// big endian 16 bit length.
    pub fn extradata(&self) -> anyhow::Result<Bytes> {
        let (Some(identification), Some((_, comment)), Some(setup)) =
            (&self.identification, &self.comment, &self.setup)
        else {
            anyhow::bail!("theora headers are incomplete");
        };
        let mut buf = BytesMut::new();
        for header in [identification, comment, setup] {
            let len = u16::try_from(header.len())
                .map_err(|_| anyhow::anyhow!("theora header of {} bytes", header.len()))?;
            buf.put_u16(len);
            buf.put_slice(header);
        }
        Ok(buf.freeze())
    }
}

/// Splits extradata made of length prefixed headers, the inverse of
/// [`TheoraHeaders::extradata`].
pub fn split_extradata(mut extradata: &[u8]) -> anyhow::Result<Vec<Bytes>> {
    let mut headers = Vec::with_capacity(3);
    while !extradata.is_empty() {
        if extradata.len() < 2 {
            anyhow::bail!("dangling byte in codec extradata");
        }
        let len = u16::from_be_bytes([extradata[0], extradata[1]]) as usize;
        if extradata.len() < 2 + len {
            anyhow::bail!("codec extradata header of {} bytes is truncated", len);
        }
        headers.push(Bytes::copy_from_slice(&extradata[2..2 + len]));
        extradata = &extradata[2 + len..];
    }
    Ok(headers)
}

#[cfg(test)]
pub(crate) fn sample_info() -> TheoraInfo {
    TheoraInfo {
        version: (3, 2, 1),
        frame_width: 320,
        frame_height: 240,
        pic_width: 320,
        pic_height: 240,
        pic_x: 0,
        pic_y: 0,
        fps_numerator: 24,
        fps_denominator: 1,
        aspect_numerator: 1,
        aspect_denominator: 1,
        colorspace: 0,
        target_bitrate: 0,
        quality: 48,
        keyframe_granule_shift: 6,
        pixel_layout: PixelLayout::Yuv420,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_packet() -> Bytes {
        let mut setup = vec![SETUP];
        setup.extend_from_slice(MAGIC);
        setup.extend_from_slice(&[0xaa; 32]);
        Bytes::from(setup)
    }

    #[test]
    fn test_identification_round_trip_fields() -> anyhow::Result<()> {
        let info = sample_info();
        let header = info.identification_header();
        assert_eq!(header.len(), IDENTIFICATION_LEN);
        assert_eq!(TheoraInfo::parse(&header)?, info);
        Ok(())
    }

    #[test]
    fn test_granule_positions() {
        let info = sample_info();
        assert_eq!(info.keyframe_frequency(), 64);
        assert_eq!(info.granule_position(0, 0), 1 << 6);
        assert_eq!(info.granule_position(0, 3), (1 << 6) | 3);
        assert_eq!(info.granule_frame(info.granule_position(0, 3)), 3);
        assert_eq!(info.granule_frame(info.granule_position(64, 70)), 70);
        assert_eq!(info.granule_frame(-1), -1);
    }

    #[test]
    fn test_default_chunk_size() {
        let mut info = sample_info();
        assert_eq!(info.default_packets_per_chunk(), 12);
        info.fps_numerator = 30000;
        info.fps_denominator = 1001;
        assert_eq!(info.default_packets_per_chunk(), 14);
        info.fps_numerator = 1;
        assert_eq!(info.default_packets_per_chunk(), 1);
    }

    #[test]
    fn test_headers_in_order() -> anyhow::Result<()> {
        let info = sample_info();
        let comment = TheoraComment {
            vendor: "test".to_string(),
            user_comments: vec!["TITLE=chunk".to_string()],
        };

        let mut headers = TheoraHeaders::new();
        assert_eq!(
            headers.header_in(&Packet::new(info.identification_header()))?,
            HeaderStatus::NeedMore
        );
        assert_eq!(
            headers.header_in(&Packet::new(comment.to_packet()))?,
            HeaderStatus::NeedMore
        );
        assert_eq!(
            headers.header_in(&Packet::new(setup_packet()))?,
            HeaderStatus::Complete
        );
        assert_eq!(headers.comment(), Some(&comment));

        let split = split_extradata(&headers.extradata()?)?;
        assert_eq!(split.len(), 3);
        assert_eq!(split[0], info.identification_header());
        assert_eq!(split[2], setup_packet());
        Ok(())
    }

    #[test]
    fn test_out_of_order_headers_are_rejected() {
        let mut headers = TheoraHeaders::new();
        assert!(headers.header_in(&Packet::new(setup_packet())).is_err());
        assert!(headers.header_in(&Packet::new(vec![0x00, 1, 2])).is_err());
    }

    #[test]
    fn test_keyframe_bits() {
        assert!(is_keyframe(&[0x00, 1]));
        assert!(!is_keyframe(&[0x40, 1]));
        assert!(!is_keyframe(&[0x80]));
        assert!(!is_keyframe(&[]));
    }
}
