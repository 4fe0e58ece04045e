//! Stream classification from the first packet of a logical stream.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Theora,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Vorbis,
    Opus,
    Speex,
    Flac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video(VideoCodec),
    Audio(AudioCodec),
    Unknown,
}

impl StreamKind {
    pub fn sniff(first_packet: &[u8]) -> Self {
        if first_packet.starts_with(b"\x80theora") {
            StreamKind::Video(VideoCodec::Theora)
        } else if first_packet.starts_with(b"\x01vorbis") {
            StreamKind::Audio(AudioCodec::Vorbis)
        } else if first_packet.starts_with(b"OpusHead") {
            StreamKind::Audio(AudioCodec::Opus)
        } else if first_packet.starts_with(b"Speex   ") {
            StreamKind::Audio(AudioCodec::Speex)
        } else if first_packet.starts_with(b"\x7fFLAC") {
            StreamKind::Audio(AudioCodec::Flac)
        } else {
            StreamKind::Unknown
        }
    }

    /// Number of header packets, the first one included, that precede data.
    pub fn header_packets(&self, first_packet: &[u8]) -> u32 {
        match self {
            StreamKind::Video(VideoCodec::Theora) => 3,
            StreamKind::Audio(AudioCodec::Vorbis) => 3,
            StreamKind::Audio(AudioCodec::Opus) => 2,
            StreamKind::Audio(AudioCodec::Speex) => {
                // Speex header: extra_headers is a little endian u32 at byte 68.
                let extra = first_packet
                    .get(68..72)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .unwrap_or(0);
                2 + extra.min(16)
            }
            StreamKind::Audio(AudioCodec::Flac) => {
                // Ogg FLAC mapping: big endian count of the header packets that follow.
                let following = first_packet
                    .get(7..9)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]) as u32)
                    .unwrap_or(0);
                1 + following
            }
            StreamKind::Unknown => 0,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, StreamKind::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, StreamKind::Audio(_))
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video(VideoCodec::Theora) => write!(f, "theora"),
            StreamKind::Audio(AudioCodec::Vorbis) => write!(f, "vorbis"),
            StreamKind::Audio(AudioCodec::Opus) => write!(f, "opus"),
            StreamKind::Audio(AudioCodec::Speex) => write!(f, "speex"),
            StreamKind::Audio(AudioCodec::Flac) => write!(f, "flac"),
            StreamKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_magics() {
        assert_eq!(
            StreamKind::sniff(b"\x80theora\x03\x02\x01"),
            StreamKind::Video(VideoCodec::Theora)
        );
        assert_eq!(
            StreamKind::sniff(b"\x01vorbis\x00"),
            StreamKind::Audio(AudioCodec::Vorbis)
        );
        assert_eq!(
            StreamKind::sniff(b"OpusHead\x01"),
            StreamKind::Audio(AudioCodec::Opus)
        );
        assert_eq!(StreamKind::sniff(b"\x81theora"), StreamKind::Unknown);
        assert_eq!(StreamKind::sniff(b""), StreamKind::Unknown);
    }

    #[test]
    fn test_header_counts() {
        let theora = StreamKind::Video(VideoCodec::Theora);
        assert_eq!(theora.header_packets(b"\x80theora"), 3);

        let mut flac = b"\x7fFLAC\x01\x00\x00\x02fLaC".to_vec();
        assert_eq!(StreamKind::sniff(&flac).header_packets(&flac), 3);
        flac[8] = 0;
        assert_eq!(StreamKind::sniff(&flac).header_packets(&flac), 1);

        let mut speex = vec![0u8; 80];
        speex[..8].copy_from_slice(b"Speex   ");
        speex[68] = 1;
        assert_eq!(StreamKind::sniff(&speex).header_packets(&speex), 3);
    }
}
