//! Seams between the transcode engine and the codec library.

use crate::{
    packet::Packet,
    theora::{TheoraHeaders, TheoraInfo},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A new picture is ready in the decoder.
    Picture,
    /// The packet repeats the previous picture; nothing new was decoded.
    DuplicateFrame,
}

pub trait VideoDecoder {
    type Picture;

    fn decode_packet(&mut self, packet: &Packet) -> anyhow::Result<DecodeStatus>;

    /// The picture produced by the last successful [`VideoDecoder::decode_packet`].
    fn picture(&mut self) -> anyhow::Result<Self::Picture>;
}

pub trait VideoEncoder<P> {
    /// Identification, comment and setup headers of the encoded stream.
    fn header_packets(&mut self) -> anyhow::Result<Vec<Packet>>;

    fn set_keyframe_frequency(&mut self, frequency: u32) -> anyhow::Result<()>;

    fn submit_picture(&mut self, picture: &mut P) -> anyhow::Result<()>;

    /// Next encoded packet, `None` when the encoder wants more pictures.
    /// With `eos` set the encoder is drained and its final packet carries the
    /// end-of-stream flag.
    fn pull_packet(&mut self, eos: bool) -> anyhow::Result<Option<Packet>>;
}

pub trait CodecBackend {
    type Picture;
    type Decoder: VideoDecoder<Picture = Self::Picture>;
    type Encoder: VideoEncoder<Self::Picture>;

    fn decoder(&self, headers: &TheoraHeaders) -> anyhow::Result<Self::Decoder>;

    fn encoder(&self, info: &TheoraInfo) -> anyhow::Result<Self::Encoder>;
}

/// Theora through FFmpeg: the native `theora` decoder and `libtheora`.
#[cfg(feature = "ffmpeg")]
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

#[cfg(feature = "ffmpeg")]
impl CodecBackend for FfmpegBackend {
    type Picture = ffmpeg_next::frame::Video;
    type Decoder = crate::decoder::TheoraDecoder;
    type Encoder = crate::encoder::TheoraEncoder;

    fn decoder(&self, headers: &TheoraHeaders) -> anyhow::Result<Self::Decoder> {
        crate::decoder::TheoraDecoder::new(headers)
    }

    fn encoder(&self, info: &TheoraInfo) -> anyhow::Result<Self::Encoder> {
        crate::encoder::TheoraEncoder::new(info)
    }
}

#[cfg(all(test, feature = "ffmpeg"))]
#[path = "codec_test.rs"]
mod codec_test;
