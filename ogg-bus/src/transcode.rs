//! Decodes the input Theora stream and re-encodes it with a keyframe forced
//! on the first picture, so the first chunk body decodes on its own.

use crate::{
    codec::{CodecBackend, DecodeStatus, VideoDecoder, VideoEncoder},
    mux::PacketWriter,
    output::ChunkOutput,
    packet::Packet,
    theora::{HeaderStatus, TheoraHeaders, TheoraInfo},
};

/// Forces the keyframe frequency to 1 for the first picture of the run and
/// restores the codec's natural frequency right after it.
#[derive(Debug)]
pub struct KeyframeScheduler {
    natural: u32,
    armed: bool,
}

impl KeyframeScheduler {
    pub fn new(natural: u32) -> Self {
        Self {
            natural,
            armed: true,
        }
    }

    pub fn before_submit<P, E: VideoEncoder<P>>(&self, encoder: &mut E) -> anyhow::Result<()> {
        if self.armed {
            encoder.set_keyframe_frequency(1)?;
        }
        Ok(())
    }

    pub fn after_submit<P, E: VideoEncoder<P>>(&mut self, encoder: &mut E) -> anyhow::Result<()> {
        if self.armed {
            encoder.set_keyframe_frequency(self.natural)?;
            self.armed = false;
        }
        Ok(())
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Header,
    /// The last input header arrived and the output headers were written.
    HeadersComplete(TheoraInfo),
    Picture,
}

struct Session<B: CodecBackend> {
    decoder: B::Decoder,
    encoder: B::Encoder,
    scheduler: KeyframeScheduler,
    last_picture: Option<B::Picture>,
    writer: PacketWriter,
    info: TheoraInfo,
    pictures: u64,
    duplicates: u64,
    finished: bool,
}

enum State<B: CodecBackend> {
    AwaitingHeaders(TheoraHeaders),
    Streaming(Box<Session<B>>),
}

pub struct TranscodeEngine<B: CodecBackend> {
    backend: B,
    serial: u32,
    quality: Option<u8>,
    state: State<B>,
}

impl<B: CodecBackend> TranscodeEngine<B> {
    /// `serial` is the serial number of the video stream in the output.
    pub fn new(backend: B, serial: u32) -> Self {
        Self {
            backend,
            serial,
            quality: None,
            state: State::AwaitingHeaders(TheoraHeaders::new()),
        }
    }

    /// Overrides the input's quality (0..=63); bitrate targeting is dropped.
    pub fn with_quality(mut self, quality: Option<u8>) -> Self {
        self.quality = quality;
        self
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, State::Streaming(_))
    }

    pub fn push_packet(&mut self, packet: &Packet, output: &mut ChunkOutput) -> anyhow::Result<Progress> {
        match &mut self.state {
            State::AwaitingHeaders(headers) => {
                if headers.header_in(packet)? == HeaderStatus::NeedMore {
                    return Ok(Progress::Header);
                }
                let headers = std::mem::take(headers);
                let session = self.start_session(&headers, output)?;
                let info = session.info.clone();
                self.state = State::Streaming(Box::new(session));
                Ok(Progress::HeadersComplete(info))
            }
            State::Streaming(session) => {
                session.transcode(packet, output)?;
                Ok(Progress::Picture)
            }
        }
    }

    /// Drains the encoder. A no-op when the stream already ended.
    pub fn finish(&mut self, output: &mut ChunkOutput) -> anyhow::Result<()> {
        if let State::Streaming(session) = &mut self.state {
            if !session.finished {
                session.drain(true, output)?;
                session.finished = true;
            }
            log::info!(
                "transcoded {} pictures ({} duplicates)",
                session.pictures,
                session.duplicates
            );
        }
        Ok(())
    }

    fn start_session(
        &self,
        headers: &TheoraHeaders,
        output: &mut ChunkOutput,
    ) -> anyhow::Result<Session<B>> {
        let mut info = headers
            .info()
            .ok_or(anyhow::anyhow!("theora identification header missing"))?
            .clone();
        let comment = headers
            .comment_packet()
            .ok_or(anyhow::anyhow!("theora comment header missing"))?
            .clone();
        if let Some(quality) = self.quality {
            info.quality = quality;
            info.target_bitrate = 0;
        }

        let decoder = self.backend.decoder(headers)?;
        let mut encoder = self.backend.encoder(&info)?;
        let encoded = encoder.header_packets()?;
        let [identification, _, setup] = encoded.as_slice() else {
            anyhow::bail!("encoder produced {} headers, expected 3", encoded.len());
        };
        let out_info = TheoraInfo::parse(identification.data())?;

        let out_headers = [
            identification.clone().with_granule(0),
            Packet::new(comment).with_granule(0),
            setup.clone().with_granule(0),
        ];
        let mut writer = PacketWriter::new(self.serial);
        for page in writer.submit_headers(&out_headers) {
            output.write_header_page(page)?;
        }

        let scheduler = KeyframeScheduler::new(out_info.keyframe_frequency());
        log::info!(
            "theora stream {}: {}x{} @ {:.3} fps, natural keyframe frequency {}",
            self.serial,
            out_info.pic_width,
            out_info.pic_height,
            out_info.frame_rate(),
            out_info.keyframe_frequency()
        );
        Ok(Session {
            decoder,
            encoder,
            scheduler,
            last_picture: None,
            writer,
            info: out_info,
            pictures: 0,
            duplicates: 0,
            finished: false,
        })
    }
}

impl<B: CodecBackend> Session<B> {
    fn transcode(&mut self, packet: &Packet, output: &mut ChunkOutput) -> anyhow::Result<()> {
        if self.finished {
            anyhow::bail!("video packet {} after end of stream", packet.packetno());
        }
        match self.decoder.decode_packet(packet)? {
            DecodeStatus::Picture => {
                self.last_picture = Some(self.decoder.picture()?);
            }
            DecodeStatus::DuplicateFrame => {
                if self.last_picture.is_none() {
                    anyhow::bail!(
                        "duplicate frame packet {} before any picture was decoded",
                        packet.packetno()
                    );
                }
                self.duplicates += 1;
            }
        }
        let Some(picture) = self.last_picture.as_mut() else {
            anyhow::bail!("no picture to encode for packet {}", packet.packetno());
        };

        self.scheduler
            .before_submit::<B::Picture, _>(&mut self.encoder)?;
        self.encoder.submit_picture(picture)?;
        self.pictures += 1;
        self.drain(packet.is_eos(), output)?;
        self.scheduler
            .after_submit::<B::Picture, _>(&mut self.encoder)?;

        if packet.is_eos() {
            self.finished = true;
        }
        Ok(())
    }

    fn drain(&mut self, eos: bool, output: &mut ChunkOutput) -> anyhow::Result<()> {
        while let Some(encoded) = self.encoder.pull_packet(eos)? {
            for page in self.writer.submit(&encoded) {
                output.write_video_page(&page)?;
            }
            output.video_packet_emitted();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        frequencies: Vec<u32>,
    }

    impl VideoEncoder<()> for Recorder {
        fn header_packets(&mut self) -> anyhow::Result<Vec<Packet>> {
            Ok(Vec::new())
        }

        fn set_keyframe_frequency(&mut self, frequency: u32) -> anyhow::Result<()> {
            self.frequencies.push(frequency);
            Ok(())
        }

        fn submit_picture(&mut self, _picture: &mut ()) -> anyhow::Result<()> {
            Ok(())
        }

        fn pull_packet(&mut self, _eos: bool) -> anyhow::Result<Option<Packet>> {
            Ok(None)
        }
    }

    #[test]
    fn test_scheduler_forces_only_the_first_picture() -> anyhow::Result<()> {
        let mut encoder = Recorder::default();
        let mut scheduler = KeyframeScheduler::new(64);
        for _ in 0..5 {
            scheduler.before_submit(&mut encoder)?;
            encoder.submit_picture(&mut ())?;
            scheduler.after_submit(&mut encoder)?;
        }
        assert_eq!(encoder.frequencies, vec![1, 64]);
        assert!(!scheduler.is_armed());
        Ok(())
    }
}
