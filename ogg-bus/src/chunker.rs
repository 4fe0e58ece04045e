use std::io::Read;

use crate::{
    codec::CodecBackend,
    demux::{DemuxEvent, Demuxer},
    output::{ChunkNaming, ChunkOutput, ChunkSummary},
    page::Page,
    transcode::{Progress, TranscodeEngine},
};

#[derive(Debug, Clone, Default)]
pub struct ChunkerConfig {
    /// Serial number of the video stream to transcode; the first Theora
    /// stream when unset.
    pub video_serial: Option<u32>,
    /// Encoder quality 0..=63; the input's own setting when unset.
    pub quality: Option<u8>,
    /// Video packets per body file; about half a second when unset.
    pub packets_per_chunk: Option<u32>,
    pub naming: ChunkNaming,
}

impl ChunkerConfig {
    pub fn new(naming: ChunkNaming) -> Self {
        Self {
            naming,
            ..Self::default()
        }
    }

    pub fn video_serial(mut self, serial: Option<u32>) -> Self {
        self.video_serial = serial;
        self
    }

    pub fn quality(mut self, quality: Option<u8>) -> Self {
        self.quality = quality;
        self
    }

    pub fn packets_per_chunk(mut self, packets: Option<u32>) -> Self {
        self.packets_per_chunk = packets;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(quality) = self.quality {
            if quality > 63 {
                anyhow::bail!("quality {} is out of range 0..=63", quality);
            }
        }
        if self.packets_per_chunk == Some(0) {
            anyhow::bail!("packets per chunk must be at least 1");
        }
        Ok(())
    }
}

/// Reads an Ogg physical stream and writes it back as a header file plus
/// numbered body files. Only the first body is guaranteed to open on a
/// keyframe; later bodies start wherever the packet count rotates them.
pub struct Chunker<R, B: CodecBackend> {
    demuxer: Demuxer<R>,
    backend: Option<B>,
    engine: Option<TranscodeEngine<B>>,
    output: ChunkOutput,
    config: ChunkerConfig,
}

impl<R: Read, B: CodecBackend> Chunker<R, B> {
    pub fn new(source: R, backend: B, config: ChunkerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let output = ChunkOutput::create(config.naming.clone())?;
        Ok(Self {
            demuxer: Demuxer::new(source, config.video_serial),
            backend: Some(backend),
            engine: None,
            output,
            config,
        })
    }

    pub fn run(mut self) -> anyhow::Result<ChunkSummary> {
        while let Some(event) = self.demuxer.next_event()? {
            match event {
                DemuxEvent::Video { serial, packet } => {
                    if self.engine.is_none() {
                        self.engine = Some(self.start_engine(serial)?);
                    }
                    let Some(engine) = self.engine.as_mut() else {
                        anyhow::bail!("transcode engine missing");
                    };
                    if let Progress::HeadersComplete(info) =
                        engine.push_packet(&packet, &mut self.output)?
                    {
                        let packets = self
                            .config
                            .packets_per_chunk
                            .unwrap_or_else(|| info.default_packets_per_chunk());
                        self.output.set_packets_per_chunk(packets);
                        log::info!("rotating body files every {} video packets", packets);
                    }
                }
                DemuxEvent::Audio { page, header: true } => self.audio_header_page(page)?,
                DemuxEvent::Audio { page, header: false } => {
                    self.seal_when_ready()?;
                    self.output.write_audio_page(&page)?;
                }
            }
            self.seal_when_ready()?;
        }

        let Some(engine) = self.engine.as_mut().filter(|engine| engine.is_streaming()) else {
            anyhow::bail!("no theora video stream in input");
        };
        engine.finish(&mut self.output)?;
        log::info!(
            "read {} pages ({} bytes)",
            self.demuxer.pages(),
            self.demuxer.bytes_read()
        );

        let summary = self.output.finish()?;
        log::info!(
            "wrote {} and {} body files: {} video packets, {} audio pages, {} bytes",
            summary.header.display(),
            summary.bodies.len(),
            summary.video_packets,
            summary.audio_pages,
            summary.bytes_written
        );
        Ok(summary)
    }

    fn start_engine(&mut self, serial: u32) -> anyhow::Result<TranscodeEngine<B>> {
        let backend = self
            .backend
            .take()
            .ok_or(anyhow::anyhow!("codec backend already consumed"))?;
        Ok(TranscodeEngine::new(backend, serial).with_quality(self.config.quality))
    }

    fn audio_header_page(&mut self, page: Page) -> anyhow::Result<()> {
        if self.output.is_sealed() {
            log::warn!(
                "audio header page {} of stream {} arrived after video data, writing it to the body",
                page.sequence(),
                page.serial()
            );
            return self.output.write_audio_page(&page);
        }
        self.output.write_header_page(page)
    }

    /// The header file is complete once the video headers went out and every
    /// audio stream delivered its own.
    fn seal_when_ready(&mut self) -> anyhow::Result<()> {
        let video_ready = self.engine.as_ref().is_some_and(|engine| engine.is_streaming());
        if !self.output.is_sealed() && video_ready && self.demuxer.audio_headers_complete() {
            self.output.seal_header()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "chunker_test.rs"]
mod chunker_test;
