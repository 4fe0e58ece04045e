use std::{
    collections::{HashMap, VecDeque},
    io::Read,
};

use crate::{
    packet::Packet,
    page::Page,
    reader::PageReader,
    sniff::StreamKind,
    stream::StreamState,
};

#[derive(Debug)]
pub enum DemuxEvent {
    /// A packet of the selected video stream, headers included.
    Video { serial: u32, packet: Packet },
    /// A page of an audio stream, to be forwarded untouched. `header` is set
    /// while the stream's header packets are still arriving.
    Audio { page: Page, header: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Video,
    Audio,
    Inert,
}

struct LogicalStream {
    state: StreamState,
    kind: StreamKind,
    role: Role,
    headers_needed: u32,
    headers_seen: u32,
}

impl LogicalStream {
    fn headers_complete(&self) -> bool {
        self.headers_seen >= self.headers_needed
    }
}

/// Splits a physical stream into the video packets to transcode and the
/// audio pages to pass through.
pub struct Demuxer<R> {
    reader: PageReader<R>,
    streams: HashMap<u32, LogicalStream>,
    video_selector: Option<u32>,
    video_serial: Option<u32>,
    audio_serial: Option<u32>,
    in_bos_group: bool,
    pending: VecDeque<DemuxEvent>,
    pages: u64,
    finished: bool,
}

impl<R: Read> Demuxer<R> {
    /// With `video_selector` set only the stream with that serial number is
    /// transcoded; otherwise the first Theora stream is.
    pub fn new(source: R, video_selector: Option<u32>) -> Self {
        Self {
            reader: PageReader::new(source),
            streams: HashMap::new(),
            video_selector,
            video_serial: None,
            audio_serial: None,
            in_bos_group: true,
            pending: VecDeque::new(),
            pages: 0,
            finished: false,
        }
    }

    pub fn video_serial(&self) -> Option<u32> {
        self.video_serial
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn bytes_read(&self) -> u64 {
        self.reader.bytes_read()
    }

    /// True once every audio stream still in the registry has delivered its
    /// header packets.
    pub fn audio_headers_complete(&self) -> bool {
        self.streams
            .values()
            .filter(|stream| stream.role == Role::Audio)
            .all(LogicalStream::headers_complete)
    }

    pub fn next_event(&mut self) -> anyhow::Result<Option<DemuxEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.reader.next_page()? {
                Some(page) => {
                    self.pages += 1;
                    self.page_in(page)?;
                }
                None => {
                    self.finished = true;
                    for (serial, stream) in &self.streams {
                        if stream.role != Role::Inert {
                            log::debug!("stream {} ({}) ended without EOS", serial, stream.kind);
                        }
                    }
                    self.streams.clear();
                }
            }
        }
    }

    fn page_in(&mut self, page: Page) -> anyhow::Result<()> {
        let serial = page.serial();
        if page.is_bos() {
            if !self.in_bos_group {
                log::warn!(
                    "ignoring chained stream {} starting after the header group",
                    serial
                );
                return Ok(());
            }
            return self.register(page);
        }
        self.in_bos_group = false;

        let Some(stream) = self.streams.get_mut(&serial) else {
            log::warn!("dropping page {} of unknown stream {}", page.sequence(), serial);
            return Ok(());
        };

        let eos = page.is_eos();
        match stream.role {
            Role::Inert => {}
            Role::Video => {
                stream.state.page_in(&page)?;
                while let Some(packet) = stream.state.packet_out() {
                    self.pending.push_back(DemuxEvent::Video { serial, packet });
                }
            }
            Role::Audio => {
                let header = !stream.headers_complete();
                stream.state.page_in(&page)?;
                while stream.state.packet_out().is_some() {
                    stream.headers_seen += 1;
                }
                self.pending.push_back(DemuxEvent::Audio { page, header });
            }
        }

        if eos {
            log::debug!("stream {} ({}) reached EOS", serial, stream.kind);
            self.streams.remove(&serial);
        }
        Ok(())
    }

    fn register(&mut self, page: Page) -> anyhow::Result<()> {
        let serial = page.serial();
        if self.streams.contains_key(&serial) {
            anyhow::bail!("stream {} has more than one BOS page", serial);
        }

        let mut state = StreamState::new(serial);
        state.page_in(&page)?;
        let Some(first) = state.peek_packet() else {
            anyhow::bail!("BOS page of stream {} carries no complete packet", serial);
        };
        let kind = StreamKind::sniff(first.data());
        let headers_needed = kind.header_packets(first.data());

        let role = match kind {
            StreamKind::Video(_) if self.wants_video(serial) => Role::Video,
            StreamKind::Audio(_) if self.audio_serial.is_none() => Role::Audio,
            _ => Role::Inert,
        };
        match role {
            Role::Video => {
                log::info!("transcoding {} stream {}", kind, serial);
                self.video_serial = Some(serial);
                while let Some(packet) = state.packet_out() {
                    self.pending.push_back(DemuxEvent::Video { serial, packet });
                }
            }
            Role::Audio => {
                log::info!("passing through {} stream {}", kind, serial);
                self.audio_serial = Some(serial);
            }
            Role::Inert => {
                log::info!("ignoring {} stream {}", kind, serial);
            }
        }

        let mut stream = LogicalStream {
            state,
            kind,
            role,
            headers_needed,
            headers_seen: 0,
        };
        if role == Role::Audio {
            while stream.state.packet_out().is_some() {
                stream.headers_seen += 1;
            }
            self.pending.push_back(DemuxEvent::Audio { page, header: true });
        }
        self.streams.insert(serial, stream);
        Ok(())
    }

    fn wants_video(&self, serial: u32) -> bool {
        match self.video_selector {
            Some(selected) => selected == serial,
            None => self.video_serial.is_none(),
        }
    }
}
