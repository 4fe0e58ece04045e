use std::collections::VecDeque;

use bytes::BytesMut;

use crate::{
    packet::Packet,
    page::{FLAG_BOS, FLAG_CONTINUED, FLAG_EOS, MAX_SEGMENTS, Page},
};

struct Lace {
    value: u8,
    /// Set on the last lacing value of a packet: (granule, eos).
    end: Option<(i64, bool)>,
}

/// Frames the packets of one output logical stream into pages.
pub struct PacketWriter {
    serial: u32,
    sequence: u32,
    laces: VecDeque<Lace>,
    body: BytesMut,
    bos_written: bool,
    continued: bool,
}

impl PacketWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            laces: VecDeque::new(),
            body: BytesMut::new(),
            bos_written: false,
            continued: false,
        }
    }

    /// Queues a packet; pages are only produced by [`PacketWriter::flush_pages`].
    pub fn packet_in(&mut self, packet: &Packet) {
        let data = packet.data();
        let full = data.len() / 255;
        for _ in 0..full {
            self.laces.push_back(Lace {
                value: 255,
                end: None,
            });
        }
        self.laces.push_back(Lace {
            value: (data.len() % 255) as u8,
            end: Some((packet.granule(), packet.is_eos())),
        });
        self.body.extend_from_slice(data);
    }

    /// Forces everything queued out as pages of at most 255 lacing values.
    pub fn flush_pages(&mut self) -> Vec<Page> {
        let mut pages = Vec::new();
        while !self.laces.is_empty() {
            let count = self.laces.len().min(MAX_SEGMENTS);
            let mut lacing = Vec::with_capacity(count);
            let mut body_len = 0usize;
            let mut granule = -1;
            let mut eos = false;
            for lace in self.laces.drain(..count) {
                lacing.push(lace.value);
                body_len += lace.value as usize;
                if let Some((packet_granule, packet_eos)) = lace.end {
                    granule = packet_granule;
                    eos |= packet_eos;
                }
            }
            let body = self.body.split_to(body_len);

            let mut flags = 0;
            if self.continued {
                flags |= FLAG_CONTINUED;
            }
            if !self.bos_written {
                flags |= FLAG_BOS;
                self.bos_written = true;
            }
            if eos {
                flags |= FLAG_EOS;
            }

            let page = Page::build(flags, granule, self.serial, self.sequence, &lacing, &body);
            log::trace!("muxed {:?}", page);
            self.sequence += 1;
            self.continued = lacing.last() == Some(&255);
            pages.push(page);
        }
        pages
    }

    /// Queues one packet and flushes it, so nothing stays buffered between calls.
    pub fn submit(&mut self, packet: &Packet) -> Vec<Page> {
        self.packet_in(packet);
        self.flush_pages()
    }

    /// Frames a header set: the first header alone on the BOS page, the rest
    /// flushed together behind it.
    pub fn submit_headers(&mut self, headers: &[Packet]) -> Vec<Page> {
        let Some((first, rest)) = headers.split_first() else {
            return Vec::new();
        };
        let mut pages = self.submit(first);
        for header in rest {
            self.packet_in(header);
        }
        pages.extend(self.flush_pages());
        pages
    }
}
