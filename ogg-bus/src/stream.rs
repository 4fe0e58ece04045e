use std::collections::VecDeque;

use bytes::BytesMut;

use crate::{packet::Packet, page::Page};

/// Reassembles the packets of one logical stream from its pages.
///
/// A page may finish any number of packets and a packet may span any number of
/// pages. Page sequence numbers must strictly increase. A forward jump is a
/// hole, which is what a chunk body read after the shared header looks like:
/// the packet in progress is dropped and the leading fragment of the page
/// after the hole is skipped.
pub struct StreamState {
    serial: u32,
    next_sequence: Option<u32>,
    partial: BytesMut,
    partial_pending: bool,
    skipping_orphan: bool,
    packets: VecDeque<Packet>,
    packetno: u64,
    eos: bool,
}

impl StreamState {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            next_sequence: None,
            partial: BytesMut::new(),
            partial_pending: false,
            skipping_orphan: false,
            packets: VecDeque::new(),
            packetno: 0,
            eos: false,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    pub fn page_in(&mut self, page: &Page) -> anyhow::Result<()> {
        if page.serial() != self.serial {
            anyhow::bail!(
                "page of stream {} submitted to stream {}",
                page.serial(),
                self.serial
            );
        }
        if self.eos {
            anyhow::bail!("page {} after end of stream {}", page.sequence(), self.serial);
        }

        let mut hole = false;
        if let Some(expected) = self.next_sequence {
            let sequence = page.sequence();
            if sequence < expected {
                anyhow::bail!(
                    "stream {}: page sequence went from {} back to {}",
                    self.serial,
                    expected - 1,
                    sequence
                );
            }
            if sequence > expected {
                log::debug!(
                    "stream {}: hole in page sequence, expected {} got {}",
                    self.serial,
                    expected,
                    sequence
                );
                hole = true;
                self.partial.clear();
                self.partial_pending = false;
            }
        }
        self.next_sequence = Some(page.sequence().wrapping_add(1));

        let segments = page.segments();
        let body = page.body();
        let mut offset = 0;
        let mut first = 0;

        if page.is_continued() && !self.partial_pending {
            if !hole && !self.skipping_orphan {
                anyhow::bail!(
                    "stream {}: page {} continues a packet that was never started",
                    self.serial,
                    page.sequence()
                );
            }
            // Skip the tail of a packet whose start we never saw.
            self.skipping_orphan = true;
            while first < segments.len() {
                let lace = segments[first] as usize;
                offset += lace;
                first += 1;
                if lace < 255 {
                    self.skipping_orphan = false;
                    break;
                }
            }
        } else if !page.is_continued() && self.partial_pending {
            anyhow::bail!(
                "stream {}: page {} starts a new packet while {} bytes of the previous one are pending",
                self.serial,
                page.sequence(),
                self.partial.len()
            );
        } else if !page.is_continued() {
            self.skipping_orphan = false;
        }

        let last_complete = segments.iter().rposition(|&lace| lace < 255);
        for (index, &lace) in segments.iter().enumerate().skip(first) {
            let lace = lace as usize;
            self.partial.extend_from_slice(&body[offset..offset + lace]);
            offset += lace;
            self.partial_pending = true;
            if lace == 255 {
                continue;
            }

            let ends_page = Some(index) == last_complete;
            let mut packet = Packet::new(self.partial.split().freeze())
                .with_packetno(self.packetno)
                .with_granule(if ends_page { page.granule() } else { -1 });
            packet.set_bos(self.packetno == 0 && page.is_bos());
            packet.set_eos(ends_page && page.is_eos());
            self.packetno += 1;
            self.partial_pending = false;
            self.packets.push_back(packet);
        }

        if page.is_eos() {
            self.eos = true;
        }
        Ok(())
    }

    /// Next complete packet, `None` when more pages are needed.
    pub fn packet_out(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn peek_packet(&self) -> Option<&Packet> {
        self.packets.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{FLAG_BOS, FLAG_CONTINUED, FLAG_EOS};

    #[test]
    fn test_several_packets_on_one_page() -> anyhow::Result<()> {
        let mut stream = StreamState::new(3);
        let page = Page::build(FLAG_BOS, 20, 3, 0, &[2, 0, 3], b"abxyz");
        stream.page_in(&page)?;

        let a = stream.packet_out().expect("first packet");
        let b = stream.packet_out().expect("empty packet");
        let c = stream.packet_out().expect("last packet");
        assert!(stream.packet_out().is_none());

        assert_eq!(a.data().as_ref(), b"ab");
        assert!(a.is_bos());
        assert_eq!(a.granule(), -1);
        assert_eq!(b.size(), 0);
        assert_eq!(c.data().as_ref(), b"xyz");
        assert_eq!(c.granule(), 20);
        assert_eq!(c.packetno(), 2);
        Ok(())
    }

    #[test]
    fn test_packet_spanning_pages() -> anyhow::Result<()> {
        let mut stream = StreamState::new(1);
        let payload: Vec<u8> = (0..600u32).map(|i| i as u8).collect();

        stream.page_in(&Page::build(0, -1, 1, 0, &[255, 255], &payload[..510]))?;
        assert!(stream.packet_out().is_none());
        stream.page_in(&Page::build(
            FLAG_CONTINUED | FLAG_EOS,
            9,
            1,
            1,
            &[90],
            &payload[510..],
        ))?;

        let packet = stream.packet_out().expect("joined packet");
        assert_eq!(packet.data().as_ref(), payload.as_slice());
        assert_eq!(packet.granule(), 9);
        assert!(packet.is_eos());
        assert!(stream.is_eos());
        Ok(())
    }

    #[test]
    fn test_sequence_going_backwards_is_fatal() -> anyhow::Result<()> {
        let mut stream = StreamState::new(1);
        stream.page_in(&Page::build(0, 0, 1, 4, &[1], b"a"))?;
        assert!(stream.page_in(&Page::build(0, 0, 1, 4, &[1], b"b")).is_err());
        Ok(())
    }

    #[test]
    fn test_hole_skips_orphan_fragment() -> anyhow::Result<()> {
        let mut stream = StreamState::new(1);
        stream.page_in(&Page::build(0, 0, 1, 0, &[1], b"a"))?;
        assert!(stream.packet_out().is_some());

        let page = Page::build(FLAG_CONTINUED, 5, 1, 9, &[255, 1, 2], &[0u8; 258]);
        stream.page_in(&page)?;
        let packet = stream.packet_out().expect("packet after orphan fragment");
        assert_eq!(packet.size(), 2);
        assert_eq!(packet.granule(), 5);
        assert!(stream.packet_out().is_none());
        Ok(())
    }

    #[test]
    fn test_hole_drops_packet_in_progress() -> anyhow::Result<()> {
        let mut stream = StreamState::new(1);
        stream.page_in(&Page::build(0, -1, 1, 0, &[255], &[0u8; 255]))?;
        stream.page_in(&Page::build(0, 7, 1, 4, &[1], b"b"))?;

        let packet = stream.packet_out().expect("packet after the hole");
        assert_eq!(packet.data().as_ref(), b"b");
        assert!(stream.packet_out().is_none());
        Ok(())
    }

    #[test]
    fn test_orphan_continuation_without_hole_is_fatal() -> anyhow::Result<()> {
        let mut stream = StreamState::new(1);
        let page = Page::build(FLAG_BOS | FLAG_CONTINUED, 0, 1, 0, &[3, 2], b"abcde");
        assert!(stream.page_in(&page).is_err());

        let mut stream = StreamState::new(1);
        stream.page_in(&Page::build(0, 0, 1, 0, &[1], b"a"))?;
        assert!(stream.packet_out().is_some());
        let page = Page::build(FLAG_CONTINUED, 0, 1, 1, &[1], b"b");
        assert!(stream.page_in(&page).is_err());
        Ok(())
    }

    #[test]
    fn test_unexpected_new_packet_is_fatal() -> anyhow::Result<()> {
        let mut stream = StreamState::new(1);
        stream.page_in(&Page::build(0, -1, 1, 0, &[255], &[0u8; 255]))?;
        assert!(stream.page_in(&Page::build(0, 0, 1, 1, &[1], b"a")).is_err());
        Ok(())
    }
}
