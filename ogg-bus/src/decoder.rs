use crate::{
    codec::{DecodeStatus, VideoDecoder},
    packet::Packet,
    theora::TheoraHeaders,
};

/// FFmpeg's native Theora decoder, primed with the stream headers as
/// extradata so only data packets are ever sent to it.
pub struct TheoraDecoder {
    inner: ffmpeg_next::codec::decoder::Video,
    frame_index: i64,
}

impl TheoraDecoder {
    pub fn new(headers: &TheoraHeaders) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::decoder::find(ffmpeg_next::codec::Id::THEORA)
            .ok_or(anyhow::anyhow!("theora decoder not found"))?;
        let extradata = headers.extradata()?;

        let mut decoder_ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        unsafe {
            let ctx = decoder_ctx.as_mut_ptr();
            let padded = extradata.len() + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let buf = ffmpeg_next::ffi::av_mallocz(padded) as *mut u8;
            if buf.is_null() {
                anyhow::bail!("failed to allocate {} bytes of decoder extradata", padded);
            }
            std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
            (*ctx).extradata = buf;
            (*ctx).extradata_size = extradata.len() as i32;
            // Frame threading would delay pictures by a packet.
            (*ctx).thread_count = 1;
        }

        let video_decoder = decoder_ctx.decoder().video()?;
        if video_decoder.width() == 0 || video_decoder.height() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }
        log::debug!(
            "theora decoder opened: {}x{} {:?}",
            video_decoder.width(),
            video_decoder.height(),
            video_decoder.format()
        );

        Ok(Self {
            inner: video_decoder,
            frame_index: 0,
        })
    }
}

impl VideoDecoder for TheoraDecoder {
    type Picture = ffmpeg_next::frame::Video;

    fn decode_packet(&mut self, packet: &Packet) -> anyhow::Result<DecodeStatus> {
        if packet.size() == 0 {
            return Ok(DecodeStatus::DuplicateFrame);
        }
        let mut av_packet = ffmpeg_next::codec::packet::Packet::copy(packet.data());
        av_packet.set_pts(Some(self.frame_index));
        self.frame_index += 1;
        self.inner.send_packet(&av_packet)?;
        Ok(DecodeStatus::Picture)
    }

    fn picture(&mut self) -> anyhow::Result<Self::Picture> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(frame),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Err(anyhow::anyhow!("decoder produced no picture for the packet"))
            }
            Err(err) => Err(err.into()),
        }
    }
}
