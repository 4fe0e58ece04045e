use std::collections::VecDeque;

use bytes::Bytes;
use ffmpeg_next::{Dictionary, Rational, format::Pixel, picture};

use crate::{
    codec::VideoEncoder,
    packet::Packet,
    scaler::Scaler,
    theora::{self, PixelLayout, TheoraInfo},
};

/// libtheoraenc maps `global_quality / FF_QP2LAMBDA` in 0..=10 onto 0..=63.
const QP2LAMBDA: f64 = 118.0;
const QUALITY_STEP: f64 = 6.3;

/// libtheora behind FFmpeg, configured from the input stream's
/// identification header.
///
/// libtheoraenc does not read the picture type, so a keyframe frequency of 1
/// only marks the frame as an I picture and restoring the natural frequency
/// changes nothing. The first-frame keyframe comes from libtheora itself: a
/// freshly opened encoder always starts with one.
pub struct TheoraEncoder {
    inner: ffmpeg_next::codec::encoder::Video,
    /// Parsed back from the encoder's own identification header.
    info: TheoraInfo,
    scaler: Option<Scaler>,
    force_keyframe: bool,
    frame_index: i64,
    packets_out: u64,
    last_keyframe: u64,
    draining: bool,
    pending: VecDeque<Packet>,
}

impl TheoraEncoder {
    pub fn new(info: &TheoraInfo) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find_by_name("libtheora")
            .ok_or(anyhow::anyhow!("codec not found: libtheora"))?;
        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        encoder.set_width(info.pic_width);
        encoder.set_height(info.pic_height);
        encoder.set_format(pixel_format(info.pixel_layout));
        let rate = Rational(
            i32::try_from(info.fps_numerator)?,
            i32::try_from(info.fps_denominator)?,
        );
        encoder.set_frame_rate(Some(rate));
        encoder.set_time_base(rate.invert());
        if info.aspect_numerator > 0 && info.aspect_denominator > 0 {
            encoder.set_aspect_ratio(Rational(
                i32::try_from(info.aspect_numerator)?,
                i32::try_from(info.aspect_denominator)?,
            ));
        }
        encoder.set_gop(info.keyframe_frequency());
        if info.target_bitrate > 0 {
            encoder.set_bit_rate(info.target_bitrate as usize);
        } else {
            encoder.set_flags(ffmpeg_next::codec::Flags::QSCALE);
            encoder.set_quality((info.quality as f64 * QP2LAMBDA / QUALITY_STEP).round() as usize);
        }

        let encoder = encoder.open_with(Dictionary::new())?;
        let headers = read_extradata(&encoder)?;
        let identification = headers
            .first()
            .ok_or(anyhow::anyhow!("libtheora produced no headers"))?;
        let out_info = TheoraInfo::parse(identification)?;
        log::info!(
            "encoder opened: libtheora {}x{} @ {:.3} fps, quality {}, bitrate {}, keyframe shift {}",
            out_info.pic_width,
            out_info.pic_height,
            out_info.frame_rate(),
            out_info.quality,
            out_info.target_bitrate,
            out_info.keyframe_granule_shift
        );

        Ok(Self {
            inner: encoder,
            info: out_info,
            scaler: None,
            force_keyframe: false,
            frame_index: 0,
            packets_out: 0,
            last_keyframe: 0,
            draining: false,
            pending: VecDeque::new(),
        })
    }

    fn receive_packet(&mut self) -> anyhow::Result<Option<Packet>> {
        let mut av_packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut av_packet) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                return Ok(None);
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let data = Bytes::copy_from_slice(av_packet.data().unwrap_or_default());
        let frame = self.packets_out;
        if theora::is_keyframe(&data) {
            self.last_keyframe = frame;
        }
        self.packets_out += 1;
        Ok(Some(
            Packet::new(data)
                .with_granule(self.info.granule_position(self.last_keyframe, frame))
                .with_packetno(frame + 3),
        ))
    }
}

impl VideoEncoder<ffmpeg_next::frame::Video> for TheoraEncoder {
    fn header_packets(&mut self) -> anyhow::Result<Vec<Packet>> {
        let headers = read_extradata(&self.inner)?;
        if headers.len() != 3 {
            anyhow::bail!("libtheora produced {} headers, expected 3", headers.len());
        }
        Ok(headers
            .into_iter()
            .enumerate()
            .map(|(index, header)| Packet::new(header).with_granule(0).with_packetno(index as u64))
            .collect())
    }

    fn set_keyframe_frequency(&mut self, frequency: u32) -> anyhow::Result<()> {
        if frequency == 0 {
            anyhow::bail!("keyframe frequency must be at least 1");
        }
        self.force_keyframe = frequency == 1;
        log::trace!("keyframe frequency set to {}", frequency);
        Ok(())
    }

    fn submit_picture(&mut self, picture: &mut ffmpeg_next::frame::Video) -> anyhow::Result<()> {
        if self.draining {
            anyhow::bail!("picture submitted after the encoder was drained");
        }
        let (format, width, height) = (self.inner.format(), self.inner.width(), self.inner.height());

        let mut converted = if Scaler::needed(picture, format, width, height) {
            if !self.scaler.as_ref().is_some_and(|s| s.accepts(picture)) {
                self.scaler = Some(Scaler::new(picture, format, width, height)?);
            }
            match self.scaler.as_mut() {
                Some(scaler) => Some(scaler.run(picture)?),
                None => None,
            }
        } else {
            None
        };
        let frame = converted.as_mut().unwrap_or(picture);

        frame.set_kind(if self.force_keyframe {
            picture::Type::I
        } else {
            picture::Type::None
        });
        frame.set_pts(Some(self.frame_index));
        self.inner.send_frame(frame)?;
        self.frame_index += 1;
        Ok(())
    }

    fn pull_packet(&mut self, eos: bool) -> anyhow::Result<Option<Packet>> {
        if eos && !self.draining {
            self.inner.send_eof()?;
            self.draining = true;
            while let Some(packet) = self.receive_packet()? {
                self.pending.push_back(packet);
            }
            match self.pending.back_mut() {
                Some(last) => last.set_eos(true),
                None => log::warn!("encoder drained with no packet left to carry end of stream"),
            }
        }
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }
        if self.draining {
            return Ok(None);
        }
        self.receive_packet()
    }
}

fn pixel_format(layout: PixelLayout) -> Pixel {
    match layout {
        PixelLayout::Yuv420 => Pixel::YUV420P,
        PixelLayout::Yuv422 => Pixel::YUV422P,
        PixelLayout::Yuv444 => Pixel::YUV444P,
    }
}

fn read_extradata(encoder: &ffmpeg_next::codec::encoder::Video) -> anyhow::Result<Vec<Bytes>> {
    let extradata = unsafe {
        let ctx = encoder.0.as_ptr();
        if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
            anyhow::bail!("encoder has no extradata");
        }
        std::slice::from_raw_parts((*ctx).extradata, (*ctx).extradata_size as usize)
    };
    theora::split_extradata(extradata)
}
