use ffmpeg_next::{format::Pixel, frame::Video, software::scaling};

/// Converts decoded pictures to the layout the encoder was opened with.
pub struct Scaler {
    context: scaling::Context,
    dst_format: Pixel,
    dst_width: u32,
    dst_height: u32,
}

impl Scaler {
    pub fn new(src: &Video, dst_format: Pixel, dst_width: u32, dst_height: u32) -> anyhow::Result<Self> {
        let context = scaling::Context::get(
            src.format(),
            src.width(),
            src.height(),
            dst_format,
            dst_width,
            dst_height,
            scaling::flag::Flags::BILINEAR,
        )?;
        log::debug!(
            "scaling {:?} {}x{} to {:?} {}x{}",
            src.format(),
            src.width(),
            src.height(),
            dst_format,
            dst_width,
            dst_height
        );
        Ok(Self {
            context,
            dst_format,
            dst_width,
            dst_height,
        })
    }

    /// True when `src` has to go through a scaler before encoding.
    pub fn needed(src: &Video, dst_format: Pixel, dst_width: u32, dst_height: u32) -> bool {
        src.format() != dst_format || src.width() != dst_width || src.height() != dst_height
    }

    /// True when this scaler was built for pictures shaped like `src`.
    pub fn accepts(&self, src: &Video) -> bool {
        let input = self.context.input();
        input.format == src.format() && input.width == src.width() && input.height == src.height()
    }

    pub fn run(&mut self, frame: &Video) -> anyhow::Result<Video> {
        let mut dst = Video::new(self.dst_format, self.dst_width, self.dst_height);
        self.context.run(frame, &mut dst)?;
        dst.set_pts(frame.pts());
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_encoder_layout() -> anyhow::Result<()> {
        let mut src = Video::new(Pixel::YUV422P, 64, 48);
        src.set_pts(Some(7));
        assert!(Scaler::needed(&src, Pixel::YUV420P, 64, 48));
        assert!(!Scaler::needed(&src, Pixel::YUV422P, 64, 48));

        let mut scaler = Scaler::new(&src, Pixel::YUV420P, 128, 96)?;
        assert!(scaler.accepts(&src));
        assert!(!scaler.accepts(&Video::new(Pixel::YUV422P, 32, 48)));

        let dst = scaler.run(&src)?;
        assert_eq!((dst.format(), dst.width(), dst.height()), (Pixel::YUV420P, 128, 96));
        assert_eq!(dst.pts(), Some(7));
        Ok(())
    }
}
