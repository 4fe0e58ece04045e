/// Registers FFmpeg components. Call once at startup before opening codecs.
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod chunker;
pub mod codec;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod demux;
#[cfg(feature = "ffmpeg")]
pub mod encoder;
pub mod mux;
pub mod output;
pub mod packet;
pub mod page;
pub mod reader;
#[cfg(feature = "ffmpeg")]
pub mod scaler;
pub mod sniff;
pub mod stream;
pub mod sync;
pub mod theora;
pub mod transcode;
