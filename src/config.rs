use std::path::PathBuf;

use clap::Parser;
use ogg_bus::{chunker::ChunkerConfig, output::ChunkNaming};

#[derive(Parser, Debug)]
#[command(name = "ogv-chunk")]
#[command(about = "Re-encode an Ogg Theora stream into a header file and numbered chunk files")]
pub struct Args {
    /// Serial number of the Theora stream to transcode (default: the first one)
    pub serialno: Option<u32>,

    /// Encoder quality, 0..=63 (default: the input's)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=63))]
    pub quality: Option<u8>,

    /// Video packets per chunk (default: about half a second)
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub packets_per_chunk: Option<u32>,

    /// Directory the chunk files are written to
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// File name prefix; files are named <prefix><n>.ogv
    #[arg(long, default_value = "output")]
    pub prefix: String,

    /// Read from this file instead of standard input
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

impl Args {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::new(ChunkNaming::new(&self.output_dir, &self.prefix))
            .video_serial(self.serialno)
            .quality(self.quality)
            .packets_per_chunk(self.packets_per_chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["ogv-chunk"]);
        let config = args.chunker_config();
        assert_eq!(config.video_serial, None);
        assert_eq!(config.quality, None);
        assert_eq!(config.naming, ChunkNaming::default());
    }

    #[test]
    fn test_all_options() {
        let args = Args::parse_from([
            "ogv-chunk", "-q", "40", "-p", "25", "-o", "/tmp/out", "--prefix", "seg", "7",
        ]);
        let config = args.chunker_config();
        assert_eq!(config.video_serial, Some(7));
        assert_eq!(config.quality, Some(40));
        assert_eq!(config.packets_per_chunk, Some(25));
        assert_eq!(config.naming.path(3), PathBuf::from("/tmp/out/seg3.ogv"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(Args::try_parse_from(["ogv-chunk", "-q", "64"]).is_err());
        assert!(Args::try_parse_from(["ogv-chunk", "-p", "0"]).is_err());
    }
}
