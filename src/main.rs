use std::{fs::File, io::Read};

use anyhow::Context;
use clap::Parser;
use ogg_bus::{chunker::Chunker, codec::FfmpegBackend};

mod config;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

fn run(args: &config::Args) -> anyhow::Result<()> {
    ogg_bus::init()?;

    let source: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin().lock()),
    };

    let chunker = Chunker::new(source, FfmpegBackend, args.chunker_config())?;
    let summary = chunker.run()?;
    log::info!(
        "done: {} + {} chunks",
        summary.header.display(),
        summary.bodies.len()
    );
    Ok(())
}

fn main() {
    let args = config::Args::parse();
    init_logging();

    if let Err(e) = run(&args) {
        eprintln!("ogv-chunk: {:#}", e);
        std::process::exit(1);
    }
}
