use ffmpeg_next::{format::Pixel, frame::Video};

use crate::{
    codec::{CodecBackend, DecodeStatus, FfmpegBackend, VideoDecoder, VideoEncoder},
    packet::Packet,
    theora::{self, HeaderStatus, TheoraHeaders, TheoraInfo, sample_info},
    transcode::KeyframeScheduler,
};

const FRAMES: u64 = 10;

/// The FFmpeg backend, or `None` when this FFmpeg build lacks libtheora.
fn backend() -> Option<FfmpegBackend> {
    if let Err(e) = crate::init() {
        eprintln!("skip: {}", e);
        return None;
    }
    if ffmpeg_next::encoder::find_by_name("libtheora").is_none() {
        eprintln!("skip: libtheora encoder not available");
        return None;
    }
    Some(FfmpegBackend)
}

/// A moving luma ramp over flat chroma.
fn picture(width: u32, height: u32, index: u64) -> Video {
    let mut frame = Video::new(Pixel::YUV420P, width, height);
    let stride = frame.stride(0);
    for (i, byte) in frame.data_mut(0).iter_mut().enumerate() {
        *byte = ((i % stride) as u64 + index * 8) as u8;
    }
    frame.data_mut(1).fill(128);
    frame.data_mut(2).fill(128);
    frame
}

fn encode<E: VideoEncoder<Video>>(
    encoder: &mut E,
    info: &TheoraInfo,
    pictures: impl IntoIterator<Item = Video>,
) -> anyhow::Result<Vec<Packet>> {
    let mut scheduler = KeyframeScheduler::new(info.keyframe_frequency());
    let mut packets = Vec::new();
    for mut picture in pictures {
        scheduler.before_submit(encoder)?;
        encoder.submit_picture(&mut picture)?;
        scheduler.after_submit(encoder)?;
        while let Some(packet) = encoder.pull_packet(false)? {
            packets.push(packet);
        }
    }
    while let Some(packet) = encoder.pull_packet(true)? {
        packets.push(packet);
    }
    Ok(packets)
}

fn collect_headers(packets: &[Packet]) -> anyhow::Result<TheoraHeaders> {
    let mut headers = TheoraHeaders::new();
    let mut status = HeaderStatus::NeedMore;
    for packet in packets {
        status = headers.header_in(packet)?;
    }
    assert_eq!(status, HeaderStatus::Complete);
    Ok(headers)
}

#[test]
fn test_encode_then_decode_with_encoder_headers() -> anyhow::Result<()> {
    let Some(backend) = backend() else {
        return Ok(());
    };
    let info = sample_info();
    let mut encoder = backend.encoder(&info)?;
    let headers = collect_headers(&encoder.header_packets()?)?;
    let out_info = headers.info().expect("identification header").clone();
    assert_eq!(
        (out_info.pic_width, out_info.pic_height),
        (info.pic_width, info.pic_height)
    );

    let pictures = (0..FRAMES).map(|i| picture(info.pic_width, info.pic_height, i));
    let packets = encode(&mut encoder, &info, pictures)?;

    assert_eq!(packets.len() as u64, FRAMES);
    assert!(theora::is_keyframe(packets[0].data()));
    assert!(packets[..packets.len() - 1].iter().all(|p| !p.is_eos()));
    assert!(packets.last().is_some_and(Packet::is_eos));
    let frames: Vec<i64> = packets
        .iter()
        .map(|p| out_info.granule_frame(p.granule()))
        .collect();
    assert_eq!(frames, (0..FRAMES as i64).collect::<Vec<_>>());

    let mut decoder = backend.decoder(&headers)?;
    for packet in &packets {
        assert_eq!(decoder.decode_packet(packet)?, DecodeStatus::Picture);
        let decoded = decoder.picture()?;
        assert_eq!(decoded.width(), info.pic_width);
        assert_eq!(decoded.height(), info.pic_height);
    }
    assert_eq!(
        decoder.decode_packet(&Packet::new(Vec::new()))?,
        DecodeStatus::DuplicateFrame
    );
    Ok(())
}

#[test]
fn test_encoder_scales_mismatched_pictures() -> anyhow::Result<()> {
    let Some(backend) = backend() else {
        return Ok(());
    };
    let info = sample_info();
    let mut encoder = backend.encoder(&info)?;

    let pictures = (0..3).map(|i| picture(info.pic_width / 2, info.pic_height / 2, i));
    let packets = encode(&mut encoder, &info, pictures)?;
    assert_eq!(packets.len(), 3);
    assert!(theora::is_keyframe(packets[0].data()));
    Ok(())
}
