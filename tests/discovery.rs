//! Stream discovery integration tests.
//!
//! Exercise the packet-scanning fallbacks for start time and frame count
//! through the scripted source.

mod common;

use std::path::Path;

use common::{Clip, Counters, ScriptedSource, frame_of};
use ffmpeg_next::Rational;
use frameseek::{
    FileHandle, FrameSeekError, FramePolicy, StreamFacts, UnsupportedReason,
    discovery::{AV_TIME_BASE, discover, frame_count_from_metadata},
};

fn discover_clip(clip: Clip) -> (Result<Vec<frameseek::StreamInfo>, FrameSeekError>, std::sync::Arc<Counters>) {
    let counters = Counters::new();
    let mut source = ScriptedSource::new(clip, counters.clone());
    (discover(&mut source, Path::new("clip.mp4")), counters)
}

// ── start time ─────────────────────────────────────────────────────

#[test]
fn reported_start_time_needs_no_reads() {
    let (streams, counters) = discover_clip(Clip::new(20).start_timestamp(2_560));
    let streams = streams.unwrap();
    assert_eq!(streams[0].start_timestamp, 2_560);
    assert_eq!(counters.reads(), 0);
    assert_eq!(counters.seeks(), 0);
}

#[test]
fn missing_start_time_is_probed_from_packets() {
    let clip = Clip::new(20).start_timestamp(6_400).without_start_time().with_audio();
    let (streams, counters) = discover_clip(clip);
    let streams = streams.unwrap();
    assert_eq!(streams[0].start_timestamp, 6_400);
    assert!(counters.reads() >= 2, "Audio packet should have been skipped");
}

#[test]
fn start_time_probe_uses_decode_timestamps() {
    let clip = Clip::new(20).start_timestamp(1_024).without_start_time().without_pts();
    let (streams, _counters) = discover_clip(clip);
    assert_eq!(streams.unwrap()[0].start_timestamp, 1_024);
}

#[test]
fn start_time_without_any_timestamp_is_zero() {
    let clip = Clip::new(20).without_start_time().without_timestamps();
    let (streams, _counters) = discover_clip(clip);
    assert_eq!(streams.unwrap()[0].start_timestamp, 0);
}

// ── frame count ────────────────────────────────────────────────────

#[test]
fn missing_frame_count_is_scanned() {
    let clip = Clip::new(37).without_frame_count();
    let (streams, counters) = discover_clip(clip);
    assert_eq!(streams.unwrap()[0].frame_count, 37);
    assert!(counters.seeks() >= 1);
    assert!(counters.reads() >= 37);
}

#[test]
fn scanned_frame_count_accounts_for_start_offset() {
    let clip = Clip::new(25)
        .start_timestamp(12_800)
        .without_start_time()
        .without_frame_count()
        .with_audio();
    let (streams, _counters) = discover_clip(clip);
    let stream = &streams.unwrap()[0];
    assert_eq!(stream.start_timestamp, 12_800);
    assert_eq!(stream.frame_count, 25);
}

#[test]
fn empty_stream_has_no_frames() {
    let (handle, _counters) = {
        let counters = Counters::new();
        let handle = FileHandle::open_with(
            "empty.mp4",
            ScriptedSource::opener(Clip::new(0).without_frame_count(), counters.clone()),
        );
        (handle, counters)
    };

    assert_eq!(handle.info().unwrap().frame_count, 0);
    let result = handle.decode_frame(0, FramePolicy::ClampToNearest);
    assert!(matches!(
        result,
        Err(FrameSeekError::FrameOutOfRange {
            frame: 0,
            frame_count: 0
        })
    ));
}

#[test]
fn scanned_count_is_usable_for_decoding() {
    let counters = Counters::new();
    let handle = FileHandle::open_with(
        "scan.mp4",
        ScriptedSource::opener(Clip::new(33).without_frame_count().codec_delay(2), counters),
    );

    let last = handle.decode_frame(i64::MAX, FramePolicy::ClampToNearest).unwrap();
    assert_eq!(frame_of(&last), 32);
}

#[test]
fn ntsc_duration_reconciles_with_reported_count() {
    let facts = StreamFacts {
        index: 0,
        width: 1920,
        height: 1080,
        frame_rate: Rational::new(30000, 1001),
        time_base: Rational::new(1, 90000),
        stream_aspect_ratio: Rational::new(1, 1),
        codec_aspect_ratio: Rational::new(1, 1),
        start_time: Some(0),
        // 300 frames at 29.97 fps.
        container_duration: Some(10_010_000),
        reported_frame_count: 0,
        stream_duration: None,
        codec_delay: 2,
        codec: "h264".to_string(),
    };
    let rate = facts.frame_rate;
    assert_eq!(frame_count_from_metadata(&facts, rate), Some(300));

    let off_by_one = StreamFacts {
        reported_frame_count: 301,
        ..facts.clone()
    };
    assert_eq!(frame_count_from_metadata(&off_by_one, rate), Some(301));

    let far_off = StreamFacts {
        reported_frame_count: 250,
        ..facts
    };
    assert_eq!(frame_count_from_metadata(&far_off, rate), Some(300));
    assert_eq!(AV_TIME_BASE, 1_000_000);
}

// ── rejection ──────────────────────────────────────────────────────

#[test]
fn source_without_video_is_unsupported() {
    let (streams, _counters) = discover_clip(Clip::new(10).audio_only());
    match streams {
        Err(FrameSeekError::UnsupportedSource { path, reason }) => {
            assert_eq!(path, Path::new("clip.mp4"));
            assert_eq!(reason, UnsupportedReason::NoVideoStream);
        }
        other => panic!("Expected UnsupportedSource, got {other:?}"),
    }
}

#[test]
fn undecodable_video_is_unsupported() {
    let (streams, _counters) = discover_clip(Clip::new(10).undecodable());
    let message = streams.unwrap_err().to_string();
    assert!(message.contains("no supported codec"), "Unexpected message: {message}");
}

#[test]
fn discovered_stream_carries_codec_delay() {
    let (streams, _counters) = discover_clip(Clip::new(10).codec_delay(3));
    let stream = &streams.unwrap()[0];
    assert_eq!(stream.codec_delay, 3);
    assert_eq!(stream.frame_rate, Rational::new(25, 1));
    assert_eq!(stream.time_base, Rational::new(1, 12800));
}
