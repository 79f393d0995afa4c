//! Stream discovery.
//!
//! Container metadata is frequently incomplete or inconsistent, so every
//! property of a [`StreamInfo`] is resolved with a layered fallback: the
//! cheap container fields first, then progressively more expensive probes
//! that read packets. Discovery runs once per source; its results are
//! immutable afterwards.

use std::path::Path;

use ffmpeg_next::Rational;

use crate::{
    error::{FrameSeekError, UnsupportedReason},
    source::{DemuxedPacket, MediaSource},
    time_mapper::TimeMapper,
};

/// FFmpeg's internal time base (microseconds), used for container durations.
pub const AV_TIME_BASE: i64 = ffmpeg_sys_next::AV_TIME_BASE as i64;

/// Raw, unreconciled facts about one decodable video stream.
///
/// Produced by a [`MediaSource`]; `None` and zero values mean the container
/// did not report the field.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFacts {
    /// Container stream index.
    pub index: usize,
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Container-reported frame rate.
    pub frame_rate: Rational,
    /// Stream time base.
    pub time_base: Rational,
    /// Stream-level sample aspect ratio.
    pub stream_aspect_ratio: Rational,
    /// Codec-level sample aspect ratio.
    pub codec_aspect_ratio: Rational,
    /// Stream start time in the stream time base.
    pub start_time: Option<i64>,
    /// Container duration in [`AV_TIME_BASE`] units.
    pub container_duration: Option<i64>,
    /// Container-reported frame count (`0` when unknown).
    pub reported_frame_count: i64,
    /// Stream duration in the stream time base.
    pub stream_duration: Option<i64>,
    /// Number of packets the decoder may buffer before emitting a picture.
    pub codec_delay: u32,
    /// Decoder name.
    pub codec: String,
}

/// Resolved, immutable description of one decodable video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Container stream index.
    pub index: usize,
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// Pixel aspect ratio.
    pub aspect_ratio: f64,
    /// Frame rate, `1/1` when the container had none.
    pub frame_rate: Rational,
    /// Stream time base.
    pub time_base: Rational,
    /// Timestamp of frame 0.
    pub start_timestamp: i64,
    /// Total number of decodable frames.
    pub frame_count: i64,
    /// Decoder buffering depth in packets.
    pub codec_delay: u32,
    /// Decoder name.
    pub codec: String,
}

impl StreamInfo {
    /// Frame ↔ timestamp mapping for this stream.
    pub fn time_mapper(&self) -> TimeMapper {
        TimeMapper::new(self.frame_rate, self.time_base, self.start_timestamp)
    }
}

/// Discover every decodable video stream of an opened source.
///
/// # Errors
///
/// Returns [`FrameSeekError::UnsupportedSource`] when nothing decodable was
/// found, distinguishing a source without video from one whose video
/// codecs are unsupported.
pub fn discover<S: MediaSource>(
    source: &mut S,
    path: &Path,
) -> Result<Vec<StreamInfo>, FrameSeekError> {
    let all_facts = source.stream_facts();
    if all_facts.is_empty() {
        let reason = if source.video_stream_count() == 0 {
            UnsupportedReason::NoVideoStream
        } else {
            UnsupportedReason::NoSupportedCodec
        };
        return Err(FrameSeekError::UnsupportedSource {
            path: path.to_path_buf(),
            reason,
        });
    }

    let mut streams = Vec::with_capacity(all_facts.len());
    for facts in all_facts {
        let frame_rate = resolve_frame_rate(facts.frame_rate);
        let start_timestamp = match facts.start_time {
            Some(start) => start,
            None => scan_start_timestamp(source, facts.index),
        };
        let mapper = TimeMapper::new(frame_rate, facts.time_base, start_timestamp);
        let frame_count = match frame_count_from_metadata(&facts, frame_rate) {
            Some(count) => count,
            None => scan_frame_count(source, &facts, &mapper),
        };

        let info = StreamInfo {
            index: facts.index,
            width: facts.width,
            height: facts.height,
            aspect_ratio: resolve_aspect_ratio(facts.stream_aspect_ratio, facts.codec_aspect_ratio),
            frame_rate,
            time_base: facts.time_base,
            start_timestamp,
            frame_count,
            codec_delay: facts.codec_delay,
            codec: facts.codec,
        };

        log::debug!(
            "Discovered stream {}: {}x{}, {}/{} fps, start={}, {} frames, delay={}, codec={}",
            info.index,
            info.width,
            info.height,
            info.frame_rate.numerator(),
            info.frame_rate.denominator(),
            info.start_timestamp,
            info.frame_count,
            info.codec_delay,
            info.codec,
        );

        streams.push(info);
    }

    Ok(streams)
}

/// Container rate when both parts are nonzero, otherwise `1/1`.
pub fn resolve_frame_rate(reported: Rational) -> Rational {
    if reported.numerator() != 0 && reported.denominator() != 0 {
        reported
    } else {
        Rational::new(1, 1)
    }
}

/// Stream sample aspect ratio, else the codec's, else `1.0`.
pub fn resolve_aspect_ratio(stream: Rational, codec: Rational) -> f64 {
    [stream, codec]
        .into_iter()
        .find(|ratio| ratio.numerator() > 0 && ratio.denominator() > 0)
        .map(|ratio| ratio.numerator() as f64 / ratio.denominator() as f64)
        .unwrap_or(1.0)
}

/// Frame count from container fields alone, without reading packets.
///
/// Tiers, first success wins:
/// 1. container duration × frame rate, replaced by the reported count when
///    the two differ by at most one frame;
/// 2. the reported count;
/// 3. stream duration × time base × frame rate.
pub fn frame_count_from_metadata(facts: &StreamFacts, frame_rate: Rational) -> Option<i64> {
    let rate_numerator = frame_rate.numerator() as i128;
    let rate_denominator = frame_rate.denominator() as i128;

    if let Some(duration) = facts.container_duration.filter(|duration| *duration > 0) {
        let numerator = (duration as i128 - 1) * rate_numerator;
        let denominator = AV_TIME_BASE as i128 * rate_denominator;
        let from_duration = ceil_div(numerator, denominator) as i64;
        if from_duration > 0 {
            let reported = facts.reported_frame_count;
            if reported > 0 && (from_duration - reported).abs() <= 1 {
                return Some(reported);
            }
            return Some(from_duration);
        }
    }

    if facts.reported_frame_count > 0 {
        return Some(facts.reported_frame_count);
    }

    if let Some(duration) = facts.stream_duration.filter(|duration| *duration > 0) {
        let numerator = duration as i128 * facts.time_base.numerator() as i128 * rate_numerator;
        let denominator = facts.time_base.denominator() as i128 * rate_denominator;
        if denominator != 0 {
            let count = (numerator / denominator) as i64;
            if count > 0 {
                return Some(count);
            }
        }
    }

    None
}

/// Rewind and read until a packet of `stream` carries a timestamp.
///
/// Any failure (seek, read, end of file) resolves to `0`.
fn scan_start_timestamp<S: MediaSource>(source: &mut S, stream: usize) -> i64 {
    if let Err(error) = source.seek(stream, i64::MIN) {
        log::warn!("Stream {stream}: cannot rewind to probe start time ({error}), assuming 0");
        return 0;
    }

    loop {
        match source.read_packet() {
            Ok(Some(packet)) if packet.stream_index() == stream => {
                if let Some(timestamp) = packet.pts().or_else(|| packet.dts()) {
                    log::debug!("Stream {stream}: start time probed from packets: {timestamp}");
                    return timestamp;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => return 0,
            Err(error) => {
                log::warn!("Stream {stream}: read failed while probing start time: {error}");
                return 0;
            }
        }
    }
}

/// Last resort: scan packets from near the presumed end and count up to
/// the largest timestamp seen.
fn scan_frame_count<S: MediaSource>(source: &mut S, facts: &StreamFacts, mapper: &TimeMapper) -> i64 {
    let presumed_end = presumed_end_timestamp(facts, mapper);
    log::debug!(
        "Stream {}: no usable frame count metadata, scanning packets from {presumed_end}",
        facts.index
    );

    if source.seek(facts.index, presumed_end).is_err() && source.seek(facts.index, i64::MIN).is_err()
    {
        log::warn!("Stream {}: cannot seek to count frames", facts.index);
        return 0;
    }

    let mut max_timestamp: Option<i64> = None;
    loop {
        match source.read_packet() {
            Ok(Some(packet)) => {
                if packet.stream_index() != facts.index {
                    continue;
                }
                if let Some(timestamp) = packet.pts().or_else(|| packet.dts()) {
                    max_timestamp = Some(max_timestamp.map_or(timestamp, |max| max.max(timestamp)));
                }
            }
            Ok(None) => break,
            Err(error) => {
                log::warn!("Stream {}: read failed while counting frames: {error}", facts.index);
                break;
            }
        }
    }

    // Both the first and the last timestamp denote frame starts.
    max_timestamp.map_or(0, |timestamp| mapper.pts_to_frame(timestamp) + 1)
}

fn presumed_end_timestamp(facts: &StreamFacts, mapper: &TimeMapper) -> i64 {
    if let Some(duration) = facts.stream_duration.filter(|duration| *duration > 0) {
        return mapper.start_timestamp().saturating_add(duration);
    }

    let time_base = mapper.time_base();
    if let Some(duration) = facts.container_duration.filter(|duration| *duration > 0) {
        let rescaled = duration as i128 * time_base.denominator() as i128
            / (AV_TIME_BASE as i128 * time_base.numerator() as i128);
        return mapper
            .start_timestamp()
            .saturating_add(rescaled.clamp(0, i64::MAX as i128) as i64);
    }

    i64::MIN
}

fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator != 0 && (numerator > 0) == (denominator > 0) {
        quotient + 1
    } else {
        quotient
    }
}
