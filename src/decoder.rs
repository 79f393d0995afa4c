//! Frame-indexed decoding on top of a streaming decode pipeline.
//!
//! Decoders take packets in and hand pictures out with a latency of up to
//! the codec delay, and seeks land on whatever key-frame the demuxer picks.
//! [`decode_frame`] turns that into "give me picture N": it seeks only when
//! the request is not the next sequential frame, works out which frame a
//! seek actually landed on, and recovers from stalls caused by mislabelled
//! key-frames or corrupt data by seeking further back or retrying once.
//!
//! Every call terminates: the backward search stops at frame 0, the switch
//! from PTS to DTS happens at most once per stream, and stalls are retried
//! at most [`STALL_RETRY_BUDGET`] times per call.

use image::RgbImage;

use crate::{
    discovery::StreamInfo,
    error::{FrameSeekError, StallKind},
    source::{DemuxedPacket, MediaSource, TimestampKind, timestamp_of},
    time_mapper::TimeMapper,
};

/// Extra attempts from the original target allowed after a stall.
pub const STALL_RETRY_BUDGET: u32 = 1;

/// Where a stream's decode pipeline stands between and during calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeState {
    /// The next picture out is the frame after the last one delivered.
    #[default]
    Sequential,
    /// A seek was issued and the landing frame is not known yet.
    SeekingForSync,
    /// The container is exhausted; buffered pictures are being flushed.
    Draining,
    /// The last call failed; the next call must seek.
    Failed,
}

/// Mutable decode position of one stream.
///
/// Owned by the file handle next to the immutable [`StreamInfo`] and only
/// touched while the handle's lock is held. `next_frame_in` and
/// `next_frame_out` are `-1` when the position is unknown; they are always
/// reset together. A seek can land on a frame before the stream start, so
/// whether the position is known is tracked separately from their values.
#[derive(Debug, Clone)]
pub struct DecodeCursor {
    next_frame_in: i64,
    next_frame_out: i64,
    synced: bool,
    accumulated_stall_count: u32,
    timestamp_kind: TimestampKind,
    has_seen_primary_timestamp: bool,
    state: DecodeState,
    last_picture: Option<(i64, RgbImage)>,
}

impl Default for DecodeCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeCursor {
    /// A cursor with an unknown position; the first decode always seeks.
    pub fn new() -> Self {
        Self {
            next_frame_in: -1,
            next_frame_out: -1,
            synced: false,
            accumulated_stall_count: 0,
            timestamp_kind: TimestampKind::Primary,
            has_seen_primary_timestamp: false,
            state: DecodeState::Sequential,
            last_picture: None,
        }
    }

    /// Ordinal of the next frame to be fed to the decoder, `-1` if unknown.
    pub fn next_frame_in(&self) -> i64 {
        self.next_frame_in
    }

    /// Ordinal of the next picture expected from the decoder, `-1` if unknown.
    pub fn next_frame_out(&self) -> i64 {
        self.next_frame_out
    }

    /// Whether the cursor knows which frame the decoder emits next.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Decode attempts without output since the last picture or seek.
    pub fn accumulated_stall_count(&self) -> u32 {
        self.accumulated_stall_count
    }

    /// Timestamp kind currently trusted for this stream.
    pub fn timestamp_kind(&self) -> TimestampKind {
        self.timestamp_kind
    }

    /// Current pipeline state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    fn reset_position(&mut self) {
        self.next_frame_in = -1;
        self.next_frame_out = -1;
        self.synced = false;
        self.accumulated_stall_count = 0;
    }

    /// Forget the position after another stream moved the shared demuxer.
    ///
    /// The last picture stays valid and still answers repeated requests.
    pub(crate) fn invalidate(&mut self) {
        if self.state != DecodeState::Failed {
            self.state = DecodeState::Sequential;
        }
        self.reset_position();
    }

    fn fail(&mut self) {
        self.reset_position();
        self.state = DecodeState::Failed;
        self.last_picture = None;
    }
}

/// Per-call bookkeeping of the seek search.
struct SeekSearch {
    target: i64,
    last_seek_target: i64,
    awaiting_first_picture: bool,
    retries_left: u32,
}

/// Decode frame `target` of `stream`.
///
/// A repeated request for the last delivered frame is answered from the
/// cursor without touching the source.
///
/// # Errors
///
/// Seek, read and decode failures of the source are returned as-is;
/// [`FrameSeekError::LostTimingReference`] and
/// [`FrameSeekError::DecodeStall`] report a search that ran out of options.
/// On any error the cursor is reset so the next call seeks afresh.
pub fn decode_frame<S: MediaSource>(
    source: &mut S,
    stream: &StreamInfo,
    cursor: &mut DecodeCursor,
    target: i64,
) -> Result<RgbImage, FrameSeekError> {
    if let Some((frame, picture)) = &cursor.last_picture {
        if *frame == target {
            log::trace!("Stream {}: frame {target} served from last picture", stream.index);
            return Ok(picture.clone());
        }
    }

    let result = run(source, stream, cursor, target);
    if let Err(error) = &result {
        log::debug!("Stream {}: decode of frame {target} failed: {error}", stream.index);
        cursor.fail();
    }
    result
}

fn run<S: MediaSource>(
    source: &mut S,
    stream: &StreamInfo,
    cursor: &mut DecodeCursor,
    target: i64,
) -> Result<RgbImage, FrameSeekError> {
    let mapper = stream.time_mapper();
    let mut search = SeekSearch {
        target,
        last_seek_target: target,
        awaiting_first_picture: false,
        retries_left: STALL_RETRY_BUDGET,
    };

    let continues = cursor.synced
        && target == cursor.next_frame_out
        && matches!(cursor.state, DecodeState::Sequential | DecodeState::Draining);
    if continues {
        log::trace!("Stream {}: frame {target} continues sequentially", stream.index);
    } else {
        seek_to(source, stream, cursor, &mapper, &mut search, target)?;
    }

    loop {
        let mut attempted = false;
        let mut produced = false;

        if cursor.state != DecodeState::Draining {
            let seeking = cursor.state == DecodeState::SeekingForSync;
            if seeking || cursor.next_frame_in < stream.frame_count {
                let Some(packet) = source.read_packet()? else {
                    log::debug!("Stream {}: end of input, draining decoder", stream.index);
                    cursor.state = DecodeState::Draining;
                    continue;
                };
                if packet.stream_index() != stream.index {
                    continue;
                }
                if packet.pts().is_some() {
                    cursor.has_seen_primary_timestamp = true;
                }

                if seeking {
                    let landing = timestamp_of(&packet, cursor.timestamp_kind)
                        .map(|timestamp| mapper.pts_to_frame(timestamp));
                    match landing {
                        Some(frame) if frame <= search.last_seek_target => {
                            log::trace!(
                                "Stream {}: seek for frame {} landed on frame {frame}",
                                stream.index,
                                search.last_seek_target
                            );
                            cursor.next_frame_in = frame;
                            cursor.next_frame_out = frame;
                            cursor.synced = true;
                            cursor.state = DecodeState::Sequential;
                            search.last_seek_target = frame;
                        }
                        _ => {
                            step_back(source, stream, cursor, &mapper, &mut search)?;
                            continue;
                        }
                    }
                }

                produced = source.decode(stream.index, Some(&packet))?;
                attempted = true;
                cursor.next_frame_in += 1;
            } else {
                log::debug!("Stream {}: all frames fed, draining decoder", stream.index);
                cursor.state = DecodeState::Draining;
            }
        }

        if cursor.state == DecodeState::Draining {
            produced = source.decode(stream.index, None)?;
            attempted = true;
        }

        if produced {
            search.awaiting_first_picture = false;
            cursor.accumulated_stall_count = 0;
            if cursor.synced {
                let frame = cursor.next_frame_out;
                cursor.next_frame_out += 1;
                if frame == target {
                    let picture = source.picture(stream.index)?;
                    cursor.last_picture = Some((frame, picture.clone()));
                    return Ok(picture);
                }
            }
        } else if attempted {
            cursor.accumulated_stall_count += 1;
            if cursor.accumulated_stall_count > stream.codec_delay {
                recover_from_stall(source, stream, cursor, &mapper, &mut search)?;
            }
        }
    }
}

/// Issue a seek for `frame` and forget the current position.
fn seek_to<S: MediaSource>(
    source: &mut S,
    stream: &StreamInfo,
    cursor: &mut DecodeCursor,
    mapper: &TimeMapper,
    search: &mut SeekSearch,
    frame: i64,
) -> Result<(), FrameSeekError> {
    let timestamp = mapper.frame_to_pts(frame);
    log::debug!(
        "Stream {}: seeking to frame {frame} (timestamp {timestamp}) for frame {}",
        stream.index,
        search.target
    );
    cursor.reset_position();
    cursor.last_picture = None;
    cursor.state = DecodeState::SeekingForSync;
    search.last_seek_target = frame;
    search.awaiting_first_picture = true;
    source.seek(stream.index, timestamp)
}

/// The first packet after a seek had no usable timestamp or lay past the
/// seek target: try one frame earlier.
fn step_back<S: MediaSource>(
    source: &mut S,
    stream: &StreamInfo,
    cursor: &mut DecodeCursor,
    mapper: &TimeMapper,
    search: &mut SeekSearch,
) -> Result<(), FrameSeekError> {
    let earlier = search.last_seek_target - 1;
    if earlier >= 0 {
        return seek_to(source, stream, cursor, mapper, search, earlier);
    }

    if cursor.timestamp_kind == TimestampKind::Primary && !cursor.has_seen_primary_timestamp {
        log::warn!(
            "Stream {}: no presentation timestamps seen, falling back to decode timestamps",
            stream.index
        );
        cursor.timestamp_kind = TimestampKind::Fallback;
        let target = search.target;
        return seek_to(source, stream, cursor, mapper, search, target);
    }

    Err(FrameSeekError::LostTimingReference {
        frame: search.target,
    })
}

fn recover_from_stall<S: MediaSource>(
    source: &mut S,
    stream: &StreamInfo,
    cursor: &mut DecodeCursor,
    mapper: &TimeMapper,
    search: &mut SeekSearch,
) -> Result<(), FrameSeekError> {
    let target = search.target;

    if search.awaiting_first_picture {
        let earlier = search.last_seek_target - 1;
        if earlier >= 0 {
            log::warn!(
                "Stream {}: nothing decoded after seeking to frame {}, retrying from frame {earlier}",
                stream.index,
                search.last_seek_target
            );
            return seek_to(source, stream, cursor, mapper, search, earlier);
        }
        if search.retries_left > 0 {
            search.retries_left -= 1;
            log::warn!(
                "Stream {}: no decode start point before frame {target}, retrying once",
                stream.index
            );
            return seek_to(source, stream, cursor, mapper, search, target);
        }
        return Err(FrameSeekError::DecodeStall {
            frame: target,
            kind: StallKind::NoDecodeStartPoint,
        });
    }

    if search.retries_left > 0 {
        search.retries_left -= 1;
        log::warn!(
            "Stream {}: decoder stalled at frame {} while looking for frame {target}, retrying once",
            stream.index,
            cursor.next_frame_out
        );
        return seek_to(source, stream, cursor, mapper, search, target);
    }

    Err(FrameSeekError::DecodeStall {
        frame: target,
        kind: StallKind::Corruption,
    })
}
