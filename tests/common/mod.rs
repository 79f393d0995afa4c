//! Scripted in-memory media source shared by the integration tests.
//!
//! A [`Clip`] describes a synthetic video stream: its frame count,
//! key-frame spacing, decoder delay and which timestamps its packets carry.
//! [`ScriptedSource`] plays it back through the [`MediaSource`] trait and
//! counts every seek, read and decode in a shared [`Counters`]. Each decoded
//! picture has its frame number and stream encoded in the pixel data, so
//! tests can check exactly which frame came back with [`frame_of`] and
//! [`stream_of`].

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use ffmpeg_next::Rational;
use frameseek::{DemuxedPacket, FrameSeekError, MediaSource, StreamFacts, TimeMapper};
use image::{Rgb, RgbImage};

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;
pub const SECOND_VIDEO_STREAM: usize = 2;

const MARKER: u8 = 0x50;

#[derive(Debug, Clone)]
pub struct ScriptedPacket {
    stream: usize,
    frame: i64,
    pts: Option<i64>,
    dts: Option<i64>,
    keyframe: bool,
}

impl DemuxedPacket for ScriptedPacket {
    fn stream_index(&self) -> usize {
        self.stream
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn dts(&self) -> Option<i64> {
        self.dts
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    opens: AtomicUsize,
    seeks: AtomicUsize,
    reads: AtomicUsize,
    decodes: AtomicUsize,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.seeks.store(0, Ordering::SeqCst);
        self.reads.store(0, Ordering::SeqCst);
        self.decodes.store(0, Ordering::SeqCst);
    }
}

/// Holds the first packet read of a gated source until the test lets go.
#[derive(Debug)]
pub struct Gate {
    armed: AtomicBool,
    entered: Barrier,
    released: Barrier,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: AtomicBool::new(true),
            entered: Barrier::new(2),
            released: Barrier::new(2),
        })
    }

    /// Block until a reader is parked inside the gate.
    pub fn wait_until_entered(&self) {
        self.entered.wait();
    }

    /// Let the parked reader continue.
    pub fn release(&self) {
        self.released.wait();
    }

    fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.released.wait();
        }
    }
}

/// Shape of a synthetic video stream.
#[derive(Debug, Clone)]
pub struct Clip {
    pub frame_count: i64,
    pub keyframe_interval: i64,
    pub codec_delay: u32,
    pub frame_rate: Rational,
    pub time_base: Rational,
    pub start_timestamp: i64,
    pub reported_start: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub has_pts: bool,
    pub has_dts: bool,
    pub reports_start_time: bool,
    pub reports_frame_count: bool,
    pub interleaves_audio: bool,
    pub seeks_overshoot: bool,
    pub emits_pictures: bool,
    pub stalls_from: Option<i64>,
    pub hiccup_interval: Option<i64>,
    pub video_streams: usize,
    pub decodable: bool,
    pub gate: Option<Arc<Gate>>,
}

impl Clip {
    /// 25 fps in a 1/12800 time base, a key-frame every 10 frames.
    pub fn new(frame_count: i64) -> Self {
        Self {
            frame_count,
            keyframe_interval: 10,
            codec_delay: 0,
            frame_rate: Rational::new(25, 1),
            time_base: Rational::new(1, 12800),
            start_timestamp: 0,
            reported_start: None,
            width: 8,
            height: 4,
            has_pts: true,
            has_dts: true,
            reports_start_time: true,
            reports_frame_count: true,
            interleaves_audio: false,
            seeks_overshoot: false,
            emits_pictures: true,
            stalls_from: None,
            hiccup_interval: None,
            video_streams: 1,
            decodable: true,
            gate: None,
        }
    }

    pub fn keyframe_interval(mut self, interval: i64) -> Self {
        self.keyframe_interval = interval;
        self
    }

    pub fn codec_delay(mut self, delay: u32) -> Self {
        self.codec_delay = delay;
        self
    }

    pub fn timing(mut self, frame_rate: Rational, time_base: Rational) -> Self {
        self.frame_rate = frame_rate;
        self.time_base = time_base;
        self
    }

    pub fn start_timestamp(mut self, start: i64) -> Self {
        self.start_timestamp = start;
        self
    }

    /// The container claims the stream starts at `start` while packets keep
    /// their timestamps, as with an edit list trimming leading frames.
    pub fn reported_start(mut self, start: i64) -> Self {
        self.reported_start = Some(start);
        self
    }

    pub fn without_pts(mut self) -> Self {
        self.has_pts = false;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.has_pts = false;
        self.has_dts = false;
        self
    }

    pub fn without_start_time(mut self) -> Self {
        self.reports_start_time = false;
        self
    }

    pub fn without_frame_count(mut self) -> Self {
        self.reports_frame_count = false;
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.interleaves_audio = true;
        self
    }

    /// Seeks land on the first key-frame at or after the requested time.
    pub fn overshooting_seeks(mut self) -> Self {
        self.seeks_overshoot = true;
        self
    }

    /// The decoder accepts packets but never hands out a picture.
    pub fn silent(mut self) -> Self {
        self.emits_pictures = false;
        self
    }

    /// Packets of `frame` and later are swallowed without output.
    pub fn stalls_from(mut self, frame: i64) -> Self {
        self.stalls_from = Some(frame);
        self
    }

    /// Every `interval` frames the decoder holds a packet back without output
    /// and releases it later, growing its latency by one picture.
    pub fn hiccups_every(mut self, interval: i64) -> Self {
        self.hiccup_interval = Some(interval);
        self
    }

    /// A second video stream with the same timing, numbered
    /// [`SECOND_VIDEO_STREAM`].
    pub fn with_second_video(mut self) -> Self {
        self.video_streams = 2;
        self
    }

    /// The first packet read parks in `gate`.
    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.video_streams = 0;
        self
    }

    pub fn undecodable(mut self) -> Self {
        self.decodable = false;
        self
    }

    pub fn mapper(&self) -> TimeMapper {
        TimeMapper::new(self.frame_rate, self.time_base, self.start_timestamp)
    }

    fn packets(&self) -> Vec<ScriptedPacket> {
        let mapper = self.mapper();
        let mut packets = Vec::new();
        for frame in 0..self.frame_count {
            let timestamp = mapper.frame_to_pts(frame);
            if self.interleaves_audio {
                packets.push(ScriptedPacket {
                    stream: AUDIO_STREAM,
                    frame,
                    pts: Some(timestamp),
                    dts: Some(timestamp),
                    keyframe: true,
                });
            }
            for stream in self.video_indices() {
                packets.push(ScriptedPacket {
                    stream,
                    frame,
                    pts: self.has_pts.then_some(timestamp),
                    dts: self.has_dts.then_some(timestamp),
                    keyframe: frame % self.keyframe_interval == 0,
                });
            }
        }
        packets
    }

    fn video_indices(&self) -> Vec<usize> {
        [VIDEO_STREAM, SECOND_VIDEO_STREAM]
            .into_iter()
            .take(self.video_streams)
            .collect()
    }

    fn packets_per_frame(&self) -> usize {
        self.video_indices().len().max(1) + usize::from(self.interleaves_audio)
    }

    fn hiccups_at(&self, frame: i64) -> bool {
        self.hiccup_interval
            .is_some_and(|interval| frame % interval == interval / 2)
    }
}

/// Decoder model of one video stream.
#[derive(Debug, Default)]
struct Lane {
    synced: bool,
    queue: VecDeque<i64>,
    current: Option<i64>,
}

/// Plays a [`Clip`] back as a [`MediaSource`].
pub struct ScriptedSource {
    clip: Clip,
    packets: Vec<ScriptedPacket>,
    position: usize,
    lanes: [Lane; 3],
    counters: Arc<Counters>,
}

impl ScriptedSource {
    pub fn new(clip: Clip, counters: Arc<Counters>) -> Self {
        counters.opens.fetch_add(1, Ordering::SeqCst);
        let packets = clip.packets();
        Self {
            clip,
            packets,
            position: 0,
            lanes: Default::default(),
            counters,
        }
    }

    /// An opener closure suitable for `FileCache::with_opener`.
    pub fn opener(
        clip: Clip,
        counters: Arc<Counters>,
    ) -> impl Fn(&Path) -> Result<ScriptedSource, FrameSeekError> + Send + Sync + 'static {
        move |_path| Ok(ScriptedSource::new(clip.clone(), Arc::clone(&counters)))
    }

    fn landing_keyframe(&self, frame: i64) -> i64 {
        let interval = self.clip.keyframe_interval;
        let before = frame / interval * interval;
        if !self.clip.seeks_overshoot || before == frame {
            return before;
        }
        let after = before + interval;
        if after < self.clip.frame_count { after } else { before }
    }
}

impl MediaSource for ScriptedSource {
    type Packet = ScriptedPacket;

    fn stream_facts(&self) -> Vec<StreamFacts> {
        if self.clip.video_streams == 0 || !self.clip.decodable {
            return Vec::new();
        }
        let start_time = self
            .clip
            .reports_start_time
            .then(|| self.clip.reported_start.unwrap_or(self.clip.start_timestamp));
        self.clip
            .video_indices()
            .into_iter()
            .map(|index| StreamFacts {
                index,
                width: self.clip.width,
                height: self.clip.height,
                frame_rate: self.clip.frame_rate,
                time_base: self.clip.time_base,
                stream_aspect_ratio: Rational::new(0, 1),
                codec_aspect_ratio: Rational::new(1, 1),
                start_time,
                container_duration: None,
                reported_frame_count: if self.clip.reports_frame_count {
                    self.clip.frame_count
                } else {
                    0
                },
                stream_duration: None,
                codec_delay: self.clip.codec_delay,
                codec: "scripted".to_string(),
            })
            .collect()
    }

    fn video_stream_count(&self) -> usize {
        self.clip.video_streams
    }

    fn seek(&mut self, _stream: usize, timestamp: i64) -> Result<(), FrameSeekError> {
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        let frame = if timestamp == i64::MIN || self.clip.frame_count == 0 {
            0
        } else {
            self.clip
                .mapper()
                .pts_to_frame(timestamp)
                .clamp(0, self.clip.frame_count - 1)
        };
        let keyframe = self.landing_keyframe(frame);
        self.position = keyframe as usize * self.clip.packets_per_frame();
        // Like FFmpeg, a seek flushes every decoder.
        self.lanes = Default::default();
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<ScriptedPacket>, FrameSeekError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.clip.gate {
            gate.pass();
        }
        let packet = self.packets.get(self.position).cloned();
        if packet.is_some() {
            self.position += 1;
        }
        Ok(packet)
    }

    fn decode(
        &mut self,
        stream: usize,
        packet: Option<&ScriptedPacket>,
    ) -> Result<bool, FrameSeekError> {
        self.counters.decodes.fetch_add(1, Ordering::SeqCst);
        if !self.clip.video_indices().contains(&stream) {
            return Err(FrameSeekError::DecodeFailure(format!(
                "no decoder for stream {stream}"
            )));
        }
        let clip = &self.clip;
        let lane = &mut self.lanes[stream];

        match packet {
            Some(packet) => {
                if packet.stream != stream {
                    return Err(FrameSeekError::DecodeFailure(
                        "packet fed to the wrong decoder".to_string(),
                    ));
                }
                if packet.keyframe {
                    lane.synced = true;
                }
                if !lane.synced || !clip.emits_pictures {
                    return Ok(false);
                }
                if clip.stalls_from.is_some_and(|from| packet.frame >= from) {
                    return Ok(false);
                }
                lane.queue.push_back(packet.frame);
                if clip.hiccups_at(packet.frame) {
                    return Ok(false);
                }
                if lane.queue.len() > clip.codec_delay as usize {
                    lane.current = lane.queue.pop_front();
                    return Ok(true);
                }
                Ok(false)
            }
            None => {
                if !clip.emits_pictures {
                    return Ok(false);
                }
                match lane.queue.pop_front() {
                    Some(frame) => {
                        lane.current = Some(frame);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    fn picture(&mut self, stream: usize) -> Result<RgbImage, FrameSeekError> {
        let frame = self
            .lanes
            .get(stream)
            .and_then(|lane| lane.current)
            .ok_or_else(|| FrameSeekError::DecodeFailure("no picture available".to_string()))?;
        let pixel = Rgb([
            (frame & 0xff) as u8,
            ((frame >> 8) & 0xff) as u8,
            MARKER | stream as u8,
        ]);
        Ok(RgbImage::from_pixel(self.clip.width, self.clip.height, pixel))
    }
}

/// The frame number encoded in a picture produced by [`ScriptedSource`].
pub fn frame_of(picture: &RgbImage) -> i64 {
    let Rgb([low, high, marker]) = *picture.get_pixel(0, 0);
    assert_eq!(marker & 0xf0, MARKER, "picture was not produced by ScriptedSource");
    i64::from(low) | (i64::from(high) << 8)
}

/// The stream index encoded in a picture produced by [`ScriptedSource`].
pub fn stream_of(picture: &RgbImage) -> usize {
    let Rgb([_, _, marker]) = *picture.get_pixel(0, 0);
    assert_eq!(marker & 0xf0, MARKER, "picture was not produced by ScriptedSource");
    usize::from(marker & 0x0f)
}
