//! [`MediaSource`] backed by FFmpeg.
//!
//! [`FfmpegSource`] owns one demuxer context and an opened decoder per
//! decodable video stream. Pictures are converted to packed RGB24 at the
//! stream's coded size only when the engine asks for them.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational,
    codec::{Capabilities, context::Context as CodecContext, threading},
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input, stream::Disposition},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;

use crate::{
    discovery::StreamFacts,
    error::FrameSeekError,
    source::{DemuxedPacket, MediaSource},
};

impl DemuxedPacket for Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }

    fn pts(&self) -> Option<i64> {
        Packet::pts(self)
    }

    fn dts(&self) -> Option<i64> {
        Packet::dts(self)
    }
}

/// Decoder state of one video stream.
struct StreamDecoder {
    decoder: VideoDecoder,
    width: u32,
    height: u32,
    scaler: Option<ScalingContext>,
    /// Pictures received while making room for a packet.
    pending: VecDeque<VideoFrame>,
    picture: VideoFrame,
    eof_sent: bool,
}

impl StreamDecoder {
    fn flush(&mut self) {
        self.decoder.flush();
        self.pending.clear();
        self.eof_sent = false;
    }

    fn receive(&mut self) -> Result<bool, FrameSeekError> {
        if let Some(frame) = self.pending.pop_front() {
            self.picture = frame;
            return Ok(true);
        }
        match self.decoder.receive_frame(&mut self.picture) {
            Ok(()) => Ok(true),
            Err(FfmpegError::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => Ok(false),
            Err(FfmpegError::Eof) => Ok(false),
            Err(error) => Err(FrameSeekError::DecodeFailure(error.to_string())),
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<(), FrameSeekError> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(FfmpegError::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                // Output queue full: park the ready pictures and resend.
                let mut frame = VideoFrame::empty();
                while self.decoder.receive_frame(&mut frame).is_ok() {
                    self.pending.push_back(frame);
                    frame = VideoFrame::empty();
                }
                self.decoder
                    .send_packet(packet)
                    .map_err(|error| FrameSeekError::DecodeFailure(error.to_string()))
            }
            Err(FfmpegError::InvalidData) => {
                // Corrupt input surfaces as a stall, not a hard error.
                log::warn!("Decoder rejected a corrupt packet");
                Ok(())
            }
            Err(error) => Err(FrameSeekError::DecodeFailure(error.to_string())),
        }
    }

    fn convert(&mut self) -> Result<RgbImage, FrameSeekError> {
        let format = self.picture.format();
        let (source_width, source_height) = (self.picture.width(), self.picture.height());
        let stale = self.scaler.as_ref().is_none_or(|scaler| {
            let input = scaler.input();
            input.format != format || input.width != source_width || input.height != source_height
        });
        if stale {
            self.scaler = Some(ScalingContext::get(
                format,
                source_width,
                source_height,
                Pixel::RGB24,
                self.width,
                self.height,
                ScalingFlags::BILINEAR,
            )?);
        }

        let mut rgb_frame = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(&self.picture, &mut rgb_frame)?;
        }

        let buffer = packed_rgb(&rgb_frame, self.width, self.height);
        RgbImage::from_raw(self.width, self.height, buffer).ok_or_else(|| {
            FrameSeekError::DecodeFailure(
                "Failed to construct RGB image from decoded frame data".to_string(),
            )
        })
    }
}

/// An opened media file with decoders for all of its usable video streams.
pub struct FfmpegSource {
    input: Input,
    decoders: HashMap<usize, StreamDecoder>,
    facts: Vec<StreamFacts>,
    video_stream_count: usize,
    path: PathBuf,
}

// SAFETY: every FFmpeg context inside is owned exclusively by this value and
// only used through `&mut self`; callers serialize access per source.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    /// Open `path` and set up a decoder for every usable video stream.
    ///
    /// Streams that are not video, are attached cover art, have no matching
    /// decoder, or whose decoder fails to open are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FrameSeekError::FileOpen`] if the container cannot be
    /// opened, or [`FrameSeekError::Initialization`] if FFmpeg could not be
    /// initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FrameSeekError> {
        let path = path.as_ref().to_path_buf();
        let library = crate::ffmpeg::library()?;
        let decoder_threads = library.options.decoder_threads;

        log::debug!("Opening media file: {}", path.display());
        let input = ffmpeg_next::format::input(&path).map_err(|error| FrameSeekError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;

        let container_duration = Some(input.duration()).filter(|duration| *duration > 0);
        let mut decoders = HashMap::new();
        let mut facts = Vec::new();
        let mut video_stream_count = 0;

        for stream in input.streams() {
            if stream.parameters().medium() != Type::Video {
                continue;
            }
            video_stream_count += 1;
            let index = stream.index();

            if stream.disposition().contains(Disposition::ATTACHED_PIC) {
                log::debug!("Stream {index}: attached picture, skipped");
                continue;
            }

            let Some(codec) = ffmpeg_next::decoder::find(stream.parameters().id()) else {
                log::warn!("Stream {index}: no decoder for codec {:?}", stream.parameters().id());
                continue;
            };

            let mut context = match CodecContext::from_parameters(stream.parameters()) {
                Ok(context) => context,
                Err(error) => {
                    log::warn!("Stream {index}: cannot read codec parameters: {error}");
                    continue;
                }
            };
            if decoder_threads > 0 {
                context.set_threading(threading::Config {
                    kind: threading::Type::Slice,
                    count: decoder_threads,
                    ..Default::default()
                });
            }

            let opened = library.with_codec_lock(|| {
                context
                    .decoder()
                    .open_as(codec)
                    .and_then(|opened| opened.video())
            });
            let decoder = match opened {
                Ok(decoder) => decoder,
                Err(error) => {
                    log::warn!("Stream {index}: cannot open {} decoder: {error}", codec.name());
                    continue;
                }
            };

            let codec_delay = unsafe {
                let raw = decoder.as_ptr();
                let buffered = if codec.capabilities().contains(Capabilities::DELAY) {
                    (*raw).delay.max(0)
                } else {
                    0
                };
                (buffered + (*raw).has_b_frames.max(0)) as u32
            };
            let stream_aspect_ratio =
                Rational::from(unsafe { (*stream.as_ptr()).sample_aspect_ratio });
            let frame_rate = {
                let average = stream.avg_frame_rate();
                if average.numerator() != 0 && average.denominator() != 0 {
                    average
                } else {
                    stream.rate()
                }
            };
            let no_timestamp = ffmpeg_sys_next::AV_NOPTS_VALUE;

            facts.push(StreamFacts {
                index,
                width: decoder.width(),
                height: decoder.height(),
                frame_rate,
                time_base: stream.time_base(),
                stream_aspect_ratio,
                codec_aspect_ratio: decoder.aspect_ratio(),
                start_time: Some(stream.start_time()).filter(|start| *start != no_timestamp),
                container_duration,
                reported_frame_count: stream.frames().max(0),
                stream_duration: Some(stream.duration())
                    .filter(|duration| *duration != no_timestamp && *duration > 0),
                codec_delay,
                codec: codec.name().to_string(),
            });

            decoders.insert(
                index,
                StreamDecoder {
                    width: decoder.width(),
                    height: decoder.height(),
                    decoder,
                    scaler: None,
                    pending: VecDeque::new(),
                    picture: VideoFrame::empty(),
                    eof_sent: false,
                },
            );
        }

        log::info!(
            "Opened media file: {} (format={}, video_streams={}, decodable={})",
            path.display(),
            input.format().name(),
            video_stream_count,
            facts.len(),
        );

        Ok(Self {
            input,
            decoders,
            facts,
            video_stream_count,
            path,
        })
    }

    /// Path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decoder_mut(&mut self, stream: usize) -> Result<&mut StreamDecoder, FrameSeekError> {
        self.decoders.get_mut(&stream).ok_or_else(|| {
            FrameSeekError::DecodeFailure(format!("no decoder open for stream {stream}"))
        })
    }

    fn flush_decoders(&mut self) {
        for decoder in self.decoders.values_mut() {
            decoder.flush();
        }
    }
}

impl MediaSource for FfmpegSource {
    type Packet = Packet;

    fn stream_facts(&self) -> Vec<StreamFacts> {
        self.facts.clone()
    }

    fn video_stream_count(&self) -> usize {
        self.video_stream_count
    }

    fn seek(&mut self, stream: usize, timestamp: i64) -> Result<(), FrameSeekError> {
        if timestamp == i64::MIN {
            self.input
                .seek(0, ..)
                .map_err(|error| FrameSeekError::SeekFailure(error.to_string()))?;
            self.flush_decoders();
            return Ok(());
        }

        let context = unsafe { self.input.as_mut_ptr() };
        let stream_index = stream as i32;
        let mut status = unsafe {
            ffmpeg_sys_next::avformat_seek_file(context, stream_index, i64::MIN, timestamp, timestamp, 0)
        };
        if status < 0 {
            // No key-frame at or before the target: take the nearest one and
            // let the caller detect the overshoot.
            status = unsafe {
                ffmpeg_sys_next::avformat_seek_file(
                    context,
                    stream_index,
                    i64::MIN,
                    timestamp,
                    i64::MAX,
                    0,
                )
            };
        }
        if status < 0 {
            return Err(FrameSeekError::SeekFailure(format!(
                "stream {stream} to timestamp {timestamp}: {}",
                FfmpegError::from(status)
            )));
        }

        self.flush_decoders();
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, FrameSeekError> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Some(packet)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(error) => Err(FrameSeekError::ReadFailure(error.to_string())),
        }
    }

    fn decode(&mut self, stream: usize, packet: Option<&Packet>) -> Result<bool, FrameSeekError> {
        let decoder = self.decoder_mut(stream)?;
        match packet {
            Some(packet) => decoder.send(packet)?,
            None if !decoder.eof_sent => {
                decoder.eof_sent = true;
                match decoder.decoder.send_eof() {
                    Ok(()) | Err(FfmpegError::Eof) => {}
                    Err(error) => return Err(FrameSeekError::DecodeFailure(error.to_string())),
                }
            }
            None => {}
        }
        decoder.receive()
    }

    fn picture(&mut self, stream: usize) -> Result<RgbImage, FrameSeekError> {
        self.decoder_mut(stream)?.convert()
    }
}

/// Copy an RGB24 frame into a tightly packed buffer, dropping row padding.
fn packed_rgb(rgb_frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let row_bytes = width as usize * 3;
    let data = rgb_frame.data(0);

    if stride == row_bytes {
        data[..row_bytes * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            buffer.extend_from_slice(&data[start..start + row_bytes]);
        }
        buffer
    }
}
