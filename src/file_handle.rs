//! Per-source handles.
//!
//! A [`FileHandle`] owns one opened source, the streams discovered in it and
//! one [`DecodeCursor`] per stream. A single mutex serializes every
//! operation on the source. Discovery runs exactly once; if it fails, the
//! error is kept and returned by every later call instead of retrying.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use ffmpeg_next::Rational;
use image::RgbImage;

use crate::{
    configuration::FramePolicy,
    decoder::{DecodeCursor, DecodeState, decode_frame},
    discovery::{StreamInfo, discover},
    error::FrameSeekError,
    ffmpeg_source::FfmpegSource,
    source::MediaSource,
};

/// Geometry and timing of one decodable video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Container stream index.
    pub stream_index: usize,
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// Pixel aspect ratio.
    pub aspect_ratio: f64,
    /// Total number of frames.
    pub frame_count: i64,
    /// Frame rate.
    pub frame_rate: Rational,
    /// Timestamp of frame 0 in the stream time base.
    pub start_timestamp: i64,
    /// Decoder name.
    pub codec: String,
}

impl From<&StreamInfo> for FrameInfo {
    fn from(stream: &StreamInfo) -> Self {
        Self {
            stream_index: stream.index,
            width: stream.width,
            height: stream.height,
            aspect_ratio: stream.aspect_ratio,
            frame_count: stream.frame_count,
            frame_rate: stream.frame_rate,
            start_timestamp: stream.start_timestamp,
            codec: stream.codec.clone(),
        }
    }
}

struct OpenSource<S> {
    source: S,
    streams: Vec<StreamInfo>,
    cursors: Vec<DecodeCursor>,
    /// Stream whose decode last moved the shared demuxer position.
    active_stream: Option<usize>,
}

enum HandleState<S> {
    Pending,
    Ready(OpenSource<S>),
    Invalid(FrameSeekError),
}

/// One opened source and its decode state, behind a mutex.
pub struct FileHandle<S = FfmpegSource> {
    path: PathBuf,
    state: Mutex<HandleState<S>>,
}

impl<S> Debug for FileHandle<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileHandle<FfmpegSource> {
    /// Open and discover `path` with FFmpeg, outside of any cache.
    ///
    /// Failures are stored on the returned handle.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::open_with(path, |path| FfmpegSource::open(path))
    }
}

impl<S: MediaSource> FileHandle<S> {
    /// Open `path` with `opener` and run discovery.
    pub fn open_with<P, F>(path: P, opener: F) -> Self
    where
        P: AsRef<Path>,
        F: FnOnce(&Path) -> Result<S, FrameSeekError>,
    {
        let handle = Self::pending(path.as_ref());
        handle.discover_with(opener);
        handle
    }

    pub(crate) fn pending(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: Mutex::new(HandleState::Pending),
        }
    }

    /// Run discovery unless it already ran. Returns `true` if this call ran it.
    pub(crate) fn discover_with<F>(&self, opener: F) -> bool
    where
        F: FnOnce(&Path) -> Result<S, FrameSeekError>,
    {
        let mut state = self.lock();
        if !matches!(*state, HandleState::Pending) {
            return false;
        }

        let opened = opener(&self.path).and_then(|mut source| {
            let streams = discover(&mut source, &self.path)?;
            let cursors = streams.iter().map(|_| DecodeCursor::new()).collect();
            Ok(OpenSource {
                source,
                streams,
                cursors,
                active_stream: None,
            })
        });

        *state = match opened {
            Ok(open) => HandleState::Ready(open),
            Err(error) => {
                log::warn!("Source {} is unusable: {error}", self.path.display());
                HandleState::Invalid(error)
            }
        };
        true
    }

    /// Path of the source.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether discovery failed for this source.
    pub fn is_invalid(&self) -> bool {
        matches!(*self.lock(), HandleState::Invalid(_))
    }

    /// The stored discovery error message, if discovery failed.
    pub fn error_message(&self) -> Option<String> {
        match &*self.lock() {
            HandleState::Invalid(error) => Some(error.to_string()),
            _ => None,
        }
    }

    /// Number of decodable video streams (`0` for an invalid source).
    pub fn stream_count(&self) -> usize {
        match &*self.lock() {
            HandleState::Ready(open) => open.streams.len(),
            _ => 0,
        }
    }

    /// Geometry and frame count of the first decodable stream.
    ///
    /// # Errors
    ///
    /// Returns the stored discovery error for an invalid source.
    pub fn info(&self) -> Result<FrameInfo, FrameSeekError> {
        self.info_for_stream(0)
    }

    /// Geometry and frame count of decodable stream number `stream`.
    ///
    /// # Errors
    ///
    /// Returns the stored discovery error for an invalid source, or
    /// [`FrameSeekError::StreamOutOfRange`].
    pub fn info_for_stream(&self, stream: usize) -> Result<FrameInfo, FrameSeekError> {
        self.with_source(|open| {
            open.streams
                .get(stream)
                .map(FrameInfo::from)
                .ok_or(FrameSeekError::StreamOutOfRange {
                    stream,
                    stream_count: open.streams.len(),
                })
        })
    }

    /// Decode `frame` of the first decodable stream as packed RGB.
    ///
    /// `policy` decides whether an out-of-range ordinal is clamped or
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns the stored discovery error for an invalid source,
    /// [`FrameSeekError::FrameOutOfRange`] when `policy` rejects the
    /// ordinal, or the failure of this decode attempt.
    pub fn decode_frame(&self, frame: i64, policy: FramePolicy) -> Result<RgbImage, FrameSeekError> {
        self.decode_frame_in_stream(0, frame, policy)
    }

    /// Decode `frame` of decodable stream number `stream`.
    ///
    /// # Errors
    ///
    /// See [`decode_frame`](Self::decode_frame); additionally
    /// [`FrameSeekError::StreamOutOfRange`].
    pub fn decode_frame_in_stream(
        &self,
        stream: usize,
        frame: i64,
        policy: FramePolicy,
    ) -> Result<RgbImage, FrameSeekError> {
        self.with_source(|open| {
            let OpenSource {
                source,
                streams,
                cursors,
                active_stream,
            } = open;
            let stream_count = streams.len();
            let (Some(info), Some(cursor)) = (streams.get(stream), cursors.get_mut(stream)) else {
                return Err(FrameSeekError::StreamOutOfRange {
                    stream,
                    stream_count,
                });
            };

            let target = policy.resolve(frame, info.frame_count).ok_or(
                FrameSeekError::FrameOutOfRange {
                    frame,
                    frame_count: info.frame_count,
                },
            )?;
            if target != frame {
                log::debug!("Frame {frame} clamped to {target} in {}", self.path.display());
            }

            if active_stream.is_some_and(|active| active != stream) {
                log::trace!("Stream {stream} resumes after stream switch, forcing a seek");
                cursor.invalidate();
            }
            *active_stream = Some(stream);

            decode_frame(source, info, cursor, target)
        })
    }

    /// Decode state of stream number `stream`, if it exists.
    pub fn decode_state(&self, stream: usize) -> Option<DecodeState> {
        match &*self.lock() {
            HandleState::Ready(open) => open.cursors.get(stream).map(DecodeCursor::state),
            _ => None,
        }
    }

    fn with_source<T>(
        &self,
        operation: impl FnOnce(&mut OpenSource<S>) -> Result<T, FrameSeekError>,
    ) -> Result<T, FrameSeekError> {
        match &mut *self.lock() {
            HandleState::Ready(open) => operation(open),
            HandleState::Invalid(error) => Err(error.clone()),
            HandleState::Pending => Err(FrameSeekError::FileOpen {
                path: self.path.clone(),
                reason: "source was never opened".to_string(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState<S>> {
        // Cursors are reset on every failed decode.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
