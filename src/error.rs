//! Error types for the `frameseek` crate.
//!
//! [`FrameSeekError`] is returned by every fallible operation. Messages are
//! written so a caller can tell corruption, unsupported input and transient
//! I/O problems apart without inspecting the variant.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::Error as IoError,
    path::PathBuf,
};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// Why a source was rejected during stream discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedReason {
    /// The container holds no video stream at all.
    NoVideoStream,
    /// Video streams exist but none of them has a usable decoder.
    NoSupportedCodec,
}

impl Display for UnsupportedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UnsupportedReason::NoVideoStream => write!(f, "no video stream found"),
            UnsupportedReason::NoSupportedCodec => {
                write!(f, "video stream present but no supported codec")
            }
        }
    }
}

/// The flavour of a decode stall that could not be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallKind {
    /// Nothing was decoded after any of the seek points tried.
    NoDecodeStartPoint,
    /// Output stopped in the middle of the stream.
    Corruption,
}

impl Display for StallKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StallKind::NoDecodeStartPoint => write!(f, "could not find a valid decode start point"),
            StallKind::Corruption => write!(f, "decode stall, possible corruption"),
        }
    }
}

/// The unified error type for all `frameseek` operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum FrameSeekError {
    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path handed to the cache.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// Discovery found no decodable video stream.
    #[error("Unsupported source {path}: {reason}")]
    UnsupportedSource {
        /// Path of the rejected source.
        path: PathBuf,
        /// Whether video was missing or merely undecodable.
        reason: UnsupportedReason,
    },

    /// Seeking inside the container failed.
    #[error("Seek failed: {0}")]
    SeekFailure(String),

    /// Reading the next packet failed (I/O or demux error).
    #[error("Read failed: {0}")]
    ReadFailure(String),

    /// The decoder rejected input or failed to produce a picture.
    #[error("Failed to decode video frame: {0}")]
    DecodeFailure(String),

    /// The backward search for a usable sync point ran past frame 0.
    #[error("Lost timing reference while seeking to frame {frame}")]
    LostTimingReference {
        /// Frame that was requested.
        frame: i64,
    },

    /// The decoder stopped producing output and no retries were left.
    #[error("Frame {frame}: {kind}")]
    DecodeStall {
        /// Frame that was requested.
        frame: i64,
        /// Where in the decode the stall happened.
        kind: StallKind,
    },

    /// The requested frame is outside `[0, frame_count)`.
    #[error("Frame {frame} is out of range (stream has {frame_count} frames)")]
    FrameOutOfRange {
        /// The frame that was requested.
        frame: i64,
        /// Total number of frames in the stream.
        frame_count: i64,
    },

    /// The requested stream ordinal does not exist.
    #[error("Stream {stream} is out of range (source has {stream_count} decodable streams)")]
    StreamOutOfRange {
        /// Requested stream ordinal.
        stream: usize,
        /// Number of decodable video streams.
        stream_count: usize,
    },

    /// Process-wide library setup failed.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    ImageError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl FrameSeekError {
    /// Returns `true` for failures that only affect the current call.
    ///
    /// Discovery failures are terminal for a source; everything raised by
    /// the decode loop leaves the handle usable for later frames.
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            FrameSeekError::SeekFailure(_)
                | FrameSeekError::ReadFailure(_)
                | FrameSeekError::DecodeFailure(_)
                | FrameSeekError::LostTimingReference { .. }
                | FrameSeekError::DecodeStall { .. }
                | FrameSeekError::FrameOutOfRange { .. }
                | FrameSeekError::StreamOutOfRange { .. }
        )
    }
}

impl From<FfmpegError> for FrameSeekError {
    fn from(error: FfmpegError) -> Self {
        FrameSeekError::FfmpegError(error.to_string())
    }
}

impl From<ImageError> for FrameSeekError {
    fn from(error: ImageError) -> Self {
        FrameSeekError::ImageError(error.to_string())
    }
}

impl From<IoError> for FrameSeekError {
    fn from(error: IoError) -> Self {
        FrameSeekError::IoError(error.to_string())
    }
}

