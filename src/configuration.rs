//! Engine configuration.
//!
//! [`EngineOptions`] is a builder for the process-wide settings applied at
//! initialization: the library's log level, the number of decoder threads
//! per stream, and the [`LockManager`] the library routes its locks through.
//! [`FramePolicy`] is the per-request rule for out-of-range frame ordinals.
//!
//! # Example
//!
//! ```no_run
//! use frameseek::{EngineOptions, FfmpegLogLevel, FileCache};
//!
//! let options = EngineOptions::new()
//!     .with_log_level(FfmpegLogLevel::Quiet)
//!     .with_decoder_threads(4);
//! let cache = FileCache::with_options(options)?;
//! # Ok::<(), frameseek::FrameSeekError>(())
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
};

use crate::{
    ffmpeg::FfmpegLogLevel,
    lock_manager::{HostLockManager, LockManager},
};

/// What to do with a frame ordinal outside `[0, frame_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePolicy {
    /// Fail with [`FrameSeekError::FrameOutOfRange`](crate::FrameSeekError::FrameOutOfRange).
    #[default]
    Error,
    /// Use the nearest valid frame instead.
    ClampToNearest,
}

impl FramePolicy {
    /// Map `frame` into `[0, frame_count)` according to the policy.
    ///
    /// Returns `None` when the frame must be rejected, including any frame
    /// of a stream that has no frames at all.
    pub fn resolve(self, frame: i64, frame_count: i64) -> Option<i64> {
        if frame_count <= 0 {
            return None;
        }
        if (0..frame_count).contains(&frame) {
            return Some(frame);
        }
        match self {
            FramePolicy::Error => None,
            FramePolicy::ClampToNearest => Some(frame.clamp(0, frame_count - 1)),
        }
    }
}

/// Process-wide engine settings.
#[derive(Clone)]
pub struct EngineOptions {
    /// FFmpeg's own console verbosity.
    pub(crate) log_level: FfmpegLogLevel,
    /// Decoder threads per stream; `0` lets FFmpeg decide.
    pub(crate) decoder_threads: usize,
    /// Lock provider registered with the library.
    pub(crate) lock_manager: Arc<dyn LockManager>,
}

impl Debug for EngineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EngineOptions")
            .field("log_level", &self.log_level)
            .field("decoder_threads", &self.decoder_threads)
            .finish_non_exhaustive()
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineOptions {
    /// Defaults: log level `Error`, library-chosen thread count, host
    /// mutexes for library locks.
    pub fn new() -> Self {
        Self {
            log_level: FfmpegLogLevel::Error,
            decoder_threads: 0,
            lock_manager: Arc::new(HostLockManager),
        }
    }

    /// Set FFmpeg's console verbosity.
    #[must_use]
    pub fn with_log_level(mut self, level: FfmpegLogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the number of decoder threads per stream (`0` = automatic).
    #[must_use]
    pub fn with_decoder_threads(mut self, threads: usize) -> Self {
        self.decoder_threads = threads;
        self
    }

    /// Replace the lock provider registered at initialization.
    #[must_use]
    pub fn with_lock_manager(mut self, manager: Arc<dyn LockManager>) -> Self {
        self.lock_manager = manager;
        self
    }

    /// The configured FFmpeg log level.
    pub fn log_level(&self) -> FfmpegLogLevel {
        self.log_level
    }

    /// The configured decoder thread count.
    pub fn decoder_threads(&self) -> usize {
        self.decoder_threads
    }
}
