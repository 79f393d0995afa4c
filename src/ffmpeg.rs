//! FFmpeg process-wide setup.
//!
//! The library's global state is touched in exactly one place:
//! [`initialize`] runs once per process and registers FFmpeg's formats and
//! codecs, applies the configured log level, and installs the
//! [`LockManager`] through which library-wide critical sections (opening
//! codecs) are serialized. Later calls are no-ops.
//!
//! FFmpeg's console output is separate from the Rust-side `log` messages
//! emitted by this crate; [`set_ffmpeg_log_level`] only affects the former.

use std::sync::{Arc, OnceLock};

use ffmpeg_next::util::log::Level;

use crate::{
    configuration::EngineOptions,
    error::FrameSeekError,
    lock_manager::{LOCK_OK, LockManager, LockOperation, LockSlot, lock_callback},
};

/// FFmpeg internal log verbosity, most quiet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Unrecoverable conditions that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    fn from_ffmpeg_level(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }

    /// Parse a level name such as `"warning"` or `"quiet"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Some(FfmpegLogLevel::Quiet),
            "panic" => Some(FfmpegLogLevel::Panic),
            "fatal" => Some(FfmpegLogLevel::Fatal),
            "error" => Some(FfmpegLogLevel::Error),
            "warning" | "warn" => Some(FfmpegLogLevel::Warning),
            "info" => Some(FfmpegLogLevel::Info),
            "verbose" => Some(FfmpegLogLevel::Verbose),
            "debug" => Some(FfmpegLogLevel::Debug),
            "trace" => Some(FfmpegLogLevel::Trace),
            _ => None,
        }
    }
}

/// Set FFmpeg's console verbosity.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Current FFmpeg console verbosity, if it maps to a known level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level()
        .ok()
        .map(FfmpegLogLevel::from_ffmpeg_level)
}

/// Library-global state created by [`initialize`].
pub(crate) struct Library {
    pub(crate) options: EngineOptions,
    lock_manager: Arc<dyn LockManager>,
    codec_lock: LockSlot,
}

impl Library {
    /// Run `operation` while holding the library-wide codec lock.
    pub(crate) fn with_codec_lock<T>(&self, operation: impl FnOnce() -> T) -> T {
        let mut slot = self.codec_lock.clone();
        let obtained = lock_callback(self.lock_manager.as_ref(), &mut slot, LockOperation::Obtain);
        if obtained != LOCK_OK {
            log::warn!("Lock manager refused the codec lock (status {obtained})");
        }
        let result = operation();
        if obtained == LOCK_OK {
            let released =
                lock_callback(self.lock_manager.as_ref(), &mut slot, LockOperation::Release);
            if released != LOCK_OK {
                log::warn!("Lock manager failed to release the codec lock (status {released})");
            }
        }
        result
    }
}

static LIBRARY: OnceLock<Result<Library, FrameSeekError>> = OnceLock::new();

/// Initialize FFmpeg once for the whole process.
///
/// The first call's options win; later calls return the outcome of the
/// first one without touching the library again.
///
/// # Errors
///
/// Returns [`FrameSeekError::Initialization`] if FFmpeg cannot be
/// initialized or the lock manager fails to create the codec lock.
pub fn initialize(options: EngineOptions) -> Result<(), FrameSeekError> {
    library_with(options).map(|_| ())
}

/// The initialized library, initializing with defaults on first use.
pub(crate) fn library() -> Result<&'static Library, FrameSeekError> {
    match LIBRARY.get() {
        Some(result) => result.as_ref().map_err(Clone::clone),
        None => library_with(EngineOptions::new()),
    }
}

fn library_with(options: EngineOptions) -> Result<&'static Library, FrameSeekError> {
    LIBRARY
        .get_or_init(|| setup(options))
        .as_ref()
        .map_err(Clone::clone)
}

fn setup(options: EngineOptions) -> Result<Library, FrameSeekError> {
    ffmpeg_next::init()
        .map_err(|error| FrameSeekError::Initialization(format!("FFmpeg init failed: {error}")))?;
    set_ffmpeg_log_level(options.log_level);

    let lock_manager = Arc::clone(&options.lock_manager);
    let mut codec_lock: LockSlot = None;
    let status = lock_callback(lock_manager.as_ref(), &mut codec_lock, LockOperation::Create);
    if status != LOCK_OK || codec_lock.is_none() {
        return Err(FrameSeekError::Initialization(format!(
            "lock manager could not create the codec lock (status {status})"
        )));
    }

    log::info!(
        "FFmpeg initialized (log level {:?}, decoder threads {})",
        options.log_level,
        options.decoder_threads
    );

    Ok(Library {
        options,
        lock_manager,
        codec_lock,
    })
}
