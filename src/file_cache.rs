//! Process-wide registry of open sources.
//!
//! [`FileCache`] maps a path to its [`FileHandle`], creating and
//! discovering the handle on first use. The registry lock only guards the
//! map; discovery and decoding happen under each handle's own lock, so a
//! long decode on one file never blocks lookups of another.
//!
//! # Example
//!
//! ```no_run
//! use frameseek::{FileCache, FramePolicy};
//!
//! let cache = FileCache::global()?;
//! let info = cache.info("input.mp4")?;
//! println!("{}x{}, {} frames", info.width, info.height, info.frame_count);
//!
//! let picture = cache.decode_frame("input.mp4", 42, FramePolicy::ClampToNearest)?;
//! picture.save("frame_42.png")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use image::RgbImage;

use crate::{
    configuration::{EngineOptions, FramePolicy},
    error::FrameSeekError,
    ffmpeg_source::FfmpegSource,
    file_handle::{FileHandle, FrameInfo},
    source::MediaSource,
};

/// Opens the source behind a path.
pub type SourceOpener<S> = Arc<dyn Fn(&Path) -> Result<S, FrameSeekError> + Send + Sync>;

/// Registry mapping source paths to their handles.
pub struct FileCache<S = FfmpegSource> {
    handles: Mutex<HashMap<PathBuf, Arc<FileHandle<S>>>>,
    opener: SourceOpener<S>,
}

impl<S> Debug for FileCache<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let count = self.registry().len();
        f.debug_struct("FileCache")
            .field("handles", &count)
            .finish_non_exhaustive()
    }
}

static GLOBAL_CACHE: OnceLock<FileCache> = OnceLock::new();

impl FileCache<FfmpegSource> {
    /// A new FFmpeg-backed cache, initializing FFmpeg with default options
    /// if that has not happened yet.
    ///
    /// # Errors
    ///
    /// Returns [`FrameSeekError::Initialization`] if FFmpeg setup fails.
    pub fn new() -> Result<Self, FrameSeekError> {
        crate::ffmpeg::library()?;
        Ok(Self::ffmpeg())
    }

    /// A new FFmpeg-backed cache, initializing FFmpeg with `options`.
    ///
    /// Only the first initialization in the process applies its options.
    ///
    /// # Errors
    ///
    /// Returns [`FrameSeekError::Initialization`] if FFmpeg setup fails.
    pub fn with_options(options: EngineOptions) -> Result<Self, FrameSeekError> {
        crate::ffmpeg::initialize(options)?;
        Ok(Self::ffmpeg())
    }

    /// The process-wide cache, created on first use.
    ///
    /// The instance lives until process exit and has no teardown ordering
    /// with other globals; [`clear`](Self::clear) releases its sources.
    ///
    /// # Errors
    ///
    /// Returns [`FrameSeekError::Initialization`] if FFmpeg setup fails.
    pub fn global() -> Result<&'static Self, FrameSeekError> {
        crate::ffmpeg::library()?;
        Ok(GLOBAL_CACHE.get_or_init(Self::ffmpeg))
    }

    fn ffmpeg() -> Self {
        Self::with_opener(|path| FfmpegSource::open(path))
    }
}

impl<S: MediaSource> FileCache<S> {
    /// A cache whose sources are opened by `opener`.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&Path) -> Result<S, FrameSeekError> + Send + Sync + 'static,
    {
        Self {
            handles: Mutex::new(HashMap::new()),
            opener: Arc::new(opener),
        }
    }

    /// The handle for `path`, created and discovered on first request.
    ///
    /// Concurrent first requests for the same path share one handle and one
    /// discovery; the later callers wait on the handle until it finishes.
    /// A source whose discovery failed is cached too.
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Arc<FileHandle<S>> {
        let path = path.as_ref();
        let handle = {
            let mut handles = self.registry();
            Arc::clone(
                handles
                    .entry(path.to_path_buf())
                    .or_insert_with(|| Arc::new(FileHandle::pending(path))),
            )
        };

        let opener = Arc::clone(&self.opener);
        if handle.discover_with(|path| opener(path)) {
            log::debug!("Cached new source {}", path.display());
        }
        handle
    }

    /// Geometry and frame count of the first video stream of `path`.
    ///
    /// # Errors
    ///
    /// See [`FileHandle::info`].
    pub fn info<P: AsRef<Path>>(&self, path: P) -> Result<FrameInfo, FrameSeekError> {
        self.get(path).info()
    }

    /// Decode `frame` of the first video stream of `path`.
    ///
    /// # Errors
    ///
    /// See [`FileHandle::decode_frame`].
    pub fn decode_frame<P: AsRef<Path>>(
        &self,
        path: P,
        frame: i64,
        policy: FramePolicy,
    ) -> Result<RgbImage, FrameSeekError> {
        self.get(path).decode_frame(frame, policy)
    }

    /// Whether a handle for `path` exists.
    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.registry().contains_key(path.as_ref())
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    /// Whether the cache holds no handles.
    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    /// Paths of all cached handles, in no particular order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.registry().keys().cloned().collect()
    }

    /// Drop every cached handle.
    ///
    /// Handles still held by callers stay usable; the next lookup of their
    /// path creates a fresh one.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.registry());
        log::debug!("Released {} cached sources", removed.len());
    }
}

impl<S> FileCache<S> {
    fn registry(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<FileHandle<S>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "rayon")]
impl<S: MediaSource + Send> FileCache<S> {
    /// Decode a batch of `(path, frame)` requests.
    ///
    /// Requests for different paths run in parallel on the rayon pool;
    /// requests for the same path run in order on one worker so sequential
    /// frames stay cheap. Results come back in request order.
    pub fn decode_frames_parallel(
        &self,
        requests: &[(PathBuf, i64)],
        policy: FramePolicy,
    ) -> Vec<Result<RgbImage, FrameSeekError>> {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        let mut groups: HashMap<&Path, Vec<(usize, i64)>> = HashMap::new();
        for (position, (path, frame)) in requests.iter().enumerate() {
            groups
                .entry(path.as_path())
                .or_default()
                .push((position, *frame));
        }

        let mut results: Vec<(usize, Result<RgbImage, FrameSeekError>)> = groups
            .into_par_iter()
            .flat_map_iter(|(path, frames)| {
                let handle = self.get(path);
                frames
                    .into_iter()
                    .map(move |(position, frame)| (position, handle.decode_frame(frame, policy)))
            })
            .collect();

        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
