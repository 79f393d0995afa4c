//! # frameseek
//!
//! Frame-accurate random access into compressed video.
//!
//! Video decoders are streaming pipelines: packets go in, pictures come out
//! some frames later, and seeks land on whatever key-frame the container
//! offers. `frameseek` puts a frame-indexed API on top of that, powered by
//! FFmpeg via the [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)
//! crate. Ask for frame *N* and get frame *N*, whether the request follows
//! the previous one or jumps across the file.
//!
//! ## Quick Start
//!
//! ```no_run
//! use frameseek::{FileCache, FramePolicy};
//!
//! let cache = FileCache::global()?;
//!
//! let info = cache.info("input.mp4")?;
//! println!("{}x{} ({} frames)", info.width, info.height, info.frame_count);
//!
//! let frame = cache.decode_frame("input.mp4", 100, FramePolicy::Error)?;
//! frame.save("frame_100.png")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## What it handles
//!
//! - **Inconsistent metadata**: start time and frame count are resolved
//!   through layered fallbacks, down to scanning packets
//! - **Exact frame mapping**: integer rational arithmetic between frame
//!   ordinals and container timestamps
//! - **Cheap sequential access**: consecutive requests never reseek, and a
//!   repeated request is served from the last picture
//! - **Stall recovery**: mislabelled key-frames and corrupt data are worked
//!   around by seeking further back or retrying once
//! - **Concurrency**: one lock per source, so different files decode in
//!   parallel while each file sees one operation at a time
//!
//! Pictures are always delivered as 8-bit packed RGB
//! ([`image::RgbImage`]) at the stream's coded size.
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `rayon` | `FileCache::decode_frames_parallel()` spreads a batch over rayon threads |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod configuration;
pub mod decoder;
pub mod discovery;
pub mod error;
pub mod ffmpeg;
pub mod ffmpeg_source;
pub mod file_cache;
pub mod file_handle;
pub mod lock_manager;
pub mod source;
pub mod time_mapper;

pub use configuration::{EngineOptions, FramePolicy};
pub use decoder::{DecodeCursor, DecodeState, STALL_RETRY_BUDGET, decode_frame};
pub use discovery::{StreamFacts, StreamInfo};
pub use error::{FrameSeekError, StallKind, UnsupportedReason};
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, initialize, set_ffmpeg_log_level};
pub use ffmpeg_source::FfmpegSource;
pub use file_cache::{FileCache, SourceOpener};
pub use file_handle::{FileHandle, FrameInfo};
pub use lock_manager::{HostLockManager, HostMutex, LockManager, LockOperation, LockSlot};
pub use source::{DemuxedPacket, MediaSource, TimestampKind, timestamp_of};
pub use time_mapper::TimeMapper;
