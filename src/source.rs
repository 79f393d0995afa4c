//! The demux/decode seam.
//!
//! The seek-and-recover engine never talks to FFmpeg directly. It drives a
//! [`MediaSource`], which reads packets, seeks, feeds decoders and converts
//! pictures. [`FfmpegSource`](crate::ffmpeg_source::FfmpegSource) is the
//! production implementation; anything else implementing the trait (for
//! example a scripted source in tests) can be decoded the same way.

use image::RgbImage;

use crate::{discovery::StreamFacts, error::FrameSeekError};

/// Which of the two packet timestamps the engine trusts for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampKind {
    /// Presentation timestamp.
    #[default]
    Primary,
    /// Decode timestamp, used when a stream never carries a PTS.
    Fallback,
}

/// The timestamp-bearing view of one demuxed packet.
pub trait DemuxedPacket {
    /// Container stream index the packet belongs to.
    fn stream_index(&self) -> usize;
    /// Presentation timestamp, if the container set one.
    fn pts(&self) -> Option<i64>;
    /// Decode timestamp, if the container set one.
    fn dts(&self) -> Option<i64>;
}

/// Select the timestamp of `kind` from a packet.
pub fn timestamp_of<P: DemuxedPacket + ?Sized>(packet: &P, kind: TimestampKind) -> Option<i64> {
    match kind {
        TimestampKind::Primary => packet.pts(),
        TimestampKind::Fallback => packet.dts(),
    }
}

/// An opened container plus one decoder per decodable video stream.
///
/// Stream arguments are container stream indices, as reported by
/// [`DemuxedPacket::stream_index`] and [`StreamFacts::index`].
pub trait MediaSource {
    /// Packet type produced by [`read_packet`](MediaSource::read_packet).
    type Packet: DemuxedPacket;

    /// Raw container facts for every decodable video stream.
    fn stream_facts(&self) -> Vec<StreamFacts>;

    /// Number of video streams in the container, decodable or not.
    fn video_stream_count(&self) -> usize;

    /// Seek `stream` to the key-frame at or before `timestamp` (in the
    /// stream's time base) and flush that stream's decoder. `i64::MIN`
    /// rewinds to the start of the container.
    fn seek(&mut self, stream: usize, timestamp: i64) -> Result<(), FrameSeekError>;

    /// Read the next packet of any stream. `Ok(None)` signals end of file.
    fn read_packet(&mut self) -> Result<Option<Self::Packet>, FrameSeekError>;

    /// Feed one packet (or, with `None`, a drain request) to the decoder of
    /// `stream`. Returns `true` when a picture became available.
    fn decode(
        &mut self,
        stream: usize,
        packet: Option<&Self::Packet>,
    ) -> Result<bool, FrameSeekError>;

    /// Convert the most recently produced picture of `stream` to the
    /// interchange layout (8-bit RGB at the stream's coded size).
    fn picture(&mut self, stream: usize) -> Result<RgbImage, FrameSeekError>;
}
