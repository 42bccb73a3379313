//! The seam between the frame-indexed reader and a native container library.
//!
//! A backend owns the demuxer, one decoder per usable video stream, the
//! single in-flight packet and the native pixel converters. The reader never
//! holds a packet across loop iterations: it reads a header, inspects it and
//! immediately either feeds the held packet to a decoder or lets the next
//! read (or seek) release it.

use crate::convert::{ConvertSetup, SourceColor};
use crate::core::error::InputError;

/// Container-level durations are reported in ticks of this base
/// (microseconds), regardless of per-stream timebases.
pub const CONTAINER_TICKS_PER_SECOND: i64 = 1_000_000;

/// An exact ratio, used for stream timebases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

/// Static properties of one decodable video stream, gathered when the
/// container is opened.
#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    /// Position of the stream within the container.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
    /// Container-reported frame rate, if any.
    pub frame_rate: Option<Rational>,
    /// Container-reported start timestamp, in timebase ticks.
    pub start_time: Option<i64>,
    /// Stream duration in timebase ticks, if reported.
    pub duration: Option<i64>,
    /// Stream-reported frame count; 0 when unknown.
    pub frame_count: i64,
    /// Stream-level sample aspect ratio.
    pub stream_aspect: Option<f64>,
    /// Codec-level sample aspect ratio.
    pub codec_aspect: Option<f64>,
    /// Bits per raw sample as reported by the codec, if set.
    pub bits_per_raw_sample: Option<u32>,
    /// Bits per pixel of the source pixel format.
    pub bits_per_pixel: u32,
    /// Component count of the source pixel format (may be below 3).
    pub components: u32,
}

/// Header of the packet currently held by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    Packet(PacketInfo),
    Eof,
}

/// Which packet timestamp drives frame-index synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampSource {
    #[default]
    Pts,
    Dts,
}

impl TimestampSource {
    /// Extract the selected timestamp from a packet header.
    pub fn of(self, packet: &PacketInfo) -> Option<i64> {
        match self {
            Self::Pts => packet.pts,
            Self::Dts => packet.dts,
        }
    }
}

/// A container opened for frame-accurate reading.
///
/// Stream arguments refer to the container stream index, i.e. the `index`
/// field of the matching [`VideoStreamInfo`].
pub trait MediaInput: Send {
    /// The usable video streams found at open, in container order.
    fn streams(&self) -> &[VideoStreamInfo];

    /// Container duration in [`CONTAINER_TICKS_PER_SECOND`] ticks.
    fn container_duration(&self) -> Option<i64>;

    /// Exact-case lookup of a container metadata entry.
    fn metadata(&self, key: &str) -> Option<String>;

    /// Whether a video stream was skipped because no decoder exists for it.
    fn unsupported_codec_seen(&self) -> bool {
        false
    }

    /// Read the next packet, replacing any previously held one.
    fn read_packet(&mut self) -> Result<ReadEvent, InputError>;

    /// Feed the held packet to the stream's decoder. Returns whether a
    /// decoded frame came out.
    fn send_held_packet(&mut self, stream: usize) -> Result<bool, InputError>;

    /// Feed the decoder an empty packet to drain held frames. Returns
    /// whether a decoded frame came out.
    fn send_flush_packet(&mut self, stream: usize) -> Result<bool, InputError>;

    /// Flush the stream's decoder and seek backward to the keyframe at or
    /// before `timestamp` (in the stream's timebase).
    fn seek(&mut self, stream: usize, timestamp: i64) -> Result<(), InputError>;

    /// The decoder's current delay: how many packets it may consume beyond
    /// this count without emitting a frame before that counts as a stall.
    /// May grow mid-stream when B-frames are discovered.
    fn codec_delay(&self, stream: usize) -> i64;

    /// Current colour characteristics of the source.
    fn source_color(&self, stream: usize) -> SourceColor;

    /// Replace the stream's converter with one built for `setup`.
    fn build_converter(&mut self, stream: usize, setup: &ConvertSetup) -> Result<(), InputError>;

    /// Convert the stream's most recently decoded frame into `dst` as packed
    /// rows in the setup's output pixel format.
    fn convert_frame(&mut self, stream: usize, dst: &mut [u8]) -> Result<(), InputError>;
}

pub type DynMediaInput = Box<dyn MediaInput>;
