//! Scripted synthetic container.
//!
//! The mock backend plays back a hand-written packet timeline through a
//! miniature decoder model: seeking honours what the *container index*
//! claims about keyframes while decoding honours what the packets really
//! are, which is exactly the disagreement the reader's resynchronisation
//! and stall recovery exist for. Converted frames are deterministic byte
//! patterns derived from the packet timestamp, so tests can compare output
//! across arbitrary access orders.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::convert::{ColorRange, ConvertSetup, SourceColor};
use crate::core::error::InputError;
use crate::core::input::{
    MediaInput, PacketInfo, Rational, ReadEvent, VideoStreamInfo,
};

/// One scripted packet.
#[derive(Debug, Clone, Copy)]
pub struct MockPacket {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// What the container index claims: seeks may land here.
    pub index_key: bool,
    /// What the bitstream really is: decode may start here.
    pub decode_key: bool,
}

impl MockPacket {
    /// A well-behaved packet carrying both timestamps and both key flags.
    pub fn key(stream: usize, ts: i64) -> Self {
        Self {
            stream,
            pts: Some(ts),
            dts: Some(ts),
            index_key: true,
            decode_key: true,
        }
    }

    fn content_ts(&self, position: usize) -> i64 {
        self.pts.or(self.dts).unwrap_or(position as i64)
    }
}

/// One scripted video stream: container-visible properties plus the knobs
/// of its pretend decoder.
#[derive(Debug, Clone)]
pub struct MockStream {
    pub info: VideoStreamInfo,
    /// Declared decoder delay in packets.
    pub delay: i64,
    pub color: SourceColor,
    /// Swallow any packet whose content timestamp is at or past this,
    /// simulating a decoder that silently stops producing output.
    pub swallow_from_ts: Option<i64>,
}

impl MockStream {
    /// An 8-bit YUV stream with a 1/24 timebase at 24 fps, so packet
    /// timestamps equal frame indices.
    pub fn new(index: usize, width: u32, height: u32) -> Self {
        Self {
            info: VideoStreamInfo {
                index,
                width,
                height,
                time_base: Rational::new(1, 24),
                frame_rate: Some(Rational::new(24, 1)),
                start_time: Some(0),
                duration: None,
                frame_count: 0,
                stream_aspect: None,
                codec_aspect: None,
                bits_per_raw_sample: Some(8),
                bits_per_pixel: 12,
                components: 3,
            },
            delay: 0,
            color: SourceColor {
                is_yuv: true,
                range: ColorRange::Limited,
                rec709: false,
            },
            swallow_from_ts: None,
        }
    }
}

/// All-keyframe timeline of `frames` packets with timestamps 0..frames.
pub fn intra_timeline(stream: usize, frames: i64) -> Vec<MockPacket> {
    (0..frames).map(|ts| MockPacket::key(stream, ts)).collect()
}

#[derive(Debug, Default)]
struct Counters {
    seeks: AtomicUsize,
    reads: AtomicUsize,
    converter_builds: AtomicUsize,
    fail_builds: AtomicUsize,
    last_setup: Mutex<Option<ConvertSetup>>,
}

/// Shared view of a [`MockInput`]'s activity, usable after the input has
/// been moved into a reader.
#[derive(Debug, Clone)]
pub struct MockProbe {
    counters: Arc<Counters>,
}

impl MockProbe {
    pub fn seeks(&self) -> usize {
        self.counters.seeks.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn converter_builds(&self) -> usize {
        self.counters.converter_builds.load(Ordering::SeqCst)
    }

    pub fn last_setup(&self) -> Option<ConvertSetup> {
        *self.counters.last_setup.lock().unwrap()
    }

    /// Make the next `count` converter builds fail.
    pub fn fail_next_builds(&self, count: usize) {
        self.counters.fail_builds.store(count, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct MockDecoder {
    started: bool,
    pending: VecDeque<i64>,
    emitted: Option<i64>,
    has_converter: bool,
}

impl MockDecoder {
    fn flush(&mut self) {
        self.started = false;
        self.pending.clear();
        self.emitted = None;
    }
}

pub struct MockInput {
    streams: Vec<MockStream>,
    infos: Vec<VideoStreamInfo>,
    packets: Vec<MockPacket>,
    metadata: HashMap<String, String>,
    duration: Option<i64>,
    unsupported_seen: bool,
    position: usize,
    held: Option<usize>,
    decoders: HashMap<usize, MockDecoder>,
    counters: Arc<Counters>,
}

impl MockInput {
    pub fn new(streams: Vec<MockStream>, packets: Vec<MockPacket>) -> Self {
        let infos = streams.iter().map(|s| s.info.clone()).collect();
        let decoders = streams
            .iter()
            .map(|s| (s.info.index, MockDecoder::default()))
            .collect();
        Self {
            streams,
            infos,
            packets,
            metadata: HashMap::new(),
            duration: None,
            unsupported_seen: false,
            position: 0,
            held: None,
            decoders,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The canned input served when the mock backend is selected by name:
    /// ten intra-coded 320x240 frames at 24 fps.
    pub fn synthetic() -> Self {
        let mut stream = MockStream::new(0, 320, 240);
        stream.info.frame_count = 10;
        Self::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(416_667))
    }

    pub fn with_duration(mut self, duration: Option<i64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_unsupported_codec(mut self) -> Self {
        self.unsupported_seen = true;
        self
    }

    pub fn probe(&self) -> MockProbe {
        MockProbe {
            counters: Arc::clone(&self.counters),
        }
    }

    fn stream_config(&self, stream: usize) -> Result<&MockStream, InputError> {
        self.streams
            .iter()
            .find(|s| s.info.index == stream)
            .ok_or(InputError::UnknownStream(stream))
    }

    /// Deterministic pixel pattern for the frame with content timestamp
    /// `ts`; identical whenever the same frame is converted again.
    fn fill_pattern(ts: i64, dst: &mut [u8]) {
        let seed = (ts.rem_euclid(251)) as u8;
        for (offset, byte) in dst.iter_mut().enumerate() {
            *byte = seed.wrapping_mul(31).wrapping_add((offset % 13) as u8);
        }
    }

    fn emit(decoder: &mut MockDecoder, delay: i64) -> bool {
        if decoder.pending.len() as i64 > delay {
            decoder.emitted = decoder.pending.pop_front();
            true
        } else {
            false
        }
    }
}

impl MediaInput for MockInput {
    fn streams(&self) -> &[VideoStreamInfo] {
        &self.infos
    }

    fn container_duration(&self) -> Option<i64> {
        self.duration
    }

    fn metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }

    fn unsupported_codec_seen(&self) -> bool {
        self.unsupported_seen
    }

    fn read_packet(&mut self) -> Result<ReadEvent, InputError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.position >= self.packets.len() {
            self.held = None;
            return Ok(ReadEvent::Eof);
        }
        let packet = self.packets[self.position];
        self.held = Some(self.position);
        self.position += 1;
        Ok(ReadEvent::Packet(PacketInfo {
            stream: packet.stream,
            pts: packet.pts,
            dts: packet.dts,
        }))
    }

    fn send_held_packet(&mut self, stream: usize) -> Result<bool, InputError> {
        let position = self
            .held
            .take()
            .ok_or_else(|| InputError::Backend("no packet held".to_string()))?;
        let packet = self.packets[position];
        let config = self.stream_config(stream)?.clone();
        let decoder = self
            .decoders
            .get_mut(&stream)
            .ok_or(InputError::UnknownStream(stream))?;

        let ts = packet.content_ts(position);
        if !decoder.started && packet.decode_key {
            decoder.started = true;
        }
        let swallowed = config.swallow_from_ts.is_some_and(|limit| ts >= limit);
        if decoder.started && !swallowed {
            decoder.pending.push_back(ts);
        }
        Ok(Self::emit(decoder, config.delay))
    }

    fn send_flush_packet(&mut self, stream: usize) -> Result<bool, InputError> {
        let decoder = self
            .decoders
            .get_mut(&stream)
            .ok_or(InputError::UnknownStream(stream))?;
        if let Some(ts) = decoder.pending.pop_front() {
            decoder.emitted = Some(ts);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn seek(&mut self, stream: usize, timestamp: i64) -> Result<(), InputError> {
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        self.stream_config(stream)?;

        // Land on the latest index keyframe at or before the timestamp,
        // clamping to the earliest one the index knows about.
        let mut landing = None;
        let mut first_key = None;
        for (position, packet) in self.packets.iter().enumerate() {
            if packet.stream != stream || !packet.index_key {
                continue;
            }
            first_key.get_or_insert(position);
            if packet.content_ts(position) <= timestamp {
                landing = Some(position);
            }
        }
        self.position = landing.or(first_key).unwrap_or(0);
        self.held = None;
        if let Some(decoder) = self.decoders.get_mut(&stream) {
            decoder.flush();
        }
        Ok(())
    }

    fn codec_delay(&self, stream: usize) -> i64 {
        self.stream_config(stream).map(|s| s.delay).unwrap_or(0)
    }

    fn source_color(&self, stream: usize) -> SourceColor {
        self.stream_config(stream)
            .map(|s| s.color)
            .unwrap_or(SourceColor {
                is_yuv: true,
                range: ColorRange::Unspecified,
                rec709: false,
            })
    }

    fn build_converter(&mut self, stream: usize, setup: &ConvertSetup) -> Result<(), InputError> {
        let fail = self.counters.fail_builds.load(Ordering::SeqCst);
        if fail > 0 {
            self.counters.fail_builds.store(fail - 1, Ordering::SeqCst);
            return Err(InputError::Backend(
                "converter configuration rejected".to_string(),
            ));
        }
        self.counters.converter_builds.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_setup.lock().unwrap() = Some(*setup);
        let decoder = self
            .decoders
            .get_mut(&stream)
            .ok_or(InputError::UnknownStream(stream))?;
        decoder.has_converter = true;
        Ok(())
    }

    fn convert_frame(&mut self, stream: usize, dst: &mut [u8]) -> Result<(), InputError> {
        let decoder = self
            .decoders
            .get_mut(&stream)
            .ok_or(InputError::UnknownStream(stream))?;
        if !decoder.has_converter {
            return Err(InputError::NoConverter);
        }
        let ts = decoder.emitted.ok_or(InputError::NoFrame)?;
        Self::fill_pattern(ts, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_lands_on_latest_index_key() {
        let mut input = MockInput::new(vec![MockStream::new(0, 64, 64)], intra_timeline(0, 10));
        input.seek(0, 7).unwrap();
        match input.read_packet().unwrap() {
            ReadEvent::Packet(packet) => assert_eq!(packet.pts, Some(7)),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn seek_past_start_clamps_to_first_key() {
        let mut packets = intra_timeline(0, 10);
        for packet in packets.iter_mut().take(4) {
            packet.index_key = false;
        }
        let mut input = MockInput::new(vec![MockStream::new(0, 64, 64)], packets);
        input.seek(0, 1).unwrap();
        match input.read_packet().unwrap() {
            ReadEvent::Packet(packet) => assert_eq!(packet.pts, Some(4)),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn decoder_waits_for_a_real_keyframe() {
        let mut packets = intra_timeline(0, 6);
        packets[2].decode_key = false;
        let mut input = MockInput::new(vec![MockStream::new(0, 64, 64)], packets);
        input.seek(0, 2).unwrap();
        input.read_packet().unwrap();
        // Packet 2 claims to be seekable but is not decodable.
        assert!(!input.send_held_packet(0).unwrap());
        input.read_packet().unwrap();
        assert!(input.send_held_packet(0).unwrap());
    }

    #[test]
    fn delay_defers_output_until_drained() {
        let mut stream = MockStream::new(0, 64, 64);
        stream.delay = 2;
        let mut input = MockInput::new(vec![stream], intra_timeline(0, 4));
        let mut emitted = 0;
        for _ in 0..4 {
            input.read_packet().unwrap();
            if input.send_held_packet(0).unwrap() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 2);
        assert!(input.send_flush_packet(0).unwrap());
        assert!(input.send_flush_packet(0).unwrap());
        assert!(!input.send_flush_packet(0).unwrap());
    }
}
