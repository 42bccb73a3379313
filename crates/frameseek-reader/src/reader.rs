//! Frame-indexed random access over a compressed video container.

use std::path::Path;

use log::{debug, trace};

use crate::config::ReaderOptions;
use crate::convert::{self, ColorMatrixOverride};
use crate::core::error::ReaderError;
use crate::core::input::{
    DynMediaInput, MediaInput, ReadEvent, TimestampSource, VideoStreamInfo,
};
use crate::stream::{
    frames_from_container_duration, frames_from_stream_duration, reconcile_with_stream_frames,
    StreamState,
};

/// Far-future frame used to seek to the end when the frame count has to be
/// measured.
const END_PROBE_FRAME: i64 = 1 << 29;

/// Caller-facing stream summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Pixel aspect ratio.
    pub aspect: f64,
    pub frames: i64,
}

/// A container opened for frame-accurate reading.
///
/// One instance owns the container handle, the per-stream decode state and
/// a single output buffer that every successful [`decode`](Self::decode)
/// overwrites; callers copy the buffer out before the next call. Methods
/// take `&mut self`, so a host sharing one reader across worker threads
/// serialises calls behind its own lock, which is all the original contract
/// requires.
pub struct FrameReader {
    input: Option<DynMediaInput>,
    streams: Vec<StreamState>,
    buffer: Vec<u8>,
    error: String,
    invalid: bool,
}

impl FrameReader {
    /// Open a container. Failures leave the reader in an invalid state
    /// (inspect [`is_invalid`](Self::is_invalid) and
    /// [`last_error`](Self::last_error)) rather than refusing to construct:
    /// an invalid reader answers metadata queries harmlessly and refuses
    /// every decode.
    pub fn open(path: impl AsRef<Path>, options: &ReaderOptions) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Self::with_failure(String::new());
        }
        match options.create_input(path) {
            Ok(input) => Self::from_input(input, options),
            Err(err) => Self::with_failure(err.to_string()),
        }
    }

    /// Build a reader over an already-opened input.
    pub fn from_input(mut input: DynMediaInput, options: &ReaderOptions) -> Self {
        let streams = register_streams(input.as_mut(), options);
        if streams.is_empty() {
            let err = if input.unsupported_codec_seen() {
                ReaderError::UnsupportedCodec
            } else {
                ReaderError::NoVideoStream
            };
            let mut reader = Self::with_failure(err.to_string());
            reader.input = Some(input);
            return reader;
        }
        // Only the first stream is ever decoded; the shared output buffer
        // is sized for it once and reused across decodes.
        let buffer = vec![0u8; streams[0].buffer_size()];
        debug!(
            "opened input with {} usable video stream(s), buffer {} bytes",
            streams.len(),
            buffer.len()
        );
        Self {
            input: Some(input),
            streams,
            buffer,
            error: String::new(),
            invalid: false,
        }
    }

    fn with_failure(error: String) -> Self {
        Self {
            input: None,
            streams: Vec::new(),
            buffer: Vec::new(),
            error,
            invalid: true,
        }
    }

    /// Decode `frame` into the shared output buffer.
    ///
    /// `load_nearest` clamps out-of-range requests to the nearest valid
    /// frame instead of failing. `max_retries` bounds stall recovery; an
    /// effective minimum of one retry always applies.
    ///
    /// On failure the next-frame cursor is reset so the following call
    /// starts from a fresh seek; the reader never wedges short of an open
    /// failure.
    pub fn decode(
        &mut self,
        frame: i64,
        load_nearest: bool,
        max_retries: u32,
    ) -> Result<(), ReaderError> {
        let result = self.decode_inner(frame, load_nearest, max_retries);
        if let Err(err) = &result {
            self.error = err.to_string();
        }
        result
    }

    fn decode_inner(
        &mut self,
        frame: i64,
        load_nearest: bool,
        max_retries: u32,
    ) -> Result<(), ReaderError> {
        let Self {
            input,
            streams,
            buffer,
            ..
        } = self;
        let (Some(input), Some(stream)) = (input.as_deref_mut(), streams.first_mut()) else {
            return Err(ReaderError::NoVideoStream);
        };

        let mut frame = frame;
        if frame < 0 {
            if !load_nearest {
                return Err(ReaderError::MissingFrame { frame });
            }
            frame = 0;
        } else if frame >= stream.frames {
            if !load_nearest {
                return Err(ReaderError::MissingFrame { frame });
            }
            frame = stream.frames - 1;
        }
        if frame < 0 || frame >= stream.frames {
            return Err(ReaderError::MissingFrame { frame });
        }

        let result = run_decode_loop(
            input,
            stream,
            buffer.as_mut_slice(),
            frame,
            load_nearest,
            max_retries,
        );
        if result.is_err() {
            // Force the next call to start with a fresh seek.
            stream.decode_next_out = -1;
        }
        result
    }

    pub fn info(&self, stream_idx: usize) -> Option<VideoInfo> {
        self.streams.get(stream_idx).map(|stream| VideoInfo {
            width: stream.width,
            height: stream.height,
            aspect: stream.aspect,
            frames: stream.frames,
        })
    }

    pub fn fps(&self, stream_idx: usize) -> Option<f64> {
        self.streams
            .get(stream_idx)
            .map(|stream| stream.fps_num as f64 / stream.fps_den as f64)
    }

    /// Name of the source colorspace, for the host's colour pipeline.
    ///
    /// Prefers explicit metadata (a Foundry colorspace entry, then Arri
    /// camera gamma entries, each in both historical key spellings) and
    /// falls back to a gamma guess from the pixel family.
    pub fn colorspace(&self) -> String {
        if let Some(input) = &self.input {
            for key in ["uk.co.thefoundry.Colorspace", "uk.co.thefoundry.colorspace"] {
                if let Some(value) = input.metadata(key) {
                    return value;
                }
            }
            for key in [
                "com.arri.camera.ColorGammaSxS",
                "com.arri.camera.colorgammasxs",
            ] {
                if let Some(value) = input.metadata(key) {
                    let value = value.to_ascii_uppercase();
                    if value.starts_with("LOG-C") {
                        return "AlexaV3LogC".to_string();
                    }
                    if value.starts_with("REC-709") {
                        return "rec709".to_string();
                    }
                }
            }
        }
        let yuv = match (&self.input, self.streams.first()) {
            (Some(input), Some(stream)) => input.source_color(stream.index).is_yuv,
            _ => false,
        };
        if yuv { "Gamma2.2" } else { "Gamma1.8" }.to_string()
    }

    /// Select the YUV coefficient override and invalidate the cached
    /// converter so the next decode rebuilds it.
    pub fn set_color_matrix_override(&mut self, matrix_override: ColorMatrixOverride) {
        for stream in &mut self.streams {
            stream.color_override = matrix_override;
            stream.converter = None;
        }
    }

    pub fn last_error(&self) -> &str {
        &self.error
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn width(&self) -> u32 {
        self.streams.first().map_or(0, |stream| stream.width)
    }

    pub fn height(&self) -> u32 {
        self.streams.first().map_or(0, |stream| stream.height)
    }

    pub fn bit_depth(&self) -> u32 {
        self.streams.first().map_or(0, |stream| stream.bit_depth)
    }

    pub fn num_components(&self) -> u32 {
        self.streams
            .first()
            .map_or(0, |stream| stream.num_components)
    }

    pub fn row_size(&self) -> usize {
        self.streams.first().map_or(0, |stream| stream.row_size())
    }

    pub fn buffer_size(&self) -> usize {
        self.streams
            .first()
            .map_or(0, |stream| stream.buffer_size())
    }

    /// The shared output buffer; overwritten by every successful decode.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }
}

fn register_streams(input: &mut dyn MediaInput, options: &ReaderOptions) -> Vec<StreamState> {
    let infos = input.streams().to_vec();
    let container_duration = input.container_duration();
    let mut streams = Vec::with_capacity(infos.len());
    for info in &infos {
        let mut stream = StreamState::from_info(info, options.color_matrix_override);
        stream.start_pts = stream_start_time(input, info);
        stream.frames = stream_frames(input, &stream, info, container_duration);
        debug!(
            "stream {}: {}x{}, {} bit, {} components, {}/{} fps, {} frames, start pts {}",
            stream.index,
            stream.width,
            stream.height,
            stream.bit_depth,
            stream.num_components,
            stream.fps_num,
            stream.fps_den,
            stream.frames,
            stream.start_pts,
        );
        streams.push(stream);
    }
    streams
}

/// Start timestamp of a stream: the container report when present,
/// otherwise the first packet of the stream that carries a PTS, otherwise 0.
fn stream_start_time(input: &mut dyn MediaInput, info: &VideoStreamInfo) -> i64 {
    if let Some(start) = info.start_time {
        return start;
    }
    if input.seek(info.index, 0).is_ok() {
        loop {
            match input.read_packet() {
                Ok(ReadEvent::Packet(packet)) if packet.stream == info.index => {
                    if let Some(pts) = packet.pts {
                        return pts;
                    }
                }
                Ok(ReadEvent::Packet(_)) => {}
                // Read error or EOF: abort the search.
                _ => break,
            }
        }
    }
    0
}

/// Caller-visible frame count, in preference order: container duration,
/// stream frame count, stream duration, measured from the last PTS.
fn stream_frames(
    input: &mut dyn MediaInput,
    stream: &StreamState,
    info: &VideoStreamInfo,
    container_duration: Option<i64>,
) -> i64 {
    let mut frames = 0;
    if let Some(duration) = container_duration {
        frames = frames_from_container_duration(duration, stream.fps_num, stream.fps_den);
        frames = reconcile_with_stream_frames(frames, info.frame_count);
    }
    if frames == 0 {
        frames = info.frame_count;
    }
    if frames == 0 {
        if let Some(duration) = info.duration {
            frames =
                frames_from_stream_duration(duration, stream.time_base, stream.fps_num, stream.fps_den);
        }
    }
    if frames == 0 {
        debug!(
            "stream {} reports no usable duration, measuring frame count",
            stream.index
        );
        let mut max_pts = stream.start_pts;
        let _ = input.seek(stream.index, stream.frame_to_pts(END_PROBE_FRAME));
        while let Ok(ReadEvent::Packet(packet)) = input.read_packet() {
            if packet.stream == stream.index {
                if let Some(pts) = packet.pts {
                    max_pts = max_pts.max(pts);
                }
            }
        }
        // Both the start and the max PTS sit at frame starts, so the stream
        // extends one frame past their distance.
        frames = 1 + stream.pts_to_frame(max_pts);
    }
    frames
}

fn seek_frame(
    input: &mut dyn MediaInput,
    stream: &StreamState,
    frame: i64,
) -> Result<(), ReaderError> {
    let timestamp = stream.frame_to_pts(frame);
    trace!(
        "seeking stream {} to frame {frame} (pts {timestamp})",
        stream.index
    );
    input
        .seek(stream.index, timestamp)
        .map_err(|source| ReaderError::Seek { source })
}

fn convert_into(
    input: &mut dyn MediaInput,
    stream: &mut StreamState,
    buffer: &mut [u8],
) -> Result<(), ReaderError> {
    let source = input.source_color(stream.index);
    let setup = convert::convert_setup(
        stream.width,
        stream.height,
        stream.output_format,
        &source,
        stream.color_override,
    );
    if stream.converter != Some(setup) {
        if let Err(source) = input.build_converter(stream.index, &setup) {
            stream.converter = None;
            return Err(ReaderError::Convert { source });
        }
        stream.converter = Some(setup);
    }
    if let Err(source) = input.convert_frame(stream.index, buffer) {
        // Drop the cached setup so the next call rebuilds from scratch.
        stream.converter = None;
        return Err(ReaderError::Convert { source });
    }
    Ok(())
}

/// The decode state machine. Reads packets, resynchronises the frame
/// cursors after seeks, detects decode stalls and recovers from them, and
/// converts the requested frame into `buffer`.
fn run_decode_loop(
    input: &mut dyn MediaInput,
    stream: &mut StreamState,
    buffer: &mut [u8],
    mut frame: i64,
    load_nearest: bool,
    max_retries: u32,
) -> Result<(), ReaderError> {
    // A small subset of files exhibits one-off decode latency beyond the
    // declared codec delay on the first pass but decodes fine on a second
    // attempt, so at least one retry is always granted.
    let mut retries_remaining = i64::from(max_retries.max(1));

    // Set while a seek has not yet been matched to a landing frame; -1
    // otherwise. Walked backwards one frame at a time when the landing
    // cannot be identified, which bounds resynchronisation.
    let mut last_seeked_frame: i64 = -1;

    // Whether no frame has come out of the decoder since the last seek.
    // Distinguishes post-seek stalls (bad keyframe index entries, recovered
    // by walking further back) from mid-decode stalls (retried from the
    // target, then failed).
    let mut awaiting_first_decode_after_seek = false;

    if frame != stream.decode_next_out {
        debug!(
            "frame {frame} requested, next expected out is {}, seeking",
            stream.decode_next_out
        );
        last_seeked_frame = frame;
        stream.invalidate_cursors();
        awaiting_first_decode_after_seek = true;
        seek_frame(input, stream, frame)?;
    }

    loop {
        let mut decode_attempted = false;
        let mut frame_decoded = false;

        if stream.decode_next_in < stream.frames {
            match input
                .read_packet()
                .map_err(|source| ReaderError::Read { source })?
            {
                ReadEvent::Eof => {
                    if stream.decode_next_in < 0 {
                        // Ran out of file before the seek resynchronised;
                        // there is no timing reference left to land on.
                        return Err(ReaderError::TimingReference);
                    }
                    // The advertised frame count was wrong; trust what was
                    // actually read.
                    stream.frames = stream.decode_next_in;
                    debug!("EOF before advertised end, frame count is {}", stream.frames);
                    if load_nearest {
                        frame = stream.frames - 1;
                        if frame < 0 {
                            return Err(ReaderError::MissingFrame { frame });
                        }
                        last_seeked_frame = frame;
                        stream.invalidate_cursors();
                        awaiting_first_decode_after_seek = true;
                        seek_frame(input, stream, frame)?;
                    }
                    continue;
                }
                ReadEvent::Packet(packet) if packet.stream == stream.index => {
                    if packet.pts.is_some() {
                        stream.pts_seen = true;
                    }

                    if last_seeked_frame >= 0 {
                        // Identify where the seek landed. No timestamp, or a
                        // landing past the target (container index bugs), means
                        // the landing is unusable: wind back one frame and
                        // reseek until indices synchronise or the start of the
                        // stream proves the timestamp source hopeless.
                        let landing = stream
                            .timestamp_source
                            .of(&packet)
                            .map(|ts| stream.pts_to_frame(ts));
                        match landing {
                            Some(landed) if landed <= last_seeked_frame => {
                                trace!("seek landed at frame {landed}");
                                stream.decode_next_in = landed;
                                stream.decode_next_out = landed;
                                last_seeked_frame = -1;
                            }
                            _ => {
                                last_seeked_frame -= 1;
                                if last_seeked_frame < 0 {
                                    if stream.timestamp_source == TimestampSource::Pts
                                        && !stream.pts_seen
                                    {
                                        debug!("stream carries no PTS, switching to DTS");
                                        stream.timestamp_source = TimestampSource::Dts;
                                        last_seeked_frame = frame;
                                    } else {
                                        return Err(ReaderError::TimingReference);
                                    }
                                }
                                seek_frame(input, stream, last_seeked_frame)?;
                            }
                        }
                    }

                    // Once synchronised, feed the held packet (including the
                    // landing packet itself) to the decoder.
                    if last_seeked_frame < 0 {
                        trace!("decoding input frame {}", stream.decode_next_in);
                        stream.decode_next_in += 1;
                        decode_attempted = true;
                        frame_decoded = input
                            .send_held_packet(stream.index)
                            .map_err(|source| ReaderError::Decode { source })?;
                    }
                }
                // Packet for some other stream; discard.
                ReadEvent::Packet(_) => {}
            }
        } else {
            // Past the end of input: drain any frames the decoder still
            // holds.
            decode_attempted = true;
            frame_decoded = input
                .send_flush_packet(stream.index)
                .map_err(|source| ReaderError::Decode { source })?;
        }

        if frame_decoded {
            awaiting_first_decode_after_seek = false;
            stream.accum_decode_latency = 0;
            if stream.decode_next_out == frame {
                convert_into(input, stream, buffer)?;
                stream.decode_next_out += 1;
                return Ok(());
            }
            trace!(
                "decoded frame {}, waiting for {frame}",
                stream.decode_next_out
            );
            stream.decode_next_out += 1;
        } else if decode_attempted {
            stream.accum_decode_latency += 1;
            if stream.accum_decode_latency > input.codec_delay(stream.index) {
                let seek_target = if awaiting_first_decode_after_seek {
                    if stream.decode_next_out > 0 {
                        // The keyframe the index sent us to does not decode;
                        // search backwards for a real decode start.
                        debug!(
                            "post-seek stall, trying earlier decode start at frame {}",
                            stream.decode_next_out - 1
                        );
                        stream.decode_next_out - 1
                    } else if retries_remaining > 0 {
                        retries_remaining -= 1;
                        debug!("post-seek stall at start of stream, retrying from frame {frame}");
                        frame
                    } else {
                        return Err(ReaderError::DecodeReference);
                    }
                } else if retries_remaining > 0 {
                    retries_remaining -= 1;
                    debug!("mid-decode stall, retrying from frame {frame}");
                    frame
                } else {
                    return Err(ReaderError::DecodeStall);
                };
                last_seeked_frame = seek_target;
                stream.invalidate_cursors();
                awaiting_first_decode_after_seek = true;
                seek_frame(input, stream, seek_target)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{intra_timeline, MockInput, MockPacket, MockProbe, MockStream};
    use crate::config::{Backend, ReaderOptions};
    use crate::convert::{ColorMatrix, ColorRange, SourceColor};
    use crate::core::input::CONTAINER_TICKS_PER_SECOND;

    /// Container duration ticks covering `frames` frames at 24 fps.
    fn duration_for(frames: i64) -> i64 {
        (frames * CONTAINER_TICKS_PER_SECOND + 23) / 24
    }

    fn ten_frame_stream() -> MockStream {
        let mut stream = MockStream::new(0, 320, 240);
        stream.info.frame_count = 10;
        stream
    }

    fn ten_frame_input() -> MockInput {
        MockInput::new(vec![ten_frame_stream()], intra_timeline(0, 10))
            .with_duration(Some(duration_for(10)))
    }

    fn reader_over(input: MockInput) -> (FrameReader, MockProbe) {
        let probe = input.probe();
        let reader = FrameReader::from_input(Box::new(input), &ReaderOptions::default());
        (reader, probe)
    }

    fn frame_bytes(reader: &mut FrameReader, frame: i64) -> Vec<u8> {
        reader.decode(frame, false, 1).unwrap();
        reader.data().to_vec()
    }

    #[test]
    fn open_computes_stream_metadata() {
        let (reader, probe) = reader_over(ten_frame_input());
        assert!(!reader.is_invalid());
        let info = reader.info(0).unwrap();
        assert_eq!(info.width, 320);
        assert_eq!(info.height, 240);
        assert_eq!(info.frames, 10);
        assert_eq!(info.aspect, 1.0);
        assert_eq!(reader.fps(0), Some(24.0));
        assert_eq!(reader.bit_depth(), 8);
        assert_eq!(reader.num_components(), 3);
        assert_eq!(reader.row_size(), 320 * 3);
        assert_eq!(reader.buffer_size(), 320 * 240 * 3);
        assert_eq!(reader.data().len(), reader.buffer_size());
        // Start PTS and frame count came straight from the container.
        assert_eq!(probe.seeks(), 0);
        assert_eq!(probe.reads(), 0);
    }

    #[test]
    fn sequential_read_issues_a_single_seek() {
        let (mut reader, probe) = reader_over(ten_frame_input());
        for frame in 0..10 {
            reader.decode(frame, false, 1).unwrap();
            assert_eq!(reader.streams[0].decode_next_out, frame + 1);
        }
        assert_eq!(probe.seeks(), 1);
    }

    #[test]
    fn random_access_matches_sequential_output() {
        let (mut random, _) = reader_over(ten_frame_input());
        let from_random = frame_bytes(&mut random, 7);
        random.decode(2, false, 1).unwrap();
        random.decode(9, false, 1).unwrap();
        random.decode(0, false, 1).unwrap();

        let (mut sequential, _) = reader_over(ten_frame_input());
        let mut from_sequential = Vec::new();
        for frame in 0..8 {
            from_sequential = frame_bytes(&mut sequential, frame);
        }
        assert_eq!(from_random, from_sequential);
    }

    #[test]
    fn repeated_decode_is_idempotent() {
        let (mut reader, _) = reader_over(ten_frame_input());
        let first = frame_bytes(&mut reader, 5);
        let second = frame_bytes(&mut reader, 5);
        assert_eq!(first, second);
    }

    #[test]
    fn nearest_clamps_to_frame_range() {
        let (mut reader, _) = reader_over(ten_frame_input());
        reader.decode(-5, true, 1).unwrap();
        let low = reader.data().to_vec();
        reader.decode(100, true, 1).unwrap();
        let high = reader.data().to_vec();

        let (mut exact, _) = reader_over(ten_frame_input());
        assert_eq!(low, frame_bytes(&mut exact, 0));
        assert_eq!(high, frame_bytes(&mut exact, 9));
    }

    #[test]
    fn out_of_range_without_nearest_is_missing() {
        let (mut reader, _) = reader_over(ten_frame_input());
        for request in [-1, 10, 100] {
            let err = reader.decode(request, false, 1).unwrap_err();
            assert!(matches!(err, ReaderError::MissingFrame { .. }));
        }
        assert!(reader.last_error().contains("missing frame"));
        // Requests inside the range still work afterwards.
        reader.decode(4, false, 1).unwrap();
    }

    #[test]
    fn empty_path_is_invalid_but_inert() {
        let options = ReaderOptions {
            backend: Backend::Mock,
            ..ReaderOptions::default()
        };
        let mut reader = FrameReader::open("", &options);
        assert!(reader.is_invalid());
        assert!(reader.info(0).is_none());
        assert!(reader.fps(0).is_none());
        assert_eq!(reader.bit_depth(), 0);
        assert_eq!(reader.buffer_size(), 0);
        assert!(reader.data().is_empty());
        assert_eq!(reader.colorspace(), "Gamma1.8");
        assert!(reader.decode(0, true, 1).is_err());
    }

    #[test]
    fn container_without_video_is_invalid() {
        let (reader, _) = reader_over(MockInput::new(Vec::new(), Vec::new()));
        assert!(reader.is_invalid());
        assert_eq!(reader.last_error(), "unable to find video stream");
    }

    #[test]
    fn undecodable_video_reports_unsupported_codec() {
        let input = MockInput::new(Vec::new(), Vec::new()).with_unsupported_codec();
        let (reader, _) = reader_over(input);
        assert!(reader.is_invalid());
        assert_eq!(reader.last_error(), "unsupported codec");
    }

    #[test]
    fn lying_keyframe_index_walks_back_to_real_keyframe() {
        // The index claims frames 0, 3 and 5 are seekable but only 0 and 3
        // actually start a decode; a seek for frame 6 lands on 5 and stalls.
        let mut packets = intra_timeline(0, 10);
        for (ts, packet) in packets.iter_mut().enumerate() {
            packet.index_key = matches!(ts, 0 | 3 | 5);
            packet.decode_key = matches!(ts, 0 | 3);
        }
        let input =
            MockInput::new(vec![ten_frame_stream()], packets).with_duration(Some(duration_for(10)));
        let (mut reader, probe) = reader_over(input);

        let bytes = frame_bytes(&mut reader, 6);
        // One seek to the lying keyframe, one walking back to frame 3.
        assert_eq!(probe.seeks(), 2);

        let (mut clean, _) = reader_over(ten_frame_input());
        assert_eq!(bytes, frame_bytes(&mut clean, 6));
    }

    #[test]
    fn missing_pts_switches_to_dts_once() {
        let mut packets = intra_timeline(0, 10);
        for packet in &mut packets {
            packet.pts = None;
        }
        let input =
            MockInput::new(vec![ten_frame_stream()], packets).with_duration(Some(duration_for(10)));
        let (mut reader, _) = reader_over(input);

        reader.decode(4, false, 1).unwrap();
        assert_eq!(reader.streams[0].timestamp_source, TimestampSource::Dts);
        assert!(!reader.streams[0].pts_seen);

        // Later reads keep using DTS without renegotiating.
        reader.decode(8, false, 1).unwrap();
        assert_eq!(reader.streams[0].timestamp_source, TimestampSource::Dts);
    }

    #[test]
    fn timestampless_stream_fails_with_timing_reference() {
        let mut packets = intra_timeline(0, 6);
        for packet in &mut packets {
            packet.pts = None;
            packet.dts = None;
        }
        let mut stream = ten_frame_stream();
        stream.info.frame_count = 6;
        let input = MockInput::new(vec![stream], packets).with_duration(Some(duration_for(6)));
        let (mut reader, _) = reader_over(input);

        let err = reader.decode(2, false, 1).unwrap_err();
        assert!(matches!(err, ReaderError::TimingReference));
        assert!(reader
            .last_error()
            .contains("failed to find timing reference frame"));
    }

    #[test]
    fn rounded_up_duration_defers_to_stream_count() {
        // 5.0042 s at 24 fps derives to 121 frames; the stream says 120.
        let mut stream = MockStream::new(0, 64, 64);
        stream.info.frame_count = 120;
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 120)).with_duration(Some(5_004_200));
        let (reader, _) = reader_over(input);
        assert_eq!(reader.info(0).unwrap().frames, 120);
    }

    #[test]
    fn unreported_duration_is_measured_from_last_pts() {
        let stream = MockStream::new(0, 64, 64);
        let input = MockInput::new(vec![stream], intra_timeline(0, 10));
        let (mut reader, probe) = reader_over(input);
        assert_eq!(reader.info(0).unwrap().frames, 10);
        assert!(probe.seeks() >= 1);
        reader.decode(3, false, 1).unwrap();
    }

    #[test]
    fn start_pts_is_scanned_from_packets_when_unreported() {
        let mut stream = ten_frame_stream();
        stream.info.start_time = None;
        let packets = (0..10)
            .map(|ts| MockPacket::key(0, 100 + ts))
            .collect::<Vec<_>>();
        let input = MockInput::new(vec![stream], packets).with_duration(Some(duration_for(10)));
        let (mut reader, _) = reader_over(input);
        assert_eq!(reader.streams[0].start_pts, 100);
        reader.decode(0, false, 1).unwrap();
        reader.decode(7, false, 1).unwrap();
    }

    #[test]
    fn early_eof_corrects_frame_count_and_reclamps() {
        // The container advertises 12 frames but holds only 10 packets.
        let mut stream = ten_frame_stream();
        stream.info.frame_count = 12;
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(12)));
        let (mut reader, _) = reader_over(input);
        assert_eq!(reader.info(0).unwrap().frames, 12);

        reader.decode(11, true, 1).unwrap();
        assert_eq!(reader.info(0).unwrap().frames, 10);

        let (mut clean, _) = reader_over(ten_frame_input());
        assert_eq!(reader.data().to_vec(), frame_bytes(&mut clean, 9));
    }

    #[test]
    fn early_eof_without_nearest_stalls_and_heals() {
        let mut stream = ten_frame_stream();
        stream.info.frame_count = 12;
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(12)));
        let (mut reader, _) = reader_over(input);

        let err = reader.decode(11, false, 1).unwrap_err();
        assert!(matches!(err, ReaderError::DecodeStall));
        assert!(reader.last_error().contains("decoding stall"));

        // The failed call left the reader healthy.
        reader.decode(5, false, 1).unwrap();
        assert_eq!(reader.streams[0].decode_next_out, 6);
    }

    #[test]
    fn decoder_death_mid_stream_exhausts_retries() {
        let mut stream = ten_frame_stream();
        stream.swallow_from_ts = Some(7);
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (mut reader, _) = reader_over(input);

        let err = reader.decode(8, false, 2).unwrap_err();
        assert!(matches!(err, ReaderError::DecodeStall));
        // Frames before the dead region still decode.
        reader.decode(5, false, 1).unwrap();
    }

    #[test]
    fn stream_that_never_decodes_fails_with_decode_reference() {
        let mut packets = intra_timeline(0, 6);
        for packet in &mut packets {
            packet.decode_key = false;
        }
        let mut stream = ten_frame_stream();
        stream.info.frame_count = 6;
        let input = MockInput::new(vec![stream], packets).with_duration(Some(duration_for(6)));
        let (mut reader, _) = reader_over(input);

        let err = reader.decode(3, false, 2).unwrap_err();
        assert!(matches!(err, ReaderError::DecodeReference));
        assert!(reader
            .last_error()
            .contains("failed to find decode reference frame"));
    }

    #[test]
    fn packets_of_other_streams_are_skipped() {
        // Interleave an audio-like stream the reader must ignore.
        let mut packets = Vec::new();
        for ts in 0..10 {
            packets.push(MockPacket::key(0, ts));
            packets.push(MockPacket {
                stream: 1,
                pts: Some(ts),
                dts: Some(ts),
                index_key: false,
                decode_key: false,
            });
        }
        let input =
            MockInput::new(vec![ten_frame_stream()], packets).with_duration(Some(duration_for(10)));
        let (mut reader, _) = reader_over(input);
        let bytes = frame_bytes(&mut reader, 6);

        let (mut clean, _) = reader_over(ten_frame_input());
        assert_eq!(bytes, frame_bytes(&mut clean, 6));
    }

    #[test]
    fn codec_delay_defers_frames_without_stalling() {
        let mut stream = ten_frame_stream();
        stream.delay = 2;
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (mut reader, _) = reader_over(input);
        for frame in 0..10 {
            reader.decode(frame, false, 1).unwrap();
        }
        // The last frames only come out of the drain path.
        let (mut clean, _) = reader_over(ten_frame_input());
        assert_eq!(reader.data().to_vec(), frame_bytes(&mut clean, 9));
    }

    #[test]
    fn override_change_rebuilds_converter() {
        let mut stream = ten_frame_stream();
        stream.color.rec709 = true;
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (mut reader, probe) = reader_over(input);

        reader.decode(0, false, 1).unwrap();
        reader.decode(1, false, 1).unwrap();
        assert_eq!(probe.converter_builds(), 1);
        let setup = probe.last_setup().unwrap();
        assert_eq!(setup.color.unwrap().coefficients, ColorMatrix::Rec709);

        reader.set_color_matrix_override(ColorMatrixOverride::Rec601);
        reader.decode(2, false, 1).unwrap();
        assert_eq!(probe.converter_builds(), 2);
        let setup = probe.last_setup().unwrap();
        assert_eq!(setup.color.unwrap().coefficients, ColorMatrix::Rec601);

        reader.decode(3, false, 1).unwrap();
        assert_eq!(probe.converter_builds(), 2);
    }

    #[test]
    fn converter_failure_is_retried_on_next_decode() {
        let (mut reader, probe) = reader_over(ten_frame_input());
        probe.fail_next_builds(1);

        let err = reader.decode(2, false, 1).unwrap_err();
        assert!(matches!(err, ReaderError::Convert { .. }));
        assert!(reader.last_error().starts_with("failed to convert frame"));

        reader.decode(2, false, 1).unwrap();
        assert_eq!(probe.converter_builds(), 1);
    }

    #[test]
    fn high_bit_depth_stream_uses_sixteen_bit_buffer() {
        let mut stream = ten_frame_stream();
        stream.info.bits_per_raw_sample = Some(10);
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (mut reader, _) = reader_over(input);
        assert_eq!(reader.bit_depth(), 10);
        assert_eq!(reader.buffer_size(), 320 * 240 * 3 * 2);
        reader.decode(0, false, 1).unwrap();
    }

    #[test]
    fn aspect_prefers_stream_then_codec() {
        let mut stream = ten_frame_stream();
        stream.info.stream_aspect = Some(2.0);
        stream.info.codec_aspect = Some(1.5);
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (reader, _) = reader_over(input);
        assert_eq!(reader.info(0).unwrap().aspect, 2.0);

        let mut stream = ten_frame_stream();
        stream.info.codec_aspect = Some(1.5);
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (reader, _) = reader_over(input);
        assert_eq!(reader.info(0).unwrap().aspect, 1.5);
    }

    #[test]
    fn colorspace_prefers_explicit_metadata() {
        let input = ten_frame_input().with_metadata("uk.co.thefoundry.Colorspace", "Cineon");
        let (reader, _) = reader_over(input);
        assert_eq!(reader.colorspace(), "Cineon");

        let input = ten_frame_input().with_metadata("uk.co.thefoundry.colorspace", "linear");
        let (reader, _) = reader_over(input);
        assert_eq!(reader.colorspace(), "linear");

        let input =
            ten_frame_input().with_metadata("com.arri.camera.ColorGammaSxS", "LOG-C Wide Gamut");
        let (reader, _) = reader_over(input);
        assert_eq!(reader.colorspace(), "AlexaV3LogC");

        let input =
            ten_frame_input().with_metadata("com.arri.camera.colorgammasxs", "rec-709 scene");
        let (reader, _) = reader_over(input);
        assert_eq!(reader.colorspace(), "rec709");
    }

    #[test]
    fn colorspace_falls_back_to_pixel_family_gamma() {
        let (reader, _) = reader_over(ten_frame_input());
        assert_eq!(reader.colorspace(), "Gamma2.2");

        let mut stream = ten_frame_stream();
        stream.color = SourceColor {
            is_yuv: false,
            range: ColorRange::Full,
            rec709: false,
        };
        let input =
            MockInput::new(vec![stream], intra_timeline(0, 10)).with_duration(Some(duration_for(10)));
        let (reader, _) = reader_over(input);
        assert_eq!(reader.colorspace(), "Gamma1.8");
    }

    #[test]
    fn boundary_clamps_hit_first_and_last_frame() {
        let (mut reader, _) = reader_over(ten_frame_input());
        reader.decode(-1, true, 1).unwrap();
        assert_eq!(reader.streams[0].decode_next_out, 1);
        reader.decode(10, true, 1).unwrap();
        assert_eq!(reader.streams[0].decode_next_out, 10);
    }

    #[test]
    fn reader_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameReader>();
    }

    #[test]
    fn mock_backend_opens_by_name() {
        let options = ReaderOptions {
            backend: Backend::Mock,
            ..ReaderOptions::default()
        };
        let mut reader = FrameReader::open("anything.mov", &options);
        assert!(!reader.is_invalid());
        assert_eq!(reader.info(0).unwrap().frames, 10);
        reader.decode(9, false, 1).unwrap();
    }
}
