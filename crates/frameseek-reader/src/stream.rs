//! Per-stream decode state and timestamp arithmetic.

use crate::convert::{self, ColorMatrixOverride, ConvertSetup, OutputPixelFormat};
use crate::core::input::{
    Rational, TimestampSource, VideoStreamInfo, CONTAINER_TICKS_PER_SECOND,
};

/// Decode bookkeeping for one video stream.
///
/// The cursors are single-owner state: they are only ever touched while the
/// reader drives this stream and are never handed out.
#[derive(Debug)]
pub(crate) struct StreamState {
    /// Container stream index.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    /// Always 3 or 4; monochrome sources are promoted to 3.
    pub num_components: u32,
    pub output_format: OutputPixelFormat,
    pub fps_num: i64,
    pub fps_den: i64,
    pub time_base: Rational,
    /// Pixel aspect ratio.
    pub aspect: f64,
    /// Presentation timestamp of frame 0, in timebase ticks.
    pub start_pts: i64,
    /// Caller-visible frame count. Corrected downward if the container lied
    /// and EOF arrives early.
    pub frames: i64,
    /// Next frame to be submitted to the decoder; -1 right after a seek.
    pub decode_next_in: i64,
    /// Next frame expected out of the decoder; -1 right after a seek.
    pub decode_next_out: i64,
    /// Consecutive packets submitted without a frame coming back.
    pub accum_decode_latency: i64,
    pub timestamp_source: TimestampSource,
    /// Whether any packet of this stream ever carried a valid PTS.
    pub pts_seen: bool,
    pub color_override: ColorMatrixOverride,
    /// Setup of the converter the backend currently holds, if any.
    pub converter: Option<ConvertSetup>,
}

impl StreamState {
    pub fn from_info(info: &VideoStreamInfo, color_override: ColorMatrixOverride) -> Self {
        let num_components = info.components.max(3);
        let bit_depth = match info.bits_per_raw_sample {
            Some(bits) if bits > 0 => bits,
            _ => info.bits_per_pixel / num_components,
        };
        let (fps_num, fps_den) = match info.frame_rate {
            Some(rate) if rate.num != 0 && rate.den != 0 => (rate.num as i64, rate.den as i64),
            _ => (1, 1),
        };
        let aspect = info
            .stream_aspect
            .or(info.codec_aspect)
            .unwrap_or(1.0);
        Self {
            index: info.index,
            width: info.width,
            height: info.height,
            bit_depth,
            num_components,
            output_format: convert::output_format_for(bit_depth, num_components),
            fps_num,
            fps_den,
            time_base: info.time_base,
            aspect,
            start_pts: 0,
            frames: 0,
            decode_next_in: -1,
            decode_next_out: -1,
            accum_decode_latency: 0,
            timestamp_source: TimestampSource::Pts,
            pts_seen: false,
            color_override,
            converter: None,
        }
    }

    /// Frame index of a timestamp, truncating.
    pub fn pts_to_frame(&self, pts: i64) -> i64 {
        ((pts - self.start_pts) * self.fps_num * i64::from(self.time_base.num))
            / (self.fps_den * i64::from(self.time_base.den))
    }

    /// Timestamp of a frame index, truncating.
    pub fn frame_to_pts(&self, frame: i64) -> i64 {
        (frame * self.fps_den * i64::from(self.time_base.den))
            / (self.fps_num * i64::from(self.time_base.num))
            + self.start_pts
    }

    pub fn sample_size(&self) -> usize {
        if self.bit_depth > 8 {
            2
        } else {
            1
        }
    }

    pub fn row_size(&self) -> usize {
        self.num_components as usize * self.width as usize * self.sample_size()
    }

    pub fn buffer_size(&self) -> usize {
        self.row_size() * self.height as usize
    }

    /// Forget where the decoder is; the next decode call must resynchronise.
    pub fn invalidate_cursors(&mut self) {
        self.decode_next_in = -1;
        self.decode_next_out = -1;
        self.accum_decode_latency = 0;
    }
}

/// Frame count derived from the container duration.
///
/// Containers expose the duration rounded to microsecond ticks, with unknown
/// rounding direction, so an exact frame count may come out slightly over or
/// under. One tick is subtracted before rounding up: an exact or
/// rounded-down duration still yields the right count, and a rounded-up one
/// no longer counts a phantom extra frame.
pub(crate) fn frames_from_container_duration(duration: i64, fps_num: i64, fps_den: i64) -> i64 {
    let divisor = CONTAINER_TICKS_PER_SECOND * fps_den;
    ((duration - 1) * fps_num + divisor - 1) / divisor
}

/// Some muxers round the container duration up to a whole millisecond,
/// which makes the derivation above report one frame too many. When the
/// stream's own count is within one frame of the derived count, trust the
/// stream.
pub(crate) fn reconcile_with_stream_frames(frames: i64, stream_frames: i64) -> i64 {
    if stream_frames > 0 && (frames - stream_frames).abs() <= 1 {
        stream_frames
    } else {
        frames
    }
}

/// Frame count from the stream duration, timebase and frame rate.
pub(crate) fn frames_from_stream_duration(
    duration: i64,
    time_base: Rational,
    fps_num: i64,
    fps_den: i64,
) -> i64 {
    (duration * i64::from(time_base.num) * fps_num) / (i64::from(time_base.den) * fps_den)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32) -> VideoStreamInfo {
        VideoStreamInfo {
            index: 0,
            width,
            height,
            time_base: Rational::new(1, 12800),
            frame_rate: Some(Rational::new(25, 1)),
            start_time: Some(0),
            duration: None,
            frame_count: 0,
            stream_aspect: None,
            codec_aspect: None,
            bits_per_raw_sample: Some(8),
            bits_per_pixel: 12,
            components: 3,
        }
    }

    #[test]
    fn pts_round_trips_through_frames() {
        let stream = StreamState::from_info(&info(320, 240), ColorMatrixOverride::Auto);
        for frame in 0..500 {
            assert_eq!(stream.pts_to_frame(stream.frame_to_pts(frame)), frame);
        }
    }

    #[test]
    fn pts_mapping_honours_start_offset() {
        let mut stream = StreamState::from_info(&info(320, 240), ColorMatrixOverride::Auto);
        stream.start_pts = 1024;
        assert_eq!(stream.frame_to_pts(0), 1024);
        assert_eq!(stream.pts_to_frame(1024), 0);
        assert_eq!(stream.pts_to_frame(1024 + 512), 1);
    }

    #[test]
    fn monochrome_promotes_to_three_components() {
        let mut source = info(320, 240);
        source.components = 1;
        source.bits_per_raw_sample = Some(8);
        let stream = StreamState::from_info(&source, ColorMatrixOverride::Auto);
        assert_eq!(stream.num_components, 3);
        assert_eq!(stream.output_format, OutputPixelFormat::Rgb24);
        assert_eq!(stream.row_size(), 3 * 320);
    }

    #[test]
    fn bit_depth_falls_back_to_bits_per_pixel() {
        let mut source = info(320, 240);
        source.bits_per_raw_sample = None;
        source.bits_per_pixel = 48;
        source.components = 3;
        let stream = StreamState::from_info(&source, ColorMatrixOverride::Auto);
        assert_eq!(stream.bit_depth, 16);
        assert_eq!(stream.output_format, OutputPixelFormat::Rgb48);
        assert_eq!(stream.sample_size(), 2);
    }

    #[test]
    fn unreported_frame_rate_defaults_to_one() {
        let mut source = info(320, 240);
        source.frame_rate = None;
        let stream = StreamState::from_info(&source, ColorMatrixOverride::Auto);
        assert_eq!((stream.fps_num, stream.fps_den), (1, 1));
    }

    #[test]
    fn buffer_size_is_rows_times_height() {
        let stream = StreamState::from_info(&info(320, 240), ColorMatrixOverride::Auto);
        assert_eq!(stream.buffer_size(), stream.row_size() * 240);
        assert_eq!(stream.row_size(), 3 * 320);
    }

    #[test]
    fn duration_derivation_rounds_up_partial_frames() {
        // Exactly 10 frames at 24 fps.
        let exact = 10 * CONTAINER_TICKS_PER_SECOND / 24;
        assert_eq!(frames_from_container_duration(exact, 24, 1), 10);
        // One tick over still reads as 10 after the subtract-one fudge.
        assert_eq!(frames_from_container_duration(exact + 1, 24, 1), 10);
        // A real partial frame counts as a whole one.
        assert_eq!(frames_from_container_duration(exact + 20_000, 24, 1), 11);
    }

    #[test]
    fn stream_count_wins_when_within_one_frame() {
        // 5.0042 s at 24 fps derives to 121 frames, but the stream says 120.
        let frames = frames_from_container_duration(5_004_200, 24, 1);
        assert_eq!(frames, 121);
        assert_eq!(reconcile_with_stream_frames(frames, 120), 120);
        // A larger disagreement keeps the duration-derived count.
        assert_eq!(reconcile_with_stream_frames(frames, 100), 121);
        // An unknown stream count changes nothing.
        assert_eq!(reconcile_with_stream_frames(frames, 0), 121);
    }

    #[test]
    fn stream_duration_fallback_uses_timebase() {
        let frames =
            frames_from_stream_duration(12800 * 4, Rational::new(1, 12800), 25, 1);
        assert_eq!(frames, 100);
    }
}
