//! FFmpeg-backed container input.
//!
//! Thin adapter from the `MediaInput` seam onto `ffmpeg-next`, dropping to
//! `ffmpeg-sys-next` for the calls the safe wrapper does not expose:
//! backward seeks, scaler colorspace configuration, pixel descriptor
//! queries and the raw scale call (the safe `run` refuses the JPEG-range
//! pixel format aliasing the converter policy requires).

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use ffmpeg_next as ffmpeg;
use ffmpeg_sys_next as sys;

use ffmpeg::codec;
use ffmpeg::decoder;
use ffmpeg::format;
use ffmpeg::frame;
use ffmpeg::media;
use ffmpeg::software::scaling;
use ffmpeg::util::color;
use ffmpeg::util::error::EAGAIN;
use log::{debug, warn};

use crate::config::ReaderOptions;
use crate::convert::{ColorMatrix, ColorRange, ConvertSetup, OutputPixelFormat, SourceColor};
use crate::core::error::{InputError, ReaderError};
use crate::core::input::{MediaInput, PacketInfo, Rational, ReadEvent, VideoStreamInfo};

fn ensure_initialized() -> Result<(), ReaderError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|err| err.to_string()))
        .clone()
        .map_err(ReaderError::Open)
}

fn backend_err(err: ffmpeg::Error) -> InputError {
    InputError::Backend(err.to_string())
}

fn output_pixel(format: OutputPixelFormat) -> format::Pixel {
    match format {
        OutputPixelFormat::Rgb24 => format::Pixel::RGB24,
        OutputPixelFormat::Rgba => format::Pixel::RGBA,
        OutputPixelFormat::Rgb48 => format::Pixel::RGB48LE,
        OutputPixelFormat::Rgba64 => format::Pixel::RGBA64LE,
    }
}

struct StreamDecoder {
    decoder: decoder::Video,
    decoded: frame::Video,
    has_frame: bool,
    eof_sent: bool,
    scaler: Option<scaling::Context>,
    scaled: Option<frame::Video>,
}

pub struct FfmpegInput {
    ictx: format::context::Input,
    infos: Vec<VideoStreamInfo>,
    decoders: HashMap<usize, StreamDecoder>,
    held: Option<ffmpeg::Packet>,
    unsupported_seen: bool,
}

// The contexts are only ever driven from behind the reader's exclusive
// reference.
unsafe impl Send for FfmpegInput {}

impl FfmpegInput {
    pub fn open(path: &Path, options: &ReaderOptions) -> Result<Self, ReaderError> {
        ensure_initialized()?;
        let ictx = format::input(&path).map_err(|err| ReaderError::Open(err.to_string()))?;

        let threads = options.effective_threads();
        let mut infos = Vec::new();
        let mut decoders = HashMap::new();
        let mut unsupported_seen = false;

        for stream in ictx.streams() {
            let parameters = stream.parameters();
            if parameters.medium() != media::Type::Video {
                continue;
            }
            if decoder::find(parameters.id()).is_none() {
                debug!("stream {}: no decoder available, skipping", stream.index());
                unsupported_seen = true;
                continue;
            }
            let mut context = match codec::context::Context::from_parameters(parameters) {
                Ok(context) => context,
                Err(err) => {
                    warn!("stream {}: unusable codec parameters: {err}", stream.index());
                    continue;
                }
            };
            // Thread count must be in place before the decoder opens.
            context.set_threading(codec::threading::Config::count(threads));
            let video = match context.decoder().video() {
                Ok(video) => video,
                Err(err) => {
                    warn!("stream {}: decoder failed to open: {err}", stream.index());
                    continue;
                }
            };
            let Some(info) = describe_stream(&stream, &video) else {
                unsupported_seen = true;
                continue;
            };
            debug!(
                "stream {}: {}x{} {:?}, timebase {}/{}",
                info.index,
                info.width,
                info.height,
                video.format(),
                info.time_base.num,
                info.time_base.den,
            );
            decoders.insert(
                info.index,
                StreamDecoder {
                    decoder: video,
                    decoded: frame::Video::empty(),
                    has_frame: false,
                    eof_sent: false,
                    scaler: None,
                    scaled: None,
                },
            );
            infos.push(info);
        }

        Ok(Self {
            ictx,
            infos,
            decoders,
            held: None,
            unsupported_seen,
        })
    }

    fn entry_mut(&mut self, stream: usize) -> Result<&mut StreamDecoder, InputError> {
        self.decoders
            .get_mut(&stream)
            .ok_or(InputError::UnknownStream(stream))
    }

    fn receive(entry: &mut StreamDecoder) -> Result<bool, InputError> {
        match entry.decoder.receive_frame(&mut entry.decoded) {
            Ok(()) => {
                entry.has_frame = true;
                Ok(true)
            }
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(false),
            Err(ffmpeg::Error::Eof) => Ok(false),
            Err(err) => Err(backend_err(err)),
        }
    }
}

fn describe_stream(
    stream: &format::stream::Stream,
    video: &decoder::Video,
) -> Option<VideoStreamInfo> {
    let pix = video.format();
    if pix == format::Pixel::None {
        return None;
    }
    let (components, bits_per_pixel) = unsafe {
        let desc = sys::av_pix_fmt_desc_get(pix.into()).as_ref()?;
        (
            u32::from(desc.nb_components),
            sys::av_get_bits_per_pixel(desc) as u32,
        )
    };
    let bits_per_raw_sample = unsafe {
        let bits = (*video.as_ptr()).bits_per_raw_sample;
        (bits > 0).then_some(bits as u32)
    };
    let time_base = stream.time_base();
    let rate = stream.rate();
    let frame_rate = (rate.numerator() != 0 && rate.denominator() != 0)
        .then(|| Rational::new(rate.numerator(), rate.denominator()));
    let start_time = {
        let start = stream.start_time();
        (start != sys::AV_NOPTS_VALUE).then_some(start)
    };
    let duration = {
        let duration = stream.duration();
        (duration != sys::AV_NOPTS_VALUE && duration > 0).then_some(duration)
    };
    let stream_aspect = unsafe {
        let sar = (*stream.as_ptr()).sample_aspect_ratio;
        (sar.num != 0).then(|| f64::from(sar.num) / f64::from(sar.den))
    };
    let codec_aspect = {
        let sar = video.aspect_ratio();
        (sar.numerator() != 0).then(|| f64::from(sar.numerator()) / f64::from(sar.denominator()))
    };
    Some(VideoStreamInfo {
        index: stream.index(),
        width: video.width(),
        height: video.height(),
        time_base: Rational::new(time_base.numerator(), time_base.denominator()),
        frame_rate,
        start_time,
        duration,
        frame_count: stream.frames(),
        stream_aspect,
        codec_aspect,
        bits_per_raw_sample,
        bits_per_pixel,
        components,
    })
}

impl MediaInput for FfmpegInput {
    fn streams(&self) -> &[VideoStreamInfo] {
        &self.infos
    }

    fn container_duration(&self) -> Option<i64> {
        let duration = self.ictx.duration();
        (duration > 0).then_some(duration)
    }

    fn metadata(&self, key: &str) -> Option<String> {
        self.ictx.metadata().get(key).map(str::to_string)
    }

    fn unsupported_codec_seen(&self) -> bool {
        self.unsupported_seen
    }

    fn read_packet(&mut self) -> Result<ReadEvent, InputError> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.ictx) {
            Ok(()) => {
                let info = PacketInfo {
                    stream: packet.stream(),
                    pts: packet.pts(),
                    dts: packet.dts(),
                };
                self.held = Some(packet);
                Ok(ReadEvent::Packet(info))
            }
            Err(ffmpeg::Error::Eof) => {
                self.held = None;
                Ok(ReadEvent::Eof)
            }
            Err(err) => Err(backend_err(err)),
        }
    }

    fn send_held_packet(&mut self, stream: usize) -> Result<bool, InputError> {
        let packet = self
            .held
            .take()
            .ok_or_else(|| InputError::Backend("no packet held".to_string()))?;
        let entry = self.entry_mut(stream)?;
        match entry.decoder.send_packet(&packet) {
            Ok(()) => {}
            // Decoder input is full; surface what it holds instead.
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => {}
            Err(err) => return Err(backend_err(err)),
        }
        Self::receive(entry)
    }

    fn send_flush_packet(&mut self, stream: usize) -> Result<bool, InputError> {
        let entry = self.entry_mut(stream)?;
        if !entry.eof_sent {
            match entry.decoder.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => entry.eof_sent = true,
                Err(err) => return Err(backend_err(err)),
            }
        }
        Self::receive(entry)
    }

    fn seek(&mut self, stream: usize, timestamp: i64) -> Result<(), InputError> {
        {
            let entry = self.entry_mut(stream)?;
            entry.decoder.flush();
            entry.has_frame = false;
            entry.eof_sent = false;
        }
        self.held = None;
        let ret = unsafe {
            sys::av_seek_frame(
                self.ictx.as_mut_ptr(),
                stream as i32,
                timestamp,
                sys::AVSEEK_FLAG_BACKWARD,
            )
        };
        if ret < 0 {
            return Err(backend_err(ffmpeg::Error::from(ret)));
        }
        Ok(())
    }

    fn codec_delay(&self, stream: usize) -> i64 {
        self.decoders.get(&stream).map_or(0, |entry| unsafe {
            let ctx = entry.decoder.as_ptr();
            i64::from((*ctx).delay + (*ctx).has_b_frames)
        })
    }

    fn source_color(&self, stream: usize) -> SourceColor {
        let Some(entry) = self.decoders.get(&stream) else {
            return SourceColor {
                is_yuv: false,
                range: ColorRange::Unspecified,
                rec709: false,
            };
        };
        let video = &entry.decoder;
        let is_yuv = unsafe {
            sys::av_pix_fmt_desc_get(video.format().into())
                .as_ref()
                .is_some_and(|desc| desc.flags & sys::AV_PIX_FMT_FLAG_RGB as u64 == 0)
        };
        let range = match video.color_range() {
            color::Range::MPEG => ColorRange::Limited,
            color::Range::JPEG => ColorRange::Full,
            _ => ColorRange::Unspecified,
        };
        let rec709 = match video.color_space() {
            color::Space::BT709 => true,
            // Untagged HD material is Rec.709 in practice.
            color::Space::Unspecified => video.height() >= 720,
            _ => false,
        };
        SourceColor {
            is_yuv,
            range,
            rec709,
        }
    }

    fn build_converter(&mut self, stream: usize, setup: &ConvertSetup) -> Result<(), InputError> {
        let entry = self.entry_mut(stream)?;
        entry.scaler = None;
        entry.scaled = None;

        // The JPEG-range pixel formats are deprecated aliases; request the
        // plain variants and express the range through the colorspace
        // configuration below.
        let src_format = match entry.decoder.format() {
            format::Pixel::YUVJ420P => format::Pixel::YUV420P,
            format::Pixel::YUVJ422P => format::Pixel::YUV422P,
            format::Pixel::YUVJ444P => format::Pixel::YUV444P,
            format::Pixel::YUVJ440P => format::Pixel::YUV440P,
            other => other,
        };
        let dst_format = output_pixel(setup.dst_format);
        let mut scaler = scaling::Context::get(
            src_format,
            setup.src_width,
            setup.src_height,
            dst_format,
            setup.dst_width,
            setup.dst_height,
            scaling::Flags::BICUBIC,
        )
        .map_err(backend_err)?;

        if let Some(color) = setup.color {
            let coefficients = match color.coefficients {
                ColorMatrix::Rec709 => sys::SWS_CS_ITU709,
                ColorMatrix::Rec601 => sys::SWS_CS_ITU601,
            };
            let ret = unsafe {
                sys::sws_setColorspaceDetails(
                    scaler.as_mut_ptr(),
                    sys::sws_getCoefficients(coefficients),
                    i32::from(color.full_range_input),
                    sys::sws_getCoefficients(sys::SWS_CS_DEFAULT),
                    1,       // full-range output
                    0,       // neutral brightness
                    1 << 16, // neutral contrast
                    1 << 16, // neutral saturation
                )
            };
            if ret < 0 {
                return Err(InputError::Backend(
                    "scaler rejected colorspace configuration".to_string(),
                ));
            }
        }

        entry.scaled = Some(frame::Video::new(
            dst_format,
            setup.dst_width,
            setup.dst_height,
        ));
        entry.scaler = Some(scaler);
        Ok(())
    }

    fn convert_frame(&mut self, stream: usize, dst: &mut [u8]) -> Result<(), InputError> {
        let entry = self.entry_mut(stream)?;
        if !entry.has_frame {
            return Err(InputError::NoFrame);
        }
        let scaler = entry.scaler.as_mut().ok_or(InputError::NoConverter)?;
        let scaled = entry.scaled.as_mut().ok_or(InputError::NoConverter)?;

        // The raw scale call tolerates the JPEG-range source formats the
        // converter was normalised away from.
        let ret = unsafe {
            let src = entry.decoded.as_ptr();
            let out = scaled.as_mut_ptr();
            sys::sws_scale(
                scaler.as_mut_ptr(),
                (*src).data.as_ptr() as *const *const u8,
                (*src).linesize.as_ptr(),
                0,
                (*src).height,
                (*out).data.as_ptr(),
                (*out).linesize.as_ptr(),
            )
        };
        if ret < 0 {
            return Err(backend_err(ffmpeg::Error::from(ret)));
        }

        // Repack rows, dropping any per-row padding the scaler added.
        let height = scaled.height() as usize;
        let row_bytes = dst.len() / height;
        let stride = scaled.stride(0);
        let data = scaled.data(0);
        for (row, chunk) in dst.chunks_exact_mut(row_bytes).enumerate() {
            let start = row * stride;
            chunk.copy_from_slice(&data[start..start + row_bytes]);
        }
        Ok(())
    }
}
