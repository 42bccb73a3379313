//! Colour conversion policy.
//!
//! The reader decides *how* a frame must be converted (output pixel format,
//! YUV coefficient matrix, quantization ranges) and hands the backend a
//! [`ConvertSetup`] describing the whole conversion. The descriptor caches
//! the setup of the converter the backend currently holds; a new setup, or
//! an explicit invalidation after a colour-matrix override change, makes the
//! backend rebuild its native converter.

/// Packed output layouts handed to the caller. 16-bit samples are
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPixelFormat {
    Rgb24,
    Rgba,
    Rgb48,
    Rgba64,
}

impl OutputPixelFormat {
    pub fn components(self) -> u32 {
        match self {
            Self::Rgb24 | Self::Rgb48 => 3,
            Self::Rgba | Self::Rgba64 => 4,
        }
    }

    /// Bytes per sample: 1 for the 8-bit layouts, 2 for the 16-bit ones.
    pub fn sample_size(self) -> usize {
        match self {
            Self::Rgb24 | Self::Rgba => 1,
            Self::Rgb48 | Self::Rgba64 => 2,
        }
    }
}

/// YUV to RGB coefficient sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMatrix {
    Rec601,
    Rec709,
}

/// Host-selected coefficient override. `Auto` follows the stream tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMatrixOverride {
    #[default]
    Auto,
    Rec709,
    Rec601,
}

/// Quantization range reported by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    #[default]
    Unspecified,
    /// MPEG range, 16..235.
    Limited,
    /// JPEG range, 0..255.
    Full,
}

/// Colour characteristics of the source as currently reported by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceColor {
    pub is_yuv: bool,
    pub range: ColorRange,
    /// Whether the stream is tagged (or judged, for untagged HD material)
    /// as Rec.709.
    pub rec709: bool,
}

/// Coefficients and input range for a YUV source. Absent for RGB sources,
/// where colorspace configuration is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvColorSetup {
    pub coefficients: ColorMatrix,
    pub full_range_input: bool,
}

/// Complete description of one conversion. Doubles as the cache key for the
/// backend-held native converter: output is always full-range with neutral
/// brightness, contrast and saturation, so nothing else can vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSetup {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub dst_format: OutputPixelFormat,
    pub color: Option<YuvColorSetup>,
}

/// Output layout for a stream's bit depth and component count.
pub(crate) fn output_format_for(bit_depth: u32, components: u32) -> OutputPixelFormat {
    if bit_depth > 8 {
        if components == 4 {
            OutputPixelFormat::Rgba64
        } else {
            OutputPixelFormat::Rgb48
        }
    } else if components == 4 {
        OutputPixelFormat::Rgba
    } else {
        OutputPixelFormat::Rgb24
    }
}

/// Coefficient matrix for a YUV source: an override wins, otherwise the
/// stream tag picks Rec.709 and everything else falls back to Rec.601.
pub(crate) fn select_coefficients(
    source: &SourceColor,
    matrix_override: ColorMatrixOverride,
) -> ColorMatrix {
    match matrix_override {
        ColorMatrixOverride::Rec709 => ColorMatrix::Rec709,
        ColorMatrixOverride::Rec601 => ColorMatrix::Rec601,
        ColorMatrixOverride::Auto => {
            if source.rec709 {
                ColorMatrix::Rec709
            } else {
                ColorMatrix::Rec601
            }
        }
    }
}

/// Input quantization range: unspecified sources are assumed limited for
/// YUV and full for RGB.
pub(crate) fn input_is_full_range(source: &SourceColor) -> bool {
    match source.range {
        ColorRange::Limited => false,
        ColorRange::Full => true,
        ColorRange::Unspecified => !source.is_yuv,
    }
}

/// Assemble the conversion for a frame of `width` x `height` into
/// `dst_format` at the same size.
pub(crate) fn convert_setup(
    width: u32,
    height: u32,
    dst_format: OutputPixelFormat,
    source: &SourceColor,
    matrix_override: ColorMatrixOverride,
) -> ConvertSetup {
    let color = source.is_yuv.then(|| YuvColorSetup {
        coefficients: select_coefficients(source, matrix_override),
        full_range_input: input_is_full_range(source),
    });
    ConvertSetup {
        src_width: width,
        src_height: height,
        dst_width: width,
        dst_height: height,
        dst_format,
        color,
    }
}
