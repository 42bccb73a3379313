//! Frame-accurate random access over compressed video containers.
//!
//! Given a path to a container, [`FrameReader`] exposes a frame-indexed
//! view: ask for any frame number and get it decoded, colour-converted and
//! packed into a caller-visible RGB(A) buffer. The work lives in mapping
//! frame indices to container timestamps, resynchronising after seeks into
//! a non-linear stream, and detecting and recovering from decoders that
//! stall on files with broken indices.
//!
//! Container access goes through the [`MediaInput`] seam; the `ffmpeg`
//! backend (feature `backend-ffmpeg`) reads real files, while the always
//! available `mock` backend plays back scripted packet timelines.

pub mod backends;
mod config;
mod convert;
pub mod core;
mod reader;
mod stream;

pub use crate::config::{available_backends, Backend, ReaderOptions};
pub use crate::convert::{
    ColorMatrix, ColorMatrixOverride, ColorRange, ConvertSetup, OutputPixelFormat, SourceColor,
    YuvColorSetup,
};
pub use crate::core::error::{InputError, ReaderError};
pub use crate::core::input::{
    DynMediaInput, MediaInput, PacketInfo, Rational, ReadEvent, TimestampSource, VideoStreamInfo,
    CONTAINER_TICKS_PER_SECOND,
};
pub use crate::reader::{FrameReader, VideoInfo};

/// Whether a filename looks like a single-image file the enclosing host
/// should route to an image reader instead of this one.
pub fn is_image_file(filename: &str) -> bool {
    let Some((_, extension)) = filename.rsplit_once('.') else {
        return false;
    };
    matches!(
        extension.to_ascii_lowercase().as_str(),
        "bmp"
            | "pix"
            | "dpx"
            | "exr"
            | "jpeg"
            | "jpg"
            | "png"
            | "ppm"
            | "ptx"
            | "tiff"
            | "tga"
            | "rgba"
            | "rgb"
    )
}

#[cfg(test)]
mod tests {
    use super::is_image_file;

    #[test]
    fn image_extensions_are_recognised() {
        assert!(is_image_file("frame.0001.exr"));
        assert!(is_image_file("picture.PNG"));
        assert!(is_image_file("scan.Tiff"));
        assert!(is_image_file("plate.dpx"));
    }

    #[test]
    fn movie_files_and_bare_names_are_not() {
        assert!(!is_image_file("clip.mov"));
        assert!(!is_image_file("clip.mp4"));
        assert!(!is_image_file("no_extension"));
        assert!(!is_image_file(""));
    }
}
