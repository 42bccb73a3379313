use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::thread;

use crate::convert::ColorMatrixOverride;
use crate::core::error::ReaderError;
use crate::core::input::DynMediaInput;

/// Available container backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Scripted synthetic input, always compiled.
    Mock,
    #[cfg(feature = "backend-ffmpeg")]
    FFmpeg,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            #[cfg(feature = "backend-ffmpeg")]
            Backend::FFmpeg => "ffmpeg",
        }
    }
}

impl FromStr for Backend {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            #[cfg(not(feature = "backend-ffmpeg"))]
            "ffmpeg" => Err(ReaderError::BackendUnavailable("ffmpeg")),
            #[cfg(feature = "backend-ffmpeg")]
            "ffmpeg" => Ok(Backend::FFmpeg),
            other => Err(ReaderError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backends compiled into this build, real backends first.
pub fn available_backends() -> Vec<Backend> {
    let mut backends = Vec::new();
    #[cfg(feature = "backend-ffmpeg")]
    backends.push(Backend::FFmpeg);
    backends.push(Backend::Mock);
    backends
}

fn default_backend() -> Backend {
    available_backends()
        .into_iter()
        .find(|backend| !matches!(backend, Backend::Mock))
        .unwrap_or(Backend::Mock)
}

/// One decoding thread per processor, capped so wide machines don't drown
/// the decoder in threads.
pub(crate) fn decoding_threads() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .clamp(1, 16)
}

/// Reader construction options. Purely programmatic: the reader is a
/// library component and reads no environment or files.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub backend: Backend,
    pub color_matrix_override: ColorMatrixOverride,
    /// Decoder thread count; `None` means one per processor, capped at 16.
    pub decode_threads: Option<usize>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            color_matrix_override: ColorMatrixOverride::default(),
            decode_threads: None,
        }
    }
}

impl ReaderOptions {
    pub(crate) fn effective_threads(&self) -> usize {
        self.decode_threads
            .unwrap_or_else(decoding_threads)
            .clamp(1, 16)
    }

    pub(crate) fn create_input(&self, path: &Path) -> Result<DynMediaInput, ReaderError> {
        match self.backend {
            Backend::Mock => {
                let _ = path;
                Ok(Box::new(crate::backends::mock::MockInput::synthetic()))
            }
            #[cfg(feature = "backend-ffmpeg")]
            Backend::FFmpeg => crate::backends::ffmpeg::FfmpegInput::open(path, self)
                .map(|input| Box::new(input) as DynMediaInput),
        }
    }
}
