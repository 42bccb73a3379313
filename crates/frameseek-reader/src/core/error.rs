use thiserror::Error;

/// Errors raised by a container backend.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("{0}")]
    Backend(String),
    #[error("unknown stream index {0}")]
    UnknownStream(usize),
    #[error("no decoded frame is available for conversion")]
    NoFrame,
    #[error("no converter has been built for this stream")]
    NoConverter,
}

/// Errors surfaced by the reader. Every failed `decode` call also stores
/// the rendered message so hosts polling `last_error` see the same text.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to open input: {0}")]
    Open(String),
    #[error("unsupported codec")]
    UnsupportedCodec,
    #[error("unable to find video stream")]
    NoVideoStream,
    #[error("missing frame {frame}")]
    MissingFrame { frame: i64 },
    #[error("failed to seek frame: {source}")]
    Seek {
        #[source]
        source: InputError,
    },
    #[error("failed to read frame: {source}")]
    Read {
        #[source]
        source: InputError,
    },
    #[error("failed to decode frame: {source}")]
    Decode {
        #[source]
        source: InputError,
    },
    #[error("failed to convert frame: {source}")]
    Convert {
        #[source]
        source: InputError,
    },
    #[error("failed to find timing reference frame, possible file corruption")]
    TimingReference,
    #[error("failed to find decode reference frame, possible file corruption")]
    DecodeReference,
    #[error("detected decoding stall, possible file corruption")]
    DecodeStall,
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
    #[error("backend '{0}' is not compiled in this build")]
    BackendUnavailable(&'static str),
}
