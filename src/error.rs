//! Error taxonomy for the capture, processing and streaming stages

use std::path::PathBuf;

use thiserror::Error;

use crate::capture::PixelFormat;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that escape to the process boundary
#[derive(Debug, Error)]
pub enum Error {
    #[error("capture device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("capture read failed: {0}")]
    CaptureRead(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to load model {path}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stream server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Result of a single read from an open source
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Read succeeded but carried no pixels; the pass is skipped
    #[error("empty frame")]
    EmptyFrame,

    /// The source is gone; the producer loop stops
    #[error("read failed: {0}")]
    Read(String),
}

impl From<CaptureError> for Error {
    fn from(err: CaptureError) -> Self {
        Error::CaptureRead(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer holds {actual} bytes, {expected} needed for {format:?}")]
    ShortBuffer {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("jpeg: {0}")]
    Jpeg(String),

    #[error("unsupported jpeg pixel layout: {0}")]
    JpegLayout(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode empty {width}x{height} frame")]
    Empty { width: u32, height: u32 },

    #[error(transparent)]
    Image(#[from] image::ImageError),
}
