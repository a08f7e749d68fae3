use std::path::PathBuf;

use crate::frame::FrameError;
use crate::video::VideoError;

/// An error type for the detector.
#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    /// Error from the tensor runtime (shape mismatch, missing parameter, device failure).
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Error while decoding or sampling the video.
    #[error(transparent)]
    VideoError(#[from] VideoError),

    /// Error while building a frame buffer.
    #[error(transparent)]
    FrameError(#[from] FrameError),

    /// Error while reading a file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Error while parsing a JSON configuration.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// The checkpoint did not contain any parameter.
    #[error("Checkpoint holds no parameters: {0}")]
    EmptyCheckpoint(PathBuf),

    /// The number of frames handed to the preprocessor is unusable.
    #[error("Expected at least {expected} frames, got {actual}")]
    NotEnoughFrames {
        /// Minimum number of frames.
        expected: usize,
        /// Number of frames provided.
        actual: usize,
    },

    /// A model input does not have the expected layout.
    #[error("Invalid model input: {0}")]
    InvalidInput(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
