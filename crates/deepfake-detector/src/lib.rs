#![deny(missing_docs)]
//! # Deepfake detector
//!
//! Two-stream (RGB + optical flow) deepfake detection for video files.
//!
//! The crate is organised the same way the detection runs:
//!
//! - [`device`] picks the compute device (CUDA when available, CPU otherwise)
//! - [`checkpoint`] reads trained parameters from `.pth` or `.safetensors` files
//! - [`model`] holds the two-stream network
//! - [`video`] decodes and samples frames (decoding needs the `gstreamer` feature)
//! - [`flow`] computes dense optical flow between consecutive frames
//! - [`preprocess`] turns frames into the `(rgb, flow)` input pair
//! - [`verdict`] maps the network logit to a probability and a label
//! - [`detector`] ties everything together behind [`DeepFakeDetector`]

/// Checkpoint loading for raw and `model_state`-wrapped parameter mappings.
pub mod checkpoint;

/// High level detector facade.
pub mod detector;

/// Compute device selection.
pub mod device;

/// Error types for the detector.
pub mod error;

/// Dense optical flow.
pub mod flow;

/// RGB frame buffers.
pub mod frame;

/// The two-stream network.
pub mod model;

/// Two-stream preprocessing of video frames.
pub mod preprocess;

/// Probability and label of a detection.
pub mod verdict;

/// Video decoding and frame sampling.
pub mod video;

pub use crate::checkpoint::{Checkpoint, CheckpointFormat, CheckpointLayout};
pub use crate::detector::{DeepFakeDetector, DetectorConfig};
pub use crate::device::{device_name, select_device, DeviceSelection};
pub use crate::error::DetectorError;
pub use crate::frame::{FrameError, ImageSize, RgbFrame};
pub use crate::model::{TwoStreamConfig, TwoStreamDeepFakeDetector};
pub use crate::preprocess::{preprocess_two_stream, PreprocessConfig, TwoStreamInput};
pub use crate::verdict::{Label, Verdict};
