use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::flow::{DenseOpticalFlow, OpticalFlowConfig};
use crate::frame::RgbFrame;
use crate::video::{self, VideoConfig};

/// Configuration of the two-stream preprocessing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Decoding and frame sampling.
    pub video: VideoConfig,
    /// Side of the square frames fed to the network.
    pub frame_size: usize,
    /// Per channel mean used to normalize the RGB stream.
    pub mean: [f32; 3],
    /// Per channel standard deviation used to normalize the RGB stream.
    pub std: [f32; 3],
    /// Optical flow estimation.
    pub flow: OpticalFlowConfig,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig::default(),
            frame_size: 112,
            // imagenet statistics
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            flow: OpticalFlowConfig::default(),
        }
    }
}

impl PreprocessConfig {
    /// Number of frames of the RGB clip.
    pub fn num_frames(&self) -> usize {
        self.video.sampling.num_frames()
    }

    /// Check that the configuration can produce a valid model input.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.num_frames() < 2 {
            return Err(DetectorError::InvalidConfig(format!(
                "at least 2 frames are needed for optical flow, got {}",
                self.num_frames()
            )));
        }

        if self.frame_size == 0 {
            return Err(DetectorError::InvalidConfig(
                "frame size must be non-zero".to_string(),
            ));
        }

        if self.video.max_decoded_frames < 2 {
            return Err(DetectorError::InvalidConfig(format!(
                "at least 2 decoded frames must fit in memory, got {}",
                self.video.max_decoded_frames
            )));
        }

        if self.std.iter().any(|s| *s <= 0.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "standard deviations must be positive, got {:?}",
                self.std
            )));
        }

        Ok(())
    }
}

/// The pair of clips consumed by the two-stream network.
#[derive(Debug, Clone)]
pub struct TwoStreamInput {
    /// Normalized RGB clip of shape (1, 3, T, S, S).
    pub rgb: Tensor,
    /// Normalized optical flow clip of shape (1, 2, T - 1, S, S).
    pub flow: Tensor,
}

impl TwoStreamInput {
    /// Move both clips to `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self, DetectorError> {
        Ok(Self {
            rgb: self.rgb.to_device(device)?,
            flow: self.flow.to_device(device)?,
        })
    }
}

/// Turns decoded frames into a [`TwoStreamInput`].
pub struct TwoStreamPreprocessor {
    config: PreprocessConfig,
    mean: Tensor,
    std: Tensor,
    gray_weights: Tensor,
    flow: DenseOpticalFlow,
    device: Device,
}

impl TwoStreamPreprocessor {
    // ITU-R BT.601 luma weights
    const GRAY_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

    /// Create a new preprocessor working on `device`.
    pub fn new(config: PreprocessConfig, device: &Device) -> Result<Self, DetectorError> {
        config.validate()?;

        let mean = Tensor::from_slice(&config.mean, (1, 3, 1, 1), device)?;
        let std = Tensor::from_slice(&config.std, (1, 3, 1, 1), device)?;
        let gray_weights = Tensor::from_slice(&Self::GRAY_WEIGHTS, (1, 3, 1, 1), device)?;
        let flow = DenseOpticalFlow::new(config.flow.clone(), device)?;

        Ok(Self {
            config,
            mean,
            std,
            gray_weights,
            flow,
            device: device.clone(),
        })
    }

    /// The preprocessing configuration.
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Decode, sample and preprocess a video file.
    pub fn preprocess_video(&self, path: impl AsRef<Path>) -> Result<TwoStreamInput, DetectorError> {
        let frames = video::read_video_frames(path, &self.config.video)?;
        self.preprocess_frames(&frames)
    }

    /// Preprocess already decoded frames.
    ///
    /// All the frames are used, in order. Frames may have any size, they are
    /// resized to `frame_size x frame_size`.
    ///
    /// # Errors
    ///
    /// At least two frames are required to compute the flow stream.
    pub fn preprocess_frames(&self, frames: &[RgbFrame]) -> Result<TwoStreamInput, DetectorError> {
        if frames.len() < 2 {
            return Err(DetectorError::NotEnoughFrames {
                expected: 2,
                actual: frames.len(),
            });
        }

        let resized = frames
            .iter()
            .map(|frame| self.resize_frame(frame))
            .collect::<Result<Vec<_>, _>>()?;

        // (T, 3, S, S) in [0, 1]
        let clip = Tensor::cat(&resized, 0)?.affine(1.0 / 255.0, 0.0)?;

        // flow stream from the luma channel
        let gray = clip.broadcast_mul(&self.gray_weights)?.sum_keepdim(1)?;
        let raw_flow = self.flow.compute(&gray)?;
        let flow = self.flow.normalize(&raw_flow)?;

        let rgb = clip
            .broadcast_sub(&self.mean)?
            .broadcast_div(&self.std)?;

        // (T, C, S, S) -> (1, C, T, S, S)
        let rgb = rgb.permute((1, 0, 2, 3))?.unsqueeze(0)?.contiguous()?;
        let flow = flow.permute((1, 0, 2, 3))?.unsqueeze(0)?.contiguous()?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Preprocessed {} frames: rgb {:?}, flow {:?}, mean motion {:.3} px",
                frames.len(),
                rgb.dims(),
                flow.dims(),
                DenseOpticalFlow::mean_magnitude(&raw_flow)?
            );
        }

        Ok(TwoStreamInput { rgb, flow })
    }

    /// Upload a frame and resize it to (1, 3, S, S) f32, values in [0, 255].
    fn resize_frame(&self, frame: &RgbFrame) -> Result<Tensor, DetectorError> {
        let size = self.config.frame_size;

        let mut img = frame
            .to_tensor(&self.device)?
            .to_dtype(DType::F32)?
            .permute((2, 0, 1))?
            .unsqueeze(0)?;

        // box prefilter before nearest sampling when shrinking a lot
        let factor = (frame.height() / size).min(frame.width() / size);
        if factor >= 2 {
            img = img.avg_pool2d(factor)?;
        }

        Ok(img.upsample_nearest2d(size, size)?)
    }
}

/// Decode a video file and build the two-stream input on `device`.
///
/// # Arguments
///
/// * `path` - Path to the video file.
/// * `config` - The preprocessing configuration.
/// * `device` - Device the tensors are created on.
pub fn preprocess_two_stream(
    path: impl AsRef<Path>,
    config: &PreprocessConfig,
    device: &Device,
) -> Result<TwoStreamInput, DetectorError> {
    TwoStreamPreprocessor::new(config.clone(), device)?.preprocess_video(path)
}
