use std::path::Path;

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::DetectorError;
use crate::frame::RgbFrame;
use crate::model::{TwoStreamConfig, TwoStreamDeepFakeDetector};
use crate::preprocess::{PreprocessConfig, TwoStreamInput, TwoStreamPreprocessor};
use crate::verdict::Verdict;
use crate::video;

/// Configuration of the whole detection pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Video decoding, sampling and tensor preparation.
    pub preprocess: PreprocessConfig,
    /// Network hyper-parameters, must match the checkpoint.
    pub model: TwoStreamConfig,
}

impl DetectorConfig {
    /// Read a configuration from a JSON file, missing fields take their default.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Detects deepfakes in videos with a two-stream network.
///
/// # Example
///
/// ```no_run
/// use deepfake_detector::{select_device, DeepFakeDetector, DetectorConfig, DeviceSelection};
///
/// let device = select_device(DeviceSelection::Auto)?;
/// let detector = DeepFakeDetector::new(
///     "models/deepfake_detector.pth",
///     DetectorConfig::default(),
///     device,
/// )?;
///
/// let verdict = detector.detect_video("video.mp4")?;
/// println!("{} ({:.4})", verdict.label, verdict.probability);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct DeepFakeDetector {
    model: TwoStreamDeepFakeDetector,
    preprocessor: TwoStreamPreprocessor,
    device: Device,
}

impl DeepFakeDetector {
    /// Load the model weights from `model_path` and prepare the pipeline.
    ///
    /// # Arguments
    ///
    /// * `model_path` - A `.pth` or `.safetensors` checkpoint, raw or `model_state`-wrapped.
    /// * `config` - The pipeline configuration.
    /// * `device` - The device the model runs on.
    pub fn new(
        model_path: impl AsRef<Path>,
        config: DetectorConfig,
        device: Device,
    ) -> Result<Self, DetectorError> {
        let checkpoint = Checkpoint::load(model_path, &device)?;
        Self::from_checkpoint(checkpoint, config, device)
    }

    /// Build the pipeline from already loaded parameters.
    pub fn from_checkpoint(
        checkpoint: Checkpoint,
        config: DetectorConfig,
        device: Device,
    ) -> Result<Self, DetectorError> {
        let vb = checkpoint.var_builder(&device);
        let mut model = TwoStreamDeepFakeDetector::new(&config.model, vb)?;
        model.eval();

        let preprocessor = TwoStreamPreprocessor::new(config.preprocess, &device)?;

        Ok(Self {
            model,
            preprocessor,
            device,
        })
    }

    /// The device the model runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The preprocessing configuration.
    pub fn preprocess_config(&self) -> &PreprocessConfig {
        self.preprocessor.config()
    }

    /// Decode and preprocess a video into the network input.
    pub fn preprocess_video(&self, path: impl AsRef<Path>) -> Result<TwoStreamInput, DetectorError> {
        self.preprocessor.preprocess_video(path)
    }

    /// Run the network on a preprocessed input.
    pub fn predict(&self, input: &TwoStreamInput) -> Result<Verdict, DetectorError> {
        let input = input.to_device(&self.device)?;
        let logits = self.model.forward(&input.rgb, &input.flow)?;
        let probability = candle_nn::ops::sigmoid(&logits)?
            .flatten_all()?
            .get(0)?
            .to_scalar::<f32>()?;

        let verdict = Verdict::from_probability(probability);
        log::debug!("Logits {logits}, verdict {verdict:?}");

        Ok(verdict)
    }

    /// Sample, preprocess and classify already decoded frames.
    pub fn detect_frames(&self, frames: &[RgbFrame]) -> Result<Verdict, DetectorError> {
        let sampling = self.preprocess_config().video.sampling;
        let sampled = video::sample_frames(frames, sampling);
        let input = self.preprocessor.preprocess_frames(&sampled)?;
        self.predict(&input)
    }

    /// Decode, preprocess and classify a video file.
    pub fn detect_video(&self, path: impl AsRef<Path>) -> Result<Verdict, DetectorError> {
        let input = self.preprocess_video(path)?;
        self.predict(&input)
    }
}
