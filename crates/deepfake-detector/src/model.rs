//! # Two-stream deepfake detector
//!
//! The network looks at a clip through two encoders: one over the RGB frames
//! and one over the optical flow between them. Each encoder folds time into
//! the batch, runs a small strided CNN on every frame, pools over space and
//! then over time. The two feature vectors are concatenated and a two layer
//! head produces a single logit.
//!
//! Parameter names follow the PyTorch module layout so checkpoints exported
//! from a `state_dict()` load without renaming:
//!
//! ```text
//! rgb_stream.blocks.{i}.conv.weight
//! rgb_stream.blocks.{i}.bn.{weight,bias,running_mean,running_var}
//! flow_stream.blocks.{i}...
//! fc1.{weight,bias}
//! fc2.{weight,bias}
//! ```

use candle_core::Tensor;
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Dropout, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

/// Hyper-parameters of the two-stream network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoStreamConfig {
    /// Output channels of each convolution block, shared by both streams.
    pub channels: Vec<usize>,
    /// Width of the hidden layer of the fusion head.
    pub hidden_size: usize,
    /// Dropout probability of the fusion head, only active in training mode.
    pub dropout: f32,
}

impl Default for TwoStreamConfig {
    fn default() -> Self {
        Self {
            channels: vec![32, 64, 128],
            hidden_size: 128,
            dropout: 0.5,
        }
    }
}

impl TwoStreamConfig {
    /// Check that the configuration describes a buildable network.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.channels.is_empty() || self.channels.contains(&0) {
            return Err(DetectorError::InvalidConfig(format!(
                "stream channels must be non-empty and non-zero, got {:?}",
                self.channels
            )));
        }

        if self.hidden_size == 0 {
            return Err(DetectorError::InvalidConfig(
                "hidden size must be non-zero".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(DetectorError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }

        Ok(())
    }
}

/// conv3x3 (stride 2) -> batch norm -> relu
struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBlock {
    fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let conv = candle_nn::conv2d_no_bias(in_channels, out_channels, 3, cfg, vb.pp("conv"))?;
        let bn = candle_nn::batch_norm(out_channels, 1e-5, vb.pp("bn"))?;
        Ok(Self { conv, bn })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        xs.apply(&self.conv)?.apply_t(&self.bn, train)?.relu()
    }
}

/// Per stream encoder: a clip of shape (B, C, T, H, W) to features of shape (B, F).
pub struct StreamEncoder {
    blocks: Vec<ConvBlock>,
    in_channels: usize,
    out_features: usize,
}

impl StreamEncoder {
    /// Build an encoder taking `in_channels` input channels.
    pub fn new(
        in_channels: usize,
        channels: &[usize],
        vb: VarBuilder,
    ) -> Result<Self, DetectorError> {
        let vb = vb.pp("blocks");
        let mut blocks = Vec::with_capacity(channels.len());
        let mut prev = in_channels;
        for (i, &out) in channels.iter().enumerate() {
            blocks.push(ConvBlock::new(prev, out, vb.pp(i))?);
            prev = out;
        }

        Ok(Self {
            blocks,
            in_channels,
            out_features: prev,
        })
    }

    /// Size of the feature vector produced for each clip.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Encode a clip of shape (B, C, T, H, W).
    pub fn forward_t(&self, clip: &Tensor, train: bool) -> Result<Tensor, DetectorError> {
        let (b, c, t, h, w) = clip.dims5()?;
        if c != self.in_channels {
            return Err(DetectorError::InvalidInput(format!(
                "expected {} channels, got {c}",
                self.in_channels
            )));
        }

        // fold time into the batch
        let mut xs = clip
            .permute((0, 2, 1, 3, 4))?
            .contiguous()?
            .reshape((b * t, c, h, w))?;

        for block in self.blocks.iter() {
            xs = block.forward_t(&xs, train)?;
        }

        // global average pooling, then average over time
        let xs = xs.mean((2, 3))?;
        let xs = xs.reshape((b, t, self.out_features))?.mean(1)?;

        Ok(xs)
    }
}

/// The two-stream deepfake detection network.
pub struct TwoStreamDeepFakeDetector {
    rgb_stream: StreamEncoder,
    flow_stream: StreamEncoder,
    fc1: Linear,
    fc2: Linear,
    dropout: Dropout,
    train: bool,
}

impl TwoStreamDeepFakeDetector {
    /// Number of channels of the RGB stream input.
    pub const RGB_CHANNELS: usize = 3;
    /// Number of channels of the flow stream input.
    pub const FLOW_CHANNELS: usize = 2;

    /// Build the network, reading its parameters from `vb`.
    ///
    /// Like a freshly constructed PyTorch module, the network starts in
    /// training mode; call [`TwoStreamDeepFakeDetector::eval`] before inference.
    pub fn new(config: &TwoStreamConfig, vb: VarBuilder) -> Result<Self, DetectorError> {
        config.validate()?;

        let rgb_stream = StreamEncoder::new(Self::RGB_CHANNELS, &config.channels, vb.pp("rgb_stream"))?;
        let flow_stream =
            StreamEncoder::new(Self::FLOW_CHANNELS, &config.channels, vb.pp("flow_stream"))?;

        let fused = rgb_stream.out_features() + flow_stream.out_features();
        let fc1 = candle_nn::linear(fused, config.hidden_size, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(config.hidden_size, 1, vb.pp("fc2"))?;

        Ok(Self {
            rgb_stream,
            flow_stream,
            fc1,
            fc2,
            dropout: Dropout::new(config.dropout),
            train: true,
        })
    }

    /// Switch to training mode: batch statistics and active dropout.
    pub fn train(&mut self) {
        self.train = true;
    }

    /// Switch to inference mode: running statistics and no dropout.
    pub fn eval(&mut self) {
        self.train = false;
    }

    /// Whether the network is in training mode.
    pub fn is_training(&self) -> bool {
        self.train
    }

    /// Run the network.
    ///
    /// # Arguments
    ///
    /// * `rgb` - RGB clip of shape (B, 3, T, H, W).
    /// * `flow` - Flow clip of shape (B, 2, T - 1, H, W).
    ///
    /// # Returns
    ///
    /// The logits, of shape (B, 1).
    pub fn forward(&self, rgb: &Tensor, flow: &Tensor) -> Result<Tensor, DetectorError> {
        let (rgb_b, _, rgb_t, _, _) = rgb.dims5()?;
        let (flow_b, _, flow_t, _, _) = flow.dims5()?;

        if rgb_b != flow_b {
            return Err(DetectorError::InvalidInput(format!(
                "batch size mismatch: rgb {rgb_b}, flow {flow_b}"
            )));
        }

        if flow_t + 1 != rgb_t {
            return Err(DetectorError::InvalidInput(format!(
                "flow clip must have one frame less than the rgb clip: rgb {rgb_t}, flow {flow_t}"
            )));
        }

        let rgb_features = self.rgb_stream.forward_t(rgb, self.train)?;
        let flow_features = self.flow_stream.forward_t(flow, self.train)?;

        let xs = Tensor::cat(&[rgb_features, flow_features], 1)?;
        let logits = xs
            .apply(&self.fc1)?
            .relu()?
            .apply_t(&self.dropout, self.train)?
            .apply(&self.fc2)?;

        Ok(logits)
    }
}
