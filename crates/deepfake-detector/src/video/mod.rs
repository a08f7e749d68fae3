//! Video loading with frame sampling.
//!
//! Decoding goes through GStreamer and requires the `gstreamer` feature:
//!
//! ```toml
//! [dependencies]
//! deepfake-detector = { version = "0.1", features = ["gstreamer"] }
//! ```
//!
//! Sampling is independent of the backend, see [`sample_indices`].

#[cfg(feature = "gstreamer")]
mod reader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::frame::{FrameError, ImageSize, RgbFrame};

#[cfg(feature = "gstreamer")]
pub use self::reader::VideoReader;

/// An error type for the video module.
#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    /// The crate was built without a video decoding backend.
    #[error("Video decoding is not available, rebuild with the `gstreamer` feature")]
    BackendUnavailable,

    /// The video path cannot be handed to the decoder.
    #[error("Video path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),

    /// The video did not yield a single frame.
    #[error("No frames could be decoded from {0}")]
    EmptyVideo(String),

    /// An error occurred during GStreamer initialization or pipeline parsing.
    #[cfg(feature = "gstreamer")]
    #[error(transparent)]
    GStreamerError(#[from] gstreamer::glib::Error),

    /// An error occurred during GStreamer downcast of a pipeline element.
    #[cfg(feature = "gstreamer")]
    #[error("Failed to downcast pipeline")]
    DowncastPipelineError(gstreamer::Element),

    /// The appsink element could not be found in the pipeline.
    #[error("Failed to get an element by name")]
    GetElementByNameError,

    /// An error occurred while changing the pipeline state.
    #[cfg(feature = "gstreamer")]
    #[error(transparent)]
    SetPipelineStateError(#[from] gstreamer::StateChangeError),

    /// An error occurred while mapping a sample buffer.
    #[cfg(feature = "gstreamer")]
    #[error(transparent)]
    MapBufferError(#[from] gstreamer::glib::BoolError),

    /// The sample carried no usable caps.
    #[error("Failed caps: {0}")]
    GetCapsError(String),

    /// The sample carried no buffer.
    #[error("Failed to get the buffer from the sample")]
    GetBufferError,

    /// The pipeline posted an error on its bus.
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Frames were requested from a reader that was not started.
    #[error("Pipeline is not running")]
    PipelineNotRunning,

    /// A decoded buffer could not be turned into a frame.
    #[error(transparent)]
    FrameError(#[from] FrameError),
}

/// How frames are picked from the decoded video.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameSampling {
    /// Sample `n` frames spread evenly over the whole video.
    ///
    /// The whole stream is decoded. Long videos are thinned out while decoding
    /// so that at most [`VideoConfig::max_decoded_frames`] frames are held.
    Uniform(usize),
    /// Take the first `n` frames. Decoding stops after them.
    FirstN(usize),
}

impl FrameSampling {
    /// Number of frames produced by this sampling.
    pub fn num_frames(&self) -> usize {
        match *self {
            FrameSampling::Uniform(n) | FrameSampling::FirstN(n) => n,
        }
    }
}

/// Configuration of the video decoding stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames are scaled to this size by the decoder.
    pub decode_size: ImageSize,
    /// Upper bound on the number of decoded frames kept in memory, at least 2.
    pub max_decoded_frames: usize,
    /// Sampling applied to the decoded frames.
    pub sampling: FrameSampling,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            decode_size: ImageSize {
                width: 224,
                height: 224,
            },
            max_decoded_frames: 512,
            sampling: FrameSampling::Uniform(16),
        }
    }
}

/// Compute the indices of the frames to keep out of `total` decoded frames.
///
/// Whenever `total > 0` exactly `sampling.num_frames()` indices are returned, all
/// of them in `0..total` and in non-decreasing order. Videos shorter than the
/// request repeat frames. An empty video yields no index.
pub fn sample_indices(total: usize, sampling: FrameSampling) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }

    match sampling {
        FrameSampling::Uniform(n) => {
            if n == 1 {
                return vec![total / 2];
            }
            (0..n)
                .map(|i| {
                    let idx = (i as f64 * (total as f64 - 1.0) / (n as f64 - 1.0)).round();
                    (idx as usize).min(total - 1)
                })
                .collect()
        }
        FrameSampling::FirstN(n) => (0..n).map(|i| i.min(total - 1)).collect(),
    }
}

/// A bounded store of decoded frames spread over a stream of unknown length.
///
/// Every `stride`-th frame is kept. When the store is full the stride doubles
/// and every other kept frame is dropped, so the kept frames always cover the
/// whole stream seen so far with at most `capacity` items.
#[cfg_attr(not(feature = "gstreamer"), allow(dead_code))]
pub(crate) struct StridedFrames<T> {
    items: Vec<(usize, T)>,
    capacity: usize,
    stride: usize,
    seen: usize,
}

#[cfg_attr(not(feature = "gstreamer"), allow(dead_code))]
impl<T: Clone> StridedFrames<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            stride: 1,
            seen: 0,
        }
    }

    /// Offer the next frame of the stream.
    pub(crate) fn push(&mut self, item: T) {
        let index = self.seen;
        self.seen += 1;

        if index % self.stride != 0 {
            return;
        }

        if self.items.len() == self.capacity {
            self.stride *= 2;
            let stride = self.stride;
            self.items.retain(|(i, _)| i % stride == 0);
            if index % stride != 0 {
                return;
            }
        }

        self.items.push((index, item));
    }

    /// Number of frames offered so far.
    pub(crate) fn seen(&self) -> usize {
        self.seen
    }

    /// Number of frames currently held.
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Distance between two held frames in the stream.
    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    /// Sample over all the frames seen, each index mapped to the nearest held frame.
    pub(crate) fn sample(&self, sampling: FrameSampling) -> Vec<T> {
        sample_indices(self.seen, sampling)
            .into_iter()
            .filter_map(|target| self.nearest(target))
            .collect()
    }

    fn nearest(&self, target: usize) -> Option<T> {
        let after = self.items.partition_point(|(i, _)| *i <= target);
        let below = after.checked_sub(1).and_then(|k| self.items.get(k));
        let above = self.items.get(after);

        let (_, item) = match (below, above) {
            (Some(b), Some(a)) if a.0 - target < target - b.0 => a,
            (Some(b), _) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        Some(item.clone())
    }
}

/// Pick the sampled frames out of the decoded ones.
pub fn sample_frames(frames: &[RgbFrame], sampling: FrameSampling) -> Vec<RgbFrame> {
    sample_indices(frames.len(), sampling)
        .into_iter()
        .map(|idx| frames[idx].clone())
        .collect()
}

/// Decode a video file and return its sampled frames.
///
/// # Arguments
///
/// * `path` - Path to the video file.
/// * `config` - Decoding size, memory bound and sampling.
///
/// # Errors
///
/// Returns [`VideoError::EmptyVideo`] when nothing could be decoded and
/// [`VideoError::BackendUnavailable`] when built without the `gstreamer` feature.
#[cfg(feature = "gstreamer")]
pub fn read_video_frames(
    path: impl AsRef<Path>,
    config: &VideoConfig,
) -> Result<Vec<RgbFrame>, VideoError> {
    let path = path.as_ref();

    let mut reader = VideoReader::new(path, config.decode_size)?;
    reader.start()?;

    let (frames, seen) = match config.sampling {
        FrameSampling::FirstN(n) => {
            // the first n frames are all we need
            let mut decoded = Vec::with_capacity(n);
            while decoded.len() < n {
                match reader.read()? {
                    Some(frame) => decoded.push(frame),
                    None => break,
                }
            }
            let seen = decoded.len();
            (sample_frames(&decoded, config.sampling), seen)
        }
        FrameSampling::Uniform(_) => {
            let mut decoded = StridedFrames::new(config.max_decoded_frames);
            while let Some(frame) = reader.read()? {
                decoded.push(frame);
            }
            if decoded.stride() > 1 {
                log::debug!(
                    "Kept {} of {} decoded frames of {} (every {}th)",
                    decoded.len(),
                    decoded.seen(),
                    path.display(),
                    decoded.stride()
                );
            }
            (decoded.sample(config.sampling), decoded.seen())
        }
    };

    reader.close()?;

    if seen == 0 {
        return Err(VideoError::EmptyVideo(path.display().to_string()));
    }

    log::debug!(
        "Sampled {} frames out of {} decoded frames with {:?}",
        frames.len(),
        seen,
        config.sampling
    );

    Ok(frames)
}

/// Decode a video file and return its sampled frames.
///
/// This build has no decoding backend and always returns
/// [`VideoError::BackendUnavailable`]; enable the `gstreamer` feature.
#[cfg(not(feature = "gstreamer"))]
pub fn read_video_frames(
    path: impl AsRef<Path>,
    _config: &VideoConfig,
) -> Result<Vec<RgbFrame>, VideoError> {
    log::debug!("Cannot decode {}: no video backend", path.as_ref().display());
    Err(VideoError::BackendUnavailable)
}
