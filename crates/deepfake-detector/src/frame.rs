use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

/// An error type for the frame module.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    /// Error when the pixel buffer length does not match the frame size.
    #[error("Data length ({0}) does not match the frame size ({1})")]
    InvalidChannelShape(usize, usize),

    /// Error when the frame has no pixels.
    #[error("Frame size must be non-zero, got {0}")]
    EmptyFrame(ImageSize),
}

/// Image size in pixels
///
/// # Examples
///
/// ```
/// use deepfake_detector::ImageSize;
///
/// let size: ImageSize = [224, 112].into();
///
/// assert_eq!(size.width, 224);
/// assert_eq!(size.height, 112);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// A decoded video frame with interleaved 8-bit RGB pixels.
///
/// The pixel buffer is laid out as (H, W, 3) in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct RgbFrame {
    size: ImageSize,
    data: Vec<u8>,
}

impl RgbFrame {
    /// Create a new frame from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the frame in pixels.
    /// * `data` - The interleaved RGB pixel data.
    ///
    /// # Errors
    ///
    /// If the frame is empty or the length of the pixel data does not match the size.
    pub fn new(size: ImageSize, data: Vec<u8>) -> Result<Self, FrameError> {
        if size.width == 0 || size.height == 0 {
            return Err(FrameError::EmptyFrame(size));
        }

        let expected = size.width * size.height * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidChannelShape(data.len(), expected));
        }

        Ok(Self { size, data })
    }

    /// Create a new frame with every channel of every pixel set to `val`.
    pub fn from_size_val(size: ImageSize, val: u8) -> Result<Self, FrameError> {
        Self::new(size, vec![val; size.width * size.height * 3])
    }

    /// The size of the frame in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The width of the frame in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// The height of the frame in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// The raw pixel data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Upload the frame to `device` as a `u8` tensor of shape (H, W, 3).
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(
            self.data.as_slice(),
            (self.size.height, self.size.width, 3),
            device,
        )
    }
}
