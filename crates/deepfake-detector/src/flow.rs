//! Dense Lucas–Kanade optical flow.
//!
//! Flow is computed for every pair of consecutive frames of a grayscale clip
//! entirely with tensor ops, so it runs on whichever device holds the clip.

use candle_core::{DType, Device, Tensor, D};
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

/// Configuration of the dense optical flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalFlowConfig {
    /// Side of the square aggregation window, must be odd.
    pub window_size: usize,
    /// Flow magnitude (in pixels) mapped to 1.0 by [`DenseOpticalFlow::normalize`].
    pub max_magnitude: f32,
    /// Pixels whose structure tensor determinant is below this value get zero flow.
    pub min_determinant: f32,
}

impl Default for OpticalFlowConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            max_magnitude: 20.0,
            min_determinant: 1e-6,
        }
    }
}

/// Dense optical flow estimator.
pub struct DenseOpticalFlow {
    config: OpticalFlowConfig,
    sobel_x: Tensor,
    sobel_y: Tensor,
    window: Tensor,
}

impl DenseOpticalFlow {
    // normalized sobel kernels, a unit ramp has a unit gradient
    const SOBEL_X: [f32; 9] = [
        -0.125, 0.0, 0.125, //
        -0.25, 0.0, 0.25, //
        -0.125, 0.0, 0.125,
    ];
    const SOBEL_Y: [f32; 9] = [
        -0.125, -0.25, -0.125, //
        0.0, 0.0, 0.0, //
        0.125, 0.25, 0.125,
    ];

    /// Create a new flow estimator with its kernels allocated on `device`.
    ///
    /// # Errors
    ///
    /// Fails if the window size is even or zero, or if the magnitude bound is not positive.
    pub fn new(config: OpticalFlowConfig, device: &Device) -> Result<Self, DetectorError> {
        if config.window_size == 0 || config.window_size % 2 == 0 {
            return Err(DetectorError::InvalidConfig(format!(
                "flow window size must be odd, got {}",
                config.window_size
            )));
        }

        if config.max_magnitude <= 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "flow max magnitude must be positive, got {}",
                config.max_magnitude
            )));
        }

        let sobel_x = Tensor::from_slice(&Self::SOBEL_X, (1, 1, 3, 3), device)?;
        let sobel_y = Tensor::from_slice(&Self::SOBEL_Y, (1, 1, 3, 3), device)?;
        let k = config.window_size;
        let window = Tensor::ones((1, 1, k, k), DType::F32, device)?;

        Ok(Self {
            config,
            sobel_x,
            sobel_y,
            window,
        })
    }

    /// The configuration of the estimator.
    pub fn config(&self) -> &OpticalFlowConfig {
        &self.config
    }

    /// Compute the raw flow of a grayscale clip.
    ///
    /// # Arguments
    ///
    /// * `gray` - Clip of shape (T, 1, H, W) with T >= 2, values in [0, 1].
    ///
    /// # Returns
    ///
    /// Flow of shape (T - 1, 2, H, W) in pixels; channel 0 is the horizontal
    /// displacement `u`, channel 1 the vertical displacement `v`.
    pub fn compute(&self, gray: &Tensor) -> Result<Tensor, DetectorError> {
        let (t, c, h, w) = gray.dims4()?;
        if c != 1 || t < 2 {
            return Err(DetectorError::InvalidInput(format!(
                "flow expects a (T>=2, 1, H, W) clip, got {:?}",
                gray.dims()
            )));
        }

        let gray = gray.to_dtype(DType::F32)?;
        let prev = gray.narrow(0, 0, t - 1)?;
        let next = gray.narrow(0, 1, t - 1)?;

        // gradients of the mid frame and temporal difference
        let mid = ((&prev + &next)? * 0.5)?;
        let ix = mid.conv2d(&self.sobel_x, 1, 1, 1, 1)?;
        let iy = mid.conv2d(&self.sobel_y, 1, 1, 1, 1)?;
        let it = (&next - &prev)?;

        // aggregate the structure tensor terms over the window in one pass
        let products = Tensor::cat(
            &[
                (&ix * &ix)?,
                (&iy * &iy)?,
                (&ix * &iy)?,
                (&ix * &it)?,
                (&iy * &it)?,
            ],
            0,
        )?;
        let sums = products.conv2d(&self.window, self.config.window_size / 2, 1, 1, 1)?;

        let n = t - 1;
        let sxx = sums.narrow(0, 0, n)?;
        let syy = sums.narrow(0, n, n)?;
        let sxy = sums.narrow(0, 2 * n, n)?;
        let sxt = sums.narrow(0, 3 * n, n)?;
        let syt = sums.narrow(0, 4 * n, n)?;

        // solve [sxx sxy; sxy syy] [u v]^T = -[sxt syt]^T
        let det = ((&sxx * &syy)? - sxy.sqr()?)?;
        let valid = det.ge(self.config.min_determinant as f64)?;
        let ones = det.ones_like()?;
        let safe_det = valid.where_cond(&det, &ones)?;
        let zeros = det.zeros_like()?;

        let u = (((&sxy * &syt)? - (&syy * &sxt)?)? / &safe_det)?;
        let v = (((&sxy * &sxt)? - (&sxx * &syt)?)? / &safe_det)?;
        let u = valid.where_cond(&u, &zeros)?;
        let v = valid.where_cond(&v, &zeros)?;

        let flow = Tensor::cat(&[u, v], 1)?;
        debug_assert_eq!(flow.dims(), &[n, 2, h, w]);

        Ok(flow)
    }

    /// Clamp the flow to `±max_magnitude` and scale it to [-1, 1].
    pub fn normalize(&self, flow: &Tensor) -> Result<Tensor, DetectorError> {
        let m = self.config.max_magnitude;
        Ok(flow.clamp(-m, m)?.affine(1.0 / m as f64, 0.0)?)
    }

    /// Per pixel magnitude of a flow tensor of shape (N, 2, H, W).
    pub fn magnitude(flow: &Tensor) -> Result<Tensor, DetectorError> {
        Ok(flow.sqr()?.sum_keepdim(1)?.sqrt()?.squeeze(1)?)
    }

    /// Mean flow magnitude over the whole clip, a cheap motion summary.
    pub fn mean_magnitude(flow: &Tensor) -> Result<f32, DetectorError> {
        Ok(Self::magnitude(flow)?
            .flatten_all()?
            .mean(D::Minus1)?
            .to_scalar::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::IndexOp;

    fn pattern(size: usize, shift: f32) -> Vec<f32> {
        let mut data = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                let xf = x as f32 - shift;
                let v = 0.5 + 0.25 * (0.3 * xf).sin() + 0.25 * (0.2 * y as f32).cos();
                data.push(v);
            }
        }
        data
    }

    #[test]
    fn translation_is_recovered() -> Result<(), DetectorError> {
        let size = 32;
        let device = Device::Cpu;
        let mut data = pattern(size, 0.0);
        data.extend(pattern(size, 1.0));
        let clip = Tensor::from_vec(data, (2, 1, size, size), &device)?;

        let flow = DenseOpticalFlow::new(OpticalFlowConfig::default(), &device)?;
        let uv = flow.compute(&clip)?;
        assert_eq!(uv.dims(), &[1, 2, size, size]);

        let u = uv.i((0, 0, 6..26, 6..26))?.mean_all()?.to_scalar::<f32>()?;
        let v = uv.i((0, 1, 6..26, 6..26))?.mean_all()?.to_scalar::<f32>()?;
        assert_relative_eq!(u, 1.0, epsilon = 0.1);
        assert_relative_eq!(v, 0.0, epsilon = 0.1);

        let magnitude = DenseOpticalFlow::magnitude(&uv.i((.., .., 6..26, 6..26))?)?;
        assert_eq!(magnitude.dims(), &[1, 20, 20]);
        let mean = magnitude.mean_all()?.to_scalar::<f32>()?;
        assert_relative_eq!(mean, 1.0, epsilon = 0.15);
        assert!(DenseOpticalFlow::mean_magnitude(&uv)? > 0.0);
        Ok(())
    }

    #[test]
    fn static_clip_has_zero_flow() -> Result<(), DetectorError> {
        let device = Device::Cpu;
        let clip = Tensor::full(0.5f32, (3, 1, 16, 16), &device)?;

        let flow = DenseOpticalFlow::new(OpticalFlowConfig::default(), &device)?;
        let uv = flow.compute(&clip)?;
        assert_eq!(uv.dims(), &[2, 2, 16, 16]);

        let max = uv.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert_eq!(max, 0.0);
        assert_eq!(DenseOpticalFlow::mean_magnitude(&uv)?, 0.0);
        Ok(())
    }

    #[test]
    fn normalize_clamps() -> Result<(), DetectorError> {
        let device = Device::Cpu;
        let flow = DenseOpticalFlow::new(OpticalFlowConfig::default(), &device)?;
        let raw = Tensor::from_slice(&[-40.0f32, -10.0, 0.0, 10.0, 40.0], 5, &device)?;
        let norm = flow.normalize(&raw)?.to_vec1::<f32>()?;
        assert_eq!(norm, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        Ok(())
    }

    #[test]
    fn invalid_configs() {
        let device = Device::Cpu;
        let even = OpticalFlowConfig {
            window_size: 4,
            ..Default::default()
        };
        assert!(matches!(
            DenseOpticalFlow::new(even, &device),
            Err(DetectorError::InvalidConfig(_))
        ));

        let zero = OpticalFlowConfig {
            max_magnitude: 0.0,
            ..Default::default()
        };
        assert!(DenseOpticalFlow::new(zero, &device).is_err());
    }

    #[test]
    fn single_frame_is_rejected() -> Result<(), DetectorError> {
        let device = Device::Cpu;
        let flow = DenseOpticalFlow::new(OpticalFlowConfig::default(), &device)?;
        let clip = Tensor::zeros((1, 1, 8, 8), DType::F32, &device)?;
        assert!(matches!(
            flow.compute(&clip),
            Err(DetectorError::InvalidInput(_))
        ));
        Ok(())
    }
}
