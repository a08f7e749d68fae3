use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Device selection preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceSelection {
    /// Use CUDA when it is available, otherwise the CPU.
    #[default]
    Auto,
    /// Force CPU execution.
    Cpu,
    /// Force the CUDA device with the given ordinal.
    Cuda(usize),
}

/// Select the compute device.
///
/// With [`DeviceSelection::Auto`] a failure to bring up CUDA is not an error: a
/// warning is logged and the CPU is returned. Without the `cuda` feature the
/// CPU is always selected.
///
/// # Errors
///
/// Only [`DeviceSelection::Cuda`] fails, when the requested device cannot be created.
pub fn select_device(selection: DeviceSelection) -> candle_core::Result<Device> {
    match selection {
        DeviceSelection::Cpu => Ok(Device::Cpu),
        DeviceSelection::Cuda(ordinal) => Device::new_cuda(ordinal),
        DeviceSelection::Auto => match Device::cuda_if_available(0) {
            Ok(device) => Ok(device),
            Err(e) => {
                log::warn!("Failed to use CUDA, using CPU instead: {e}");
                Ok(Device::Cpu)
            }
        },
    }
}

/// Short human readable name of a device, e.g. `cpu` or `cuda`.
pub fn device_name(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_cpu() -> candle_core::Result<()> {
        let device = select_device(DeviceSelection::Cpu)?;
        assert!(device.is_cpu());
        assert_eq!(device_name(&device), "cpu");
        Ok(())
    }

    #[test]
    fn select_auto_never_fails() {
        let device = select_device(DeviceSelection::Auto);
        assert!(device.is_ok());
    }
}
