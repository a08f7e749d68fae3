use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::error::DetectorError;

/// Key under which training scripts wrap the model parameters.
pub const STATE_KEY: &str = "model_state";

/// On-disk format of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// PyTorch `torch.save` output (zip or legacy pickle).
    Pickle,
    /// A `.safetensors` file.
    SafeTensors,
}

impl CheckpointFormat {
    /// Guess the format from the file extension, defaulting to [`CheckpointFormat::Pickle`].
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("safetensors") => Self::SafeTensors,
            _ => Self::Pickle,
        }
    }
}

/// Where the parameters live inside the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    /// The checkpoint is the parameter mapping itself.
    Raw,
    /// The parameter mapping is stored under [`STATE_KEY`].
    Wrapped,
}

/// The trained parameters of a model.
pub struct Checkpoint {
    tensors: HashMap<String, Tensor>,
    layout: CheckpointLayout,
    format: CheckpointFormat,
}

impl Checkpoint {
    /// Load a checkpoint and move its tensors to `device`.
    ///
    /// Both raw parameter mappings and mappings wrapped under `model_state`
    /// are accepted, the layout is detected from the content.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be parsed or holds no parameter.
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let format = CheckpointFormat::from_path(path);

        let (tensors, layout) = match format {
            CheckpointFormat::Pickle => Self::read_pickle(path)?,
            CheckpointFormat::SafeTensors => {
                let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
                unwrap_state(tensors)
            }
        };

        if tensors.is_empty() {
            return Err(DetectorError::EmptyCheckpoint(path.to_path_buf()));
        }

        let tensors = tensors
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(device)?)))
            .collect::<Result<HashMap<_, _>, DetectorError>>()?;

        log::info!(
            "Loaded {} tensors from {} ({:?}, {:?})",
            tensors.len(),
            path.display(),
            format,
            layout
        );

        Ok(Self {
            tensors,
            layout,
            format,
        })
    }

    fn read_pickle(
        path: &Path,
    ) -> Result<(HashMap<String, Tensor>, CheckpointLayout), DetectorError> {
        match candle_core::pickle::read_all_with_key(path, Some(STATE_KEY)) {
            Ok(tensors) if !tensors.is_empty() => {
                return Ok((tensors.into_iter().collect(), CheckpointLayout::Wrapped));
            }
            Ok(_) => {}
            Err(e) => log::debug!("No `{STATE_KEY}` entry in {}: {e}", path.display()),
        }

        let tensors = candle_core::pickle::read_all_with_key(path, None)?;
        Ok((tensors.into_iter().collect(), CheckpointLayout::Raw))
    }

    /// Build a checkpoint from an in-memory mapping, unwrapping `model_state.` names.
    pub fn from_tensors(tensors: HashMap<String, Tensor>) -> Self {
        let (tensors, layout) = unwrap_state(tensors);
        Self {
            tensors,
            layout,
            format: CheckpointFormat::SafeTensors,
        }
    }

    /// Number of tensors in the checkpoint.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the checkpoint holds no tensor.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// The detected layout.
    pub fn layout(&self) -> CheckpointLayout {
        self.layout
    }

    /// The on-disk format.
    pub fn format(&self) -> CheckpointFormat {
        self.format
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Parameter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.tensors.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    /// Expose the parameters as a f32 [`VarBuilder`] on `device`.
    pub fn var_builder(self, device: &Device) -> VarBuilder<'static> {
        VarBuilder::from_tensors(self.tensors, DType::F32, device)
    }
}

/// Strip the `model_state.` prefix when present.
///
/// If any name carries the prefix the mapping is [`CheckpointLayout::Wrapped`]
/// and only the prefixed entries are kept.
pub fn unwrap_state(
    tensors: HashMap<String, Tensor>,
) -> (HashMap<String, Tensor>, CheckpointLayout) {
    let prefix = format!("{STATE_KEY}.");
    if !tensors.keys().any(|k| k.starts_with(&prefix)) {
        return (tensors, CheckpointLayout::Raw);
    }

    let unwrapped = tensors
        .into_iter()
        .filter_map(|(k, t)| k.strip_prefix(&prefix).map(|name| (name.to_string(), t)))
        .collect();

    (unwrapped, CheckpointLayout::Wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(v: f32) -> candle_core::Result<Tensor> {
        Tensor::new(&[v], &Device::Cpu)
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            CheckpointFormat::from_path("models/deepfake_detector.pth"),
            CheckpointFormat::Pickle
        );
        assert_eq!(
            CheckpointFormat::from_path("model.SafeTensors"),
            CheckpointFormat::SafeTensors
        );
        assert_eq!(CheckpointFormat::from_path("model"), CheckpointFormat::Pickle);
    }

    #[test]
    fn raw_mapping_is_kept() -> candle_core::Result<()> {
        let tensors = HashMap::from([
            ("fc1.weight".to_string(), tensor(1.0)?),
            ("fc1.bias".to_string(), tensor(2.0)?),
        ]);
        let ckpt = Checkpoint::from_tensors(tensors);
        assert_eq!(ckpt.layout(), CheckpointLayout::Raw);
        assert_eq!(ckpt.names(), vec!["fc1.bias", "fc1.weight"]);
        Ok(())
    }

    #[test]
    fn wrapped_mapping_is_unwrapped() -> candle_core::Result<()> {
        let tensors = HashMap::from([
            ("model_state.fc1.weight".to_string(), tensor(1.0)?),
            ("model_state.fc1.bias".to_string(), tensor(2.0)?),
            ("epoch".to_string(), tensor(10.0)?),
        ]);
        let ckpt = Checkpoint::from_tensors(tensors);
        assert_eq!(ckpt.layout(), CheckpointLayout::Wrapped);
        assert_eq!(ckpt.len(), 2);
        assert_eq!(ckpt.names(), vec!["fc1.bias", "fc1.weight"]);

        let w = ckpt.get("fc1.weight").map(|t| t.to_vec1::<f32>()).transpose()?;
        assert_eq!(w, Some(vec![1.0]));
        Ok(())
    }

    #[test]
    fn empty_file_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.safetensors");
        let empty: HashMap<String, Tensor> = HashMap::new();
        candle_core::safetensors::save(&empty, &path)?;

        let res = Checkpoint::load(&path, &Device::Cpu);
        assert!(matches!(res, Err(DetectorError::EmptyCheckpoint(_))));
        Ok(())
    }

    #[test]
    fn garbage_file_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("deepfake_detector.pth");
        std::fs::write(&path, b"not a checkpoint")?;
        assert!(Checkpoint::load(&path, &Device::Cpu).is_err());
        Ok(())
    }
}
