use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use deepfake_detector::{
    Checkpoint, CheckpointFormat, CheckpointLayout, DeepFakeDetector, DetectorConfig, DetectorError,
    TwoStreamConfig, TwoStreamDeepFakeDetector,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn small_model() -> TwoStreamConfig {
    TwoStreamConfig {
        channels: vec![8, 16],
        hidden_size: 16,
        dropout: 0.5,
    }
}

/// Checkpoints written in the `torch.save` format by `tests/data/make_pth_fixtures.py`.
fn pth_fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

fn pth_model() -> TwoStreamConfig {
    TwoStreamConfig {
        channels: vec![4, 8],
        hidden_size: 8,
        dropout: 0.5,
    }
}

/// Initialize a model with random weights and save it as a raw safetensors file.
fn save_random_model(dir: &Path, config: &TwoStreamConfig) -> Result<PathBuf, DetectorError> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let _model = TwoStreamDeepFakeDetector::new(config, vb)?;

    let path = dir.join("raw.safetensors");
    varmap.save(&path)?;
    Ok(path)
}

/// Rewrite a raw checkpoint the way training scripts wrap it.
fn wrap(raw: &Path, dir: &Path) -> Result<PathBuf, DetectorError> {
    let tensors = candle_core::safetensors::load(raw, &Device::Cpu)?;
    let mut wrapped = tensors
        .into_iter()
        .map(|(name, t)| (format!("model_state.{name}"), t))
        .collect::<HashMap<_, _>>();

    // training metadata stored next to the parameters
    wrapped.insert("epoch".to_string(), Tensor::new(&[12f32], &Device::Cpu)?);
    wrapped.insert(
        "model_state.rgb_stream.blocks.0.bn.num_batches_tracked".to_string(),
        Tensor::new(&[1000i64], &Device::Cpu)?,
    );

    let path = dir.join("wrapped.safetensors");
    candle_core::safetensors::save(&wrapped, &path)?;
    Ok(path)
}

fn logits(path: &Path, config: &TwoStreamConfig) -> Result<Vec<f32>, DetectorError> {
    let device = Device::Cpu;
    let vb = Checkpoint::load(path, &device)?.var_builder(&device);
    let mut model = TwoStreamDeepFakeDetector::new(config, vb)?;
    model.eval();

    let rgb = Tensor::arange(0u32, 3 * 4 * 16 * 16, &device)?
        .to_dtype(DType::F32)?
        .affine(1e-3, -1.0)?
        .reshape((1, 3, 4, 16, 16))?;
    let flow = Tensor::arange(0u32, 2 * 3 * 16 * 16, &device)?
        .to_dtype(DType::F32)?
        .affine(-1e-3, 0.5)?
        .reshape((1, 2, 3, 16, 16))?;

    Ok(model.forward(&rgb, &flow)?.flatten_all()?.to_vec1::<f32>()?)
}

#[test]
fn raw_and_wrapped_give_identical_logits() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = small_model();
    let raw = save_random_model(dir.path(), &config)?;
    let wrapped = wrap(&raw, dir.path())?;

    let raw_ckpt = Checkpoint::load(&raw, &Device::Cpu)?;
    let wrapped_ckpt = Checkpoint::load(&wrapped, &Device::Cpu)?;
    assert_eq!(raw_ckpt.layout(), CheckpointLayout::Raw);
    assert_eq!(wrapped_ckpt.layout(), CheckpointLayout::Wrapped);
    assert_eq!(raw_ckpt.len() + 1, wrapped_ckpt.len());

    let a = logits(&raw, &config)?;
    let b = logits(&wrapped, &config)?;
    assert_eq!(a.len(), 1);
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn inference_is_deterministic() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = small_model();
    let raw = save_random_model(dir.path(), &config)?;

    assert_eq!(logits(&raw, &config)?, logits(&raw, &config)?);
    Ok(())
}

#[test]
fn missing_parameter_is_an_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = small_model();
    let raw = save_random_model(dir.path(), &config)?;

    let mut tensors = candle_core::safetensors::load(&raw, &Device::Cpu)?;
    assert!(tensors.remove("fc2.bias").is_some());
    let partial = dir.path().join("partial.safetensors");
    candle_core::safetensors::save(&tensors, &partial)?;

    let detector_config = DetectorConfig {
        model: config,
        ..Default::default()
    };
    let res = DeepFakeDetector::new(&partial, detector_config, Device::Cpu);
    assert!(matches!(res, Err(DetectorError::CandleError(_))));
    Ok(())
}

#[test]
fn architecture_mismatch_is_an_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let raw = save_random_model(dir.path(), &small_model())?;

    let wider = TwoStreamConfig {
        hidden_size: 32,
        ..small_model()
    };
    let detector_config = DetectorConfig {
        model: wider,
        ..Default::default()
    };
    assert!(DeepFakeDetector::new(&raw, detector_config, Device::Cpu).is_err());
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let res = Checkpoint::load("/no/such/model.safetensors", &Device::Cpu);
    assert!(res.is_err());
}

#[test]
fn pth_raw_and_wrapped_give_identical_logits() -> TestResult {
    let raw_path = pth_fixture("raw_state_dict.pth");
    let wrapped_path = pth_fixture("wrapped_state_dict.pth");

    let raw = Checkpoint::load(&raw_path, &Device::Cpu)?;
    let wrapped = Checkpoint::load(&wrapped_path, &Device::Cpu)?;

    assert_eq!(raw.format(), CheckpointFormat::Pickle);
    assert_eq!(wrapped.format(), CheckpointFormat::Pickle);
    assert_eq!(raw.layout(), CheckpointLayout::Raw);
    assert_eq!(wrapped.layout(), CheckpointLayout::Wrapped);

    // 4 conv blocks with 6 tensors each, then fc1 and fc2; `epoch` is not a tensor
    assert_eq!(raw.len(), 28);
    assert_eq!(raw.names(), wrapped.names());

    let bias = raw.get("fc2.bias").map(|t| t.to_vec1::<f32>()).transpose()?;
    assert_eq!(bias, Some(vec![0.25]));
    let tracked = raw
        .get("rgb_stream.blocks.0.bn.num_batches_tracked")
        .map(|t| t.dtype());
    assert_eq!(tracked, Some(DType::I64));

    let a = logits(&raw_path, &pth_model())?;
    let b = logits(&wrapped_path, &pth_model())?;
    assert_eq!(a.len(), 1);
    assert!(a[0].is_finite());
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn pth_loads_into_detector() -> TestResult {
    let config = DetectorConfig {
        model: pth_model(),
        ..Default::default()
    };
    let detector = DeepFakeDetector::new(pth_fixture("wrapped_state_dict.pth"), config, Device::Cpu)?;
    assert!(detector.device().is_cpu());
    Ok(())
}
