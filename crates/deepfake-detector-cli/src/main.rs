mod paths;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use argh::FromArgs;
use serde::Serialize;

use deepfake_detector::{
    device_name, select_device, DeepFakeDetector, DetectorConfig, DetectorError, DeviceSelection,
    Label,
};

#[derive(FromArgs)]
/// Tell whether a video is a deepfake with a two-stream (RGB + optical flow) network.
///
/// Exits with 0 for a real video and 1 for a deepfake.
struct Args {
    /// path to the video file
    #[argh(positional)]
    video_path: PathBuf,

    /// path to the model weights [default: <exe_dir>/../models/deepfake_detector.pth]
    #[argh(option, short = 'm')]
    model: Option<PathBuf>,

    /// run on the CPU even when CUDA is available
    #[argh(switch)]
    cpu: bool,

    /// path to a JSON file with the detector configuration
    #[argh(option)]
    config: Option<PathBuf>,

    /// print a single JSON report instead of the status lines
    #[argh(switch)]
    json: bool,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("Video not found: {}", .0.display())]
    VideoNotFound(PathBuf),

    #[error("Model weights not found at: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Failed to resolve a path")]
    Path(#[source] std::io::Error),

    #[error(transparent)]
    Detector(#[from] DetectorError),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) => 2,
            CliError::VideoNotFound(_) => 3,
            CliError::ModelNotFound(_) => 4,
            CliError::Path(_) | CliError::Detector(_) => 5,
        }
    }
}

/// Machine readable outcome, printed with `--json`.
#[derive(Serialize)]
struct DetectionReport<'a> {
    video: &'a Path,
    model: &'a Path,
    device: &'static str,
    probability: f32,
    label: Label,
    exit_code: u8,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => return fail(e),
    };

    match run(&args) {
        Ok(label) => ExitCode::from(label.exit_code()),
        Err(e) => fail(e),
    }
}

/// Parse the command line, `None` means help was requested and printed.
fn parse_args() -> Result<Option<Args>, CliError> {
    let args = std::env::args().collect::<Vec<_>>();
    let (cmd, rest) = match args.split_first() {
        Some((cmd, rest)) => (cmd.as_str(), rest),
        None => ("deepfake-detector", &[][..]),
    };
    let cmd = Path::new(cmd)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(cmd);
    let rest = rest.iter().map(String::as_str).collect::<Vec<_>>();

    match Args::from_args(&[cmd], &rest) {
        Ok(args) => Ok(Some(args)),
        Err(early_exit) => match early_exit.status {
            Ok(()) => {
                println!("{}", early_exit.output);
                Ok(None)
            }
            Err(()) => Err(CliError::Usage(early_exit.output)),
        },
    }
}

fn run(args: &Args) -> Result<Label, CliError> {
    if !args.video_path.is_file() {
        return Err(CliError::VideoNotFound(args.video_path.clone()));
    }

    let model_path = match &args.model {
        Some(path) => paths::absolute(path).map_err(CliError::Path)?,
        None => paths::default_model_path(&paths::executable_dir().map_err(CliError::Path)?),
    };
    if !model_path.is_file() {
        return Err(CliError::ModelNotFound(model_path));
    }

    let config = match &args.config {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None => DetectorConfig::default(),
    };

    let status = |msg: &str| {
        if !args.json {
            println!("{msg}");
        }
    };

    let selection = if args.cpu {
        DeviceSelection::Cpu
    } else {
        DeviceSelection::Auto
    };
    let device = select_device(selection).map_err(DetectorError::from)?;
    let device_label = device_name(&device);
    status(&format!("Device: {device_label}"));

    status("Loading model...");
    log::info!("Loading weights from {}", model_path.display());
    let detector = DeepFakeDetector::new(&model_path, config, device)?;

    status("Processing video (RGB + flow)...");
    let input = detector.preprocess_video(&args.video_path)?;

    status("Running inference...");
    let verdict = detector.predict(&input)?;

    if args.json {
        let report = DetectionReport {
            video: &args.video_path,
            model: &model_path,
            device: device_label,
            probability: verdict.probability,
            label: verdict.label,
            exit_code: verdict.label.exit_code(),
        };
        let json = serde_json::to_string(&report).map_err(DetectorError::from)?;
        println!("{json}");
    } else {
        println!("DeepFake probability: {:.4}", verdict.probability);
        println!("Result: {}", verdict.label);
    }

    Ok(verdict.label)
}

fn fail(err: CliError) -> ExitCode {
    match &err {
        CliError::Usage(output) => eprintln!("{output}"),
        _ => {
            log::error!("{err}");
            eprintln!("Error: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = std::error::Error::source(cause);
            }
        }
    }

    ExitCode::from(err.exit_code())
}
