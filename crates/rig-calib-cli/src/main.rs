use std::{fs, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use rig_calib_core::{Dataset, SelectionConfig};
use rig_calib_optim::{
    Calibration, CalibrationReport, CancelToken, LmBackend, OptimizationConfig, SensorPose,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decimal places kept for every float written by the CLI.
const OUTPUT_DECIMALS: i32 = 6;

/// Extrinsic calibration of a multi-sensor rig from a collected dataset.
#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-sensor extrinsic calibration")]
struct Args {
    /// Path to the dataset JSON file.
    #[arg(long)]
    dataset: String,

    /// Optional path to a JSON file with `optimization` and `selection` sections.
    #[arg(long)]
    config: Option<String>,

    /// Where to write the refined dataset. Defaults to `<dataset>_calibrated.json`.
    #[arg(long)]
    output: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    optimization: OptimizationConfig,
    selection: SelectionConfig,
}

#[derive(Debug, Serialize)]
struct CliReport {
    report: CalibrationReport,
    sensor_poses: Vec<SensorPose>,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Round every float in `value` to `decimals` places.
fn round_floats(value: &mut Value, decimals: i32) {
    match value {
        Value::Number(n) if n.is_f64() => {
            let scale = 10f64.powi(decimals);
            if let Some(rounded) = n
                .as_f64()
                .map(|f| (f * scale).round() / scale)
                .and_then(serde_json::Number::from_f64)
            {
                *n = rounded;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| round_floats(v, decimals)),
        Value::Object(map) => map.values_mut().for_each(|v| round_floats(v, decimals)),
        _ => {}
    }
}

fn to_rounded_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_value(value)?;
    round_floats(&mut json, OUTPUT_DECIMALS);
    Ok(serde_json::to_string_pretty(&json)?)
}

fn default_output(dataset: &str) -> String {
    let path = Path::new(dataset);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    path.with_file_name(format!("{stem}_calibrated.json"))
        .to_string_lossy()
        .into_owned()
}

/// Load, select, calibrate and write the refined dataset; returns the report JSON.
fn run_calibration_from_files(
    dataset_path: &str,
    config_path: Option<&str>,
    output_path: &str,
    cancel: &CancelToken,
) -> Result<String> {
    let mut dataset = Dataset::load(dataset_path)?;
    let config = match config_path {
        Some(path) => load_json_file::<CliConfig>(Path::new(path))?,
        None => CliConfig::default(),
    };

    let selection = config.selection.apply(&mut dataset);
    info!(
        "{} sensors, {} collections after selection ({} removed)",
        dataset.sensors.len(),
        dataset.collections.len(),
        selection.removed_collections.len()
    );

    let mut calib = Calibration::new(dataset, config.optimization);
    let report = calib
        .run(&LmBackend, cancel)
        .context("calibration failed")?;
    if !report.status.is_converged() {
        warn!("optimization ended with status {:?}", report.status);
    }
    let sensor_poses = calib.sensor_poses()?;

    let refined = calib.into_dataset();
    fs::write(output_path, to_rounded_json(&refined)?)
        .with_context(|| format!("failed to write {output_path}"))?;
    info!("wrote {output_path}");

    to_rounded_json(&CliReport {
        report,
        sensor_poses,
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping after the current iteration");
        handler_token.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.dataset));
    let json =
        run_calibration_from_files(&args.dataset, args.config.as_deref(), &output, &cancel)?;
    println!("{json}");
    Ok(())
}
