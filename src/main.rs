use std::{env, path::PathBuf, process, sync::Arc};

use anyhow::{anyhow, Context};

use handmark::{
    camera::{Camera, CameraOptions, Facing},
    model::{ModelSlot, StateKind},
    nn::Loader,
    permission::{self, PermissionError},
    pipeline::{self, CycleOutcome, LaunchError, SkipReason},
};

const MODEL_ENV_VAR: &str = "HANDMARK_MODEL";
const DEFAULT_MODEL_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/models/hand_landmark_lite.onnx");

fn main() -> anyhow::Result<()> {
    handmark::init_logger!();

    let model_path = env::var_os(MODEL_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));
    log::info!("loading model from '{}'", model_path.display());

    // The camera starts streaming while the model is still loading. Frames
    // captured until then are skipped.
    println!("loading camera and model...");
    let slot = ModelSlot::new();
    let pipeline = match pipeline::launch(
        permission::request_camera(),
        &slot,
        move || {
            let network = Loader::from_path(&model_path)?.load()?;
            Ok(Arc::new(network) as _)
        },
        || Camera::open(CameraOptions::default().facing(Facing::Front).fps(30)),
    ) {
        Ok(pipeline) => pipeline,
        Err(LaunchError::Permission(e @ (PermissionError::Denied | PermissionError::NoDevice))) => {
            eprintln!("camera permission not granted ({e})");
            process::exit(1);
        }
        Err(LaunchError::Permission(PermissionError::Io(e))) => {
            return Err(e).context("failed to probe video devices");
        }
        Err(LaunchError::Camera(e)) => return Err(e),
        Err(LaunchError::Io(e)) => return Err(e.into()),
    };

    let mut model_error = None;
    for event in pipeline.events() {
        match event.outcome {
            CycleOutcome::Completed(_) => {}
            CycleOutcome::Skipped(SkipReason::ModelNotReady(StateKind::Failed)) => {
                let msg = slot.error().unwrap_or_else(|| "unknown error".into());
                model_error = Some(msg);
                break;
            }
            CycleOutcome::Skipped(_) => {}
            // Logged by the processor; the next frame may succeed again.
            CycleOutcome::Failed(_) => {}
        }
    }

    if let Some(msg) = model_error {
        drop(pipeline);
        return Err(anyhow!("model failed to load: {msg}"));
    }

    Err(anyhow!("camera stream ended unexpectedly"))
}
