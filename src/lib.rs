//! Camera-fed hand landmark inference.
//!
//! The crate opens a V4L2 webcam, converts each captured frame to a model
//! input tensor, runs a pre-trained hand landmark network on it, and reports
//! whether a hand is present. Every per-frame stage runs strictly in
//! sequence, so at most one inference is in flight at any time.
//!
//! Environment variables:
//!
//! - `HANDMARK_CAMERA_NAME` overrides camera selection by card name.
//! - `HANDMARK_MODEL` points at the ONNX model file to load.

use log::LevelFilter;

pub mod adapter;
pub mod camera;
pub mod frame;
pub mod model;
pub mod nn;
pub mod observe;
pub mod permission;
pub mod pipeline;
pub mod resolution;
pub mod timer;
pub mod worker;

#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging for the calling crate and this library.
///
/// Logging is not initialized automatically since the application may want to
/// use its own logging framework.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
