//! Background model loading and the shared model slot.
//!
//! The camera stream starts before the model has finished loading. The
//! [`ModelSlot`] lets the per-frame loop observe the loader's progress and
//! skip inference until a model is available.

use std::{
    io,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{error, info};

use crate::nn::InferenceModel;

/// Loading state of the hand landmark model.
#[derive(Clone, Default)]
pub enum LoadState {
    /// No load has been started yet.
    #[default]
    Unloaded,
    /// A loader thread is running.
    Loading,
    /// The model is ready for inference.
    Loaded(Arc<dyn InferenceModel>),
    /// Loading failed and will not be retried.
    Failed(String),
}

impl LoadState {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Unloaded => StateKind::Unloaded,
            Self::Loading => StateKind::Loading,
            Self::Loaded(_) => StateKind::Loaded,
            Self::Failed(_) => StateKind::Failed,
        }
    }
}

/// [`LoadState`] without its payloads, for logging and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Shared slot holding the model's [`LoadState`].
///
/// Clones share the same slot. Readers only ever take the lock briefly, so the
/// per-frame loop is never blocked on the loader thread.
#[derive(Clone, Default)]
pub struct ModelSlot {
    state: Arc<Mutex<LoadState>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state's kind.
    pub fn state(&self) -> StateKind {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).kind()
    }

    /// Returns the loaded model, or `None` while it isn't available.
    pub fn get(&self) -> Option<Arc<dyn InferenceModel>> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            LoadState::Loaded(model) => Some(model.clone()),
            _ => None,
        }
    }

    /// Returns the load error message, if loading failed.
    pub fn error(&self) -> Option<String> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            LoadState::Failed(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    /// Publishes a finished load attempt.
    ///
    /// A `Failed` state is terminal for the slot's consumers; no retry
    /// happens unless `load_in_background` is invoked again.
    pub fn publish(&self, result: anyhow::Result<Arc<dyn InferenceModel>>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = match result {
            Ok(model) => {
                info!("model loaded, input shape {:?}", model.input_shape());
                LoadState::Loaded(model)
            }
            Err(e) => {
                error!("model failed to load: {e:#}");
                LoadState::Failed(format!("{e:#}"))
            }
        };
    }

    /// Spawns a thread that runs `load` and publishes its result.
    ///
    /// The slot is moved to `Loading` before this returns, so callers that
    /// check the state right afterwards never observe `Unloaded`.
    pub fn load_in_background<F>(&self, load: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn InferenceModel>> + Send + 'static,
    {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = LoadState::Loading;
        let slot = self.clone();
        thread::Builder::new()
            .name("model loader".into())
            .spawn(move || slot.publish(load()))
    }
}
