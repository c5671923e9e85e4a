//! Per-frame processing and the capture/inference pipeline.
//!
//! Each frame goes through one strictly sequential cycle: check that the
//! model is loaded, adapt the frame to the model's input tensor, run
//! inference, and interpret the outputs. Frames arriving while a cycle is in
//! flight are dropped rather than queued, so inference latency never builds
//! up a backlog.

use std::{
    io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::Receiver;
use log::{debug, error, trace};

use crate::{
    adapter::{FrameTensorizer, LayoutError},
    frame::{Frame, FrameError},
    model::{ModelSlot, StateKind},
    nn::{InferenceModel, Inputs, ShapeError},
    observe::{Observation, Observer},
    permission::PermissionError,
    timer::{FpsCounter, Timer},
    worker::Worker,
};

/// Error produced by one frame's processing cycle.
///
/// A failed cycle only affects its own frame; the pipeline continues with the
/// next one.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("frame conversion failed: {0}")]
    Format(#[from] FrameError),
    #[error("{0}")]
    Shape(#[from] ShapeError),
    #[error("{0}")]
    Layout(#[from] LayoutError),
    #[error("inference failed: {0}")]
    Inference(anyhow::Error),
}

/// Why a frame was skipped without running inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The model slot holds no loaded model (still loading, or failed).
    ModelNotReady(StateKind),
}

/// The result of processing one frame.
#[derive(Debug)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(Observation),
    Failed(CycleError),
}

/// Runs the per-frame cycle: adapt, infer, observe.
pub struct FrameProcessor {
    slot: ModelSlot,
    observer: Observer,
    tensorizer: Option<FrameTensorizer>,
    t_adapt: Timer,
    t_infer: Timer,
    fps: FpsCounter,
}

impl FrameProcessor {
    /// Creates a processor that derives its input adapter from the loaded
    /// model's input shape.
    pub fn new(slot: ModelSlot, observer: Observer) -> Self {
        Self {
            slot,
            observer,
            tensorizer: None,
            t_adapt: Timer::new("adapt"),
            t_infer: Timer::new("infer"),
            fps: FpsCounter::new("pipeline"),
        }
    }

    /// Creates a processor with a fixed input adapter.
    pub fn with_tensorizer(slot: ModelSlot, observer: Observer, tensorizer: FrameTensorizer) -> Self {
        Self {
            tensorizer: Some(tensorizer),
            ..Self::new(slot, observer)
        }
    }

    /// Processes a single frame.
    ///
    /// Returns without inferring while the model is not loaded. Blocks for
    /// the duration of inference otherwise.
    pub fn process(&mut self, frame: &Frame) -> CycleOutcome {
        let state = self.slot.state();
        let Some(model) = self.slot.get() else {
            trace!("frame skipped, model state is {state:?}");
            return CycleOutcome::Skipped(SkipReason::ModelNotReady(state));
        };
        match self.run_cycle(&*model, frame) {
            Ok(observation) => CycleOutcome::Completed(observation),
            Err(e) => {
                error!("frame processing failed: {e}");
                CycleOutcome::Failed(e)
            }
        }
    }

    fn run_cycle(
        &mut self,
        model: &dyn InferenceModel,
        frame: &Frame,
    ) -> Result<Observation, CycleError> {
        if self.tensorizer.is_none() {
            let tensorizer = FrameTensorizer::for_model(model)?;
            debug!(
                "derived input adapter: {}x{}, {:?}",
                tensorizer.width(),
                tensorizer.height(),
                tensorizer.layout(),
            );
            self.tensorizer = Some(tensorizer);
        }
        let tensorizer = self.tensorizer.as_ref().unwrap();

        let tensor = self.t_adapt.time(|| tensorizer.tensorize(frame))?;
        model.check_input(&tensor)?;
        let outputs = self
            .t_infer
            .time(|| model.run(&Inputs::from(tensor)))
            .map_err(CycleError::Inference)?;
        let observation = self.observer.observe(&outputs);

        self.fps.tick_with([&self.t_adapt, &self.t_infer]);
        Ok(observation)
    }
}

/// One processed (or skipped) frame, as reported by [`Pipeline::events`].
#[derive(Debug)]
pub struct PipelineEvent {
    /// Index of the frame in capture order, counting dropped frames too.
    pub frame_index: u64,
    pub outcome: CycleOutcome,
}

/// A running capture/inference pipeline.
///
/// Dropping the pipeline stops the capture thread and joins it, propagating
/// any panic from the capture or processing threads.
pub struct Pipeline {
    events: Receiver<PipelineEvent>,
    capture: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    /// Spawns the capture thread and the frame processing worker.
    ///
    /// `source` is polled on a dedicated thread. Each captured frame is
    /// handed to the processing worker only if the worker is idle; otherwise
    /// it is dropped. The source is abandoned when it yields an error.
    pub fn spawn<S>(source: S, mut processor: FrameProcessor) -> io::Result<Self>
    where
        S: IntoIterator<Item = anyhow::Result<Frame>> + Send + 'static,
        S::IntoIter: Send,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = crossbeam::channel::unbounded();

        let worker_stop = stop.clone();
        let mut worker = Worker::builder().name("frame processor").spawn(
            move |(frame_index, frame): (u64, Frame)| {
                let outcome = processor.process(&frame);
                let event = PipelineEvent {
                    frame_index,
                    outcome,
                };
                if events_tx.send(event).is_err() {
                    // Nobody is listening anymore.
                    worker_stop.store(true, Ordering::Relaxed);
                }
            },
        )?;

        let capture_stop = stop.clone();
        let capture = thread::Builder::new()
            .name("camera capture".into())
            .spawn(move || {
                let mut frame_index = 0u64;
                let mut dropped = 0u64;
                for res in source {
                    if capture_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match res {
                        Ok(frame) => {
                            if !worker.try_send((frame_index, frame)) {
                                dropped += 1;
                                trace!("frame {frame_index} dropped, previous cycle still running");
                            }
                            frame_index += 1;
                        }
                        Err(e) => {
                            error!("camera stream ended: {e:#}");
                            break;
                        }
                    }
                }
                if dropped > 0 {
                    debug!("dropped {dropped} of {frame_index} captured frames");
                }
            })?;

        Ok(Self {
            events: events_rx,
            capture: Some(capture),
            stop,
        })
    }

    /// Iterates over processed frames, blocking until the next one.
    ///
    /// The iterator ends when the frame source is exhausted or failed.
    pub fn events(&self) -> impl Iterator<Item = PipelineEvent> + '_ {
        self.events.iter()
    }

    /// Signals the capture thread to stop after its current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.capture.take() {
            match handle.join() {
                Ok(()) => {}
                Err(payload) => {
                    if !thread::panicking() {
                        resume_unwind(payload);
                    }
                }
            }
        }
    }
}

/// Error produced by [`launch`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("failed to open camera: {0}")]
    Camera(anyhow::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Runs the gated startup sequence and spawns the pipeline.
///
/// `gate` is checked first: when camera access is unavailable, neither the
/// model loader nor the frame source is ever invoked. Otherwise the model
/// load starts in the background, the frame source is opened, and the
/// capture/inference pipeline is spawned on it.
pub fn launch<S, L, F>(
    gate: Result<(), PermissionError>,
    slot: &ModelSlot,
    load: L,
    source: F,
) -> Result<Pipeline, LaunchError>
where
    S: IntoIterator<Item = anyhow::Result<Frame>> + Send + 'static,
    S::IntoIter: Send,
    L: FnOnce() -> anyhow::Result<Arc<dyn InferenceModel>> + Send + 'static,
    F: FnOnce() -> anyhow::Result<S>,
{
    gate?;
    slot.load_in_background(load)?;
    let source = source().map_err(LaunchError::Camera)?;
    let processor = FrameProcessor::new(slot.clone(), Observer::auto());
    Ok(Pipeline::spawn(source, processor)?)
}
