//! End-to-end tests of the frame processing pipeline with a stubbed model.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use handmark::{
    adapter::FrameTensorizer,
    frame::{Frame, PixelFormat},
    model::{ModelSlot, StateKind},
    nn::{InferenceModel, Inputs, Outputs, Tensor},
    observe::Observer,
    permission::PermissionError,
    pipeline::{self, CycleError, CycleOutcome, FrameProcessor, LaunchError, Pipeline, SkipReason},
};

/// Stands in for the hand landmark network: fixed input shape, configurable
/// presence score, and instrumentation for call counts and overlap.
struct StubModel {
    shape: Vec<usize>,
    score: f32,
    runs: AtomicUsize,
    in_flight: AtomicBool,
    seen: Mutex<Vec<Vec<usize>>>,
}

impl StubModel {
    fn new(shape: &[usize], score: f32) -> Arc<Self> {
        Arc::new(Self {
            shape: shape.to_vec(),
            score,
            runs: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl InferenceModel for StubModel {
    fn input_shape(&self) -> &[usize] {
        &self.shape
    }

    fn output_count(&self) -> usize {
        4
    }

    fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        assert!(
            !self.in_flight.swap(true, Ordering::SeqCst),
            "two inferences were in flight at the same time"
        );
        let input = inputs.iter().next().unwrap();
        self.seen.lock().unwrap().push(input.shape().to_vec());
        // Simulate a model that takes a little while.
        thread::sleep(Duration::from_millis(2));
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        Ok([
            Tensor::from_fn([1, 63], |_| 0.0),
            Tensor::from_fn([1, 1], |_| self.score),
            Tensor::from_fn([1, 1], |_| 1.0),
            Tensor::from_fn([1, 63], |_| 0.0),
        ]
        .into_iter()
        .collect())
    }
}

fn rgb_frame(width: u32, height: u32) -> Frame {
    Frame::new(
        vec![127; (width * height * 3) as usize],
        width,
        height,
        PixelFormat::Rgb,
    )
    .unwrap()
}

fn i420_frame(width: u32, height: u32) -> Frame {
    Frame::new(
        vec![127; (width * height * 3 / 2) as usize],
        width,
        height,
        PixelFormat::I420,
    )
    .unwrap()
}

#[test]
fn frames_are_skipped_until_the_model_is_loaded() {
    let stub = StubModel::new(&[1, 3, 224, 224], 0.9);
    let slot = ModelSlot::new();
    let mut processor = FrameProcessor::new(slot.clone(), Observer::auto());

    let outcome = processor.process(&rgb_frame(64, 64));
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::ModelNotReady(StateKind::Unloaded))
    ));

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let model = stub.clone();
    let loader = slot
        .load_in_background(move || {
            release_rx.recv().ok();
            Ok(model as Arc<dyn InferenceModel>)
        })
        .unwrap();

    let outcome = processor.process(&rgb_frame(64, 64));
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::ModelNotReady(StateKind::Loading))
    ));
    assert_eq!(stub.runs(), 0);

    release_tx.send(()).unwrap();
    loader.join().unwrap();

    let outcome = processor.process(&rgb_frame(64, 64));
    assert!(matches!(outcome, CycleOutcome::Completed(_)));
    assert_eq!(stub.runs(), 1);
}

#[test]
fn a_failed_load_never_infers() {
    let slot = ModelSlot::new();
    slot.load_in_background(|| Err(anyhow::anyhow!("file not found")))
        .unwrap()
        .join()
        .unwrap();

    let mut processor = FrameProcessor::new(slot.clone(), Observer::auto());
    let outcome = processor.process(&rgb_frame(64, 64));
    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::ModelNotReady(StateKind::Failed))
    ));
    assert!(slot.error().unwrap().contains("file not found"));
}

#[test]
fn a_completed_cycle_feeds_the_model_its_input_shape() {
    let stub = StubModel::new(&[1, 3, 224, 224], 0.9);
    let slot = ModelSlot::new();
    slot.publish(Ok(stub.clone() as Arc<dyn InferenceModel>));

    let mut processor = FrameProcessor::new(slot, Observer::auto());
    let outcome = processor.process(&rgb_frame(640, 480));
    match outcome {
        CycleOutcome::Completed(obs) => {
            assert!(obs.present);
            assert_eq!(obs.score, Some(0.9));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let seen = stub.seen.lock().unwrap();
    assert_eq!(seen.as_slice(), &[vec![1usize, 3, 224, 224]]);
    assert_eq!(seen[0].iter().product::<usize>(), 150_528);
}

#[test]
fn full_hd_yuv_frames_are_adapted() {
    let stub = StubModel::new(&[1, 224, 224, 3], 0.1);
    let slot = ModelSlot::new();
    slot.publish(Ok(stub.clone() as Arc<dyn InferenceModel>));

    let mut processor = FrameProcessor::new(slot, Observer::auto());
    let outcome = processor.process(&i420_frame(1920, 1080));
    match outcome {
        CycleOutcome::Completed(obs) => assert!(!obs.present),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        stub.seen.lock().unwrap().as_slice(),
        &[vec![1usize, 224, 224, 3]]
    );
}

#[test]
fn mismatched_input_shapes_fail_the_cycle() {
    let stub = StubModel::new(&[1, 3, 8, 8], 0.9);
    let slot = ModelSlot::new();
    slot.publish(Ok(stub.clone() as Arc<dyn InferenceModel>));

    let tensorizer = FrameTensorizer::from_shape(&[1, 3, 4, 4]).unwrap();
    let mut processor = FrameProcessor::with_tensorizer(slot, Observer::auto(), tensorizer);
    let outcome = processor.process(&rgb_frame(64, 64));
    assert!(matches!(
        outcome,
        CycleOutcome::Failed(CycleError::Shape(_))
    ));
    assert_eq!(stub.runs(), 0);
}

#[test]
fn processing_continues_after_a_failed_frame() {
    let stub = StubModel::new(&[1, 3, 224, 224], 0.9);
    let slot = ModelSlot::new();
    slot.publish(Ok(stub.clone() as Arc<dyn InferenceModel>));

    let mut processor = FrameProcessor::new(slot, Observer::auto());

    let jpeg = Frame::new(vec![0xff, 0xd8, 0xff], 64, 64, PixelFormat::Mjpeg).unwrap();
    assert!(matches!(
        processor.process(&jpeg),
        CycleOutcome::Failed(CycleError::Format(_))
    ));
    assert_eq!(stub.runs(), 0);

    assert!(matches!(
        processor.process(&rgb_frame(64, 64)),
        CycleOutcome::Completed(_)
    ));
    assert_eq!(stub.runs(), 1);
}

#[test]
fn a_denied_gate_never_loads_or_captures() {
    let slot = ModelSlot::new();
    let load_called = Arc::new(AtomicBool::new(false));
    let source_called = Arc::new(AtomicBool::new(false));

    let load_flag = load_called.clone();
    let source_flag = source_called.clone();
    let result = pipeline::launch(
        Err(PermissionError::Denied),
        &slot,
        move || {
            load_flag.store(true, Ordering::SeqCst);
            Err(anyhow::anyhow!("must not be reached"))
        },
        || {
            source_flag.store(true, Ordering::SeqCst);
            Ok(Vec::<anyhow::Result<Frame>>::new())
        },
    );

    assert!(matches!(
        result,
        Err(LaunchError::Permission(PermissionError::Denied))
    ));
    assert!(!load_called.load(Ordering::SeqCst));
    assert!(!source_called.load(Ordering::SeqCst));
    assert_eq!(slot.state(), StateKind::Unloaded);
}

#[test]
fn a_granted_gate_starts_the_load_and_the_pipeline() {
    let stub = StubModel::new(&[1, 3, 32, 32], 0.9);
    let slot = ModelSlot::new();

    let model = stub.clone();
    let pipeline = pipeline::launch(
        Ok(()),
        &slot,
        move || Ok(model as Arc<dyn InferenceModel>),
        || {
            // Stream frames only once the background load has finished, so
            // every processed frame runs inference.
            while slot.state() != StateKind::Loaded {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(std::iter::repeat_with(|| Ok(rgb_frame(64, 64))).take(10))
        },
    )
    .unwrap();

    let completed = pipeline
        .events()
        .any(|event| matches!(event.outcome, CycleOutcome::Completed(_)));
    assert!(completed);
    assert!(stub.runs() >= 1);
}

#[test]
fn pipeline_never_overlaps_inferences() {
    let stub = StubModel::new(&[1, 3, 32, 32], 0.9);
    let slot = ModelSlot::new();
    slot.publish(Ok(stub.clone() as Arc<dyn InferenceModel>));

    let frames: Vec<anyhow::Result<Frame>> = (0..50).map(|_| Ok(rgb_frame(64, 64))).collect();
    let processor = FrameProcessor::new(slot, Observer::auto());
    let pipeline = Pipeline::spawn(frames, processor).unwrap();

    let mut completed = 0usize;
    let mut last_index = None;
    for event in pipeline.events() {
        match event.outcome {
            CycleOutcome::Completed(obs) => {
                assert!(obs.present);
                completed += 1;
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Indices are strictly increasing; gaps are dropped frames.
        if let Some(last) = last_index {
            assert!(event.frame_index > last);
        }
        last_index = Some(event.frame_index);
    }

    // The stub's own overlap assertion would have panicked the worker (and
    // this test via pipeline drop) if two inferences ever ran concurrently.
    assert!(completed >= 1);
    assert!(completed <= 50);
    assert_eq!(stub.runs(), completed);
    drop(pipeline);
}
