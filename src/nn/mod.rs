//! Neural network inference via ONNX models.
//!
//! Models are loaded with [`Loader`] and evaluated through the
//! [`InferenceModel`] trait, which keeps the rest of the crate independent of
//! the inference backend.

mod tensor;

use std::{
    borrow::Cow,
    fs,
    path::Path,
    sync::Arc,
};

use anyhow::{anyhow, bail};
use tract_onnx::prelude::{
    Framework, InferenceModelExt, TValue, TypedModel, TypedRunnableModel,
};

pub use tensor::{Tensor, TensorView};

/// Error returned when a tensor's shape does not match a model input.
#[derive(Debug, thiserror::Error)]
#[error("tensor of shape {got:?} does not match expected input shape {expected:?}")]
pub struct ShapeError {
    expected: Vec<usize>,
    got: Vec<usize>,
}

impl ShapeError {
    pub fn expected(&self) -> &[usize] {
        &self.expected
    }

    pub fn got(&self) -> &[usize] {
        &self.got
    }
}

/// A neural network that maps input tensors to output tensors.
///
/// Implementations must be callable from any thread. The crate's per-frame
/// loop relies on `run` blocking until inference has finished.
pub trait InferenceModel: Send + Sync {
    /// The concrete shape of the model's sole image input.
    fn input_shape(&self) -> &[usize];

    /// Number of tensors produced per inference.
    fn output_count(&self) -> usize;

    /// Runs inference synchronously.
    fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs>;

    /// Checks that `tensor` is a valid input for this model.
    fn check_input(&self, tensor: &Tensor) -> Result<(), ShapeError> {
        if tensor.shape() != self.input_shape() {
            return Err(ShapeError {
                expected: self.input_shape().to_vec(),
                got: tensor.shape().to_vec(),
            });
        }
        Ok(())
    }
}

/// Loads an ONNX model from a file or in-memory buffer.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
}

impl<'a> Loader<'a> {
    /// Loads model data from a `.onnx` file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!("model path '{}' does not have the `.onnx` extension", path.display()),
        }
        let model_data = fs::read(path)
            .map_err(|e| anyhow!("failed to read model file '{}': {e}", path.display()))?;
        Ok(Self {
            model_data: model_data.into(),
        })
    }

    /// Uses a model embedded in or otherwise already held by the application.
    pub fn from_bytes(model_data: &'a [u8]) -> Self {
        Self {
            model_data: model_data.into(),
        }
    }

    /// Parses and optimizes the model, producing a runnable network.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut &*self.model_data)?
            .into_optimized()?
            .into_runnable()?;

        let fact = plan.model().input_fact(0)?;
        let input_shape = fact
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow!("model input has non-concrete shape {:?}", fact.shape))?
            .to_vec();
        let mut output_shapes = Vec::new();
        for i in 0..plan.model().outputs.len() {
            let fact = plan.model().output_fact(i)?;
            let shape = fact
                .shape
                .as_concrete()
                .ok_or_else(|| anyhow!("model output {i} has non-concrete shape {:?}", fact.shape))?;
            output_shapes.push(shape.to_vec());
        }

        Ok(NeuralNetwork(Arc::new(Impl {
            plan,
            input_shape,
            output_shapes,
        })))
    }
}

struct Impl {
    plan: TypedRunnableModel<TypedModel>,
    input_shape: Vec<usize>,
    output_shapes: Vec<Vec<usize>>,
}

/// A runnable ONNX network.
///
/// Cheap to clone, and all clones share the underlying execution plan.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Impl>);

impl NeuralNetwork {
    /// The concrete shapes of the model's outputs, in declaration order.
    pub fn output_shapes(&self) -> &[Vec<usize>] {
        &self.0.output_shapes
    }
}

impl InferenceModel for NeuralNetwork {
    fn input_shape(&self) -> &[usize] {
        &self.0.input_shape
    }

    fn output_count(&self) -> usize {
        self.0.output_shapes.len()
    }

    fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let tvalues = inputs
            .iter()
            .map(|t| TValue::from_const(Arc::new(t.to_tract())))
            .collect();
        let outputs = self.0.plan.run(tvalues)?;
        outputs.iter().map(|v| Tensor::from_tract(v)).collect()
    }
}

/// The set of input tensors fed into one inference run.
pub struct Inputs {
    inner: Vec<Tensor>,
}

impl Inputs {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.inner.iter()
    }
}

impl From<Tensor> for Inputs {
    fn from(t: Tensor) -> Self {
        Self { inner: vec![t] }
    }
}

/// The tensors produced by one inference run.
pub struct Outputs {
    inner: Vec<Tensor>,
}

impl Outputs {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.inner.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.inner.iter()
    }
}

impl std::ops::Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

impl FromIterator<Tensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        shape: Vec<usize>,
    }

    impl InferenceModel for Fixed {
        fn input_shape(&self) -> &[usize] {
            &self.shape
        }

        fn output_count(&self) -> usize {
            0
        }

        fn run(&self, _: &Inputs) -> anyhow::Result<Outputs> {
            Ok(std::iter::empty::<Tensor>().collect())
        }
    }

    #[test]
    fn check_input_compares_shapes() {
        let model = Fixed { shape: vec![1, 3, 4, 4] };
        model
            .check_input(&Tensor::from_fn([1, 3, 4, 4], |_| 0.0))
            .unwrap();
        let err = model
            .check_input(&Tensor::from_fn([1, 4, 4, 3], |_| 0.0))
            .unwrap_err();
        assert_eq!(err.expected(), &[1, 3, 4, 4]);
        assert_eq!(err.got(), &[1, 4, 4, 3]);
    }

    #[test]
    fn loader_rejects_wrong_extension() {
        assert!(Loader::from_path("model.tflite").is_err());
    }
}
