//! Owned `f32` tensors passed into and out of neural networks.

use std::fmt;

use tinyvec::TinyVec;

type Shape = TinyVec<[usize; 4]>;

/// An owned tensor of `f32` values.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Box<[f32]>,
}

impl Tensor {
    /// Creates a tensor by invoking `f` with every index, in row-major order.
    pub fn from_fn<const N: usize>(shape: [usize; N], mut f: impl FnMut([usize; N]) -> f32) -> Self {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = [0; N];
        for _ in 0..len {
            data.push(f(index));
            // Row-major odometer increment.
            for dim in (0..N).rev() {
                index[dim] += 1;
                if index[dim] < shape[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
        Self {
            shape: shape.iter().copied().collect(),
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor from row-major data.
    ///
    /// Panics when the iterator yields a number of elements that does not
    /// match `shape`.
    pub fn from_iter<const N: usize>(shape: [usize; N], iter: impl IntoIterator<Item = f32>) -> Self {
        let data: Box<[f32]> = iter.into_iter().collect();
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "data length does not match tensor shape {shape:?}",
        );
        Self {
            shape: shape.iter().copied().collect(),
            data,
        }
    }

    /// Returns the tensor's shape.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the first element in row-major order, if any.
    pub fn first(&self) -> Option<f32> {
        self.data.first().copied()
    }

    /// Indexes into the outermost dimensions, yielding a view of the rest.
    ///
    /// Panics when `N` exceeds the tensor's rank or an index is out of range.
    pub fn index<const N: usize>(&self, index: [usize; N]) -> TensorView<'_> {
        view_index(&self.shape, &self.data, &index)
    }

    /// Returns the data of a rank-1 tensor.
    ///
    /// Panics when the tensor is not of rank 1.
    pub fn as_slice(&self) -> &[f32] {
        assert_eq!(self.shape.len(), 1, "as_slice called on tensor of shape {:?}", self.shape);
        &self.data
    }

    /// Returns the value of a rank-0 tensor.
    ///
    /// Panics when the tensor is not of rank 0.
    pub fn as_singular(&self) -> f32 {
        assert!(self.shape.is_empty(), "as_singular called on tensor of shape {:?}", self.shape);
        self.data[0]
    }

    /// Iterates over the views obtained by indexing the outermost dimension.
    pub fn iter(&self) -> impl Iterator<Item = TensorView<'_>> + '_ {
        (0..self.shape.first().copied().unwrap_or(0)).map(|i| self.index([i]))
    }

    pub(crate) fn from_tract(value: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = value.as_slice::<f32>()?;
        Ok(Self {
            shape: value.shape().iter().copied().collect(),
            data: data.into(),
        })
    }

    pub(crate) fn to_tract(&self) -> tract_onnx::prelude::Tensor {
        tract_onnx::prelude::Tensor::from_shape(&self.shape, &self.data)
            .expect("shape and data length are kept consistent")
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor<{:?}>", &*self.shape)
    }
}

/// A borrowed view into part of a [`Tensor`].
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    shape: &'a [usize],
    data: &'a [f32],
}

impl<'a> TensorView<'a> {
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.shape
    }

    pub fn index<const N: usize>(&self, index: [usize; N]) -> TensorView<'a> {
        view_index(self.shape, self.data, &index)
    }

    /// Returns the data of a rank-1 view.
    pub fn as_slice(&self) -> &'a [f32] {
        assert_eq!(self.shape.len(), 1, "as_slice called on view of shape {:?}", self.shape);
        self.data
    }

    /// Returns the value of a rank-0 view.
    pub fn as_singular(&self) -> f32 {
        assert!(self.shape.is_empty(), "as_singular called on view of shape {:?}", self.shape);
        self.data[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = TensorView<'a>> + 'a {
        let this = *self;
        (0..self.shape.first().copied().unwrap_or(0)).map(move |i| this.index([i]))
    }
}

impl fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TensorView<{:?}>", self.shape)
    }
}

fn view_index<'a>(shape: &'a [usize], data: &'a [f32], index: &[usize]) -> TensorView<'a> {
    assert!(
        index.len() <= shape.len(),
        "cannot index tensor of rank {} with {} indices",
        shape.len(),
        index.len(),
    );
    let mut offset = 0;
    let mut stride: usize = shape.iter().product();
    for (dim, &i) in index.iter().enumerate() {
        assert!(i < shape[dim], "index {i} out of range for dimension {dim} of size {}", shape[dim]);
        stride /= shape[dim];
        offset += i * stride;
    }
    TensorView {
        shape: &shape[index.len()..],
        data: &data[offset..offset + stride],
    }
}
