use std::fmt;
use std::sync::Arc;

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::layout::{Layout, StridedIter};
use crate::shape::{Shape, RANK};

// StridedBuffer — immutable rank-5 strided view over flat storage
//
// This is the value every kernel consumes and produces. It is constructed
// once, validated once, and never changes afterwards: there are no setters,
// and the element storage sits behind an `Arc<[f64]>` that nothing holds
// mutably. "Modifying" a buffer means building a new one.
//
// Sharing the storage Arc between buffers is how zero-copy shape operations
// work (a permute only swaps the layout). Sharing is sound only because
// nobody can write through the Arc.
//
// Elements are always held as f64 and rounded to `dtype` on the way in.

/// Immutable, validated strided buffer.
#[derive(Clone, PartialEq)]
pub struct StridedBuffer {
    elements: Arc<[f64]>,
    layout: Layout,
    dtype: DType,
}

impl StridedBuffer {
    /// Build a contiguous buffer from flat row-major elements.
    ///
    /// Fails with `ElementCountMismatch` when `elements.len() != numel(shape)`.
    pub fn new(elements: Vec<f64>, shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::with_layout(elements, Layout::contiguous(shape.into()), dtype)
    }

    /// Build a buffer with an explicit stride.
    ///
    /// Fails with `ElementCountMismatch` or `InvalidStride` (aliasing or out-of-bounds offsets).
    pub fn with_stride(
        elements: Vec<f64>,
        shape: impl Into<Shape>,
        stride: [usize; RANK],
        dtype: DType,
    ) -> Result<Self> {
        Self::with_layout(elements, Layout::new(shape.into(), stride), dtype)
    }

    fn with_layout(mut elements: Vec<f64>, layout: Layout, dtype: DType) -> Result<Self> {
        layout.validate(elements.len())?;
        if dtype != DType::F64 {
            for v in elements.iter_mut() {
                *v = dtype.round(*v);
            }
        }
        Ok(StridedBuffer {
            elements: elements.into(),
            layout,
            dtype,
        })
    }

    /// Build a contiguous buffer from typed values; the dtype follows `T`.
    pub fn from_slice<T: WithDType>(data: &[T], shape: impl Into<Shape>) -> Result<Self> {
        let elements = data.iter().map(|&v| WithDType::to_f64(v)).collect();
        Self::new(elements, shape, T::DTYPE)
    }

    /// Buffer of `shape` filled with `value`.
    pub fn full(shape: impl Into<Shape>, value: f64, dtype: DType) -> Self {
        let shape = shape.into();
        let value = dtype.round(value);
        StridedBuffer {
            elements: vec![value; shape.elem_count()].into(),
            layout: Layout::contiguous(shape),
            dtype,
        }
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 0.0, dtype)
    }

    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 1.0, dtype)
    }

    /// Contiguous zeros with this buffer's shape and dtype.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(*self.shape(), self.dtype)
    }

    /// Contiguous ones with this buffer's shape and dtype.
    pub fn ones_like(&self) -> Self {
        Self::ones(*self.shape(), self.dtype)
    }

    /// The single-element unit seed (1, 1, 1, 1, 1) = 1.
    pub fn unit_seed(dtype: DType) -> Self {
        Self::ones(Shape::scalar(), dtype)
    }

    // Views over the same storage. Callers hand in layouts derived from an
    // already-valid one by axis permutation or (for contiguous storage) a
    // numel-preserving reshape, both of which keep the map bijective.
    pub(crate) fn share_with_layout(&self, layout: Layout) -> Result<Self> {
        layout.validate(self.elements.len())?;
        Ok(StridedBuffer {
            elements: Arc::clone(&self.elements),
            layout,
            dtype: self.dtype,
        })
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn stride(&self) -> &[usize; RANK] {
        self.layout.stride()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of stored elements; always equal to `numel()`.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn numel(&self) -> usize {
        self.layout.elem_count()
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Raw flat storage, in storage order (not logical order).
    pub fn storage(&self) -> &[f64] {
        &self.elements
    }

    /// Whether two buffers share flat storage.
    pub fn shares_storage(&self, other: &StridedBuffer) -> bool {
        Arc::ptr_eq(&self.elements, &other.elements)
    }

    /// Element at a multi-index.
    pub fn get(&self, index: &[usize; RANK]) -> Option<f64> {
        if index.iter().zip(self.shape().dims()).any(|(&i, &d)| i >= d) {
            return None;
        }
        self.elements.get(self.layout.flat_index(index)).copied()
    }

    /// Values in logical row-major order.
    pub fn iter(&self) -> Values<'_> {
        Values {
            elements: &self.elements,
            offsets: self.layout.strided_indices(),
        }
    }

    /// Values in logical row-major order, as f64.
    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }

    /// Values in logical order converted to `T`.
    pub fn to_vec_as<T: WithDType>(&self) -> Vec<T> {
        self.iter().map(T::from_f64).collect()
    }

    /// Contiguous copy; returns a cheap clone when already contiguous.
    pub fn to_contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }
        StridedBuffer {
            elements: self.iter().collect::<Vec<_>>().into(),
            layout: Layout::contiguous(*self.shape()),
            dtype: self.dtype,
        }
    }

    /// Contiguous buffer of the same shape and dtype with `f` applied per element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        StridedBuffer {
            elements: self
                .iter()
                .map(|v| self.dtype.round(f(v)))
                .collect::<Vec<_>>()
                .into(),
            layout: Layout::contiguous(*self.shape()),
            dtype: self.dtype,
        }
    }

    /// Contiguous elementwise combination of two equally-shaped buffers.
    pub fn zip_map(&self, other: &StridedBuffer, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        self.check_same_shape(other)?;
        let elements: Vec<f64> = self
            .iter()
            .zip(other.iter())
            .map(|(a, b)| self.dtype.round(f(a, b)))
            .collect();
        Ok(StridedBuffer {
            elements: elements.into(),
            layout: Layout::contiguous(*self.shape()),
            dtype: self.dtype,
        })
    }

    /// Elementwise sum. Used for gradient accumulation.
    pub fn add(&self, other: &StridedBuffer) -> Result<Self> {
        self.zip_map(other, |a, b| a + b)
    }

    fn check_same_shape(&self, other: &StridedBuffer) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::ShapeMismatch {
                expected: *self.shape(),
                got: *other.shape(),
            });
        }
        if self.dtype != other.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: other.dtype,
            });
        }
        Ok(())
    }

    /// Flat-element approximate equality in logical order.
    pub fn all_close(&self, other: &StridedBuffer, rtol: f64, atol: f64) -> bool {
        self.shape() == other.shape()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| (a - b).abs() <= atol + rtol * b.abs())
    }
}

/// Logical-order value iterator over a [`StridedBuffer`].
pub struct Values<'a> {
    elements: &'a [f64],
    offsets: StridedIter,
}

impl Iterator for Values<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.offsets.next().map(|o| self.elements[o])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.offsets.size_hint()
    }
}

impl ExactSizeIterator for Values<'_> {}

impl fmt::Debug for StridedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StridedBuffer(shape={}, stride={:?}, dtype={}, contiguous={})",
            self.shape(),
            self.stride(),
            self.dtype,
            self.is_contiguous()
        )
    }
}

impl fmt::Display for StridedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn nested(
            f: &mut fmt::Formatter<'_>,
            buf: &StridedBuffer,
            axis: usize,
            index: &mut [usize; RANK],
        ) -> fmt::Result {
            let size = buf.shape().dims()[axis];
            write!(f, "[")?;
            for i in 0..size {
                if i > 0 {
                    write!(f, ", ")?;
                }
                index[axis] = i;
                if axis + 1 == RANK {
                    write!(f, "{}", buf.elements[buf.layout.flat_index(index)])?;
                } else {
                    nested(f, buf, axis + 1, index)?;
                }
            }
            index[axis] = 0;
            write!(f, "]")
        }

        let mut index = [0usize; RANK];
        nested(f, self, 0, &mut index)?;
        write!(
            f,
            "\nShape: {}\nStride: {:?}\nDtype: {}",
            self.shape(),
            self.stride(),
            self.dtype
        )
    }
}
