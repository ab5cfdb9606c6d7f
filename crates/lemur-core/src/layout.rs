use crate::error::{Error, Result};
use crate::shape::{Shape, RANK};

// Layout — How a rank-5 shape maps onto flat storage
//
// offset(i0..i4) = Σ ik * stride[k]
//
// A layout is only valid for a storage of `len` elements if that map is
// injective over the whole index space AND every offset is below `len`.
// Since `len == numel`, a valid layout is therefore a permutation of the
// storage: each element is reached by exactly one index tuple. That is what
// lets elementwise kernels read in logical order without worrying about
// aliasing, and what makes zero-copy permutes safe.
//
// Stride 0 on an axis of size > 1 always aliases, so broadcasting views are
// not representable; `expand` materialises instead.

/// Shape and stride of a strided buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    stride: [usize; RANK],
}

impl Layout {
    /// Row-major layout for `shape`.
    pub fn contiguous(shape: Shape) -> Self {
        Layout {
            shape,
            stride: shape.stride_contiguous(),
        }
    }

    /// Layout with an explicit stride. Unchecked; see [`Layout::validate`].
    pub fn new(shape: Shape, stride: [usize; RANK]) -> Self {
        Layout { shape, stride }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn stride(&self) -> &[usize; RANK] {
        &self.stride
    }

    pub fn dims(&self) -> &[usize; RANK] {
        self.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// True iff the stride equals the canonical row-major stride.
    pub fn is_contiguous(&self) -> bool {
        self.stride == self.shape.stride_contiguous()
    }

    /// Check that this layout addresses `len` elements without aliasing.
    ///
    /// Walks the full index space once, marking each offset in a bitmap.
    pub fn validate(&self, len: usize) -> Result<()> {
        let counted = self.shape.checked_elem_count();
        if counted != Some(len) {
            return Err(Error::ElementCountMismatch {
                shape: self.shape,
                expected: counted.unwrap_or(usize::MAX),
                got: len,
            });
        }
        if self.is_contiguous() {
            return Ok(());
        }
        let mut seen = vec![false; len];
        for offset in self.strided_indices() {
            if offset >= len {
                return Err(self.invalid("offset past end of storage"));
            }
            if seen[offset] {
                return Err(self.invalid("two indices alias one offset"));
            }
            seen[offset] = true;
        }
        Ok(())
    }

    fn invalid(&self, reason: &'static str) -> Error {
        Error::InvalidStride {
            shape: self.shape,
            stride: self.stride,
            reason,
        }
    }

    /// Flat storage offset of a multi-index.
    pub fn flat_index(&self, index: &[usize; RANK]) -> usize {
        index
            .iter()
            .zip(self.stride.iter())
            .fold(0usize, |acc, (&i, &s)| acc.saturating_add(i.saturating_mul(s)))
    }

    /// Reorder axes: output axis `k` is input axis `dims[k]`.
    pub fn permute(&self, dims: &[usize; RANK]) -> Result<Layout> {
        let mut seen = [false; RANK];
        for &d in dims {
            if d >= RANK || seen[d] {
                return Err(Error::InvalidPermutation { dims: *dims });
            }
            seen[d] = true;
        }
        let src = self.shape.dims();
        let shape = Shape::new(dims.map(|d| src[d]));
        let stride = dims.map(|d| self.stride[d]);
        Ok(Layout::new(shape, stride))
    }

    /// Iterator over all flat offsets of this layout, in logical order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter — flat offsets in logical (row-major index) order
//
// For a contiguous layout this counts 0, 1, 2, ...; for a permuted one it
// jumps through storage following the strides. The last axis advances first.

/// Iterator that yields flat storage offsets for each element of a Layout.
pub struct StridedIter {
    current: [usize; RANK],
    dims: [usize; RANK],
    stride: [usize; RANK],
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: [0; RANK],
            dims: *layout.dims(),
            stride: *layout.stride(),
            remaining: layout.elem_count(),
            started: false,
        }
    }

    fn flat_index(&self) -> usize {
        // saturates, so a runaway stride lands past the end of storage
        let mut idx = 0usize;
        for i in 0..RANK {
            idx = idx.saturating_add(self.current[i].saturating_mul(self.stride[i]));
        }
        idx
    }

    fn advance(&mut self) {
        for i in (0..RANK).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat_index())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
