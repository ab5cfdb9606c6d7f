use std::fmt;

use crate::error::{Error, Result};

// Shape — Fixed rank-5 shape
//
// Every tensor in lemur has exactly five dimensions. Lower-rank data is
// left-padded with 1s, so a vector of 4 elements is (1, 1, 1, 1, 4) and a
// 2x3 matrix is (1, 1, 1, 2, 3). Fixing the rank keeps strides, kernels and
// descriptors all the same size, which is what the native kernel interface
// expects.
//
// Row-major strides: stride[4] = 1, stride[i] = stride[i + 1] * shape[i + 1].
//   (2, 3, 1, 1, 4) → (12, 4, 4, 4, 1)

/// Number of dimensions of every shape.
pub const RANK: usize = 5;

/// The five dimension sizes of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape([usize; RANK]);

impl Shape {
    pub const fn new(dims: [usize; RANK]) -> Self {
        Shape(dims)
    }

    /// The scalar shape (1, 1, 1, 1, 1).
    pub const fn scalar() -> Self {
        Shape([1; RANK])
    }

    /// Build a shape from up to five dims, left-padding with 1s.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        if dims.len() > RANK {
            return Err(Error::InvalidRank { rank: dims.len() });
        }
        let mut padded = [1usize; RANK];
        padded[RANK - dims.len()..].copy_from_slice(dims);
        Ok(Shape(padded))
    }

    pub fn dims(&self) -> &[usize; RANK] {
        &self.0
    }

    /// Always 5.
    pub fn rank(&self) -> usize {
        RANK
    }

    /// Total number of elements (product of all five dimensions).
    ///
    /// Saturates at `usize::MAX`; use [`Shape::checked_elem_count`] where an
    /// overflowing shape must be told apart.
    pub fn elem_count(&self) -> usize {
        self.checked_elem_count().unwrap_or(usize::MAX)
    }

    /// Element count, or `None` if the product overflows `usize`.
    pub fn checked_elem_count(&self) -> Option<usize> {
        if self.0.contains(&0) {
            return Some(0);
        }
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0
            .get(d)
            .copied()
            .ok_or(Error::InvalidAxis { dim: d, rank: RANK })
    }

    /// Canonical row-major stride for this shape.
    pub fn stride_contiguous(&self) -> [usize; RANK] {
        let mut stride = [1usize; RANK];
        for i in (0..RANK - 1).rev() {
            stride[i] = stride[i + 1].saturating_mul(self.0[i + 1]);
        }
        stride
    }

    /// Copy of this shape with dimension `d` replaced.
    pub fn with_dim(&self, d: usize, size: usize) -> Result<Self> {
        if d >= RANK {
            return Err(Error::InvalidAxis { dim: d, rank: RANK });
        }
        let mut dims = self.0;
        dims[d] = size;
        Ok(Shape(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [d0, d1, d2, d3, d4] = self.0;
        write!(f, "({}, {}, {}, {}, {})", d0, d1, d2, d3, d4)
    }
}

impl From<[usize; RANK]> for Shape {
    fn from(dims: [usize; RANK]) -> Self {
        Shape(dims)
    }
}

impl From<usize> for Shape {
    /// Vector shape (1, 1, 1, 1, d).
    fn from(d: usize) -> Self {
        Shape([1, 1, 1, 1, d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape([1, 1, 1, d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape([1, 1, d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape([1, d0, d1, d2, d3])
    }
}

impl From<(usize, usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3, d4): (usize, usize, usize, usize, usize)) -> Self {
        Shape([d0, d1, d2, d3, d4])
    }
}
