use crate::buffer::StridedBuffer;
use crate::error::{Error, Result};
use crate::kernel::ShapeKernel;
use crate::layout::Layout;
use crate::shape::{Shape, RANK};

// Built-in shape operations
//
// View     — same elements, new shape with equal numel. Zero-copy when the
//            input is contiguous, otherwise the input is first made contiguous.
//            Backward reshapes the seed back to the input shape.
// Permute  — reorders axes by permuting shape and stride together. Always
//            zero-copy. Backward applies the inverse permutation to the seed.
// Expand   — broadcasts size-1 axes to a larger size. Stride 0 would alias,
//            so the result is materialised. Backward sums the seed over every
//            expanded axis.

/// Reinterpret as `shape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub shape: Shape,
}

/// Output axis `k` is input axis `dims[k]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permute {
    pub dims: [usize; RANK],
}

/// Broadcast size-1 axes up to `shape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expand {
    pub shape: Shape,
}

fn reshape_to(buf: &StridedBuffer, shape: Shape) -> Result<StridedBuffer> {
    if buf.numel() != shape.elem_count() {
        return Err(Error::ShapeMismatch {
            expected: *buf.shape(),
            got: shape,
        });
    }
    buf.to_contiguous()
        .share_with_layout(Layout::contiguous(shape))
}

impl ShapeKernel for View {
    fn name(&self) -> &'static str {
        "view"
    }

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer> {
        reshape_to(a, self.shape)
    }

    fn backward_kernel(
        &self,
        input: &StridedBuffer,
        seed: &StridedBuffer,
    ) -> Result<StridedBuffer> {
        reshape_to(seed, *input.shape())
    }
}

impl Permute {
    /// The permutation that undoes this one.
    pub fn inverse(&self) -> [usize; RANK] {
        let mut inv = [0usize; RANK];
        for (k, &d) in self.dims.iter().enumerate() {
            if d < RANK {
                inv[d] = k;
            }
        }
        inv
    }
}

impl ShapeKernel for Permute {
    fn name(&self) -> &'static str {
        "permute"
    }

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer> {
        a.share_with_layout(a.layout().permute(&self.dims)?)
    }

    fn backward_kernel(
        &self,
        _input: &StridedBuffer,
        seed: &StridedBuffer,
    ) -> Result<StridedBuffer> {
        // validates `dims` before trusting `inverse`
        seed.layout().permute(&self.dims)?;
        seed.share_with_layout(seed.layout().permute(&self.inverse())?)
    }
}

/// Multi-index of the `flat`-th element of `dims` in row-major order.
fn unravel(mut flat: usize, dims: &[usize; RANK]) -> [usize; RANK] {
    let mut index = [0usize; RANK];
    for axis in (0..RANK).rev() {
        index[axis] = flat % dims[axis];
        flat /= dims[axis];
    }
    index
}

impl Expand {
    fn check(&self, src: &Shape) -> Result<()> {
        let ok = src
            .dims()
            .iter()
            .zip(self.shape.dims())
            .all(|(&s, &t)| s == t || s == 1);
        if !ok || self.shape.checked_elem_count().is_none() {
            return Err(Error::ShapeMismatch {
                expected: *src,
                got: self.shape,
            });
        }
        Ok(())
    }

    /// Index into the source for a target index: expanded axes pin to 0.
    fn source_index(src: &Shape, target: [usize; RANK]) -> [usize; RANK] {
        let mut idx = target;
        for (axis, &s) in src.dims().iter().enumerate() {
            if s == 1 {
                idx[axis] = 0;
            }
        }
        idx
    }
}

impl ShapeKernel for Expand {
    fn name(&self) -> &'static str {
        "expand"
    }

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer> {
        self.check(a.shape())?;
        let target = self.shape.dims();
        let src = a.layout();
        let elements = (0..self.shape.elem_count())
            .map(|flat| {
                let idx = Self::source_index(a.shape(), unravel(flat, target));
                a.storage()[src.flat_index(&idx)]
            })
            .collect();
        StridedBuffer::new(elements, self.shape, a.dtype())
    }

    fn backward_kernel(
        &self,
        input: &StridedBuffer,
        seed: &StridedBuffer,
    ) -> Result<StridedBuffer> {
        self.check(input.shape())?;
        if seed.shape() != &self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                got: *seed.shape(),
            });
        }
        let out_layout = Layout::contiguous(*input.shape());
        let mut out = vec![0.0; input.numel()];
        for (flat, g) in seed.iter().enumerate() {
            let idx = Self::source_index(input.shape(), unravel(flat, self.shape.dims()));
            out[out_layout.flat_index(&idx)] += g;
        }
        StridedBuffer::new(out, *input.shape(), seed.dtype())
    }
}
