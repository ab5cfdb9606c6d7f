use crate::buffer::StridedBuffer;
use crate::error::{Error, Result};
use crate::kernel::ReduceKernel;
use crate::shape::{Shape, RANK};

// Built-in reductions along the last axis
//
// Only axis 4 is supported: the input is read in logical order as
// `length / shape[4]` runs of `shape[4]` values, each run collapsing to one
// output element. Any other axis fails with `NotImplemented` rather than
// quietly reducing the wrong elements.
//
// Backward broadcasts the seed back along the reduced axis:
//   Sum:   da[r, j] = seed[r]
//   Mean:  da[r, j] = seed[r] / n

/// The only axis the built-in reductions collapse.
pub const REDUCE_AXIS: usize = RANK - 1;

/// Sum along the last axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

/// Arithmetic mean along the last axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

fn check_axis(op: &'static str, dim: usize) -> Result<()> {
    if dim != REDUCE_AXIS {
        return Err(Error::NotImplemented {
            op,
            detail: format!("reduction along axis {} (only axis {} is supported)", dim, REDUCE_AXIS),
        });
    }
    Ok(())
}

fn reduced_shape(shape: &Shape) -> Shape {
    let mut dims = *shape.dims();
    dims[REDUCE_AXIS] = 1;
    Shape::new(dims)
}

/// Per-run sums of the last axis, in logical order.
fn row_sums(a: &StridedBuffer) -> Vec<f64> {
    let n = a.shape().dims()[REDUCE_AXIS];
    let rows = reduced_shape(a.shape()).elem_count();
    if n == 0 {
        return vec![0.0; rows];
    }
    let values = a.to_vec();
    values.chunks(n).map(|run| run.iter().sum()).collect()
}

/// Repeat each seed element `n` times, scaled.
fn broadcast_rows(a: &StridedBuffer, seed: &StridedBuffer, scale: f64) -> Result<StridedBuffer> {
    let expected = reduced_shape(a.shape());
    if seed.shape() != &expected {
        return Err(Error::ShapeMismatch {
            expected,
            got: *seed.shape(),
        });
    }
    let n = a.shape().dims()[REDUCE_AXIS];
    let mut out = Vec::with_capacity(a.len());
    for g in seed.iter() {
        out.extend(std::iter::repeat(g * scale).take(n));
    }
    StridedBuffer::new(out, *a.shape(), seed.dtype())
}

impl ReduceKernel for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn forward_kernel(&self, a: &StridedBuffer, dim: usize) -> Result<StridedBuffer> {
        check_axis(self.name(), dim)?;
        StridedBuffer::new(row_sums(a), reduced_shape(a.shape()), a.dtype())
    }

    fn backward_kernel(
        &self,
        a: &StridedBuffer,
        dim: usize,
        seed: &StridedBuffer,
    ) -> Result<StridedBuffer> {
        check_axis(self.name(), dim)?;
        broadcast_rows(a, seed, 1.0)
    }
}

impl ReduceKernel for Mean {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn forward_kernel(&self, a: &StridedBuffer, dim: usize) -> Result<StridedBuffer> {
        check_axis(self.name(), dim)?;
        let n = a.shape().dims()[REDUCE_AXIS] as f64;
        let means = row_sums(a).into_iter().map(|s| s / n).collect();
        StridedBuffer::new(means, reduced_shape(a.shape()), a.dtype())
    }

    fn backward_kernel(
        &self,
        a: &StridedBuffer,
        dim: usize,
        seed: &StridedBuffer,
    ) -> Result<StridedBuffer> {
        check_axis(self.name(), dim)?;
        let n = a.shape().dims()[REDUCE_AXIS] as f64;
        broadcast_rows(a, seed, 1.0 / n)
    }
}
