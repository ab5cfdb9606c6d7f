use crate::buffer::StridedBuffer;
use crate::error::Result;

// Kernel contracts — the four operation kinds
//
// A concrete operation supplies exactly two primitives, a forward kernel and
// a backward kernel, over StridedBuffers. Drivers in `graph` (apply) and
// `backprop` (backward) are shared by every operation of a kind and are not
// overridable: they check that each kernel output honours the kind's
// promise before any Tensor or GraphEdge is built from it.
//
//   kind     forward must return            backward must return
//   Unary    same shape/dtype/len as a      shape of a
//   Binary   same shape/dtype/len as a, b   shape of inputs[idx]
//   Reduce   size 1 along dim, same dtype   shape of a
//   Shape    same dtype                     shape of a
//
// A kernel that breaks its row of the table makes the driver fail with
// `ContractViolation`. Kernels may assume their inputs were already checked
// (equal shapes for Binary, a supported axis for Reduce).
//
// All kernels must be `Send + Sync`: the backward walk can run the two
// branches of a Binary op on different threads.

/// Elementwise function of one buffer.
pub trait UnaryKernel: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer>;

    /// Gradient with respect to `a` given the output gradient `seed`.
    fn backward_kernel(&self, a: &StridedBuffer, seed: &StridedBuffer) -> Result<StridedBuffer>;
}

/// Elementwise function of two equally-shaped buffers.
pub trait BinaryKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer>;

    /// Gradient with respect to `inputs[idx]`, `idx` being 0 or 1.
    fn backward_kernel(
        &self,
        inputs: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer>;
}

/// Reduction along one axis, keeping it with size 1.
pub trait ReduceKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn forward_kernel(&self, a: &StridedBuffer, dim: usize) -> Result<StridedBuffer>;

    fn backward_kernel(
        &self,
        a: &StridedBuffer,
        dim: usize,
        seed: &StridedBuffer,
    ) -> Result<StridedBuffer>;
}

/// Rearranges shape/stride without changing element values.
pub trait ShapeKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer>;

    /// Map an output-shaped seed back onto the layout of `input`.
    fn backward_kernel(&self, input: &StridedBuffer, seed: &StridedBuffer)
        -> Result<StridedBuffer>;
}
