use tracing::debug;

use crate::buffer::StridedBuffer;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::op::{BinaryOp, Op, ReduceOp, ShapeOp, UnaryOp};
use crate::reshape::{Expand, Permute, View};
use crate::shape::{Shape, RANK};
use crate::tensor::{GraphEdge, Tensor, TensorId};

// Graph — arena of tensors plus the forward drivers
//
// Every operation call runs its forward kernel immediately and returns the
// id of a fully-formed tensor. There is no deferred execution.
//
// The four `apply_*` drivers are the only way a derived tensor is created.
// Each one:
//   1. checks operand preconditions (equal shapes, valid axis, ...)
//   2. runs the kernel
//   3. checks the kernel output against the kind's contract
//   4. records a GraphEdge if any input requires grad
// A failure at any step returns before anything is pushed, so a failed call
// never leaves a half-built tensor or edge behind.

/// Graph-wide settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Dtype used by constructors that take raw `f64` data (default: F32).
    pub default_dtype: DType,
    /// Run the two branches of a binary backward on separate rayon tasks.
    pub parallel_backward: bool,
    /// Seeds smaller than this stay sequential even in parallel mode.
    pub parallel_threshold: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_dtype: DType::F32,
            parallel_backward: false,
            parallel_threshold: 4096,
        }
    }
}

impl GraphConfig {
    /// Set default dtype.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.default_dtype = dtype;
        self
    }

    /// Enable or disable parallel binary backward.
    pub fn with_parallel_backward(mut self, parallel: bool) -> Self {
        self.parallel_backward = parallel;
        self
    }

    /// Minimum seed size for a parallel split.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }
}

/// Arena owning every tensor of one computation.
#[derive(Debug, Default)]
pub struct Graph {
    tensors: Vec<Tensor>,
    config: GraphConfig,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Graph {
            tensors: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of tensors allocated so far.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors.get(id.0).ok_or(Error::UnknownTensor(id))
    }

    fn get_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors.get_mut(id.0).ok_or(Error::UnknownTensor(id))
    }

    pub fn buffer(&self, id: TensorId) -> Result<&StridedBuffer> {
        Ok(self.get(id)?.buffer())
    }

    /// Snapshot of a tensor's accumulated gradient, if it retains one.
    pub fn grad(&self, id: TensorId) -> Result<Option<StridedBuffer>> {
        self.get(id)?.grad()
    }

    // Leaf construction

    /// Add a user tensor. A leaf that requires grad also retains it.
    pub fn leaf(&mut self, buffer: StridedBuffer, requires_grad: bool) -> TensorId {
        let mut tensor = Tensor::new(buffer, requires_grad, None);
        if requires_grad {
            tensor.set_retains_grad(true);
        }
        let id = self.push(tensor);
        debug!(tensor = %id, requires_grad, "leaf");
        id
    }

    /// Leaf from row-major `f64` data in the configured default dtype.
    /// `dims` of rank below five are left-padded with 1s.
    pub fn from_slice(
        &mut self,
        data: &[f64],
        dims: &[usize],
        requires_grad: bool,
    ) -> Result<TensorId> {
        let shape = Shape::from_dims(dims)?;
        let buffer = StridedBuffer::new(data.to_vec(), shape, self.config.default_dtype)?;
        Ok(self.leaf(buffer, requires_grad))
    }

    fn push(&mut self, tensor: Tensor) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(tensor);
        id
    }

    // Gradient flags

    /// Enable or disable gradient retention. Enabling an already-retaining
    /// tensor keeps its accumulated grad.
    pub fn retain_grad(&mut self, id: TensorId, on: bool) -> Result<()> {
        self.get_mut(id)?.set_retains_grad(on);
        Ok(())
    }

    /// Disabling also drops retention; such a tensor blocks propagation.
    pub fn set_requires_grad(&mut self, id: TensorId, on: bool) -> Result<()> {
        self.get_mut(id)?.set_requires_grad(on);
        Ok(())
    }

    /// Reset a retained grad to zeros.
    pub fn zero_grad(&mut self, id: TensorId) -> Result<()> {
        self.get_mut(id)?.zero_grad()
    }

    /// Replace the value of a leaf that no recorded edge consumes yet.
    ///
    /// Fails with `FrozenViolation` once the tensor is an input of any edge,
    /// and with `ShapeMismatch`/`DTypeMismatch` when the new value would not
    /// fit the tensor's grad.
    pub fn replace_data(&mut self, id: TensorId, buffer: StridedBuffer) -> Result<()> {
        let tensor = self.get_mut(id)?;
        if tensor.consumers() > 0 || !tensor.is_leaf() {
            return Err(Error::FrozenViolation {
                id,
                consumers: tensor.consumers(),
            });
        }
        if buffer.shape() != tensor.shape() {
            return Err(Error::ShapeMismatch {
                expected: *tensor.shape(),
                got: *buffer.shape(),
            });
        }
        if buffer.dtype() != tensor.dtype() {
            return Err(Error::DTypeMismatch {
                expected: tensor.dtype(),
                got: buffer.dtype(),
            });
        }
        tensor.replace_buffer(buffer);
        Ok(())
    }

    // Drivers

    fn record(&mut self, op: Op, inputs: Vec<TensorId>, buffer: StridedBuffer) -> Result<TensorId> {
        let mut requires_grad = false;
        for &input in &inputs {
            requires_grad |= self.get(input)?.requires_grad();
        }
        let edge = if requires_grad {
            for &input in &inputs {
                self.get_mut(input)?.add_consumer();
            }
            Some(GraphEdge::new(op.clone(), inputs.clone()))
        } else {
            None
        };
        let id = self.push(Tensor::new(buffer, requires_grad, edge));
        debug!(tensor = %id, op = op.name(), ?inputs, requires_grad, "apply");
        Ok(id)
    }

    /// Apply an elementwise unary op.
    pub fn apply_unary(&mut self, op: UnaryOp, a: TensorId) -> Result<TensorId> {
        let input = self.buffer(a)?;
        let kernel = op.kernel();
        let out = kernel.forward_kernel(input)?;
        check_preserved(kernel.name(), input, &out)?;
        self.record(Op::Unary(op), vec![a], out)
    }

    /// Apply an elementwise binary op to two tensors of identical shape and dtype.
    pub fn apply_binary(&mut self, op: BinaryOp, a: TensorId, b: TensorId) -> Result<TensorId> {
        let lhs = self.buffer(a)?;
        let rhs = self.buffer(b)?;
        check_same_operands(lhs, rhs)?;
        let kernel = op.kernel();
        let out = kernel.forward_kernel(lhs, rhs)?;
        check_preserved(kernel.name(), lhs, &out)?;
        self.record(Op::Binary(op), vec![a, b], out)
    }

    /// Reduce along `dim`, keeping it with size 1.
    pub fn apply_reduce(&mut self, op: ReduceOp, a: TensorId, dim: usize) -> Result<TensorId> {
        if dim >= RANK {
            return Err(Error::InvalidAxis { dim, rank: RANK });
        }
        let input = self.buffer(a)?;
        let kernel = op.kernel();
        let out = kernel.forward_kernel(input, dim)?;
        check_reduced(kernel.name(), input, &out, dim)?;
        self.record(Op::Reduce { op, dim }, vec![a], out)
    }

    /// Apply a shape/stride rearrangement.
    pub fn apply_shape(&mut self, op: ShapeOp, a: TensorId) -> Result<TensorId> {
        let input = self.buffer(a)?;
        let kernel = op.kernel();
        let out = kernel.forward_kernel(input)?;
        if out.dtype() != input.dtype() {
            return Err(Error::contract(
                kernel.name(),
                format!("dtype changed from {} to {}", input.dtype(), out.dtype()),
            ));
        }
        self.record(Op::Shape(op), vec![a], out)
    }

    // Built-in operations

    pub fn relu(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Relu, a)
    }

    pub fn sigmoid(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Sigmoid, a)
    }

    pub fn neg(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Neg, a)
    }

    pub fn exp(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Exp, a)
    }

    pub fn log(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Log, a)
    }

    pub fn sqrt(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Sqrt, a)
    }

    pub fn abs(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Abs, a)
    }

    pub fn sign(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Sign, a)
    }

    pub fn reciprocal(&mut self, a: TensorId) -> Result<TensorId> {
        self.apply_unary(UnaryOp::Reciprocal, a)
    }

    pub fn add(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.apply_binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.apply_binary(BinaryOp::Sub, a, b)
    }

    /// Elementwise product.
    pub fn hadamard_product(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.apply_binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.apply_binary(BinaryOp::Div, a, b)
    }

    pub fn pow(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.apply_binary(BinaryOp::Pow, a, b)
    }

    pub fn sum(&mut self, a: TensorId, dim: usize) -> Result<TensorId> {
        self.apply_reduce(ReduceOp::Sum, a, dim)
    }

    pub fn mean(&mut self, a: TensorId, dim: usize) -> Result<TensorId> {
        self.apply_reduce(ReduceOp::Mean, a, dim)
    }

    pub fn view(&mut self, a: TensorId, shape: impl Into<Shape>) -> Result<TensorId> {
        let shape = shape.into();
        self.apply_shape(ShapeOp::View(View { shape }), a)
    }

    pub fn permute(&mut self, a: TensorId, dims: [usize; RANK]) -> Result<TensorId> {
        self.apply_shape(ShapeOp::Permute(Permute { dims }), a)
    }

    pub fn expand(&mut self, a: TensorId, shape: impl Into<Shape>) -> Result<TensorId> {
        let shape = shape.into();
        self.apply_shape(ShapeOp::Expand(Expand { shape }), a)
    }

    /// Batched matrix product over the last two axes.
    ///
    /// `a` is (d0, d1, d2, i, j), `b` is (d0, d1, d2, j, k); the result is
    /// (d0, d1, d2, i, k). Built from primitives, so its gradient needs no
    /// rule of its own:
    ///
    ///   a → view (d0·d1, d2, i, 1, j) → expand (d0·d1, d2, i, k, j)
    ///   b → permute last two → view (d0·d1, d2, 1, k, j) → expand (.., i, k, j)
    ///   hadamard_product → sum over axis 4 → view (d0, d1, d2, i, k)
    pub fn matmul(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        let [d0, d1, d2, i, j] = *self.buffer(a)?.shape().dims();
        let b_shape = *self.buffer(b)?.shape();
        let [e0, e1, e2, j2, k] = *b_shape.dims();
        if [d0, d1, d2] != [e0, e1, e2] || j != j2 {
            return Err(Error::ShapeMismatch {
                expected: Shape::new([d0, d1, d2, j, k]),
                got: b_shape,
            });
        }
        let batch = d0 * d1;

        let av = self.view(a, Shape::new([batch, d2, i, 1, j]))?;
        let ae = self.expand(av, Shape::new([batch, d2, i, k, j]))?;

        let bt = self.permute(b, [0, 1, 2, 4, 3])?;
        let bv = self.view(bt, Shape::new([batch, d2, 1, k, j]))?;
        let be = self.expand(bv, Shape::new([batch, d2, i, k, j]))?;

        let prod = self.hadamard_product(ae, be)?;
        let summed = self.sum(prod, RANK - 1)?;
        self.view(summed, Shape::new([d0, d1, d2, i, k]))
    }
}

// Contract checks shared by the drivers

fn check_same_operands(a: &StridedBuffer, b: &StridedBuffer) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: *a.shape(),
            got: *b.shape(),
        });
    }
    if a.dtype() != b.dtype() {
        return Err(Error::DTypeMismatch {
            expected: a.dtype(),
            got: b.dtype(),
        });
    }
    Ok(())
}

/// Elementwise kernels must keep shape, dtype and length.
pub(crate) fn check_preserved(
    op: &'static str,
    input: &StridedBuffer,
    out: &StridedBuffer,
) -> Result<()> {
    if out.shape() != input.shape() {
        return Err(Error::contract(
            op,
            format!("shape changed from {} to {}", input.shape(), out.shape()),
        ));
    }
    if out.dtype() != input.dtype() {
        return Err(Error::contract(
            op,
            format!("dtype changed from {} to {}", input.dtype(), out.dtype()),
        ));
    }
    if out.len() != input.len() {
        return Err(Error::contract(
            op,
            format!("length changed from {} to {}", input.len(), out.len()),
        ));
    }
    Ok(())
}

fn check_reduced(
    op: &'static str,
    input: &StridedBuffer,
    out: &StridedBuffer,
    dim: usize,
) -> Result<()> {
    let expected = input.shape().with_dim(dim, 1)?;
    if out.shape() != &expected {
        return Err(Error::contract(
            op,
            format!("expected output shape {}, got {}", expected, out.shape()),
        ));
    }
    if out.dtype() != input.dtype() {
        return Err(Error::contract(
            op,
            format!("dtype changed from {} to {}", input.dtype(), out.dtype()),
        ));
    }
    if out.len() * input.shape().dims()[dim] != input.len() {
        return Err(Error::contract(
            op,
            format!(
                "{} output elements do not divide {} inputs along axis {}",
                out.len(),
                input.len(),
                dim
            ),
        ));
    }
    Ok(())
}
