// Backprop — Reverse-mode gradient propagation
//
// `backward(root)` seeds a scalar tensor with 1 and hands off to
// `derive(root, seed)`, which walks the recorded GraphEdges depth-first on an
// explicit stack (graph depth never touches the call stack):
//
//   1. accumulate: if the tensor retains a grad, grad += seed
//   2. propagate:  look up the edge's Op, run its backward kernel to turn
//                  the seed into one seed per input, and derive each input
//                  in the order the inputs were recorded
//
// A tensor with `requires_grad == false` stops the walk. Leaves stop it too,
// after accumulating.
//
// ACCUMULATION: a tensor consumed by several operations is visited once per
// path. Its grad ends up as the sum of every path's contribution, which is
// exactly the multivariate chain rule:
//
//   c = a * a   →   grad_a = grad_c * a + grad_c * a
//
// PARALLEL BINARY BACKWARD: the two branches of a binary op share nothing
// but descendants, and each accumulation locks the descendant's grad. With
// `GraphConfig::parallel_backward` set they run under `rayon::join`; the
// order in which contributions are summed is then unspecified, so results
// may differ from a sequential run by floating-point reassociation only.
//
// CONTRACTS: every backward kernel must return a gradient with the shape
// and dtype of the input it is for. Anything else is a ContractViolation
// naming the op. A binary op checks both of its gradients before either
// branch is walked.

use tracing::{debug, trace};

use crate::buffer::StridedBuffer;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::op::{BinaryOp, Op, ReduceOp, ShapeOp, UnaryOp};
use crate::tensor::TensorId;

impl Graph {
    /// Backpropagate from a scalar tensor.
    ///
    /// Fails with `NotAScalar` unless the tensor holds exactly one element.
    /// A backward kernel that fails its contract aborts the walk; grads
    /// accumulated by branches finished before the failing op are kept.
    pub fn backward(&self, root: TensorId) -> Result<()> {
        let tensor = self.get(root)?;
        let buffer = tensor.buffer();
        if buffer.numel() != 1 || buffer.len() != 1 {
            return Err(Error::NotAScalar {
                shape: *buffer.shape(),
            });
        }
        debug!(
            root = %root,
            tensors = self.len(),
            parallel = self.config().parallel_backward,
            "backward"
        );
        let seed = StridedBuffer::unit_seed(buffer.dtype());
        self.derive(root, &seed)
    }

    /// Propagate `seed` into `id` and everything it was computed from.
    ///
    /// `seed` must have the tensor's shape and dtype.
    pub fn derive(&self, id: TensorId, seed: &StridedBuffer) -> Result<()> {
        self.propagate(vec![(id, seed.clone())])
    }

    /// Depth-first walk over an explicit stack, so graph depth never turns
    /// into call-stack depth. Inputs are pushed in reverse and therefore
    /// visited in recorded order.
    fn propagate(&self, mut stack: Vec<(TensorId, StridedBuffer)>) -> Result<()> {
        while let Some((id, seed)) = stack.pop() {
            let tensor = self.get(id)?;
            if !tensor.requires_grad() {
                continue;
            }
            if seed.shape() != tensor.shape() {
                return Err(Error::SeedShapeMismatch {
                    expected: *tensor.shape(),
                    got: *seed.shape(),
                });
            }
            if seed.dtype() != tensor.dtype() {
                return Err(Error::DTypeMismatch {
                    expected: tensor.dtype(),
                    got: seed.dtype(),
                });
            }
            tensor.accumulate(&seed)?;

            let Some(edge) = tensor.edge() else {
                continue;
            };
            trace!(tensor = %id, op = edge.op().name(), "derive");
            let inputs = edge.inputs();
            match edge.op() {
                Op::Unary(op) => {
                    if let Some(grad) = self.unary_grad(op, inputs[0], &seed)? {
                        stack.push((inputs[0], grad));
                    }
                }
                Op::Binary(op) => {
                    let pair = [inputs[0], inputs[1]];
                    match self.binary_grads(op, pair, &seed)? {
                        [Some(left), Some(right)] if self.split(&seed) => {
                            let (l, r) = rayon::join(
                                || self.propagate(vec![(pair[0], left)]),
                                || self.propagate(vec![(pair[1], right)]),
                            );
                            l?;
                            r?;
                        }
                        [left, right] => {
                            if let Some(grad) = right {
                                stack.push((pair[1], grad));
                            }
                            if let Some(grad) = left {
                                stack.push((pair[0], grad));
                            }
                        }
                    }
                }
                Op::Reduce { op, dim } => {
                    if let Some(grad) = self.reduce_grad(*op, *dim, inputs[0], &seed)? {
                        stack.push((inputs[0], grad));
                    }
                }
                Op::Shape(op) => {
                    if let Some(grad) = self.shape_grad(op, inputs[0], &seed)? {
                        stack.push((inputs[0], grad));
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether the two branches of a binary backward go to separate tasks.
    fn split(&self, seed: &StridedBuffer) -> bool {
        let config = self.config();
        config.parallel_backward && seed.numel() >= config.parallel_threshold
    }

    // Per-kind backward drivers: `None` when the input does not want a grad.

    fn unary_grad(
        &self,
        op: &UnaryOp,
        input: TensorId,
        seed: &StridedBuffer,
    ) -> Result<Option<StridedBuffer>> {
        let tensor = self.get(input)?;
        if !tensor.requires_grad() {
            return Ok(None);
        }
        let kernel = op.kernel();
        let grad = kernel.backward_kernel(tensor.buffer(), seed)?;
        check_grad(kernel.name(), tensor.buffer(), &grad)?;
        Ok(Some(grad))
    }

    /// Both branch grads are computed and checked before either is
    /// propagated, so a bad kernel leaves both subtrees untouched.
    fn binary_grads(
        &self,
        op: &BinaryOp,
        inputs: [TensorId; 2],
        seed: &StridedBuffer,
    ) -> Result<[Option<StridedBuffer>; 2]> {
        let kernel = op.kernel();
        let lhs = self.get(inputs[0])?;
        let rhs = self.get(inputs[1])?;
        let buffers = [lhs.buffer(), rhs.buffer()];
        let wanted = [lhs.requires_grad(), rhs.requires_grad()];

        let mut grads = [None, None];
        for idx in 0..2 {
            if !wanted[idx] {
                continue;
            }
            let grad = kernel.backward_kernel(buffers, seed, idx)?;
            check_grad(kernel.name(), buffers[idx], &grad)?;
            grads[idx] = Some(grad);
        }
        Ok(grads)
    }

    fn reduce_grad(
        &self,
        op: ReduceOp,
        dim: usize,
        input: TensorId,
        seed: &StridedBuffer,
    ) -> Result<Option<StridedBuffer>> {
        let tensor = self.get(input)?;
        if !tensor.requires_grad() {
            return Ok(None);
        }
        let kernel = op.kernel();
        let grad = kernel.backward_kernel(tensor.buffer(), dim, seed)?;
        check_grad(kernel.name(), tensor.buffer(), &grad)?;
        Ok(Some(grad))
    }

    fn shape_grad(
        &self,
        op: &ShapeOp,
        input: TensorId,
        seed: &StridedBuffer,
    ) -> Result<Option<StridedBuffer>> {
        let tensor = self.get(input)?;
        if !tensor.requires_grad() {
            return Ok(None);
        }
        let kernel = op.kernel();
        let grad = kernel.backward_kernel(tensor.buffer(), seed)?;
        check_grad(kernel.name(), tensor.buffer(), &grad)?;
        Ok(Some(grad))
    }
}

fn check_grad(op: &'static str, input: &StridedBuffer, grad: &StridedBuffer) -> Result<()> {
    if grad.shape() != input.shape() {
        return Err(Error::contract(
            op,
            format!(
                "backward returned shape {} for an input of shape {}",
                grad.shape(),
                input.shape()
            ),
        ));
    }
    if grad.dtype() != input.dtype() {
        return Err(Error::contract(
            op,
            format!(
                "backward returned dtype {} for an input of dtype {}",
                grad.dtype(),
                input.dtype()
            ),
        ));
    }
    Ok(())
}
