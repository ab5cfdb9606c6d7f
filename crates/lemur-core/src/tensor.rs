use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::buffer::StridedBuffer;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::op::Op;
use crate::shape::Shape;

// Tensor — an autograd node
//
// A Tensor owns its forward value (a StridedBuffer), an optional gradient
// accumulator, and an optional GraphEdge naming the operation that produced
// it and the tensors it consumed.
//
// OWNERSHIP: tensors live in a `Graph` arena and are referred to by
// `TensorId`. A GraphEdge holds ids, not references, and only ever ids of
// tensors allocated before its owner, so edges point strictly backwards and
// the graph can never contain a cycle. Fan-out is just several edges holding
// the same id.
//
// GRADIENT: present iff `retains_grad`. It starts as zeros of the buffer's
// shape and is only ever accumulated into; the Mutex makes each accumulation
// an atomic read-modify-write so sibling backward branches can share a
// descendant.

/// Handle to a tensor inside a [`crate::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    /// Arena index of this tensor.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Provenance of a derived tensor: which op, applied to which inputs.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    inputs: Vec<TensorId>,
    op: Op,
}

impl GraphEdge {
    pub(crate) fn new(op: Op, inputs: Vec<TensorId>) -> Self {
        GraphEdge { inputs, op }
    }

    /// Inputs in the order they were recorded.
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn op(&self) -> &Op {
        &self.op
    }
}

/// An autograd node stored in a [`crate::Graph`].
pub struct Tensor {
    buffer: StridedBuffer,
    requires_grad: bool,
    grad: Option<Mutex<StridedBuffer>>,
    edge: Option<GraphEdge>,
    /// How many recorded edges list this tensor as an input.
    consumers: usize,
}

impl Tensor {
    pub(crate) fn new(buffer: StridedBuffer, requires_grad: bool, edge: Option<GraphEdge>) -> Self {
        Tensor {
            buffer,
            requires_grad,
            grad: None,
            edge,
            consumers: 0,
        }
    }

    // Accessors

    /// The forward value.
    pub fn buffer(&self) -> &StridedBuffer {
        &self.buffer
    }

    pub fn shape(&self) -> &Shape {
        self.buffer.shape()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn numel(&self) -> usize {
        self.buffer.numel()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn retains_grad(&self) -> bool {
        self.grad.is_some()
    }

    /// A leaf has no producing edge; propagation stops here.
    pub fn is_leaf(&self) -> bool {
        self.edge.is_none()
    }

    pub fn edge(&self) -> Option<&GraphEdge> {
        self.edge.as_ref()
    }

    pub fn consumers(&self) -> usize {
        self.consumers
    }

    /// Snapshot of the accumulated gradient.
    pub fn grad(&self) -> Result<Option<StridedBuffer>> {
        match &self.grad {
            Some(cell) => Ok(Some(lock(cell)?.clone())),
            None => Ok(None),
        }
    }

    // Mutation (crate-internal; Graph enforces the rules)

    pub(crate) fn set_requires_grad(&mut self, on: bool) {
        self.requires_grad = on;
        if !on {
            self.grad = None;
        }
    }

    /// Turn gradient retention on or off. Enabling twice keeps the existing grad.
    pub(crate) fn set_retains_grad(&mut self, on: bool) {
        if on {
            self.requires_grad = true;
            if self.grad.is_none() {
                self.grad = Some(Mutex::new(self.buffer.zeros_like()));
            }
        } else {
            self.grad = None;
        }
    }

    pub(crate) fn zero_grad(&mut self) -> Result<()> {
        if let Some(cell) = &self.grad {
            *lock(cell)? = self.buffer.zeros_like();
        }
        Ok(())
    }

    pub(crate) fn replace_buffer(&mut self, buffer: StridedBuffer) {
        self.buffer = buffer;
    }

    pub(crate) fn add_consumer(&mut self) {
        self.consumers += 1;
    }

    /// `grad += seed`, atomically. No-op when the tensor does not retain.
    pub(crate) fn accumulate(&self, seed: &StridedBuffer) -> Result<()> {
        let Some(cell) = &self.grad else {
            return Ok(());
        };
        let mut grad = lock(cell)?;
        if grad.shape() != seed.shape() {
            return Err(Error::SeedShapeMismatch {
                expected: *grad.shape(),
                got: *seed.shape(),
            });
        }
        if grad.dtype() != seed.dtype() {
            return Err(Error::DTypeMismatch {
                expected: grad.dtype(),
                got: seed.dtype(),
            });
        }
        *grad = grad.add(seed)?;
        Ok(())
    }
}

fn lock(cell: &Mutex<StridedBuffer>) -> Result<MutexGuard<'_, StridedBuffer>> {
    cell.lock().map_err(|_| Error::LockPoisoned)
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, requires_grad={}, retains_grad={}, op={})",
            self.shape(),
            self.dtype(),
            self.requires_grad,
            self.retains_grad(),
            self.edge
                .as_ref()
                .map(|e| e.op().name())
                .unwrap_or("leaf"),
        )
    }
}
