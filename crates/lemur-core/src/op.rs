// Op — Which operation produced a tensor
//
// Every GraphEdge records an Op tag instead of a closure. The tag is enough
// to find the kernel again (`kernel()` is the dispatch table) and it can be
// printed, compared by id, and inspected without running anything.
//
//   Op::Unary(UnaryOp::Relu)            → unary::Relu
//   Op::Binary(BinaryOp::Mul)           → binary::HadamardProduct
//   Op::Reduce { op: Sum, dim: 4 }      → reduce::Sum
//   Op::Shape(ShapeOp::Permute(..))     → reshape::Permute
//
// User kernels enter through `UnaryOp::Custom` / `BinaryOp::Custom` and go
// through exactly the same contract-checking drivers as the built-ins.
//
// OPERATION NAME REGISTRY: each built-in has a stable numeric id. Ids are
// grouped by kind so a new op never renumbers an existing one.
//
//   unary   0..16     binary  16..32     reduce  32..48     shape  48..64

use std::fmt;
use std::sync::Arc;

use crate::kernel::{BinaryKernel, ReduceKernel, ShapeKernel, UnaryKernel};
use crate::reshape::{Expand, Permute, View};
use crate::{binary, reduce, unary};

/// Stable id → name table for built-in operations.
pub const OP_REGISTRY: &[(u32, &str)] = &[
    (0, "relu"),
    (1, "sigmoid"),
    (2, "neg"),
    (3, "exp"),
    (4, "log"),
    (5, "sqrt"),
    (6, "abs"),
    (7, "sign"),
    (8, "reciprocal"),
    (16, "add"),
    (17, "sub"),
    (18, "hadamard_product"),
    (19, "div"),
    (20, "pow"),
    (32, "sum"),
    (33, "mean"),
    (48, "view"),
    (49, "permute"),
    (50, "expand"),
];

/// Resolve a built-in operation id to its name.
pub fn op_name(id: u32) -> Option<&'static str> {
    OP_REGISTRY
        .iter()
        .find(|(i, _)| *i == id)
        .map(|(_, name)| *name)
}

/// Element-wise unary operations.
#[derive(Clone)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Neg,
    Exp,
    Log,
    Sqrt,
    Abs,
    Sign,
    Reciprocal,
    Custom(Arc<dyn UnaryKernel>),
}

/// Element-wise binary operations.
#[derive(Clone)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Custom(Arc<dyn BinaryKernel>),
}

/// Reductions along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
}

/// Shape/stride rearrangements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeOp {
    View(View),
    Permute(Permute),
    Expand(Expand),
}

/// Records the operation that produced a tensor.
#[derive(Debug, Clone)]
pub enum Op {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduce { op: ReduceOp, dim: usize },
    Shape(ShapeOp),
}

impl UnaryOp {
    /// Wrap a user kernel.
    pub fn custom(kernel: impl UnaryKernel + 'static) -> Self {
        UnaryOp::Custom(Arc::new(kernel))
    }

    pub fn kernel(&self) -> &dyn UnaryKernel {
        match self {
            UnaryOp::Relu => &unary::Relu,
            UnaryOp::Sigmoid => &unary::Sigmoid,
            UnaryOp::Neg => &unary::Neg,
            UnaryOp::Exp => &unary::Exp,
            UnaryOp::Log => &unary::Log,
            UnaryOp::Sqrt => &unary::Sqrt,
            UnaryOp::Abs => &unary::Abs,
            UnaryOp::Sign => &unary::Sign,
            UnaryOp::Reciprocal => &unary::Reciprocal,
            UnaryOp::Custom(k) => k.as_ref(),
        }
    }

    /// Registry id; `None` for custom kernels.
    pub fn id(&self) -> Option<u32> {
        let id = match self {
            UnaryOp::Relu => 0,
            UnaryOp::Sigmoid => 1,
            UnaryOp::Neg => 2,
            UnaryOp::Exp => 3,
            UnaryOp::Log => 4,
            UnaryOp::Sqrt => 5,
            UnaryOp::Abs => 6,
            UnaryOp::Sign => 7,
            UnaryOp::Reciprocal => 8,
            UnaryOp::Custom(_) => return None,
        };
        Some(id)
    }
}

impl BinaryOp {
    /// Wrap a user kernel.
    pub fn custom(kernel: impl BinaryKernel + 'static) -> Self {
        BinaryOp::Custom(Arc::new(kernel))
    }

    pub fn kernel(&self) -> &dyn BinaryKernel {
        match self {
            BinaryOp::Add => &binary::Add,
            BinaryOp::Sub => &binary::Sub,
            BinaryOp::Mul => &binary::HadamardProduct,
            BinaryOp::Div => &binary::Div,
            BinaryOp::Pow => &binary::Pow,
            BinaryOp::Custom(k) => k.as_ref(),
        }
    }

    pub fn id(&self) -> Option<u32> {
        let id = match self {
            BinaryOp::Add => 16,
            BinaryOp::Sub => 17,
            BinaryOp::Mul => 18,
            BinaryOp::Div => 19,
            BinaryOp::Pow => 20,
            BinaryOp::Custom(_) => return None,
        };
        Some(id)
    }
}

impl ReduceOp {
    pub fn kernel(&self) -> &'static dyn ReduceKernel {
        match self {
            ReduceOp::Sum => &reduce::Sum,
            ReduceOp::Mean => &reduce::Mean,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            ReduceOp::Sum => 32,
            ReduceOp::Mean => 33,
        }
    }
}

impl ShapeOp {
    pub fn kernel(&self) -> &dyn ShapeKernel {
        match self {
            ShapeOp::View(k) => k,
            ShapeOp::Permute(k) => k,
            ShapeOp::Expand(k) => k,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            ShapeOp::View(_) => 48,
            ShapeOp::Permute(_) => 49,
            ShapeOp::Expand(_) => 50,
        }
    }
}

impl Op {
    /// Human-readable name, as cited in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Unary(op) => op.kernel().name(),
            Op::Binary(op) => op.kernel().name(),
            Op::Reduce { op, .. } => op.kernel().name(),
            Op::Shape(op) => op.kernel().name(),
        }
    }

    /// Registry id; `None` for custom kernels.
    pub fn id(&self) -> Option<u32> {
        match self {
            Op::Unary(op) => op.id(),
            Op::Binary(op) => op.id(),
            Op::Reduce { op, .. } => Some(op.id()),
            Op::Shape(op) => Some(op.id()),
        }
    }

    /// Number of inputs a GraphEdge for this op holds.
    pub fn arity(&self) -> usize {
        match self {
            Op::Binary(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Debug for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Custom(k) => write!(f, "Custom({})", k.name()),
            other => write!(f, "{}", other.kernel().name()),
        }
    }
}

impl fmt::Debug for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Custom(k) => write!(f, "Custom({})", k.name()),
            other => write!(f, "{}", other.kernel().name()),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn test_registry_matches_kernel_names() {
        let ops = [
            Op::Unary(UnaryOp::Relu),
            Op::Unary(UnaryOp::Sigmoid),
            Op::Unary(UnaryOp::Neg),
            Op::Unary(UnaryOp::Exp),
            Op::Unary(UnaryOp::Log),
            Op::Unary(UnaryOp::Sqrt),
            Op::Unary(UnaryOp::Abs),
            Op::Unary(UnaryOp::Sign),
            Op::Unary(UnaryOp::Reciprocal),
            Op::Binary(BinaryOp::Add),
            Op::Binary(BinaryOp::Sub),
            Op::Binary(BinaryOp::Mul),
            Op::Binary(BinaryOp::Div),
            Op::Binary(BinaryOp::Pow),
            Op::Reduce { op: ReduceOp::Sum, dim: 4 },
            Op::Reduce { op: ReduceOp::Mean, dim: 4 },
            Op::Shape(ShapeOp::View(View { shape: Shape::scalar() })),
            Op::Shape(ShapeOp::Permute(Permute { dims: [0, 1, 2, 3, 4] })),
            Op::Shape(ShapeOp::Expand(Expand { shape: Shape::scalar() })),
        ];
        assert_eq!(ops.len(), OP_REGISTRY.len());
        for op in &ops {
            let id = op.id().unwrap();
            assert_eq!(op_name(id), Some(op.name()));
        }
    }

    #[test]
    fn test_unknown_id() {
        assert_eq!(op_name(15), None);
        assert_eq!(op_name(18), Some("hadamard_product"));
    }

    #[test]
    fn test_arity() {
        assert_eq!(Op::Binary(BinaryOp::Add).arity(), 2);
        assert_eq!(Op::Unary(UnaryOp::Exp).arity(), 1);
    }
}
