use crate::dtype::DType;
use crate::shape::Shape;
use crate::tensor::TensorId;

/// All errors that can occur within lemur-core.
///
/// Every variant is fail-fast: the operation that produced it has not created
/// any new tensor or graph edge, so the graph is left exactly as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Operand shapes are incompatible (binary equality, matmul inner dims, expand target).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operand element kinds differ where identity is required.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// Flat storage length does not match the element count of the shape.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// A shape/stride pair aliases two indices to one offset, or reaches past the storage.
    #[error("invalid stride {stride:?} for shape {shape}: {reason}")]
    InvalidStride {
        shape: Shape,
        stride: [usize; 5],
        reason: &'static str,
    },

    /// More than five dimensions were supplied.
    #[error("rank {rank} exceeds the fixed rank of 5")]
    InvalidRank { rank: usize },

    /// Axis index outside `0..5`.
    #[error("invalid axis: dim {dim} for tensor with {rank} dimensions")]
    InvalidAxis { dim: usize, rank: usize },

    /// Permutation is not a rearrangement of `0..5`.
    #[error("invalid permutation {dims:?}")]
    InvalidPermutation { dims: [usize; 5] },

    /// A kernel returned a buffer that breaks the guarantee of its operation kind.
    #[error("contract violation in `{op}`: {detail}")]
    ContractViolation { op: &'static str, detail: String },

    /// Attempted to replace the value of a tensor that recorded edges depend on.
    #[error("tensor {id} is frozen: consumed by {consumers} operation(s)")]
    FrozenViolation { id: TensorId, consumers: usize },

    /// `backward()` was called on a tensor with more than one element.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// A propagated gradient does not match the shape of the accumulating grad.
    #[error("seed shape mismatch: grad has shape {expected}, seed has shape {got}")]
    SeedShapeMismatch { expected: Shape, got: Shape },

    /// The operation does not support this axis or configuration.
    #[error("`{op}` not implemented: {detail}")]
    NotImplemented { op: &'static str, detail: String },

    /// The handle does not belong to this graph.
    #[error("unknown tensor {0}")]
    UnknownTensor(TensorId),

    /// A gradient lock was poisoned by a panicking thread.
    #[error("gradient lock poisoned")]
    LockPoisoned,

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub(crate) fn contract(op: &'static str, detail: impl Into<String>) -> Self {
        Error::ContractViolation {
            op,
            detail: detail.into(),
        }
    }
}

/// Convenience Result type used throughout lemur-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
