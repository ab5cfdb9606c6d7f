//! # lemur-core
//!
//! Reverse-mode automatic differentiation over fixed rank-5 strided tensors.
//!
//! This crate provides:
//! - [`StridedBuffer`]: an immutable, validated strided value
//! - [`Graph`]: an arena of [`Tensor`]s with the forward drivers and `backward`
//! - four kernel contracts ([`UnaryKernel`], [`BinaryKernel`], [`ReduceKernel`],
//!   [`ShapeKernel`]) plus the built-in ops behind [`Op`]
//! - [`init`]: fillers for leaf values
//!
//! ```
//! use lemur_core::{Graph, GraphConfig, DType};
//!
//! let mut g = Graph::with_config(GraphConfig::default().with_dtype(DType::F64));
//! let a = g.from_slice(&[1.0, 2.0, 3.0, 4.0], &[4], true)?;
//! let b = g.from_slice(&[10.0; 4], &[4], true)?;
//! let c = g.add(a, b)?;
//! let d = g.hadamard_product(c, a)?;
//! let e = g.sum(d, 4)?;
//! g.backward(e)?;
//! assert_eq!(g.grad(a)?.unwrap().to_vec(), vec![12.0, 14.0, 16.0, 18.0]);
//! assert_eq!(g.grad(b)?.unwrap().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
//! # Ok::<(), lemur_core::Error>(())
//! ```

// - Shape/Layout: rank-5 shapes, strides and their validation
// - StridedBuffer: the value type every kernel reads and writes
// - kernel + unary/binary/reduce/reshape: contracts and built-in kernels
// - Op: the tag a GraphEdge records instead of a closure
// - Tensor/Graph: autograd nodes and the arena that owns them
// - backprop: derive/backward

pub mod backprop;
pub mod binary;
pub mod buffer;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod init;
pub mod kernel;
pub mod layout;
pub mod op;
pub mod reduce;
pub mod reshape;
pub mod shape;
pub mod tensor;
pub mod unary;

pub use buffer::StridedBuffer;
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use graph::{Graph, GraphConfig};
pub use kernel::{BinaryKernel, ReduceKernel, ShapeKernel, UnaryKernel};
pub use layout::Layout;
pub use op::{op_name, BinaryOp, Op, ReduceOp, ShapeOp, UnaryOp, OP_REGISTRY};
pub use shape::{Shape, RANK};
pub use tensor::{GraphEdge, Tensor, TensorId};
