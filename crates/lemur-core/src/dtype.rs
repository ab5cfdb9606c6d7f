use std::fmt;

// DType — Element kinds a buffer may carry
//
// Storage is always held as f64; the dtype decides which values are
// representable. Every buffer constructor rounds through the dtype, so an
// F16 buffer only ever holds f16-representable numbers and two buffers of
// different dtypes never meet in a binary kernel.
//
//   F16  — 16-bit IEEE half float
//   BF16 — 16-bit brain float
//   F32  — 32-bit float, the default
//   F64  — 64-bit float, no rounding

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Round `v` to the nearest value representable in this dtype.
    pub fn round(&self, v: f64) -> f64 {
        match self {
            DType::F16 => half::f16::from_f64(v).to_f64(),
            DType::BF16 => half::bf16::from_f64(v).to_f64(),
            DType::F32 => v as f32 as f64,
            DType::F64 => v,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Trait implemented by Rust types that can seed or be read out of a buffer.
///
/// Provides the mapping between the concrete Rust type and the DType enum,
/// plus conversions to/from f64 storage.
pub trait WithDType: Copy + Send + Sync + 'static + num_traits::NumCast + fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 storage.
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64 storage.
    fn from_f64(v: f64) -> Self;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}
