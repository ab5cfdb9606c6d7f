use crate::bail;
use crate::buffer::StridedBuffer;
use crate::error::Result;
use crate::kernel::BinaryKernel;

// Built-in elementwise binary kernels
//
// GRADIENT RULES (seed = dL/dy, y = f(a, b)):
//
//   Add:   da = seed                 db = seed
//   Sub:   da = seed                 db = -seed
//   Mul:   da = seed * b             db = seed * a
//   Div:   da = seed / b             db = -seed * a / b²
//   Pow:   da = seed * b * a^(b-1)   db = seed * a^b * ln(a)

/// a + b
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

/// a - b
#[derive(Debug, Clone, Copy, Default)]
pub struct Sub;

/// Elementwise (Hadamard) product a * b.
#[derive(Debug, Clone, Copy, Default)]
pub struct HadamardProduct;

/// a / b
#[derive(Debug, Clone, Copy, Default)]
pub struct Div;

/// a ^ b, elementwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pow;

impl BinaryKernel for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, |x, y| x + y)
    }

    fn backward_kernel(
        &self,
        _inputs: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        check_idx(idx)?;
        Ok(seed.clone())
    }
}

impl BinaryKernel for Sub {
    fn name(&self) -> &'static str {
        "sub"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, |x, y| x - y)
    }

    fn backward_kernel(
        &self,
        _inputs: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        match check_idx(idx)? {
            0 => Ok(seed.clone()),
            _ => Ok(seed.map(|g| -g)),
        }
    }
}

impl BinaryKernel for HadamardProduct {
    fn name(&self) -> &'static str {
        "hadamard_product"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, |x, y| x * y)
    }

    fn backward_kernel(
        &self,
        inputs: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        let other = inputs[1 - check_idx(idx)?];
        seed.zip_map(other, |g, o| g * o)
    }
}

impl BinaryKernel for Div {
    fn name(&self) -> &'static str {
        "div"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, |x, y| x / y)
    }

    fn backward_kernel(
        &self,
        [a, b]: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        match check_idx(idx)? {
            0 => seed.zip_map(b, |g, y| g / y),
            _ => {
                let local = a.zip_map(b, |x, y| -x / (y * y))?;
                seed.zip_map(&local, |g, l| g * l)
            }
        }
    }
}

impl BinaryKernel for Pow {
    fn name(&self) -> &'static str {
        "pow"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, f64::powf)
    }

    fn backward_kernel(
        &self,
        [a, b]: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        let local = match check_idx(idx)? {
            0 => a.zip_map(b, |x, y| y * x.powf(y - 1.0))?,
            _ => a.zip_map(b, |x, y| x.powf(y) * x.ln())?,
        };
        seed.zip_map(&local, |g, l| g * l)
    }
}

fn check_idx(idx: usize) -> Result<usize> {
    if idx > 1 {
        bail!("binary backward input index must be 0 or 1, got {}", idx);
    }
    Ok(idx)
}
