use crate::buffer::StridedBuffer;
use crate::error::Result;
use crate::kernel::UnaryKernel;

// Built-in elementwise unary kernels
//
// Each kernel is a unit struct carrying two scalar rules:
//   forward:  y = f(x)
//   backward: dx = f'(x) * dy
// Outputs are always contiguous; inputs are read in logical order so
// permuted buffers work unchanged.

macro_rules! unary_kernel {
    ($(#[$doc:meta])* $ty:ident, $name:literal, |$x:ident| $fwd:expr, |$bx:ident, $g:ident| $bwd:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $ty;

        impl UnaryKernel for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer> {
                Ok(a.map(|$x| $fwd))
            }

            fn backward_kernel(
                &self,
                a: &StridedBuffer,
                seed: &StridedBuffer,
            ) -> Result<StridedBuffer> {
                a.zip_map(seed, |$bx, $g| $bwd)
            }
        }
    };
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

unary_kernel!(
    /// max(x, 0); gradient passes where x > 0.
    Relu, "relu",
    |x| if x > 0.0 { x } else { 0.0 },
    |x, g| if x > 0.0 { g } else { 0.0 }
);

unary_kernel!(
    /// 1 / (1 + e^-x); gradient s(x) * (1 - s(x)).
    Sigmoid, "sigmoid",
    |x| sigmoid(x),
    |x, g| {
        let s = sigmoid(x);
        g * s * (1.0 - s)
    }
);

unary_kernel!(Neg, "neg", |x| -x, |_x, g| -g);

unary_kernel!(Exp, "exp", |x| x.exp(), |x, g| g * x.exp());

unary_kernel!(
    /// Natural logarithm.
    Log, "log",
    |x| x.ln(),
    |x, g| g / x
);

unary_kernel!(Sqrt, "sqrt", |x| x.sqrt(), |x, g| g / (2.0 * x.sqrt()));

unary_kernel!(Abs, "abs", |x| x.abs(), |x, g| g * sign(x));

unary_kernel!(
    /// -1, 0 or 1; piecewise constant, so the gradient is zero.
    Sign, "sign",
    |x| sign(x),
    |_x, _g| 0.0
);

unary_kernel!(Reciprocal, "reciprocal", |x| 1.0 / x, |x, g| -g / (x * x));
