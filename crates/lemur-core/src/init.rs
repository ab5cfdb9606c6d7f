// Init — fillers for user-facing buffers
//
// Each filler takes a template buffer and returns a new one with the same
// shape, stride and dtype, filled in logical order. The template is never
// touched. Values are rounded to the template's dtype like any other
// construction.
//
// Random fillers share one process-wide StdRng. `set_seed` makes every
// subsequent draw reproducible; without it the generator is seeded from OS
// entropy on first use.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::buffer::StridedBuffer;
use crate::error::{Error, Result};

static RNG: Mutex<Option<StdRng>> = Mutex::new(None);

/// Reseed the shared generator.
pub fn set_seed(seed: u64) -> Result<()> {
    let mut rng = RNG.lock().map_err(|_| Error::LockPoisoned)?;
    *rng = Some(StdRng::seed_from_u64(seed));
    Ok(())
}

fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> Result<T> {
    let mut guard = RNG.lock().map_err(|_| Error::LockPoisoned)?;
    let rng = guard.get_or_insert_with(StdRng::from_entropy);
    Ok(f(rng))
}

/// Lay `values` out over `template`'s strides.
fn fill_like(template: &StridedBuffer, values: impl Iterator<Item = f64>) -> Result<StridedBuffer> {
    let layout = template.layout();
    let mut elements = vec![0.0; template.len()];
    for (offset, v) in layout.strided_indices().zip(values) {
        elements[offset] = v;
    }
    StridedBuffer::with_stride(elements, *layout.shape(), *layout.stride(), template.dtype())
}

/// Every element set to `value`.
pub fn memset(template: &StridedBuffer, value: f64) -> Result<StridedBuffer> {
    fill_like(template, std::iter::repeat(value))
}

/// Draws from U[low, high).
pub fn uniform(template: &StridedBuffer, low: f64, high: f64) -> Result<StridedBuffer> {
    if low.is_nan() || high.is_nan() || low > high {
        return Err(Error::msg(format!(
            "uniform: empty range [{}, {})",
            low, high
        )));
    }
    if low == high {
        return memset(template, low);
    }
    if !(high - low).is_finite() {
        return Err(Error::msg(format!(
            "uniform: span of [{}, {}) is not finite",
            low, high
        )));
    }
    let n = template.numel();
    let values: Vec<f64> = with_rng(|rng| (0..n).map(|_| rng.gen_range(low..high)).collect())?;
    fill_like(template, values.into_iter())
}

/// Draws from N(mean, std²).
pub fn normal(template: &StridedBuffer, mean: f64, std: f64) -> Result<StridedBuffer> {
    if std.is_nan() || std < 0.0 {
        return Err(Error::msg(format!("normal: std {} is negative", std)));
    }
    let dist = Normal::new(mean, std)
        .map_err(|e| Error::msg(format!("normal: mean {} std {}: {}", mean, std, e)))?;
    let n = template.numel();
    let values: Vec<f64> = with_rng(|rng| (0..n).map(|_| dist.sample(rng)).collect())?;
    fill_like(template, values.into_iter())
}

/// `numel` evenly spaced values from `start` to `end`, both inclusive.
/// A single-element buffer gets `start`.
pub fn linspace(template: &StridedBuffer, start: f64, end: f64) -> Result<StridedBuffer> {
    let n = template.numel();
    let step = if n > 1 {
        (end - start) / (n - 1) as f64
    } else {
        0.0
    };
    fill_like(template, (0..n).map(|i| start + step * i as f64))
}
