// Autograd integration tests
//
// End-to-end checks of Graph + backprop through the public API only:
// analytic gradients against hand-computed values, numerical (central
// difference) checks for every built-in differentiable op, and the
// graph-level error paths.

use approx::assert_relative_eq;
use lemur_core::{
    BinaryKernel, DType, Error, Graph, GraphConfig, Result, Shape, StridedBuffer, TensorId,
    UnaryKernel, UnaryOp,
};

fn graph() -> Graph {
    Graph::with_config(GraphConfig::default().with_dtype(DType::F64))
}

fn grad(g: &Graph, id: TensorId) -> Vec<f64> {
    g.grad(id).unwrap().unwrap().to_vec()
}

// Reduce any tensor to a scalar with non-uniform weights so every element's
// gradient is distinguishable: sum(view(y * w, n)), w = 1, 2, 3, ...
fn weighted_total(g: &mut Graph, y: TensorId) -> Result<TensorId> {
    let shape = *g.buffer(y)?.shape();
    let n = shape.elem_count();
    let weights: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    let w = g.from_slice(&weights, shape.dims(), false)?;
    let p = g.hadamard_product(y, w)?;
    let flat = g.view(p, Shape::from(n))?;
    g.sum(flat, 4)
}

type Build = fn(&mut Graph, &[TensorId]) -> Result<TensorId>;

/// Compare backward's gradient for every input against central differences.
fn check_gradients(build: Build, inputs: &[(&[f64], &[usize])]) {
    let h = 1e-6;

    let mut g = graph();
    let ids: Vec<TensorId> = inputs
        .iter()
        .map(|(data, dims)| g.from_slice(data, dims, true).unwrap())
        .collect();
    let y = build(&mut g, &ids).unwrap();
    let loss = weighted_total(&mut g, y).unwrap();
    g.backward(loss).unwrap();

    let eval = |which: usize, at: usize, delta: f64| -> f64 {
        let mut g = graph();
        let ids: Vec<TensorId> = inputs
            .iter()
            .enumerate()
            .map(|(k, (data, dims))| {
                let mut data = data.to_vec();
                if k == which {
                    data[at] += delta;
                }
                g.from_slice(&data, dims, false).unwrap()
            })
            .collect();
        let y = build(&mut g, &ids).unwrap();
        let loss = weighted_total(&mut g, y).unwrap();
        g.buffer(loss).unwrap().to_vec()[0]
    };

    for (which, (data, _)) in inputs.iter().enumerate() {
        let analytic = grad(&g, ids[which]);
        assert_eq!(analytic.len(), data.len());
        for at in 0..data.len() {
            let numeric = (eval(which, at, h) - eval(which, at, -h)) / (2.0 * h);
            assert_relative_eq!(analytic[at], numeric, epsilon = 1e-5, max_relative = 1e-4);
        }
    }
}

const POSITIVE: &[f64] = &[0.5, 1.3, 2.1, 0.8, 1.7, 2.6];
const MIXED: &[f64] = &[-1.2, 0.7, -0.3, 1.9, 0.4, -2.2];
const OTHER: &[f64] = &[1.1, 0.6, 1.4, 2.3, 0.9, 1.8];
const DIMS: &[usize] = &[2, 3];
const COLUMN: &[usize] = &[2, 3, 1];
const MAT_A: &[usize] = &[2, 3];
const MAT_B: &[usize] = &[3, 2];
const BATCH_A: &[usize] = &[2, 1, 1, 2, 3];
const BATCH_B: &[usize] = &[2, 1, 1, 3, 2];

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_end_to_end_example() {
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 1, 1, 4], true).unwrap();
    let b = g.from_slice(&[10.0; 4], &[1, 1, 1, 1, 4], true).unwrap();
    let c = g.add(a, b).unwrap();
    let d = g.hadamard_product(c, a).unwrap();
    let e = g.sum(d, 4).unwrap();
    assert_eq!(g.buffer(e).unwrap().to_vec(), vec![11.0 + 24.0 + 39.0 + 56.0]);

    g.backward(e).unwrap();
    assert_eq!(grad(&g, a), vec![12.0, 14.0, 16.0, 18.0]);
    assert_eq!(grad(&g, b), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_add_gradient_is_ones() {
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0, 3.0], &[3], true).unwrap();
    let b = g.from_slice(&[4.0, 5.0, 6.0], &[3], true).unwrap();
    let c = g.add(a, b).unwrap();
    let s = g.sum(c, 4).unwrap();
    g.backward(s).unwrap();
    assert_eq!(grad(&g, a), vec![1.0; 3]);
    assert_eq!(grad(&g, b), vec![1.0; 3]);
}

#[test]
fn test_hadamard_product_rule() {
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0, 3.0], &[3], true).unwrap();
    let b = g.from_slice(&[4.0, 5.0, 6.0], &[3], true).unwrap();
    let c = g.hadamard_product(a, b).unwrap();
    let s = g.sum(c, 4).unwrap();
    g.backward(s).unwrap();
    assert_eq!(grad(&g, a), g.buffer(b).unwrap().to_vec());
    assert_eq!(grad(&g, b), g.buffer(a).unwrap().to_vec());
}

#[test]
fn test_fan_out_accumulates() {
    let mut g = graph();
    let x = g.from_slice(&[3.0], &[1], true).unwrap();
    let one = g.from_slice(&[1.0], &[1], false).unwrap();
    let two = g.from_slice(&[2.0], &[1], false).unwrap();
    let p = g.add(x, one).unwrap();
    let q = g.add(x, two).unwrap();
    let r = g.add(p, q).unwrap();
    g.backward(r).unwrap();
    assert_eq!(grad(&g, x), vec![2.0]);
    assert_eq!(g.get(x).unwrap().consumers(), 2);
}

#[test]
fn test_backward_twice_accumulates() {
    let mut g = graph();
    let x = g.from_slice(&[3.0], &[1], true).unwrap();
    let y = g.hadamard_product(x, x).unwrap();
    g.backward(y).unwrap();
    g.backward(y).unwrap();
    assert_eq!(grad(&g, x), vec![12.0]);
    g.zero_grad(x).unwrap();
    assert_eq!(grad(&g, x), vec![0.0]);
}

#[test]
fn test_non_scalar_backward_fails() {
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0], &[2], true).unwrap();
    let b = g.exp(a).unwrap();
    assert!(matches!(g.backward(b), Err(Error::NotAScalar { .. })));
    assert_eq!(grad(&g, a), vec![0.0, 0.0]);
}

#[test]
fn test_retain_grad_is_idempotent() {
    let mut g = graph();
    let a = g.from_slice(&[2.0], &[1], true).unwrap();
    g.backward(a).unwrap();
    g.retain_grad(a, true).unwrap();
    assert_eq!(grad(&g, a), vec![1.0]);
    g.retain_grad(a, false).unwrap();
    assert!(g.grad(a).unwrap().is_none());
}

#[test]
fn test_requires_grad_barrier() {
    let mut g = graph();
    let a = g.from_slice(&[2.0], &[1], true).unwrap();
    let b = g.exp(a).unwrap();
    let c = g.neg(b).unwrap();
    g.set_requires_grad(b, false).unwrap();
    g.backward(c).unwrap();
    assert_eq!(grad(&g, a), vec![0.0]);
}

#[test]
fn test_f32_gradients_keep_dtype() {
    let mut g = Graph::new();
    let a = g.from_slice(&[1.5, 2.5], &[2], true).unwrap();
    let b = g.sigmoid(a).unwrap();
    let s = g.mean(b, 4).unwrap();
    g.backward(s).unwrap();
    let ga = g.grad(a).unwrap().unwrap();
    assert_eq!(ga.dtype(), DType::F32);
    let sig = |x: f64| 1.0 / (1.0 + (-x).exp());
    for (got, x) in ga.iter().zip([1.5, 2.5]) {
        assert_relative_eq!(got, 0.5 * sig(x) * (1.0 - sig(x)), max_relative = 1e-6);
    }
}

// ---------------------------------------------------------------------------
// Numerical gradient checks
// ---------------------------------------------------------------------------

#[test]
fn test_numeric_unary_smooth() {
    let ops: [Build; 6] = [
        |g, x| g.sigmoid(x[0]),
        |g, x| g.neg(x[0]),
        |g, x| g.exp(x[0]),
        |g, x| g.log(x[0]),
        |g, x| g.sqrt(x[0]),
        |g, x| g.reciprocal(x[0]),
    ];
    for op in ops {
        check_gradients(op, &[(POSITIVE, DIMS)]);
    }
}

#[test]
fn test_numeric_unary_piecewise() {
    let ops: [Build; 3] = [|g, x| g.relu(x[0]), |g, x| g.abs(x[0]), |g, x| g.sign(x[0])];
    for op in ops {
        check_gradients(op, &[(MIXED, DIMS)]);
    }
}

#[test]
fn test_numeric_binary() {
    let ops: [Build; 5] = [
        |g, x| g.add(x[0], x[1]),
        |g, x| g.sub(x[0], x[1]),
        |g, x| g.hadamard_product(x[0], x[1]),
        |g, x| g.div(x[0], x[1]),
        |g, x| g.pow(x[0], x[1]),
    ];
    for op in ops {
        check_gradients(op, &[(POSITIVE, DIMS), (OTHER, DIMS)]);
    }
}

#[test]
fn test_numeric_reduce() {
    check_gradients(|g, x| g.sum(x[0], 4), &[(POSITIVE, DIMS)]);
    check_gradients(|g, x| g.mean(x[0], 4), &[(POSITIVE, DIMS)]);
}

#[test]
fn test_numeric_shape_ops() {
    check_gradients(|g, x| g.view(x[0], (3, 2)), &[(POSITIVE, DIMS)]);
    check_gradients(|g, x| g.permute(x[0], [0, 1, 2, 4, 3]), &[(POSITIVE, DIMS)]);
    check_gradients(|g, x| g.expand(x[0], (2, 3, 4)), &[(POSITIVE, COLUMN)]);
}

#[test]
fn test_numeric_reduce_of_permuted() {
    check_gradients(
        |g, x| {
            let t = g.permute(x[0], [0, 1, 2, 4, 3])?;
            let e = g.exp(t)?;
            g.sum(e, 4)
        },
        &[(POSITIVE, DIMS)],
    );
}

#[test]
fn test_numeric_matmul() {
    check_gradients(
        |g, x| g.matmul(x[0], x[1]),
        &[(POSITIVE, MAT_A), (OTHER, MAT_B)],
    );
}

#[test]
fn test_numeric_batched_matmul() {
    let a: Vec<f64> = (0..12).map(|i| 0.1 * i as f64 - 0.5).collect();
    let b: Vec<f64> = (0..12).map(|i| 0.05 * (i * i) as f64 - 0.3).collect();
    check_gradients(
        |g, x| g.matmul(x[0], x[1]),
        &[(a.as_slice(), BATCH_A), (b.as_slice(), BATCH_B)],
    );
}

// ---------------------------------------------------------------------------
// Matmul
// ---------------------------------------------------------------------------

#[test]
fn test_matmul_analytic_gradient() {
    // L = sum(A @ B) ⇒ dA = 1 @ Bᵀ (row sums of B), dB = Aᵀ @ 1 (column sums of A)
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true).unwrap();
    let b = g.from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], true).unwrap();
    let c = g.matmul(a, b).unwrap();
    assert_eq!(g.buffer(c).unwrap().to_vec(), vec![22.0, 28.0, 49.0, 64.0]);
    let flat = g.view(c, 4).unwrap();
    let s = g.sum(flat, 4).unwrap();
    g.backward(s).unwrap();
    assert_eq!(grad(&g, a), vec![3.0, 7.0, 11.0, 3.0, 7.0, 11.0]);
    assert_eq!(grad(&g, b), vec![5.0, 5.0, 7.0, 7.0, 9.0, 9.0]);
}

#[test]
fn test_matmul_batch_mismatch() {
    let mut g = graph();
    let a = g.from_slice(&[0.0; 12], &[2, 1, 1, 2, 3], false).unwrap();
    let b = g.from_slice(&[0.0; 6], &[1, 1, 1, 3, 2], false).unwrap();
    assert!(matches!(g.matmul(a, b), Err(Error::ShapeMismatch { .. })));
}

// ---------------------------------------------------------------------------
// Custom kernels
// ---------------------------------------------------------------------------

struct Square;

impl UnaryKernel for Square {
    fn name(&self) -> &'static str {
        "square"
    }

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer> {
        Ok(a.map(|x| x * x))
    }

    fn backward_kernel(&self, a: &StridedBuffer, seed: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(seed, |x, g| 2.0 * x * g)
    }
}

struct ShrinkingBackward;

impl UnaryKernel for ShrinkingBackward {
    fn name(&self) -> &'static str {
        "shrinking_backward"
    }

    fn forward_kernel(&self, a: &StridedBuffer) -> Result<StridedBuffer> {
        Ok(a.map(|x| x))
    }

    fn backward_kernel(&self, a: &StridedBuffer, _seed: &StridedBuffer) -> Result<StridedBuffer> {
        Ok(StridedBuffer::zeros(1, a.dtype()))
    }
}

struct ConstantMinus;

impl BinaryKernel for ConstantMinus {
    fn name(&self) -> &'static str {
        "constant_minus"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, |x, y| x - 2.0 * y)
    }

    fn backward_kernel(
        &self,
        _inputs: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        let scale = if idx == 0 { 1.0 } else { -2.0 };
        Ok(seed.map(|g| g * scale))
    }
}

#[test]
fn test_custom_unary_kernel() {
    let mut g = graph();
    let a = g.from_slice(&[3.0], &[1], true).unwrap();
    let b = g.apply_unary(UnaryOp::custom(Square), a).unwrap();
    assert_eq!(g.get(b).unwrap().edge().unwrap().op().name(), "square");
    assert_eq!(g.get(b).unwrap().edge().unwrap().op().id(), None);
    g.backward(b).unwrap();
    assert_eq!(grad(&g, a), vec![6.0]);
}

#[test]
fn test_custom_binary_kernel() {
    let mut g = graph();
    let a = g.from_slice(&[3.0], &[1], true).unwrap();
    let b = g.from_slice(&[1.0], &[1], true).unwrap();
    let c = g
        .apply_binary(lemur_core::BinaryOp::custom(ConstantMinus), a, b)
        .unwrap();
    assert_eq!(g.buffer(c).unwrap().to_vec(), vec![1.0]);
    g.backward(c).unwrap();
    assert_eq!(grad(&g, a), vec![1.0]);
    assert_eq!(grad(&g, b), vec![-2.0]);
}

#[test]
fn test_backward_contract_violation() {
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0], &[2], true).unwrap();
    let b = g.apply_unary(UnaryOp::custom(ShrinkingBackward), a).unwrap();
    let s = g.sum(b, 4).unwrap();
    let err = g.backward(s).unwrap_err();
    assert!(matches!(
        err,
        Error::ContractViolation { op: "shrinking_backward", .. }
    ));
}

struct BadRightGrad;

impl BinaryKernel for BadRightGrad {
    fn name(&self) -> &'static str {
        "bad_right_grad"
    }

    fn forward_kernel(&self, a: &StridedBuffer, b: &StridedBuffer) -> Result<StridedBuffer> {
        a.zip_map(b, |x, y| x + y)
    }

    fn backward_kernel(
        &self,
        inputs: [&StridedBuffer; 2],
        seed: &StridedBuffer,
        idx: usize,
    ) -> Result<StridedBuffer> {
        if idx == 0 {
            Ok(seed.clone())
        } else {
            Ok(StridedBuffer::zeros(3, inputs[1].dtype()))
        }
    }
}

#[test]
fn test_binary_contract_violation_leaves_both_sides_untouched() {
    let mut g = graph();
    let a = g.from_slice(&[1.0], &[1], true).unwrap();
    let b = g.from_slice(&[2.0], &[1], true).unwrap();
    let c = g
        .apply_binary(lemur_core::BinaryOp::custom(BadRightGrad), a, b)
        .unwrap();
    let err = g.backward(c).unwrap_err();
    assert!(matches!(err, Error::ContractViolation { op: "bad_right_grad", .. }));
    assert_eq!(grad(&g, a), vec![0.0]);
    assert_eq!(grad(&g, b), vec![0.0]);
}

#[test]
fn test_long_chain_backward() {
    let mut g = graph();
    let a = g.from_slice(&[0.5, -0.5], &[2], true).unwrap();
    let mut x = a;
    for _ in 0..20_000 {
        x = g.neg(x).unwrap();
    }
    let s = g.sum(x, 4).unwrap();
    g.backward(s).unwrap();
    assert_eq!(grad(&g, a), vec![1.0, 1.0]);
}

// ---------------------------------------------------------------------------
// Freezing
// ---------------------------------------------------------------------------

#[test]
fn test_replace_data_before_and_after_use() {
    let mut g = graph();
    let a = g.from_slice(&[1.0, 2.0], &[2], true).unwrap();
    let next = StridedBuffer::new(vec![5.0, 6.0], 2, DType::F64).unwrap();
    g.replace_data(a, next.clone()).unwrap();

    let b = g.hadamard_product(a, a).unwrap();
    assert_eq!(g.buffer(b).unwrap().to_vec(), vec![25.0, 36.0]);
    assert!(matches!(
        g.replace_data(a, next),
        Err(Error::FrozenViolation { .. })
    ));
}

// ---------------------------------------------------------------------------
// Parallel backward
// ---------------------------------------------------------------------------

fn deep_loss(config: GraphConfig, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut g = Graph::with_config(config);
    let xs: Vec<f64> = (0..n).map(|i| (i % 17) as f64 * 0.1 + 0.5).collect();
    let ys: Vec<f64> = (0..n).map(|i| (i % 5) as f64 * 0.2 + 1.0).collect();
    let x = g.from_slice(&xs, &[n], true).unwrap();
    let y = g.from_slice(&ys, &[n], true).unwrap();
    // x feeds both branches of several binary ops
    let p = g.hadamard_product(x, y).unwrap();
    let q = g.div(x, y).unwrap();
    let r = g.add(p, q).unwrap();
    let s = g.hadamard_product(r, x).unwrap();
    let total = g.sum(s, 4).unwrap();
    g.backward(total).unwrap();
    (grad(&g, x), grad(&g, y))
}

#[test]
fn test_parallel_matches_sequential() {
    let n = 8192;
    let base = GraphConfig::default().with_dtype(DType::F64);
    let (sx, sy) = deep_loss(base.clone(), n);
    let (px, py) = deep_loss(
        base.with_parallel_backward(true).with_parallel_threshold(1),
        n,
    );
    for (a, b) in sx.iter().zip(&px) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }
    for (a, b) in sy.iter().zip(&py) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }
}

#[test]
fn test_graph_is_shareable_across_threads() {
    fn assert_sync<T: Send + Sync>() {}
    assert_sync::<Graph>();
}
