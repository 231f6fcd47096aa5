// Forward-kernel tests — shape closure and values for every op

use vole_core::{Error, Graph, Tensor};

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {:?} vs {:?}",
        got,
        expected
    );
    for (i, (&g, &e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(g, e, tol),
            "element {} differs: {} vs {} (got {:?}, expected {:?})",
            i,
            g,
            e,
            got,
            expected
        );
    }
}

/// Build a plan from `root` and evaluate it.
fn eval(root: &Tensor<f32>) -> Graph<f32> {
    let mut g = Graph::new();
    g.build_forward(root);
    g.compute().unwrap();
    g
}

#[test]
fn test_forward_mul_add() {
    // w·x + b with x=3, w=2, b=5 → 11
    let x = Tensor::<f32>::init_scalar(3.0).unwrap();
    let w = Tensor::<f32>::init_scalar(2.0).unwrap();
    let b = Tensor::<f32>::init_scalar(5.0).unwrap();
    let out = w.mul(&x).unwrap().add(&b).unwrap();

    let g = eval(&out);
    assert_eq!(out.to_scalar().unwrap(), 11.0);
    // three data leaves, two computed nodes
    assert_eq!(g.leaves().len(), 3);
    assert_eq!(g.nodes().len(), 2);
}

#[test]
fn test_unary_values() {
    let x = Tensor::<f32>::init(&[4]).unwrap();
    x.set_data(&[-2.0, 0.0, 1.0, 4.0]).unwrap();

    let relu = x.relu();
    let step = x.step();
    let sgn = x.sgn();
    let abs = x.abs();
    let neg = x.neg();
    let sqr = x.sqr();

    let mut g = Graph::new();
    for t in [&relu, &step, &sgn, &abs, &neg, &sqr] {
        g.build_forward(t);
    }
    g.compute().unwrap();

    assert_eq!(relu.to_vec(), vec![0.0, 0.0, 1.0, 4.0]);
    assert_eq!(step.to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    assert_eq!(sgn.to_vec(), vec![-1.0, 0.0, 1.0, 1.0]);
    assert_eq!(abs.to_vec(), vec![2.0, 0.0, 1.0, 4.0]);
    assert_eq!(neg.to_vec(), vec![2.0, 0.0, -1.0, -4.0]);
    assert_eq!(sqr.to_vec(), vec![4.0, 0.0, 1.0, 16.0]);
}

#[test]
fn test_sqrt_values() {
    let x = Tensor::<f32>::init(&[4]).unwrap();
    x.set_data(&[0.0, 1.0, 4.0, 9.0]).unwrap();
    let y = x.sqrt();
    eval(&y);
    assert_eq!(y.to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_gelu_values() {
    let x = Tensor::<f32>::init(&[3]).unwrap();
    x.set_data(&[-1.0, 0.0, 1.0]).unwrap();
    let y = x.gelu();
    eval(&y);
    let v = y.to_vec();
    assert!(approx_eq(v[0], -0.1588, 1e-3));
    assert!(approx_eq(v[1], 0.0, 1e-6));
    assert!(approx_eq(v[2], 0.8412, 1e-3));
}

#[test]
fn test_norm_rows() {
    // Two rows, each L2-normalised independently.
    let x = Tensor::<f32>::init(&[2, 2]).unwrap();
    x.set_data(&[3.0, 4.0, 0.0, 2.0]).unwrap();
    let y = x.norm();
    eval(&y);
    assert_vec_approx(&y.to_vec(), &[0.6, 0.8, 0.0, 1.0], 1e-6);
}

#[test]
fn test_sum_and_mean() {
    let x = Tensor::<f32>::init(&[2, 3]).unwrap();
    x.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

    let s = x.sum();
    let m = x.mean();
    let mut g = Graph::new();
    g.build_forward(&s);
    g.build_forward(&m);
    g.compute().unwrap();

    assert_eq!(s.dims(), &[1]);
    assert_eq!(s.to_scalar().unwrap(), 21.0);
    // mean collapses axis 0: one value per row
    assert_eq!(m.dims(), &[1, 3]);
    assert_eq!(m.to_vec(), vec![1.5, 3.5, 5.5]);
}

#[test]
fn test_scale() {
    let x = Tensor::<f32>::init(&[3]).unwrap();
    x.set_data(&[1.0, 2.0, 3.0]).unwrap();
    let two = Tensor::<f32>::init_scalar(2.0).unwrap();
    let y = x.scale(&two).unwrap();
    eval(&y);
    assert_eq!(y.to_vec(), vec![2.0, 4.0, 6.0]);

    // the factor must be scalar
    assert!(matches!(x.scale(&x), Err(Error::NotAScalar { .. })));
}

#[test]
fn test_repeat() {
    let src = Tensor::<f32>::init(&[2]).unwrap();
    src.set_data(&[1.0, 2.0]).unwrap();
    let target = Tensor::<f32>::init(&[6]).unwrap();
    let r = src.repeat_to(&target).unwrap();
    eval(&r);
    assert_eq!(r.to_vec(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);

    // rows repeat too
    let row = Tensor::<f32>::init(&[2, 1]).unwrap();
    row.set_data(&[1.0, 2.0]).unwrap();
    let target = Tensor::<f32>::init(&[2, 3]).unwrap();
    let r = row.repeat_to(&target).unwrap();
    eval(&r);
    assert_eq!(r.to_vec(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);

    // non-integer ratio is rejected
    let bad = Tensor::<f32>::init(&[5]).unwrap();
    assert!(matches!(
        src.repeat_to(&bad),
        Err(Error::RepeatMismatch { .. })
    ));
}

#[test]
fn test_scalar_coercion_forward() {
    let v = Tensor::<f32>::init(&[3]).unwrap();
    v.set_data(&[1.0, 2.0, 3.0]).unwrap();
    let s = Tensor::<f32>::init_scalar(10.0).unwrap();

    let a = v.add(&s).unwrap();
    let b = s.sub(&v).unwrap();
    let mut g = Graph::new();
    g.build_forward(&a);
    g.build_forward(&b);
    g.compute().unwrap();

    assert_eq!(a.to_vec(), vec![11.0, 12.0, 13.0]);
    assert_eq!(b.to_vec(), vec![9.0, 8.0, 7.0]);
}

#[test]
fn test_dup_and_views() {
    let x = Tensor::<f32>::init_arange(&[6], 0.0, 6.0).unwrap();

    let d = x.dup();
    eval(&d);
    assert_eq!(d.to_vec(), x.to_vec());
    assert!(d.is_contiguous());

    // dup of a strided view is unimplemented
    let m = Tensor::<f32>::init_arange(&[3, 2], 0.0, 6.0).unwrap();
    let td = m.transpose().dup();
    let mut g = Graph::new();
    g.build_forward(&td);
    assert!(matches!(
        g.compute(),
        Err(Error::RequiresContiguous { op: "dup" })
    ));
}

#[test]
fn test_reshape() {
    let x = Tensor::<f32>::init_arange(&[6], 0.0, 6.0).unwrap();
    let r = x.reshape(&[3, 2]).unwrap();
    assert_eq!(r.dims(), &[3, 2]);
    assert_eq!(r.to_vec(), x.to_vec());
    assert_eq!(r.get(&[0, 1]), 3.0);

    // element count must be preserved
    assert!(x.reshape(&[4, 2]).is_err());
    // strided views cannot reshape
    let m = Tensor::<f32>::init_arange(&[3, 2], 0.0, 6.0).unwrap();
    assert!(matches!(
        m.transpose().reshape(&[6]),
        Err(Error::RequiresContiguous { .. })
    ));
}

#[test]
fn test_reshape_like() {
    let x = Tensor::<f32>::init_arange(&[6], 0.0, 6.0).unwrap();
    let proto = Tensor::<f32>::init(&[2, 3]).unwrap();
    let r = x.reshape_like(&proto).unwrap();
    assert_eq!(r.dims(), &[2, 3]);
}

#[test]
fn test_cpy() {
    let src = Tensor::<f32>::init_arange(&[4], 1.0, 5.0).unwrap();
    let dst = Tensor::<f32>::init(&[2, 2]).unwrap();
    let c = src.cpy_to(&dst).unwrap();
    eval(&c);
    // the result aliases dst's buffer
    assert_eq!(dst.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(c.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(c.dims(), &[2, 2]);

    let small = Tensor::<f32>::init(&[3]).unwrap();
    assert!(src.cpy_to(&small).is_err());
}

#[test]
fn test_matmul_values() {
    // A = [[1,2],[3,4],[5,6]] (3 rows × 2 cols), B = [[1,2,3],[4,5,6]]
    let a = Tensor::<f32>::init(&[2, 3]).unwrap();
    a.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = Tensor::<f32>::init(&[3, 2]).unwrap();
    b.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

    let c = a.matmul(&b).unwrap();
    eval(&c);
    assert_eq!(c.dims(), &[3, 3]);
    assert_vec_approx(
        &c.to_vec(),
        &[9.0, 12.0, 15.0, 19.0, 26.0, 33.0, 29.0, 40.0, 51.0],
        1e-6,
    );
}

#[test]
fn test_matmul_transposition_identities() {
    // (Aᵀ)·B == matmul_t0(A, B), and so on for every variant
    let a = Tensor::<f32>::init_arange(&[2, 3], 0.0, 6.0).unwrap();
    let b = Tensor::<f32>::init_arange(&[2, 3], 1.0, 7.0).unwrap();

    let via_view = a.transpose().matmul(&b).unwrap();
    let via_flag = a.matmul_with(&b, true, false).unwrap();
    let mut g = Graph::new();
    g.build_forward(&via_view);
    g.build_forward(&via_flag);
    g.compute().unwrap();
    assert_eq!(via_view.dims(), via_flag.dims());
    assert_vec_approx(&via_view.to_vec(), &via_flag.to_vec(), 1e-6);

    let via_view = a.matmul(&b.transpose()).unwrap();
    let via_flag = a.matmul_with(&b, false, true).unwrap();
    let mut g = Graph::new();
    g.build_forward(&via_view);
    g.build_forward(&via_flag);
    g.compute().unwrap();
    assert_vec_approx(&via_view.to_vec(), &via_flag.to_vec(), 1e-6);

    let c = Tensor::<f32>::init_arange(&[3, 2], 2.0, 8.0).unwrap();
    let via_view = a.transpose().matmul(&c.transpose()).unwrap();
    let via_flag = a.matmul_with(&c, true, true).unwrap();
    let mut g = Graph::new();
    g.build_forward(&via_view);
    g.build_forward(&via_flag);
    g.compute().unwrap();
    assert_vec_approx(&via_view.to_vec(), &via_flag.to_vec(), 1e-6);
}

#[test]
fn test_matmul_batched() {
    // Two independent 2×2 batches.
    let a = Tensor::<f32>::init(&[2, 2, 2]).unwrap();
    a.set_data(&[1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0]).unwrap();
    let b = Tensor::<f32>::init(&[2, 2, 2]).unwrap();
    b.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();

    let c = a.matmul(&b).unwrap();
    eval(&c);
    // batch 0: identity · B₀ = B₀; batch 1: 2I · B₁ = 2B₁
    assert_vec_approx(
        &c.to_vec(),
        &[1.0, 2.0, 3.0, 4.0, 10.0, 12.0, 14.0, 16.0],
        1e-6,
    );
}

#[test]
fn test_shape_preconditions() {
    let a = Tensor::<f32>::init(&[2, 3]).unwrap();
    let b = Tensor::<f32>::init(&[4, 2]).unwrap();
    assert!(matches!(
        a.matmul(&b),
        Err(Error::MatmulShapeMismatch { .. })
    ));

    let v = Tensor::<f32>::init(&[3]).unwrap();
    let w = Tensor::<f32>::init(&[4]).unwrap();
    assert!(matches!(v.add(&w), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(v.div(&w), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_op_shape_closure() {
    // P1: output shapes are functions of parent shapes and the op alone.
    let m = Tensor::<f32>::init(&[4, 3]).unwrap();
    let s = Tensor::<f32>::init_scalar(1.0).unwrap();

    assert_eq!(m.sqr().dims(), &[4, 3]);
    assert_eq!(m.sum().dims(), &[1]);
    assert_eq!(m.mean().dims(), &[1, 3]);
    assert_eq!(m.add(&s).unwrap().dims(), &[4, 3]);
    assert_eq!(s.add(&m).unwrap().dims(), &[4, 3]);
    assert_eq!(m.transpose().dims(), &[3, 4]);
    assert_eq!(m.view().dims(), &[4, 3]);

    let n = Tensor::<f32>::init(&[5, 4]).unwrap();
    assert_eq!(m.matmul(&n).unwrap().dims(), &[5, 3]);
    assert_eq!(m.matmul_with(&n, false, false).unwrap().dims(), &[5, 3]);
    let p = Tensor::<f32>::init(&[7, 3]).unwrap();
    assert_eq!(m.matmul_with(&p, true, false).unwrap().dims(), &[7, 4]);
    let q = Tensor::<f32>::init(&[4, 7]).unwrap();
    assert_eq!(q.matmul_with(&m, false, true).unwrap().dims(), &[3, 7]);
}

#[test]
fn test_large_matmul_matches_naive_shape() {
    // Crosses the gemm fast-path threshold (all dims ≥ 32); values are
    // checked against a row/col-sum identity.
    let a = Tensor::<f32>::init(&[40, 33]).unwrap();
    a.set_all(1.0);
    let b = Tensor::<f32>::init(&[35, 40]).unwrap();
    b.set_all(2.0);
    let c = a.matmul(&b).unwrap();
    eval(&c);
    assert_eq!(c.dims(), &[35, 33]);
    // every entry is Σ_k 1·2 = 80
    assert!(c.to_vec().iter().all(|&v| (v - 80.0).abs() < 1e-3));
}
