// Forward kernels — per-op evaluation
//
// Graph::compute dispatches every node here. A kernel reads its parents'
// buffers and writes the node's own buffer. Two conventions keep this
// simple and alias-safe:
//
//   1. Operand buffers are snapshotted (cloned or read out in logical
//      order) before the destination write lock is taken. An in-place
//      gradient accumulator whose destination aliases its first operand
//      therefore never deadlocks or reads half-written data.
//   2. Destinations are contiguous (fresh result buffers and gradient
//      twins always are), so writing in logical order is writing in
//      memory order. The shape-only ops (reshape, view, transpose) have
//      no kernel at all.
//
// Scalar coercion for the binary ops mirrors the constructor rule: the
// operands are either same-shape or one side is a single element that
// broadcasts across the output.

use crate::elem::Elem;
use crate::error::{Error, Result};
use crate::op::{BinaryOp, Op, UnaryOp};
use crate::tensor::Tensor;

/// Evaluate one node from its parents. Leaves are no-ops.
pub(crate) fn eval<T: Elem>(t: &Tensor<T>) -> Result<()> {
    match t.op() {
        Op::None | Op::Reshape { .. } | Op::View { .. } | Op::Transpose { .. } => Ok(()),
        Op::Dup { input } => dup(t, input),
        Op::Binary { lhs, rhs, op } => binary(t, lhs, rhs, *op),
        Op::Scale { input, factor } => scale(t, input, factor),
        Op::Unary { input, op } => unary(t, input, *op),
        Op::Sum { input } => sum(t, input),
        Op::Mean { input } => mean(t, input),
        Op::Repeat { input } => repeat(t, input),
        Op::Cpy { src, .. } => cpy(t, src),
        Op::Matmul {
            lhs,
            rhs,
            trans_lhs,
            trans_rhs,
        } => matmul(t, lhs, rhs, *trans_lhs, *trans_rhs),
    }
}

/// Operand values aligned to the output's logical order, broadcasting a
/// scalar side.
fn operand<T: Elem>(src: &Tensor<T>, out: &Tensor<T>) -> Vec<T> {
    if src.shape().same_shape(out.shape()) {
        src.to_vec()
    } else {
        // Validated at construction: the narrow side is a scalar.
        let v = src.storage_read()[0];
        vec![v; out.n_elems()]
    }
}

fn binary<T: Elem>(t: &Tensor<T>, lhs: &Tensor<T>, rhs: &Tensor<T>, op: BinaryOp) -> Result<()> {
    let a = operand(lhs, t);
    let b = operand(rhs, t);
    let mut dst = t.storage_write();
    for (slot, (&x, &y)) in dst.iter_mut().zip(a.iter().zip(b.iter())) {
        *slot = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
        };
    }
    Ok(())
}

fn scale<T: Elem>(t: &Tensor<T>, input: &Tensor<T>, factor: &Tensor<T>) -> Result<()> {
    let a = input.to_vec();
    let s = factor.storage_read()[0];
    let mut dst = t.storage_write();
    for (slot, &x) in dst.iter_mut().zip(a.iter()) {
        *slot = x * s;
    }
    Ok(())
}

fn unary<T: Elem>(t: &Tensor<T>, input: &Tensor<T>, op: UnaryOp) -> Result<()> {
    if op == UnaryOp::Norm {
        return norm(t, input);
    }
    let a = input.to_vec();
    let mut dst = t.storage_write();
    for (slot, &x) in dst.iter_mut().zip(a.iter()) {
        *slot = match op {
            UnaryOp::Sqr => x * x,
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sgn => {
                if x > T::zero() {
                    T::one()
                } else if x < T::zero() {
                    -T::one()
                } else {
                    T::zero()
                }
            }
            UnaryOp::Neg => -x,
            UnaryOp::Step => {
                if x > T::zero() {
                    T::one()
                } else {
                    T::zero()
                }
            }
            UnaryOp::Relu => {
                if x > T::zero() {
                    x
                } else {
                    T::zero()
                }
            }
            UnaryOp::Gelu => gelu_scalar(x),
            UnaryOp::Norm => unreachable!("handled above"),
        };
    }
    Ok(())
}

/// GELU, tanh approximation: 0.5·x·(1 + tanh(√(2/π)·(x + 0.044715·x³))).
fn gelu_scalar<T: Elem>(x: T) -> T {
    let c = T::from_f64(0.797_884_560_802_865_4); // √(2/π)
    let k = T::from_f64(0.044715);
    let half = T::from_f64(0.5);
    half * x * (T::one() + (c * (x + k * x * x * x)).tanh())
}

/// Row-wise L2 normalisation over axis 0.
fn norm<T: Elem>(t: &Tensor<T>, input: &Tensor<T>) -> Result<()> {
    let row = input.shape().extent(0);
    let a = input.to_vec();
    let mut dst = t.storage_write();
    for (out_row, in_row) in dst.chunks_mut(row).zip(a.chunks(row)) {
        let mut sq = T::zero();
        for &x in in_row {
            sq = sq + x * x;
        }
        let inv = T::one() / sq.sqrt();
        for (slot, &x) in out_row.iter_mut().zip(in_row.iter()) {
            *slot = x * inv;
        }
    }
    Ok(())
}

/// Sum of all elements, strict left-to-right accumulation.
fn sum<T: Elem>(t: &Tensor<T>, input: &Tensor<T>) -> Result<()> {
    let a = input.to_vec();
    let mut acc = T::zero();
    for &x in &a {
        acc = acc + x;
    }
    t.storage_write()[0] = acc;
    Ok(())
}

/// Mean over axis 0: each row collapses to its sum divided by the row extent.
fn mean<T: Elem>(t: &Tensor<T>, input: &Tensor<T>) -> Result<()> {
    let row = input.shape().extent(0);
    let inv = T::one() / T::from_f64(row as f64);
    let a = input.to_vec();
    let mut dst = t.storage_write();
    for (slot, in_row) in dst.iter_mut().zip(a.chunks(row)) {
        let mut acc = T::zero();
        for &x in in_row {
            acc = acc + x;
        }
        *slot = acc * inv;
    }
    Ok(())
}

/// Tile the source into the destination; every destination extent is an
/// integer multiple of the source extent on the same axis.
fn repeat<T: Elem>(t: &Tensor<T>, input: &Tensor<T>) -> Result<()> {
    let s = *input.shape();
    let o = *t.shape();
    let src = input.buffer_clone();
    let mut dst = t.storage_write();
    let mut idx = 0;
    for i3 in 0..o.extent(3) {
        for i2 in 0..o.extent(2) {
            for i1 in 0..o.extent(1) {
                for i0 in 0..o.extent(0) {
                    let off = (i0 % s.extent(0)) * s.stride(0)
                        + (i1 % s.extent(1)) * s.stride(1)
                        + (i2 % s.extent(2)) * s.stride(2)
                        + (i3 % s.extent(3)) * s.stride(3);
                    dst[idx] = src[off];
                    idx += 1;
                }
            }
        }
    }
    Ok(())
}

fn dup<T: Elem>(t: &Tensor<T>, input: &Tensor<T>) -> Result<()> {
    if !input.is_contiguous() {
        return Err(Error::RequiresContiguous { op: "dup" });
    }
    let a = input.buffer_clone();
    t.storage_write().copy_from_slice(&a);
    Ok(())
}

fn cpy<T: Elem>(t: &Tensor<T>, src: &Tensor<T>) -> Result<()> {
    if !t.is_contiguous() {
        return Err(Error::RequiresContiguous { op: "cpy" });
    }
    let a = src.to_vec();
    t.storage_write().copy_from_slice(&a);
    Ok(())
}

/// Matrix multiply over (channel, batch, row, col) with an innermost
/// left-to-right contraction. The four transpose variants differ only in
/// which strides act as the row/column step of each operand. Dispatches to
/// the accelerated gemm when both inputs are contiguous and every dimension
/// is at least 32.
fn matmul<T: Elem>(
    t: &Tensor<T>,
    lhs: &Tensor<T>,
    rhs: &Tensor<T>,
    trans_lhs: bool,
    trans_rhs: bool,
) -> Result<()> {
    let ls = *lhs.shape();
    let rs = *rhs.shape();
    let os = *t.shape();
    let n_rows = os.extent(1);
    let n_cols = os.extent(0);
    let k = if trans_lhs { ls.extent(1) } else { ls.extent(0) };

    // Row/col strides of the logically transposed operands.
    let (lrs, lcs) = if trans_lhs {
        (ls.stride(0), ls.stride(1))
    } else {
        (ls.stride(1), ls.stride(0))
    };
    let (rrs, rcs) = if trans_rhs {
        (rs.stride(0), rs.stride(1))
    } else {
        (rs.stride(1), rs.stride(0))
    };

    let lv = lhs.buffer_clone();
    let rv = rhs.buffer_clone();
    let mut dst = t.storage_write();

    let fast = lhs.is_contiguous()
        && rhs.is_contiguous()
        && n_rows >= 32
        && n_cols >= 32
        && k >= 32;

    for ch in 0..os.extent(3) {
        for b in 0..os.extent(2) {
            let lbase = ch * ls.stride(3) + b * ls.stride(2);
            let rbase = ch * rs.stride(3) + b * rs.stride(2);
            let obase = ch * os.stride(3) + b * os.stride(2);

            if fast
                && T::gemm(
                    n_rows,
                    k,
                    n_cols,
                    &lv[lbase..],
                    lrs as isize,
                    lcs as isize,
                    &rv[rbase..],
                    rrs as isize,
                    rcs as isize,
                    &mut dst[obase..],
                    os.stride(1) as isize,
                    os.stride(0) as isize,
                )
            {
                continue;
            }

            for i in 0..n_rows {
                for j in 0..n_cols {
                    let mut acc = T::zero();
                    for kk in 0..k {
                        acc = acc + lv[lbase + i * lrs + kk * lcs] * rv[rbase + kk * rrs + j * rcs];
                    }
                    dst[obase + i * os.stride(1) + j * os.stride(0)] = acc;
                }
            }
        }
    }
    Ok(())
}
