// Op — the closed operation catalogue
//
// Every tensor records HOW it was created via the Op enum. The variant holds
// the actual parent Tensor handles (Arc-wrapped, cheap to clone), which is
// what keeps parents alive for as long as any child references them and what
// the graph walk traverses through inputs().
//
// Dispatch is a plain tag match: forward kernels live in forward.rs, the
// adjoint rules in backward.rs, both keyed on this enum.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::elem::Elem;
use crate::tensor::Tensor;

/// Identity of a tensor. Two handles to the same tensor carry the same id;
/// graph deduplication hashes on it and the DOT exporter names nodes by it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(u64);

impl TensorId {
    /// Draw the next id from a process-wide counter. Atomic so handles may
    /// cross threads, even though each graph itself is single-threaded.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TensorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Debug for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Elementwise binary operations. The operands are either same-shape or one
/// side is a scalar that broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Elementwise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// x²
    Sqr,
    /// √x
    Sqrt,
    /// |x|
    Abs,
    /// -1, 0, or 1
    Sgn,
    /// -x
    Neg,
    /// Heaviside step: 1 where x > 0, else 0
    Step,
    /// max(0, x)
    Relu,
    /// 0.5·x·(1 + tanh(√(2/π)·(x + 0.044715·x³)))
    Gelu,
    /// Row-wise L2 normalisation
    Norm,
}

/// Records the operation that produced a tensor, holding its parents.
#[derive(Clone)]
pub enum Op<T: Elem> {
    /// No operation — a pure data leaf or a gradient accumulator.
    None,

    /// Contiguous copy of the input into an own buffer.
    Dup { input: Tensor<T> },

    /// Elementwise binary: result = op(lhs, rhs), scalar-coercing.
    Binary {
        lhs: Tensor<T>,
        rhs: Tensor<T>,
        op: BinaryOp,
    },

    /// Multiply by a scalar tensor: result = input · factor.
    Scale {
        input: Tensor<T>,
        factor: Tensor<T>,
    },

    /// Elementwise unary: result = op(input).
    Unary { input: Tensor<T>, op: UnaryOp },

    /// Sum of all elements → scalar.
    Sum { input: Tensor<T> },

    /// Mean over axis 0 → extent 1 on axis 0.
    Mean { input: Tensor<T> },

    /// Tile the input up to the result's shape (integer axis ratios).
    Repeat { input: Tensor<T> },

    /// Same data, new extents. The result aliases the input buffer.
    Reshape { input: Tensor<T> },

    /// Plain alias of the input.
    View { input: Tensor<T> },

    /// Axes 0 and 1 swapped by stride rewrite. No data moves.
    Transpose { input: Tensor<T> },

    /// Write src's values into dst's buffer; the result aliases dst.
    Cpy { src: Tensor<T>, dst: Tensor<T> },

    /// Matrix multiply with on-the-fly transposition flags, covering the
    /// four tags matmul / matmul_t0 / matmul_t1 / matmul_t0t1.
    Matmul {
        lhs: Tensor<T>,
        rhs: Tensor<T>,
        trans_lhs: bool,
        trans_rhs: bool,
    },
}

impl<T: Elem> Op<T> {
    /// Whether this is the leaf tag.
    pub fn is_none(&self) -> bool {
        matches!(self, Op::None)
    }

    /// References to the parent tensors, in src0/src1 order.
    /// The graph walk visits exactly these.
    pub fn inputs(&self) -> Vec<&Tensor<T>> {
        match self {
            Op::None => vec![],
            Op::Dup { input }
            | Op::Unary { input, .. }
            | Op::Sum { input }
            | Op::Mean { input }
            | Op::Repeat { input }
            | Op::Reshape { input }
            | Op::View { input }
            | Op::Transpose { input } => vec![input],
            Op::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Op::Scale { input, factor } => vec![input, factor],
            Op::Cpy { src, dst } => vec![src, dst],
            Op::Matmul { lhs, rhs, .. } => vec![lhs, rhs],
        }
    }

    /// Stable lower-case tag name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Op::None => "none",
            Op::Dup { .. } => "dup",
            Op::Binary { op, .. } => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
            },
            Op::Scale { .. } => "scale",
            Op::Unary { op, .. } => match op {
                UnaryOp::Sqr => "sqr",
                UnaryOp::Sqrt => "sqrt",
                UnaryOp::Abs => "abs",
                UnaryOp::Sgn => "sgn",
                UnaryOp::Neg => "neg",
                UnaryOp::Step => "step",
                UnaryOp::Relu => "relu",
                UnaryOp::Gelu => "gelu",
                UnaryOp::Norm => "norm",
            },
            Op::Sum { .. } => "sum",
            Op::Mean { .. } => "mean",
            Op::Repeat { .. } => "repeat",
            Op::Reshape { .. } => "reshape",
            Op::View { .. } => "view",
            Op::Transpose { .. } => "transpose",
            Op::Cpy { .. } => "cpy",
            Op::Matmul {
                trans_lhs,
                trans_rhs,
                ..
            } => match (trans_lhs, trans_rhs) {
                (false, false) => "matmul",
                (true, false) => "matmul_t0",
                (false, true) => "matmul_t1",
                (true, true) => "matmul_t0t1",
            },
        }
    }

    /// Short display symbol, used by the DOT exporter.
    pub fn symbol(&self) -> &'static str {
        match self {
            Op::None => "·",
            Op::Dup { .. } => "dup(x)",
            Op::Binary { op, .. } => match op {
                BinaryOp::Add => "x+y",
                BinaryOp::Sub => "x-y",
                BinaryOp::Mul => "x*y",
                BinaryOp::Div => "x/y",
            },
            Op::Scale { .. } => "x*v",
            Op::Unary { op, .. } => match op {
                UnaryOp::Sqr => "x^2",
                UnaryOp::Sqrt => "√x",
                UnaryOp::Abs => "|x|",
                UnaryOp::Sgn => "sgn(x)",
                UnaryOp::Neg => "-x",
                UnaryOp::Step => "step(x)",
                UnaryOp::Relu => "relu(x)",
                UnaryOp::Gelu => "gelu(x)",
                UnaryOp::Norm => "norm(x)",
            },
            Op::Sum { .. } => "Σx",
            Op::Mean { .. } => "Σx/n",
            Op::Repeat { .. } => "repeat(x)",
            Op::Reshape { .. } => "reshape(x)",
            Op::View { .. } => "view(x)",
            Op::Transpose { .. } => "xᵀ",
            Op::Cpy { .. } => "x→y",
            Op::Matmul {
                trans_lhs,
                trans_rhs,
                ..
            } => match (trans_lhs, trans_rhs) {
                (false, false) => "X·Y",
                (true, false) => "Xᵀ·Y",
                (false, true) => "X·Yᵀ",
                (true, true) => "Xᵀ·Yᵀ",
            },
        }
    }
}

impl<T: Elem> std::fmt::Debug for Op<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self.inputs().iter().map(|t| t.id()).collect();
        write!(f, "{}({:?})", self.name(), ids)
    }
}
