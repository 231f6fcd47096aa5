// Backward rules — adjoint construction
//
// For a node t with gradient g = ∂L/∂t, each rule wires new graph nodes
// that express the local adjoint and accumulates them into the parents'
// gradient slots. Construction only; the values flow when Graph::compute
// evaluates the extended plan.
//
// GRADIENT RULES:
//
//   dup:      p0.grad += g
//   add:      p0.grad += g            p1.grad += g
//   sub:      p0.grad += g            p1.grad -= g
//   mul:      p0.grad += p1·g         p1.grad += p0·g
//   div:      p0.grad += g/p1         p1.grad -= g·(t/p1)
//   sqr:      p0.grad += 2·p0·g
//   sum:      p0.grad += g            (scalar broadcast)
//   matmul:   ∂A = ∂C·Bᵀ, ∂B = Aᵀ·∂C, transpositions folded per variant
//
// A contribution wider than the parent's gradient (a scalar operand that
// was broadcast forward) is sum-reduced before accumulating, so I3
// (grad.shape == self.shape) always holds.
//
// ACCUMULATION: the running accumulator is re-pointed at `old ± contrib`.
// With keep=true that combinator is emitted in place (it views the old
// accumulator's buffer), so repeated compute() calls keep adding into the
// same buffer and reset_grads still reaches it through the graph's stable
// snapshot. With keep=false the combinator is a fresh tensor and every
// compute() rebuilds the gradient from the zeroed accumulators. Displaced
// accumulators move to the graph's scratch list.
//
// Every op outside the table above has no backward rule: reaching one with
// a non-null gradient is a typed error naming the op.

use crate::elem::Elem;
use crate::error::{Error, Result};
use crate::op::{BinaryOp, Op, UnaryOp};
use crate::tensor::Tensor;

/// Apply the backward rule of one node, accumulating into its parents.
pub(crate) fn backprop_node<T: Elem>(
    t: &Tensor<T>,
    keep: bool,
    scratch: &mut Vec<Tensor<T>>,
) -> Result<()> {
    let g = match t.grad() {
        Some(g) => g,
        None => return Ok(()),
    };

    match t.op() {
        Op::None => Ok(()),

        Op::Dup { input } => {
            if input.requires_grad() {
                accumulate(input, g, false, keep, scratch)?;
            }
            Ok(())
        }

        Op::Binary { lhs, rhs, op } => match op {
            BinaryOp::Add => {
                if lhs.requires_grad() {
                    accumulate(lhs, g.clone(), false, keep, scratch)?;
                }
                if rhs.requires_grad() {
                    accumulate(rhs, g, false, keep, scratch)?;
                }
                Ok(())
            }
            BinaryOp::Sub => {
                if lhs.requires_grad() {
                    accumulate(lhs, g.clone(), false, keep, scratch)?;
                }
                if rhs.requires_grad() {
                    accumulate(rhs, g, true, keep, scratch)?;
                }
                Ok(())
            }
            BinaryOp::Mul => {
                if lhs.requires_grad() {
                    let contrib = rhs.mul(&g)?;
                    accumulate(lhs, contrib, false, keep, scratch)?;
                }
                if rhs.requires_grad() {
                    let contrib = lhs.mul(&g)?;
                    accumulate(rhs, contrib, false, keep, scratch)?;
                }
                Ok(())
            }
            BinaryOp::Div => {
                if lhs.requires_grad() {
                    let contrib = g.div(rhs)?;
                    accumulate(lhs, contrib, false, keep, scratch)?;
                }
                if rhs.requires_grad() {
                    // t = p0/p1, so t/p1 = p0/p1² — reuses the forward value
                    let contrib = g.mul(&t.div(rhs)?)?;
                    accumulate(rhs, contrib, true, keep, scratch)?;
                }
                Ok(())
            }
        },

        Op::Unary {
            input,
            op: UnaryOp::Sqr,
        } => {
            if input.requires_grad() {
                let two = Tensor::init_scalar(T::from_f64(2.0))?;
                let contrib = input.mul(&g)?.scale(&two)?;
                accumulate(input, contrib, false, keep, scratch)?;
            }
            Ok(())
        }

        Op::Sum { input } => {
            if input.requires_grad() {
                // scalar g broadcasts across the parent's shape
                accumulate(input, g, false, keep, scratch)?;
            }
            Ok(())
        }

        Op::Matmul {
            lhs,
            rhs,
            trans_lhs,
            trans_rhs,
        } => {
            let (t0, t1) = (*trans_lhs, *trans_rhs);
            if lhs.requires_grad() {
                let contrib = match (t0, t1) {
                    // C = A·B      → ∂A = G·Bᵀ
                    (false, false) => g.matmul_with(rhs, false, true)?,
                    // C = Aᵀ·B     → ∂A = B·Gᵀ
                    (true, false) => rhs.matmul_with(&g, false, true)?,
                    // C = A·Bᵀ     → ∂A = G·B
                    (false, true) => g.matmul_with(rhs, false, false)?,
                    // C = Aᵀ·Bᵀ    → ∂A = Bᵀ·Gᵀ
                    (true, true) => rhs.matmul_with(&g, true, true)?,
                };
                accumulate(lhs, contrib, false, keep, scratch)?;
            }
            if rhs.requires_grad() {
                let contrib = match (t0, t1) {
                    // C = A·B      → ∂B = Aᵀ·G
                    (false, false) => lhs.matmul_with(&g, true, false)?,
                    // C = Aᵀ·B     → ∂B = A·G
                    (true, false) => lhs.matmul_with(&g, false, false)?,
                    // C = A·Bᵀ     → ∂B = Gᵀ·A
                    (false, true) => g.matmul_with(lhs, true, false)?,
                    // C = Aᵀ·Bᵀ    → ∂B = Gᵀ·Aᵀ
                    (true, true) => g.matmul_with(lhs, true, true)?,
                };
                accumulate(rhs, contrib, false, keep, scratch)?;
            }
            Ok(())
        }

        other => Err(Error::BackwardUnimplemented { op: other.name() }),
    }
}

/// Fold `contrib` into `parent.grad`, re-pointing the slot at the new
/// accumulator and retiring the old one to the scratch list.
fn accumulate<T: Elem>(
    parent: &Tensor<T>,
    contrib: Tensor<T>,
    negate: bool,
    keep: bool,
    scratch: &mut Vec<Tensor<T>>,
) -> Result<()> {
    let old = match parent.grad() {
        Some(g) => g,
        None => return Ok(()),
    };

    // Broadcast-reduce: a contribution wider than the accumulator (scalar
    // operand broadcast forward) collapses to its sum.
    let contrib = if old.shape().same_shape(contrib.shape()) || contrib.shape().is_scalar() {
        contrib
    } else if old.shape().is_scalar() {
        contrib.sum()
    } else {
        return Err(Error::ShapeMismatch {
            op: "grad-accumulate",
            lhs: *old.shape(),
            rhs: *contrib.shape(),
        });
    };

    let next = if negate {
        Tensor::sub_impl(&old, &contrib, keep)?
    } else {
        Tensor::add_impl(&old, &contrib, keep)?
    };
    parent.replace_grad(next);
    scratch.push(old);
    Ok(())
}
