//! Plain gradient descent.
//!
//! The engine's only optimizer policy: one in-place step
//! `p ← p − lr · p.grad` per parameter. Updates write through the shared
//! storage, so every view of a parameter observes the new values on the
//! next `compute()`.

use vole_core::{Elem, Error, Result, Tensor};

/// Apply one gradient-descent step to each parameter.
///
/// Every tensor must carry a gradient (i.e. be a parameter inside a graph
/// whose backward plan has been built and computed).
pub fn sgd_step<T: Elem>(params: &[&Tensor<T>], lr: T) -> Result<()> {
    for p in params {
        let g = p.grad().ok_or_else(|| {
            Error::msg(format!(
                "sgd_step: tensor {:?} has no gradient — not a parameter?",
                p.name().unwrap_or_else(|| format!("{:?}", p.id()))
            ))
        })?;
        let gv = g.to_vec();
        let pv = p.to_vec();
        let next: Vec<T> = pv
            .iter()
            .zip(gv.iter())
            .map(|(&w, &dw)| w - lr * dw)
            .collect();
        p.set_data(&next)?;
        tracing::trace!(
            "sgd_step: updated {} elements of {:?}",
            next.len(),
            p.name()
        );
    }
    Ok(())
}
