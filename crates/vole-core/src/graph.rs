use std::collections::HashSet;

use crate::backward;
use crate::elem::Elem;
use crate::error::{Error, Result};
use crate::forward;
use crate::op::TensorId;
use crate::tensor::Tensor;

// Graph — DAG ownership and the evaluation plan
//
// The graph linearises the reachable DAG into an ordered node list and owns
// every tensor it has seen, so the whole expression (and later its adjoint)
// lives exactly as long as the graph.
//
//   leaves  — pure data: op == none and no gradient slot; never evaluated
//   nodes   — computed tensors and parameters, parents before children
//   grads   — per-node snapshot of the gradient handle at insertion time;
//             reset_grads targets these buffers even after backward
//             construction re-points the nodes' live gradient slots
//   scratch — gradient accumulators displaced by backward construction
//
// build_backward extends the same plan: the per-op rules in backward.rs
// grow adjoint expressions out of the parameters' gradient slots, and a
// second forward build pulls those expressions into `nodes`. One compute()
// then produces values and gradients in a single ordered sweep.

/// An evaluation plan over a tensor DAG: forward nodes, and after
/// [`build_backward`](Graph::build_backward) the adjoint subgraph too.
pub struct Graph<T: Elem> {
    nodes: Vec<Tensor<T>>,
    grads: Vec<Option<Tensor<T>>>,
    leaves: Vec<Tensor<T>>,
    scratch: Vec<Tensor<T>>,
    visited: HashSet<TensorId>,
    built_forward: bool,
    built_backward: bool,
}

impl<T: Elem> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Elem> Graph<T> {
    /// An empty graph owning no tensors.
    pub fn new() -> Self {
        Graph {
            nodes: Vec::new(),
            grads: Vec::new(),
            leaves: Vec::new(),
            scratch: Vec::new(),
            visited: HashSet::new(),
            built_forward: false,
            built_backward: false,
        }
    }

    /// Induct every tensor reachable from `root` into the plan.
    ///
    /// Depth-first post-order over op inputs, deduplicated by tensor
    /// identity, so parents always precede children and repeated calls
    /// (same or additional roots) only append what is new.
    pub fn build_forward(&mut self, root: &Tensor<T>) {
        self.visit(root);
        self.built_forward = true;
        tracing::debug!(
            "forward plan: {} nodes, {} leaves",
            self.nodes.len(),
            self.leaves.len()
        );
    }

    fn visit(&mut self, t: &Tensor<T>) {
        if self.visited.contains(&t.id()) {
            return;
        }
        self.visited.insert(t.id());
        for parent in t.op().inputs() {
            self.visit(parent);
        }
        if t.op().is_none() && !t.requires_grad() {
            self.leaves.push(t.clone());
        } else {
            self.nodes.push(t.clone());
            self.grads.push(t.grad());
        }
    }

    /// Derive the adjoint subgraph and append it to the plan.
    ///
    /// Walks the nodes in reverse applying each op's backward rule, then
    /// inducts every parameter's gradient expression into the forward plan,
    /// and finally zeroes all gradient accumulators.
    ///
    /// With `keep = true` the accumulation combinators are emitted in place
    /// (each one views its accumulator's buffer), so running `compute()` K
    /// times accumulates K gradient steps; with `keep = false` they are
    /// fresh tensors and every `compute()` starts from the zeroed
    /// accumulators.
    pub fn build_backward(&mut self, keep: bool) -> Result<()> {
        if !self.built_forward || self.nodes.is_empty() {
            return Err(Error::EmptyGraph);
        }
        if self.built_backward {
            return Err(Error::BackwardAlreadyBuilt);
        }

        let forward_nodes = self.nodes.clone();
        for node in forward_nodes.iter().rev() {
            if node.requires_grad() {
                backward::backprop_node(node, keep, &mut self.scratch)?;
            }
        }

        for node in forward_nodes.iter().rev() {
            if node.is_param() {
                if let Some(g) = node.grad() {
                    self.visit(&g);
                }
            }
        }
        self.built_backward = true;
        tracing::debug!(
            "backward plan: {} nodes, {} scratch, keep={}",
            self.nodes.len(),
            self.scratch.len(),
            keep
        );

        self.reset_grads();
        Ok(())
    }

    /// Zero every gradient accumulator snapshotted at node insertion.
    /// Idempotent; seeds written afterwards (e.g. the root's unit gradient)
    /// survive until the next call.
    pub fn reset_grads(&self) {
        for g in self.grads.iter().flatten() {
            g.set_all(T::zero());
        }
    }

    /// Evaluate every node in plan order. Leaves are never evaluated; after
    /// `build_backward` this fills gradients in the same sweep.
    pub fn compute(&self) -> Result<()> {
        tracing::trace!("compute: evaluating {} nodes", self.nodes.len());
        for node in &self.nodes {
            forward::eval(node)?;
        }
        Ok(())
    }

    /// Computed tensors and parameters, in evaluation order.
    pub fn nodes(&self) -> &[Tensor<T>] {
        &self.nodes
    }

    /// Pure-data tensors.
    pub fn leaves(&self) -> &[Tensor<T>] {
        &self.leaves
    }

    /// Gradient accumulators displaced by backward construction.
    pub fn scratch(&self) -> &[Tensor<T>] {
        &self.scratch
    }

    /// Gradient snapshots parallel to [`nodes`](Graph::nodes).
    pub fn grads(&self) -> &[Option<Tensor<T>>] {
        &self.grads
    }
}
