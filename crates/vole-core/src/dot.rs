// DOT export — render the plan for GraphViz
//
// Node boxes show the op symbol, the shape, and the debug name when one is
// set. Source edges are solid, gradient edges dashed. Leaves are filled
// green, displaced scratch accumulators gray.

use std::collections::HashSet;
use std::fmt::Write;

use crate::elem::Elem;
use crate::graph::Graph;
use crate::op::TensorId;
use crate::tensor::Tensor;

fn label<T: Elem>(t: &Tensor<T>) -> String {
    match t.name() {
        Some(name) => format!("{}\\n{} {}", name, t.op().symbol(), t.shape()),
        None => format!("{} {}", t.op().symbol(), t.shape()),
    }
}

impl<T: Elem> Graph<T> {
    /// Render the whole plan as a GraphViz digraph.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph vole {\n");
        out.push_str("  rankdir=LR;\n");
        out.push_str("  node [shape=record];\n");

        for leaf in self.leaves() {
            let _ = writeln!(
                out,
                "  {} [label=\"{}\", style=filled, fillcolor=palegreen];",
                leaf.id(),
                label(leaf)
            );
        }
        for node in self.nodes() {
            let _ = writeln!(out, "  {} [label=\"{}\"];", node.id(), label(node));
        }
        // Scratch tensors that did not re-enter the plan as nodes or leaves.
        let mut declared: HashSet<TensorId> = self
            .nodes()
            .iter()
            .chain(self.leaves().iter())
            .map(|t| t.id())
            .collect();
        for s in self.scratch() {
            if declared.insert(s.id()) {
                let _ = writeln!(
                    out,
                    "  {} [label=\"{}\", style=filled, fillcolor=gray];",
                    s.id(),
                    label(s)
                );
            }
        }

        for node in self.nodes() {
            for parent in node.op().inputs() {
                let _ = writeln!(out, "  {} -> {};", parent.id(), node.id());
            }
            if let Some(g) = node.grad() {
                if declared.contains(&g.id()) {
                    let _ = writeln!(out, "  {} -> {} [style=dashed];", node.id(), g.id());
                }
            }
        }

        out.push_str("}\n");
        out
    }
}
