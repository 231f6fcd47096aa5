//! # Vole
//!
//! A small graph-based reverse-mode automatic differentiation engine.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use vole::prelude::*;
//!
//! fn main() -> vole::Result<()> {
//!     let x = Tensor::<f32>::init_scalar(3.0)?.with_name("x");
//!     x.set_param();
//!     let y = x.sqr();
//!
//!     let mut g = Graph::new();
//!     g.build_forward(&y);
//!     g.build_backward(false)?;
//!
//!     y.grad().unwrap().set_all(1.0);
//!     g.compute()?;
//!
//!     assert_eq!(y.to_scalar()?, 9.0);
//!     assert_eq!(x.grad().unwrap().to_scalar()?, 6.0);
//!     Ok(())
//! }
//! ```
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `vole-core` | Tensor, Shape, Elem, the op catalogue, the compute graph |
//! | `vole` | This facade, plus the plain gradient-descent step |

/// Re-export core types.
pub use vole_core::{
    BinaryOp, Elem, Error, Graph, Op, Result, Shape, Tensor, TensorId, UnaryOp, MAX_DIMS,
};

pub mod optim;

/// Everything a model needs in one import.
pub mod prelude {
    pub use crate::optim::sgd_step;
    pub use vole_core::{Elem, Error, Graph, Result, Shape, Tensor};
}
