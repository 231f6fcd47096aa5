use crate::shape::Shape;

/// All errors that can occur within Vole.
///
/// Shape preconditions, contiguity requirements, graph-state misuse, and
/// reserved (unimplemented) op dispatch are all captured here so that every
/// failure surfaces as a typed, recoverable `Result`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Elementwise op on tensors that are neither same-shape nor scalar-coercible.
    #[error("{op}: shape mismatch — {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// A scalar operand was required (e.g. the `scale` factor).
    #[error("expected a scalar tensor, got shape {shape}")]
    NotAScalar { shape: Shape },

    /// Matrix multiplication with incompatible extents.
    #[error(
        "matmul shape mismatch: {lhs} (trans={trans_lhs}) @ {rhs} (trans={trans_rhs}) — \
         contracted extents and batch/channel must agree"
    )]
    MatmulShapeMismatch {
        lhs: Shape,
        rhs: Shape,
        trans_lhs: bool,
        trans_rhs: bool,
    },

    /// `repeat_to` target extents are not integer multiples of the source.
    #[error("cannot repeat {src} to {dst}: every target extent must be a multiple")]
    RepeatMismatch { src: Shape, dst: Shape },

    /// Reshape/cpy with differing element counts.
    #[error("element count mismatch: {expected} vs {got}")]
    ElementCountMismatch { expected: usize, got: usize },

    /// An operation that demands contiguous data was given a strided view.
    #[error("{op}: requires contiguous data")]
    RequiresContiguous { op: &'static str },

    /// Tensor rank outside 1..=MAX_DIMS.
    #[error("rank {rank} out of range (1..=4)")]
    RankOutOfRange { rank: usize },

    /// A gradient must propagate through an op with no backward rule.
    #[error("backward not implemented for op '{op}'")]
    BackwardUnimplemented { op: &'static str },

    /// `build_backward` on a graph with no forward plan.
    #[error("graph has no forward plan (call build_forward first)")]
    EmptyGraph,

    /// `build_backward` called twice on the same graph.
    #[error("backward plan already built")]
    BackwardAlreadyBuilt,

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
