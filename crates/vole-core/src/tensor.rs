use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use rand::Rng;

use crate::elem::Elem;
use crate::error::{Error, Result};
use crate::op::{BinaryOp, Op, TensorId, UnaryOp};
use crate::shape::Shape;

// Tensor — the fundamental data structure
//
// A Tensor is an n-dimensional (rank ≤ 4) array of scalars plus the op that
// produced it. Construction is deferred-evaluation: an op constructor only
// allocates the (zeroed) result buffer and records its parents; the values
// are filled in when Graph::compute walks the plan.
//
// MEMORY MODEL:
//
//   Tensor is a cheap handle: Arc<TensorInner>. Parents are held inside the
//   Op variant, so a child keeps every ancestor alive for as long as it
//   exists, and the graph's node/leaf/scratch lists pin the rest.
//
//   Storage sits behind its own Arc<RwLock<Vec<T>>> so that views (view,
//   reshape, transpose, cpy results, in-place gradient accumulators) share
//   the producer's buffer without copying.
//
// GRADIENTS:
//
//   A tensor participates in backprop iff its grad slot is populated:
//   set_param installs a zeroed twin, and every op constructor propagates
//   the property — if any parent carries a grad, the result receives a
//   shape-identical zeroed twin of its own. Backward construction later
//   re-points grad slots at adjoint expressions, hence the RwLock.

struct TensorInner<T: Elem> {
    /// Unique identifier, used for DAG deduplication.
    id: TensorId,
    /// Extents + strides. Views differ from their producer only here.
    shape: Shape,
    /// Flat element buffer, shared between views.
    storage: Arc<RwLock<Vec<T>>>,
    /// The operation that produced this tensor (None for leaves).
    op: Op<T>,
    /// ∂loss/∂self accumulator; re-pointed by backward construction.
    grad: RwLock<Option<Tensor<T>>>,
    /// Whether this tensor is a trainable parameter.
    is_param: AtomicBool,
    /// Optional human label (debug only).
    name: RwLock<Option<String>>,
}

/// An n-dimensional array of scalars inside a compute DAG.
pub struct Tensor<T: Elem> {
    inner: Arc<TensorInner<T>>,
}

// Manual Clone: Arc::clone is just a refcount increment.
impl<T: Elem> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Elem> std::fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={}, op={})",
            self.inner.id,
            self.inner.shape,
            self.inner.op.name(),
        )
    }
}

impl<T: Elem> Tensor<T> {
    // Internal constructors

    fn from_parts(shape: Shape, storage: Arc<RwLock<Vec<T>>>, op: Op<T>) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::next(),
                shape,
                storage,
                op,
                grad: RwLock::new(None),
                is_param: AtomicBool::new(false),
                name: RwLock::new(None),
            }),
        }
    }

    /// Contiguous shape over the extents of an existing shape.
    fn alloc_shape(dims: &[usize]) -> Shape {
        Shape::contiguous(dims).expect("extents come from an existing shape")
    }

    /// Op result with a freshly allocated zeroed buffer.
    fn op_result(shape: Shape, op: Op<T>) -> Self {
        let track = op.inputs().iter().any(|p| p.requires_grad());
        let buf = vec![T::zero(); shape.elem_count()];
        let t = Self::from_parts(shape, Arc::new(RwLock::new(buf)), op);
        if track {
            t.alloc_grad();
        }
        t
    }

    /// Op result sharing an existing buffer (views, in-place accumulators).
    fn op_view(shape: Shape, storage: Arc<RwLock<Vec<T>>>, op: Op<T>) -> Self {
        let track = op.inputs().iter().any(|p| p.requires_grad());
        let t = Self::from_parts(shape, storage, op);
        if track {
            t.alloc_grad();
        }
        t
    }

    /// Install a zeroed, shape-identical gradient twin.
    fn alloc_grad(&self) {
        let shape = Self::alloc_shape(self.dims());
        let buf = vec![T::zero(); shape.elem_count()];
        let twin = Self::from_parts(shape, Arc::new(RwLock::new(buf)), Op::None);
        *self.grad_slot_write() = Some(twin);
    }

    fn grad_slot_read(&self) -> std::sync::RwLockReadGuard<'_, Option<Tensor<T>>> {
        self.inner.grad.read().expect("grad lock poisoned")
    }

    fn grad_slot_write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Tensor<T>>> {
        self.inner.grad.write().expect("grad lock poisoned")
    }

    pub(crate) fn storage_read(&self) -> std::sync::RwLockReadGuard<'_, Vec<T>> {
        self.inner.storage.read().expect("storage lock poisoned")
    }

    pub(crate) fn storage_write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<T>> {
        self.inner.storage.write().expect("storage lock poisoned")
    }

    /// Snapshot of the raw buffer (kernels read through this, then take the
    /// destination write lock — safe even when the destination aliases an
    /// operand).
    pub(crate) fn buffer_clone(&self) -> Vec<T> {
        self.storage_read().clone()
    }

    pub(crate) fn storage_arc(&self) -> Arc<RwLock<Vec<T>>> {
        Arc::clone(&self.inner.storage)
    }

    // Creation

    /// Zero-initialised contiguous tensor with the given extents.
    pub fn init(dims: &[usize]) -> Result<Self> {
        let shape = Shape::contiguous(dims)?;
        let buf = vec![T::zero(); shape.elem_count()];
        Ok(Self::from_parts(shape, Arc::new(RwLock::new(buf)), Op::None))
    }

    /// Single-element tensor holding `v`.
    pub fn init_scalar(v: T) -> Result<Self> {
        let t = Self::init(&[1])?;
        t.set_all(v);
        Ok(t)
    }

    /// Evenly spaced values: element i takes `start + (end − start)·i/n`
    /// (end-exclusive).
    pub fn init_arange(dims: &[usize], start: T, end: T) -> Result<Self> {
        let t = Self::init(dims)?;
        let n = t.n_elems();
        let (s, e) = (start.to_f64(), end.to_f64());
        let step = (e - s) / n as f64;
        {
            let mut buf = t.storage_write();
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = T::from_f64(s + step * i as f64);
            }
        }
        Ok(t)
    }

    /// Uniform random values in [0, 1) from a caller-supplied RNG.
    pub fn init_rand<R: Rng + ?Sized>(rng: &mut R, dims: &[usize]) -> Result<Self> {
        let t = Self::init(dims)?;
        {
            let mut buf = t.storage_write();
            for slot in buf.iter_mut() {
                *slot = T::from_f64(rng.gen::<f64>());
            }
        }
        Ok(t)
    }

    // Accessors

    /// Unique tensor ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The shape/stride descriptor.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The extents up to the declared rank.
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Number of declared axes.
    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Total number of elements.
    pub fn n_elems(&self) -> usize {
        self.inner.shape.elem_count()
    }

    /// Whether the data is laid out row-major with no gaps.
    pub fn is_contiguous(&self) -> bool {
        self.inner.shape.is_contiguous()
    }

    /// The op that produced this tensor.
    pub fn op(&self) -> &Op<T> {
        &self.inner.op
    }

    /// Clone of the current gradient handle, if any.
    pub fn grad(&self) -> Option<Tensor<T>> {
        self.grad_slot_read().clone()
    }

    /// Whether a gradient slot is populated (the tensor participates in
    /// backprop).
    pub fn requires_grad(&self) -> bool {
        self.grad_slot_read().is_some()
    }

    /// Re-point the gradient slot at a new accumulator. Backward
    /// construction calls this when it extends the adjoint chain.
    pub(crate) fn replace_grad(&self, g: Tensor<T>) {
        *self.grad_slot_write() = Some(g);
    }

    /// Whether this tensor is a trainable parameter.
    pub fn is_param(&self) -> bool {
        self.inner.is_param.load(Ordering::Relaxed)
    }

    /// Mark as a trainable parameter, installing a zeroed gradient twin.
    /// Call this before building ops on top, so gradient tracking
    /// propagates into the expression.
    pub fn set_param(&self) {
        if !self.requires_grad() {
            self.alloc_grad();
        }
        self.inner.is_param.store(true, Ordering::Relaxed);
    }

    /// The debug label, if set.
    pub fn name(&self) -> Option<String> {
        self.inner.name.read().expect("name lock poisoned").clone()
    }

    /// Attach a debug label.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.write().expect("name lock poisoned") = Some(name.into());
    }

    /// Builder-style variant of [`set_name`](Self::set_name).
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    // Data access

    /// Overwrite the buffer with `data` (contiguous tensors only).
    pub fn set_data(&self, data: &[T]) -> Result<()> {
        if !self.is_contiguous() {
            return Err(Error::RequiresContiguous { op: "set_data" });
        }
        if data.len() != self.n_elems() {
            return Err(Error::ElementCountMismatch {
                expected: self.n_elems(),
                got: data.len(),
            });
        }
        self.storage_write().copy_from_slice(data);
        Ok(())
    }

    /// Fill the entire buffer with one value.
    pub fn set_all(&self, v: T) {
        for slot in self.storage_write().iter_mut() {
            *slot = v;
        }
    }

    /// Element at the given coordinate; `coords.len()` must equal the rank.
    pub fn get(&self, coords: &[usize]) -> T {
        let off = self.inner.shape.offset_of(coords);
        self.storage_read()[off]
    }

    /// The values in logical order (strided views are followed).
    pub fn to_vec(&self) -> Vec<T> {
        let buf = self.storage_read();
        self.inner.shape.index_iter().map(|off| buf[off]).collect()
    }

    /// The single element of a one-element tensor.
    pub fn to_scalar(&self) -> Result<T> {
        if self.n_elems() != 1 {
            return Err(Error::NotAScalar {
                shape: *self.shape(),
            });
        }
        Ok(self.storage_read()[0])
    }

    // Elementwise binary ops (shape-coercing: same shape, or one side scalar)

    /// Elementwise addition.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Add)
    }

    /// Elementwise subtraction.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Sub)
    }

    /// Elementwise multiplication.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Mul)
    }

    /// Elementwise division.
    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Div)
    }

    fn binary(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        let out = self.coerced_dims(rhs, self.op_name_for(op))?;
        Ok(Self::op_result(
            Self::alloc_shape(out),
            Op::Binary {
                lhs: self.clone(),
                rhs: rhs.clone(),
                op,
            },
        ))
    }

    fn op_name_for(&self, op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }

    /// The output extents of a coercing binary op: the wider side wins,
    /// the left operand on a tie.
    fn coerced_dims<'a>(&'a self, rhs: &'a Self, op: &'static str) -> Result<&'a [usize]> {
        if self.shape().same_shape(rhs.shape()) || rhs.shape().is_scalar() {
            Ok(self.dims())
        } else if self.shape().is_scalar() {
            Ok(rhs.dims())
        } else {
            Err(Error::ShapeMismatch {
                op,
                lhs: *self.shape(),
                rhs: *rhs.shape(),
            })
        }
    }

    /// Addition with an explicit in-place choice: when `inplace`, the result
    /// views `lhs`'s buffer and the kernel accumulates into it. `lhs` must
    /// be the wider (output-shaped) side.
    pub(crate) fn add_impl(lhs: &Self, rhs: &Self, inplace: bool) -> Result<Self> {
        Self::accum_impl(lhs, rhs, BinaryOp::Add, inplace)
    }

    /// Subtraction counterpart of [`add_impl`](Self::add_impl).
    pub(crate) fn sub_impl(lhs: &Self, rhs: &Self, inplace: bool) -> Result<Self> {
        Self::accum_impl(lhs, rhs, BinaryOp::Sub, inplace)
    }

    fn accum_impl(lhs: &Self, rhs: &Self, op: BinaryOp, inplace: bool) -> Result<Self> {
        if !lhs.shape().same_shape(rhs.shape()) && !rhs.shape().is_scalar() {
            return Err(Error::ShapeMismatch {
                op: lhs.op_name_for(op),
                lhs: *lhs.shape(),
                rhs: *rhs.shape(),
            });
        }
        let op = Op::Binary {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
            op,
        };
        if inplace {
            Ok(Self::op_view(*lhs.shape(), lhs.storage_arc(), op))
        } else {
            Ok(Self::op_result(Self::alloc_shape(lhs.dims()), op))
        }
    }

    /// Multiply by a scalar tensor.
    pub fn scale(&self, factor: &Self) -> Result<Self> {
        if !factor.shape().is_scalar() {
            return Err(Error::NotAScalar {
                shape: *factor.shape(),
            });
        }
        Ok(Self::op_result(
            Self::alloc_shape(self.dims()),
            Op::Scale {
                input: self.clone(),
                factor: factor.clone(),
            },
        ))
    }

    // Elementwise unary ops

    fn unary(&self, op: UnaryOp) -> Self {
        Self::op_result(
            Self::alloc_shape(self.dims()),
            Op::Unary {
                input: self.clone(),
                op,
            },
        )
    }

    /// x²
    pub fn sqr(&self) -> Self {
        self.unary(UnaryOp::Sqr)
    }

    /// √x
    pub fn sqrt(&self) -> Self {
        self.unary(UnaryOp::Sqrt)
    }

    /// |x|
    pub fn abs(&self) -> Self {
        self.unary(UnaryOp::Abs)
    }

    /// Sign: -1, 0, or 1.
    pub fn sgn(&self) -> Self {
        self.unary(UnaryOp::Sgn)
    }

    /// -x
    pub fn neg(&self) -> Self {
        self.unary(UnaryOp::Neg)
    }

    /// Heaviside step.
    pub fn step(&self) -> Self {
        self.unary(UnaryOp::Step)
    }

    /// max(0, x)
    pub fn relu(&self) -> Self {
        self.unary(UnaryOp::Relu)
    }

    /// GELU (tanh approximation).
    pub fn gelu(&self) -> Self {
        self.unary(UnaryOp::Gelu)
    }

    /// Row-wise L2 normalisation.
    pub fn norm(&self) -> Self {
        self.unary(UnaryOp::Norm)
    }

    // Reductions

    /// Sum of all elements → scalar.
    pub fn sum(&self) -> Self {
        Self::op_result(Shape::scalar(), Op::Sum { input: self.clone() })
    }

    /// Mean over axis 0 → extent 1 on axis 0, other axes kept.
    pub fn mean(&self) -> Self {
        let mut dims = self.dims().to_vec();
        dims[0] = 1;
        Self::op_result(Self::alloc_shape(&dims), Op::Mean { input: self.clone() })
    }

    // Shape manipulation

    /// Tile this tensor up to `target`'s shape (integer axis ratios only).
    pub fn repeat_to(&self, target: &Self) -> Result<Self> {
        if !self.shape().can_repeat_to(target.shape()) {
            return Err(Error::RepeatMismatch {
                src: *self.shape(),
                dst: *target.shape(),
            });
        }
        Ok(Self::op_result(
            Self::alloc_shape(target.dims()),
            Op::Repeat {
                input: self.clone(),
            },
        ))
    }

    /// Same elements, new extents. Requires contiguity; aliases the buffer.
    pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
        let shape = self.shape().reshaped(dims)?;
        Ok(Self::op_view(
            shape,
            self.storage_arc(),
            Op::Reshape {
                input: self.clone(),
            },
        ))
    }

    /// Reshape to another tensor's extents.
    pub fn reshape_like(&self, other: &Self) -> Result<Self> {
        self.reshape(other.dims())
    }

    /// Swap axes 0 and 1 by stride rewrite. No data moves.
    pub fn transpose(&self) -> Self {
        Self::op_view(
            self.shape().transposed(),
            self.storage_arc(),
            Op::Transpose {
                input: self.clone(),
            },
        )
    }

    /// Plain alias of this tensor.
    pub fn view(&self) -> Self {
        Self::op_view(
            *self.shape(),
            self.storage_arc(),
            Op::View {
                input: self.clone(),
            },
        )
    }

    /// Copy into an own contiguous buffer.
    pub fn dup(&self) -> Self {
        Self::op_result(
            Self::alloc_shape(self.dims()),
            Op::Dup {
                input: self.clone(),
            },
        )
    }

    /// Write this tensor's values into `dst`'s buffer; the result aliases
    /// `dst`. Element counts must agree.
    pub fn cpy_to(&self, dst: &Self) -> Result<Self> {
        if self.n_elems() != dst.n_elems() {
            return Err(Error::ElementCountMismatch {
                expected: dst.n_elems(),
                got: self.n_elems(),
            });
        }
        Ok(Self::op_view(
            *dst.shape(),
            dst.storage_arc(),
            Op::Cpy {
                src: self.clone(),
                dst: dst.clone(),
            },
        ))
    }

    // Matrix multiplication

    /// `self @ rhs`.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        self.matmul_with(rhs, false, false)
    }

    /// `Op(self) @ Op(rhs)` with on-the-fly transposition flags.
    pub fn matmul_with(&self, rhs: &Self, trans_lhs: bool, trans_rhs: bool) -> Result<Self> {
        if !self.shape().can_matmul(trans_lhs, rhs.shape(), trans_rhs) {
            return Err(Error::MatmulShapeMismatch {
                lhs: *self.shape(),
                rhs: *rhs.shape(),
                trans_lhs,
                trans_rhs,
            });
        }
        let out = self.shape().matmul_out(trans_lhs, rhs.shape(), trans_rhs)?;
        Ok(Self::op_result(
            out,
            Op::Matmul {
                lhs: self.clone(),
                rhs: rhs.clone(),
                trans_lhs,
                trans_rhs,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_contiguous_and_zeroed() {
        let t = Tensor::<f32>::init(&[3, 2]).unwrap();
        assert!(t.is_contiguous());
        assert_eq!(t.to_vec(), vec![0.0; 6]);
        assert!(t.op().is_none());
        assert!(t.grad().is_none());
    }

    #[test]
    fn test_init_scalar() {
        let t = Tensor::<f64>::init_scalar(2.5).unwrap();
        assert!(t.shape().is_scalar());
        assert_eq!(t.to_scalar().unwrap(), 2.5);
    }

    #[test]
    fn test_init_arange() {
        let t = Tensor::<f32>::init_arange(&[4], 0.0, 8.0).unwrap();
        assert_eq!(t.to_vec(), vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_init_rand_range() {
        let mut rng = rand::thread_rng();
        let t = Tensor::<f32>::init_rand(&mut rng, &[10]).unwrap();
        assert!(t.is_contiguous());
        assert!(t.to_vec().iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_set_param_installs_twin() {
        let t = Tensor::<f32>::init(&[2, 2]).unwrap();
        t.set_param();
        assert!(t.is_param());
        let g = t.grad().unwrap();
        assert!(g.shape().same_shape(t.shape()));
        assert_eq!(g.to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn test_grad_tracking_propagates() {
        let x = Tensor::<f32>::init_scalar(3.0).unwrap();
        let w = Tensor::<f32>::init_scalar(2.0).unwrap();
        w.set_param();
        let y = w.mul(&x).unwrap();
        assert!(y.requires_grad());
        let z = x.sqr();
        assert!(z.grad().is_none());
    }

    #[test]
    fn test_get_coords() {
        let t = Tensor::<f32>::init_arange(&[3, 2], 0.0, 6.0).unwrap();
        // row-major, cols fastest: (col, row)
        assert_eq!(t.get(&[0, 0]), 0.0);
        assert_eq!(t.get(&[2, 1]), 5.0);
    }

    #[test]
    fn test_transpose_to_vec() {
        let t = Tensor::<f32>::init_arange(&[3, 2], 0.0, 6.0).unwrap();
        let tt = t.transpose();
        assert_eq!(tt.dims(), &[2, 3]);
        assert_eq!(tt.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(!tt.is_contiguous());
    }

    #[test]
    fn test_set_data_validation() {
        let t = Tensor::<f32>::init(&[4]).unwrap();
        assert!(t.set_data(&[1.0, 2.0]).is_err());
        t.set_data(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(t.transpose().set_data(&[0.0; 4]).is_err());
    }

    #[test]
    fn test_coercion_rules() {
        let v = Tensor::<f32>::init(&[3]).unwrap();
        let s = Tensor::<f32>::init_scalar(1.0).unwrap();
        assert_eq!(v.add(&s).unwrap().dims(), &[3]);
        assert_eq!(s.add(&v).unwrap().dims(), &[3]);
        let w = Tensor::<f32>::init(&[4]).unwrap();
        assert!(v.add(&w).is_err());
    }
}
