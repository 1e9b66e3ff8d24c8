//! Batched Lie-group tensors and operator dispatch.
//!
//! This module binds raw batched numeric buffers to a group variant tag and
//! dispatches every operator (exp, log, compose, ...) to the closed-form
//! kernels in [`so3`] and [`se3`]. Only the two variants exist, so dispatch
//! is an explicit match on a closed enum rather than any open-ended
//! registry.
//!
//! Lie group     | ambient      | tangent | algebra (hat)
//! ------------- | ------------ | ------- | -------------
//! SO(3)         | 3x3 rotation | R³      | 3x3 skew
//! SE(3)         | 3x4 `[R|t]`  | R⁶      | 4x4 `[[θ]ₓ ρ; 0 0]`
//!
//! All buffers carry a leading batch dimension and are stored row-major per
//! item. Operations never mutate their inputs; Jacobians are filled into
//! optional `&mut JacobianBatch` out-parameters and skipped entirely when
//! the caller passes `None`. Batched kernels parallelize across the batch
//! dimension with rayon.

use crate::core::{OrbitError, OrbitResult};
use nalgebra::{DMatrix, Matrix3, Matrix3x4, SMatrix, Vector3, Vector6};
use rayon::prelude::*;
use std::fmt;

pub mod se3;
pub mod so3;

/// Closed set of supported group variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupVariant {
    SO3,
    SE3,
}

impl GroupVariant {
    /// Tangent-space dimension (degrees of freedom).
    pub const fn dof(self) -> usize {
        match self {
            GroupVariant::SO3 => 3,
            GroupVariant::SE3 => 6,
        }
    }

    /// Shape of the ambient (group element) representation.
    pub const fn ambient_shape(self) -> (usize, usize) {
        match self {
            GroupVariant::SO3 => (3, 3),
            GroupVariant::SE3 => (3, 4),
        }
    }

    /// Shape of the Lie-algebra (hat) matrix representation.
    pub const fn algebra_shape(self) -> (usize, usize) {
        match self {
            GroupVariant::SO3 => (3, 3),
            GroupVariant::SE3 => (4, 4),
        }
    }

    const fn ambient_len(self) -> usize {
        let (r, c) = self.ambient_shape();
        r * c
    }
}

impl fmt::Display for GroupVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupVariant::SO3 => write!(f, "SO3"),
            GroupVariant::SE3 => write!(f, "SE3"),
        }
    }
}

fn read_mat<const R: usize, const C: usize>(slice: &[f64]) -> SMatrix<f64, R, C> {
    SMatrix::<f64, R, C>::from_row_slice(slice)
}

fn write_mat<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>, out: &mut [f64]) {
    for r in 0..R {
        for c in 0..C {
            out[r * C + c] = m[(r, c)];
        }
    }
}

/// Batched dense matrices of a fixed per-item shape, stored row-major.
///
/// Used for Lie-algebra matrices, ambient perturbations and adjoints; the
/// [`JacobianBatch`] alias names the same layout when it holds per-item
/// Jacobians shaped `(batch, output_dim, input_tangent_dim)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBatch {
    batch: usize,
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

/// Batched Jacobians, one `(output_dim, input_tangent_dim)` matrix per item.
pub type JacobianBatch = MatrixBatch;

impl MatrixBatch {
    /// An empty batch, typically passed as a Jacobian out-parameter and
    /// resized by the operation that fills it.
    pub fn empty() -> Self {
        MatrixBatch {
            batch: 0,
            nrows: 0,
            ncols: 0,
            data: Vec::new(),
        }
    }

    /// A zero-filled batch of the given per-item shape.
    pub fn zeros(batch: usize, nrows: usize, ncols: usize) -> Self {
        MatrixBatch {
            batch,
            nrows,
            ncols,
            data: vec![0.0; batch * nrows * ncols],
        }
    }

    /// Build from a raw row-major buffer, validating its length.
    pub fn from_raw(batch: usize, nrows: usize, ncols: usize, data: Vec<f64>) -> OrbitResult<Self> {
        if data.len() != batch * nrows * ncols {
            return Err(OrbitError::Shape(format!(
                "matrix batch of {batch} x {nrows} x {ncols} needs {} values, got {}",
                batch * nrows * ncols,
                data.len()
            )));
        }
        Ok(MatrixBatch {
            batch,
            nrows,
            ncols,
            data,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn raw(&self) -> &[f64] {
        &self.data
    }

    /// Row-major values of item `i`.
    pub fn item(&self, i: usize) -> &[f64] {
        let len = self.nrows * self.ncols;
        &self.data[i * len..(i + 1) * len]
    }

    /// Item `i` as an owned dense matrix.
    pub fn to_dmatrix(&self, i: usize) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.nrows, self.ncols, self.item(i))
    }

    fn reset(&mut self, batch: usize, nrows: usize, ncols: usize) {
        self.batch = batch;
        self.nrows = nrows;
        self.ncols = ncols;
        self.data.clear();
        self.data.resize(batch * nrows * ncols, 0.0);
    }

    fn set_item<const R: usize, const C: usize>(&mut self, i: usize, m: &SMatrix<f64, R, C>) {
        debug_assert_eq!((R, C), (self.nrows, self.ncols));
        let len = R * C;
        write_mat(m, &mut self.data[i * len..(i + 1) * len]);
    }

    fn check_shape(&self, batch: usize, nrows: usize, ncols: usize) -> OrbitResult<()> {
        if (self.batch, self.nrows, self.ncols) != (batch, nrows, ncols) {
            return Err(OrbitError::Shape(format!(
                "expected matrix batch of {batch} x {nrows} x {ncols}, got {} x {} x {}",
                self.batch, self.nrows, self.ncols
            )));
        }
        Ok(())
    }
}

/// Batched fixed-width vectors: tangent elements (width = group DOF) and
/// Euclidean points (width 3).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBatch {
    batch: usize,
    dim: usize,
    data: Vec<f64>,
}

impl VectorBatch {
    /// Build from a raw buffer, validating its length.
    pub fn from_raw(batch: usize, dim: usize, data: Vec<f64>) -> OrbitResult<Self> {
        if data.len() != batch * dim {
            return Err(OrbitError::Shape(format!(
                "vector batch of {batch} x {dim} needs {} values, got {}",
                batch * dim,
                data.len()
            )));
        }
        Ok(VectorBatch { batch, dim, data })
    }

    pub fn zeros(batch: usize, dim: usize) -> Self {
        VectorBatch {
            batch,
            dim,
            data: vec![0.0; batch * dim],
        }
    }

    /// Uniform random values in `[-scale, scale]`, for tests and demos.
    pub fn random(batch: usize, dim: usize, scale: f64) -> Self {
        let data = (0..batch * dim)
            .map(|_| (rand::random::<f64>() * 2.0 - 1.0) * scale)
            .collect();
        VectorBatch { batch, dim, data }
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn raw(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    fn vector3(&self, i: usize) -> Vector3<f64> {
        Vector3::from_column_slice(self.row(i))
    }

    fn vector6(&self, i: usize) -> Vector6<f64> {
        Vector6::from_column_slice(self.row(i))
    }

    fn set_vector<const D: usize>(&mut self, i: usize, v: &SMatrix<f64, D, 1>) {
        debug_assert_eq!(D, self.dim);
        self.data[i * D..(i + 1) * D].copy_from_slice(v.as_slice());
    }

    fn check_dim(&self, variant: GroupVariant) -> OrbitResult<()> {
        if self.dim != variant.dof() {
            return Err(OrbitError::Shape(format!(
                "{variant} tangent width must be {}, got {}",
                variant.dof(),
                self.dim
            )));
        }
        Ok(())
    }

    fn check_point_dim(&self) -> OrbitResult<()> {
        if self.dim != 3 {
            return Err(OrbitError::Shape(format!(
                "point batch width must be 3, got {}",
                self.dim
            )));
        }
        Ok(())
    }
}

/// A batched group-valued tensor: a validated raw buffer bound to a
/// [`GroupVariant`] tag.
///
/// Immutable value semantics: every operation allocates a new output and
/// never touches its input buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifoldTensor {
    variant: GroupVariant,
    batch: usize,
    data: Vec<f64>,
}

impl ManifoldTensor {
    /// Bind a raw row-major buffer to a variant, validating the trailing
    /// dimensions against the variant's ambient representation.
    pub fn from_raw(variant: GroupVariant, batch: usize, data: Vec<f64>) -> OrbitResult<Self> {
        if data.len() != batch * variant.ambient_len() {
            let (r, c) = variant.ambient_shape();
            return Err(OrbitError::Shape(format!(
                "{variant} batch of {batch} x {r} x {c} needs {} values, got {}",
                batch * variant.ambient_len(),
                data.len()
            )));
        }
        Ok(ManifoldTensor {
            variant,
            batch,
            data,
        })
    }

    fn uninit(variant: GroupVariant, batch: usize) -> Self {
        ManifoldTensor {
            variant,
            batch,
            data: vec![0.0; batch * variant.ambient_len()],
        }
    }

    /// A batch of identity elements.
    pub fn identity(variant: GroupVariant, batch: usize) -> Self {
        let mut out = Self::uninit(variant, batch);
        for i in 0..batch {
            match variant {
                GroupVariant::SO3 => out.set_so3(i, &Matrix3::identity()),
                GroupVariant::SE3 => {
                    out.set_se3(i, &se3::from_parts(&Matrix3::identity(), &Vector3::zeros()))
                }
            }
        }
        out
    }

    /// A batch of random group elements (tangent coordinates drawn uniformly
    /// from `[-1, 1]`), for tests and demos.
    pub fn random(variant: GroupVariant, batch: usize) -> Self {
        let tangent = VectorBatch::random(batch, variant.dof(), 1.0);
        Self::exp(variant, &tangent, None).expect("random tangent has the variant's width")
    }

    pub fn variant(&self) -> GroupVariant {
        self.variant
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn raw(&self) -> &[f64] {
        &self.data
    }

    /// Row-major ambient values of item `i`.
    pub fn item(&self, i: usize) -> &[f64] {
        let len = self.variant.ambient_len();
        &self.data[i * len..(i + 1) * len]
    }

    fn so3_item(&self, i: usize) -> Matrix3<f64> {
        read_mat::<3, 3>(self.item(i))
    }

    fn se3_item(&self, i: usize) -> Matrix3x4<f64> {
        read_mat::<3, 4>(self.item(i))
    }

    fn set_so3(&mut self, i: usize, m: &Matrix3<f64>) {
        write_mat(m, &mut self.data[i * 9..(i + 1) * 9]);
    }

    fn set_se3(&mut self, i: usize, m: &Matrix3x4<f64>) {
        write_mat(m, &mut self.data[i * 12..(i + 1) * 12]);
    }

    /// Check that every rotation block is orthonormal with unit determinant.
    pub fn is_valid(&self, tolerance: f64) -> bool {
        (0..self.batch).all(|i| {
            let r = match self.variant {
                GroupVariant::SO3 => self.so3_item(i),
                GroupVariant::SE3 => se3::rotation(&self.se3_item(i)),
            };
            (r.transpose() * r - Matrix3::identity()).norm() < tolerance
                && (r.determinant() - 1.0).abs() < tolerance
        })
    }

    fn check_same_variant(&self, other: &ManifoldTensor) -> OrbitResult<()> {
        if self.variant != other.variant {
            return Err(OrbitError::VariantMismatch {
                expected: self.variant,
                actual: other.variant,
            });
        }
        Ok(())
    }

    fn check_batch(&self, batch: usize) -> OrbitResult<()> {
        if self.batch != batch {
            return Err(OrbitError::Shape(format!(
                "batch size mismatch: {} vs {batch}",
                self.batch
            )));
        }
        Ok(())
    }

    /// Exponential map. Static operation: the variant is an explicit first
    /// argument since no group instance exists yet.
    ///
    /// The optional Jacobian out-parameter receives the per-item right
    /// Jacobian of exp, shaped `(batch, dof, dof)`.
    pub fn exp(
        variant: GroupVariant,
        tangent: &VectorBatch,
        jacobian: Option<&mut JacobianBatch>,
    ) -> OrbitResult<ManifoldTensor> {
        tangent.check_dim(variant)?;
        let batch = tangent.batch;
        let mut out = Self::uninit(variant, batch);
        let want_jacobian = jacobian.is_some();

        match variant {
            GroupVariant::SO3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let theta = tangent.vector3(i);
                        (
                            so3::exp(&theta),
                            want_jacobian.then(|| so3::exp_jacobian(&theta)),
                        )
                    })
                    .collect();
                let mut jac = init_jacobian(jacobian, batch, 3, 3);
                for (i, (value, j)) in items.into_iter().enumerate() {
                    out.set_so3(i, &value);
                    fill_jacobian(jac.as_deref_mut(), i, j);
                }
            }
            GroupVariant::SE3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let xi = tangent.vector6(i);
                        (se3::exp(&xi), want_jacobian.then(|| se3::exp_jacobian(&xi)))
                    })
                    .collect();
                let mut jac = init_jacobian(jacobian, batch, 6, 6);
                for (i, (value, j)) in items.into_iter().enumerate() {
                    out.set_se3(i, &value);
                    fill_jacobian(jac.as_deref_mut(), i, j);
                }
            }
        }
        Ok(out)
    }

    /// Logarithmic map, the inverse of [`ManifoldTensor::exp`].
    ///
    /// The optional Jacobian receives `Jr⁻¹` at the recovered tangent,
    /// shaped `(batch, dof, dof)`.
    pub fn log(&self, jacobian: Option<&mut JacobianBatch>) -> VectorBatch {
        let batch = self.batch;
        let mut out = VectorBatch::zeros(batch, self.variant.dof());
        let want_jacobian = jacobian.is_some();

        match self.variant {
            GroupVariant::SO3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let theta = so3::log(&self.so3_item(i));
                        let j = want_jacobian.then(|| so3::log_jacobian(&theta));
                        (theta, j)
                    })
                    .collect();
                let mut jac = init_jacobian(jacobian, batch, 3, 3);
                for (i, (value, j)) in items.into_iter().enumerate() {
                    out.set_vector(i, &value);
                    fill_jacobian(jac.as_deref_mut(), i, j);
                }
            }
            GroupVariant::SE3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let xi = se3::log(&self.se3_item(i));
                        let j = want_jacobian.then(|| se3::log_jacobian(&xi));
                        (xi, j)
                    })
                    .collect();
                let mut jac = init_jacobian(jacobian, batch, 6, 6);
                for (i, (value, j)) in items.into_iter().enumerate() {
                    out.set_vector(i, &value);
                    fill_jacobian(jac.as_deref_mut(), i, j);
                }
            }
        }
        out
    }

    /// Hat map: tangent coordinates to Lie-algebra matrices.
    pub fn hat(variant: GroupVariant, tangent: &VectorBatch) -> OrbitResult<MatrixBatch> {
        tangent.check_dim(variant)?;
        let batch = tangent.batch;
        let (rows, cols) = variant.algebra_shape();
        let mut out = MatrixBatch::zeros(batch, rows, cols);
        for i in 0..batch {
            match variant {
                GroupVariant::SO3 => out.set_item(i, &so3::hat(&tangent.vector3(i))),
                GroupVariant::SE3 => out.set_item(i, &se3::hat(&tangent.vector6(i))),
            }
        }
        Ok(out)
    }

    /// Vee map: Lie-algebra matrices back to tangent coordinates. Exact
    /// inverse of [`ManifoldTensor::hat`].
    pub fn vee(variant: GroupVariant, algebra: &MatrixBatch) -> OrbitResult<VectorBatch> {
        let (rows, cols) = variant.algebra_shape();
        algebra.check_shape(algebra.batch, rows, cols)?;
        let batch = algebra.batch;
        let mut out = VectorBatch::zeros(batch, variant.dof());
        for i in 0..batch {
            match variant {
                GroupVariant::SO3 => {
                    out.set_vector(i, &so3::vee(&read_mat::<3, 3>(algebra.item(i))))
                }
                GroupVariant::SE3 => {
                    out.set_vector(i, &se3::vee(&read_mat::<4, 4>(algebra.item(i))))
                }
            }
        }
        Ok(out)
    }

    /// Lift tangent coordinates to the ambient representation shape.
    pub fn lift(variant: GroupVariant, tangent: &VectorBatch) -> OrbitResult<MatrixBatch> {
        tangent.check_dim(variant)?;
        let batch = tangent.batch;
        let (rows, cols) = variant.ambient_shape();
        let mut out = MatrixBatch::zeros(batch, rows, cols);
        for i in 0..batch {
            match variant {
                GroupVariant::SO3 => out.set_item(i, &so3::lift(&tangent.vector3(i))),
                GroupVariant::SE3 => out.set_item(i, &se3::lift(&tangent.vector6(i))),
            }
        }
        Ok(out)
    }

    /// Project ambient-shaped matrices back to tangent coordinates. Exact
    /// inverse of [`ManifoldTensor::lift`] on lifted inputs.
    pub fn project(variant: GroupVariant, ambient: &MatrixBatch) -> OrbitResult<VectorBatch> {
        let (rows, cols) = variant.ambient_shape();
        ambient.check_shape(ambient.batch, rows, cols)?;
        let batch = ambient.batch;
        let mut out = VectorBatch::zeros(batch, variant.dof());
        for i in 0..batch {
            match variant {
                GroupVariant::SO3 => {
                    out.set_vector(i, &so3::project(&read_mat::<3, 3>(ambient.item(i))))
                }
                GroupVariant::SE3 => {
                    out.set_vector(i, &se3::project(&read_mat::<3, 4>(ambient.item(i))))
                }
            }
        }
        Ok(out)
    }

    /// Group composition `self · other` (right-multiplication convention).
    ///
    /// Jacobian out-parameters follow the input order: wrt `self` then wrt
    /// `other`, both `(batch, dof, dof)`.
    pub fn compose(
        &self,
        other: &ManifoldTensor,
        jacobian_self: Option<&mut JacobianBatch>,
        jacobian_other: Option<&mut JacobianBatch>,
    ) -> OrbitResult<ManifoldTensor> {
        self.check_same_variant(other)?;
        other.check_batch(self.batch)?;
        let batch = self.batch;
        let mut out = Self::uninit(self.variant, batch);
        let want_jacobian = jacobian_self.is_some() || jacobian_other.is_some();

        match self.variant {
            GroupVariant::SO3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let a = self.so3_item(i);
                        let b = other.so3_item(i);
                        (
                            so3::compose(&a, &b),
                            want_jacobian.then(|| so3::compose_jacobians(&a, &b)),
                        )
                    })
                    .collect();
                let mut jac_a = init_jacobian(jacobian_self, batch, 3, 3);
                let mut jac_b = init_jacobian(jacobian_other, batch, 3, 3);
                for (i, (value, jacobians)) in items.into_iter().enumerate() {
                    out.set_so3(i, &value);
                    if let Some((ja, jb)) = jacobians {
                        fill_jacobian(jac_a.as_deref_mut(), i, Some(ja));
                        fill_jacobian(jac_b.as_deref_mut(), i, Some(jb));
                    }
                }
            }
            GroupVariant::SE3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let a = self.se3_item(i);
                        let b = other.se3_item(i);
                        (
                            se3::compose(&a, &b),
                            want_jacobian.then(|| se3::compose_jacobians(&a, &b)),
                        )
                    })
                    .collect();
                let mut jac_a = init_jacobian(jacobian_self, batch, 6, 6);
                let mut jac_b = init_jacobian(jacobian_other, batch, 6, 6);
                for (i, (value, jacobians)) in items.into_iter().enumerate() {
                    out.set_se3(i, &value);
                    if let Some((ja, jb)) = jacobians {
                        fill_jacobian(jac_a.as_deref_mut(), i, Some(ja));
                        fill_jacobian(jac_b.as_deref_mut(), i, Some(jb));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Group inverse. Jacobian: `-Adj(g)`, shaped `(batch, dof, dof)`.
    pub fn inverse(&self, jacobian: Option<&mut JacobianBatch>) -> ManifoldTensor {
        let batch = self.batch;
        let mut out = Self::uninit(self.variant, batch);
        let want_jacobian = jacobian.is_some();

        match self.variant {
            GroupVariant::SO3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let g = self.so3_item(i);
                        (
                            so3::inverse(&g),
                            want_jacobian.then(|| so3::inverse_jacobian(&g)),
                        )
                    })
                    .collect();
                let mut jac = init_jacobian(jacobian, batch, 3, 3);
                for (i, (value, j)) in items.into_iter().enumerate() {
                    out.set_so3(i, &value);
                    fill_jacobian(jac.as_deref_mut(), i, j);
                }
            }
            GroupVariant::SE3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let g = self.se3_item(i);
                        (
                            se3::inverse(&g),
                            want_jacobian.then(|| se3::inverse_jacobian(&g)),
                        )
                    })
                    .collect();
                let mut jac = init_jacobian(jacobian, batch, 6, 6);
                for (i, (value, j)) in items.into_iter().enumerate() {
                    out.set_se3(i, &value);
                    fill_jacobian(jac.as_deref_mut(), i, j);
                }
            }
        }
        out
    }

    /// Adjoint representation of every item, shaped `(batch, dof, dof)`.
    pub fn adjoint(&self) -> MatrixBatch {
        let batch = self.batch;
        let dof = self.variant.dof();
        let mut out = MatrixBatch::zeros(batch, dof, dof);
        for i in 0..batch {
            match self.variant {
                GroupVariant::SO3 => out.set_item(i, &so3::adjoint(&self.so3_item(i))),
                GroupVariant::SE3 => out.set_item(i, &se3::adjoint(&self.se3_item(i))),
            }
        }
        out
    }

    /// Group action on a batch of 3D points.
    ///
    /// Jacobians: wrt the group element `(batch, 3, dof)`, wrt the points
    /// `(batch, 3, 3)`.
    pub fn left_act(
        &self,
        points: &VectorBatch,
        jacobian_self: Option<&mut JacobianBatch>,
        jacobian_points: Option<&mut JacobianBatch>,
    ) -> OrbitResult<VectorBatch> {
        points.check_point_dim()?;
        self.check_batch(points.batch)?;
        let batch = self.batch;
        let mut out = VectorBatch::zeros(batch, 3);
        let want_jacobian = jacobian_self.is_some() || jacobian_points.is_some();

        match self.variant {
            GroupVariant::SO3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let g = self.so3_item(i);
                        let p = points.vector3(i);
                        (
                            so3::left_act(&g, &p),
                            want_jacobian.then(|| so3::left_act_jacobians(&g, &p)),
                        )
                    })
                    .collect();
                let mut jac_g = init_jacobian(jacobian_self, batch, 3, 3);
                let mut jac_p = init_jacobian(jacobian_points, batch, 3, 3);
                for (i, (value, jacobians)) in items.into_iter().enumerate() {
                    out.set_vector(i, &value);
                    if let Some((jg, jp)) = jacobians {
                        fill_jacobian(jac_g.as_deref_mut(), i, Some(jg));
                        fill_jacobian(jac_p.as_deref_mut(), i, Some(jp));
                    }
                }
            }
            GroupVariant::SE3 => {
                let items: Vec<_> = (0..batch)
                    .into_par_iter()
                    .map(|i| {
                        let g = self.se3_item(i);
                        let p = points.vector3(i);
                        (
                            se3::left_act(&g, &p),
                            want_jacobian.then(|| se3::left_act_jacobians(&g, &p)),
                        )
                    })
                    .collect();
                let mut jac_g = init_jacobian(jacobian_self, batch, 3, 6);
                let mut jac_p = init_jacobian(jacobian_points, batch, 3, 3);
                for (i, (value, jacobians)) in items.into_iter().enumerate() {
                    out.set_vector(i, &value);
                    if let Some((jg, jp)) = jacobians {
                        fill_jacobian(jac_g.as_deref_mut(), i, Some(jg));
                        fill_jacobian(jac_p.as_deref_mut(), i, Some(jp));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Project a batch of ambient perturbations at `self` back to tangent
    /// coordinates (used for retraction-based Jacobians of arbitrary
    /// functions of the ambient representation).
    pub fn left_project(&self, ambient: &MatrixBatch) -> OrbitResult<VectorBatch> {
        let (rows, cols) = self.variant.ambient_shape();
        ambient.check_shape(self.batch, rows, cols)?;
        let batch = self.batch;
        let mut out = VectorBatch::zeros(batch, self.variant.dof());
        for i in 0..batch {
            match self.variant {
                GroupVariant::SO3 => out.set_vector(
                    i,
                    &so3::left_project(&self.so3_item(i), &read_mat::<3, 3>(ambient.item(i))),
                ),
                GroupVariant::SE3 => out.set_vector(
                    i,
                    &se3::left_project(&self.se3_item(i), &read_mat::<3, 4>(ambient.item(i))),
                ),
            }
        }
        Ok(out)
    }
}

/// Resize a Jacobian out-parameter for filling, if requested.
fn init_jacobian(
    jacobian: Option<&mut JacobianBatch>,
    batch: usize,
    nrows: usize,
    ncols: usize,
) -> Option<&mut JacobianBatch> {
    jacobian.map(|jac| {
        jac.reset(batch, nrows, ncols);
        jac
    })
}

fn fill_jacobian<const R: usize, const C: usize>(
    jacobian: Option<&mut JacobianBatch>,
    i: usize,
    value: Option<SMatrix<f64, R, C>>,
) {
    if let (Some(jac), Some(value)) = (jacobian, value) {
        jac.set_item(i, &value);
    }
}
