//! Differentiable nonlinear least-squares core over Lie-group variables.
//!
//! Two pieces make up the crate:
//! - [`lie`]: batched SO(3)/SE(3) operators (exp/log, compose, inverse,
//!   adjoint, hat/vee, group action) with analytic Jacobians in the
//!   right-perturbation convention.
//! - [`sparse`] + [`solver`]: CSR assembly of the stacked residual Jacobian
//!   and the damped normal-equations solve, with the symbolic Cholesky
//!   analysis cached across iterations.
//!
//! The outer optimization loop lives with the caller; `demos/pose_graph.rs`
//! shows a complete Gauss-Newton iteration built on these pieces.

pub mod core;
pub mod kinematics;
pub mod lie;
pub mod logger;
pub mod solver;
pub mod sparse;

pub use crate::core::{OrbitError, OrbitResult};
pub use crate::lie::{GroupVariant, JacobianBatch, ManifoldTensor, MatrixBatch, VectorBatch};
pub use crate::logger::{init_logger, init_logger_with_level};
pub use crate::solver::{Backend, Damping, Device, SolverConfig, SparseCholeskySolver};
pub use crate::sparse::{BlockPattern, ResidualBlock, ResidualLayout, SparseStructure};
