//! Solver configuration: compute device, backing factorization backend and
//! Levenberg-Marquardt damping policy.
//!
//! Device and backend are validated up front so that a misconfigured solver
//! fails at construction, before any symbolic or numeric work runs.

use crate::core::{OrbitError, OrbitResult};
use std::fmt;

mod cholesky;

pub use cholesky::{SparseCholeskySolver, SymbolicDecomposition};

/// Compute device for the linear solve.
///
/// Only the CPU path is compiled in; `accelerated` names the GPU path of
/// deployments built with vendor kernels and is rejected here at solver
/// construction rather than mid-iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerated,
}

impl Device {
    pub fn parse(name: &str) -> OrbitResult<Device> {
        match name {
            "cpu" => Ok(Device::Cpu),
            "accelerated" => Ok(Device::Accelerated),
            other => Err(OrbitError::DeviceUnavailable(format!(
                "unknown device '{other}', expected 'cpu' or 'accelerated'"
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// Backing sparse factorization routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cholesky,
}

impl Backend {
    pub fn parse(name: &str) -> OrbitResult<Backend> {
        match name {
            "cholesky" => Ok(Backend::Cholesky),
            other => Err(OrbitError::BackendUnavailable(format!(
                "unknown backend '{other}', expected 'cholesky'"
            ))),
        }
    }
}

/// Diagonal damping applied to the normal equations each iteration.
///
/// The damped diagonal is `d <- d * (1 + alpha) + beta`:
/// - `Off`: plain Gauss-Newton, `(alpha, beta) = (0, 0)`.
/// - `Constant`: classic additive damping, `(0, beta)`.
/// - `Ellipsoidal`: scale-invariant damping proportional to the existing
///   diagonal, with a floor `eps` for near-zero entries: `(alpha, eps)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Damping {
    Off,
    Constant { beta: f64 },
    Ellipsoidal { alpha: f64, eps: f64 },
}

impl Damping {
    pub fn alpha_beta(&self) -> (f64, f64) {
        match *self {
            Damping::Off => (0.0, 0.0),
            Damping::Constant { beta } => (0.0, beta),
            Damping::Ellipsoidal { alpha, eps } => (alpha, eps),
        }
    }
}

/// Configuration for [`SparseCholeskySolver`].
///
/// `num_contexts` is the number of independent solve contexts used by
/// batched solves; each context runs a numeric factorization against the
/// shared symbolic decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverConfig {
    pub device: Device,
    pub backend: Backend,
    pub num_contexts: usize,
}

impl SolverConfig {
    /// Parse a configuration from the names used by deployment configs.
    pub fn from_names(device: &str, backend: &str, num_contexts: usize) -> OrbitResult<SolverConfig> {
        Ok(SolverConfig {
            device: Device::parse(device)?,
            backend: Backend::parse(backend)?,
            num_contexts,
        })
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            device: Device::Cpu,
            backend: Backend::Cholesky,
            num_contexts: 1,
        }
    }
}
