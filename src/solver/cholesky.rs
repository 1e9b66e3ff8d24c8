//! Sparse Cholesky solve of the damped normal equations.
//!
//! The solve is split into the two phases the iteration loop needs:
//! an expensive one-time symbolic analysis of the AᵗA sparsity pattern
//! (fill-reducing ordering and elimination tree, cached per pattern) and a
//! cheap per-iteration numeric factorization against the cached symbolic
//! state. The cache carries the structure's fingerprint so that a numeric
//! solve against a changed structure is rejected instead of silently
//! producing a step for the wrong pattern.

use crate::core::{OrbitError, OrbitResult};
use crate::solver::{Damping, Device, SolverConfig};
use crate::sparse::SparseStructure;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DVector;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, trace};

/// Cached symbolic analysis of one AᵗA sparsity pattern.
#[derive(Debug, Clone)]
pub struct SymbolicDecomposition {
    llt: SymbolicLlt<usize>,
    fingerprint: u64,
}

impl SymbolicDecomposition {
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Two-phase sparse normal-equations solver.
///
/// Construction validates device and backend; [`analyze`] runs the symbolic
/// phase; [`solve`] and [`solve_batch`] run numeric factorizations against
/// the cached analysis.
///
/// [`analyze`]: SparseCholeskySolver::analyze
/// [`solve`]: SparseCholeskySolver::solve
/// [`solve_batch`]: SparseCholeskySolver::solve_batch
#[derive(Debug)]
pub struct SparseCholeskySolver {
    config: SolverConfig,
    symbolic: Option<SymbolicDecomposition>,
    pool: rayon::ThreadPool,
}

impl SparseCholeskySolver {
    /// Create a solver, failing fast on an unusable configuration.
    pub fn new(config: SolverConfig) -> OrbitResult<SparseCholeskySolver> {
        if config.device == Device::Accelerated {
            return Err(OrbitError::DeviceUnavailable(
                "this build has no accelerated kernels, use device 'cpu'".to_string(),
            ));
        }
        if config.num_contexts == 0 {
            return Err(OrbitError::InvalidInput(
                "num_contexts must be positive".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_contexts)
            .build()
            .map_err(|e| OrbitError::InvalidInput(format!("solve pool: {e}")))?;
        Ok(SparseCholeskySolver {
            config,
            symbolic: None,
            pool,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn is_analyzed(&self) -> bool {
        self.symbolic.is_some()
    }

    /// Drop the cached symbolic decomposition.
    pub fn invalidate(&mut self) {
        self.symbolic = None;
    }

    /// Symbolic phase: derive the scalar AᵗA pattern from the structure's
    /// block pattern, choose the elimination ordering and cache the result
    /// keyed by the structure's fingerprint.
    pub fn analyze(&mut self, structure: &SparseStructure) -> OrbitResult<()> {
        let started = Instant::now();
        let n = structure.num_cols();
        let pattern = structure.block_ata_pattern();

        // Expand variable-block adjacency to scalar entries. The diagonal
        // is always structural so that damping never perturbs the pattern.
        let starts = structure.var_start_cols();
        let dims = structure.var_dims();
        let mut triplets = Vec::new();
        for i in 0..structure.num_variables() {
            for &j in &pattern.block_ind[pattern.block_ptr[i]..pattern.block_ptr[i + 1]] {
                for r in starts[i]..starts[i] + dims[i] {
                    for c in starts[j]..starts[j] + dims[j] {
                        triplets.push(Triplet::new(r, c, 1.0));
                    }
                }
            }
        }
        for d in 0..n {
            triplets.push(Triplet::new(d, d, 1.0));
        }

        let mock = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| OrbitError::SolveFailure(format!("mock pattern assembly: {e:?}")))?;
        let llt = SymbolicLlt::try_new(mock.symbolic(), faer::Side::Lower)
            .map_err(|e| OrbitError::SolveFailure(format!("symbolic analysis: {e:?}")))?;

        self.symbolic = Some(SymbolicDecomposition {
            llt,
            fingerprint: structure.fingerprint(),
        });
        debug!(
            num_cols = n,
            num_blocks = pattern.block_ind.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "symbolic analysis complete"
        );
        Ok(())
    }

    /// Numeric phase: assemble the damped normal equations from the CSR
    /// Jacobian values and solve for the step.
    ///
    /// Fails with [`OrbitError::StaleStructure`] when no analysis exists or
    /// the structure changed since [`SparseCholeskySolver::analyze`], and
    /// with [`OrbitError::SolveFailure`] when the damped AᵗA is not
    /// positive definite; no garbage step is ever returned.
    pub fn solve(
        &self,
        structure: &SparseStructure,
        a_values: &[f64],
        residual: &DVector<f64>,
        damping: Damping,
    ) -> OrbitResult<DVector<f64>> {
        let symbolic = self.symbolic.as_ref().ok_or_else(|| {
            OrbitError::StaleStructure("analyze must run before solve".to_string())
        })?;
        if symbolic.fingerprint != structure.fingerprint() {
            return Err(OrbitError::StaleStructure(
                "sparse structure changed since the last analysis".to_string(),
            ));
        }
        if a_values.len() != structure.nnz() {
            return Err(OrbitError::Shape(format!(
                "expected {} jacobian values, got {}",
                structure.nnz(),
                a_values.len()
            )));
        }
        if residual.len() != structure.num_rows() {
            return Err(OrbitError::Shape(format!(
                "expected residual of length {}, got {}",
                structure.num_rows(),
                residual.len()
            )));
        }

        let started = Instant::now();
        let n = structure.num_cols();
        let row_ptr = structure.row_ptr();
        let col_ind = structure.col_ind();

        // AᵗA and Aᵗ(-r) accumulate row by row: each CSR row contributes
        // the outer product of its entries. Duplicate triplets are summed
        // by the assembly.
        let mut triplets = Vec::new();
        let mut atb = vec![0.0; n];
        let mut diag = vec![0.0; n];
        for r in 0..structure.num_rows() {
            let range = row_ptr[r]..row_ptr[r + 1];
            for p in range.clone() {
                let (cp, vp) = (col_ind[p], a_values[p]);
                atb[cp] -= vp * residual[r];
                diag[cp] += vp * vp;
                for q in range.clone() {
                    triplets.push(Triplet::new(cp, col_ind[q], vp * a_values[q]));
                }
            }
        }

        // Damped diagonal d <- d * (1 + alpha) + beta, emitted for every
        // column so the pattern always matches the analysis.
        let (alpha, beta) = damping.alpha_beta();
        for c in 0..n {
            triplets.push(Triplet::new(c, c, alpha * diag[c] + beta));
        }

        let ata = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| OrbitError::SolveFailure(format!("normal equations assembly: {e:?}")))?;
        let cholesky = Llt::try_new_with_symbolic(
            symbolic.llt.clone(),
            ata.as_ref(),
            faer::Side::Lower,
        )
        .map_err(|_| {
            OrbitError::SolveFailure("damped normal equations are not positive definite".to_string())
        })?;

        let rhs = faer::Mat::from_fn(n, 1, |i, _| atb[i]);
        let step = cholesky.solve(&rhs);
        trace!(
            num_cols = n,
            elapsed_us = started.elapsed().as_micros() as u64,
            "numeric solve complete"
        );
        Ok(DVector::from_fn(n, |i, _| step[(i, 0)]))
    }

    /// Solve a batch of numeric systems sharing one structure against the
    /// cached symbolic decomposition, across `num_contexts` threads.
    pub fn solve_batch(
        &self,
        structure: &SparseStructure,
        systems: &[(Vec<f64>, DVector<f64>)],
        damping: Damping,
    ) -> OrbitResult<Vec<DVector<f64>>> {
        self.pool.install(|| {
            systems
                .par_iter()
                .map(|(a_values, residual)| self.solve(structure, a_values, residual, damping))
                .collect()
        })
    }
}
