//! Pose-graph example: a Gauss-Newton loop over three SE3 poses built
//! entirely from the crate's pieces. A prior anchors the first pose and two
//! relative-motion residuals chain the rest; each iteration gathers the
//! analytic Jacobians into the sparse structure and solves the damped
//! normal equations for the update step.
//!
//! Run with `cargo run --example pose_graph` (set RUST_LOG=debug for the
//! solver internals).

use nalgebra::{DMatrix, DVector};
use orbit_solver::{
    init_logger, Damping, GroupVariant, JacobianBatch, ManifoldTensor, OrbitResult, ResidualBlock,
    ResidualLayout, SolverConfig, SparseCholeskySolver, SparseStructure, VectorBatch,
};
use tracing::info;

/// r = log(measurement⁻¹ ∘ g); anchors one pose.
struct PriorResidual {
    vars: Vec<usize>,
    state: ManifoldTensor,
    measurement: ManifoldTensor,
}

impl ResidualBlock for PriorResidual {
    fn dim(&self) -> usize {
        6
    }

    fn variables(&self) -> &[usize] {
        &self.vars
    }

    fn evaluate(&self) -> OrbitResult<(DVector<f64>, Vec<DMatrix<f64>>)> {
        let mut j_log = JacobianBatch::empty();
        let error = self
            .measurement
            .inverse(None)
            .compose(&self.state, None, None)?
            .log(Some(&mut j_log));
        Ok((
            DVector::from_column_slice(error.row(0)),
            vec![j_log.to_dmatrix(0)],
        ))
    }
}

/// r = log(measurement⁻¹ ∘ gᵢ⁻¹ ∘ gⱼ); relative motion between two poses.
///
/// The Jacobians chain the operator Jacobians: inverse, then compose, then
/// log, each in the right-perturbation convention.
struct BetweenResidual {
    vars: Vec<usize>,
    state_i: ManifoldTensor,
    state_j: ManifoldTensor,
    measurement: ManifoldTensor,
}

impl ResidualBlock for BetweenResidual {
    fn dim(&self) -> usize {
        6
    }

    fn variables(&self) -> &[usize] {
        &self.vars
    }

    fn evaluate(&self) -> OrbitResult<(DVector<f64>, Vec<DMatrix<f64>>)> {
        let mut j_inverse = JacobianBatch::empty();
        let inverse_i = self.state_i.inverse(Some(&mut j_inverse));

        let mut j_rel_i = JacobianBatch::empty();
        let mut j_rel_j = JacobianBatch::empty();
        let relative = inverse_i.compose(&self.state_j, Some(&mut j_rel_i), Some(&mut j_rel_j))?;

        let mut j_log = JacobianBatch::empty();
        let error = self
            .measurement
            .inverse(None)
            .compose(&relative, None, None)?
            .log(Some(&mut j_log));

        let j_log = j_log.to_dmatrix(0);
        let jac_i = &j_log * j_rel_i.to_dmatrix(0) * j_inverse.to_dmatrix(0);
        let jac_j = &j_log * j_rel_j.to_dmatrix(0);
        Ok((DVector::from_column_slice(error.row(0)), vec![jac_i, jac_j]))
    }
}

fn relative(a: &ManifoldTensor, b: &ManifoldTensor) -> OrbitResult<ManifoldTensor> {
    a.inverse(None).compose(b, None, None)
}

fn build_blocks(
    states: &[ManifoldTensor],
    prior: &ManifoldTensor,
    odometry: &[ManifoldTensor],
) -> Vec<Box<dyn ResidualBlock>> {
    let mut blocks: Vec<Box<dyn ResidualBlock>> = vec![Box::new(PriorResidual {
        vars: vec![0],
        state: states[0].clone(),
        measurement: prior.clone(),
    })];
    for (i, measurement) in odometry.iter().enumerate() {
        blocks.push(Box::new(BetweenResidual {
            vars: vec![i, i + 1],
            state_i: states[i].clone(),
            state_j: states[i + 1].clone(),
            measurement: measurement.clone(),
        }));
    }
    blocks
}

fn main() -> OrbitResult<()> {
    init_logger();

    // Ground truth: a short random walk of three poses.
    let motions = VectorBatch::random(2, 6, 0.5);
    let steps = ManifoldTensor::exp(GroupVariant::SE3, &motions, None)?;
    let mut truth = vec![ManifoldTensor::identity(GroupVariant::SE3, 1)];
    for i in 0..2 {
        let step = ManifoldTensor::from_raw(GroupVariant::SE3, 1, steps.item(i).to_vec())?;
        let next = truth[i].compose(&step, None, None)?;
        truth.push(next);
    }

    // Exact measurements; noisy initial estimates.
    let prior = truth[0].clone();
    let odometry = vec![
        relative(&truth[0], &truth[1])?,
        relative(&truth[1], &truth[2])?,
    ];
    let mut states: Vec<ManifoldTensor> = truth
        .iter()
        .map(|pose| {
            let noise = VectorBatch::random(1, 6, 0.2);
            let offset = ManifoldTensor::exp(GroupVariant::SE3, &noise, None)?;
            pose.compose(&offset, None, None)
        })
        .collect::<OrbitResult<_>>()?;

    let var_dims = vec![6, 6, 6];
    let layouts: Vec<ResidualLayout> = build_blocks(&states, &prior, &odometry)
        .iter()
        .map(|b| ResidualLayout {
            num_rows: b.dim(),
            variables: b.variables().to_vec(),
        })
        .collect();
    let structure = SparseStructure::build(&var_dims, &layouts)?;
    let mut solver = SparseCholeskySolver::new(SolverConfig::default())?;
    solver.analyze(&structure)?;

    for iteration in 0..8 {
        let blocks = build_blocks(&states, &prior, &odometry);
        let refs: Vec<&dyn ResidualBlock> = blocks.iter().map(|b| b.as_ref()).collect();
        let (a_values, residual) = structure.gather(&refs)?;
        let cost = 0.5 * residual.norm_squared();

        let step = solver.solve(
            &structure,
            &a_values,
            &residual,
            Damping::Constant { beta: 1e-8 },
        )?;
        info!(iteration, cost, step_norm = step.norm(), "iteration");

        for (i, state) in states.iter_mut().enumerate() {
            let local = VectorBatch::from_raw(1, 6, step.as_slice()[6 * i..6 * (i + 1)].to_vec())?;
            let motion = ManifoldTensor::exp(GroupVariant::SE3, &local, None)?;
            *state = state.compose(&motion, None, None)?;
        }

        if step.norm() < 1e-10 {
            break;
        }
    }

    for (i, (state, pose)) in states.iter().zip(&truth).enumerate() {
        let error = relative(pose, state)?.log(None);
        let norm = error.row(0).iter().map(|v| v * v).sum::<f64>().sqrt();
        info!(pose = i, error = norm, "final pose error");
    }
    Ok(())
}
