//! Finite-difference cross-checks of every analytic Jacobian.
//!
//! All Jacobians follow the right-perturbation convention: for a function
//! `f` of a group element `g`, the analytic Jacobian `J` satisfies
//! `f(g * exp(h e_j)) ≈ f(g) ⊕ h J e_j`, where `⊕` is vector addition for
//! Euclidean outputs and right retraction for group outputs. Each check
//! compares `J` column by column against a central difference.

use nalgebra::DMatrix;
use orbit_solver::{GroupVariant, JacobianBatch, ManifoldTensor, MatrixBatch, VectorBatch};

const BATCH: usize = 5;
const STEP: f64 = 1e-5;
const TOLERANCE: f64 = 1e-6;

fn perturbed(t: &VectorBatch, item: usize, coord: usize, h: f64) -> VectorBatch {
    let mut data = t.raw().to_vec();
    data[item * t.dim() + coord] += h;
    VectorBatch::from_raw(t.batch_size(), t.dim(), data).unwrap()
}

/// Tangent-space basis perturbation batch: zero except `h` at (item, coord).
fn delta(batch: usize, dim: usize, item: usize, coord: usize, h: f64) -> VectorBatch {
    let mut data = vec![0.0; batch * dim];
    data[item * dim + coord] = h;
    VectorBatch::from_raw(batch, dim, data).unwrap()
}

fn retract(g: &ManifoldTensor, delta: &VectorBatch) -> ManifoldTensor {
    let motion = ManifoldTensor::exp(g.variant(), delta, None).unwrap();
    g.compose(&motion, None, None).unwrap()
}

/// Right tangent difference `log(a⁻¹ b)` per item.
fn group_delta(a: &ManifoldTensor, b: &ManifoldTensor) -> VectorBatch {
    a.inverse(None).compose(b, None, None).unwrap().log(None)
}

fn fd_column(plus: &VectorBatch, minus: &VectorBatch, item: usize, h: f64) -> Vec<f64> {
    plus.row(item)
        .iter()
        .zip(minus.row(item))
        .map(|(p, m)| (p - m) / (2.0 * h))
        .collect()
}

fn assert_column_close(jac: &DMatrix<f64>, col: usize, fd: &[f64]) {
    for (r, &fd_val) in fd.iter().enumerate() {
        let analytic = jac[(r, col)];
        assert!(
            (analytic - fd_val).abs() < TOLERANCE,
            "column {col} row {r}: analytic {analytic} vs finite difference {fd_val}"
        );
    }
}

#[test]
fn exp_jacobian_matches_finite_difference() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let tangent = VectorBatch::random(BATCH, dof, 1.0);
        let mut jac = JacobianBatch::empty();
        let g = ManifoldTensor::exp(variant, &tangent, Some(&mut jac)).unwrap();

        for item in 0..BATCH {
            let analytic = jac.to_dmatrix(item);
            for coord in 0..dof {
                let plus =
                    ManifoldTensor::exp(variant, &perturbed(&tangent, item, coord, STEP), None)
                        .unwrap();
                let minus =
                    ManifoldTensor::exp(variant, &perturbed(&tangent, item, coord, -STEP), None)
                        .unwrap();
                let fd = fd_column(&group_delta(&g, &plus), &group_delta(&g, &minus), item, STEP);
                assert_column_close(&analytic, coord, &fd);
            }
        }
    }
}

#[test]
fn log_jacobian_matches_finite_difference() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let g = ManifoldTensor::random(variant, BATCH);
        let mut jac = JacobianBatch::empty();
        let value = g.log(Some(&mut jac));
        assert_eq!(value.dim(), dof);

        for item in 0..BATCH {
            let analytic = jac.to_dmatrix(item);
            for coord in 0..dof {
                let plus = retract(&g, &delta(BATCH, dof, item, coord, STEP)).log(None);
                let minus = retract(&g, &delta(BATCH, dof, item, coord, -STEP)).log(None);
                let fd = fd_column(&plus, &minus, item, STEP);
                assert_column_close(&analytic, coord, &fd);
            }
        }
    }
}

#[test]
fn compose_jacobians_match_finite_difference() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let a = ManifoldTensor::random(variant, BATCH);
        let b = ManifoldTensor::random(variant, BATCH);
        let mut jac_a = JacobianBatch::empty();
        let mut jac_b = JacobianBatch::empty();
        let value = a.compose(&b, Some(&mut jac_a), Some(&mut jac_b)).unwrap();

        for item in 0..BATCH {
            let analytic_a = jac_a.to_dmatrix(item);
            let analytic_b = jac_b.to_dmatrix(item);
            for coord in 0..dof {
                let step_plus = delta(BATCH, dof, item, coord, STEP);
                let step_minus = delta(BATCH, dof, item, coord, -STEP);

                let plus = retract(&a, &step_plus).compose(&b, None, None).unwrap();
                let minus = retract(&a, &step_minus).compose(&b, None, None).unwrap();
                let fd = fd_column(
                    &group_delta(&value, &plus),
                    &group_delta(&value, &minus),
                    item,
                    STEP,
                );
                assert_column_close(&analytic_a, coord, &fd);

                let plus = a.compose(&retract(&b, &step_plus), None, None).unwrap();
                let minus = a.compose(&retract(&b, &step_minus), None, None).unwrap();
                let fd = fd_column(
                    &group_delta(&value, &plus),
                    &group_delta(&value, &minus),
                    item,
                    STEP,
                );
                assert_column_close(&analytic_b, coord, &fd);
            }
        }
    }
}

#[test]
fn inverse_jacobian_matches_finite_difference() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let g = ManifoldTensor::random(variant, BATCH);
        let mut jac = JacobianBatch::empty();
        let value = g.inverse(Some(&mut jac));

        for item in 0..BATCH {
            let analytic = jac.to_dmatrix(item);
            for coord in 0..dof {
                let plus = retract(&g, &delta(BATCH, dof, item, coord, STEP)).inverse(None);
                let minus = retract(&g, &delta(BATCH, dof, item, coord, -STEP)).inverse(None);
                let fd = fd_column(
                    &group_delta(&value, &plus),
                    &group_delta(&value, &minus),
                    item,
                    STEP,
                );
                assert_column_close(&analytic, coord, &fd);
            }
        }
    }
}

#[test]
fn left_act_jacobians_match_finite_difference() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let g = ManifoldTensor::random(variant, BATCH);
        let points = VectorBatch::random(BATCH, 3, 2.0);
        let mut jac_g = JacobianBatch::empty();
        let mut jac_p = JacobianBatch::empty();
        g.left_act(&points, Some(&mut jac_g), Some(&mut jac_p))
            .unwrap();

        for item in 0..BATCH {
            let analytic_g = jac_g.to_dmatrix(item);
            for coord in 0..dof {
                let plus = retract(&g, &delta(BATCH, dof, item, coord, STEP))
                    .left_act(&points, None, None)
                    .unwrap();
                let minus = retract(&g, &delta(BATCH, dof, item, coord, -STEP))
                    .left_act(&points, None, None)
                    .unwrap();
                let fd = fd_column(&plus, &minus, item, STEP);
                assert_column_close(&analytic_g, coord, &fd);
            }

            let analytic_p = jac_p.to_dmatrix(item);
            for coord in 0..3 {
                let plus = g
                    .left_act(&perturbed(&points, item, coord, STEP), None, None)
                    .unwrap();
                let minus = g
                    .left_act(&perturbed(&points, item, coord, -STEP), None, None)
                    .unwrap();
                let fd = fd_column(&plus, &minus, item, STEP);
                assert_column_close(&analytic_p, coord, &fd);
            }
        }
    }
}

// The adjoint is the exact pushforward of conjugation: for any tangent
// vector d, log(g exp(d) g⁻¹) = Adj(g) d with no approximation.
#[test]
fn adjoint_matches_conjugation() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let g = ManifoldTensor::random(variant, BATCH);
        let adj = g.adjoint();
        let d = VectorBatch::random(BATCH, dof, 0.3);

        let motion = ManifoldTensor::exp(variant, &d, None).unwrap();
        let conjugated = g
            .compose(&motion, None, None)
            .unwrap()
            .compose(&g.inverse(None), None, None)
            .unwrap()
            .log(None);

        for item in 0..BATCH {
            let analytic = adj.to_dmatrix(item);
            for r in 0..dof {
                let mut pushed = 0.0;
                for c in 0..dof {
                    pushed += analytic[(r, c)] * d.row(item)[c];
                }
                assert!((pushed - conjugated.row(item)[r]).abs() < 1e-9);
            }
        }
    }
}

// left_project recovers the tangent coordinates of an ambient-space
// perturbation along a retraction curve.
#[test]
fn left_project_recovers_retraction_velocity() {
    for variant in [GroupVariant::SO3, GroupVariant::SE3] {
        let dof = variant.dof();
        let (rows, cols) = variant.ambient_shape();
        let g = ManifoldTensor::random(variant, BATCH);

        for coord in 0..dof {
            let plus = retract(&g, &delta_all(BATCH, dof, coord, STEP));
            let minus = retract(&g, &delta_all(BATCH, dof, coord, -STEP));
            let velocity: Vec<f64> = plus
                .raw()
                .iter()
                .zip(minus.raw())
                .map(|(p, m)| (p - m) / (2.0 * STEP))
                .collect();
            let ambient = MatrixBatch::from_raw(BATCH, rows, cols, velocity).unwrap();
            let recovered = g.left_project(&ambient).unwrap();
            for item in 0..BATCH {
                for (k, &value) in recovered.row(item).iter().enumerate() {
                    let expected = if k == coord { 1.0 } else { 0.0 };
                    assert!((value - expected).abs() < 1e-5);
                }
            }
        }
    }
}

/// Perturbation of coordinate `coord` on every item at once.
fn delta_all(batch: usize, dim: usize, coord: usize, h: f64) -> VectorBatch {
    let mut data = vec![0.0; batch * dim];
    for item in 0..batch {
        data[item * dim + coord] = h;
    }
    VectorBatch::from_raw(batch, dim, data).unwrap()
}
