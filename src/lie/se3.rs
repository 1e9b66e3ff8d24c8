//! SE(3) - Special Euclidean Group in 3D.
//!
//! Rigid body transformations, represented in ambient form as 3x4 `[R|t]`
//! matrices. Tangent elements are `[rho(3), theta(3)]` vectors: rho is the
//! translational component, theta the rotational (axis-angle) component.
//!
//! Jacobians follow the right-perturbation convention, matching the SO(3)
//! kernels in [`crate::lie::so3`]. The coupled translation/rotation blocks
//! use the Q(rho, theta) matrix of Barfoot, *State Estimation for Robotics*,
//! eq. 7.86.

use crate::lie::so3;
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Matrix6, Vector3, Vector6};

/// Degrees of freedom of SE(3).
pub const DOF: usize = 6;

/// Rotation block of an ambient element.
pub fn rotation(g: &Matrix3x4<f64>) -> Matrix3<f64> {
    g.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Translation column of an ambient element.
pub fn translation(g: &Matrix3x4<f64>) -> Vector3<f64> {
    g.column(3).into_owned()
}

/// Assemble an ambient `[R|t]` element from its parts.
pub fn from_parts(r: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix3x4<f64> {
    let mut g = Matrix3x4::zeros();
    g.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    g.fixed_view_mut::<3, 1>(0, 3).copy_from(t);
    g
}

/// Translational part of a tangent vector.
pub fn rho(xi: &Vector6<f64>) -> Vector3<f64> {
    xi.fixed_rows::<3>(0).into_owned()
}

/// Rotational part of a tangent vector.
pub fn theta(xi: &Vector6<f64>) -> Vector3<f64> {
    xi.fixed_rows::<3>(3).into_owned()
}

fn tangent_from_parts(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Vector6<f64> {
    let mut xi = Vector6::zeros();
    xi.fixed_rows_mut::<3>(0).copy_from(rho);
    xi.fixed_rows_mut::<3>(3).copy_from(theta);
    xi
}

fn block6(
    top_left: &Matrix3<f64>,
    top_right: &Matrix3<f64>,
    bottom_right: &Matrix3<f64>,
) -> Matrix6<f64> {
    let mut m = Matrix6::zeros();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(top_left);
    m.fixed_view_mut::<3, 3>(0, 3).copy_from(top_right);
    m.fixed_view_mut::<3, 3>(3, 3).copy_from(bottom_right);
    m
}

/// Hat map: tangent vector to its 4x4 Lie-algebra matrix.
///
/// `hat([ρ, θ]) = [[θ]ₓ ρ; 0 0]`
pub fn hat(xi: &Vector6<f64>) -> Matrix4<f64> {
    let mut m = Matrix4::zeros();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&so3::hat(&theta(xi)));
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(&rho(xi));
    m
}

/// Vee map: 4x4 algebra matrix back to tangent coordinates.
pub fn vee(m: &Matrix4<f64>) -> Vector6<f64> {
    let rotation_block = m.fixed_view::<3, 3>(0, 0).into_owned();
    tangent_from_parts(
        &m.fixed_view::<3, 1>(0, 3).into_owned(),
        &so3::vee(&rotation_block),
    )
}

/// Lift a tangent vector to the ambient 3x4 shape, `[hat(θ) | ρ]`.
pub fn lift(xi: &Vector6<f64>) -> Matrix3x4<f64> {
    from_parts(&so3::hat(&theta(xi)), &rho(xi))
}

/// Project an arbitrary ambient 3x4 matrix onto tangent coordinates: the
/// translation column passes through, the rotation block is projected onto
/// so(3).
pub fn project(m: &Matrix3x4<f64>) -> Vector6<f64> {
    tangent_from_parts(&translation(m), &so3::project(&rotation(m)))
}

/// Exponential map.
///
/// `exp([ρ, θ]) = [exp(θ) | V(θ) ρ]` where `V(θ)` is the SO(3) left
/// Jacobian.
pub fn exp(xi: &Vector6<f64>) -> Matrix3x4<f64> {
    let th = theta(xi);
    from_parts(&so3::exp(&th), &(so3::left_jacobian(&th) * rho(xi)))
}

/// Right Jacobian of the exponential map,
/// `Jr(ξ) = [[Jr(θ), Q(-ρ,-θ)], [0, Jr(θ)]]`.
pub fn exp_jacobian(xi: &Vector6<f64>) -> Matrix6<f64> {
    let r = rho(xi);
    let th = theta(xi);
    let jr = so3::left_jacobian(&-th);
    block6(&jr, &q_block(&-r, &-th), &jr)
}

/// Logarithmic map.
///
/// `log([R|t]) = [V⁻¹(θ) t, log(R)]`
pub fn log(g: &Matrix3x4<f64>) -> Vector6<f64> {
    let th = so3::log(&rotation(g));
    tangent_from_parts(&(so3::left_jacobian_inv(&th) * translation(g)), &th)
}

/// Jacobian of the logarithm, `Jr⁻¹(ξ)` evaluated at `ξ = log(g)`.
pub fn log_jacobian(xi: &Vector6<f64>) -> Matrix6<f64> {
    let r = rho(xi);
    let th = theta(xi);
    let jr_inv = so3::left_jacobian_inv(&-th);
    let top_right = -jr_inv * q_block(&-r, &-th) * jr_inv;
    block6(&jr_inv, &top_right, &jr_inv)
}

/// Group composition, `g_a · g_b = [R_a R_b | R_a t_b + t_a]`.
pub fn compose(a: &Matrix3x4<f64>, b: &Matrix3x4<f64>) -> Matrix3x4<f64> {
    let ra = rotation(a);
    from_parts(
        &(ra * rotation(b)),
        &(ra * translation(b) + translation(a)),
    )
}

/// Jacobians of [`compose`]: `J_a = Adj(b⁻¹)`, `J_b = I`.
pub fn compose_jacobians(_a: &Matrix3x4<f64>, b: &Matrix3x4<f64>) -> (Matrix6<f64>, Matrix6<f64>) {
    (adjoint(&inverse(b)), Matrix6::identity())
}

/// Group inverse, `g⁻¹ = [Rᵀ | -Rᵀ t]`.
pub fn inverse(g: &Matrix3x4<f64>) -> Matrix3x4<f64> {
    let rt = rotation(g).transpose();
    from_parts(&rt, &(-rt * translation(g)))
}

/// Jacobian of [`inverse`], `-Adj(g)`.
pub fn inverse_jacobian(g: &Matrix3x4<f64>) -> Matrix6<f64> {
    -adjoint(g)
}

/// Adjoint representation (in `[ρ, θ]` tangent ordering):
///
/// `Adj(g) = [[R, [t]ₓ R], [0, R]]`
pub fn adjoint(g: &Matrix3x4<f64>) -> Matrix6<f64> {
    let r = rotation(g);
    let t = translation(g);
    block6(&r, &(so3::hat(&t) * r), &r)
}

/// Group action on a point, `R p + t`.
pub fn left_act(g: &Matrix3x4<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    rotation(g) * point + translation(g)
}

/// Jacobians of [`left_act`]: wrt the group element the 3x6 `[R, -R [p]ₓ]`,
/// wrt the point `R`.
pub fn left_act_jacobians(
    g: &Matrix3x4<f64>,
    point: &Vector3<f64>,
) -> (nalgebra::Matrix3x6<f64>, Matrix3<f64>) {
    let r = rotation(g);
    let mut jg = nalgebra::Matrix3x6::zeros();
    jg.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    jg.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(-r * so3::hat(point)));
    (jg, r)
}

/// Project an ambient perturbation `M` at `g` back to the tangent space,
/// `left_project(g, M) = project(ambient(g⁻¹) · M)`.
///
/// The perturbation has a zero homogeneous row, so the product reduces to
/// `[Rᵀ M_R | Rᵀ M_t]`.
pub fn left_project(g: &Matrix3x4<f64>, m: &Matrix3x4<f64>) -> Vector6<f64> {
    let rt = rotation(g).transpose();
    project(&from_parts(&(rt * rotation(m)), &(rt * translation(m))))
}

/// Q(ρ, θ) coupling block of the SE(3) left Jacobian
/// (Barfoot eq. 7.86):
///
/// ```text
/// Q = ½ρₓ + b (θₓρₓ + ρₓθₓ + θₓρₓθₓ)
///        + c (θₓ²ρₓ + ρₓθₓ² - 3 θₓρₓθₓ)
///        + e (θₓρₓθₓ² + θₓ²ρₓθₓ)
/// b = (θ - sin θ)/θ³
/// c = (θ² + 2 cos θ - 2)/(2θ⁴)
/// e = (2θ - 3 sin θ + θ cos θ)/(2θ⁵)
/// ```
pub fn q_block(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Matrix3<f64> {
    let rx = so3::hat(rho);
    let wx = so3::hat(theta);
    let theta_sq = theta.norm_squared();

    let (b, c, e) = if theta_sq < so3::SMALL_THETA_SQ {
        (
            1.0 / 6.0 - theta_sq / 120.0,
            1.0 / 24.0 - theta_sq / 720.0,
            1.0 / 120.0 - theta_sq / 2520.0,
        )
    } else {
        let angle = theta_sq.sqrt();
        let sin = angle.sin();
        let cos = angle.cos();
        let theta_4 = theta_sq * theta_sq;
        let theta_5 = theta_4 * angle;
        (
            (angle - sin) / (theta_sq * angle),
            (theta_sq + 2.0 * cos - 2.0) / (2.0 * theta_4),
            (2.0 * angle - 3.0 * sin + angle * cos) / (2.0 * theta_5),
        )
    };

    let wr = wx * rx;
    let rw = rx * wx;
    let wrw = wr * wx;

    0.5 * rx
        + b * (wr + rw + wrw)
        + c * (wx * wr + rw * wx - 3.0 * wrw)
        + e * (wrw * wx + wx * wrw)
}
