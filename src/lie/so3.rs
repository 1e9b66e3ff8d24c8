//! SO(3) - Special Orthogonal Group in 3D.
//!
//! Closed-form group operations and analytic Jacobians for 3D rotations.
//! Group elements are represented in ambient form as 3x3 rotation matrices,
//! tangent elements as axis-angle vectors in R³ (direction = rotation axis,
//! magnitude = angle in radians).
//!
//! Jacobians follow the right-perturbation convention of the
//! [manif](https://github.com/artivis/manif) C++ library:
//! `f(R · Exp(δ)) ≈ f(R) ⊕ (J δ)` for small `δ`.

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

/// Squared-angle threshold below which series expansions replace the
/// closed-form trigonometric coefficients.
pub(crate) const SMALL_THETA_SQ: f64 = 1e-8;

/// Degrees of freedom of SO(3).
pub const DOF: usize = 3;

/// Hat map: axis-angle vector to skew-symmetric matrix.
///
/// `[θ]ₓ = [0 -θz θy; θz 0 -θx; -θy θx 0]`
pub fn hat(theta: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -theta.z, theta.y, //
        theta.z, 0.0, -theta.x, //
        -theta.y, theta.x, 0.0,
    )
}

/// Vee map: skew-symmetric matrix back to axis-angle vector.
///
/// Reads the averaged antisymmetric entries so that `vee(hat(t)) == t`
/// exactly; for a matrix that is not exactly skew-symmetric this is the
/// orthogonal projection onto so(3) (see [`project`]).
pub fn vee(m: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(
        0.5 * (m[(2, 1)] - m[(1, 2)]),
        0.5 * (m[(0, 2)] - m[(2, 0)]),
        0.5 * (m[(1, 0)] - m[(0, 1)]),
    )
}

/// Lift a tangent vector to its ambient-shaped algebra element.
///
/// For SO(3) the ambient and algebra shapes coincide, so this is `hat`.
pub fn lift(theta: &Vector3<f64>) -> Matrix3<f64> {
    hat(theta)
}

/// Project an arbitrary ambient 3x3 matrix onto the tangent coordinates
/// (the antisymmetric part, in vee coordinates).
pub fn project(m: &Matrix3<f64>) -> Vector3<f64> {
    vee(m)
}

/// Exponential map via the Rodrigues formula.
///
/// `R = I + sin θ/θ [θ]ₓ + (1 - cos θ)/θ² [θ]ₓ²`
///
/// Taylor coefficients replace the trigonometric ratios for small angles, so
/// the map is smooth through θ = 0.
pub fn exp(theta: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = theta.norm_squared();
    let skew = hat(theta);

    let (coeff_a, coeff_b) = if theta_sq < SMALL_THETA_SQ {
        (1.0 - theta_sq / 6.0, 0.5 - theta_sq / 24.0)
    } else {
        let angle = theta_sq.sqrt();
        (angle.sin() / angle, (1.0 - angle.cos()) / theta_sq)
    };

    Matrix3::identity() + coeff_a * skew + coeff_b * skew * skew
}

/// Right Jacobian of the exponential map, `Jr(θ) = Jl(θ)ᵀ`.
pub fn exp_jacobian(theta: &Vector3<f64>) -> Matrix3<f64> {
    left_jacobian(theta).transpose()
}

/// Logarithmic map: rotation matrix to axis-angle vector.
///
/// The rotation is routed through a unit quaternion and the two-argument
/// arctangent form `θu = 2 v atan2(||v||, w) / ||v||`, which stays accurate
/// near both θ = 0 (series fallback) and the antipodal case θ = π where the
/// direct matrix formula degenerates.
pub fn log(rotation: &Matrix3<f64>) -> Vector3<f64> {
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*rotation));
    log_quaternion(q.quaternion())
}

fn log_quaternion(q: &Quaternion<f64>) -> Vector3<f64> {
    let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

    let log_coeff = if sin_angle_squared > f64::EPSILON {
        let sin_angle = sin_angle_squared.sqrt();
        let cos_angle = q.w;

        // cos_angle < 0 means the quaternion encodes an angle >= pi; flip
        // both arguments so the recovered axis-angle stays in (-pi, pi].
        let two_angle = 2.0
            * if cos_angle < 0.0 {
                f64::atan2(-sin_angle, -cos_angle)
            } else {
                f64::atan2(sin_angle, cos_angle)
            };

        two_angle / sin_angle
    } else {
        2.0
    };

    Vector3::new(q.i * log_coeff, q.j * log_coeff, q.k * log_coeff)
}

/// Jacobian of the logarithm, `Jr⁻¹(θ)` evaluated at `θ = log(R)`.
pub fn log_jacobian(theta: &Vector3<f64>) -> Matrix3<f64> {
    right_jacobian_inv(theta)
}

/// Left Jacobian of the SO(3) exponential map.
///
/// `Jl(θ) = I + (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²`
pub fn left_jacobian(theta: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = theta.norm_squared();
    let skew = hat(theta);

    if theta_sq < SMALL_THETA_SQ {
        Matrix3::identity()
            + (0.5 - theta_sq / 24.0) * skew
            + (1.0 / 6.0 - theta_sq / 120.0) * skew * skew
    } else {
        let angle = theta_sq.sqrt();
        Matrix3::identity()
            + (1.0 - angle.cos()) / theta_sq * skew
            + (angle - angle.sin()) / (theta_sq * angle) * skew * skew
    }
}

/// Inverse of the left Jacobian.
///
/// `Jl⁻¹(θ) = I - ½[θ]ₓ + (1/θ² - cot(θ/2)/2θ) [θ]ₓ²`
///
/// The cotangent form keeps the quadratic coefficient finite at θ = π where
/// the textbook `(1 + cos θ)/(2θ sin θ)` expression is 0/0.
pub fn left_jacobian_inv(theta: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = theta.norm_squared();
    let skew = hat(theta);

    if theta_sq < SMALL_THETA_SQ {
        Matrix3::identity() - 0.5 * skew + (1.0 / 12.0 + theta_sq / 720.0) * skew * skew
    } else {
        let angle = theta_sq.sqrt();
        let half_cot = 1.0 / (0.5 * angle).tan();
        Matrix3::identity() - 0.5 * skew
            + (1.0 / theta_sq - half_cot / (2.0 * angle)) * skew * skew
    }
}

/// Right Jacobian, `Jr(θ) = Jl(-θ)`.
pub fn right_jacobian(theta: &Vector3<f64>) -> Matrix3<f64> {
    left_jacobian(&-theta)
}

/// Inverse right Jacobian, `Jr⁻¹(θ) = Jl⁻¹(-θ)`.
pub fn right_jacobian_inv(theta: &Vector3<f64>) -> Matrix3<f64> {
    left_jacobian_inv(&-theta)
}

/// Group composition, `R_a · R_b`.
///
/// Jacobians: `J_a = R_bᵀ = Adj(R_b⁻¹)`, `J_b = I`.
pub fn compose(a: &Matrix3<f64>, b: &Matrix3<f64>) -> Matrix3<f64> {
    a * b
}

/// Jacobians of [`compose`] wrt each operand.
pub fn compose_jacobians(_a: &Matrix3<f64>, b: &Matrix3<f64>) -> (Matrix3<f64>, Matrix3<f64>) {
    (b.transpose(), Matrix3::identity())
}

/// Group inverse, `R⁻¹ = Rᵀ`. Jacobian: `-Adj(R) = -R`.
pub fn inverse(r: &Matrix3<f64>) -> Matrix3<f64> {
    r.transpose()
}

/// Jacobian of [`inverse`].
pub fn inverse_jacobian(r: &Matrix3<f64>) -> Matrix3<f64> {
    -r
}

/// Adjoint representation; for SO(3) this is the rotation matrix itself.
pub fn adjoint(r: &Matrix3<f64>) -> Matrix3<f64> {
    *r
}

/// Group action on a point, `R p`.
///
/// Jacobians: wrt the group element `-R [p]ₓ`, wrt the point `R`.
pub fn left_act(r: &Matrix3<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    r * point
}

/// Jacobians of [`left_act`].
pub fn left_act_jacobians(
    r: &Matrix3<f64>,
    point: &Vector3<f64>,
) -> (Matrix3<f64>, Matrix3<f64>) {
    (-r * hat(point), *r)
}

/// Project an ambient perturbation `M` at `R` back to the tangent space,
/// `left_project(R, M) = project(R⁻¹ M)`.
///
/// For `M = d/dε ambient(R · Exp(ε δ))` this recovers `δ`.
pub fn left_project(r: &Matrix3<f64>, m: &Matrix3<f64>) -> Vector3<f64> {
    project(&(r.transpose() * m))
}
