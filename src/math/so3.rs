// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rotations.
//!
//! Rotations are represented by their 3x3 orthonormal matrix.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade course on Lie Groups for 2D and 3D transformations:
//!     - details: <http://ethaneade.com/lie.pdf>
//!     - summary: <http://ethaneade.com/lie_groups.pdf>

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use crate::misc::type_aliases::{Float, Mat3, Vec3};

/// Threshold on the squared angle for using Taylor series in computations.
pub const EPSILON_TAYLOR_SERIES_2: Float = 1e-12;
const _1_6: Float = 1.0 / 6.0;

/// Hat operator.
/// Goes from so3 parameterization to so3 element (skew-symmetric matrix).
#[rustfmt::skip]
pub fn hat(w: Vec3) -> Mat3 {
    Mat3::new(
         0.0,  -w.z,   w.y,
         w.z,   0.0,  -w.x,
        -w.y,   w.x,   0.0,
    )
}

/// Squared hat operator (`hat_2(w) == hat(w) * hat(w)`).
/// Result is a symmetric matrix.
#[rustfmt::skip]
pub fn hat_2(w: Vec3) -> Mat3 {
    let w11 = w.x * w.x;
    let w12 = w.x * w.y;
    let w13 = w.x * w.z;
    let w22 = w.y * w.y;
    let w23 = w.y * w.z;
    let w33 = w.z * w.z;
    Mat3::new(
        -w22 - w33,     w12,           w13,
         w12,          -w11 - w33,     w23,
         w13,           w23,          -w11 - w22,
    )
}

/// Vee operator. Inverse of hat operator.
/// Warning! does not check that the given matrix is skew-symmetric.
pub fn vee(mat: Mat3) -> Vec3 {
    Vec3::new(mat.m32, mat.m13, mat.m21)
}

/// Coefficients `(A, B)` of the Rodrigues formula `R = I + A [w] + B [w]^2`.
///
/// Uses the Taylor expansion of `A = sin(t)/t` when `t^2 < 1e-12`.
pub fn rodrigues_coefficients(theta_2: Float) -> (Float, Float) {
    if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        rodrigues_coefficients_taylor(theta_2)
    } else {
        rodrigues_coefficients_exact(theta_2)
    }
}

fn rodrigues_coefficients_taylor(theta_2: Float) -> (Float, Float) {
    (1.0 - _1_6 * theta_2, 0.5)
}

fn rodrigues_coefficients_exact(theta_2: Float) -> (Float, Float) {
    let theta = theta_2.sqrt();
    let inv_theta = 1.0 / theta;
    let a = theta.sin() * inv_theta;
    let b = (1.0 - theta.cos()) * inv_theta * inv_theta;
    (a, b)
}

/// Compute the exponential map from Lie algebra so3 to Lie group SO3.
/// Goes from so3 parameterization to SO3 element (rotation matrix).
pub fn exp(w: Vec3) -> Mat3 {
    let (a, b) = rodrigues_coefficients(w.norm_squared());
    rodrigues(w, a, b)
}

/// Rotation matrix `I + a [w] + b [w]^2`.
pub fn rodrigues(w: Vec3, a: Float, b: Float) -> Mat3 {
    Mat3::identity() + a * hat(w) + b * hat_2(w)
}

/// Compute the logarithm map from the Lie group SO3 to the Lie algebra so3.
/// Inverse of the exponential map.
///
/// Panics if the result is not finite.
pub fn log(rotation: &Mat3) -> Vec3 {
    let r = coerce(rotation);
    let cos_angle = (r.trace() - 1.0) * 0.5;
    let half_skew = 0.5 * Vec3::new(r.m32 - r.m23, r.m13 - r.m31, r.m21 - r.m12);
    let sin_angle_abs = half_skew.norm();
    let w = if cos_angle > FRAC_1_SQRT_2 {
        // Small angles: asin is well conditioned.
        if sin_angle_abs > 0.0 {
            (sin_angle_abs.asin() / sin_angle_abs) * half_skew
        } else {
            half_skew
        }
    } else if cos_angle > -FRAC_1_SQRT_2 {
        (cos_angle.acos() / sin_angle_abs) * half_skew
    } else {
        // Angles close to pi: recover the axis from the symmetric part.
        let angle = PI - sin_angle_abs.asin();
        let d0 = r.m11 - cos_angle;
        let d1 = r.m22 - cos_angle;
        let d2 = r.m33 - cos_angle;
        let mut axis = if d0 * d0 > d1 * d1 && d0 * d0 > d2 * d2 {
            Vec3::new(d0, 0.5 * (r.m21 + r.m12), 0.5 * (r.m13 + r.m31))
        } else if d1 * d1 > d2 * d2 {
            Vec3::new(0.5 * (r.m21 + r.m12), d1, 0.5 * (r.m32 + r.m23))
        } else {
            Vec3::new(0.5 * (r.m13 + r.m31), 0.5 * (r.m32 + r.m23), d2)
        };
        if axis.dot(&half_skew) < 0.0 {
            axis = -axis;
        }
        angle * axis.normalize()
    };
    assert!(
        w.iter().all(|x| x.is_finite()),
        "so3::log produced a non finite result: {:?}",
        w
    );
    w
}

/// Re-orthonormalize a rotation matrix with a sequential Gram-Schmidt on its rows.
///
/// Panics if the result does not have a positive determinant.
pub fn coerce(rotation: &Mat3) -> Mat3 {
    let r0 = rotation.row(0).transpose().normalize();
    let mut r1 = rotation.row(1).transpose();
    r1 -= r0.cross(&r0.cross(&r1));
    let r1 = r1.normalize();
    let mut r2 = rotation.row(2).transpose();
    r2 -= r0.cross(&r0.cross(&r2));
    r2 -= r1.cross(&r1.cross(&r2));
    let r2 = r2.normalize();
    assert!(
        r0.cross(&r1).dot(&r2) > 0.0,
        "rotation coercion lost orientation: {}",
        rotation
    );
    Mat3::from_rows(&[r0.transpose(), r1.transpose(), r2.transpose()])
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use quickcheck_macros;

    const EPSILON_ROUNDTRIP_APPROX: Float = 1e-9;

    #[test]
    fn exp_log_round_trip() {
        let w = Vec3::zeros();
        assert_eq!(w, log(&exp(w)));
    }

    #[test]
    fn taylor_branch_agrees_at_crossover() {
        let (a_taylor, b_taylor) = rodrigues_coefficients_taylor(EPSILON_TAYLOR_SERIES_2);
        let (a_exact, b_exact) = rodrigues_coefficients_exact(EPSILON_TAYLOR_SERIES_2);
        assert!((a_taylor - a_exact).abs() < 1e-6);
        assert!((b_taylor - b_exact).abs() < 1e-6);
    }

    #[test]
    fn log_near_pi() {
        let w = Vec3::new(0.0, 0.0, PI - 1e-3);
        let w_back = log(&exp(w));
        approx::assert_relative_eq!(w, w_back, epsilon = 1e-6);
    }

    #[test]
    fn coerce_keeps_rotation() {
        let rotation = exp(Vec3::new(0.3, -0.2, 0.9));
        let mut noisy = rotation;
        noisy.m12 += 1e-4;
        noisy.m31 -= 1e-4;
        let fixed = coerce(&noisy);
        approx::assert_relative_eq!(fixed * fixed.transpose(), Mat3::identity(), epsilon = 1e-12);
        approx::assert_relative_eq!(fixed, rotation, epsilon = 1e-3);
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn hat_vee_roundtrip(x: i16, y: i16, z: i16) -> bool {
        let element = Vec3::new(Float::from(x), Float::from(y), Float::from(z));
        element == vee(hat(element))
    }

    #[quickcheck_macros::quickcheck]
    fn hat_2_ok(x: i16, y: i16, z: i16) -> bool {
        let element = Vec3::new(Float::from(x), Float::from(y), Float::from(z)) / 1000.0;
        approx::relative_eq!(
            hat_2(element),
            hat(element) * hat(element),
            epsilon = 1e-12
        )
    }

    #[quickcheck_macros::quickcheck]
    fn log_exp_round_trip(x: i16, y: i16, z: i16) -> bool {
        let w = gen_rotation_vector(x, y, z);
        approx::relative_eq!(w, log(&exp(w)), epsilon = EPSILON_ROUNDTRIP_APPROX)
    }

    #[quickcheck_macros::quickcheck]
    fn exp_is_orthonormal(x: i16, y: i16, z: i16) -> bool {
        let rotation = exp(gen_rotation_vector(x, y, z));
        approx::relative_eq!(
            rotation * rotation.transpose(),
            Mat3::identity(),
            epsilon = 1e-12
        ) && rotation.determinant() > 0.0
    }

    // GENERATORS ####################################################

    /// Rotation vector with each component in [-1, 1] (angle < sqrt(3) < pi).
    fn gen_rotation_vector(x: i16, y: i16, z: i16) -> Vec3 {
        Vec3::new(Float::from(x), Float::from(y), Float::from(z)) / 32768.0
    }
}
