// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rigid body motion.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade course on Lie Groups for 2D and 3D transformations:
//!     - details: <http://ethaneade.com/lie.pdf>
//!     - summary: <http://ethaneade.com/lie_groups.pdf>

use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use std::ops::Mul;

use crate::math::so3;
use crate::misc::type_aliases::{Float, Iso3, Mat3, Mat4, Point3, Vec3, Vec6};

const _1_24: Float = 1.0 / 24.0;

/// Parameterization of a twist (element of se3).
pub type Twist = Vec6;

/// Retrieve the linear velocity part of the twist parameterization.
pub fn linear_velocity(xi: Twist) -> Vec3 {
    Vec3::new(xi[0], xi[1], xi[2])
}

/// Retrieve the angular velocity part of the twist parameterization.
pub fn angular_velocity(xi: Twist) -> Vec3 {
    Vec3::new(xi[3], xi[4], xi[5])
}

/// Hat operator.
/// Goes from se3 parameters to se3 element (4x4 matrix).
#[rustfmt::skip]
pub fn hat(xi: Twist) -> Mat4 {
    let w1 = xi[3];
    let w2 = xi[4];
    let w3 = xi[5];
    Mat4::new(
         0.0,  -w3,    w2,   xi[0],
         w3,    0.0,  -w1,   xi[1],
        -w2,    w1,    0.0,  xi[2],
         0.0,   0.0,   0.0,  0.0,
    )
}

/// Vee operator. Inverse of hat operator.
/// Warning! does not check that the given top left 3x3 sub-matrix is skew-symmetric.
pub fn vee(mat: Mat4) -> Twist {
    Vec6::new(mat.m14, mat.m24, mat.m34, mat.m32, mat.m13, mat.m21)
}

/// A rigid body motion, with an orthonormal rotation matrix and a translation.
///
/// Applied to a point `p`, it gives `rotation * p + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Se3 {
    rotation: Mat3,
    translation: Vec3,
}

impl Default for Se3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Se3 {
    /// The identity motion.
    pub fn identity() -> Self {
        Self {
            rotation: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    /// Build a motion from its parts.
    /// The rotation is re-orthonormalized.
    ///
    /// Panics if any value is not finite.
    pub fn from_parts(rotation: Mat3, translation: Vec3) -> Self {
        Self::checked(so3::coerce(&rotation), translation)
    }

    /// Pure translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self::checked(Mat3::identity(), translation)
    }

    fn checked(rotation: Mat3, translation: Vec3) -> Self {
        let motion = Self {
            rotation,
            translation,
        };
        assert!(
            motion.is_finite(),
            "rigid body motion is not finite: {:?}",
            motion
        );
        motion
    }

    /// Rotation matrix.
    pub fn rotation(&self) -> &Mat3 {
        &self.rotation
    }

    /// Translation vector.
    pub fn translation(&self) -> &Vec3 {
        &self.translation
    }

    /// True if no rotation or translation coefficient is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.rotation.iter().all(|x| x.is_finite())
            && self.translation.iter().all(|x| x.is_finite())
    }

    /// Inverse motion.
    pub fn inverse(&self) -> Self {
        let rotation_t = self.rotation.transpose();
        Self::checked(rotation_t, -(rotation_t * self.translation))
    }

    /// Apply the motion to a vector (rotation then translation).
    pub fn transform_vector(&self, v: &Vec3) -> Vec3 {
        self.rotation * v + self.translation
    }

    /// Convert into a nalgebra isometry.
    pub fn to_iso3(&self) -> Iso3 {
        let rotation = Rotation3::from_matrix_unchecked(self.rotation);
        Iso3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }

    /// Convert from a nalgebra isometry.
    pub fn from_iso3(iso: &Iso3) -> Self {
        Self::from_parts(
            *iso.rotation.to_rotation_matrix().matrix(),
            iso.translation.vector,
        )
    }
}

impl Mul<Se3> for Se3 {
    type Output = Se3;
    fn mul(self, rhs: Se3) -> Se3 {
        &self * &rhs
    }
}

impl<'a> Mul<&'a Se3> for &'a Se3 {
    type Output = Se3;
    /// Composition, re-orthonormalizing the resulting rotation.
    fn mul(self, rhs: &Se3) -> Se3 {
        Se3::from_parts(
            self.rotation * rhs.rotation,
            self.translation + self.rotation * rhs.translation,
        )
    }
}

impl<'a> Mul<&'a Point3> for &'a Se3 {
    type Output = Point3;
    fn mul(self, point: &Point3) -> Point3 {
        Point3::from(self.transform_vector(&point.coords))
    }
}

/// Compute the exponential map from Lie algebra se3 to Lie group SE3.
/// Goes from se3 parameterization to SE3 element (rigid body motion).
///
/// Panics if the result is not finite.
pub fn exp(xi: Twist) -> Se3 {
    let v = linear_velocity(xi);
    let w = angular_velocity(xi);
    let theta_2 = w.norm_squared();
    let cross = w.cross(&v);
    let (a, b) = so3::rodrigues_coefficients(theta_2);
    let translation = if theta_2 < so3::EPSILON_TAYLOR_SERIES_2 {
        v + 0.5 * cross
    } else {
        let c = (1.0 - a) / theta_2;
        v + b * cross + c * w.cross(&cross)
    };
    Se3::checked(so3::rodrigues(w, a, b), translation)
}

/// Compute the logarithm map from the Lie group SE3 to the Lie algebra se3.
/// Inverse of the exponential map.
pub fn log(motion: &Se3) -> Twist {
    let w = so3::log(&motion.rotation);
    let theta_2 = w.norm_squared();
    let theta = theta_2.sqrt();
    let t = motion.translation;
    let half_rotator = so3::exp(-0.5 * w);
    let mut rottrans = half_rotator * t;
    let shtot = if theta_2 > so3::EPSILON_TAYLOR_SERIES_2 {
        let shtot = (0.5 * theta).sin() / theta;
        rottrans -= w * (t.dot(&w) * (1.0 - 2.0 * shtot) / theta_2);
        shtot
    } else {
        rottrans -= w * (t.dot(&w) * _1_24);
        0.5
    };
    let v = rottrans / (2.0 * shtot);
    Vec6::new(v[0], v[1], v[2], w[0], w[1], w[2])
}

// TESTS #############################################################
