// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Camera intrinsics parameters and their multi-resolution derivation.

use serde::{Deserialize, Serialize};

use crate::misc::type_aliases::{Float, Mat3, Point2, Point3, Vec3};

/// Intrinsic parameters of a pinhole camera (without skew).
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Principal point `(cx, cy)` in pixels.
    pub principal_point: (Float, Float),
    /// Focal lengths `(fx, fy)` in pixels.
    pub focal: (Float, Float),
}

/// Coefficients of the inverse of the intrinsics matrix,
/// such that `x = fxi * u + cxi` and `y = fyi * v + cyi`.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct InverseParams {
    /// `1 / fx`.
    pub fxi: Float,
    /// `1 / fy`.
    pub fyi: Float,
    /// `-cx / fx`.
    pub cxi: Float,
    /// `-cy / fy`.
    pub cyi: Float,
}

impl Intrinsics {
    /// Intrinsics matrix `K`.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        let (fx, fy) = self.focal;
        let (cx, cy) = self.principal_point;
        Mat3::new(
            fx,  0.0, cx,
            0.0, fy,  cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Coefficients of `K^-1`.
    pub fn inverse_params(&self) -> InverseParams {
        let (fx, fy) = self.focal;
        let (cx, cy) = self.principal_point;
        InverseParams {
            fxi: 1.0 / fx,
            fyi: 1.0 / fy,
            cxi: -cx / fx,
            cyi: -cy / fy,
        }
    }

    /// Intrinsics of the `n` first levels of a multi-resolution pyramid.
    /// Level 0 is `self`.
    ///
    /// Principal points are always recomputed from the level 0 values,
    /// with `c_l = (c_0 + 0.5) / 2^l - 0.5`, so that levels do not accumulate
    /// rounding errors.
    pub fn multi_res(self, n: usize) -> Vec<Intrinsics> {
        let mut intrinsics: Vec<Intrinsics> = Vec::with_capacity(n);
        let (cx_0, cy_0) = self.principal_point;
        let mut focal = self.focal;
        for level in 0..n {
            let scale = Float::from(1_u32 << level);
            intrinsics.push(Intrinsics {
                principal_point: ((cx_0 + 0.5) / scale - 0.5, (cy_0 + 0.5) / scale - 0.5),
                focal,
            });
            focal = (0.5 * focal.0, 0.5 * focal.1);
        }
        intrinsics
    }

    /// Intrinsics of the next (half resolution) level.
    pub fn half_res(&self) -> Intrinsics {
        let (cx, cy) = self.principal_point;
        let (fx, fy) = self.focal;
        Intrinsics {
            principal_point: ((cx + 0.5) / 2.0 - 0.5, (cy + 0.5) / 2.0 - 0.5),
            focal: (0.5 * fx, 0.5 * fy),
        }
    }

    /// Project a 3D point into homogeneous pixel coordinates `(z u, z v, z)`.
    pub fn project(&self, point: &Point3) -> Vec3 {
        let (fx, fy) = self.focal;
        let (cx, cy) = self.principal_point;
        Vec3::new(
            fx * point.x + cx * point.z,
            fy * point.y + cy * point.z,
            point.z,
        )
    }

    /// Project a 3D point and divide by its depth.
    pub fn project_to_pixel(&self, point: &Point3) -> Point2 {
        let uvz = self.project(point);
        Point2::new(uvz.x / uvz.z, uvz.y / uvz.z)
    }

    /// Back project a pixel with a given depth into a 3D point.
    pub fn back_project(&self, point: Point2, depth: Float) -> Point3 {
        let (fx, fy) = self.focal;
        let (cx, cy) = self.principal_point;
        Point3::new(
            (point.x - cx) * depth / fx,
            (point.y - cy) * depth / fy,
            depth,
        )
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            principal_point: (319.5, 239.5),
            focal: (500.0, 480.0),
        }
    }

    #[test]
    fn multi_res_matches_repeated_half_res() {
        let levels = intrinsics().multi_res(5);
        assert_eq!(levels.len(), 5);
        assert_eq!(levels[0], intrinsics());
        let mut current = intrinsics();
        for level in levels.iter().skip(1) {
            current = current.half_res();
            approx::assert_relative_eq!(level.focal.0, current.focal.0);
            approx::assert_relative_eq!(level.principal_point.0, current.principal_point.0);
            approx::assert_relative_eq!(level.principal_point.1, current.principal_point.1);
        }
        // Centered principal point stays centered: 640 / 16 = 40 pixels wide.
        approx::assert_relative_eq!(levels[4].principal_point.0, 19.5);
        approx::assert_relative_eq!(levels[4].focal.1, 30.0);
    }

    #[test]
    fn back_project_then_project() {
        let cam = intrinsics();
        let pixel = Point2::new(12.25, 400.5);
        let point = cam.back_project(pixel, 2.5);
        approx::assert_relative_eq!(cam.project_to_pixel(&point), pixel, epsilon = 1e-9);
    }

    #[test]
    fn inverse_params_invert_matrix() {
        let cam = intrinsics();
        let inv = cam.inverse_params();
        let k_inv = cam.matrix().try_inverse().unwrap();
        approx::assert_relative_eq!(k_inv.m11, inv.fxi, epsilon = 1e-12);
        approx::assert_relative_eq!(k_inv.m22, inv.fyi, epsilon = 1e-12);
        approx::assert_relative_eq!(k_inv.m13, inv.cxi, epsilon = 1e-12);
        approx::assert_relative_eq!(k_inv.m23, inv.cyi, epsilon = 1e-12);
    }
}
