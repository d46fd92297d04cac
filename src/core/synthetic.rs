// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ray traced textured planes, to test stereo and tracking
//! against a known geometry.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::core::camera::Intrinsics;
use crate::math::se3::Se3;
use crate::misc::type_aliases::{Float, Image, Vec3};

pub const WIDTH: usize = 640;
pub const HEIGHT: usize = 480;

/// Lattice spacings (meters) and amplitudes of the texture octaves.
const OCTAVES: [(Float, Float); 3] = [(0.015, 40.0), (0.06, 50.0), (0.24, 60.0)];
const LATTICE_SIZE: usize = 256;

/// VGA pinhole camera.
pub fn intrinsics() -> Intrinsics {
    Intrinsics {
        principal_point: (319.5, 239.5),
        focal: (500.0, 500.0),
    }
}

/// Plane `normal . p = distance` in world coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: Float,
}

impl Plane {
    /// Plane `z = depth`.
    pub fn fronto_parallel(depth: Float) -> Self {
        Self {
            normal: Vec3::z(),
            distance: depth,
        }
    }

    /// Plane `z + slope * y = depth`.
    pub fn tilted(depth: Float, slope: Float) -> Self {
        Self {
            normal: Vec3::new(0.0, slope, 1.0),
            distance: depth,
        }
    }
}

/// Multi-octave value noise, with lattice values drawn once from a seeded rng.
struct Texture {
    lattices: Vec<Vec<Float>>,
}

impl Texture {
    fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let lattices = OCTAVES
            .iter()
            .map(|_| {
                (0..LATTICE_SIZE * LATTICE_SIZE)
                    .map(|_| rng.gen_range(-1.0..1.0))
                    .collect()
            })
            .collect();
        Self { lattices }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn lattice(values: &[Float], i: i64, j: i64) -> Float {
        let n = LATTICE_SIZE as i64;
        #[allow(clippy::cast_sign_loss)]
        let idx = (i.rem_euclid(n) + n * j.rem_euclid(n)) as usize;
        values[idx]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn value(&self, x: Float, y: Float) -> Float {
        let smooth = |t: Float| t * t * (3.0 - 2.0 * t);
        let mut intensity = 128.0;
        for (values, &(spacing, amplitude)) in self.lattices.iter().zip(OCTAVES.iter()) {
            let (sx, sy) = (x / spacing, y / spacing);
            let (i, j) = (sx.floor(), sy.floor());
            let (a, b) = (smooth(sx - i), smooth(sy - j));
            let (i, j) = (i as i64, j as i64);
            let top = (1.0 - a) * Self::lattice(values, i, j) + a * Self::lattice(values, i + 1, j);
            let bottom =
                (1.0 - a) * Self::lattice(values, i, j + 1) + a * Self::lattice(values, i + 1, j + 1);
            intensity += amplitude * ((1.0 - b) * top + b * bottom);
        }
        intensity
    }
}

/// Render the intensity and depth images of a textured plane
/// seen by a camera at pose `cam_to_world`.
///
/// Pixels whose ray misses the plane get a depth of 0.
#[allow(clippy::cast_precision_loss)]
pub fn render(plane: &Plane, cam_to_world: &Se3, intrinsics: &Intrinsics) -> (Image, Image) {
    let texture = Texture::new(42);
    let inv = intrinsics.inverse_params();
    let center = cam_to_world.translation();
    let mut intensity = Image::zeros(WIDTH, HEIGHT);
    let mut depth = Image::zeros(WIDTH, HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let ray_cam = Vec3::new(inv.fxi * x as Float + inv.cxi, inv.fyi * y as Float + inv.cyi, 1.0);
            let ray = cam_to_world.transform_vector(&ray_cam);
            let denom = plane.normal.dot(&ray);
            let t = (plane.distance - plane.normal.dot(center)) / denom;
            if denom.abs() > 1e-9 && t > 0.0 {
                let p = center + t * ray;
                intensity[(x, y)] = texture.value(p.x, p.y);
                depth[(x, y)] = t;
            }
        }
    }
    (intensity, depth)
}

/// Vertical stripes repeating every `period` pixels, brightened by `offset`.
/// Every horizontal shift by a multiple of `period` matches exactly.
#[allow(clippy::cast_precision_loss)]
pub fn stripes(period: Float, offset: Float) -> Image {
    Image::from_fn(WIDTH, HEIGHT, |x, _| {
        offset + 128.0 + 100.0 * (2.0 * std::f64::consts::PI * x as Float / period).sin()
    })
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn fronto_parallel_depth_is_constant() {
        let (intensity, depth) = render(&Plane::fronto_parallel(2.0), &Se3::identity(), &intrinsics());
        assert!(depth.iter().all(|&d| (d - 2.0).abs() < 1e-12));
        let mean = intensity.mean();
        assert!(mean > 50.0 && mean < 200.0);
    }

    #[test]
    fn lateral_motion_shifts_the_image() {
        let plane = Plane::fronto_parallel(1.0);
        let (kf, _) = render(&plane, &Se3::identity(), &intrinsics());
        let moved = Se3::from_translation(Vec3::new(0.02, 0.0, 0.0));
        let (other, _) = render(&plane, &moved, &intrinsics());
        // 0.02 m at 1 m with a 500 px focal length is 10 px.
        assert!((other[(100, 200)] - kf[(110, 200)]).abs() < 1e-9);
    }
}
