// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Miscellaneous helper functions that didn't fit elsewhere.

use crate::misc::type_aliases::{Float, Image};

/// Bilinear interpolation of a pixel with floating point coordinates.
///
/// The 2x2 neighbourhood is clamped inside the image,
/// so points slightly outside take the value of the closest border.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
pub fn interpolate(img: &Image, x: Float, y: Float) -> Float {
    let (width, height) = img.shape();
    let max_x = width.saturating_sub(2) as Float;
    let max_y = height.saturating_sub(2) as Float;
    let u = x.floor().max(0.0).min(max_x);
    let v = y.floor().max(0.0).min(max_y);
    let a = (x - u).max(0.0).min(1.0);
    let b = (y - v).max(0.0).min(1.0);
    let u_0 = u as usize;
    let v_0 = v as usize;
    let u_1 = (u_0 + 1).min(width - 1);
    let v_1 = (v_0 + 1).min(height - 1);
    (1.0 - b) * ((1.0 - a) * img[(u_0, v_0)] + a * img[(u_1, v_0)])
        + b * ((1.0 - a) * img[(u_0, v_1)] + a * img[(u_1, v_1)])
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn interpolate_is_exact_on_planes() {
        let img = Image::from_fn(10, 8, |x, y| 1.0 + 2.0 * x as Float - 0.5 * y as Float);
        let value = interpolate(&img, 3.25, 4.75);
        assert!((value - (1.0 + 6.5 - 2.375)).abs() < 1e-12);
    }

    #[test]
    fn interpolate_at_integer_pixel() {
        let img = Image::from_fn(4, 4, |x, y| (x * 10 + y) as Float);
        assert_eq!(interpolate(&img, 2.0, 1.0), 21.0);
    }

    #[test]
    fn interpolate_clamps_outside() {
        let img = Image::from_fn(4, 4, |x, _| x as Float);
        assert_eq!(interpolate(&img, -3.0, 1.0), 0.0);
        assert_eq!(interpolate(&img, 10.0, 1.0), 3.0);
    }
}
