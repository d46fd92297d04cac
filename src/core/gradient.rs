// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to compute gradients.
//!
//! Images are indexed `(x, y)`, see `misc::type_aliases::Image`.
//! One pixel wide borders are left to zero.

use crate::misc::type_aliases::{Float, Image};

/// Compute centered gradients in x and y directions,
/// `0.5 * (I(x+1) - I(x-1))` and `0.5 * (I(y+1) - I(y-1))`.
pub fn centered(img: &Image) -> (Image, Image) {
    let (width, height) = img.shape();
    let mut grad_x = Image::zeros(width, height);
    let mut grad_y = Image::zeros(width, height);
    if width < 3 || height < 3 {
        return (grad_x, grad_y);
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            grad_x[(x, y)] = 0.5 * (img[(x + 1, y)] - img[(x - 1, y)]);
            grad_y[(x, y)] = 0.5 * (img[(x, y + 1)] - img[(x, y - 1)]);
        }
    }
    (grad_x, grad_y)
}

/// Gradient norm at each pixel.
pub fn norm(grad_x: &Image, grad_y: &Image) -> Image {
    grad_x.zip_map(grad_y, |gx, gy| (gx * gx + gy * gy).sqrt())
}

/// Maximum over the 3x3 neighbourhood of each interior pixel.
///
/// Applied separately, first vertically then horizontally.
pub fn max_filter_3x3(mat: &Image) -> Image {
    let (width, height) = mat.shape();
    let mut vertical = Image::zeros(width, height);
    let mut result = Image::zeros(width, height);
    if width < 3 || height < 3 {
        return result;
    }
    for y in 1..height - 1 {
        for x in 0..width {
            vertical[(x, y)] = max3(mat[(x, y - 1)], mat[(x, y)], mat[(x, y + 1)]);
        }
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            result[(x, y)] = max3(vertical[(x - 1, y)], vertical[(x, y)], vertical[(x + 1, y)]);
        }
    }
    result
}

/// Gradient magnitude, max filtered over a 3x3 neighbourhood.
///
/// This is the "absolute gradient" used to decide
/// if a pixel is textured enough for stereo.
pub fn max_magnitude(grad_x: &Image, grad_y: &Image) -> Image {
    max_filter_3x3(&norm(grad_x, grad_y))
}

fn max3(a: Float, b: Float, c: Float) -> Float {
    a.max(b).max(c)
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn centered_on_a_ramp() {
        // I(x, y) = 2x + 3y
        let img = Image::from_fn(6, 5, |x, y| 2.0 * x as Float + 3.0 * y as Float);
        let (gx, gy) = centered(&img);
        assert_eq!(gx[(2, 2)], 2.0);
        assert_eq!(gy[(2, 2)], 3.0);
        assert_eq!(gx[(0, 2)], 0.0);
        assert_eq!(gy[(2, 4)], 0.0);
    }

    #[test]
    fn max_filter_spreads_a_peak() {
        let mut mat = Image::zeros(7, 7);
        mat[(3, 3)] = 5.0;
        let filtered = max_filter_3x3(&mat);
        for y in 2..=4 {
            for x in 2..=4 {
                assert_eq!(filtered[(x, y)], 5.0);
            }
        }
        assert_eq!(filtered[(1, 3)], 0.0);
        assert_eq!(filtered[(3, 5)], 0.0);
    }

    #[test]
    fn magnitude_of_a_ramp() {
        let img = Image::from_fn(8, 8, |x, y| 3.0 * x as Float + 4.0 * y as Float);
        let (gx, gy) = centered(&img);
        let mag = max_magnitude(&gx, &gy);
        assert!((mag[(4, 4)] - 5.0).abs() < 1e-12);
    }
}
