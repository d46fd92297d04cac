// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image and matrix types.

use image::{GrayImage, ImageBuffer, Luma};

use crate::misc::type_aliases::{Float, Image};

/// Convert a `GrayImage` into a Float matrix with `nrows == width`.
///
/// No transposition is needed since the row major image buffer
/// is exactly the column major buffer of the transposed matrix.
pub fn matrix_from_image(img: &GrayImage) -> Image {
    let (width, height) = img.dimensions();
    Image::from_iterator(
        width as usize,
        height as usize,
        img.as_raw().iter().map(|&v| Float::from(v)),
    )
}

/// Convert a 16 bits depth image into a Float matrix of depths,
/// dividing every value by `scale`.
pub fn depth_from_image(img: &ImageBuffer<Luma<u16>, Vec<u16>>, scale: Float) -> Image {
    let (width, height) = img.dimensions();
    Image::from_iterator(
        width as usize,
        height as usize,
        img.as_raw().iter().map(|&v| Float::from(v) / scale),
    )
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn pixel_coordinates_are_kept() {
        let img = GrayImage::from_fn(5, 3, |x, y| Luma([(10 * y + x) as u8]));
        let mat = matrix_from_image(&img);
        assert_eq!(mat.shape(), (5, 3));
        assert_eq!(mat[(4, 2)], 24.0);
        assert_eq!(mat.as_slice()[1 + 2 * 5], 21.0);
    }

    #[test]
    fn depth_is_scaled() {
        let img = ImageBuffer::from_fn(4, 2, |x, y| Luma([(5000 * (x + y)) as u16]));
        let depth = depth_from_image(&img, 5000.0);
        assert_eq!(depth.shape(), (4, 2));
        assert_eq!(depth[(3, 1)], 4.0);
        assert_eq!(depth[(0, 0)], 0.0);
    }
}
