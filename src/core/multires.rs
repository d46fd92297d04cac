// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to generate multi-resolution pyramids.

use nalgebra::{DMatrix, Scalar};

use crate::misc::type_aliases::{Float, Image};

/// Type alias to easily spot vectors that are indexed over multi-resolution levels.
pub type Levels<T> = Vec<T>;

/// Recursively generate a pyramid of images where each level
/// is half the previous resolution, computed with the mean of each 2x2 block.
pub fn mean_pyramid(max_levels: usize, img: Image) -> Levels<Image> {
    limited_sequence(max_levels, img, |m| m, |m| {
        halve(m, |a, b, c, d| 0.25 * (a + b + c + d))
    })
}

/// Recursively apply a function transforming the matrix
/// until it's not possible anymore or the max number of iterations is reached.
/// Using iterations = 0 has the same effect than iterations = 1 since it always has
/// at least one matrix (the init matrix).
pub fn limited_sequence<I, F, T, U>(
    iterations: usize,
    mat: DMatrix<T>,
    init: I,
    f: F,
) -> Levels<DMatrix<U>>
where
    I: Fn(DMatrix<T>) -> DMatrix<U>,
    F: Fn(&DMatrix<U>) -> Option<DMatrix<U>>,
    T: Scalar,
    U: Scalar,
{
    let mut iteration = 1;
    let f_limited = |x: &DMatrix<U>| {
        if iteration < iterations {
            iteration += 1;
            f(x)
        } else {
            None
        }
    };
    sequence(mat, init, f_limited)
}

/// Recursively apply a function transforming the matrix
/// until it's not possible anymore.
pub fn sequence<I, F, T, U>(mat: DMatrix<T>, init: I, mut f: F) -> Levels<DMatrix<U>>
where
    I: Fn(DMatrix<T>) -> DMatrix<U>,
    F: FnMut(&DMatrix<U>) -> Option<DMatrix<U>>,
    T: Scalar,
    U: Scalar,
{
    let mut pyr = vec![init(mat)];
    while let Some(new_mat) = pyr.last().and_then(&mut f) {
        pyr.push(new_mat);
    }
    pyr
}

/// Halve the resolution of a matrix by applying a function to each 2x2 block.
/// If one size of the matrix is < 2 then this function returns None.
/// If one size is odd, its last line/column is dropped.
///
/// The block is given as `f(a, b, c, d)` with:
///   a c
///   b d
/// where `b` is the next row and `c` the next column.
pub fn halve<F, T, U>(mat: &DMatrix<T>, f: F) -> Option<DMatrix<U>>
where
    F: Fn(T, T, T, T) -> U,
    T: Scalar + Copy,
    U: Scalar,
{
    let (r, c) = mat.shape();
    let half_r = r / 2;
    let half_c = c / 2;
    if half_r == 0 || half_c == 0 {
        None
    } else {
        let half_mat = DMatrix::<U>::from_fn(half_r, half_c, |i, j| {
            let a = mat[(2 * i, 2 * j)];
            let b = mat[(2 * i + 1, 2 * j)];
            let c = mat[(2 * i, 2 * j + 1)];
            let d = mat[(2 * i + 1, 2 * j + 1)];
            f(a, b, c, d)
        });
        Some(half_mat)
    }
}

/// Inverse variance weighted fusion of the four inverse depths of a 2x2 block.
///
/// Each element is `(idepth, variance)`, a non positive variance meaning "no value".
/// Returns `(weighted mean, number of values / sum of inverse variances)`
/// or `(-1, -1)` if no value is available.
pub fn fuse_idepth(
    a: (Float, Float),
    b: (Float, Float),
    c: (Float, Float),
    d: (Float, Float),
) -> (Float, Float) {
    let mut idepth_sum = 0.0;
    let mut ivar_sum = 0.0;
    let mut count = 0_u8;
    for &(idepth, var) in &[a, b, c, d] {
        if var > 0.0 {
            let ivar = 1.0 / var;
            ivar_sum += ivar;
            idepth_sum += ivar * idepth;
            count += 1;
        }
    }
    if count > 0 {
        (idepth_sum / ivar_sum, Float::from(count) / ivar_sum)
    } else {
        (-1.0, -1.0)
    }
}

// TESTS #############################################################
