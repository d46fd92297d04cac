// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper types to accumulate (sum) a lot of values.

use nalgebra::SVector;

use crate::misc::type_aliases::{Float, Mat6, Vec6};

const SYM_MAT_6_THRESHOLD: u32 = 100;

/// Upper triangular part of a 6x6 symmetric matrix, column by column.
type Packed21 = SVector<Float, 21>;

/// Symmetric matrix accumulator.
///
/// Values are summed by batches of 100 before being added
/// to the global sum, to limit the loss of precision.
#[derive(Clone)]
pub struct SymMat6 {
    nb_data: u32,
    data: Packed21,
    data_hundreds: Packed21,
}

impl Default for SymMat6 {
    fn default() -> Self {
        Self::new()
    }
}

impl SymMat6 {
    /// Initialize with zeros.
    #[inline]
    pub fn new() -> Self {
        Self {
            nb_data: 0,
            data: Packed21::zeros(),
            data_hundreds: Packed21::zeros(),
        }
    }

    /// Add a term vv^t to the symmetric matrix accumulator.
    #[inline]
    pub fn add_vec(&mut self, vec: &Vec6) {
        self.add_vec_weighted(1.0, vec);
    }

    /// Add a term w * vv^t to the symmetric matrix accumulator.
    #[inline]
    pub fn add_vec_weighted(&mut self, weight: Float, vec: &Vec6) {
        let mut vec_data = Packed21::zeros();
        let mut index = 0_usize;
        for j in 0..6 {
            let data_j = weight * vec[j];
            for i in j..6 {
                vec_data[index] = data_j * vec[i];
                index += 1;
            }
        }
        if self.nb_data < SYM_MAT_6_THRESHOLD {
            self.nb_data += 1;
            self.data += vec_data;
        } else {
            self.nb_data = 1;
            self.data_hundreds += self.data;
            self.data = vec_data;
        }
    }

    /// Accumulate all values into the field used in the `to_mat` function.
    /// Clear the other fields.
    #[inline]
    pub fn flush(&mut self) {
        if self.nb_data > 0 {
            self.data_hundreds += self.data;
            self.data = Packed21::zeros();
            self.nb_data = 0;
        }
    }

    /// Convert the `SymMat6` into a normal matrix `Mat6`.
    /// Requires the use of `flush()` before.
    #[inline]
    pub fn to_mat(&self) -> Mat6 {
        let mut mat = Mat6::zeros();
        let mut index = 0_usize;
        for j in 0..6 {
            for i in j..6 {
                let data_ij = self.data_hundreds[index];
                mat[(i, j)] = data_ij;
                mat[(j, i)] = data_ij;
                index += 1;
            }
        }
        mat
    }
}

/// Accumulator of the weighted least squares normal equations
/// of a 6 degrees of freedom problem.
///
/// Each observation contributes `w * v * v^t` to the matrix
/// and `w * r * v` to the vector.
/// Both are normalized by the number of observations when finished.
#[derive(Clone, Default)]
pub struct NormalEquations {
    hessian: SymMat6,
    gradient: Vec6,
    nb_data: usize,
}

impl NormalEquations {
    /// Initialize with zeros.
    pub fn new() -> Self {
        Self {
            hessian: SymMat6::new(),
            gradient: Vec6::zeros(),
            nb_data: 0,
        }
    }

    /// Add one weighted observation.
    #[inline]
    pub fn add(&mut self, jacobian: &Vec6, residual: Float, weight: Float) {
        self.hessian.add_vec_weighted(weight, jacobian);
        self.gradient += (weight * residual) * jacobian;
        self.nb_data += 1;
    }

    /// Number of observations accumulated.
    pub fn len(&self) -> usize {
        self.nb_data
    }

    /// True if no observation was accumulated.
    pub fn is_empty(&self) -> bool {
        self.nb_data == 0
    }

    /// Return the normalized `(A, b)` system.
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(mut self) -> (Mat6, Vec6) {
        self.hessian.flush();
        let n = self.nb_data.max(1) as Float;
        (self.hessian.to_mat() / n, self.gradient / n)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use quickcheck_macros;

    const EPSILON: Float = 1e-9;

    #[test]
    fn empty_normal_equations_are_zero() {
        let (a, b) = NormalEquations::new().finish();
        assert_eq!(a, Mat6::zeros());
        assert_eq!(b, Vec6::zeros());
    }

    #[test]
    fn normal_equations_are_averaged() {
        let v1 = Vec6::new(1.0, 0.0, 2.0, 0.0, -1.0, 0.5);
        let v2 = Vec6::new(0.0, 3.0, 0.0, 1.0, 0.0, 0.0);
        let mut normal = NormalEquations::new();
        normal.add(&v1, 2.0, 0.5);
        normal.add(&v2, -1.0, 2.0);
        assert_eq!(normal.len(), 2);
        let (a, b) = normal.finish();
        let a_expected = (0.5 * v1 * v1.transpose() + 2.0 * v2 * v2.transpose()) / 2.0;
        let b_expected = (0.5 * 2.0 * v1 - 2.0 * v2) / 2.0;
        approx::assert_relative_eq!(a, a_expected, epsilon = EPSILON);
        approx::assert_relative_eq!(b, b_expected, epsilon = EPSILON);
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn new() -> bool {
        let accum = SymMat6::new();
        accum.nb_data == 0
    }

    #[quickcheck_macros::quickcheck]
    fn add_vec_101_nb_1(a: i16, b: i16, c: i16, d: i16, e: i16, f: i16) -> bool {
        let vec = gen_vec(a, b, c, d, e, f);
        let mut accum = SymMat6::new();
        for _ in 0..101 {
            accum.add_vec(&vec);
        }
        accum.nb_data == 1
    }

    #[quickcheck_macros::quickcheck]
    fn add_vec_201_sum(a: i16, b: i16, c: i16, d: i16, e: i16, f: i16) -> bool {
        let vec = gen_vec(a, b, c, d, e, f);
        let mut accum = SymMat6::new();
        for _ in 0..201 {
            accum.add_vec(&vec);
        }
        let mut accum_single = SymMat6::new();
        accum_single.add_vec(&vec);
        approx::relative_eq!(
            accum.data_hundreds,
            200.0 * accum_single.data,
            epsilon = EPSILON,
            max_relative = EPSILON
        )
    }

    #[quickcheck_macros::quickcheck]
    fn to_mat(a: i16, b: i16, c: i16, d: i16, e: i16, f: i16) -> bool {
        let vec = gen_vec(a, b, c, d, e, f);
        let mut accum = SymMat6::new();
        accum.add_vec_weighted(0.5, &vec);
        accum.flush();
        approx::relative_eq!(
            accum.to_mat(),
            0.5 * vec * vec.transpose(),
            epsilon = EPSILON,
            max_relative = EPSILON
        )
    }

    // GENERATORS ####################################################

    fn gen_vec(a: i16, b: i16, c: i16, d: i16, e: i16, f: i16) -> Vec6 {
        Vec6::new(
            Float::from(a),
            Float::from(b),
            Float::from(c),
            Float::from(d),
            Float::from(e),
            Float::from(f),
        ) / 1000.0
    }
}
