// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Storage helpers of the depth map: a double buffer of hypotheses grids
//! and a summed area table of the validity counters.

use crate::core::depth::hypothesis::DepthHypothesis;
use crate::misc::type_aliases::Float;

/// Two equally sized buffers, one "current" and one "other".
///
/// Swapping only exchanges the roles of the buffers, no element is copied.
#[derive(Debug, Clone)]
pub struct DoubleBuffer<T> {
    buffers: [Vec<T>; 2],
    current: usize,
}

impl<T: Clone> DoubleBuffer<T> {
    /// Both buffers filled with `len` copies of `value`.
    pub fn new(len: usize, value: T) -> Self {
        Self {
            buffers: [vec![value.clone(); len], vec![value; len]],
            current: 0,
        }
    }

    /// Copy the current buffer into the other one.
    pub fn snapshot(&mut self) {
        let (current, other) = self.current_and_other_mut();
        other.clone_from_slice(current);
    }
}

impl<T> DoubleBuffer<T> {
    /// Number of elements of each buffer.
    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    /// True if the buffers are empty.
    pub fn is_empty(&self) -> bool {
        self.buffers[0].is_empty()
    }

    /// The current buffer.
    pub fn current(&self) -> &[T] {
        &self.buffers[self.current]
    }

    /// The current buffer, mutably.
    pub fn current_mut(&mut self) -> &mut [T] {
        &mut self.buffers[self.current]
    }

    /// The other buffer.
    pub fn other(&self) -> &[T] {
        &self.buffers[1 - self.current]
    }

    /// The other buffer, mutably.
    pub fn other_mut(&mut self) -> &mut [T] {
        &mut self.buffers[1 - self.current]
    }

    /// Exchange the roles of both buffers.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Split borrow: the current buffer mutably and the other one frozen.
    pub fn current_mut_and_other(&mut self) -> (&mut [T], &[T]) {
        let (current, other) = self.current_and_other_mut();
        (current, other)
    }

    /// Split borrow of both buffers mutably, current first.
    pub fn current_and_other_mut(&mut self) -> (&mut [T], &mut [T]) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.current == 0 {
            (&mut first[0], &mut second[0])
        } else {
            (&mut second[0], &mut first[0])
        }
    }
}

/// Summed area table (integral image) of the validity counters of valid hypotheses.
///
/// `table[x + y * width]` is the sum over all pixels `(x', y')` with `x' <= x` and `y' <= y`.
#[derive(Debug, Clone)]
pub struct SummedArea {
    width: usize,
    table: Vec<Float>,
}

impl SummedArea {
    /// Table of zeros.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            table: vec![0.0; width * height],
        }
    }

    /// Recompute the table from a grid of hypotheses.
    pub fn rebuild(&mut self, grid: &[DepthHypothesis]) {
        assert_eq!(grid.len(), self.table.len(), "grid size mismatch");
        let width = self.width;
        for (row_table, row_grid) in self.table.chunks_mut(width).zip(grid.chunks(width)) {
            let mut row_sum = 0.0;
            for (t, h) in row_table.iter_mut().zip(row_grid) {
                if h.is_valid {
                    row_sum += h.validity_counter;
                }
                *t = row_sum;
            }
        }
        for idx in width..self.table.len() {
            self.table[idx] += self.table[idx - width];
        }
    }

    /// Sum over the square window `[x - radius, x + radius] x [y - radius, y + radius]`.
    ///
    /// Requires `x > radius` and `y > radius`, and the window inside the grid.
    pub fn window_sum(&self, x: usize, y: usize, radius: usize) -> Float {
        let w = self.width;
        let (x_max, y_max) = (x + radius, y + radius);
        let (x_out, y_out) = (x - radius - 1, y - radius - 1);
        self.table[x_max + y_max * w] - self.table[x_max + y_out * w] - self.table[x_out + y_max * w]
            + self.table[x_out + y_out * w]
    }
}

// TESTS #############################################################
