// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Spatial regularization and hole filling of the hypotheses grid.
//!
//! Both passes read a frozen snapshot (the "other" buffer)
//! and write into the current buffer.

use crate::core::config::Config;
use crate::core::depth::grid::{DoubleBuffer, SummedArea};
use crate::core::depth::hypothesis::{unzero, DepthHypothesis};
use crate::misc::type_aliases::{Float, Image};

/// Half size of the regularization window.
const REG_RADIUS: usize = 2;

/// Replace the smoothed state of each valid hypothesis by the inverse variance
/// weighted mean of its consistent 5x5 neighbours, penalized by their distance.
///
/// A hypothesis whose consistent neighbours accumulate less validity than
/// `validity_threshold` is invalidated and blacklisted once more.
/// With `remove_occlusions`, a hypothesis with more nearer inconsistent neighbours
/// than consistent ones is invalidated.
#[allow(clippy::cast_precision_loss)]
pub fn regularize(
    grid: &mut DoubleBuffer<DepthHypothesis>,
    width: usize,
    config: &Config,
    remove_occlusions: bool,
    validity_threshold: Float,
) {
    let height = grid.len() / width;
    if width <= 2 * REG_RADIUS || height <= 2 * REG_RADIUS {
        return;
    }
    grid.snapshot();
    let (dest, snapshot) = grid.current_mut_and_other();
    for y in REG_RADIUS..height - REG_RADIUS {
        for x in REG_RADIUS..width - REG_RADIUS {
            let idx = x + y * width;
            let center = &snapshot[idx];
            if !center.is_valid {
                continue;
            }
            let mut sum = 0.0;
            let mut sum_ivar = 0.0;
            let mut val_sum = 0.0;
            let mut nb_occluding = 0_usize;
            let mut nb_not_occluding = 0_usize;
            for ny in y - REG_RADIUS..=y + REG_RADIUS {
                for nx in x - REG_RADIUS..=x + REG_RADIUS {
                    let source = &snapshot[nx + ny * width];
                    if !source.is_valid {
                        continue;
                    }
                    let diff = source.idepth - center.idepth;
                    if config.diff_fac_smoothing * diff * diff > source.idepth_var + center.idepth_var {
                        if source.idepth > center.idepth {
                            nb_occluding += 1;
                        }
                        continue;
                    }
                    val_sum += source.validity_counter;
                    nb_not_occluding += 1;
                    let (dx, dy) = (nx as Float - x as Float, ny as Float - y as Float);
                    let ivar = 1.0 / (source.idepth_var + (dx * dx + dy * dy) * config.reg_dist_var);
                    sum += source.idepth * ivar;
                    sum_ivar += ivar;
                }
            }

            let target = &mut dest[idx];
            if val_sum < validity_threshold {
                target.invalidate();
                target.blacklisted -= 1;
                continue;
            }
            if remove_occlusions && nb_occluding > nb_not_occluding {
                target.invalidate();
                continue;
            }
            target.idepth_smoothed = unzero(sum / sum_ivar);
            target.idepth_var_smoothed = 1.0 / sum_ivar;
        }
    }
}

/// Create hypotheses at invalid but textured pixels surrounded by enough evidence.
///
/// The new inverse depth is the inverse variance weighted mean of the valid
/// hypotheses in the 5x5 window, with variance `var_random_init_initial`
/// and a validity of 0.
pub fn fill_holes(
    grid: &mut DoubleBuffer<DepthHypothesis>,
    validity: &mut SummedArea,
    width: usize,
    gradient_max: &Image,
    config: &Config,
) {
    let height = grid.len() / width;
    if width < 6 || height < 6 {
        return;
    }
    validity.rebuild(grid.current());
    grid.snapshot();
    let (dest, snapshot) = grid.current_mut_and_other();
    for y in 3..height - 2 {
        for x in 3..width - 2 {
            let idx = x + y * width;
            let hole = &snapshot[idx];
            if hole.is_valid || gradient_max[(x, y)] < config.min_abs_grad_decrease {
                continue;
            }
            let val = validity.window_sum(x, y, 2);
            let creatable = hole.blacklisted >= config.min_blacklist && val > config.val_sum_min_for_create;
            if !(creatable || val > config.val_sum_min_for_unblacklist) {
                continue;
            }
            let mut sum_idepth = 0.0;
            let mut sum_ivar = 0.0;
            for ny in y - 2..=y + 2 {
                for source in snapshot[x - 2 + ny * width..=x + 2 + ny * width].iter() {
                    if source.is_valid {
                        sum_idepth += source.idepth / source.idepth_var;
                        sum_ivar += 1.0 / source.idepth_var;
                    }
                }
            }
            if sum_ivar > 0.0 {
                dest[idx] = DepthHypothesis::new(
                    unzero(sum_idepth / sum_ivar),
                    config.var_random_init_initial,
                    0.0,
                );
            }
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;

    const WIDTH: usize = 12;
    const HEIGHT: usize = 10;

    fn uniform_grid(idepth: Float, var: Float, validity: Float) -> DoubleBuffer<DepthHypothesis> {
        DoubleBuffer::new(WIDTH * HEIGHT, DepthHypothesis::new(idepth, var, validity))
    }

    #[test]
    fn smoothed_variance_never_exceeds_raw_variance() {
        let config = Config::default();
        let mut grid = uniform_grid(1.0, 0.01, 10.0);
        for (i, h) in grid.current_mut().iter_mut().enumerate() {
            h.idepth = 1.0 + 0.01 * (i % 7) as Float;
            h.idepth_var = 0.005 + 0.001 * (i % 5) as Float;
        }
        grid.current_mut()[5 + 5 * WIDTH].invalidate();
        regularize(&mut grid, WIDTH, &config, false, config.val_sum_min_for_keep);
        let smoothed: Vec<_> = grid.current().iter().filter(|h| h.is_valid).collect();
        assert!(!smoothed.is_empty());
        for h in smoothed {
            assert!(h.idepth_var_smoothed <= h.idepth_var + 1e-15);
        }
    }

    #[test]
    fn isolated_far_hypothesis_is_occluded() {
        let config = Config::default();
        let mut grid = uniform_grid(1.0, 0.01, 30.0);
        let center = 6 + 5 * WIDTH;
        grid.current_mut()[center].idepth = 0.2;

        let mut kept = grid.clone();
        regularize(&mut kept, WIDTH, &config, false, config.val_sum_min_for_keep);
        assert!(kept.current()[center].is_valid);
        approx::assert_relative_eq!(kept.current()[center].idepth_smoothed, 0.2);

        regularize(&mut grid, WIDTH, &config, true, config.val_sum_min_for_keep);
        assert!(!grid.current()[center].is_valid);
        assert_eq!(grid.current()[center].blacklisted, 0);
    }

    #[test]
    fn lack_of_evidence_invalidates_and_blacklists() {
        let config = Config::default();
        let mut grid = uniform_grid(1.0, 0.01, 0.5);
        regularize(&mut grid, WIDTH, &config, false, config.val_sum_min_for_keep);
        let h = grid.current()[6 + 5 * WIDTH];
        assert!(!h.is_valid);
        assert_eq!(h.blacklisted, -1);
    }

    #[test]
    fn hole_is_filled_with_neighbour_mean() {
        let config = Config::default();
        let mut grid = uniform_grid(0.8, 0.01, 5.0);
        let hole = 6 + 5 * WIDTH;
        grid.current_mut()[hole].invalidate();
        let gradient_max = Image::from_element(WIDTH, HEIGHT, 10.0);
        let mut validity = SummedArea::new(WIDTH, HEIGHT);
        fill_holes(&mut grid, &mut validity, WIDTH, &gradient_max, &config);
        let filled = grid.current()[hole];
        assert!(filled.is_valid);
        approx::assert_relative_eq!(filled.idepth, 0.8, epsilon = 1e-12);
        assert_eq!(filled.idepth_var, config.var_random_init_initial);
        assert_eq!(filled.validity_counter, 0.0);
    }

    #[test]
    fn hole_without_texture_stays_empty() {
        let config = Config::default();
        let mut grid = uniform_grid(0.8, 0.01, 5.0);
        let hole = 6 + 5 * WIDTH;
        grid.current_mut()[hole].invalidate();
        let gradient_max = Image::zeros(WIDTH, HEIGHT);
        let mut validity = SummedArea::new(WIDTH, HEIGHT);
        fill_holes(&mut grid, &mut validity, WIDTH, &gradient_max, &config);
        assert!(!grid.current()[hole].is_valid);
    }
}
