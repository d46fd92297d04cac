// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Propagation of the hypotheses of an old keyframe into a new keyframe.

use crate::core::config::Config;
use crate::core::depth::grid::DoubleBuffer;
use crate::core::depth::hypothesis::DepthHypothesis;
use crate::core::frame::Frame;
use crate::math::se3::Se3;
use crate::misc::helper::interpolate;
use crate::misc::type_aliases::{Float, Vec3};

/// Warp every valid hypothesis of the current grid into the new keyframe geometry,
/// then make the result the current grid.
///
/// `old_to_new` maps old keyframe coordinates into new keyframe coordinates.
/// Hypotheses landing too close to the borders, on a photometrically inconsistent
/// or untextured pixel are dropped. When two hypotheses land on the same pixel,
/// consistent ones are merged and otherwise the nearer one wins.
///
/// Returns the number of propagated hypotheses.
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn propagate(
    grid: &mut DoubleBuffer<DepthHypothesis>,
    old_keyframe: &Frame,
    new_keyframe: &Frame,
    old_to_new: &Se3,
    config: &Config,
) -> usize {
    let (width, height) = (old_keyframe.width(0), old_keyframe.height(0));
    let intrinsics = old_keyframe.intrinsics(0);
    let inv = intrinsics.inverse_params();
    let (fx, fy) = intrinsics.focal;
    let (cx, cy) = intrinsics.principal_point;
    let rotation = old_to_new.rotation();
    let translation = old_to_new.translation();
    let old_intensity = &old_keyframe.level(0).intensity;
    let new_intensity = &new_keyframe.level(0).intensity;
    let new_gradient_max = &new_keyframe.level(0).gradient_max;
    let validity_cap = (config.validity_counter_max + config.validity_counter_max_variable).floor();

    let (source_grid, dest_grid) = grid.current_and_other_mut();
    for h in dest_grid.iter_mut() {
        h.is_valid = false;
        h.blacklisted = 0;
    }

    let mut nb_propagated = 0;
    for y in 0..height {
        for x in 0..width {
            let source = &source_grid[x + y * width];
            if !source.is_valid {
                continue;
            }
            let ray = Vec3::new(inv.fxi * x as Float + inv.cxi, inv.fyi * y as Float + inv.cyi, 1.0);
            let pn = rotation * ray / source.idepth_smoothed + translation;
            let new_idepth = 1.0 / pn.z;
            let u_new = pn.x * new_idepth * fx + cx;
            let v_new = pn.y * new_idepth * fy + cy;
            let inside = u_new > 2.1
                && v_new > 2.1
                && u_new < width as Float - 3.1
                && v_new < height as Float - 3.1;
            if !inside {
                continue;
            }

            let (new_x, new_y) = ((u_new + 0.5).floor() as usize, (v_new + 0.5).floor() as usize);
            let dest_abs_grad = new_gradient_max[(new_x, new_y)];
            let residual = interpolate(new_intensity, u_new, v_new) - old_intensity[(x, y)];
            let max_diff = config.max_diff_constant + config.max_diff_grad_mult * dest_abs_grad * dest_abs_grad;
            if residual * residual / max_diff > 1.0 || dest_abs_grad < config.min_abs_grad_decrease {
                continue;
            }

            // Near points get a larger variance increase than far points.
            let idepth_ratio_2 = (new_idepth / source.idepth_smoothed).powi(2);
            let new_var = idepth_ratio_2 * idepth_ratio_2 * source.idepth_var;

            let target = &mut dest_grid[new_x + new_y * width];
            if target.is_valid {
                let diff = target.idepth - new_idepth;
                if config.diff_fac_prop_merge * diff * diff > new_var + target.idepth_var {
                    if new_idepth < target.idepth {
                        continue;
                    }
                    target.invalidate();
                }
            }

            if target.is_valid {
                let w = new_var / (target.idepth_var + new_var);
                let merged_idepth = w * target.idepth + (1.0 - w) * new_idepth;
                let merged_validity = (source.validity_counter + target.validity_counter)
                    .floor()
                    .min(validity_cap);
                let merged_var = 1.0 / (1.0 / target.idepth_var + 1.0 / new_var);
                *target = DepthHypothesis::new(merged_idepth, merged_var, merged_validity);
            } else {
                *target = DepthHypothesis::new(new_idepth, new_var, source.validity_counter);
            }
            nb_propagated += 1;
        }
    }
    grid.swap();
    nb_propagated
}

// TESTS #############################################################
