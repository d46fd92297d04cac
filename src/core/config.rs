// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tuning parameters of the depth estimation and tracking algorithms.
//!
//! A `Config` is built once (usually with `Config::default()`)
//! and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::misc::type_aliases::Float;
use crate::Error;

/// Configuration shared by the depth map, the tracker and the odometry driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Pyramids ------------------------------------------------------
    /// Number of levels in the multi-resolution pyramids of frames.
    pub pyramid_levels: usize,
    /// Tracking starts at level `tracking_max_level - 1`.
    pub tracking_max_level: usize,
    /// Finest level used for tracking.
    pub tracking_min_level: usize,

    // Depth variances -----------------------------------------------
    /// Hypotheses with a larger variance are removed.
    pub max_var: Float,
    /// Variance of randomly initialized and hole filled hypotheses.
    pub var_random_init_initial: Float,
    /// Variance of hypotheses initialized from a known depth map.
    pub var_gt_init_initial: Float,
    /// Validity counter of randomly initialized hypotheses.
    pub validity_counter_random_init: Float,
    /// Variance inflation before a successful observation is fused.
    pub succ_var_inc_fac: Float,
    /// Variance inflation after a failed observation.
    pub fail_var_inc_fac: Float,

    // Gradients -----------------------------------------------------
    /// Minimum absolute gradient to create a hypothesis.
    pub min_abs_grad_create: Float,
    /// Below this absolute gradient, a hypothesis is removed.
    pub min_abs_grad_decrease: Float,

    // Validity ------------------------------------------------------
    /// Constant part of the validity counter ceiling.
    pub validity_counter_max: Float,
    /// Gradient dependent part of the validity counter ceiling (for a gradient of 255).
    pub validity_counter_max_variable: Float,
    /// Increment on successful observation.
    pub validity_counter_inc: Float,
    /// Decrement on ambiguous observation.
    pub validity_counter_dec: Float,
    /// Validity of a hypothesis created by stereo.
    pub validity_counter_initial_observe: Float,
    /// Minimum 5x5 validity mass to fill a hole.
    pub val_sum_min_for_create: Float,
    /// Minimum 5x5 validity mass to keep a hypothesis when regularizing.
    pub val_sum_min_for_keep: Float,
    /// Minimum 5x5 validity mass to fill a blacklisted hole.
    pub val_sum_min_for_unblacklist: Float,
    /// Pixels blacklisted below this value are not observed anymore.
    pub min_blacklist: i32,

    // Epipolar line -------------------------------------------------
    /// Minimum squared gradient along the epipolar line.
    pub min_epl_grad_squared: Float,
    /// Minimum squared length of the epipolar line.
    pub min_epl_length_squared: Float,
    /// Minimum squared cosine between gradient and epipolar line.
    pub min_epl_angle_squared: Float,
    /// Minimum depth searched by stereo.
    pub min_depth: Float,

    // Stereo --------------------------------------------------------
    /// Refine stereo matches with sub-pixel interpolation.
    pub use_subpixel_stereo: bool,
    /// Maximum searched length along the epipolar line (pixels).
    pub max_epl_length_crop: Float,
    /// Minimum searched length along the epipolar line (pixels).
    pub min_epl_length_crop: Float,
    /// Distance between two samples along the epipolar line (pixels).
    pub gradient_sample_dist: Float,
    /// Searched points must stay this far from the image borders (pixels).
    pub sample_point_to_border: Float,
    /// Maximum accepted stereo matching error.
    pub max_error_stereo: Float,
    /// Best match must be this factor better than the second best.
    pub min_distance_error_stereo: Float,
    /// Search interval half-width, in standard deviations of the prior.
    pub stereo_epl_var_fac: Float,
    /// Variance of the image noise (intensity units squared).
    pub camera_pixel_noise2: Float,

    // Photometric consistency ---------------------------------------
    /// Constant part of the maximum squared residual.
    pub max_diff_constant: Float,
    /// Gradient dependent part of the maximum squared residual.
    pub max_diff_grad_mult: Float,

    // Regularization ------------------------------------------------
    /// Distance penalty of neighbours when regularizing.
    pub reg_dist_var: Float,
    /// Consistency factor of neighbours when regularizing.
    pub diff_fac_smoothing: Float,
    /// Consistency factor of a new observation.
    pub diff_fac_observe: Float,
    /// Consistency factor when merging propagated hypotheses.
    pub diff_fac_prop_merge: Float,

    // Tracking ------------------------------------------------------
    /// Maximum number of accepted iterations at each level.
    pub max_its_per_level: Vec<usize>,
    /// Initial Levenberg-Marquardt coefficient.
    pub lambda_initial: Float,
    /// A level has converged when `error / last_error` exceeds this.
    pub convergence_eps: Float,
    /// Weight of the inverse depth variance in the residual weights.
    pub var_weight: Float,
    /// Huber threshold.
    pub huber_d: Float,
    /// Levenberg-Marquardt coefficient factor after a success.
    pub lambda_success_fac: Float,
    /// Levenberg-Marquardt coefficient base factor after a failure.
    pub lambda_fail_fac: Float,
    /// Minimum squared norm of a step.
    pub step_size_min: Float,
    /// Minimum ratio of good pixels among good and bad ones.
    pub min_goodpergoodbad_pixel: Float,
    /// Minimum ratio of good pixels in the image.
    pub min_goodperall_pixel: Float,
    /// Below this ratio of warped pixels in the image, tracking diverged.
    pub min_goodperall_pixel_absmin: Float,

    // Keyframes -----------------------------------------------------
    /// Number of frames considered as the initialization phase.
    pub initialization_phase_count: usize,
    /// Minimum number of mappings of a keyframe before it can be replaced.
    pub min_num_mapped: usize,
    /// Weight of both terms of the keyframe closeness score.
    pub keyframe_score_weight: Float,
}

impl Default for Config {
    fn default() -> Self {
        let max_var = 0.5 * 0.5;
        Self {
            pyramid_levels: 5,
            tracking_max_level: 5,
            tracking_min_level: 1,

            max_var,
            var_random_init_initial: 0.5 * max_var,
            var_gt_init_initial: 0.01 * max_var,
            validity_counter_random_init: 20.0,
            succ_var_inc_fac: 1.01,
            fail_var_inc_fac: 1.1,

            min_abs_grad_create: 5.0,
            min_abs_grad_decrease: 5.0,

            validity_counter_max: 5.0,
            validity_counter_max_variable: 250.0,
            validity_counter_inc: 5.0,
            validity_counter_dec: 5.0,
            validity_counter_initial_observe: 5.0,
            val_sum_min_for_create: 30.0,
            val_sum_min_for_keep: 24.0,
            val_sum_min_for_unblacklist: 50.0,
            min_blacklist: -1,

            min_epl_grad_squared: 2.0 * 2.0,
            min_epl_length_squared: 1.0,
            min_epl_angle_squared: 0.3 * 0.3,
            min_depth: 0.05,

            use_subpixel_stereo: true,
            max_epl_length_crop: 30.0,
            min_epl_length_crop: 3.0,
            gradient_sample_dist: 1.0,
            sample_point_to_border: 7.0,
            max_error_stereo: 1300.0,
            min_distance_error_stereo: 1.5,
            stereo_epl_var_fac: 2.0,
            camera_pixel_noise2: 4.0 * 4.0,

            max_diff_constant: 40.0 * 40.0,
            max_diff_grad_mult: 0.5 * 0.5,

            reg_dist_var: 0.075 * 0.075,
            diff_fac_smoothing: 1.0,
            diff_fac_observe: 1.0,
            diff_fac_prop_merge: 1.0,

            max_its_per_level: vec![5, 20, 50, 100, 100],
            lambda_initial: 0.0,
            convergence_eps: 0.999,
            var_weight: 1.0,
            huber_d: 3.0,
            lambda_success_fac: 0.5,
            lambda_fail_fac: 2.0,
            step_size_min: 1e-8,
            min_goodpergoodbad_pixel: 0.5,
            min_goodperall_pixel: 0.04,
            min_goodperall_pixel_absmin: 0.01,

            initialization_phase_count: 5,
            min_num_mapped: 5,
            keyframe_score_weight: 3.0 * 4.0,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file.
    /// Missing fields take their default value.
    pub fn from_json_file<P: AsRef<Path>>(file_path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(file_path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the consistency of the pyramid related parameters.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tracking_max_level > self.pyramid_levels
            || self.tracking_min_level >= self.tracking_max_level
        {
            return Err(Error::InvalidConfig(format!(
                "tracking levels [{}, {}) do not fit in {} pyramid levels",
                self.tracking_min_level, self.tracking_max_level, self.pyramid_levels
            )));
        }
        if self.max_its_per_level.len() < self.tracking_max_level {
            return Err(Error::InvalidConfig(format!(
                "max_its_per_level needs {} values, got {}",
                self.tracking_max_level,
                self.max_its_per_level.len()
            )));
        }
        if self.max_its_per_level.contains(&0) {
            return Err(Error::InvalidConfig(
                "max_its_per_level values must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Maximum inverse depth searched by stereo.
    pub fn max_idepth(&self) -> Float {
        1.0 / self.min_depth
    }

    /// Gradient dependent ceiling of the validity counter.
    pub fn validity_ceiling(&self, abs_grad: Float) -> Float {
        self.validity_counter_max + abs_grad * self.validity_counter_max_variable / 255.0
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "huber_d": 2.0, "min_depth": 0.1 }"#)
            .expect("valid json");
        assert_eq!(config.huber_d, 2.0);
        assert_eq!(config.max_idepth(), 10.0);
        assert_eq!(config.max_its_per_level, Config::default().max_its_per_level);
    }

    #[test]
    fn too_few_iteration_counts_are_rejected() {
        let config = Config {
            max_its_per_level: vec![5, 20],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validity_ceiling_grows_with_gradient() {
        let config = Config::default();
        assert_eq!(config.validity_ceiling(0.0), 5.0);
        assert_eq!(config.validity_ceiling(255.0), 255.0);
    }
}
