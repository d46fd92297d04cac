// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Estimation of the motion between a keyframe and a new frame.
//!
//! The keyframe point cloud is warped into the new frame and the photometric
//! error is minimized coarse to fine with a robust Levenberg-Marquardt optimizer.

pub mod lm_optimizer;

use log::{debug, warn};
use std::cell::RefCell;

use crate::core::config::Config;
use crate::core::frame::Frame;
use crate::core::track::lm_optimizer::{EvalData, LMOptimizerState, Obs, WarpedPoint};
use crate::math::optimizer::OptimizerState as _;
use crate::math::se3::Se3;
use crate::misc::type_aliases::Float;
use crate::Error;

/// Struct used for tracking frames against a keyframe.
pub struct Tracker {
    config: Config,
    scratch: RefCell<Vec<WarpedPoint>>,
}

/// Outcome of the tracking of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingResult {
    /// Motion from the tracked frame to the reference frame.
    /// Identity when tracking diverged.
    pub frame_to_ref: Se3,
    /// Too few points could be warped into the tracked frame.
    pub diverged: bool,
    /// Final verdict on the quality of the tracking.
    pub tracking_was_good: bool,
    /// Photometrically consistent points at the finest level.
    pub good_count: usize,
    /// Photometrically inconsistent points at the finest level.
    pub bad_count: usize,
    /// Mean of `min(1, z_ref / z_warped)` at the finest level.
    pub point_usage: Float,
    /// Final weighted residual normalized by the point usage.
    pub initial_residual: Float,
}

impl TrackingResult {
    fn diverged() -> Self {
        Self {
            frame_to_ref: Se3::identity(),
            diverged: true,
            tracking_was_good: false,
            good_count: 0,
            bad_count: 0,
            point_usage: 0.0,
            initial_residual: 0.0,
        }
    }
}

impl Tracker {
    /// Create a tracker for frames of the given full resolution size.
    /// Fails if the tracking levels of `config` are inconsistent.
    pub fn new(config: &Config, width: usize, height: usize) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            scratch: RefCell::new(Vec::with_capacity(width * height)),
        })
    }

    /// Estimate the motion of `target` relative to `reference`,
    /// starting from `frame_to_ref_initial`.
    ///
    /// Unless tracking diverged, the pose fields of `target` are set
    /// and the tracking history of `reference` is updated.
    #[allow(clippy::cast_precision_loss)]
    pub fn track(
        &mut self,
        reference: &mut Frame,
        target: &mut Frame,
        frame_to_ref_initial: &Se3,
    ) -> TrackingResult {
        let config = &self.config;
        let mut ref_to_frame = frame_to_ref_initial.inverse();
        let mut last_eval: Option<EvalData> = None;
        // Pyramids of small images stop before the configured levels.
        let max_level = config
            .tracking_max_level
            .min(reference.nb_levels())
            .min(target.nb_levels());
        if max_level <= config.tracking_min_level {
            warn!(
                "Frames {} and {} have {} pyramid levels, tracking needs more than {}",
                target.id(),
                reference.id(),
                max_level,
                config.tracking_min_level
            );
            return TrackingResult::diverged();
        }
        for level in (config.tracking_min_level..max_level).rev() {
            let obs = Obs {
                config,
                intrinsics: reference.intrinsics(level),
                cloud: reference.point_cloud(level),
                image: target.level(level),
                max_iterations: config.max_its_per_level[level],
                scratch: &self.scratch,
            };
            match LMOptimizerState::iterative_solve(&obs, ref_to_frame) {
                Ok((lm_state, nb_iter)) => {
                    debug!(
                        "Level {}: {} tries, {} accepted, energy {:.3}, {} good / {} bad",
                        level,
                        nb_iter,
                        lm_state.nb_accepted,
                        lm_state.eval_data.energy,
                        lm_state.eval_data.good_count,
                        lm_state.eval_data.bad_count
                    );
                    ref_to_frame = lm_state.eval_data.model;
                    last_eval = Some(lm_state.eval_data);
                }
                Err(failure) => {
                    warn!(
                        "Tracking of frame {} on {} diverged at level {}: {:?}",
                        target.id(),
                        reference.id(),
                        level,
                        failure
                    );
                    return TrackingResult::diverged();
                }
            }
        }
        let last_eval = match last_eval {
            Some(eval_data) => eval_data,
            None => return TrackingResult::diverged(),
        };

        let min_level = config.tracking_min_level;
        let area = (target.width(min_level) * target.height(min_level)) as Float;
        let good = last_eval.good_count as Float;
        let bad = last_eval.bad_count as Float;
        let tracking_was_good =
            good / area > config.min_goodperall_pixel && good / (good + bad) > config.min_goodpergoodbad_pixel;
        if tracking_was_good {
            reference.num_frames_tracked_on_this += 1;
        }

        let frame_to_ref = ref_to_frame.inverse();
        let initial_residual = last_eval.energy / last_eval.point_usage;
        target.initial_tracked_residual = initial_residual;
        target.this_to_parent = Some(frame_to_ref);
        target.cam_to_world = reference.cam_to_world * frame_to_ref;
        target.kf_id = Some(reference.id());
        reference.tracked_on_poses.push(frame_to_ref);

        TrackingResult {
            frame_to_ref,
            diverged: false,
            tracking_was_good,
            good_count: last_eval.good_count,
            bad_count: last_eval.bad_count,
            point_usage: last_eval.point_usage,
            initial_residual,
        }
    }
}

// TESTS #############################################################
