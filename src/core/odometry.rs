// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visual odometry driver: tracks each new frame on the active keyframe,
//! then refines the keyframe depth or replaces the keyframe.

use log::{debug, info};
use rand::Rng;

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::depth::DepthMap;
use crate::core::frame::Frame;
use crate::core::track::{Tracker, TrackingResult};
use crate::math::se3::Se3;
use crate::misc::type_aliases::{Float, Image};
use crate::Error;

/// What the depth map did with a tracked frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingAction {
    /// The frame was dropped: tracking diverged or was bad after initialization.
    Rejected,
    /// The keyframe depth was refined with the frame.
    KeyframeUpdated,
    /// The frame became the new keyframe.
    KeyframeCreated,
    /// Tracking was bad, the keyframe depth was finalized.
    KeyframeFinalized,
    /// Tracking was bad, nothing was mapped.
    Skipped,
}

/// Result of `Odometry::track_frame`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutcome {
    /// Id given to the frame.
    pub frame_id: usize,
    /// Tracking diagnostics.
    pub tracking: TrackingResult,
    /// Mapping step done with the frame.
    pub action: MappingAction,
    /// Estimated pose of the frame, meaningless if rejected.
    pub cam_to_world: Se3,
}

/// Tracking and mapping state of a monocular video stream.
pub struct Odometry {
    config: Config,
    intrinsics: Intrinsics,
    width: usize,
    height: usize,
    depth_map: DepthMap,
    tracker: Tracker,
    nb_accepted_frames: usize,
    next_id: usize,
    last_pose: Se3,
}

impl Odometry {
    /// Prepare the odometry for frames of the given size.
    /// `intrinsics` are the camera parameters at full resolution.
    pub fn new(
        config: &Config,
        intrinsics: &Intrinsics,
        width: usize,
        height: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            config: config.clone(),
            intrinsics: *intrinsics,
            width,
            height,
            depth_map: DepthMap::new(config, intrinsics, width, height),
            tracker: Tracker::new(config, width, height)?,
            nb_accepted_frames: 0,
            next_id: 0,
            last_pose: Se3::identity(),
        })
    }

    /// Start from a first image with random inverse depths.
    pub fn random_init<R: Rng>(&mut self, image: Image, rng: &mut R) -> Result<(), Error> {
        let frame = self.new_frame(image)?;
        self.depth_map.initialize_randomly(frame, rng)?;
        self.start();
        Ok(())
    }

    /// Start from a first image with a known depth map.
    pub fn depth_init(&mut self, image: Image, depth: &Image) -> Result<(), Error> {
        let frame = self.new_frame(image)?;
        self.depth_map.initialize_from_depth(frame, depth)?;
        self.start();
        Ok(())
    }

    fn start(&mut self) {
        self.nb_accepted_frames = 1;
        self.last_pose = Se3::identity();
    }

    fn new_frame(&mut self, image: Image) -> Result<Frame, Error> {
        if image.shape() != (self.width, self.height) {
            return Err(Error::WrongImageSize {
                expected: (self.width, self.height),
                actual: image.shape(),
            });
        }
        let frame = Frame::new(self.next_id, image, &self.intrinsics, self.config.pyramid_levels);
        self.next_id += 1;
        Ok(frame)
    }

    /// Track a new image on the active keyframe, then map it.
    pub fn track_frame(&mut self, image: Image) -> Result<FrameOutcome, Error> {
        if !self.depth_map.is_valid() {
            return Err(Error::NoActiveKeyframe);
        }
        let mut frame = self.new_frame(image)?;
        let keyframe = self.depth_map.keyframe_mut().ok_or(Error::NoActiveKeyframe)?;
        let initial_estimate = keyframe.cam_to_world.inverse() * self.last_pose;
        let tracking = self.tracker.track(keyframe, &mut frame, &initial_estimate);
        let num_mapped = keyframe.num_mapped_on_this;
        let mean_idepth = keyframe.mean_idepth;

        let outcome = |action| FrameOutcome {
            frame_id: frame.id(),
            tracking,
            action,
            cam_to_world: frame.cam_to_world,
        };
        if !tracking.diverged {
            self.last_pose = frame.cam_to_world;
        }
        let init_phase = self.config.initialization_phase_count;
        if tracking.diverged || (self.nb_accepted_frames > init_phase && !tracking.tracking_was_good) {
            info!(
                "Frame {} rejected (diverged: {}, good: {})",
                frame.id(),
                tracking.diverged,
                tracking.tracking_was_good
            );
            return Ok(outcome(MappingAction::Rejected));
        }
        self.nb_accepted_frames += 1;

        let create_keyframe = num_mapped > self.config.min_num_mapped && {
            let dist = tracking.frame_to_ref.translation() * mean_idepth;
            let score = keyframe_score(
                self.config.keyframe_score_weight,
                dist.norm_squared(),
                tracking.point_usage,
            );
            let threshold = keyframe_threshold(self.nb_accepted_frames, init_phase);
            debug!("Keyframe closeness score {:.3} (threshold {:.3})", score, threshold);
            score > threshold
        };

        let action = if tracking.tracking_was_good {
            if create_keyframe {
                let result = outcome(MappingAction::KeyframeCreated);
                self.depth_map.finalize_keyframe()?;
                let old_keyframe = self.depth_map.create_keyframe(frame)?;
                info!(
                    "Keyframe {} replaced by {} after {} mappings",
                    old_keyframe.id(),
                    result.frame_id,
                    old_keyframe.num_mapped_on_this
                );
                return Ok(result);
            }
            let stats = self.depth_map.update_keyframe(&frame)?;
            debug!("Keyframe updated with frame {}: {:?}", frame.id(), stats);
            MappingAction::KeyframeUpdated
        } else if num_mapped >= self.config.min_num_mapped {
            self.depth_map.finalize_keyframe()?;
            MappingAction::KeyframeFinalized
        } else {
            MappingAction::Skipped
        };
        Ok(outcome(action))
    }

    /// Pose of the active keyframe.
    pub fn keyframe_pose(&self) -> Option<Se3> {
        self.depth_map.keyframe().map(|keyframe| keyframe.cam_to_world)
    }

    /// Pose of the last tracked frame.
    pub fn current_pose(&self) -> Se3 {
        self.last_pose
    }

    /// The depth map of the active keyframe.
    pub fn depth_map(&self) -> &DepthMap {
        &self.depth_map
    }
}

/// Closeness score of a frame to its keyframe.
///
/// `dist_2` is the squared translation scaled by the keyframe mean inverse depth.
pub fn keyframe_score(weight: Float, dist_2: Float, point_usage: Float) -> Float {
    weight * (dist_2 + (1.0 - point_usage) * (1.0 - point_usage))
}

/// Score above which a new keyframe is created,
/// lowered while few frames were accepted.
#[allow(clippy::cast_precision_loss)]
pub fn keyframe_threshold(nb_accepted_frames: usize, initialization_phase_count: usize) -> Float {
    let nb = nb_accepted_frames as Float;
    let init = initialization_phase_count.max(1) as Float;
    let threshold = (0.2 + nb * 0.8 / init).min(1.0);
    if nb_accepted_frames < initialization_phase_count {
        0.7 * threshold
    } else {
        threshold
    }
}

// TESTS #############################################################
