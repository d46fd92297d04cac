// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Semi-dense inverse depth map of the active keyframe.
//!
//! The depth map owns the active keyframe and a grid of per pixel
//! inverse depth hypotheses, refined by stereo observations from tracked frames,
//! then regularized and handed back to the keyframe as its depth.

pub mod grid;
pub mod hypothesis;
pub mod propagate;
pub mod regularize;
pub mod stereo;

use log::{debug, info, warn};
use rand::Rng;

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::frame::Frame;
use crate::misc::type_aliases::{Float, Image};
use crate::Error;

use self::grid::{DoubleBuffer, SummedArea};
use self::hypothesis::{unzero, DepthHypothesis};
use self::stereo::{StereoContext, StereoFailure, StereoGeometry};

/// Per pixel inverse depth estimation of the active keyframe.
pub struct DepthMap {
    config: Config,
    intrinsics: Intrinsics,
    width: usize,
    height: usize,
    grid: DoubleBuffer<DepthHypothesis>,
    validity: SummedArea,
    keyframe: Option<Frame>,
}

/// Outcome counts of one stereo observation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObserveStats {
    /// New hypotheses created.
    pub created: usize,
    /// Hypotheses fused with a new observation.
    pub updated: usize,
    /// Stereo searches or epipolar checks that failed.
    pub failed: usize,
    /// Hypotheses invalidated.
    pub invalidated: usize,
}

impl DepthMap {
    /// Empty depth map for images of the given size.
    /// `intrinsics` are the full resolution camera parameters.
    pub fn new(config: &Config, intrinsics: &Intrinsics, width: usize, height: usize) -> Self {
        Self {
            config: config.clone(),
            intrinsics: *intrinsics,
            width,
            height,
            grid: DoubleBuffer::new(width * height, DepthHypothesis::invalid()),
            validity: SummedArea::new(width, height),
            keyframe: None,
        }
    }

    /// True once a keyframe is active.
    pub fn is_valid(&self) -> bool {
        self.keyframe.is_some()
    }

    /// The active keyframe.
    pub fn keyframe(&self) -> Option<&Frame> {
        self.keyframe.as_ref()
    }

    /// The active keyframe, mutably (for the tracker counters).
    pub fn keyframe_mut(&mut self) -> Option<&mut Frame> {
        self.keyframe.as_mut()
    }

    /// Current hypotheses, indexed by `x + y * width`.
    pub fn hypotheses(&self) -> &[DepthHypothesis] {
        self.grid.current()
    }

    /// Hypothesis at a pixel.
    pub fn hypothesis(&self, x: usize, y: usize) -> &DepthHypothesis {
        &self.grid.current()[x + y * self.width]
    }

    fn check_size(&self, frame: &Frame) -> Result<(), Error> {
        let actual = (frame.width(0), frame.height(0));
        if actual == (self.width, self.height) {
            Ok(())
        } else {
            Err(Error::WrongImageSize {
                expected: (self.width, self.height),
                actual,
            })
        }
    }

    /// Activate `frame` as keyframe with random inverse depths in [0.5, 1.5]
    /// at every textured interior pixel.
    pub fn initialize_randomly<R: Rng>(&mut self, frame: Frame, rng: &mut R) -> Result<(), Error> {
        self.check_size(&frame)?;
        let config = &self.config;
        let gradient_max = &frame.level(0).gradient_max;
        let width = self.width;
        let mut nb_good = 0;
        for (idx, h) in self.grid.current_mut().iter_mut().enumerate() {
            let (x, y) = (idx % width, idx / width);
            let interior = x >= 1 && y >= 1 && x + 1 < width && y + 1 < self.height;
            if interior && gradient_max[(x, y)] > config.min_abs_grad_create {
                *h = DepthHypothesis::new(
                    rng.gen_range(0.5..=1.5),
                    config.var_random_init_initial,
                    config.validity_counter_random_init,
                );
                nb_good += 1;
            } else {
                *h = DepthHypothesis::invalid();
            }
        }
        info!("Random depth initialization of frame {} with {} points", frame.id(), nb_good);
        self.activate(frame);
        Ok(())
    }

    /// Activate `frame` as keyframe with a known depth map (depth, not inverse depth).
    /// Non positive depths are considered unknown.
    pub fn initialize_from_depth(&mut self, frame: Frame, depth: &Image) -> Result<(), Error> {
        self.check_size(&frame)?;
        if depth.shape() != (self.width, self.height) {
            return Err(Error::WrongImageSize {
                expected: (self.width, self.height),
                actual: depth.shape(),
            });
        }
        let config = &self.config;
        let width = self.width;
        for (idx, h) in self.grid.current_mut().iter_mut().enumerate() {
            let (x, y) = (idx % width, idx / width);
            let interior = x >= 1 && y >= 1 && x + 1 < width && y + 1 < self.height;
            let z = depth[(x, y)];
            *h = if interior && z > 0.0 {
                DepthHypothesis::new(
                    1.0 / z,
                    config.var_gt_init_initial,
                    config.validity_counter_random_init,
                )
            } else {
                DepthHypothesis::invalid()
            };
        }
        self.activate(frame);
        Ok(())
    }

    fn activate(&mut self, mut frame: Frame) {
        frame.set_depth(self.grid.current(), self.config.min_abs_grad_create);
        self.keyframe = Some(frame);
    }

    /// Refine the hypotheses with stereo observations from a tracked frame,
    /// then fill holes, regularize and update the keyframe depth.
    pub fn update_keyframe(&mut self, frame: &Frame) -> Result<ObserveStats, Error> {
        self.check_size(frame)?;
        let keyframe = self.keyframe.as_ref().ok_or(Error::NoActiveKeyframe)?;
        let this_to_parent = frame.this_to_parent.ok_or(Error::UntrackedFrame(frame.id()))?;
        let ref_to_kf = if frame.kf_id == Some(keyframe.id()) {
            this_to_parent
        } else {
            warn!(
                "Updating keyframe {} with frame {}, which was tracked on {:?}",
                keyframe.id(),
                frame.id(),
                frame.kf_id
            );
            keyframe.cam_to_world.inverse() * frame.cam_to_world
        };

        let geometry = StereoGeometry::new(&self.intrinsics, &ref_to_kf);
        let context = StereoContext::new(
            &self.config,
            &geometry,
            keyframe.level(0),
            &frame.level(0).intensity,
            frame.initial_tracked_residual,
        );
        let stats = observe_depth(
            self.grid.current_mut(),
            self.width,
            &keyframe.level(0).gradient_max,
            &context,
            &self.config,
        );
        debug!("Frame {} observation: {:?}", frame.id(), stats);

        self.fill_holes()?;
        regularize::regularize(
            &mut self.grid,
            self.width,
            &self.config,
            false,
            self.config.val_sum_min_for_keep,
        );
        let keyframe = self.keyframe.as_mut().ok_or(Error::NoActiveKeyframe)?;
        keyframe.set_depth(self.grid.current(), self.config.min_abs_grad_create);
        keyframe.num_mapped_on_this += 1;
        Ok(stats)
    }

    /// Final hole filling and regularization of the active keyframe,
    /// handed to it as definitive depth.
    pub fn finalize_keyframe(&mut self) -> Result<(), Error> {
        self.fill_holes()?;
        regularize::regularize(
            &mut self.grid,
            self.width,
            &self.config,
            false,
            self.config.val_sum_min_for_keep,
        );
        let keyframe = self.keyframe.as_mut().ok_or(Error::NoActiveKeyframe)?;
        keyframe.set_depth(self.grid.current(), self.config.min_abs_grad_create);
        Ok(())
    }

    /// Propagate the hypotheses into `frame` and make it the active keyframe.
    ///
    /// The depth is rescaled so that the mean smoothed inverse depth is 1.
    /// Returns the previous keyframe.
    pub fn create_keyframe(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        self.check_size(&frame)?;
        let old_keyframe = self.keyframe.take().ok_or(Error::NoActiveKeyframe)?;
        let old_to_new = match frame.this_to_parent {
            Some(this_to_parent) if frame.kf_id == Some(old_keyframe.id()) => this_to_parent.inverse(),
            _ => {
                warn!(
                    "Propagating depth from frame {} to frame {}, which was tracked on {:?}",
                    old_keyframe.id(),
                    frame.id(),
                    frame.kf_id
                );
                frame.cam_to_world.inverse() * old_keyframe.cam_to_world
            }
        };

        let nb_propagated =
            propagate::propagate(&mut self.grid, &old_keyframe, &frame, &old_to_new, &self.config);
        debug!(
            "Propagated {} hypotheses from keyframe {} to frame {}",
            nb_propagated,
            old_keyframe.id(),
            frame.id()
        );

        let keep = self.config.val_sum_min_for_keep;
        regularize::regularize(&mut self.grid, self.width, &self.config, true, keep);
        regularize::fill_holes(
            &mut self.grid,
            &mut self.validity,
            self.width,
            &frame.level(0).gradient_max,
            &self.config,
        );
        regularize::regularize(&mut self.grid, self.width, &self.config, false, keep);
        self.rescale_to_unit_mean();

        frame.set_depth(self.grid.current(), self.config.min_abs_grad_create);
        info!(
            "Keyframe {} created with {} points",
            frame.id(),
            frame.num_points
        );
        self.keyframe = Some(frame);
        Ok(old_keyframe)
    }

    fn fill_holes(&mut self) -> Result<(), Error> {
        let keyframe = self.keyframe.as_ref().ok_or(Error::NoActiveKeyframe)?;
        regularize::fill_holes(
            &mut self.grid,
            &mut self.validity,
            self.width,
            &keyframe.level(0).gradient_max,
            &self.config,
        );
        Ok(())
    }

    /// Scale all valid hypotheses so that their mean smoothed inverse depth is 1.
    #[allow(clippy::cast_precision_loss)]
    fn rescale_to_unit_mean(&mut self) {
        let (sum, count) = self
            .grid
            .current()
            .iter()
            .filter(|h| h.is_valid)
            .fold((0.0, 0_usize), |(sum, count), h| (sum + h.idepth_smoothed, count + 1));
        if count == 0 || !(sum > 0.0) {
            warn!("Cannot rescale a depth map with {} points summing to {}", count, sum);
            return;
        }
        let factor: Float = count as Float / sum;
        let factor_2 = factor * factor;
        for h in self.grid.current_mut().iter_mut().filter(|h| h.is_valid) {
            h.idepth *= factor;
            h.idepth_smoothed *= factor;
            h.idepth_var *= factor_2;
            h.idepth_var_smoothed *= factor_2;
        }
    }
}

/// Stereo observation of every eligible interior pixel (3 pixels margin).
fn observe_depth(
    grid: &mut [DepthHypothesis],
    width: usize,
    gradient_max: &Image,
    context: &StereoContext,
    config: &Config,
) -> ObserveStats {
    let height = grid.len() / width;
    let mut stats = ObserveStats::default();
    for y in 3..height.saturating_sub(3) {
        for x in 3..width.saturating_sub(3) {
            let h = &mut grid[x + y * width];
            let abs_grad = gradient_max[(x, y)];
            if h.is_valid && abs_grad < config.min_abs_grad_decrease {
                h.invalidate();
                stats.invalidated += 1;
                continue;
            }
            if abs_grad < config.min_abs_grad_create || h.blacklisted < config.min_blacklist {
                continue;
            }
            if h.is_valid {
                observe_update(h, x, y, abs_grad, context, config, &mut stats);
            } else {
                observe_create(h, x, y, context, config, &mut stats);
            }
        }
    }
    stats
}

/// First stereo observation of a pixel, over the whole inverse depth range.
#[allow(clippy::cast_precision_loss)]
fn observe_create(
    h: &mut DepthHypothesis,
    x: usize,
    y: usize,
    context: &StereoContext,
    config: &Config,
    stats: &mut ObserveStats,
) {
    let epn = match context.make_and_check_epl(x, y) {
        Some(epn) => epn,
        None => {
            stats.failed += 1;
            return;
        }
    };
    match context.line_stereo(x as Float, y as Float, epn, 0.0, 1.0, config.max_idepth()) {
        Ok(m) if m.variance <= config.max_var => {
            *h = DepthHypothesis::new(
                unzero(m.idepth),
                m.variance,
                config.validity_counter_initial_observe,
            );
            stats.created += 1;
        }
        Err(StereoFailure::Ambiguous) | Err(StereoFailure::ErrorTooHigh) => {
            h.blacklisted -= 1;
            stats.failed += 1;
        }
        _ => stats.failed += 1,
    }
}

/// Stereo observation of a pixel with a prior, fused on success.
#[allow(clippy::cast_precision_loss)]
fn observe_update(
    h: &mut DepthHypothesis,
    x: usize,
    y: usize,
    abs_grad: Float,
    context: &StereoContext,
    config: &Config,
    stats: &mut ObserveStats,
) {
    let epn = match context.make_and_check_epl(x, y) {
        Some(epn) => epn,
        None => {
            stats.failed += 1;
            return;
        }
    };
    let std = h.smoothed_std();
    let min_idepth = (h.idepth_smoothed - std * config.stereo_epl_var_fac).max(0.0);
    let max_idepth = (h.idepth_smoothed + std * config.stereo_epl_var_fac).min(config.max_idepth());
    let result = context.line_stereo(
        x as Float,
        y as Float,
        epn,
        min_idepth,
        h.idepth_smoothed,
        max_idepth,
    );
    match result {
        // Pixel left the image but might come back.
        Err(StereoFailure::OutOfBounds) => stats.failed += 1,
        // Not good for stereo (inconsistent minimum, NaN or empty segment).
        Err(StereoFailure::Ambiguous) | Err(StereoFailure::Degenerate) => {
            stats.failed += 1;
            h.decrease_validity(config.validity_counter_dec);
            if h.inflate_variance(config.fail_var_inc_fac, config.max_var) {
                h.invalidate();
                h.blacklisted -= 1;
                stats.invalidated += 1;
            }
        }
        Err(StereoFailure::ErrorTooHigh) => stats.failed += 1,
        Ok(m) => {
            let diff = m.idepth - h.idepth_smoothed;
            if config.diff_fac_observe * diff * diff > m.variance + h.idepth_var_smoothed {
                stats.failed += 1;
                if h.inflate_variance(config.fail_var_inc_fac, config.max_var) {
                    h.invalidate();
                    stats.invalidated += 1;
                }
            } else {
                h.kalman_update(m.idepth, m.variance, config.succ_var_inc_fac);
                h.increase_validity(config.validity_counter_inc, config.validity_ceiling(abs_grad));
                stats.updated += 1;
            }
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::synthetic::{self, Plane, HEIGHT, WIDTH};
    use crate::math::se3::Se3;
    use crate::misc::type_aliases::Vec3;
    use rand::{rngs::StdRng, SeedableRng};

    fn frame(id: usize, plane: &Plane, pose: Se3) -> (Frame, Image) {
        let intrinsics = synthetic::intrinsics();
        let (img, depth) = synthetic::render(plane, &pose, &intrinsics);
        let mut frame = Frame::new(id, img, &intrinsics, 3);
        frame.cam_to_world = pose;
        (frame, depth)
    }

    /// Mark `frame` as tracked on `keyframe` with its exact pose.
    fn tracked_on(frame: &mut Frame, keyframe: &Frame) {
        frame.this_to_parent = Some(keyframe.cam_to_world.inverse() * frame.cam_to_world);
        frame.kf_id = Some(keyframe.id());
    }

    fn depth_map() -> DepthMap {
        DepthMap::new(&Config::default(), &synthetic::intrinsics(), WIDTH, HEIGHT)
    }

    fn mean_smoothed_idepth(depth_map: &DepthMap) -> (Float, usize) {
        let valid: Vec<_> = depth_map.hypotheses().iter().filter(|h| h.is_valid).collect();
        let sum: Float = valid.iter().map(|h| h.idepth_smoothed).sum();
        (sum / valid.len() as Float, valid.len())
    }

    #[test]
    fn uninitialized_map_is_rejected() {
        let mut depth_map = depth_map();
        assert!(!depth_map.is_valid());
        let plane = Plane::fronto_parallel(1.0);
        let (mut f, _) = frame(1, &plane, Se3::identity());
        f.this_to_parent = Some(Se3::identity());
        assert!(matches!(depth_map.update_keyframe(&f), Err(Error::NoActiveKeyframe)));
        assert!(matches!(depth_map.finalize_keyframe(), Err(Error::NoActiveKeyframe)));
        assert!(matches!(depth_map.create_keyframe(f), Err(Error::NoActiveKeyframe)));
    }

    #[test]
    fn wrong_size_is_rejected() {
        let mut depth_map = DepthMap::new(&Config::default(), &synthetic::intrinsics(), 320, 240);
        let (f, _) = frame(0, &Plane::fronto_parallel(1.0), Se3::identity());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            depth_map.initialize_randomly(f, &mut rng),
            Err(Error::WrongImageSize { .. })
        ));
    }

    #[test]
    fn random_initialization() {
        let mut depth_map = depth_map();
        let (f, _) = frame(0, &Plane::fronto_parallel(1.0), Se3::identity());
        let mut rng = StdRng::seed_from_u64(7);
        depth_map.initialize_randomly(f, &mut rng).unwrap();
        assert!(depth_map.is_valid());
        let config = Config::default();
        let keyframe = depth_map.keyframe().unwrap();
        let mut nb_valid = 0;
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let h = depth_map.hypothesis(x, y);
                let textured = keyframe.level(0).gradient_max[(x, y)] > config.min_abs_grad_create;
                let border = x == 0 || y == 0 || x == WIDTH - 1 || y == HEIGHT - 1;
                assert_eq!(h.is_valid, textured && !border);
                if h.is_valid {
                    nb_valid += 1;
                    assert!(h.idepth >= 0.5 && h.idepth <= 1.5);
                    assert_eq!(h.idepth_var, config.var_random_init_initial);
                    assert_eq!(h.validity_counter, 20.0);
                }
            }
        }
        assert!(nb_valid > 0);
        assert_eq!(keyframe.num_points, nb_valid);
        assert!(keyframe.has_depth());
    }

    #[test]
    fn untracked_frame_is_rejected() {
        let mut depth_map = depth_map();
        let plane = Plane::fronto_parallel(1.0);
        let (kf, _) = frame(0, &plane, Se3::identity());
        let mut rng = StdRng::seed_from_u64(7);
        depth_map.initialize_randomly(kf, &mut rng).unwrap();
        let (f, _) = frame(1, &plane, Se3::from_translation(Vec3::new(0.03, 0.0, 0.0)));
        assert!(matches!(depth_map.update_keyframe(&f), Err(Error::UntrackedFrame(1))));
    }

    #[test]
    fn observations_converge_from_random_init() {
        let mut depth_map = depth_map();
        let plane = Plane::fronto_parallel(1.0);
        let (kf, _) = frame(0, &plane, Se3::identity());
        let mut rng = StdRng::seed_from_u64(3);
        depth_map.initialize_randomly(kf, &mut rng).unwrap();
        for (i, &tx) in [0.01, 0.02, 0.03, 0.04, 0.05, 0.06].iter().enumerate() {
            let (mut f, _) = frame(i + 1, &plane, Se3::from_translation(Vec3::new(tx, 0.0, 0.0)));
            tracked_on(&mut f, depth_map.keyframe().unwrap());
            depth_map.update_keyframe(&f).unwrap();
        }
        let keyframe = depth_map.keyframe().unwrap();
        assert_eq!(keyframe.num_mapped_on_this, 6);
        let (mean, nb) = mean_smoothed_idepth(&depth_map);
        assert!(nb > 1000);
        assert!((mean - 1.0).abs() < 0.1, "mean inverse depth {}", mean);
        let nb_accurate = depth_map
            .hypotheses()
            .iter()
            .filter(|h| h.is_valid && (h.idepth_smoothed - 1.0).abs() < 0.05)
            .count();
        assert!(nb_accurate * 10 > nb * 6, "{} accurate out of {}", nb_accurate, nb);
    }

    #[test]
    fn stereo_update_refines_a_known_depth() {
        let mut depth_map = depth_map();
        let plane = Plane::fronto_parallel(1.0);
        let (kf, depth) = frame(0, &plane, Se3::identity());
        depth_map.initialize_from_depth(kf, &depth).unwrap();
        let initial_var = Config::default().var_gt_init_initial;
        let (mut f, _) = frame(1, &plane, Se3::from_translation(Vec3::new(0.03, 0.0, 0.0)));
        tracked_on(&mut f, depth_map.keyframe().unwrap());
        let stats = depth_map.update_keyframe(&f).unwrap();
        assert!(stats.updated > 1000, "{:?}", stats);
        let refined = depth_map
            .hypotheses()
            .iter()
            .filter(|h| h.is_valid && h.idepth_var < initial_var)
            .count();
        assert!(refined > 1000);
        let (mean, _) = mean_smoothed_idepth(&depth_map);
        assert!((mean - 1.0).abs() < 0.02, "mean inverse depth {}", mean);
    }

    /// One update observation of the stripes keyframe pixel (320, 240)
    /// against `reference`, from a lateral baseline of 3cm.
    fn observe_stripes(h: &mut DepthHypothesis, reference: &Image) -> ObserveStats {
        let config = Config::default();
        let intrinsics = synthetic::intrinsics();
        let keyframe = Frame::new(0, synthetic::stripes(8.0, 0.0), &intrinsics, 1);
        let ref_to_kf = Se3::from_translation(Vec3::new(0.03, 0.0, 0.0));
        let geometry = StereoGeometry::new(&intrinsics, &ref_to_kf);
        let context = StereoContext::new(&config, &geometry, keyframe.level(0), reference, 0.0);
        let abs_grad = keyframe.level(0).gradient_max[(320, 240)];
        let mut stats = ObserveStats::default();
        observe_update(h, 320, 240, abs_grad, &context, &config, &mut stats);
        stats
    }

    #[test]
    fn ambiguous_observation_inflates_variance() {
        let config = Config::default();
        let mut h = DepthHypothesis::new(1.0, 0.15, 20.0);
        let stats = observe_stripes(&mut h, &synthetic::stripes(8.0, 5.0));
        assert_eq!(stats.failed, 1);
        assert!(h.is_valid);
        approx::assert_relative_eq!(h.idepth_var, 0.15 * config.fail_var_inc_fac);
        assert_eq!(h.validity_counter, 20.0 - config.validity_counter_dec);
        assert_eq!(h.idepth, 1.0);
    }

    #[test]
    fn degenerate_observation_inflates_variance() {
        let config = Config::default();
        // A null smoothed variance gives an empty search interval.
        let mut h = DepthHypothesis::new(1.0, 0.1, 20.0);
        h.idepth_var_smoothed = 0.0;
        let stats = observe_stripes(&mut h, &synthetic::stripes(8.0, 0.0));
        assert_eq!(stats.failed, 1);
        assert!(h.is_valid);
        approx::assert_relative_eq!(h.idepth_var, 0.1 * config.fail_var_inc_fac);
        assert_eq!(h.validity_counter, 20.0 - config.validity_counter_dec);
    }

    #[test]
    fn degenerate_observation_past_max_var_invalidates() {
        let mut h = DepthHypothesis::new(1.0, 0.24, 20.0);
        h.idepth_var_smoothed = 0.0;
        let stats = observe_stripes(&mut h, &synthetic::stripes(8.0, 0.0));
        assert_eq!(stats.invalidated, 1);
        assert!(!h.is_valid);
        assert_eq!(h.blacklisted, -1);
    }

    #[test]
    fn unmatched_observation_leaves_hypothesis_untouched() {
        let h_before = DepthHypothesis::new(1.0, 0.15, 20.0);
        let mut h = h_before;
        let saturated = Image::from_element(WIDTH, HEIGHT, 1000.0);
        let stats = observe_stripes(&mut h, &saturated);
        assert_eq!(stats.failed, 1);
        assert_eq!(h, h_before);
    }

    #[test]
    fn out_of_bounds_observation_leaves_hypothesis_untouched() {
        let config = Config::default();
        let intrinsics = synthetic::intrinsics();
        let stripes = synthetic::stripes(8.0, 0.0);
        let keyframe = Frame::new(0, stripes.clone(), &intrinsics, 1);
        let ref_to_kf = Se3::from_translation(Vec3::new(0.03, 0.0, 0.0));
        let geometry = StereoGeometry::new(&intrinsics, &ref_to_kf);
        let context = StereoContext::new(&config, &geometry, keyframe.level(0), &stripes, 0.0);
        let h_before = DepthHypothesis::new(1.0, 0.15, 20.0);
        let mut h = h_before;
        let mut stats = ObserveStats::default();
        // The 5 samples around the first column leave the image.
        let abs_grad = keyframe.level(0).gradient_max[(1, 240)];
        observe_update(&mut h, 1, 240, abs_grad, &context, &config, &mut stats);
        assert_eq!(stats.failed, 1);
        assert_eq!(h, h_before);
    }

    #[test]
    fn create_then_finalize_has_unit_mean_idepth() {
        let mut depth_map = depth_map();
        let plane = Plane::tilted(2.0, 0.25);
        let (kf, depth) = frame(0, &plane, Se3::identity());
        depth_map.initialize_from_depth(kf, &depth).unwrap();
        let new_pose = Se3::from_translation(Vec3::new(0.05, 0.0, 0.1));
        let (mut new_kf, new_depth) = frame(1, &plane, new_pose);
        tracked_on(&mut new_kf, depth_map.keyframe().unwrap());

        let old = depth_map.create_keyframe(new_kf).unwrap();
        assert_eq!(old.id(), 0);
        assert_eq!(depth_map.keyframe().unwrap().id(), 1);
        let (mean, nb) = mean_smoothed_idepth(&depth_map);
        assert!(nb > 1000);
        approx::assert_relative_eq!(mean, 1.0, epsilon = 1e-9);

        // The plane is closer at the bottom of the image.
        let band_mean = |rows: std::ops::Range<usize>| {
            let values: Vec<Float> = rows
                .flat_map(|y| (0..WIDTH).map(move |x| (x, y)))
                .map(|(x, y)| depth_map.hypothesis(x, y))
                .filter(|h| h.is_valid)
                .map(|h| h.idepth_smoothed)
                .collect();
            values.iter().sum::<Float>() / values.len() as Float
        };
        let (top, bottom) = (band_mean(20..160), band_mean(320..460));
        assert!(bottom > top, "top {}, bottom {}", top, bottom);

        // Up to the global scale, the inverse depths are the true ones.
        let scaled: Vec<(Float, Float)> = (0..WIDTH * HEIGHT)
            .filter(|&idx| depth_map.hypotheses()[idx].is_valid)
            .map(|idx| {
                let (x, y) = (idx % WIDTH, idx / WIDTH);
                (depth_map.hypotheses()[idx].idepth_smoothed, 1.0 / new_depth[(x, y)])
            })
            .collect();
        let scale = scaled.iter().map(|(est, truth)| est / truth).sum::<Float>() / nb as Float;
        assert!((scale - 1.0).abs() > 0.1, "scale {}", scale);
        let nb_consistent = scaled
            .iter()
            .filter(|(est, truth)| (est / (scale * truth) - 1.0).abs() < 0.05)
            .count();
        assert!(nb_consistent * 10 > nb * 8, "{} consistent out of {}", nb_consistent, nb);

        depth_map.finalize_keyframe().unwrap();
        let (mean, _) = mean_smoothed_idepth(&depth_map);
        approx::assert_relative_eq!(mean, 1.0, epsilon = 0.02);
        approx::assert_relative_eq!(depth_map.keyframe().unwrap().mean_idepth, 1.0, epsilon = 0.02);
    }
}
