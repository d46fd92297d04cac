// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Epipolar line construction and 1D stereo search between
//! the keyframe and a reference frame.
//!
//! "This" is the keyframe, "other" is the reference frame.

use crate::core::camera::{Intrinsics, InverseParams};
use crate::core::config::Config;
use crate::core::frame::ImageLevel;
use crate::math::se3::Se3;
use crate::misc::helper::interpolate;
use crate::misc::type_aliases::{Float, Image, Mat3, Vec3};

/// Avoids divisions by zero in the variance computation.
const DIVISION_EPS: Float = 1e-10;

/// Points projected closer than this are considered behind the camera.
const MIN_PROJECTED_DEPTH: Float = 0.001;

/// Minimum length of the search segment after moving it inside the image.
const MIN_CLIPPED_EPL_LENGTH: Float = 8.0;

/// Reasons for which a stereo search fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StereoFailure {
    /// The searched segment leaves the image,
    /// or the scale change along the line is too strong.
    OutOfBounds,
    /// The best match is not clearly better than the second best.
    Ambiguous,
    /// The matching error is too high.
    ErrorTooHigh,
    /// NaN or zero length search segment.
    Degenerate,
}

impl StereoFailure {
    /// Legacy numeric code of the failure.
    pub fn code(self) -> i32 {
        match self {
            StereoFailure::OutOfBounds => -1,
            StereoFailure::Ambiguous => -2,
            StereoFailure::ErrorTooHigh => -3,
            StereoFailure::Degenerate => -4,
        }
    }
}

/// Result of a successful stereo search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoMatch {
    /// Inverse depth in the keyframe.
    pub idepth: Float,
    /// Variance of the inverse depth.
    pub variance: Float,
    /// Length of the searched segment (pixels) before cropping.
    pub epl_length: Float,
    /// Matching error.
    pub error: Float,
}

/// Relative geometry between the keyframe and the reference frame,
/// precomputed once per `update_keyframe`.
#[derive(Debug, Clone)]
pub struct StereoGeometry {
    intrinsics: Intrinsics,
    inv: InverseParams,
    k_other_to_this_r: Mat3,
    k_other_to_this_t: Vec3,
    other_to_this_t: Vec3,
    this_to_other_r: Mat3,
    this_to_other_t: Vec3,
}

impl StereoGeometry {
    /// `ref_to_kf` maps points in reference camera coordinates
    /// into keyframe camera coordinates.
    pub fn new(intrinsics: &Intrinsics, ref_to_kf: &Se3) -> Self {
        let kf_to_ref = ref_to_kf.inverse();
        let k = intrinsics.matrix();
        Self {
            intrinsics: *intrinsics,
            inv: intrinsics.inverse_params(),
            k_other_to_this_r: k * kf_to_ref.rotation(),
            k_other_to_this_t: k * kf_to_ref.translation(),
            other_to_this_t: *kf_to_ref.translation(),
            this_to_other_r: *ref_to_kf.rotation(),
            this_to_other_t: *ref_to_kf.translation(),
        }
    }

    /// Position of the reference camera center in keyframe coordinates.
    pub fn baseline(&self) -> &Vec3 {
        &self.this_to_other_t
    }
}

/// Everything needed to run stereo searches for the pixels of a keyframe.
pub struct StereoContext<'a> {
    config: &'a Config,
    geometry: &'a StereoGeometry,
    keyframe: &'a ImageLevel,
    reference: &'a Image,
    tracking_error_fac: Float,
}

impl<'a> StereoContext<'a> {
    /// `keyframe` and `reference` are full resolution data.
    /// `initial_tracked_residual` is the tracking residual of the reference frame.
    pub fn new(
        config: &'a Config,
        geometry: &'a StereoGeometry,
        keyframe: &'a ImageLevel,
        reference: &'a Image,
        initial_tracked_residual: Float,
    ) -> Self {
        Self {
            config,
            geometry,
            keyframe,
            reference,
            tracking_error_fac: 0.25 * (1.0 + initial_tracked_residual),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn size(&self) -> (Float, Float) {
        let (width, height) = self.keyframe.intensity.shape();
        (width as Float, height as Float)
    }

    /// Epipolar line direction at an interior keyframe pixel,
    /// scaled to a length of `gradient_sample_dist`.
    ///
    /// Returns `None` if the line is too short, or if the keyframe gradient
    /// along the line is too weak or too orthogonal to it.
    #[allow(clippy::cast_precision_loss)]
    pub fn make_and_check_epl(&self, x: usize, y: usize) -> Option<(Float, Float)> {
        let (fx, fy) = self.geometry.intrinsics.focal;
        let (cx, cy) = self.geometry.intrinsics.principal_point;
        let t = &self.geometry.this_to_other_t;
        let epx = -fx * t.x + t.z * (x as Float - cx);
        let epy = -fy * t.y + t.z * (y as Float - cy);
        if (epx + epy).is_nan() {
            return None;
        }

        let epl_length_squared = epx * epx + epy * epy;
        if epl_length_squared < self.config.min_epl_length_squared {
            return None;
        }

        let img = &self.keyframe.intensity;
        let gx = img[(x + 1, y)] - img[(x - 1, y)];
        let gy = img[(x, y + 1)] - img[(x, y - 1)];
        let grad_along = gx * epx + gy * epy;
        let epl_grad_squared = grad_along * grad_along / epl_length_squared;
        if epl_grad_squared < self.config.min_epl_grad_squared {
            return None;
        }
        if epl_grad_squared / (gx * gx + gy * gy) < self.config.min_epl_angle_squared {
            return None;
        }

        let fac = self.config.gradient_sample_dist / epl_length_squared.sqrt();
        Some((epx * fac, epy * fac))
    }

    /// Search along the epipolar line in the reference image for the keyframe pixel `(u, v)`,
    /// between inverse depths `min_idepth` and `max_idepth`.
    ///
    /// `epn` is the direction returned by `make_and_check_epl`
    /// and `prior_idepth` the current estimate used to rescale the sampling.
    #[allow(clippy::too_many_arguments)]
    #[allow(clippy::too_many_lines)]
    #[allow(clippy::many_single_char_names)]
    #[allow(clippy::similar_names)]
    #[allow(clippy::cast_precision_loss)]
    pub fn line_stereo(
        &self,
        u: Float,
        v: Float,
        epn: (Float, Float),
        min_idepth: Float,
        prior_idepth: Float,
        max_idepth: Float,
    ) -> Result<StereoMatch, StereoFailure> {
        let geo = self.geometry;
        let config = self.config;
        let (width, height) = self.size();
        let (epxn, epyn) = epn;

        // Epipolar line start and end points in the keyframe.
        let kinv_p = Vec3::new(geo.inv.fxi * u + geo.inv.cxi, geo.inv.fyi * v + geo.inv.cyi, 1.0);
        let p_inf = geo.k_other_to_this_r * kinv_p;
        let p_real = p_inf / prior_idepth + geo.k_other_to_this_t;
        let rescale = p_real.z * prior_idepth;

        let first = (u - 2.0 * epxn * rescale, v - 2.0 * epyn * rescale);
        let last = (u + 2.0 * epxn * rescale, v + 2.0 * epyn * rescale);
        let inside = |(x, y): (Float, Float)| x > 0.0 && x < width - 2.0 && y > 0.0 && y < height - 2.0;
        if !(inside(first) && inside(last)) {
            return Err(StereoFailure::OutOfBounds);
        }
        if !(rescale > 0.7 && rescale < 1.4) {
            return Err(StereoFailure::OutOfBounds);
        }

        // Values to search for.
        let kf = &self.keyframe.intensity;
        let real_at = |k: Float| interpolate(kf, u + k * epxn * rescale, v + k * epyn * rescale);
        let real = [real_at(2.0), real_at(1.0), real_at(0.0), real_at(-1.0), real_at(-2.0)];

        // Near point, moved in front of the camera if needed.
        let mut max_idepth = max_idepth;
        let mut p_close = p_inf + geo.k_other_to_this_t * max_idepth;
        if p_close.z < MIN_PROJECTED_DEPTH {
            max_idepth = (MIN_PROJECTED_DEPTH - p_inf.z) / geo.k_other_to_this_t.z;
            p_close = p_inf + geo.k_other_to_this_t * max_idepth;
        }
        let p_close = p_close / p_close.z;

        // Far point, the search is pointless if it lies behind the camera.
        let p_far = p_inf + geo.k_other_to_this_t * min_idepth;
        if p_far.z < MIN_PROJECTED_DEPTH || max_idepth < min_idepth {
            return Err(StereoFailure::OutOfBounds);
        }
        let p_far = p_far / p_far.z;
        if (p_far.x + p_close.x).is_nan() {
            return Err(StereoFailure::Degenerate);
        }

        // Search increments of length sample_dist.
        let (mut close_x, mut close_y) = (p_close.x, p_close.y);
        let (mut far_x, mut far_y) = (p_far.x, p_far.y);
        let mut incx = close_x - far_x;
        let mut incy = close_y - far_y;
        let epl_length = (incx * incx + incy * incy).sqrt();
        if !(epl_length > 0.0) || !epl_length.is_finite() {
            return Err(StereoFailure::Degenerate);
        }
        if epl_length > config.max_epl_length_crop {
            close_x = far_x + incx * config.max_epl_length_crop / epl_length;
            close_y = far_y + incy * config.max_epl_length_crop / epl_length;
        }
        incx *= config.gradient_sample_dist / epl_length;
        incy *= config.gradient_sample_dist / epl_length;

        // Extend one sample on each side, and pad short lines.
        far_x -= incx;
        far_y -= incy;
        close_x += incx;
        close_y += incy;
        if epl_length < config.min_epl_length_crop {
            let pad = 0.5 * (config.min_epl_length_crop - epl_length);
            far_x -= incx * pad;
            far_y -= incy * pad;
            close_x += incx * pad;
            close_y += incy * pad;
        }

        let border = config.sample_point_to_border;
        let outside = |x: Float, y: Float| {
            x <= border || x >= width - border || y <= border || y >= height - border
        };
        if outside(far_x, far_y) {
            return Err(StereoFailure::OutOfBounds);
        }
        if outside(close_x, close_y) {
            if close_x <= border {
                let to_add = (border - close_x) / incx;
                close_x += incx * to_add;
                close_y += incy * to_add;
            } else if close_x >= width - border {
                let to_add = (width - border - close_x) / incx;
                close_x += incx * to_add;
                close_y += incy * to_add;
            }
            if close_y <= border {
                let to_add = (border - close_y) / incy;
                close_x += incx * to_add;
                close_y += incy * to_add;
            } else if close_y >= height - border {
                let to_add = (height - border - close_y) / incy;
                close_x += incx * to_add;
                close_y += incy * to_add;
            }
            let (fincx, fincy) = (close_x - far_x, close_y - far_y);
            let new_epl_length = (fincx * fincx + fincy * fincy).sqrt();
            if outside(close_x, close_y) || new_epl_length < MIN_CLIPPED_EPL_LENGTH {
                return Err(StereoFailure::OutOfBounds);
            }
        }

        // Walk from the far point to the near point.
        let search = self.ssd_search(&real, (far_x, far_y), (close_x, close_y), (incx, incy));

        if search.best_err > 4.0 * config.max_error_stereo {
            return Err(StereoFailure::ErrorTooHigh);
        }
        if (search.best_idx - search.second_idx).abs() > 1
            && config.min_distance_error_stereo * search.best_err > search.second_err
        {
            return Err(StereoFailure::Ambiguous);
        }

        let (mut best_x, mut best_y, mut best_err) = (search.best_x, search.best_y, search.best_err);
        let mut did_subpixel = false;
        if config.use_subpixel_stereo {
            if let Some((d, err)) = search.subpixel_offset() {
                best_x += d * incx;
                best_y += d * incy;
                best_err = err;
                did_subpixel = true;
            }
        }

        // Distance at which the reference values were sampled.
        let sample_dist = config.gradient_sample_dist * rescale;
        let grad_along_line = real
            .windows(2)
            .map(|w| (w[0] - w[1]) * (w[0] - w[1]))
            .sum::<Float>()
            / (sample_dist * sample_dist);
        if best_err > config.max_error_stereo + grad_along_line.sqrt() * 20.0 {
            return Err(StereoFailure::ErrorTooHigh);
        }

        // Inverse depth in the keyframe, using the axis of larger step.
        let t = &geo.other_to_this_t;
        let (idepth, alpha) = if incx * incx > incy * incy {
            let old_x = geo.inv.fxi * best_x + geo.inv.cxi;
            let nominator = old_x * t.z - t.x;
            let dot_0 = kinv_p.dot(&geo.this_to_other_r.column(0));
            let dot_2 = kinv_p.dot(&geo.this_to_other_r.column(2));
            let idepth = (dot_0 - old_x * dot_2) / nominator;
            let alpha = incx * geo.inv.fxi * (dot_0 * t.z - dot_2 * t.x) / (nominator * nominator);
            (idepth, alpha)
        } else {
            let old_y = geo.inv.fyi * best_y + geo.inv.cyi;
            let nominator = old_y * t.z - t.y;
            let dot_1 = kinv_p.dot(&geo.this_to_other_r.column(1));
            let dot_2 = kinv_p.dot(&geo.this_to_other_r.column(2));
            let idepth = (dot_1 - old_y * dot_2) / nominator;
            let alpha = incy * geo.inv.fyi * (dot_1 * t.z - dot_2 * t.y) / (nominator * nominator);
            (idepth, alpha)
        };

        // Variance: discretization, geometric and photometric errors.
        let photo_disp_error = 4.0 * config.camera_pixel_noise2 / (grad_along_line + DIVISION_EPS);
        let grad_x = interpolate(&self.keyframe.gradient_x, u, v);
        let grad_y = interpolate(&self.keyframe.gradient_y, u, v);
        let geo_along = grad_x * epxn + grad_y * epyn + DIVISION_EPS;
        let geo_disp_error = self.tracking_error_fac * self.tracking_error_fac
            * (grad_x * grad_x + grad_y * grad_y)
            / (geo_along * geo_along);
        let discretization = if did_subpixel { 0.05 } else { 0.5 };
        let variance = alpha
            * alpha
            * (discretization * sample_dist * sample_dist + geo_disp_error + photo_disp_error);

        Ok(StereoMatch {
            idepth,
            variance,
            epl_length,
            error: best_err,
        })
    }

    /// Sum of squared differences of the 5 reference values
    /// at each sample from `start` to `end` (included when reached).
    fn ssd_search(
        &self,
        real: &[Float; 5],
        start: (Float, Float),
        end: (Float, Float),
        inc: (Float, Float),
    ) -> SsdSearch {
        let img = self.reference;
        let (incx, incy) = inc;
        let (mut cpx, mut cpy) = start;
        let sample = |k: Float, x: Float, y: Float| interpolate(img, x + k * incx, y + k * incy);
        // Values at offsets -2, -1, 0, +1 (and +2 sampled in the loop).
        let mut window = [
            sample(-2.0, cpx, cpy),
            sample(-1.0, cpx, cpy),
            sample(0.0, cpx, cpy),
            sample(1.0, cpx, cpy),
        ];

        let mut search = SsdSearch::new();
        // Residuals of the two last positions, to compute the
        // products of consecutive residuals.
        let mut residuals = [[Float::NAN; 5]; 2];
        let mut err_last = -1.0;
        let mut best_was_last = false;
        let mut counter: i64 = 0;
        while counter == 0 || ((incx < 0.0) == (cpx > end.0) && (incy < 0.0) == (cpy > end.1)) {
            let val_p2 = sample(2.0, cpx, cpy);
            let values = [val_p2, window[3], window[2], window[1], window[0]];
            let slot = (counter % 2) as usize;
            let mut err = 0.0;
            for k in 0..5 {
                let e = values[k] - real[k];
                residuals[slot][k] = e;
                err += e * e;
            }
            let cross: Float = (0..5).map(|k| residuals[0][k] * residuals[1][k]).sum();

            if err < search.best_err {
                search.second_err = search.best_err;
                search.second_idx = search.best_idx;
                search.best_err = err;
                search.best_idx = counter;
                search.err_pre = err_last;
                search.diff_err_pre = cross;
                search.err_post = -1.0;
                search.diff_err_post = -1.0;
                search.best_x = cpx;
                search.best_y = cpy;
                best_was_last = true;
            } else {
                if best_was_last {
                    search.err_post = err;
                    search.diff_err_post = cross;
                    best_was_last = false;
                }
                if err < search.second_err {
                    search.second_err = err;
                    search.second_idx = counter;
                }
            }

            err_last = err;
            window = [window[1], window[2], window[3], val_p2];
            cpx += incx;
            cpy += incy;
            counter += 1;
        }
        search
    }
}

/// Bookkeeping of the best and second best matches along the epipolar line.
struct SsdSearch {
    best_err: Float,
    best_idx: i64,
    best_x: Float,
    best_y: Float,
    second_err: Float,
    second_idx: i64,
    err_pre: Float,
    err_post: Float,
    diff_err_pre: Float,
    diff_err_post: Float,
}

impl SsdSearch {
    fn new() -> Self {
        Self {
            best_err: 1e50,
            best_idx: -1,
            best_x: -1.0,
            best_y: -1.0,
            second_err: 1e50,
            second_idx: -1,
            err_pre: Float::NAN,
            err_post: Float::NAN,
            diff_err_pre: Float::NAN,
            diff_err_post: Float::NAN,
        }
    }

    /// Sub-pixel refinement at the zero crossing of the error gradient,
    /// assuming linear interpolation between samples.
    ///
    /// Returns the signed offset (in steps) from the best sample
    /// and the interpolated error.
    fn subpixel_offset(&self) -> Option<(Float, Float)> {
        // These are half the real gradients.
        let grad_pre_pre = -(self.err_pre - self.diff_err_pre);
        let grad_pre_this = self.best_err - self.diff_err_pre;
        let grad_post_this = -(self.best_err - self.diff_err_post);
        let grad_post_post = self.err_post - self.diff_err_post;

        // Either neighbour is out of the searched segment.
        if self.err_pre < 0.0 || self.err_post < 0.0 {
            return None;
        }
        // Zero crossing exactly at the best sample.
        if (grad_post_this < 0.0) != (grad_pre_this < 0.0) {
            return None;
        }
        let pre_crossing = (grad_pre_pre < 0.0) != (grad_pre_this < 0.0);
        let post_crossing = (grad_post_post < 0.0) != (grad_post_this < 0.0);
        match (pre_crossing, post_crossing) {
            (true, false) => {
                let d = grad_pre_this / (grad_pre_this - grad_pre_pre);
                let err = self.best_err
                    - 2.0 * d * grad_pre_this
                    - (grad_pre_pre - grad_pre_this) * d * d;
                Some((-d, err))
            }
            (false, true) => {
                let d = grad_post_this / (grad_post_this - grad_post_post);
                let err = self.best_err
                    + 2.0 * d * grad_post_this
                    + (grad_post_post - grad_post_this) * d * d;
                Some((d, err))
            }
            _ => None,
        }
    }
}

// TESTS #############################################################
