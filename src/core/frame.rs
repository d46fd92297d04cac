// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frames: multi-resolution images, inverse depth and point clouds, pose.
//!
//! The depth map only touches the inverse depth data
//! (through `Frame::set_depth`) and the mapping counter.
//! The tracker only touches the pose fields and the tracking counters.

use itertools::izip;
use nalgebra::DMatrix;

use crate::core::camera::Intrinsics;
use crate::core::depth::hypothesis::DepthHypothesis;
use crate::core::gradient;
use crate::core::multires::{self, Levels};
use crate::math::se3::Se3;
use crate::misc::type_aliases::{Float, Image, Point3};

/// Hypotheses with a smoothed inverse depth below this value are not handed to frames.
const MIN_SET_IDEPTH: Float = -0.05;

/// Intensity and gradients at one resolution level.
#[derive(Debug, Clone)]
pub struct ImageLevel {
    /// Gray intensity.
    pub intensity: Image,
    /// Centered gradient along x.
    pub gradient_x: Image,
    /// Centered gradient along y.
    pub gradient_y: Image,
    /// Gradient magnitude, max filtered over 3x3 neighbourhoods.
    pub gradient_max: Image,
}

impl ImageLevel {
    fn new(intensity: Image) -> Self {
        let (gradient_x, gradient_y) = gradient::centered(&intensity);
        let gradient_max = gradient::max_magnitude(&gradient_x, &gradient_y);
        Self {
            intensity,
            gradient_x,
            gradient_y,
            gradient_max,
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.intensity.nrows()
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.intensity.ncols()
    }
}

/// Build the image pyramid of a gray image.
fn image_pyramid(nb_levels: usize, image: Image) -> Levels<ImageLevel> {
    multires::mean_pyramid(nb_levels, image)
        .into_iter()
        .map(ImageLevel::new)
        .collect()
}

/// A 3D point of the keyframe point cloud, in the keyframe camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudPoint {
    /// Pixel index `x + y * width` in its level.
    pub index: usize,
    /// Position in camera coordinates.
    pub position: Point3,
    /// Intensity of the pixel.
    pub intensity: Float,
    /// Inverse depth variance of the pixel.
    pub variance: Float,
}

/// Inverse depth and derived point cloud at one resolution level.
///
/// Pixels without depth have an inverse depth and a variance of -1.
#[derive(Debug, Clone)]
pub struct DepthLevel {
    /// Inverse depth.
    pub idepth: Image,
    /// Inverse depth variance.
    pub idepth_var: Image,
    /// Points with a valid depth, ordered by pixel index.
    pub cloud: Vec<CloudPoint>,
}

/// A frame of the video stream.
#[derive(Debug, Clone)]
pub struct Frame {
    id: usize,
    intrinsics: Levels<Intrinsics>,
    levels: Levels<ImageLevel>,
    depth: Levels<DepthLevel>,
    num_mappable_pixels: usize,

    /// Pose of the camera in the world.
    pub cam_to_world: Se3,
    /// Pose of the camera relative to the keyframe it was tracked on.
    pub this_to_parent: Option<Se3>,
    /// Id of the keyframe this frame was tracked on.
    pub kf_id: Option<usize>,
    /// Weighted tracking residual, normalized by the point usage.
    pub initial_tracked_residual: Float,
    /// Number of frames successfully tracked on this one (as a keyframe).
    pub num_frames_tracked_on_this: usize,
    /// Number of depth map updates done with this one as keyframe.
    pub num_mapped_on_this: usize,
    /// Mean inverse depth of the points with depth.
    pub mean_idepth: Float,
    /// Number of pixels with depth at full resolution.
    pub num_points: usize,
    /// Relative poses of all the frames tracked on this one.
    pub tracked_on_poses: Vec<Se3>,
}

impl Frame {
    /// Build a frame and its pyramids from a full resolution gray image.
    ///
    /// `intrinsics` are the camera parameters at full resolution.
    pub fn new(id: usize, image: Image, intrinsics: &Intrinsics, nb_levels: usize) -> Self {
        let levels = image_pyramid(nb_levels, image);
        let intrinsics = intrinsics.multi_res(levels.len());
        Self {
            id,
            intrinsics,
            levels,
            depth: Vec::new(),
            num_mappable_pixels: 0,
            cam_to_world: Se3::identity(),
            this_to_parent: None,
            kf_id: None,
            initial_tracked_residual: 0.0,
            num_frames_tracked_on_this: 0,
            num_mapped_on_this: 0,
            mean_idepth: 0.0,
            num_points: 0,
            tracked_on_poses: Vec::new(),
        }
    }

    /// Unique id of the frame.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of levels in the pyramids.
    pub fn nb_levels(&self) -> usize {
        self.levels.len()
    }

    /// Width of a level.
    pub fn width(&self, level: usize) -> usize {
        self.levels[level].width()
    }

    /// Height of a level.
    pub fn height(&self, level: usize) -> usize {
        self.levels[level].height()
    }

    /// Image data at a level.
    pub fn level(&self, level: usize) -> &ImageLevel {
        &self.levels[level]
    }

    /// Camera intrinsics at a level.
    pub fn intrinsics(&self, level: usize) -> &Intrinsics {
        &self.intrinsics[level]
    }

    /// True once `set_depth` was called.
    pub fn has_depth(&self) -> bool {
        !self.depth.is_empty()
    }

    /// Inverse depth data at a level, if available.
    pub fn depth_level(&self, level: usize) -> Option<&DepthLevel> {
        self.depth.get(level)
    }

    /// Point cloud at a level, empty if no depth was set.
    pub fn point_cloud(&self, level: usize) -> &[CloudPoint] {
        self.depth
            .get(level)
            .map_or(&[], |depth| depth.cloud.as_slice())
    }

    /// Number of full resolution pixels with an absolute gradient
    /// of at least `min_abs_grad_create`, counted by the last `set_depth`.
    pub fn num_mappable_pixels(&self) -> usize {
        self.num_mappable_pixels
    }

    /// Set the full resolution inverse depth from depth hypotheses,
    /// then derive the inverse depth pyramid and the point clouds.
    ///
    /// Only valid hypotheses with a smoothed inverse depth of at least -0.05 are kept.
    /// `hypotheses` is indexed by `x + y * width`.
    ///
    /// Panics if the number of hypotheses is not the number of pixels.
    pub fn set_depth(&mut self, hypotheses: &[DepthHypothesis], min_abs_grad_create: Float) {
        let (width, height) = (self.width(0), self.height(0));
        assert_eq!(hypotheses.len(), width * height, "depth grid size mismatch");
        let mut sum_idepth = 0.0;
        let mut num_idepth = 0_usize;
        let full_res = DMatrix::from_iterator(
            width,
            height,
            hypotheses.iter().map(|h| {
                if h.is_valid && h.idepth_smoothed >= MIN_SET_IDEPTH {
                    sum_idepth += h.idepth_smoothed;
                    num_idepth += 1;
                    (h.idepth_smoothed, h.idepth_var_smoothed)
                } else {
                    (-1.0, -1.0)
                }
            }),
        );
        #[allow(clippy::cast_precision_loss)]
        let mean_idepth = if num_idepth > 0 {
            sum_idepth / num_idepth as Float
        } else {
            0.0
        };
        self.mean_idepth = mean_idepth;
        self.num_points = num_idepth;
        self.num_mappable_pixels = self.levels[0]
            .gradient_max
            .iter()
            .filter(|&&g| g >= min_abs_grad_create)
            .count();

        let idepth_pyramid = multires::limited_sequence(
            self.levels.len(),
            full_res,
            |m| m,
            |m| multires::halve(m, multires::fuse_idepth),
        );
        self.depth = izip!(idepth_pyramid, &self.levels, &self.intrinsics)
            .map(|(idepth_and_var, img_level, intrinsics)| {
                let idepth = idepth_and_var.map(|(idepth, _)| idepth);
                let idepth_var = idepth_and_var.map(|(_, var)| var);
                let cloud = point_cloud(&idepth, &idepth_var, &img_level.intensity, intrinsics);
                DepthLevel {
                    idepth,
                    idepth_var,
                    cloud,
                }
            })
            .collect();
    }
}

/// Back project every interior pixel with a positive inverse depth and variance.
#[allow(clippy::cast_precision_loss)]
fn point_cloud(
    idepth: &Image,
    idepth_var: &Image,
    intensity: &Image,
    intrinsics: &Intrinsics,
) -> Vec<CloudPoint> {
    let (width, height) = idepth.shape();
    let inv = intrinsics.inverse_params();
    let mut cloud = Vec::new();
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let id = idepth[(x, y)];
            let var = idepth_var[(x, y)];
            if id <= 0.0 || var <= 0.0 {
                continue;
            }
            let depth = 1.0 / id;
            cloud.push(CloudPoint {
                index: x + y * width,
                position: Point3::new(
                    (inv.fxi * x as Float + inv.cxi) * depth,
                    (inv.fyi * y as Float + inv.cyi) * depth,
                    depth,
                ),
                intensity: intensity[(x, y)],
                variance: var,
            });
        }
    }
    cloud
}

/// A frame with a second (right) image pyramid.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    /// The left frame, carrying depth and pose.
    pub frame: Frame,
    right: Levels<ImageLevel>,
}

impl StereoFrame {
    /// Build both pyramids.
    pub fn new(
        id: usize,
        left: Image,
        right: Image,
        intrinsics: &Intrinsics,
        nb_levels: usize,
    ) -> Self {
        Self {
            frame: Frame::new(id, left, intrinsics, nb_levels),
            right: image_pyramid(nb_levels, right),
        }
    }

    /// Right image data at a level.
    pub fn right_level(&self, level: usize) -> &ImageLevel {
        &self.right[level]
    }
}

// TESTS #############################################################
