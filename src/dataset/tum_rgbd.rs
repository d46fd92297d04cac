// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to handle datasets compatible with TUM RGB-D.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::camera::Intrinsics;
use crate::math::se3::Se3;
use crate::misc::interop;
use crate::misc::type_aliases::{Float, Image};
use crate::Error;

/// U16 depth values are scaled for better precision.
/// So 5000 in the 16 bits gray png corresponds to 1 meter.
pub const DEPTH_SCALE: Float = 5000.0;

/// Intrinsics parameters of freiburg 1 (fr1) scenes in the TUM RGB-D dataset.
#[allow(clippy::excessive_precision)]
pub const INTRINSICS_FR1: Intrinsics = Intrinsics {
    principal_point: (318.643_040, 255.313_989),
    focal: (517.306_408, 516.469_215),
};

/// Intrinsics parameters of freiburg 2 (fr2) scenes in the TUM RGB-D dataset.
#[allow(clippy::excessive_precision)]
pub const INTRINSICS_FR2: Intrinsics = Intrinsics {
    principal_point: (325.141_442, 249.701_764),
    focal: (520.908_620, 521.007_327),
};

/// Intrinsics parameters of freiburg 3 (fr3) scenes in the TUM RGB-D dataset.
#[allow(clippy::excessive_precision)]
pub const INTRINSICS_FR3: Intrinsics = Intrinsics {
    principal_point: (320.106_653, 247.632_132),
    focal: (535.433_105, 539.212_524),
};

/// Intrinsics preset from its short name (`fr1`, `fr2` or `fr3`).
pub fn intrinsics(camera_id: &str) -> Option<Intrinsics> {
    match camera_id {
        "fr1" => Some(INTRINSICS_FR1),
        "fr2" => Some(INTRINSICS_FR2),
        "fr3" => Some(INTRINSICS_FR3),
        _ => None,
    }
}

/// Timestamp and 3D camera pose of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPose {
    /// Timestamp of the frame.
    pub timestamp: f64,
    /// Pose of the camera in the world.
    pub pose: Se3,
}

/// Write a trajectory line in the TUM RGB-D format:
/// `timestamp tx ty tz qx qy qz qw`.
impl fmt::Display for TrajectoryPose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let iso = self.pose.to_iso3();
        let t = iso.translation.vector;
        let q = iso.rotation.into_inner().coords;
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.timestamp, t.x, t.y, t.z, q.x, q.y, q.z, q.w
        )
    }
}

/// Timestamp and file path of an image, as listed in `rgb.txt` or `depth.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    /// Timestamp of the image.
    pub timestamp: f64,
    /// File path of the image, relative to the list file.
    pub path: PathBuf,
}

/// Association of two related depth and color timestamps and images file paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    /// Timestamp of the depth image.
    pub depth_timestamp: f64,
    /// File path of the depth image.
    pub depth_file_path: PathBuf,
    /// Timestamp of the color image.
    pub color_timestamp: f64,
    /// File path of the color image.
    pub color_file_path: PathBuf,
}

/// Read an image file as a gray `Image`.
pub fn read_gray<P: AsRef<Path>>(file_path: P) -> Result<Image, Error> {
    let img = image::open(file_path)?.to_luma8();
    Ok(interop::matrix_from_image(&img))
}

/// Read a 16 bits depth png as a depth `Image` in meters.
/// Missing depth (0) stays at 0.
pub fn read_depth<P: AsRef<Path>>(file_path: P) -> Result<Image, Error> {
    let img = image::open(file_path)?.to_luma16();
    Ok(interop::depth_from_image(&img, DEPTH_SCALE))
}

/// Parse useful files (image lists, associations, trajectories) in a dataset using the TUM RGB-D format.
pub mod parse {
    use super::*;
    use nom::{
        branch::alt,
        bytes::complete::{is_not, tag},
        character::complete::{space0, space1},
        combinator::{all_consuming, map, rest, value},
        number::complete::double,
        sequence::{preceded, terminated, tuple},
        IResult,
    };

    use crate::misc::type_aliases::Iso3;

    /// Parse an image list file (`rgb.txt`, `depth.txt`) into a vector of `ImageEntry`.
    pub fn image_list(file_content: &str) -> Result<Vec<ImageEntry>, Error> {
        multi_line(image_entry, file_content)
    }

    /// Parse an association file into a vector of `Association`.
    pub fn associations(file_content: &str) -> Result<Vec<Association>, Error> {
        multi_line(association, file_content)
    }

    /// Parse a trajectory file into a vector of `TrajectoryPose`.
    pub fn trajectory(file_content: &str) -> Result<Vec<TrajectoryPose>, Error> {
        multi_line(trajectory_pose, file_content)
    }

    /// Apply `line_parser` on every line that is neither empty nor a comment.
    fn multi_line<F, T>(line_parser: F, file_content: &str) -> Result<Vec<T>, Error>
    where
        F: FnMut(&str) -> IResult<&str, T>,
    {
        let mut parser = all_consuming(terminated(
            alt((map(comment, |_| None), map(line_parser, Some))),
            space0,
        ));
        let mut vec_data = Vec::new();
        for (idx, line) in file_content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parser(trimmed) {
                Ok((_, Some(data))) => vec_data.push(data),
                Ok((_, None)) => (),
                Err(_) => {
                    return Err(Error::Parse {
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            }
        }
        Ok(vec_data)
    }

    // nom parsers #############################################################

    /// A comment starts with `#` and runs until the end of the line.
    fn comment(input: &str) -> IResult<&str, ()> {
        value((), preceded(tag("#"), rest))(input)
    }

    fn path(input: &str) -> IResult<&str, PathBuf> {
        map(is_not(" \t\r\n"), PathBuf::from)(input)
    }

    /// A float preceded by at least one space.
    fn spaced_double(input: &str) -> IResult<&str, f64> {
        preceded(space1, double)(input)
    }

    fn image_entry(input: &str) -> IResult<&str, ImageEntry> {
        map(tuple((double, space1, path)), |(timestamp, _, path)| {
            ImageEntry { timestamp, path }
        })(input)
    }

    fn association(input: &str) -> IResult<&str, Association> {
        map(
            tuple((image_entry, space1, image_entry)),
            |(depth, _, color)| Association {
                depth_timestamp: depth.timestamp,
                depth_file_path: depth.path,
                color_timestamp: color.timestamp,
                color_file_path: color.path,
            },
        )(input)
    }

    fn trajectory_pose(input: &str) -> IResult<&str, TrajectoryPose> {
        let (input, timestamp) = double(input)?;
        let (input, (tx, ty, tz)) = tuple((spaced_double, spaced_double, spaced_double))(input)?;
        let (input, (qx, qy, qz, qw)) =
            tuple((spaced_double, spaced_double, spaced_double, spaced_double))(input)?;
        let rotation = nalgebra::UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            qw, qx, qy, qz,
        ));
        let iso = Iso3::from_parts(nalgebra::Translation3::new(tx, ty, tz), rotation);
        let pose = Se3::from_iso3(&iso);
        Ok((input, TrajectoryPose { timestamp, pose }))
    }
} // pub mod parse

// TESTS #############################################################
