// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors returned by the library.

use thiserror::Error;

/// Misuse and input/output errors.
///
/// Tracking divergence and stereo failures are not errors,
/// they are reported in the results of the corresponding operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The depth map has no active keyframe yet.
    #[error("the depth map has no active keyframe, initialize it first")]
    NoActiveKeyframe,
    /// The frame has no pose relative to a parent keyframe.
    #[error("frame {0} was not tracked, it has no pose relative to a keyframe")]
    UntrackedFrame(usize),
    /// An image does not have the size expected by the odometry.
    #[error("image size is {actual:?} but {expected:?} was expected")]
    WrongImageSize {
        /// Expected `(width, height)`.
        expected: (usize, usize),
        /// Actual `(width, height)`.
        actual: (usize, usize),
    },
    /// Inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A dataset file could not be parsed.
    #[error("parsing error at line {line}: {content}")]
    Parse {
        /// Line number (starting at 1).
        line: usize,
        /// Content of the line.
        content: String,
    },
    /// Input/output error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Image decoding error.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}
