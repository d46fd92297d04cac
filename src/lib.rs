// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Monocular direct semi-dense visual odometry.
//!
//! A keyframe carries a per-pixel inverse depth map, refined by small baseline
//! stereo with every tracked frame (`core::depth`).
//! New frames are tracked on the keyframe point cloud by a photometric
//! Levenberg-Marquardt alignment on SE(3) (`core::track`).
//! `core::odometry` drives both on a video stream.

#![warn(missing_docs)]

pub mod core;
pub mod dataset;
pub mod math;
pub mod misc;

mod error;

pub use error::Error;
