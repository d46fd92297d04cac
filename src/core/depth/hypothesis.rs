// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per pixel inverse depth hypothesis.

use crate::misc::type_aliases::Float;

/// Smallest magnitude allowed for an inverse depth.
pub const MIN_IDEPTH_MAGNITUDE: Float = 1e-10;

/// Clamp the magnitude of an inverse depth away from zero, preserving its sign.
/// Zero maps to `+1e-10`.
pub fn unzero(value: Float) -> Float {
    if value < 0.0 {
        value.min(-MIN_IDEPTH_MAGNITUDE)
    } else {
        value.max(MIN_IDEPTH_MAGNITUDE)
    }
}

/// Gaussian inverse depth estimate of one keyframe pixel.
///
/// All fields except `is_valid` and `blacklisted` are meaningless
/// when the hypothesis is not valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthHypothesis {
    /// There is an estimate at this pixel.
    pub is_valid: bool,
    /// Decremented on repeated stereo failures.
    /// The pixel is not observed anymore once below `min_blacklist`.
    pub blacklisted: i32,
    /// Accumulated evidence, roughly the number of successful observations.
    pub validity_counter: Float,
    /// Raw inverse depth (Kalman state).
    pub idepth: Float,
    /// Raw inverse depth variance.
    pub idepth_var: Float,
    /// Regularized inverse depth.
    pub idepth_smoothed: Float,
    /// Regularized inverse depth variance.
    pub idepth_var_smoothed: Float,
}

impl Default for DepthHypothesis {
    fn default() -> Self {
        Self::invalid()
    }
}

impl DepthHypothesis {
    /// Valid hypothesis whose smoothed state equals its raw state.
    pub fn new(idepth: Float, idepth_var: Float, validity_counter: Float) -> Self {
        Self {
            is_valid: true,
            blacklisted: 0,
            validity_counter,
            idepth,
            idepth_var,
            idepth_smoothed: idepth,
            idepth_var_smoothed: idepth_var,
        }
    }

    /// Invalid and not blacklisted.
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            blacklisted: 0,
            validity_counter: 0.0,
            idepth: 0.0,
            idepth_var: 0.0,
            idepth_smoothed: -1.0,
            idepth_var_smoothed: -1.0,
        }
    }

    /// Mark as invalid, keeping the blacklist counter.
    pub fn invalidate(&mut self) {
        self.is_valid = false;
    }

    /// Standard deviation of the smoothed inverse depth.
    pub fn smoothed_std(&self) -> Float {
        self.idepth_var_smoothed.sqrt()
    }

    /// Fuse an observation into the raw state.
    ///
    /// The prior variance is first inflated by `var_inc_fac` (prediction uncertainty).
    /// The variance never increases.
    pub fn kalman_update(&mut self, obs_idepth: Float, obs_var: Float, var_inc_fac: Float) {
        let prior_var = self.idepth_var * var_inc_fac;
        let w = obs_var / (obs_var + prior_var);
        self.idepth = unzero((1.0 - w) * obs_idepth + w * self.idepth);
        self.idepth_var = self.idepth_var.min(prior_var * w);
    }

    /// Inflate the raw variance after a failed observation.
    /// Returns true if the variance is now above `max_var`.
    pub fn inflate_variance(&mut self, fail_var_inc_fac: Float, max_var: Float) -> bool {
        self.idepth_var *= fail_var_inc_fac;
        self.idepth_var > max_var
    }

    /// Add to the validity counter, saturating at `ceiling`.
    pub fn increase_validity(&mut self, inc: Float, ceiling: Float) {
        self.validity_counter = (self.validity_counter + inc).min(ceiling);
    }

    /// Subtract from the validity counter, with a floor at 0.
    pub fn decrease_validity(&mut self, dec: Float) {
        self.validity_counter = (self.validity_counter - dec).max(0.0);
    }
}

// TESTS #############################################################
