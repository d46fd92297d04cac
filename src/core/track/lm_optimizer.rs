// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Levenberg-Marquardt implementation of the `OptimizerState` trait
//! for the photometric alignment of a keyframe point cloud on a new image.
//!
//! The model is the `ref_to_frame` motion, updated as `exp(increment) * model`.

use std::cell::RefCell;

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::frame::{CloudPoint, ImageLevel};
use crate::math::accumulator::NormalEquations;
use crate::math::optimizer::{Continue, OptimizerState};
use crate::math::se3::{self, Se3};
use crate::misc::helper::interpolate;
use crate::misc::type_aliases::{Float, Mat6, Vec6};

/// A reference point warped into the target image.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarpedPoint {
    x: Float,
    y: Float,
    z: Float,
    /// Reference intensity minus target intensity.
    residual: Float,
    /// Target gradient along x, multiplied by the focal length.
    gx: Float,
    /// Target gradient along y, multiplied by the focal length.
    gy: Float,
    /// Inverse depth of the point in the reference frame.
    idepth: Float,
    /// Inverse depth variance of the point in the reference frame.
    variance: Float,
    /// Combined variance and Huber weight.
    weight: Float,
}

/// Precomputed data available for the optimizer iterations at one level.
pub struct Obs<'a> {
    /// Tuning parameters.
    pub config: &'a Config,
    /// Intrinsic parameters of the camera at this level.
    pub intrinsics: &'a Intrinsics,
    /// Point cloud of the reference frame at this level.
    pub cloud: &'a [CloudPoint],
    /// Image of the target frame at this level.
    pub image: &'a ImageLevel,
    /// Maximum number of accepted steps.
    pub max_iterations: usize,
    /// Warp buffers, overwritten at each evaluation.
    pub scratch: &'a RefCell<Vec<WarpedPoint>>,
}

/// Reasons for which the iterations at a level cannot go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFailure {
    /// Too few points were warped inside the target image.
    Diverged,
    /// The damped normal equations could not be solved.
    SingularSystem,
}

/// Why a candidate model was not accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Too few points were warped inside the target image.
    Diverged,
    /// The energy did not decrease.
    HigherEnergy {
        /// Energy of the rejected model.
        energy: Float,
        /// Squared norm of the increment leading to the rejected model.
        step_norm_2: Float,
    },
}

/// Either a successfully constructed `EvalData`
/// or the reason why the model was rejected.
pub type EvalState = Result<EvalData, Rejection>;

/// Data resulting of a successful model evaluation.
#[derive(Debug, Clone)]
pub struct EvalData {
    /// The hessian matrix of the system.
    pub hessian: Mat6,
    /// The gradient of the system.
    pub gradient: Vec6,
    /// Mean weighted squared residual.
    pub energy: Float,
    /// Estimated `ref_to_frame` motion.
    pub model: Se3,
    /// Number of points warped inside the target image.
    pub warped_count: usize,
    /// Number of warped points with a photometrically consistent residual.
    pub good_count: usize,
    /// Number of warped points with an inconsistent residual.
    pub bad_count: usize,
    /// Mean of `min(1, z_ref / z_warped)` over the point cloud.
    pub point_usage: Float,
}

/// Copy of the parameters needed by the stopping criterion.
#[derive(Debug, Clone, Copy)]
struct Settings {
    max_iterations: usize,
    convergence_eps: Float,
    step_size_min: Float,
    lambda_success_fac: Float,
    lambda_fail_fac: Float,
}

/// State of the Levenberg-Marquardt optimizer.
pub struct LMOptimizerState {
    /// Levenberg-Marquardt hessian diagonal coefficient.
    pub lm_coef: Float,
    /// Number of rejected tries since the last accepted step.
    pub nb_tries: i32,
    /// Number of accepted steps.
    pub nb_accepted: usize,
    /// Set when an evaluation diverged, returned by the next step.
    pub failure: Option<LevelFailure>,
    /// Data resulting of the last successful model evaluation.
    pub eval_data: EvalData,
    settings: Settings,
}

/// Statistics of a warp, before weighting.
struct WarpStats {
    good_count: usize,
    bad_count: usize,
    point_usage: Float,
}

impl LMOptimizerState {
    /// Warp every cloud point with `model` into the scratch buffers.
    /// Return `None` if too few points land inside the image.
    #[allow(clippy::cast_precision_loss)]
    fn warp(obs: &Obs, model: &Se3) -> Option<WarpStats> {
        let config = obs.config;
        let (fx, fy) = obs.intrinsics.focal;
        let (cx, cy) = obs.intrinsics.principal_point;
        let (width, height) = (obs.image.width() as Float, obs.image.height() as Float);
        let mut scratch = obs.scratch.borrow_mut();
        scratch.clear();
        let mut good_count = 0;
        let mut bad_count = 0;
        let mut usage = 0.0;
        for point in obs.cloud {
            let p = model * &point.position;
            let u = p.x / p.z * fx + cx;
            let v = p.y / p.z * fy + cy;
            if !(p.z > 0.0 && u > 1.0 && v > 1.0 && u < width - 2.0 && v < height - 2.0) {
                continue;
            }
            let gx = interpolate(&obs.image.gradient_x, u, v);
            let gy = interpolate(&obs.image.gradient_y, u, v);
            let residual = point.intensity - interpolate(&obs.image.intensity, u, v);
            scratch.push(WarpedPoint {
                x: p.x,
                y: p.y,
                z: p.z,
                residual,
                gx: fx * gx,
                gy: fy * gy,
                idepth: 1.0 / point.position.z,
                variance: point.variance,
                weight: 0.0,
            });
            let max_diff = config.max_diff_constant + config.max_diff_grad_mult * (gx * gx + gy * gy);
            if residual * residual / max_diff < 1.0 {
                good_count += 1;
            } else {
                bad_count += 1;
            }
            usage += (point.position.z / p.z).min(1.0);
        }

        let min_warped = config.min_goodperall_pixel_absmin * width * height;
        if scratch.is_empty() || (scratch.len() as Float) < min_warped {
            return None;
        }
        Some(WarpStats {
            good_count,
            bad_count,
            point_usage: usage / obs.cloud.len() as Float,
        })
    }

    /// Compute the weight of each warped point and return the mean weighted squared residual.
    #[allow(clippy::cast_precision_loss)]
    fn weigh(obs: &Obs, model: &Se3) -> Float {
        let config = obs.config;
        let t = model.translation();
        let huber = 0.5 * config.huber_d;
        let mut scratch = obs.scratch.borrow_mut();
        let mut energy_sum = 0.0;
        for p in scratch.iter_mut() {
            // Derivative of the warped pixel with respect to the reference inverse depth.
            let g0 = (t.x * p.z - t.z * p.x) / (p.z * p.z * p.idepth);
            let g1 = (t.y * p.z - t.z * p.y) / (p.z * p.z * p.idepth);
            let drpdd = p.gx * g0 + p.gy * g1;
            let w_p = 1.0 / (config.camera_pixel_noise2 + config.var_weight * p.variance * drpdd * drpdd);
            let weighted_r = (p.residual * w_p.sqrt()).abs();
            let w_huber = if weighted_r < huber { 1.0 } else { huber / weighted_r };
            p.weight = w_huber * w_p;
            energy_sum += p.weight * p.residual * p.residual;
        }
        energy_sum / scratch.len() as Float
    }

    /// Accumulate the normal equations of the weighted warped points.
    fn normal_equations(obs: &Obs) -> (Mat6, Vec6) {
        let mut normal = NormalEquations::new();
        for p in obs.scratch.borrow().iter() {
            normal.add(&jacobian(p), p.residual, p.weight);
        }
        normal.finish()
    }

    fn eval_data(obs: &Obs, model: Se3, stats: WarpStats, energy: Float) -> EvalData {
        let (hessian, gradient) = Self::normal_equations(obs);
        EvalData {
            hessian,
            gradient,
            energy,
            model,
            warped_count: obs.scratch.borrow().len(),
            good_count: stats.good_count,
            bad_count: stats.bad_count,
            point_usage: stats.point_usage,
        }
    }
}

/// `impl<'a> OptimizerState<Obs<'a>, EvalState, Se3, LevelFailure> for LMOptimizerState`.
impl<'a> OptimizerState<Obs<'a>, EvalState, Se3, LevelFailure> for LMOptimizerState {
    /// Initialize the optimizer state.
    /// A divergent initial model is reported by the first step.
    fn init(obs: &Obs, model: Se3) -> Self {
        let config = obs.config;
        let settings = Settings {
            max_iterations: obs.max_iterations,
            convergence_eps: config.convergence_eps,
            step_size_min: config.step_size_min,
            lambda_success_fac: config.lambda_success_fac,
            lambda_fail_fac: config.lambda_fail_fac,
        };
        let (failure, eval_data) = match Self::warp(obs, &model) {
            Some(stats) => {
                let energy = Self::weigh(obs, &model);
                (None, Self::eval_data(obs, model, stats, energy))
            }
            None => (Some(LevelFailure::Diverged), EvalData::diverged(model)),
        };
        Self {
            lm_coef: config.lambda_initial,
            nb_tries: 0,
            nb_accepted: 0,
            failure,
            eval_data,
            settings,
        }
    }

    /// Compute the step using Levenberg-Marquardt.
    /// Apply the step on the left of the current motion estimation.
    fn step(&self) -> Result<Se3, LevelFailure> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        let mut hessian = self.eval_data.hessian;
        for i in 0..6 {
            hessian[(i, i)] *= 1.0 + self.lm_coef;
        }
        let cholesky = hessian.cholesky().ok_or(LevelFailure::SingularSystem)?;
        let increment = cholesky.solve(&self.eval_data.gradient);
        Ok(se3::exp(increment) * self.eval_data.model)
    }

    /// Compute residuals and energy of the new model.
    /// Then, evaluate the new hessian and gradient if the energy has decreased.
    fn eval(&self, obs: &Obs, model: Se3) -> EvalState {
        let stats = Self::warp(obs, &model).ok_or(Rejection::Diverged)?;
        let energy = Self::weigh(obs, &model);
        if energy < self.eval_data.energy {
            Ok(Self::eval_data(obs, model, stats, energy))
        } else {
            let increment = se3::log(&(model * self.eval_data.model.inverse()));
            Err(Rejection::HigherEnergy {
                energy,
                step_norm_2: increment.norm_squared(),
            })
        }
    }

    /// Stop after `max_iterations` accepted steps, when the relative energy
    /// decrease is too small, or when a rejected step was too small.
    ///
    /// Also update the Levenberg-Marquardt coefficient
    /// depending on if the energy increased or decreased.
    fn stop_criterion(self, _nb_iter: usize, eval_state: EvalState) -> (Self, Continue) {
        let settings = self.settings;
        match eval_state {
            Err(Rejection::Diverged) => {
                let kept_state = Self {
                    failure: Some(LevelFailure::Diverged),
                    ..self
                };
                (kept_state, Continue::Forward)
            }
            Err(Rejection::HigherEnergy { step_norm_2, .. }) => {
                if !(step_norm_2 > settings.step_size_min) {
                    return (self, Continue::Stop);
                }
                let nb_tries = self.nb_tries + 1;
                let lm_coef = if self.lm_coef == 0.0 {
                    0.2
                } else {
                    self.lm_coef * settings.lambda_fail_fac.powi(nb_tries)
                };
                let kept_state = Self {
                    lm_coef,
                    nb_tries,
                    ..self
                };
                (kept_state, Continue::Forward)
            }
            Ok(eval_data) => {
                let converged = eval_data.energy / self.eval_data.energy > settings.convergence_eps;
                let nb_accepted = self.nb_accepted + 1;
                let lm_coef = if self.lm_coef <= 0.2 {
                    0.0
                } else {
                    self.lm_coef * settings.lambda_success_fac
                };
                let continuation = if converged || nb_accepted >= settings.max_iterations {
                    Continue::Stop
                } else {
                    Continue::Forward
                };
                let kept_state = Self {
                    lm_coef,
                    nb_tries: 0,
                    nb_accepted,
                    eval_data,
                    ..self
                };
                (kept_state, continuation)
            }
        }
    } // fn stop_criterion
} // impl OptimizerState<...> for LMOptimizerState

impl EvalData {
    fn diverged(model: Se3) -> Self {
        Self {
            hessian: Mat6::zeros(),
            gradient: Vec6::zeros(),
            energy: Float::INFINITY,
            model,
            warped_count: 0,
            good_count: 0,
            bad_count: 0,
            point_usage: 0.0,
        }
    }
}

// Helper ######################################################################

/// Jacobian of the target intensity at a warped point
/// with respect to a left increment of the motion.
#[allow(clippy::many_single_char_names)]
fn jacobian(p: &WarpedPoint) -> Vec6 {
    let (x, y, gx, gy) = (p.x, p.y, p.gx, p.gy);
    let z = 1.0 / p.z;
    let z_2 = z * z;
    Vec6::new(
        z * gx,
        z * gy,
        -(x * gx + y * gy) * z_2,
        -x * y * z_2 * gx - (1.0 + y * y * z_2) * gy,
        (1.0 + x * x * z_2) * gx + x * y * z_2 * gy,
        -y * z * gx + x * z * gy,
    )
}

// TESTS #############################################################
