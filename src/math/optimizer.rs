// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Guiding trait to implement iterative optimization algorithms.

/// Enum used to indicate if iterations should continue or stop.
/// Must be returned by the `stop_criterion` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continue {
    /// Stop iterations.
    Stop,
    /// Continue iterations.
    Forward,
}

/// An `OptimizerState<Observations, EvalState, Model, Error>`
/// is capable of iteratively minimizing an energy function,
/// if provided few functions that are evaluated during iterations.
///
/// * `Observations`: the data used as reference during energy evaluations.
/// * `EvalState`: result of the evaluation of a candidate model.
///   Typically a `Result` short-circuiting the evaluation of everything
///   needed for the next step when the energy did not decrease.
/// * `Model`: the model of what you are trying to optimize.
/// * `Error`: custom error type, returned when a step cannot be computed.
pub trait OptimizerState<Observations, EvalState, Model, Error>
where
    Self: std::marker::Sized,
{
    /// Initialize the optimizer state.
    fn init(obs: &Observations, model: Model) -> Self;

    /// Computes the iteration step from the current optimizer state.
    /// If step computation fails, iterations are stopped
    /// and `iterative_solve` returns the error.
    fn step(&self) -> Result<Model, Error>;

    /// Evaluates the model.
    /// Returns an `EvalState` and not `Self`
    /// so that the evaluation can be short-circuited.
    fn eval(&self, obs: &Observations, new_model: Model) -> EvalState;

    /// Function deciding if iterations should continue.
    /// Also returns the state that will be used for next iteration, or returned if we stop.
    fn stop_criterion(self, nb_iter: usize, eval_state: EvalState) -> (Self, Continue);

    /// Iteratively solve your optimization problem,
    /// with the provided functions by the trait implementation.
    /// Returns the final state and the number of iterations.
    fn iterative_solve(obs: &Observations, initial_model: Model) -> Result<(Self, usize), Error> {
        let mut state = Self::init(obs, initial_model);
        let mut nb_iter = 0;
        loop {
            nb_iter += 1;
            let new_model = state.step()?;
            let eval_state = state.eval(obs, new_model);
            let (kept_state, continuation) = state.stop_criterion(nb_iter, eval_state);
            state = kept_state;
            if let Continue::Stop = continuation {
                return Ok((state, nb_iter));
            }
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    /// Minimize (x - target)^2 with a gradient step of fixed size.
    struct Descent {
        x: f64,
        energy: f64,
    }

    impl OptimizerState<f64, f64, f64, String> for Descent {
        fn init(target: &f64, x: f64) -> Self {
            Self {
                x,
                energy: (x - target).powi(2),
            }
        }

        fn step(&self) -> Result<f64, String> {
            if self.x.is_finite() {
                Ok(self.x)
            } else {
                Err("non finite model".to_string())
            }
        }

        fn eval(&self, target: &f64, x: f64) -> f64 {
            x - 0.5 * (x - target)
        }

        fn stop_criterion(self, nb_iter: usize, new_x: f64) -> (Self, Continue) {
            let continuation = if nb_iter >= 50 {
                Continue::Stop
            } else {
                Continue::Forward
            };
            let energy = (new_x - 3.0).powi(2);
            (Self { x: new_x, energy }, continuation)
        }
    }

    #[test]
    fn iterations_are_counted() {
        let (state, nb_iter) = Descent::iterative_solve(&3.0, 10.0).unwrap();
        assert_eq!(nb_iter, 50);
        assert!(state.energy < 1e-12);
    }

    #[test]
    fn step_error_is_propagated() {
        assert!(Descent::iterative_solve(&3.0, f64::NAN).is_err());
    }
}
