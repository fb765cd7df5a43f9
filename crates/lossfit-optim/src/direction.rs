//! Conjugate direction computation.
//!
//! Each epoch the conjugate-gradient optimizer combines the new negative
//! gradient with a scaled multiple of the previous direction,
//! `d = −g + β·d_old`, where β is the Polak-Ribière or Fletcher-Reeves
//! scalar. Raw β values are clamped into `[0, 1]`: under noisy gradients
//! the PR formula can go negative or unbounded, and the clamp is a hard
//! contract of this implementation, not an approximation of the textbook
//! formulas.
//!
//! # Restart policy
//!
//! Accumulated directional error is bounded by restarting to steepest
//! descent (`d = −g`):
//!
//! - on the first epoch and whenever the driver resets the strategy,
//! - every `restart_period` epochs (`0` means "every `n` epochs", the
//!   parameter count, the standard heuristic),
//! - when the previous gradient underflows (β denominator near zero),
//! - when β lands outside `[0, 1]` for several consecutive epochs
//!   (the clamp keeps firing, so the conjugacy model no longer fits).

use lossfit_core::error::Result;
use lossfit_core::state::IterationState;
use lossfit_core::train::DirectionStrategy;
use lossfit_core::types::{DVector, Scalar};
use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Conjugate direction update formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConjugateMethod {
    /// Polak-Ribière: `β = gᵗ·(g − g₀) / (g₀ᵗ·g₀)`.
    PolakRibiere,
    /// Fletcher-Reeves: `β = (gᵗ·g) / (g₀ᵗ·g₀)`.
    FletcherReeves,
}

/// Polak-Ribière β, clamped into `[0, 1]`.
///
/// Returns zero when the previous gradient underflows (which callers treat
/// as a restart).
pub fn polak_ribiere_beta<T: Scalar>(old_gradient: &DVector<T>, gradient: &DVector<T>) -> T {
    let denominator = old_gradient.dot(old_gradient);
    if denominator < T::CURVATURE_FLOOR {
        return T::zero();
    }
    let raw = gradient.dot(&(gradient - old_gradient)) / denominator;
    Float::min(Float::max(raw, T::zero()), T::one())
}

/// Fletcher-Reeves β, clamped into `[0, 1]`.
pub fn fletcher_reeves_beta<T: Scalar>(old_gradient: &DVector<T>, gradient: &DVector<T>) -> T {
    let denominator = old_gradient.dot(old_gradient);
    if denominator < T::CURVATURE_FLOOR {
        return T::zero();
    }
    let raw = gradient.dot(gradient) / denominator;
    Float::min(Float::max(raw, T::zero()), T::one())
}

/// Conjugacy bookkeeping for one training run.
///
/// Holds only counters; the gradients and the previous direction are read
/// from the [`IterationState`] each epoch.
#[derive(Debug, Clone)]
pub struct ConjugateDirectionUpdater<T: Scalar> {
    method: ConjugateMethod,
    restart_period: usize,
    clamp_restart_streak: usize,
    epochs_since_restart: usize,
    clamp_streak: usize,
    force_restart: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Scalar> ConjugateDirectionUpdater<T> {
    /// Creates an updater. `restart_period == 0` restarts every `n`
    /// epochs, with `n` the parameter count.
    pub fn new(method: ConjugateMethod, restart_period: usize, clamp_restart_streak: usize) -> Self {
        Self {
            method,
            restart_period,
            clamp_restart_streak: clamp_restart_streak.max(1),
            epochs_since_restart: 0,
            clamp_streak: 0,
            force_restart: true,
            _marker: std::marker::PhantomData,
        }
    }

    fn raw_beta(&self, old_gradient: &DVector<T>, gradient: &DVector<T>) -> Option<T> {
        let denominator = old_gradient.dot(old_gradient);
        if denominator < T::CURVATURE_FLOOR {
            return None;
        }
        let raw = match self.method {
            ConjugateMethod::PolakRibiere => {
                gradient.dot(&(gradient - old_gradient)) / denominator
            }
            ConjugateMethod::FletcherReeves => gradient.dot(gradient) / denominator,
        };
        Some(raw)
    }

    fn steepest_descent(&mut self, gradient: &DVector<T>) -> DVector<T> {
        self.epochs_since_restart = 0;
        self.clamp_streak = 0;
        self.force_restart = false;
        -gradient
    }
}

impl<T: Scalar> DirectionStrategy<T> for ConjugateDirectionUpdater<T> {
    fn name(&self) -> &str {
        match self.method {
            ConjugateMethod::PolakRibiere => "Conjugate Gradient (Polak-Ribiere)",
            ConjugateMethod::FletcherReeves => "Conjugate Gradient (Fletcher-Reeves)",
        }
    }

    fn compute_direction(&mut self, state: &IterationState<T>) -> Result<DVector<T>> {
        let period = if self.restart_period == 0 {
            state.parameters.len()
        } else {
            self.restart_period
        };

        if self.force_restart || state.epoch == 0 || self.epochs_since_restart >= period {
            return Ok(self.steepest_descent(&state.gradient));
        }

        let raw = match self.raw_beta(&state.old_gradient, &state.gradient) {
            Some(raw) if Float::is_finite(raw) => raw,
            _ => return Ok(self.steepest_descent(&state.gradient)),
        };

        let beta = Float::min(Float::max(raw, T::zero()), T::one());
        if raw < T::zero() || raw > T::one() {
            self.clamp_streak += 1;
            if self.clamp_streak >= self.clamp_restart_streak {
                return Ok(self.steepest_descent(&state.gradient));
            }
        } else {
            self.clamp_streak = 0;
        }

        self.epochs_since_restart += 1;
        Ok(-&state.gradient + &state.direction * beta)
    }

    fn reset(&mut self) {
        self.epochs_since_restart = 0;
        self.clamp_streak = 0;
        self.force_restart = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn vec2(a: f64, b: f64) -> DVector<f64> {
        DVector::from_vec(vec![a, b])
    }

    #[test]
    fn test_fletcher_reeves_formula() {
        // ||g||^2 / ||g0||^2 = 1/4 before clamping.
        let beta = fletcher_reeves_beta(&vec2(2.0, 0.0), &vec2(1.0, 0.0));
        assert_relative_eq!(beta, 0.25);
    }

    #[test]
    fn test_polak_ribiere_negative_is_clamped_to_zero() {
        // g == g0 scaled down gives a negative PR numerator.
        let beta = polak_ribiere_beta(&vec2(2.0, 0.0), &vec2(1.0, 0.0));
        assert_relative_eq!(beta, 0.0);
    }

    #[test]
    fn test_zero_old_gradient_gives_zero_beta() {
        assert_relative_eq!(polak_ribiere_beta(&vec2(0.0, 0.0), &vec2(1.0, 1.0)), 0.0);
        assert_relative_eq!(fletcher_reeves_beta(&vec2(0.0, 0.0), &vec2(1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_first_epoch_is_steepest_descent() {
        let mut updater =
            ConjugateDirectionUpdater::<f64>::new(ConjugateMethod::PolakRibiere, 0, 3);
        let state = IterationState::new(vec2(1.0, 1.0), 2.0, vec2(2.0, 2.0));
        let direction = updater.compute_direction(&state).unwrap();
        assert_relative_eq!(direction[0], -2.0);
        assert_relative_eq!(direction[1], -2.0);
    }

    #[test]
    fn test_second_epoch_mixes_previous_direction() {
        let mut updater =
            ConjugateDirectionUpdater::<f64>::new(ConjugateMethod::FletcherReeves, 10, 3);
        let mut state = IterationState::new(vec2(1.0, 0.0), 2.0, vec2(2.0, 0.0));
        updater.compute_direction(&state).unwrap();
        state.advance(vec2(0.5, 0.0), 0.5, vec2(1.0, 0.0), vec2(-2.0, 0.0), 0.25);

        let direction = updater.compute_direction(&state).unwrap();
        // beta = 1/4, d = -g + beta * d_old = -1 + 0.25 * (-2) = -1.5.
        assert_relative_eq!(direction[0], -1.5);
    }

    #[test]
    fn test_periodic_restart() {
        let mut updater =
            ConjugateDirectionUpdater::<f64>::new(ConjugateMethod::FletcherReeves, 2, 3);
        let mut state = IterationState::new(vec2(1.0, 0.0), 2.0, vec2(2.0, 0.0));
        updater.compute_direction(&state).unwrap();

        // Two conjugate epochs, then the period forces steepest descent.
        for _ in 0..2 {
            let parameters = state.parameters.clone() * 0.5;
            let gradient = state.gradient.clone() * 0.5;
            let loss = state.loss * 0.25;
            state.advance(parameters, loss, gradient, vec2(-1.0, 0.0), 0.1);
            updater.compute_direction(&state).unwrap();
        }

        let parameters = state.parameters.clone() * 0.5;
        let gradient = state.gradient.clone() * 0.5;
        let loss = state.loss * 0.25;
        state.advance(parameters, loss, gradient, vec2(-1.0, 0.0), 0.1);
        let direction = updater.compute_direction(&state).unwrap();
        assert_relative_eq!(direction[0], -state.gradient[0]);
        assert_relative_eq!(direction[1], -state.gradient[1]);
    }

    proptest! {
        /// Clamped β stays in [0, 1] for arbitrary gradient pairs,
        /// including zero and opposite-sign vectors.
        #[test]
        fn prop_beta_is_clamped(
            g0 in proptest::collection::vec(-1e6_f64..1e6, 4),
            g in proptest::collection::vec(-1e6_f64..1e6, 4),
        ) {
            let g0 = DVector::from_vec(g0);
            let g = DVector::from_vec(g);
            for beta in [polak_ribiere_beta(&g0, &g), fletcher_reeves_beta(&g0, &g)] {
                prop_assert!((0.0..=1.0).contains(&beta));
            }
        }

        #[test]
        fn prop_beta_clamped_for_opposite_gradients(
            g in proptest::collection::vec(-1e3_f64..1e3, 3),
        ) {
            let g = DVector::from_vec(g);
            let opposite = -&g;
            for beta in [polak_ribiere_beta(&g, &opposite), fletcher_reeves_beta(&g, &opposite)] {
                prop_assert!((0.0..=1.0).contains(&beta));
            }
        }
    }
}
