//! Shared epoch loop and training results.
//!
//! Every line-search optimizer runs the same state machine
//! (`Initialized → Running → {Converged, Exhausted, Failed}`); only the
//! search-direction computation differs. The loop lives here as a single
//! free function, [`descend`], parameterized over a [`DirectionStrategy`].
//! The loop owns the [`IterationState`] and hands it to the strategy by
//! reference each epoch; strategies never reach back into their driver.
//!
//! One epoch: check the stopping criteria and callbacks → compute the
//! direction → verify it is a descent direction (falling back to steepest
//! descent and resetting the strategy when it is not) → line search,
//! seeded with the previously accepted step → apply `p ← p + η·d` →
//! re-evaluate loss and gradient → update the selection-failure streak.
//!
//! Non-finite losses or gradients terminate the run immediately with
//! [`StoppingReason::NumericalFailure`]; the run is reported, not retried.

use std::fmt::Debug;
use std::time::Instant;

use num_traits::Float;

use crate::callback::{EpochReport, PrintProgress, TrainingCallback};
use crate::error::{Result, TrainingError};
use crate::line_search::{self, LineSearchParams};
use crate::loss::{check_gradient_dimension, Batch, LossModel};
use crate::state::IterationState;
use crate::stopping::{StoppingCriteria, StoppingReason};
use crate::types::{DVector, Scalar};

/// Consecutive zero-step epochs tolerated before the run is declared
/// stalled.
const STALL_LIMIT: usize = 2;

/// Outcome of a training run. Immutable once returned.
#[derive(Debug, Clone)]
pub struct TrainingResults<T: Scalar> {
    /// Training loss at the final parameters.
    pub final_loss: T,

    /// Gradient norm at the final parameters.
    pub final_gradient_norm: T,

    /// Completed epochs.
    pub epochs: usize,

    /// Wall-clock duration of the run.
    pub elapsed: std::time::Duration,

    /// Why the run terminated.
    pub stopping_reason: StoppingReason,

    /// True when the run ended by reaching a loss or gradient goal.
    pub converged: bool,

    /// Total loss evaluations, line-search trials included.
    pub loss_evaluations: usize,

    /// Total gradient evaluations.
    pub gradient_evaluations: usize,

    /// Training loss per epoch, starting with the initial loss.
    pub loss_history: Vec<T>,

    /// Selection loss per epoch; empty when the model has no held-out
    /// split.
    pub selection_history: Vec<T>,
}

impl<T: Scalar> TrainingResults<T> {
    /// Creates results with empty histories and zero evaluation counts.
    pub fn new(
        final_loss: T,
        final_gradient_norm: T,
        epochs: usize,
        elapsed: std::time::Duration,
        stopping_reason: StoppingReason,
    ) -> Self {
        let converged = matches!(
            stopping_reason,
            StoppingReason::LossGoalReached | StoppingReason::GradientNormGoal
        );
        Self {
            final_loss,
            final_gradient_norm,
            epochs,
            elapsed,
            stopping_reason,
            converged,
            loss_evaluations: 0,
            gradient_evaluations: 0,
            loss_history: Vec::new(),
            selection_history: Vec::new(),
        }
    }

    /// Sets the evaluation counters.
    pub fn with_evaluations(mut self, loss_evaluations: usize, gradient_evaluations: usize) -> Self {
        self.loss_evaluations = loss_evaluations;
        self.gradient_evaluations = gradient_evaluations;
        self
    }

    /// Sets the per-epoch loss history.
    pub fn with_loss_history(mut self, history: Vec<T>) -> Self {
        self.loss_history = history;
        self
    }

    /// Sets the per-epoch selection-loss history.
    pub fn with_selection_history(mut self, history: Vec<T>) -> Self {
        self.selection_history = history;
        self
    }
}

/// Per-optimizer search-direction computation.
///
/// Implementations keep whatever history they need (conjugacy, curvature)
/// and read the rest from the [`IterationState`] they are handed.
pub trait DirectionStrategy<T: Scalar>: Debug {
    /// Human-readable algorithm name, for display and diagnostics.
    fn name(&self) -> &str;

    /// Computes the search direction for the coming epoch.
    fn compute_direction(&mut self, state: &IterationState<T>) -> Result<DVector<T>>;

    /// Drops accumulated history, restarting from steepest descent.
    fn reset(&mut self);
}

/// Caller-facing knobs of the shared loop.
pub struct TrainingOptions<'a, T: Scalar> {
    /// Print a progress line every `display_period` epochs.
    pub display: bool,

    /// Period, in epochs, of the progress display.
    pub display_period: usize,

    /// Caller-supplied observer, polled at every epoch boundary.
    pub callback: Option<&'a mut dyn TrainingCallback<T>>,
}

impl<T: Scalar> Default for TrainingOptions<'_, T> {
    fn default() -> Self {
        Self {
            display: false,
            display_period: 10,
            callback: None,
        }
    }
}

fn is_fatal(error: &TrainingError) -> bool {
    matches!(error, TrainingError::NumericalError { .. })
}

fn all_finite<T: Scalar>(vector: &DVector<T>) -> bool {
    vector.iter().all(|value| Float::is_finite(*value))
}

/// Runs the shared epoch loop to termination.
///
/// Validates the configuration, performs the initial evaluation, then
/// iterates epochs until a stopping criterion, the callback, a stall, or a
/// numerical failure ends the run.
pub fn descend<T, M, S>(
    strategy: &mut S,
    model: &mut M,
    line_search: &LineSearchParams<T>,
    criteria: &StoppingCriteria<T>,
    options: &mut TrainingOptions<'_, T>,
) -> Result<TrainingResults<T>>
where
    T: Scalar,
    M: LossModel<T>,
    S: DirectionStrategy<T> + ?Sized,
{
    criteria.validate()?;
    line_search.validate()?;

    let parameters_count = model.parameters_count();
    if parameters_count == 0 {
        return Err(TrainingError::invalid_configuration(
            "model has no trainable parameters",
            "parameters_count",
            "0",
        ));
    }

    let start = Instant::now();
    strategy.reset();

    let parameters = model.parameters();
    if parameters.len() != parameters_count {
        return Err(TrainingError::dimension_mismatch(
            parameters_count,
            parameters.len(),
        ));
    }

    let (loss, gradient) = model.evaluate(&Batch::Full)?;
    check_gradient_dimension(&gradient, parameters_count)?;

    let mut printer = options.display.then(|| PrintProgress::new(options.display_period));
    if let Some(callback) = options.callback.as_deref_mut() {
        callback.on_training_start();
    }

    if !Float::is_finite(loss) || !all_finite(&gradient) {
        let state = IterationState::new(parameters, loss, gradient);
        return Ok(finish(
            &state,
            StoppingReason::NumericalFailure,
            start,
            vec![loss],
            Vec::new(),
            options,
        ));
    }

    let mut state = IterationState::new(parameters, loss, gradient);
    let mut loss_history = vec![state.loss];
    let mut selection_history = Vec::new();
    if let Some(selection) = model.selection_loss()? {
        state.record_selection_loss(selection);
        selection_history.push(selection);
    }

    let mut stalled_epochs = 0;

    loop {
        let gradient_norm = state.gradient_norm();
        let elapsed = start.elapsed();

        if let Some(reason) = criteria.check(
            state.loss,
            state.old_loss,
            gradient_norm,
            state.epoch,
            elapsed,
            state.selection_failures,
        ) {
            return Ok(finish(&state, reason, start, loss_history, selection_history, options));
        }

        if stalled_epochs >= STALL_LIMIT {
            return Ok(finish(
                &state,
                StoppingReason::MinimumLossDecrease,
                start,
                loss_history,
                selection_history,
                options,
            ));
        }

        let report = EpochReport {
            epoch: state.epoch,
            loss: state.loss,
            gradient_norm,
            step_size: state.step_size,
            selection_loss: state.selection_loss,
            elapsed,
        };
        if let Some(printer) = printer.as_mut() {
            TrainingCallback::<T>::on_epoch_end(printer, &report);
        }
        if let Some(callback) = options.callback.as_deref_mut() {
            if !callback.on_epoch_end(&report) {
                return Ok(finish(
                    &state,
                    StoppingReason::UserStop,
                    start,
                    loss_history,
                    selection_history,
                    options,
                ));
            }
        }

        let mut direction = match strategy.compute_direction(&state) {
            Ok(direction) => direction,
            Err(error) if is_fatal(&error) => {
                return Ok(finish(
                    &state,
                    StoppingReason::NumericalFailure,
                    start,
                    loss_history,
                    selection_history,
                    options,
                ));
            }
            Err(error) => return Err(error),
        };

        // The strategy may emit a non-descent direction after numerical
        // drift; fall back to steepest descent for this epoch.
        let slope = direction.dot(&state.gradient);
        if slope >= T::zero() || !Float::is_finite(slope) {
            strategy.reset();
            direction = -&state.gradient;
        }

        let search = match line_search::search(
            model,
            line_search,
            &state.parameters,
            &direction,
            state.loss,
            state.step_size,
        ) {
            Ok(search) => search,
            Err(error) if is_fatal(&error) => {
                return Ok(finish(
                    &state,
                    StoppingReason::NumericalFailure,
                    start,
                    loss_history,
                    selection_history,
                    options,
                ));
            }
            Err(error) => return Err(error),
        };
        state.loss_evaluations += search.evaluations;

        if search.step_size == T::zero() {
            // No improving step along the ray: count the epoch, keep the
            // parameters, and let the stall guard or the minimum-decrease
            // criterion end the run.
            stalled_epochs += 1;
            let parameters = state.parameters.clone();
            let loss = state.loss;
            let gradient = state.gradient.clone();
            state.advance(parameters, loss, gradient, direction, T::zero());
        } else {
            stalled_epochs = 0;
            let parameters = &state.parameters + &direction * search.step_size;
            model.set_parameters(parameters.clone())?;
            let (loss, gradient) = model.evaluate(&Batch::Full)?;
            check_gradient_dimension(&gradient, parameters_count)?;
            state.loss_evaluations += 1;
            state.gradient_evaluations += 1;

            if !Float::is_finite(loss) || !all_finite(&gradient) {
                state.advance(parameters, loss, gradient, direction, search.step_size);
                return Ok(finish(
                    &state,
                    StoppingReason::NumericalFailure,
                    start,
                    loss_history,
                    selection_history,
                    options,
                ));
            }
            state.advance(parameters, loss, gradient, direction, search.step_size);
        }

        loss_history.push(state.loss);
        if let Some(selection) = model.selection_loss()? {
            state.record_selection_loss(selection);
            selection_history.push(selection);
        }
    }
}

fn finish<T: Scalar>(
    state: &IterationState<T>,
    reason: StoppingReason,
    start: Instant,
    loss_history: Vec<T>,
    selection_history: Vec<T>,
    options: &mut TrainingOptions<'_, T>,
) -> TrainingResults<T> {
    let elapsed = start.elapsed();
    let report = EpochReport {
        epoch: state.epoch,
        loss: state.loss,
        gradient_norm: state.gradient_norm(),
        step_size: state.step_size,
        selection_loss: state.selection_loss,
        elapsed,
    };
    if options.display {
        TrainingCallback::<T>::on_training_end(&mut PrintProgress::new(options.display_period), &report);
    }
    if let Some(callback) = options.callback.as_deref_mut() {
        callback.on_training_end(&report);
    }

    TrainingResults::new(state.loss, state.gradient_norm(), state.epoch, elapsed, reason)
        .with_evaluations(state.loss_evaluations, state.gradient_evaluations)
        .with_loss_history(loss_history)
        .with_selection_history(selection_history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::test_losses::QuadraticLoss;
    use approx::assert_relative_eq;

    /// Plain steepest descent, the simplest possible strategy.
    #[derive(Debug)]
    struct SteepestDescent;

    impl DirectionStrategy<f64> for SteepestDescent {
        fn name(&self) -> &str {
            "Steepest Descent"
        }

        fn compute_direction(&mut self, state: &IterationState<f64>) -> Result<DVector<f64>> {
            Ok(-&state.gradient)
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_descend_converges_on_quadratic() {
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![3.0_f64, -4.0]));
        let criteria = StoppingCriteria::new()
            .with_maximum_epochs(100)
            .with_gradient_norm_goal(1e-9);

        let results = descend(
            &mut SteepestDescent,
            &mut model,
            &LineSearchParams::default(),
            &criteria,
            &mut TrainingOptions::default(),
        )
        .unwrap();

        assert!(results.converged);
        assert_eq!(results.stopping_reason, StoppingReason::GradientNormGoal);
        assert!(results.final_loss < 1e-10);
        assert!(results.epochs < 100);
        assert_relative_eq!(results.loss_history[0], 25.0);
        assert!(results.loss_evaluations > results.epochs);
    }

    #[test]
    fn test_zero_epoch_budget_returns_immediately() {
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![5.0_f64]));
        let criteria = StoppingCriteria::new().with_maximum_epochs(0);

        let results = descend(
            &mut SteepestDescent,
            &mut model,
            &LineSearchParams::default(),
            &criteria,
            &mut TrainingOptions::default(),
        )
        .unwrap();

        assert_eq!(results.stopping_reason, StoppingReason::MaximumEpochsReached);
        assert_eq!(results.epochs, 0);
        assert_relative_eq!(model.parameters()[0], 5.0);
    }

    #[test]
    fn test_stall_guard_stops_at_minimum() {
        // Start exactly at the minimum with permissive criteria: every
        // line search stalls and the guard must end the run.
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![0.0_f64]));
        let criteria = StoppingCriteria::new().with_maximum_epochs(10_000);

        let results = descend(
            &mut SteepestDescent,
            &mut model,
            &LineSearchParams::default(),
            &criteria,
            &mut TrainingOptions::default(),
        )
        .unwrap();

        assert_eq!(results.stopping_reason, StoppingReason::MinimumLossDecrease);
        assert!(results.epochs <= 3);
    }

    #[test]
    fn test_user_stop_via_callback() {
        struct StopImmediately;
        impl TrainingCallback<f64> for StopImmediately {
            fn on_epoch_end(&mut self, _report: &EpochReport<f64>) -> bool {
                false
            }
        }

        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![5.0_f64]));
        let mut callback = StopImmediately;
        let mut options = TrainingOptions {
            callback: Some(&mut callback),
            ..TrainingOptions::default()
        };

        let results = descend(
            &mut SteepestDescent,
            &mut model,
            &LineSearchParams::default(),
            &StoppingCriteria::new(),
            &mut options,
        )
        .unwrap();

        assert_eq!(results.stopping_reason, StoppingReason::UserStop);
        assert_eq!(results.epochs, 0);
    }

    #[test]
    fn test_non_finite_loss_is_fatal() {
        /// Produces a NaN loss on every evaluation after the first.
        #[derive(Debug)]
        struct PoisonedLoss {
            parameters: DVector<f64>,
            evaluations: usize,
        }

        impl LossModel<f64> for PoisonedLoss {
            fn parameters_count(&self) -> usize {
                1
            }
            fn parameters(&self) -> DVector<f64> {
                self.parameters.clone()
            }
            fn set_parameters(&mut self, parameters: DVector<f64>) -> Result<()> {
                self.parameters = parameters;
                Ok(())
            }
            fn evaluate(&mut self, _batch: &Batch) -> Result<(f64, DVector<f64>)> {
                self.evaluations += 1;
                if self.evaluations > 1 {
                    Ok((f64::NAN, DVector::from_vec(vec![f64::NAN])))
                } else {
                    Ok((1.0, DVector::from_vec(vec![1.0])))
                }
            }
        }

        let mut model = PoisonedLoss {
            parameters: DVector::from_vec(vec![1.0]),
            evaluations: 0,
        };

        let results = descend(
            &mut SteepestDescent,
            &mut model,
            &LineSearchParams::default(),
            &StoppingCriteria::new(),
            &mut TrainingOptions::default(),
        )
        .unwrap();

        assert_eq!(results.stopping_reason, StoppingReason::NumericalFailure);
        assert!(!results.converged);
    }

    #[test]
    fn test_zero_parameter_model_is_rejected() {
        #[derive(Debug)]
        struct EmptyModel;
        impl LossModel<f64> for EmptyModel {
            fn parameters_count(&self) -> usize {
                0
            }
            fn parameters(&self) -> DVector<f64> {
                DVector::zeros(0)
            }
            fn set_parameters(&mut self, _parameters: DVector<f64>) -> Result<()> {
                Ok(())
            }
            fn evaluate(&mut self, _batch: &Batch) -> Result<(f64, DVector<f64>)> {
                Ok((0.0, DVector::zeros(0)))
            }
        }

        let result = descend(
            &mut SteepestDescent,
            &mut EmptyModel,
            &LineSearchParams::default(),
            &StoppingCriteria::new(),
            &mut TrainingOptions::default(),
        );
        assert!(matches!(
            result,
            Err(TrainingError::InvalidConfiguration { .. })
        ));
    }
}
