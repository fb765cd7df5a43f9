//! Stochastic gradient descent with momentum.
//!
//! SGD is the one optimizer here that never line-searches: its step size
//! follows a configured [`LearningRateSchedule`], optionally decayed per
//! epoch, and one epoch iterates over the model's mini-batches. With
//! momentum `m` and per-batch gradient `g`:
//!
//! ```text
//! v ← m·v − η·g
//! p ← p + v
//! ```
//!
//! The Nesterov variant applies `p ← p + m·v − η·g` after the velocity
//! update, looking ahead along the accumulated momentum. An optional
//! gradient-norm clip bounds exploding mini-batch gradients before they
//! enter the velocity.
//!
//! The stopping criteria are shared with the line-search optimizers; the
//! per-epoch loss they see is the mean over the epoch's batches, and the
//! gradient norm is taken from the last batch of the epoch (no extra
//! full-dataset pass).

use std::time::Instant;

use lossfit_core::callback::{EpochReport, PrintProgress, TrainingCallback};
use lossfit_core::error::{Result, TrainingError};
use lossfit_core::loss::{check_gradient_dimension, Batch, LossModel};
use lossfit_core::schedule::LearningRateSchedule;
use lossfit_core::state::IterationState;
use lossfit_core::stopping::{StoppingCriteria, StoppingReason};
use lossfit_core::train::TrainingResults;
use lossfit_core::types::{DVector, Scalar};
use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hyperparameters of the SGD optimizer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SgdConfig<T: Scalar> {
    /// Per-epoch learning-rate schedule.
    pub learning_rate: LearningRateSchedule<T>,

    /// Momentum coefficient in `[0, 1)`; zero disables momentum.
    pub momentum: T,

    /// Use the Nesterov look-ahead update. Requires momentum > 0.
    pub nesterov: bool,

    /// Clip mini-batch gradients to this norm before the velocity update.
    pub gradient_clip: Option<T>,
}

impl<T: Scalar> Default for SgdConfig<T> {
    fn default() -> Self {
        Self {
            learning_rate: LearningRateSchedule::Constant(<T as Scalar>::from_f64(0.01)),
            momentum: T::zero(),
            nesterov: false,
            gradient_clip: None,
        }
    }
}

impl<T: Scalar> SgdConfig<T> {
    /// Creates a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the learning-rate schedule.
    pub fn with_learning_rate(mut self, schedule: LearningRateSchedule<T>) -> Self {
        self.learning_rate = schedule;
        self
    }

    /// Sets a constant learning rate.
    pub fn with_constant_learning_rate(mut self, rate: T) -> Self {
        self.learning_rate = LearningRateSchedule::Constant(rate);
        self
    }

    /// Sets the momentum coefficient.
    pub fn with_momentum(mut self, momentum: T) -> Self {
        self.momentum = momentum;
        self
    }

    /// Enables the Nesterov look-ahead update.
    pub fn with_nesterov(mut self) -> Self {
        self.nesterov = true;
        self
    }

    /// Sets the gradient-norm clipping threshold.
    pub fn with_gradient_clip(mut self, threshold: T) -> Self {
        self.gradient_clip = Some(threshold);
        self
    }

    /// Validates the configuration at the configuration boundary.
    pub fn validate(&self) -> Result<()> {
        let initial = self.learning_rate.initial();
        if initial <= T::zero() || !Float::is_finite(initial) {
            return Err(TrainingError::invalid_configuration(
                "initial learning rate must be positive and finite",
                "learning_rate",
                format!("{initial}"),
            ));
        }
        if self.momentum < T::zero() || self.momentum >= T::one() {
            return Err(TrainingError::invalid_configuration(
                "momentum must be in [0, 1)",
                "momentum",
                format!("{}", self.momentum),
            ));
        }
        if self.nesterov && self.momentum == T::zero() {
            return Err(TrainingError::invalid_configuration(
                "Nesterov updates require a positive momentum",
                "nesterov",
                "true",
            ));
        }
        if let Some(clip) = self.gradient_clip {
            if clip <= T::zero() || !Float::is_finite(clip) {
                return Err(TrainingError::invalid_configuration(
                    "gradient clip must be positive and finite",
                    "gradient_clip",
                    format!("{clip}"),
                ));
            }
        }
        Ok(())
    }
}

/// Mini-batch stochastic gradient descent with momentum.
///
/// # Examples
///
/// ```
/// use lossfit_core::loss::test_losses::QuadraticLoss;
/// use lossfit_core::prelude::*;
/// use lossfit_optim::{SgdConfig, StochasticGradientDescent};
///
/// let mut model = QuadraticLoss::simple(DVector::from_vec(vec![1.0_f64, -1.0]));
/// let mut optimizer = StochasticGradientDescent::new(
///     SgdConfig::new()
///         .with_constant_learning_rate(0.1)
///         .with_momentum(0.9),
/// );
/// optimizer.set_stopping_criteria(
///     StoppingCriteria::new()
///         .with_maximum_epochs(500)
///         .with_gradient_norm_goal(1e-6),
/// );
///
/// let results = optimizer.perform_training(&mut model).unwrap();
/// assert!(results.converged);
/// ```
#[derive(Debug, Clone)]
pub struct StochasticGradientDescent<T: Scalar> {
    config: SgdConfig<T>,
    criteria: StoppingCriteria<T>,
    display: bool,
    display_period: usize,
}

impl<T: Scalar> StochasticGradientDescent<T> {
    /// Creates an optimizer with the given configuration.
    pub fn new(config: SgdConfig<T>) -> Self {
        Self {
            config,
            criteria: StoppingCriteria::default(),
            display: false,
            display_period: 10,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SgdConfig<T> {
        &self.config
    }

    /// Returns the optimizer name.
    pub fn name(&self) -> &str {
        if self.config.nesterov {
            "Stochastic Gradient Descent (Nesterov)"
        } else {
            "Stochastic Gradient Descent"
        }
    }

    /// Replaces the stopping criteria.
    pub fn set_stopping_criteria(&mut self, criteria: StoppingCriteria<T>) {
        self.criteria = criteria;
    }

    /// Returns the stopping criteria.
    pub fn stopping_criteria(&self) -> &StoppingCriteria<T> {
        &self.criteria
    }

    /// Enables or disables the progress display. No effect on the
    /// algorithm itself.
    pub fn set_display(&mut self, display: bool) {
        self.display = display;
    }

    /// Sets the progress display period, in epochs.
    pub fn set_display_period(&mut self, period: usize) {
        self.display_period = period.max(1);
    }

    /// Trains the model to termination. Synchronous and blocking.
    pub fn perform_training<M: LossModel<T>>(&mut self, model: &mut M) -> Result<TrainingResults<T>> {
        self.run(model, None)
    }

    /// Trains the model with a caller-supplied callback polled at every
    /// epoch boundary.
    pub fn perform_training_with_callback<M: LossModel<T>>(
        &mut self,
        model: &mut M,
        callback: &mut dyn TrainingCallback<T>,
    ) -> Result<TrainingResults<T>> {
        self.run(model, Some(callback))
    }

    fn clip_gradient(&self, gradient: &mut DVector<T>) {
        if let Some(threshold) = self.config.gradient_clip {
            let norm = gradient.norm();
            if norm > threshold {
                *gradient *= threshold / norm;
            }
        }
    }

    fn run<M: LossModel<T>>(
        &mut self,
        model: &mut M,
        mut callback: Option<&mut dyn TrainingCallback<T>>,
    ) -> Result<TrainingResults<T>> {
        self.config.validate()?;
        self.criteria.validate()?;

        let parameters_count = model.parameters_count();
        if parameters_count == 0 {
            return Err(TrainingError::invalid_configuration(
                "model has no trainable parameters",
                "parameters_count",
                "0",
            ));
        }
        let batches = model.minibatch_count();
        if batches == 0 {
            return Err(TrainingError::invalid_configuration(
                "model reports no mini-batches",
                "minibatch_count",
                "0",
            ));
        }

        let start = Instant::now();
        let mut parameters = model.parameters();
        if parameters.len() != parameters_count {
            return Err(TrainingError::dimension_mismatch(
                parameters_count,
                parameters.len(),
            ));
        }

        let (loss, gradient) = model.evaluate(&Batch::Full)?;
        check_gradient_dimension(&gradient, parameters_count)?;

        let mut printer = self.display.then(|| PrintProgress::new(self.display_period));
        if let Some(callback) = callback.as_deref_mut() {
            callback.on_training_start();
        }

        let mut state = IterationState::new(parameters.clone(), loss, gradient);
        let mut loss_history = vec![state.loss];
        let mut selection_history = Vec::new();

        if !Float::is_finite(loss) || !all_finite(&state.gradient) {
            return Ok(self.finish(
                &state,
                StoppingReason::NumericalFailure,
                start,
                loss_history,
                selection_history,
                printer.as_mut(),
                callback,
            ));
        }
        if let Some(selection) = model.selection_loss()? {
            state.record_selection_loss(selection);
            selection_history.push(selection);
        }

        let mut velocity: DVector<T> = DVector::zeros(parameters_count);
        let momentum = self.config.momentum;

        loop {
            let gradient_norm = state.gradient_norm();
            let elapsed = start.elapsed();

            if let Some(reason) = self.criteria.check(
                state.loss,
                state.old_loss,
                gradient_norm,
                state.epoch,
                elapsed,
                state.selection_failures,
            ) {
                return Ok(self.finish(
                    &state,
                    reason,
                    start,
                    loss_history,
                    selection_history,
                    printer.as_mut(),
                    callback,
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
            if let Some(callback) = callback.as_deref_mut() {
                if !callback.on_epoch_end(&report) {
                    return Ok(self.finish(
                        &state,
                        StoppingReason::UserStop,
                        start,
                        loss_history,
                        selection_history,
                        printer.as_mut(),
                        Some(callback),
                    ));
                }
            }

            let learning_rate = self.config.learning_rate.learning_rate(state.epoch);
            let mut epoch_loss = T::zero();
            let mut last_gradient = state.gradient.clone();

            for index in 0..batches {
                let (batch_loss, mut batch_gradient) = model.evaluate(&Batch::Mini(index))?;
                check_gradient_dimension(&batch_gradient, parameters_count)?;
                state.loss_evaluations += 1;
                state.gradient_evaluations += 1;

                if !Float::is_finite(batch_loss) || !all_finite(&batch_gradient) {
                    state.loss = batch_loss;
                    state.gradient = batch_gradient;
                    return Ok(self.finish(
                        &state,
                        StoppingReason::NumericalFailure,
                        start,
                        loss_history,
                        selection_history,
                        printer.as_mut(),
                        callback,
                    ));
                }

                self.clip_gradient(&mut batch_gradient);

                // v <- m*v - lr*g, then step by v (or look ahead for
                // Nesterov).
                velocity *= momentum;
                velocity.axpy(-learning_rate, &batch_gradient, T::one());
                if self.config.nesterov {
                    parameters.axpy(momentum, &velocity, T::one());
                    parameters.axpy(-learning_rate, &batch_gradient, T::one());
                } else {
                    parameters += &velocity;
                }
                model.set_parameters(parameters.clone())?;

                epoch_loss += batch_loss;
                last_gradient = batch_gradient;
            }

            let mean_loss = epoch_loss / <T as Scalar>::from_usize(batches);
            state.advance(
                parameters.clone(),
                mean_loss,
                last_gradient,
                velocity.clone(),
                learning_rate,
            );

            loss_history.push(state.loss);
            if let Some(selection) = model.selection_loss()? {
                state.record_selection_loss(selection);
                selection_history.push(selection);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        state: &IterationState<T>,
        reason: StoppingReason,
        start: Instant,
        loss_history: Vec<T>,
        selection_history: Vec<T>,
        printer: Option<&mut PrintProgress>,
        callback: Option<&mut dyn TrainingCallback<T>>,
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
        if let Some(printer) = printer {
            TrainingCallback::<T>::on_training_end(printer, &report);
        }
        if let Some(callback) = callback {
            callback.on_training_end(&report);
        }

        TrainingResults::new(state.loss, state.gradient_norm(), state.epoch, elapsed, reason)
            .with_evaluations(state.loss_evaluations, state.gradient_evaluations)
            .with_loss_history(loss_history)
            .with_selection_history(selection_history)
    }
}

impl<T: Scalar> Default for StochasticGradientDescent<T> {
    fn default() -> Self {
        Self::new(SgdConfig::default())
    }
}

fn all_finite<T: Scalar>(vector: &DVector<T>) -> bool {
    vector.iter().all(|value| Float::is_finite(*value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lossfit_core::loss::test_losses::{LeastSquaresLoss, QuadraticLoss};
    use lossfit_core::types::DMatrix;

    #[test]
    fn test_config_validation() {
        assert!(SgdConfig::<f64>::new().validate().is_ok());
        assert!(SgdConfig::<f64>::new().with_momentum(1.0).validate().is_err());
        assert!(SgdConfig::<f64>::new()
            .with_constant_learning_rate(0.0)
            .validate()
            .is_err());
        assert!(SgdConfig::<f64>::new().with_nesterov().validate().is_err());
        assert!(SgdConfig::<f64>::new()
            .with_momentum(0.9)
            .with_nesterov()
            .validate()
            .is_ok());
    }

    #[test]
    fn test_gradient_clipping() {
        let optimizer = StochasticGradientDescent::new(
            SgdConfig::<f64>::new().with_gradient_clip(1.0),
        );
        let mut gradient = DVector::from_vec(vec![3.0, 4.0]);
        optimizer.clip_gradient(&mut gradient);
        assert_relative_eq!(gradient.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(gradient[0], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_momentum_accelerates_convergence() {
        let initial = DVector::from_vec(vec![2.0_f64, -3.0]);
        let criteria = StoppingCriteria::new()
            .with_maximum_epochs(2000)
            .with_gradient_norm_goal(1e-6);

        let mut plain_model = QuadraticLoss::simple(initial.clone());
        let mut plain = StochasticGradientDescent::new(
            SgdConfig::new().with_constant_learning_rate(0.01),
        );
        plain.set_stopping_criteria(criteria.clone());
        let plain_results = plain.perform_training(&mut plain_model).unwrap();

        let mut momentum_model = QuadraticLoss::simple(initial);
        let mut momentum = StochasticGradientDescent::new(
            SgdConfig::new()
                .with_constant_learning_rate(0.01)
                .with_momentum(0.9),
        );
        momentum.set_stopping_criteria(criteria);
        let momentum_results = momentum.perform_training(&mut momentum_model).unwrap();

        assert!(plain_results.converged);
        assert!(momentum_results.converged);
        assert!(momentum_results.epochs < plain_results.epochs);
    }

    #[test]
    fn test_minibatch_epoch_touches_every_batch() {
        // Two mini-batches per epoch: each epoch performs two loss and two
        // gradient evaluations beyond the initial full pass.
        let design = DMatrix::from_row_slice(4, 1, &[1.0_f64, 2.0, 3.0, 4.0]);
        let targets = DVector::from_vec(vec![2.0_f64, 4.0, 6.0, 8.0]);
        let mut model =
            LeastSquaresLoss::new(design, targets, DVector::from_vec(vec![0.0])).with_batches(2);

        let mut optimizer = StochasticGradientDescent::new(
            SgdConfig::new().with_constant_learning_rate(0.01),
        );
        optimizer.set_stopping_criteria(StoppingCriteria::new().with_maximum_epochs(5));
        let results = optimizer.perform_training(&mut model).unwrap();

        assert_eq!(results.epochs, 5);
        assert_eq!(results.loss_evaluations, 1 + 5 * 2);
        assert_eq!(results.gradient_evaluations, 1 + 5 * 2);
    }

    #[test]
    fn test_decayed_rate_shrinks_steps() {
        let schedule = LearningRateSchedule::InverseTimeDecay {
            initial: 0.5_f64,
            decay: 1.0,
        };
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![1.0_f64]));
        let mut optimizer =
            StochasticGradientDescent::new(SgdConfig::new().with_learning_rate(schedule));
        optimizer.set_stopping_criteria(StoppingCriteria::new().with_maximum_epochs(3));
        optimizer.perform_training(&mut model).unwrap();

        // Step sizes follow the schedule: 0.5, 0.25, 0.166..
        assert_relative_eq!(schedule.learning_rate(1), 0.25);
    }

    #[test]
    fn test_selection_failures_stop_training() {
        /// Quadratic training loss with a selection loss that always
        /// increases.
        #[derive(Debug)]
        struct OverfittingModel {
            inner: QuadraticLoss<f64>,
            selection: f64,
        }

        impl LossModel<f64> for OverfittingModel {
            fn parameters_count(&self) -> usize {
                self.inner.parameters_count()
            }
            fn parameters(&self) -> DVector<f64> {
                self.inner.parameters()
            }
            fn set_parameters(&mut self, parameters: DVector<f64>) -> Result<()> {
                self.inner.set_parameters(parameters)
            }
            fn evaluate(&mut self, batch: &Batch) -> Result<(f64, DVector<f64>)> {
                self.inner.evaluate(batch)
            }
            fn selection_loss(&mut self) -> Result<Option<f64>> {
                self.selection += 1.0;
                Ok(Some(self.selection))
            }
        }

        let mut model = OverfittingModel {
            inner: QuadraticLoss::simple(DVector::from_vec(vec![4.0])),
            selection: 0.0,
        };
        let mut optimizer = StochasticGradientDescent::new(
            SgdConfig::new().with_constant_learning_rate(0.01),
        );
        optimizer.set_stopping_criteria(
            StoppingCriteria::new()
                .with_maximum_epochs(1000)
                .with_maximum_selection_failures(4),
        );

        let results = optimizer.perform_training(&mut model).unwrap();
        assert_eq!(
            results.stopping_reason,
            StoppingReason::MaximumSelectionFailures
        );
        assert!(results.epochs < 1000);
        assert_eq!(results.selection_history.len(), results.epochs + 1);
    }
}
