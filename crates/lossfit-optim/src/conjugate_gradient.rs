//! Conjugate-gradient training algorithm.
//!
//! Conjugate gradient improves on steepest descent without storing a
//! matrix: each direction mixes the new negative gradient with the
//! previous direction, scaled by the Polak-Ribière or Fletcher-Reeves β
//! (see [`direction`](crate::direction)). Directions are approximately
//! non-interfering under a quadratic loss model, and the automatic restart
//! policy bounds the error accumulated when the model stops fitting.
//!
//! The epoch loop is the shared [`descend`] state machine.

use lossfit_core::callback::TrainingCallback;
use lossfit_core::error::Result;
use lossfit_core::line_search::LineSearchParams;
use lossfit_core::loss::LossModel;
use lossfit_core::stopping::StoppingCriteria;
use lossfit_core::train::{descend, TrainingOptions, TrainingResults};
use lossfit_core::types::Scalar;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::direction::{ConjugateDirectionUpdater, ConjugateMethod};

/// Hyperparameters of the conjugate-gradient optimizer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConjugateGradientConfig<T: Scalar> {
    /// Direction update formula.
    pub method: ConjugateMethod,

    /// Restart to steepest descent every this many epochs; `0` uses the
    /// parameter count.
    pub restart_period: usize,

    /// Restart after β lands outside `[0, 1]` this many consecutive
    /// epochs.
    pub clamp_restart_streak: usize,

    /// Line-search parameters.
    pub line_search: LineSearchParams<T>,
}

impl<T: Scalar> Default for ConjugateGradientConfig<T> {
    fn default() -> Self {
        Self {
            method: ConjugateMethod::PolakRibiere,
            restart_period: 0,
            clamp_restart_streak: 3,
            line_search: LineSearchParams::default(),
        }
    }
}

impl<T: Scalar> ConjugateGradientConfig<T> {
    /// Creates a configuration with the defaults (Polak-Ribière).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Polak-Ribière configuration.
    pub fn polak_ribiere() -> Self {
        Self::new().with_method(ConjugateMethod::PolakRibiere)
    }

    /// Creates a Fletcher-Reeves configuration.
    pub fn fletcher_reeves() -> Self {
        Self::new().with_method(ConjugateMethod::FletcherReeves)
    }

    /// Sets the direction update formula.
    pub fn with_method(mut self, method: ConjugateMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the restart period (`0` = parameter count).
    pub fn with_restart_period(mut self, period: usize) -> Self {
        self.restart_period = period;
        self
    }

    /// Sets the line-search parameters.
    pub fn with_line_search(mut self, line_search: LineSearchParams<T>) -> Self {
        self.line_search = line_search;
        self
    }

    /// Validates the configuration at the configuration boundary.
    pub fn validate(&self) -> Result<()> {
        self.line_search.validate()
    }
}

/// Conjugate-gradient optimizer with PR/FR direction updates and
/// automatic restart.
///
/// # Examples
///
/// ```
/// use lossfit_core::loss::test_losses::QuadraticLoss;
/// use lossfit_core::prelude::*;
/// use lossfit_optim::{ConjugateGradient, ConjugateGradientConfig};
///
/// let mut model = QuadraticLoss::simple(DVector::from_vec(vec![1.0_f64, -2.0, 3.0]));
/// let mut optimizer = ConjugateGradient::new(ConjugateGradientConfig::fletcher_reeves());
/// optimizer.set_stopping_criteria(
///     StoppingCriteria::new()
///         .with_maximum_epochs(100)
///         .with_gradient_norm_goal(1e-8),
/// );
///
/// let results = optimizer.perform_training(&mut model).unwrap();
/// assert!(results.converged);
/// ```
#[derive(Debug, Clone)]
pub struct ConjugateGradient<T: Scalar> {
    config: ConjugateGradientConfig<T>,
    criteria: StoppingCriteria<T>,
    display: bool,
    display_period: usize,
}

impl<T: Scalar> ConjugateGradient<T> {
    /// Creates an optimizer with the given configuration.
    pub fn new(config: ConjugateGradientConfig<T>) -> Self {
        Self {
            config,
            criteria: StoppingCriteria::default(),
            display: false,
            display_period: 10,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConjugateGradientConfig<T> {
        &self.config
    }

    /// Returns the optimizer name.
    pub fn name(&self) -> &str {
        match self.config.method {
            ConjugateMethod::PolakRibiere => "Conjugate Gradient (Polak-Ribiere)",
            ConjugateMethod::FletcherReeves => "Conjugate Gradient (Fletcher-Reeves)",
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

    fn run<M: LossModel<T>>(
        &mut self,
        model: &mut M,
        callback: Option<&mut dyn TrainingCallback<T>>,
    ) -> Result<TrainingResults<T>> {
        self.config.validate()?;
        let mut updater = ConjugateDirectionUpdater::new(
            self.config.method,
            self.config.restart_period,
            self.config.clamp_restart_streak,
        );
        let mut options = TrainingOptions {
            display: self.display,
            display_period: self.display_period,
            callback,
        };
        descend(
            &mut updater,
            model,
            &self.config.line_search,
            &self.criteria,
            &mut options,
        )
    }
}

impl<T: Scalar> Default for ConjugateGradient<T> {
    fn default() -> Self {
        Self::new(ConjugateGradientConfig::default())
    }
}
