//! Quasi-Newton training algorithm.
//!
//! Newton's method preconditions the gradient with the inverse Hessian;
//! the quasi-Newton method replaces that matrix with the DFP or BFGS
//! approximation rebuilt from successive gradients (see
//! [`inverse_hessian`](crate::inverse_hessian)), then line-searches along
//! `d = −H·g`. On a quadratic loss the approximation becomes exact and the
//! step degenerates to the Newton step.
//!
//! The epoch loop is the shared [`descend`] state machine; this module
//! contributes the direction strategy and the caller-facing optimizer.

use lossfit_core::callback::TrainingCallback;
use lossfit_core::error::{Result, TrainingError};
use lossfit_core::line_search::LineSearchParams;
use lossfit_core::loss::LossModel;
use lossfit_core::state::IterationState;
use lossfit_core::stopping::StoppingCriteria;
use lossfit_core::train::{descend, DirectionStrategy, TrainingOptions, TrainingResults};
use lossfit_core::types::{DVector, Scalar};
use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::inverse_hessian::{InverseHessianApproximation, InverseHessianMethod};

/// Hyperparameters of the quasi-Newton optimizer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QuasiNewtonConfig<T: Scalar> {
    /// Inverse-Hessian update formula.
    pub method: InverseHessianMethod,

    /// Curvature floor below which the update restarts to the identity.
    pub curvature_floor: T,

    /// Line-search parameters.
    pub line_search: LineSearchParams<T>,
}

impl<T: Scalar> Default for QuasiNewtonConfig<T> {
    fn default() -> Self {
        Self {
            method: InverseHessianMethod::Bfgs,
            curvature_floor: T::CURVATURE_FLOOR,
            line_search: LineSearchParams::default(),
        }
    }
}

impl<T: Scalar> QuasiNewtonConfig<T> {
    /// Creates a configuration with the defaults (BFGS).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a BFGS configuration.
    pub fn bfgs() -> Self {
        Self::new().with_method(InverseHessianMethod::Bfgs)
    }

    /// Creates a DFP configuration.
    pub fn dfp() -> Self {
        Self::new().with_method(InverseHessianMethod::Dfp)
    }

    /// Sets the update formula.
    pub fn with_method(mut self, method: InverseHessianMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the curvature floor.
    pub fn with_curvature_floor(mut self, floor: T) -> Self {
        self.curvature_floor = floor;
        self
    }

    /// Sets the line-search parameters.
    pub fn with_line_search(mut self, line_search: LineSearchParams<T>) -> Self {
        self.line_search = line_search;
        self
    }

    /// Validates the configuration at the configuration boundary.
    pub fn validate(&self) -> Result<()> {
        if self.curvature_floor <= T::zero() || !Float::is_finite(self.curvature_floor) {
            return Err(TrainingError::invalid_configuration(
                "curvature floor must be positive and finite",
                "curvature_floor",
                format!("{}", self.curvature_floor),
            ));
        }
        self.line_search.validate()
    }
}

/// Direction strategy: fold the epoch differences into `H`, then
/// precondition the gradient.
#[derive(Debug)]
struct QuasiNewtonStrategy<T: Scalar> {
    hessian: InverseHessianApproximation<T>,
}

impl<T: Scalar> DirectionStrategy<T> for QuasiNewtonStrategy<T> {
    fn name(&self) -> &str {
        match self.hessian.method() {
            InverseHessianMethod::Dfp => "Quasi-Newton (DFP)",
            InverseHessianMethod::Bfgs => "Quasi-Newton (BFGS)",
        }
    }

    fn compute_direction(&mut self, state: &IterationState<T>) -> Result<DVector<T>> {
        // The first epoch has no differences yet; stalled epochs have
        // Δp = 0 and carry no curvature information.
        if state.epoch > 0 && state.step_size > T::zero() {
            let dp = &state.parameters - &state.old_parameters;
            let dg = &state.gradient - &state.old_gradient;
            self.hessian.update(&dp, &dg)?;
        }
        Ok(self.hessian.direction(&state.gradient))
    }

    fn reset(&mut self) {
        self.hessian.reset();
    }
}

/// Quasi-Newton optimizer with DFP/BFGS inverse-Hessian approximation.
///
/// # Examples
///
/// ```
/// use lossfit_core::loss::test_losses::QuadraticLoss;
/// use lossfit_core::prelude::*;
/// use lossfit_optim::{QuasiNewton, QuasiNewtonConfig};
///
/// let mut model = QuadraticLoss::simple(DVector::from_vec(vec![5.0_f64]));
/// let mut optimizer = QuasiNewton::new(QuasiNewtonConfig::bfgs());
/// optimizer.set_stopping_criteria(
///     StoppingCriteria::new()
///         .with_maximum_epochs(50)
///         .with_gradient_norm_goal(1e-9),
/// );
///
/// let results = optimizer.perform_training(&mut model).unwrap();
/// assert!(results.final_loss < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct QuasiNewton<T: Scalar> {
    config: QuasiNewtonConfig<T>,
    criteria: StoppingCriteria<T>,
    display: bool,
    display_period: usize,
}

impl<T: Scalar> QuasiNewton<T> {
    /// Creates an optimizer with the given configuration.
    pub fn new(config: QuasiNewtonConfig<T>) -> Self {
        Self {
            config,
            criteria: StoppingCriteria::default(),
            display: false,
            display_period: 10,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &QuasiNewtonConfig<T> {
        &self.config
    }

    /// Returns the optimizer name.
    pub fn name(&self) -> &str {
        match self.config.method {
            InverseHessianMethod::Dfp => "Quasi-Newton (DFP)",
            InverseHessianMethod::Bfgs => "Quasi-Newton (BFGS)",
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
        let mut strategy = QuasiNewtonStrategy {
            hessian: InverseHessianApproximation::new(
                self.config.method,
                self.config.curvature_floor,
            ),
        };
        let mut options = TrainingOptions {
            display: self.display,
            display_period: self.display_period,
            callback,
        };
        descend(
            &mut strategy,
            model,
            &self.config.line_search,
            &self.criteria,
            &mut options,
        )
    }
}

impl<T: Scalar> Default for QuasiNewton<T> {
    fn default() -> Self {
        Self::new(QuasiNewtonConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lossfit_core::loss::test_losses::QuadraticLoss;
    use lossfit_core::stopping::StoppingReason;
    use lossfit_core::types::DMatrix;

    #[test]
    fn test_config_builders() {
        let config = QuasiNewtonConfig::<f64>::dfp().with_curvature_floor(1e-10);
        assert_eq!(config.method, InverseHessianMethod::Dfp);
        assert_eq!(config.curvature_floor, 1e-10);
        assert!(config.validate().is_ok());

        assert!(QuasiNewtonConfig::<f64>::new()
            .with_curvature_floor(-1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_bfgs_on_single_parameter_quadratic() {
        // f(p) = p^2 from p = 5: the Hessian approximation reaches 0.5
        // after one epoch and the Newton step finishes the job.
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![5.0_f64]));
        let mut optimizer = QuasiNewton::new(QuasiNewtonConfig::bfgs());
        optimizer.set_stopping_criteria(
            StoppingCriteria::new()
                .with_loss_goal(0.0)
                .with_maximum_epochs(50),
        );

        let results = optimizer.perform_training(&mut model).unwrap();
        assert!(results.final_loss < 1e-6, "loss = {}", results.final_loss);
        assert!(results.epochs < 50, "epochs = {}", results.epochs);
    }

    #[test]
    fn test_dfp_converges_on_anisotropic_quadratic() {
        let a = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0_f64, 20.0, 200.0]));
        let mut model = QuadraticLoss::new(
            a,
            DVector::zeros(3),
            0.0,
            DVector::from_vec(vec![1.0, 1.0, 1.0]),
        );
        let mut optimizer = QuasiNewton::new(QuasiNewtonConfig::dfp());
        optimizer.set_stopping_criteria(
            StoppingCriteria::new()
                .with_maximum_epochs(100)
                .with_gradient_norm_goal(1e-8),
        );

        let results = optimizer.perform_training(&mut model).unwrap();
        assert!(results.final_loss < 1e-10);
        assert!(results.epochs < 100);
    }

    #[test]
    fn test_retraining_with_zero_epochs_is_idempotent() {
        let mut model = QuadraticLoss::simple(DVector::from_vec(vec![5.0_f64]));
        let mut optimizer = QuasiNewton::new(QuasiNewtonConfig::bfgs());
        optimizer
            .set_stopping_criteria(StoppingCriteria::new().with_maximum_epochs(20));
        optimizer.perform_training(&mut model).unwrap();
        let trained = model.parameters();

        optimizer.set_stopping_criteria(StoppingCriteria::new().with_maximum_epochs(0));
        let results = optimizer.perform_training(&mut model).unwrap();
        assert_eq!(results.stopping_reason, StoppingReason::MaximumEpochsReached);
        assert_eq!(results.epochs, 0);
        assert_eq!(model.parameters(), trained);
    }
}
