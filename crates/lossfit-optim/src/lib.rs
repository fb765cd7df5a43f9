//! Training algorithms for gradient-based model fitting.
//!
//! This crate provides the concrete optimizers built on the shared
//! machinery of `lossfit-core`: the stopping-criteria state machine, the
//! bracketing line search and the [`LossModel`] boundary.
//!
//! # Available Optimizers
//!
//! - **StochasticGradientDescent**: mini-batch SGD with momentum,
//!   Nesterov look-ahead, gradient clipping and learning-rate schedules
//! - **ConjugateGradient**: Polak-Ribière / Fletcher-Reeves directions
//!   with automatic restart
//! - **QuasiNewton**: DFP / BFGS inverse-Hessian approximation
//!
//! # Examples
//!
//! ```
//! use lossfit_core::loss::test_losses::QuadraticLoss;
//! use lossfit_core::prelude::*;
//! use lossfit_optim::{QuasiNewton, QuasiNewtonConfig};
//!
//! let mut model = QuadraticLoss::simple(DVector::from_vec(vec![2.0_f64, -1.0]));
//!
//! let mut optimizer = QuasiNewton::new(QuasiNewtonConfig::bfgs());
//! optimizer.set_stopping_criteria(
//!     StoppingCriteria::new()
//!         .with_maximum_epochs(100)
//!         .with_gradient_norm_goal(1e-8),
//! );
//!
//! let results = optimizer.perform_training(&mut model).unwrap();
//! assert!(results.converged);
//! ```
//!
//! [`LossModel`]: lossfit_core::loss::LossModel

pub mod conjugate_gradient;
pub mod direction;
pub mod inverse_hessian;
pub mod quasi_newton;
pub mod sgd;

// Re-export the optimizers and their configurations for convenience
pub use conjugate_gradient::{ConjugateGradient, ConjugateGradientConfig};
pub use direction::{fletcher_reeves_beta, polak_ribiere_beta, ConjugateDirectionUpdater, ConjugateMethod};
pub use inverse_hessian::{InverseHessianApproximation, InverseHessianMethod};
pub use quasi_newton::{QuasiNewton, QuasiNewtonConfig};
pub use sgd::{SgdConfig, StochasticGradientDescent};

// Re-export commonly used items from core
pub use lossfit_core::{
    line_search::{LineSearchParams, StepSelection},
    schedule::LearningRateSchedule,
    stopping::{StoppingCriteria, StoppingReason},
    train::TrainingResults,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        let _sgd = SgdConfig::<f64>::new();
        let _cg = ConjugateGradientConfig::<f64>::new();
        let _qn = QuasiNewtonConfig::<f64>::new();
        let _schedule = LearningRateSchedule::Constant(0.01_f64);
        let _method = ConjugateMethod::PolakRibiere;
    }
}
