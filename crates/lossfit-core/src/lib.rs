//! Core traits and shared machinery for gradient-based model training.
//!
//! This crate provides everything the concrete optimizers in
//! `lossfit-optim` have in common: the scalar abstraction, the
//! model/loss boundary, stopping criteria, the per-run iteration state,
//! the shared epoch loop, the bracketing line search, learning-rate
//! schedules and the parallel dense-update kernels.
//!
//! # Modules
//!
//! - [`loss`]: the [`LossModel`](loss::LossModel) boundary trait
//! - [`stopping`]: stopping criteria and reasons
//! - [`state`]: per-run iteration state
//! - [`train`]: training results and the shared epoch loop
//! - [`line_search`]: golden-section / Brent step-size search
//! - [`schedule`]: learning-rate schedules for SGD
//! - [`callback`]: progress and cancellation callbacks
//! - [`parallel`]: rank-one update kernels
//! - [`error`]: error types
//! - [`types`]: scalar trait and vector/matrix aliases

pub mod callback;
pub mod error;
pub mod line_search;
pub mod loss;
pub mod parallel;
pub mod schedule;
pub mod state;
pub mod stopping;
pub mod train;
pub mod types;

pub use error::{Result, TrainingError};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use lossfit_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::callback::{EpochReport, PrintProgress, TrainingCallback};
    pub use crate::error::{Result, TrainingError};
    pub use crate::line_search::{LineSearchParams, LineSearchResult, StepSelection};
    pub use crate::loss::{Batch, LossModel};
    pub use crate::schedule::LearningRateSchedule;
    pub use crate::state::IterationState;
    pub use crate::stopping::{StoppingCriteria, StoppingReason};
    pub use crate::train::{descend, DirectionStrategy, TrainingOptions, TrainingResults};
    pub use crate::types::{DMatrix, DVector, Scalar};
}
