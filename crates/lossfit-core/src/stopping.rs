//! Stopping criteria for training runs.
//!
//! A [`StoppingCriteria`] value is immutable for the duration of a run and
//! is consulted once per epoch through the pure [`check`](StoppingCriteria::check)
//! predicate. Criteria are tested in a fixed priority order and the first
//! match wins:
//!
//! 1. loss ≤ loss goal
//! 2. previous loss − loss < minimum decrease (epoch > 0 only)
//! 3. gradient norm ≤ gradient-norm goal
//! 4. epoch ≥ maximum epochs
//! 5. elapsed ≥ maximum time
//! 6. selection failure streak ≥ maximum selection failures

use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TrainingError};
use crate::types::Scalar;

/// Why a training run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StoppingReason {
    /// The training loss fell to or below the configured goal.
    LossGoalReached,
    /// Loss improvement between consecutive epochs fell below the
    /// configured minimum.
    MinimumLossDecrease,
    /// The gradient norm fell to or below the configured goal.
    GradientNormGoal,
    /// The epoch budget was exhausted.
    MaximumEpochsReached,
    /// The wall-clock budget was exhausted.
    MaximumTimeReached,
    /// The selection loss increased too many consecutive epochs.
    MaximumSelectionFailures,
    /// The caller's callback requested an early stop.
    UserStop,
    /// A non-finite loss or gradient made further progress impossible.
    NumericalFailure,
}

/// Termination thresholds for a training run.
///
/// Every field is optional; an unset field never fires. Defaults keep only
/// an epoch budget, matching the most permissive useful configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StoppingCriteria<T: Scalar> {
    /// Stop when the training loss reaches this value.
    pub loss_goal: Option<T>,

    /// Stop when the per-epoch loss decrease falls below this value.
    pub minimum_loss_decrease: Option<T>,

    /// Stop when the gradient norm reaches this value.
    pub gradient_norm_goal: Option<T>,

    /// Maximum number of epochs.
    pub maximum_epochs: Option<usize>,

    /// Maximum wall-clock training time.
    pub maximum_time: Option<Duration>,

    /// Maximum number of consecutive epochs with an increasing
    /// selection loss.
    pub maximum_selection_failures: Option<usize>,
}

impl<T: Scalar> Default for StoppingCriteria<T> {
    fn default() -> Self {
        Self {
            loss_goal: None,
            minimum_loss_decrease: None,
            gradient_norm_goal: None,
            maximum_epochs: Some(1000),
            maximum_time: None,
            maximum_selection_failures: None,
        }
    }
}

impl<T: Scalar> StoppingCriteria<T> {
    /// Creates criteria with the default epoch budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loss goal.
    pub fn with_loss_goal(mut self, goal: T) -> Self {
        self.loss_goal = Some(goal);
        self
    }

    /// Sets the minimum per-epoch loss decrease.
    pub fn with_minimum_loss_decrease(mut self, decrease: T) -> Self {
        self.minimum_loss_decrease = Some(decrease);
        self
    }

    /// Sets the gradient-norm goal.
    pub fn with_gradient_norm_goal(mut self, goal: T) -> Self {
        self.gradient_norm_goal = Some(goal);
        self
    }

    /// Sets the epoch budget.
    pub fn with_maximum_epochs(mut self, epochs: usize) -> Self {
        self.maximum_epochs = Some(epochs);
        self
    }

    /// Sets the wall-clock budget.
    pub fn with_maximum_time(mut self, time: Duration) -> Self {
        self.maximum_time = Some(time);
        self
    }

    /// Sets the selection-failure budget.
    pub fn with_maximum_selection_failures(mut self, failures: usize) -> Self {
        self.maximum_selection_failures = Some(failures);
        self
    }

    /// Validates the thresholds at the configuration boundary.
    pub fn validate(&self) -> Result<()> {
        if let Some(goal) = self.loss_goal {
            if !Float::is_finite(goal) {
                return Err(TrainingError::invalid_configuration(
                    "loss goal must be finite",
                    "loss_goal",
                    format!("{goal}"),
                ));
            }
        }
        if let Some(decrease) = self.minimum_loss_decrease {
            if !Float::is_finite(decrease) || decrease < T::zero() {
                return Err(TrainingError::invalid_configuration(
                    "minimum loss decrease must be finite and non-negative",
                    "minimum_loss_decrease",
                    format!("{decrease}"),
                ));
            }
        }
        if let Some(goal) = self.gradient_norm_goal {
            if !Float::is_finite(goal) || goal < T::zero() {
                return Err(TrainingError::invalid_configuration(
                    "gradient norm goal must be finite and non-negative",
                    "gradient_norm_goal",
                    format!("{goal}"),
                ));
            }
        }
        Ok(())
    }

    /// Evaluates the termination predicates against one epoch's
    /// statistics. Pure; returns `None` when training should continue.
    pub fn check(
        &self,
        loss: T,
        previous_loss: T,
        gradient_norm: T,
        epoch: usize,
        elapsed: Duration,
        selection_failures: usize,
    ) -> Option<StoppingReason> {
        if let Some(goal) = self.loss_goal {
            if loss <= goal {
                return Some(StoppingReason::LossGoalReached);
            }
        }
        if let Some(decrease) = self.minimum_loss_decrease {
            if epoch > 0 && previous_loss - loss < decrease {
                return Some(StoppingReason::MinimumLossDecrease);
            }
        }
        if let Some(goal) = self.gradient_norm_goal {
            if gradient_norm <= goal {
                return Some(StoppingReason::GradientNormGoal);
            }
        }
        if let Some(maximum) = self.maximum_epochs {
            if epoch >= maximum {
                return Some(StoppingReason::MaximumEpochsReached);
            }
        }
        if let Some(maximum) = self.maximum_time {
            if elapsed >= maximum {
                return Some(StoppingReason::MaximumTimeReached);
            }
        }
        if let Some(maximum) = self.maximum_selection_failures {
            if selection_failures >= maximum {
                return Some(StoppingReason::MaximumSelectionFailures);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_at<T: Scalar>(
        criteria: &StoppingCriteria<T>,
        loss: T,
        previous_loss: T,
        gradient_norm: T,
        epoch: usize,
    ) -> Option<StoppingReason> {
        criteria.check(
            loss,
            previous_loss,
            gradient_norm,
            epoch,
            Duration::from_secs(0),
            0,
        )
    }

    #[test]
    fn test_loss_goal_has_priority() {
        // Loss goal fires first even when every other criterion would match.
        let criteria = StoppingCriteria::new()
            .with_loss_goal(1.0)
            .with_minimum_loss_decrease(10.0)
            .with_gradient_norm_goal(10.0)
            .with_maximum_epochs(0);

        assert_eq!(
            check_at(&criteria, 0.5_f64, 0.5, 100.0, 7),
            Some(StoppingReason::LossGoalReached)
        );
    }

    #[test]
    fn test_minimum_decrease_skipped_on_first_epoch() {
        let criteria = StoppingCriteria::<f64>::new()
            .with_minimum_loss_decrease(1e-3)
            .with_maximum_epochs(100);

        assert_eq!(check_at(&criteria, 5.0, 5.0, 1.0, 0), None);
        assert_eq!(
            check_at(&criteria, 5.0, 5.0, 1.0, 1),
            Some(StoppingReason::MinimumLossDecrease)
        );
    }

    #[test]
    fn test_permissive_criteria_return_none() {
        let criteria = StoppingCriteria::<f64> {
            loss_goal: None,
            minimum_loss_decrease: None,
            gradient_norm_goal: None,
            maximum_epochs: None,
            maximum_time: None,
            maximum_selection_failures: None,
        };
        assert_eq!(check_at(&criteria, 1e9, 1e9, 1e9, 1_000_000), None);
    }

    #[test]
    fn test_time_and_selection_budgets() {
        let criteria = StoppingCriteria::<f64>::new()
            .with_maximum_epochs(1000)
            .with_maximum_time(Duration::from_secs(60))
            .with_maximum_selection_failures(3);

        assert_eq!(
            criteria.check(1.0, 2.0, 1.0, 5, Duration::from_secs(61), 0),
            Some(StoppingReason::MaximumTimeReached)
        );
        assert_eq!(
            criteria.check(1.0, 2.0, 1.0, 5, Duration::from_secs(1), 3),
            Some(StoppingReason::MaximumSelectionFailures)
        );
    }

    #[test]
    fn test_validate_rejects_negative_thresholds() {
        let criteria = StoppingCriteria::<f64>::new().with_minimum_loss_decrease(-1.0);
        assert!(criteria.validate().is_err());

        let criteria = StoppingCriteria::<f64>::new().with_gradient_norm_goal(f64::NAN);
        assert!(criteria.validate().is_err());
    }
}
