//! Learning-rate schedules for stochastic gradient descent.
//!
//! SGD takes no line search; its step size follows one of these schedules,
//! evaluated once per epoch. Inverse-time decay
//! `α₀ / (1 + decay·k)` is the classical choice for mini-batch training;
//! square-root decay satisfies the usual stochastic-approximation
//! conditions (Σαₖ = ∞, Σαₖ² < ∞).

use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::Scalar;

/// Per-epoch learning-rate schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LearningRateSchedule<T: Scalar> {
    /// Fixed rate `αₖ = α₀`.
    Constant(T),

    /// Inverse-time decay `αₖ = α₀ / (1 + decay·k)`.
    InverseTimeDecay {
        /// Initial rate α₀.
        initial: T,
        /// Decay coefficient, per epoch.
        decay: T,
    },

    /// Exponential decay `αₖ = α₀ · rateᵏ` with `0 < rate < 1`.
    ExponentialDecay {
        /// Initial rate α₀.
        initial: T,
        /// Multiplicative decay factor per epoch.
        rate: T,
    },

    /// Square-root decay `αₖ = α₀ / √(1 + k)`.
    SquareRootDecay {
        /// Initial rate α₀.
        initial: T,
    },
}

impl<T: Scalar> LearningRateSchedule<T> {
    /// Learning rate for epoch `k`.
    pub fn learning_rate(&self, epoch: usize) -> T {
        let k = <T as Scalar>::from_usize(epoch);
        match self {
            Self::Constant(alpha) => *alpha,
            Self::InverseTimeDecay { initial, decay } => *initial / (T::one() + *decay * k),
            Self::ExponentialDecay { initial, rate } => *initial * Float::powf(*rate, k),
            Self::SquareRootDecay { initial } => *initial / Float::sqrt(T::one() + k),
        }
    }

    /// The schedule's initial rate α₀.
    pub fn initial(&self) -> T {
        match self {
            Self::Constant(alpha) => *alpha,
            Self::InverseTimeDecay { initial, .. }
            | Self::ExponentialDecay { initial, .. }
            | Self::SquareRootDecay { initial } => *initial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant() {
        let schedule = LearningRateSchedule::Constant(0.1_f64);
        assert_relative_eq!(schedule.learning_rate(0), 0.1);
        assert_relative_eq!(schedule.learning_rate(500), 0.1);
    }

    #[test]
    fn test_inverse_time_decay() {
        let schedule = LearningRateSchedule::InverseTimeDecay {
            initial: 1.0_f64,
            decay: 0.5,
        };
        assert_relative_eq!(schedule.learning_rate(0), 1.0);
        assert_relative_eq!(schedule.learning_rate(2), 0.5);
    }

    #[test]
    fn test_exponential_decay() {
        let schedule = LearningRateSchedule::ExponentialDecay {
            initial: 1.0_f64,
            rate: 0.9,
        };
        assert_relative_eq!(schedule.learning_rate(1), 0.9);
        assert!(schedule.learning_rate(20) < schedule.learning_rate(10));
    }

    #[test]
    fn test_sqrt_decay() {
        let schedule = LearningRateSchedule::SquareRootDecay { initial: 1.0_f64 };
        assert_relative_eq!(schedule.learning_rate(3), 0.5);
    }
}
