//! Per-run iteration state.
//!
//! [`IterationState`] is the snapshot the epoch loop owns and passes into
//! the direction strategies: current and previous parameters, gradients and
//! losses, the last search direction and accepted step. It is allocated
//! when training starts and discarded when it returns; nothing in it is
//! persisted.

use crate::types::{DVector, Scalar};

/// Mutable snapshot of one training run, updated every epoch.
#[derive(Debug, Clone)]
pub struct IterationState<T: Scalar> {
    /// Current parameter vector.
    pub parameters: DVector<T>,
    /// Parameters at the start of the previous epoch.
    pub old_parameters: DVector<T>,
    /// Gradient at the current parameters.
    pub gradient: DVector<T>,
    /// Gradient at the previous parameters.
    pub old_gradient: DVector<T>,
    /// Loss at the current parameters.
    pub loss: T,
    /// Loss at the previous parameters.
    pub old_loss: T,
    /// Search direction used by the last completed epoch.
    pub direction: DVector<T>,
    /// Step size accepted by the last completed epoch.
    pub step_size: T,
    /// Completed epoch count.
    pub epoch: usize,
    /// Consecutive epochs with an increasing selection loss.
    pub selection_failures: usize,
    /// Selection loss recorded at the end of the previous epoch.
    pub selection_loss: Option<T>,
    /// Loss evaluations performed so far (line-search trials included).
    pub loss_evaluations: usize,
    /// Gradient evaluations performed so far.
    pub gradient_evaluations: usize,
}

impl<T: Scalar> IterationState<T> {
    /// Creates the state for a fresh run from the initial evaluation.
    pub fn new(parameters: DVector<T>, loss: T, gradient: DVector<T>) -> Self {
        let n = parameters.len();
        Self {
            old_parameters: parameters.clone(),
            parameters,
            old_gradient: gradient.clone(),
            gradient,
            loss,
            old_loss: loss,
            direction: DVector::zeros(n),
            step_size: T::zero(),
            epoch: 0,
            selection_failures: 0,
            selection_loss: None,
            loss_evaluations: 1,
            gradient_evaluations: 1,
        }
    }

    /// Euclidean norm of the current gradient.
    pub fn gradient_norm(&self) -> T {
        self.gradient.norm()
    }

    /// Completes an epoch: the current snapshot becomes the previous one
    /// and the accepted update becomes current.
    pub fn advance(
        &mut self,
        parameters: DVector<T>,
        loss: T,
        gradient: DVector<T>,
        direction: DVector<T>,
        step_size: T,
    ) {
        self.old_parameters = std::mem::replace(&mut self.parameters, parameters);
        self.old_gradient = std::mem::replace(&mut self.gradient, gradient);
        self.old_loss = self.loss;
        self.loss = loss;
        self.direction = direction;
        self.step_size = step_size;
        self.epoch += 1;
    }

    /// Records this epoch's selection loss, updating the failure streak:
    /// an increase extends it, anything else resets it.
    pub fn record_selection_loss(&mut self, selection_loss: T) {
        match self.selection_loss {
            Some(previous) if selection_loss > previous => self.selection_failures += 1,
            _ => self.selection_failures = 0,
        }
        self.selection_loss = Some(selection_loss);
    }
}
