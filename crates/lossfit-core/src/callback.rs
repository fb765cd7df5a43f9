//! Callback support for training runs.
//!
//! Callbacks let callers observe and control a run without reaching into
//! the optimizer: progress display, cancellation and time-budget
//! enforcement all go through [`TrainingCallback`]. The epoch loop polls
//! the callback at every epoch boundary.

use std::time::Duration;

use crate::types::Scalar;

/// Statistics handed to a callback at each epoch boundary.
#[derive(Debug, Clone, Copy)]
pub struct EpochReport<T: Scalar> {
    /// Completed epoch count.
    pub epoch: usize,
    /// Training loss at the current parameters.
    pub loss: T,
    /// Gradient norm at the current parameters.
    pub gradient_norm: T,
    /// Step accepted by the last epoch (zero before the first).
    pub step_size: T,
    /// Selection loss, when the model has a held-out split.
    pub selection_loss: Option<T>,
    /// Wall-clock time since training started.
    pub elapsed: Duration,
}

/// Observer and controller for a training run.
pub trait TrainingCallback<T: Scalar> {
    /// Called once before the first epoch.
    fn on_training_start(&mut self) {}

    /// Called at every epoch boundary.
    ///
    /// Returns `true` to continue training; `false` stops the run with
    /// [`StoppingReason::UserStop`](crate::stopping::StoppingReason::UserStop).
    fn on_epoch_end(&mut self, report: &EpochReport<T>) -> bool {
        let _ = report;
        true
    }

    /// Called once after the run terminates.
    fn on_training_end(&mut self, report: &EpochReport<T>) {
        let _ = report;
    }
}

/// Callback that prints one progress line every `period` epochs.
#[derive(Debug, Clone)]
pub struct PrintProgress {
    period: usize,
}

impl PrintProgress {
    /// Creates a progress printer with the given period.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Default for PrintProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl<T: Scalar> TrainingCallback<T> for PrintProgress {
    fn on_epoch_end(&mut self, report: &EpochReport<T>) -> bool {
        if report.epoch % self.period == 0 {
            match report.selection_loss {
                Some(selection) => println!(
                    "Epoch {}: loss = {}, gradient norm = {}, selection loss = {}",
                    report.epoch, report.loss, report.gradient_norm, selection
                ),
                None => println!(
                    "Epoch {}: loss = {}, gradient norm = {}",
                    report.epoch, report.loss, report.gradient_norm
                ),
            }
        }
        true
    }

    fn on_training_end(&mut self, report: &EpochReport<T>) {
        println!(
            "Training finished after {} epochs in {:.2?}. Final loss: {}",
            report.epoch, report.elapsed, report.loss
        );
    }
}
