//! The model/loss collaborator boundary.
//!
//! The training core never looks inside the model: it reads a flat
//! parameter vector, writes updated parameters back, and asks for the loss
//! and gradient on a batch. Forward/backward evaluation, regularization and
//! data shuffling all live behind [`LossModel`].
//!
//! Gradients returned by [`LossModel::evaluate`] are ephemeral: they are
//! recomputed on every call and a previously returned vector must be
//! treated as stale after the next evaluation.

use crate::error::{Result, TrainingError};
use crate::types::{DVector, Scalar};
use std::fmt::Debug;

/// Selects the data a loss evaluation runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batch {
    /// The whole training set.
    Full,
    /// One mini-batch, indexed in `0..minibatch_count()`.
    Mini(usize),
}

/// Interface to the external model and its loss.
///
/// Implementations own the parameter vector. Optimizers only mutate it
/// through [`set_parameters`](LossModel::set_parameters), one writer at a
/// time; the core never aliases it.
pub trait LossModel<T: Scalar>: Debug {
    /// Number of trainable parameters across the whole model.
    fn parameters_count(&self) -> usize;

    /// Returns a copy of the current parameter vector.
    fn parameters(&self) -> DVector<T>;

    /// Replaces the parameter vector.
    ///
    /// Implementations must reject vectors whose length differs from
    /// [`parameters_count`](LossModel::parameters_count).
    fn set_parameters(&mut self, parameters: DVector<T>) -> Result<()>;

    /// Computes the loss and its gradient at the current parameters over
    /// the given batch. The gradient's dimension equals the parameter
    /// count.
    fn evaluate(&mut self, batch: &Batch) -> Result<(T, DVector<T>)>;

    /// Number of mini-batches one epoch iterates over.
    fn minibatch_count(&self) -> usize {
        1
    }

    /// Loss on the held-out selection split, if the model has one.
    ///
    /// Used only for early stopping; returns `None` when no selection
    /// data exists.
    fn selection_loss(&mut self) -> Result<Option<T>> {
        Ok(None)
    }

    /// Loss at candidate parameters, without persisting them.
    ///
    /// The line search calls this many times per epoch. The default
    /// implementation saves and restores the parameter vector around a
    /// full-batch evaluation; implementations with a cheaper
    /// forward-only path should override it.
    fn loss_at(&mut self, candidate: &DVector<T>) -> Result<T> {
        let saved = self.parameters();
        self.set_parameters(candidate.clone())?;
        let evaluation = self.evaluate(&Batch::Full);
        self.set_parameters(saved)?;
        let (loss, _) = evaluation?;
        Ok(loss)
    }
}

/// Checks that a gradient has the expected dimension.
pub fn check_gradient_dimension<T: Scalar>(
    gradient: &DVector<T>,
    parameters_count: usize,
) -> Result<()> {
    if gradient.len() != parameters_count {
        return Err(TrainingError::dimension_mismatch(
            parameters_count,
            gradient.len(),
        ));
    }
    Ok(())
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_losses {
    //! Closed-form losses for tests and benchmarks.

    use super::*;
    use crate::types::DMatrix;

    /// Quadratic loss `f(p) = 0.5 pᵀAp + bᵀp + c` with gradient `Ap + b`.
    #[derive(Debug, Clone)]
    pub struct QuadraticLoss<T: Scalar> {
        a: DMatrix<T>,
        b: DVector<T>,
        c: T,
        parameters: DVector<T>,
    }

    impl<T: Scalar> QuadraticLoss<T> {
        /// Creates a quadratic loss with the given coefficients.
        pub fn new(a: DMatrix<T>, b: DVector<T>, c: T, initial: DVector<T>) -> Self {
            Self {
                a,
                b,
                c,
                parameters: initial,
            }
        }

        /// The isotropic bowl `f(p) = pᵀp` (so `A = 2I`), minimized at the
        /// origin. For a single parameter this is `f(p) = p²`.
        pub fn simple(initial: DVector<T>) -> Self {
            let n = initial.len();
            let a = DMatrix::identity(n, n) * <T as Scalar>::from_f64(2.0);
            Self::new(a, DVector::zeros(n), T::zero(), initial)
        }
    }

    impl<T: Scalar> LossModel<T> for QuadraticLoss<T> {
        fn parameters_count(&self) -> usize {
            self.parameters.len()
        }

        fn parameters(&self) -> DVector<T> {
            self.parameters.clone()
        }

        fn set_parameters(&mut self, parameters: DVector<T>) -> Result<()> {
            if parameters.len() != self.parameters.len() {
                return Err(TrainingError::dimension_mismatch(
                    self.parameters.len(),
                    parameters.len(),
                ));
            }
            self.parameters = parameters;
            Ok(())
        }

        fn evaluate(&mut self, _batch: &Batch) -> Result<(T, DVector<T>)> {
            let ap = &self.a * &self.parameters;
            let loss = <T as Scalar>::from_f64(0.5) * self.parameters.dot(&ap)
                + self.b.dot(&self.parameters)
                + self.c;
            let gradient = ap + &self.b;
            Ok((loss, gradient))
        }

        fn loss_at(&mut self, candidate: &DVector<T>) -> Result<T> {
            let ap = &self.a * candidate;
            Ok(<T as Scalar>::from_f64(0.5) * candidate.dot(&ap)
                + self.b.dot(candidate)
                + self.c)
        }
    }

    /// Linear least squares `f(p) = ‖Xp − y‖² / (2m)` with gradient
    /// `Xᵀ(Xp − y) / m`, optionally split into row-chunk mini-batches.
    #[derive(Debug, Clone)]
    pub struct LeastSquaresLoss<T: Scalar> {
        design: DMatrix<T>,
        targets: DVector<T>,
        parameters: DVector<T>,
        batches: usize,
    }

    impl<T: Scalar> LeastSquaresLoss<T> {
        /// Creates a least-squares loss over the given design matrix and
        /// targets.
        pub fn new(design: DMatrix<T>, targets: DVector<T>, initial: DVector<T>) -> Self {
            assert_eq!(design.nrows(), targets.len());
            assert_eq!(design.ncols(), initial.len());
            Self {
                design,
                targets,
                parameters: initial,
                batches: 1,
            }
        }

        /// Splits the rows into `batches` contiguous mini-batches.
        pub fn with_batches(mut self, batches: usize) -> Self {
            assert!(batches >= 1 && batches <= self.design.nrows());
            self.batches = batches;
            self
        }

        fn batch_rows(&self, index: usize) -> (usize, usize) {
            let m = self.design.nrows();
            let chunk = m.div_ceil(self.batches);
            let start = index * chunk;
            (start, (start + chunk).min(m))
        }

        fn evaluate_rows(&self, start: usize, end: usize) -> (T, DVector<T>) {
            let rows = self.design.rows(start, end - start);
            let residual = rows * &self.parameters - self.targets.rows(start, end - start);
            let m = <T as Scalar>::from_usize(end - start);
            let loss = residual.norm_squared() / (<T as Scalar>::from_f64(2.0) * m);
            let gradient = rows.transpose() * residual / m;
            (loss, gradient)
        }
    }

    impl<T: Scalar> LossModel<T> for LeastSquaresLoss<T> {
        fn parameters_count(&self) -> usize {
            self.parameters.len()
        }

        fn parameters(&self) -> DVector<T> {
            self.parameters.clone()
        }

        fn set_parameters(&mut self, parameters: DVector<T>) -> Result<()> {
            if parameters.len() != self.parameters.len() {
                return Err(TrainingError::dimension_mismatch(
                    self.parameters.len(),
                    parameters.len(),
                ));
            }
            self.parameters = parameters;
            Ok(())
        }

        fn evaluate(&mut self, batch: &Batch) -> Result<(T, DVector<T>)> {
            let (start, end) = match batch {
                Batch::Full => (0, self.design.nrows()),
                Batch::Mini(index) => {
                    if *index >= self.batches {
                        return Err(TrainingError::dimension_mismatch(self.batches, *index));
                    }
                    self.batch_rows(*index)
                }
            };
            Ok(self.evaluate_rows(start, end))
        }

        fn minibatch_count(&self) -> usize {
            self.batches
        }
    }
}
