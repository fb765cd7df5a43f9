//! Inverse-Hessian approximation for the quasi-Newton optimizer.
//!
//! Instead of computing second derivatives, the quasi-Newton method keeps
//! an `n × n` matrix `H ≈ ∇²f⁻¹`, rebuilt each epoch from the parameter
//! and gradient differences `Δp = p − p₀`, `Δg = g − g₀`:
//!
//! - **DFP**: `H' = H + (Δp⊗Δp)/(Δpᵗ·Δg) − (H·Δg ⊗ H·Δg)/(Δgᵗ·H·Δg)`
//! - **BFGS**: `H' = H + (1 + Δgᵗ·H·Δg/Δpᵗ·Δg)·(Δp⊗Δp)/(Δpᵗ·Δg)
//!   − (Δp⊗(H·Δg) + (H·Δg)⊗Δp)/(Δpᵗ·Δg)`
//!
//! The preconditioned direction is `d = −H·g`.
//!
//! # Restarts
//!
//! The update denominators vanish when the curvature condition fails, and
//! a degraded `H` stops being positive definite, at which point it produces ascent
//! directions. The primary defense is the restart policy: when
//! `|Δpᵗ·Δg|` (or, for DFP, `Δgᵗ·H·Δg`) falls below the curvature floor,
//! or the parameter count changes, or the matrix picks up non-finite
//! entries, `H` is re-initialized to the identity and the next step is
//! plain steepest descent. Near-zero `Δp`/`Δg` carry no curvature
//! information at all and merely skip the update.
//!
//! `H` must stay symmetric; both formulas preserve symmetry under exact
//! arithmetic and the matrix is re-symmetrized after every update to bound
//! floating-point drift.

use lossfit_core::error::{Result, TrainingError};
use lossfit_core::parallel::{rank_one_update, symmetrize};
use lossfit_core::types::{DMatrix, DVector, Scalar};
use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Inverse-Hessian update formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InverseHessianMethod {
    /// Davidon-Fletcher-Powell.
    Dfp,
    /// Broyden-Fletcher-Goldfarb-Shanno.
    Bfgs,
}

/// The inverse-Hessian matrix and its update rules.
///
/// Owned by one quasi-Newton run; never share an instance across
/// concurrent runs. The matrix is allocated lazily on the first update or
/// direction request and must not be read before that.
#[derive(Debug, Clone)]
pub struct InverseHessianApproximation<T: Scalar> {
    method: InverseHessianMethod,
    curvature_floor: T,
    matrix: Option<DMatrix<T>>,
}

impl<T: Scalar> InverseHessianApproximation<T> {
    /// Creates an approximation using the given update formula and
    /// curvature floor.
    pub fn new(method: InverseHessianMethod, curvature_floor: T) -> Self {
        Self {
            method,
            curvature_floor,
            matrix: None,
        }
    }

    /// The update formula in use.
    pub fn method(&self) -> InverseHessianMethod {
        self.method
    }

    /// The current matrix, when one has been initialized.
    pub fn matrix(&self) -> Option<&DMatrix<T>> {
        self.matrix.as_ref()
    }

    /// Discards the approximation; the next use starts from the identity.
    pub fn reset(&mut self) {
        self.matrix = None;
    }

    fn ensure_dimension(&mut self, n: usize) {
        let needs_reset = self
            .matrix
            .as_ref()
            .map_or(true, |matrix| matrix.nrows() != n);
        if needs_reset {
            self.matrix = Some(DMatrix::identity(n, n));
        }
    }

    /// Folds one epoch's differences into the approximation.
    ///
    /// Guard conditions may skip the update or restart the matrix; both
    /// outcomes are normal and return `Ok`.
    pub fn update(&mut self, dp: &DVector<T>, dg: &DVector<T>) -> Result<()> {
        let n = dp.len();
        if dg.len() != n {
            return Err(TrainingError::dimension_mismatch(n, dg.len()));
        }

        // No movement or no gradient change: nothing to learn from.
        if dp.norm() < T::min_positive_value() || dg.norm() < T::min_positive_value() {
            self.ensure_dimension(n);
            return Ok(());
        }

        let curvature = dp.dot(dg);
        if Float::abs(curvature) < self.curvature_floor {
            // Curvature condition failed; a division here would blow the
            // approximation up, so restart from the identity instead.
            self.matrix = Some(DMatrix::identity(n, n));
            return Ok(());
        }

        self.ensure_dimension(n);
        let method = self.method;
        let curvature_floor = self.curvature_floor;

        let (h_dg, dg_h_dg) = {
            let matrix = self.matrix.as_ref().expect("initialized above");
            let h_dg: DVector<T> = matrix * dg;
            let dg_h_dg = dg.dot(&h_dg);
            (h_dg, dg_h_dg)
        };

        if method == InverseHessianMethod::Dfp && Float::abs(dg_h_dg) < curvature_floor {
            self.matrix = Some(DMatrix::identity(n, n));
            return Ok(());
        }

        let matrix = self.matrix.as_mut().expect("initialized above");
        match method {
            InverseHessianMethod::Dfp => {
                rank_one_update(matrix, T::one() / curvature, dp, dp);
                rank_one_update(matrix, -T::one() / dg_h_dg, &h_dg, &h_dg);
            }
            InverseHessianMethod::Bfgs => {
                let scale = (T::one() + dg_h_dg / curvature) / curvature;
                rank_one_update(matrix, scale, dp, dp);
                rank_one_update(matrix, -T::one() / curvature, dp, &h_dg);
                rank_one_update(matrix, -T::one() / curvature, &h_dg, dp);
            }
        }

        let poisoned = matrix.iter().any(|entry| !Float::is_finite(*entry));
        if poisoned {
            self.matrix = Some(DMatrix::identity(n, n));
            return Ok(());
        }
        symmetrize(self.matrix.as_mut().expect("initialized above"));
        Ok(())
    }

    /// The preconditioned descent direction `−H·g`.
    pub fn direction(&mut self, gradient: &DVector<T>) -> DVector<T> {
        self.ensure_dimension(gradient.len());
        let matrix = self.matrix.as_ref().expect("initialized above");
        -(matrix * gradient)
    }
}
