//! Type definitions and aliases for the training core.
//!
//! This module provides the scalar abstraction shared by every algorithm,
//! along with vector/matrix aliases and the numeric floors used by the
//! line search and the inverse-Hessian guards.

use nalgebra::{Dyn, OMatrix, OVector, RealField, Scalar as NalgebraScalar};
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// Trait for scalar types used in training (f32 or f64).
///
/// Combines the nalgebra and num-traits bounds required by the optimizers
/// with the numeric-floor constants that parameterize their guards.
pub trait Scalar:
    NalgebraScalar
    + RealField
    + Float
    + FromPrimitive
    + Display
    + Debug
    + Default
    + Copy
    + Send
    + Sync
    + 'static
{
    /// Machine epsilon for this scalar type.
    const EPSILON: Self;

    /// Default relative tolerance for the line-search bracket width.
    const DEFAULT_STEP_TOLERANCE: Self;

    /// Floor below which a curvature product is treated as zero.
    const CURVATURE_FLOOR: Self;

    /// Maximum step size the line search will accept.
    const MAX_STEP_SIZE: Self;

    /// Minimum step size the line search will probe before giving up.
    const MIN_STEP_SIZE: Self;

    /// Convert from f64 (for constants).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails. Use `try_from_f64` for a
    /// non-panicking version.
    fn from_f64(v: f64) -> Self {
        <Self as FromPrimitive>::from_f64(v).expect("Failed to convert from f64")
    }

    /// Try to convert from f64.
    fn try_from_f64(v: f64) -> Option<Self> {
        <Self as FromPrimitive>::from_f64(v)
    }

    /// Convert to f64 (for display and history recording).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails. Use `try_to_f64` for a
    /// non-panicking version.
    fn to_f64(self) -> f64 {
        num_traits::cast(self).expect("Failed to convert to f64")
    }

    /// Try to convert to f64.
    fn try_to_f64(self) -> Option<f64> {
        num_traits::cast(self)
    }

    /// Convert from usize (for epoch counts).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails.
    fn from_usize(v: usize) -> Self {
        <Self as FromPrimitive>::from_usize(v).expect("Failed to convert from usize")
    }
}

impl Scalar for f32 {
    const EPSILON: Self = f32::EPSILON;
    const DEFAULT_STEP_TOLERANCE: Self = 1e-4;
    const CURVATURE_FLOOR: Self = 1e-6;
    const MAX_STEP_SIZE: Self = 1e3;
    const MIN_STEP_SIZE: Self = 1e-10;
}

impl Scalar for f64 {
    const EPSILON: Self = f64::EPSILON;
    const DEFAULT_STEP_TOLERANCE: Self = 1e-6;
    const CURVATURE_FLOOR: Self = 1e-12;
    const MAX_STEP_SIZE: Self = 1e6;
    const MIN_STEP_SIZE: Self = 1e-16;
}

/// A parameter or gradient vector, sized at run time.
pub type DVector<T> = OVector<T, Dyn>;

/// A square matrix sized at run time (the inverse-Hessian approximation).
pub type DMatrix<T> = OMatrix<T, Dyn, Dyn>;

/// Numerical constants shared by the search algorithms.
pub mod constants {
    use super::Scalar;

    /// Golden ratio, used by the bracketing line search.
    pub fn golden_ratio<T: Scalar>() -> T {
        <T as Scalar>::from_f64(1.618033988749895)
    }

    /// Interior reduction factor of the golden-section search,
    /// `2 - phi = 0.3819...`.
    pub fn golden_section<T: Scalar>() -> T {
        <T as Scalar>::from_f64(0.3819660112501051)
    }
}
