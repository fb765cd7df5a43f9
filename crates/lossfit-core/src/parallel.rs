//! Data-parallel kernels for the dense update rules.
//!
//! The quasi-Newton inverse-Hessian update is dominated by rank-one
//! outer-product accumulations on an `n × n` matrix. For large parameter
//! counts those columns are updated in parallel with rayon; below the
//! threshold the sequential BLAS-style path wins and is used instead.
//! Matrices are column-major, so a chunk of `nrows` contiguous elements is
//! exactly one column.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::types::{DMatrix, DVector, Scalar};

/// Dimension at and above which the rayon path is used.
pub const PARALLEL_DIMENSION_THRESHOLD: usize = 512;

/// Accumulates `matrix += alpha · x yᵗ` in place.
pub fn rank_one_update<T: Scalar>(matrix: &mut DMatrix<T>, alpha: T, x: &DVector<T>, y: &DVector<T>) {
    debug_assert_eq!(matrix.nrows(), x.len());
    debug_assert_eq!(matrix.ncols(), y.len());

    #[cfg(feature = "parallel")]
    if matrix.nrows() >= PARALLEL_DIMENSION_THRESHOLD {
        let nrows = matrix.nrows();
        let xs = x.as_slice();
        matrix
            .as_mut_slice()
            .par_chunks_exact_mut(nrows)
            .enumerate()
            .for_each(|(j, column)| {
                let weight = alpha * y[j];
                if weight != T::zero() {
                    for (entry, xi) in column.iter_mut().zip(xs) {
                        *entry += weight * *xi;
                    }
                }
            });
        return;
    }

    matrix.ger(alpha, x, y, T::one());
}

/// Replaces `matrix` with `(matrix + matrixᵗ) / 2`, clearing the
/// floating-point drift the update formulas accumulate off the diagonal.
pub fn symmetrize<T: Scalar>(matrix: &mut DMatrix<T>) {
    debug_assert_eq!(matrix.nrows(), matrix.ncols());
    let half = <T as Scalar>::from_f64(0.5);
    let n = matrix.nrows();
    for j in 0..n {
        for i in (j + 1)..n {
            let average = (matrix[(i, j)] + matrix[(j, i)]) * half;
            matrix[(i, j)] = average;
            matrix[(j, i)] = average;
        }
    }
}
