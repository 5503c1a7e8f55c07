//! Guarded Cholesky factorization and inversion.
//!
//! The skeleton solver never fails on a singular block. A pivot that falls
//! below the relative threshold drops its direction instead: the factor gets
//! a zero column, the solution a zero component, and the inverse a zero row
//! and column. What remains is the exact inverse of the live principal
//! submatrix.

use nalgebra::{Dim, Matrix, Storage, StorageMut};

use crate::spatial::{symmetrize, SpatialMatrix};

/// In-place guarded Cholesky (LLᵀ) of the leading `n×n` block.
///
/// Overwrites the lower triangle of that block with L and leaves the upper
/// triangle unchanged. A pivot `≤ min_pivot · max|diag|` (or `≤ 0`) is
/// dropped. Returns the number of dropped pivots.
///
/// Zero allocations.
pub fn cholesky_guarded_in_place<D, S>(
    m: &mut Matrix<f64, D, D, S>,
    n: usize,
    min_pivot: f64,
) -> usize
where
    D: Dim,
    S: StorageMut<f64, D, D>,
{
    debug_assert!(n <= m.nrows() && n <= m.ncols());
    let scale = (0..n).map(|i| m[(i, i)].abs()).fold(0.0, f64::max);
    let threshold = min_pivot * scale;

    let mut dropped = 0;
    for j in 0..n {
        let mut diag = m[(j, j)];
        for k in 0..j {
            diag -= m[(j, k)] * m[(j, k)];
        }
        if diag <= threshold || diag <= 0.0 {
            m[(j, j)] = 0.0;
            for i in (j + 1)..n {
                m[(i, j)] = 0.0;
            }
            dropped += 1;
            continue;
        }
        let ljj = diag.sqrt();
        m[(j, j)] = ljj;

        for i in (j + 1)..n {
            let mut sum = m[(i, j)];
            for k in 0..j {
                sum -= m[(i, k)] * m[(j, k)];
            }
            m[(i, j)] = sum / ljj;
        }
    }
    dropped
}

/// Solve `L·Lᵀ·x = b` in place with a factor from [`cholesky_guarded_in_place`].
///
/// On entry `x` holds b; on exit the solution. Components of dropped pivots
/// come out zero.
pub fn cholesky_solve_guarded_in_place<D, S>(l: &Matrix<f64, D, D, S>, x: &mut [f64])
where
    D: Dim,
    S: Storage<f64, D, D>,
{
    let n = x.len();

    // Forward substitution: L·y = b
    for j in 0..n {
        if l[(j, j)] == 0.0 {
            x[j] = 0.0;
            continue;
        }
        for k in 0..j {
            x[j] -= l[(j, k)] * x[k];
        }
        x[j] /= l[(j, j)];
    }

    // Back substitution: Lᵀ·z = y
    for j in (0..n).rev() {
        if l[(j, j)] == 0.0 {
            x[j] = 0.0;
            continue;
        }
        for k in (j + 1)..n {
            x[j] -= l[(k, j)] * x[k];
        }
        x[j] /= l[(j, j)];
    }
}

/// Invert the leading `n×n` block of a symmetric 6×6 matrix.
///
/// Entries outside the leading block are zero in the result. Returns the
/// inverse and the number of dropped directions.
#[must_use]
pub fn invert_symmetric_guarded(
    m: &SpatialMatrix,
    n: usize,
    min_pivot: f64,
) -> (SpatialMatrix, usize) {
    let mut factor = *m;
    let dropped = cholesky_guarded_in_place(&mut factor, n, min_pivot);

    let mut inverse = SpatialMatrix::zeros();
    let mut column = [0.0; 6];
    for k in 0..n {
        column.fill(0.0);
        column[k] = 1.0;
        cholesky_solve_guarded_in_place(&factor, &mut column[..n]);
        for (i, value) in column.iter().take(n).enumerate() {
            inverse[(i, k)] = *value;
        }
    }
    symmetrize(&mut inverse, n);
    (inverse, dropped)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    fn spd3() -> SpatialMatrix {
        let mut m = SpatialMatrix::zeros();
        m[(0, 0)] = 4.0;
        m[(0, 1)] = 1.0;
        m[(1, 0)] = 1.0;
        m[(1, 1)] = 3.0;
        m[(2, 2)] = 2.0;
        m[(1, 2)] = 0.5;
        m[(2, 1)] = 0.5;
        m
    }

    #[test]
    fn test_invert_leading_block() {
        let m = spd3();
        let (inv, dropped) = invert_symmetric_guarded(&m, 3, 1e-12);
        assert_eq!(dropped, 0);

        let product = m * inv;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product[(i, j)], expected, epsilon = 1e-12);
            }
        }
        // Outside the leading block stays zero.
        assert_relative_eq!(inv[(3, 3)], 0.0);
        assert_relative_eq!(inv[(0, 4)], 0.0);
    }

    #[test]
    fn test_singular_direction_dropped() {
        // Second row duplicates the first: rank 2 of 3.
        let mut m = SpatialMatrix::zeros();
        m[(0, 0)] = 1.0;
        m[(0, 1)] = 1.0;
        m[(1, 0)] = 1.0;
        m[(1, 1)] = 1.0;
        m[(2, 2)] = 5.0;

        let (inv, dropped) = invert_symmetric_guarded(&m, 3, 1e-12);
        assert_eq!(dropped, 1);
        assert_relative_eq!(inv[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(inv[(1, 1)], 0.0);
        assert_relative_eq!(inv[(0, 1)], 0.0);
        assert_relative_eq!(inv[(2, 2)], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_block_inverts_to_zero() {
        let (inv, dropped) = invert_symmetric_guarded(&SpatialMatrix::zeros(), 6, 1e-12);
        assert_eq!(dropped, 6);
        assert_eq!(inv, SpatialMatrix::zeros());
    }

    #[test]
    fn test_dense_solve() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        let mut l = a.clone();
        assert_eq!(cholesky_guarded_in_place(&mut l, 3, 1e-12), 0);
        let mut x = b.clone();
        cholesky_solve_guarded_in_place(&l, x.as_mut_slice());

        let residual = &a * &x - &b;
        assert!(residual.amax() < 1e-12);
    }
}
