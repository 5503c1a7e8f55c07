//! Box-constrained linear complementarity solver.
//!
//! Solves `A·x = b + w` with `low ≤ x ≤ high` for symmetric positive
//! (semi-)definite `A`, where the residual `w = A·x − b` satisfies
//! - `low < x < high` ⇒ `w = 0`
//! - `x = low` ⇒ `w ≥ 0`
//! - `x = high` ⇒ `w ≤ 0`
//!
//! # Algorithm
//!
//! Block principal pivoting. Every variable is free, at its lower bound or at
//! its upper bound. Each iteration fixes bounded variables at their bounds,
//! solves the free block with the guarded Cholesky and flips every variable
//! that violates its state. When the number of violations stops shrinking
//! for a few iterations the solver falls back to flipping only the violating
//! variable with the largest index (Murty's rule), which cannot cycle on a
//! positive definite matrix.
//!
//! Variables with both bounds at or beyond [`UNBOUNDED_FORCE`] are always
//! free.

use nalgebra::{DMatrix, DVector};
use sim_types::UNBOUNDED_FORCE;
use tracing::{trace, warn};

use crate::config::SkeletonSolverConfig;
use crate::linalg::{cholesky_guarded_in_place, cholesky_solve_guarded_in_place};

/// Full-block flips tolerated without progress before switching to single
/// pivots.
const BLOCK_PIVOT_STRIKES: usize = 3;

/// Result of a box LCP solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LcpSolution {
    /// Solution vector, always inside the bounds.
    pub x: DVector<f64>,
    /// Number of free-set solves performed.
    pub iterations: usize,
    /// Whether every complementarity condition holds within tolerance.
    pub converged: bool,
}

impl LcpSolution {
    /// Solution of an empty problem.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            x: DVector::zeros(0),
            iterations: 0,
            converged: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarState {
    Free,
    AtLow,
    AtHigh,
}

/// Solve the box-constrained LCP `A·x = b + w`, `low ≤ x ≤ high`.
///
/// Bounds must satisfy `low ≤ high`; use ±∞ for unbounded entries. On hitting
/// `config.lcp_max_iterations` the best iterate found (fewest violations) is
/// clamped into the bounds and returned with `converged = false`.
#[must_use]
pub fn solve_box_lcp(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    low: &DVector<f64>,
    high: &DVector<f64>,
    config: &SkeletonSolverConfig,
) -> LcpSolution {
    let n = b.len();
    debug_assert_eq!(a.nrows(), n);
    debug_assert_eq!(a.ncols(), n);
    debug_assert!((0..n).all(|i| low[i] <= high[i]), "infeasible bound pair");
    if n == 0 {
        return LcpSolution::empty();
    }

    let tol = config.lcp_tolerance * (1.0 + b.amax());
    let pinned: Vec<bool> = (0..n).map(|i| high[i] - low[i] <= tol).collect();
    let unbounded: Vec<bool> = (0..n).map(|i| is_unbounded_pair(low[i], high[i])).collect();

    let mut state: Vec<VarState> = pinned
        .iter()
        .map(|&p| if p { VarState::AtLow } else { VarState::Free })
        .collect();
    let mut x = DVector::zeros(n);
    let mut best_x = DVector::zeros(n);
    let mut best_violations = usize::MAX;
    let mut strikes = BLOCK_PIVOT_STRIKES;
    let mut free = Vec::with_capacity(n);
    let mut violating = Vec::with_capacity(n);

    for iteration in 1..=config.lcp_max_iterations {
        solve_free_set(a, b, low, high, &state, &mut x, &mut free, config.min_pivot);
        let w = a * &x - b;

        violating.clear();
        for i in 0..n {
            let violated = match state[i] {
                VarState::Free => {
                    !unbounded[i] && (x[i] < low[i] - tol || x[i] > high[i] + tol)
                }
                VarState::AtLow => !pinned[i] && w[i] < -tol,
                VarState::AtHigh => w[i] > tol,
            };
            if violated {
                violating.push(i);
            }
        }

        if violating.is_empty() {
            trace!(n, iteration, "box LCP converged");
            return LcpSolution {
                x,
                iterations: iteration,
                converged: true,
            };
        }

        if violating.len() < best_violations {
            best_violations = violating.len();
            best_x.copy_from(&x);
            strikes = BLOCK_PIVOT_STRIKES;
            flip_all(&mut state, &violating, &x, low);
        } else if strikes > 0 {
            strikes -= 1;
            flip_all(&mut state, &violating, &x, low);
        } else if let Some(&last) = violating.last() {
            flip_all(&mut state, &[last], &x, low);
        }
    }

    warn!(
        n,
        max_iterations = config.lcp_max_iterations,
        violations = best_violations,
        "box LCP hit its iteration cap, returning best iterate"
    );
    for i in 0..n {
        best_x[i] = best_x[i].max(low[i]).min(high[i]);
    }
    LcpSolution {
        x: best_x,
        iterations: config.lcp_max_iterations,
        converged: false,
    }
}

/// True when both bounds sit at or beyond the unbounded sentinel.
fn is_unbounded_pair(low: f64, high: f64) -> bool {
    low <= -UNBOUNDED_FORCE && high >= UNBOUNDED_FORCE
}

fn flip_all(state: &mut [VarState], indices: &[usize], x: &DVector<f64>, low: &DVector<f64>) {
    for &i in indices {
        state[i] = match state[i] {
            VarState::Free if x[i] < low[i] => VarState::AtLow,
            VarState::Free => VarState::AtHigh,
            VarState::AtLow | VarState::AtHigh => VarState::Free,
        };
    }
}

/// Fix bounded variables and solve the free block for the rest.
#[allow(clippy::too_many_arguments)]
fn solve_free_set(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    low: &DVector<f64>,
    high: &DVector<f64>,
    state: &[VarState],
    x: &mut DVector<f64>,
    free: &mut Vec<usize>,
    min_pivot: f64,
) {
    free.clear();
    for (i, s) in state.iter().enumerate() {
        match s {
            VarState::Free => free.push(i),
            VarState::AtLow => x[i] = low[i],
            VarState::AtHigh => x[i] = high[i],
        }
    }
    if free.is_empty() {
        return;
    }

    let nf = free.len();
    let mut block = DMatrix::zeros(nf, nf);
    let mut rhs = DVector::zeros(nf);
    for (r, &i) in free.iter().enumerate() {
        let mut value = b[i];
        for (j, s) in state.iter().enumerate() {
            if *s != VarState::Free {
                value -= a[(i, j)] * x[j];
            }
        }
        rhs[r] = value;
        for (c, &j) in free.iter().enumerate() {
            block[(r, c)] = a[(i, j)];
        }
    }

    cholesky_guarded_in_place(&mut block, nf, min_pivot);
    cholesky_solve_guarded_in_place(&block, rhs.as_mut_slice());
    for (r, &i) in free.iter().enumerate() {
        x[i] = rhs[r];
    }
}
