//! Solver configuration for skeleton containers.

use crate::error::{Result, SkeletonError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which algorithm computes joint forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolveMode {
    /// Tree elimination with a Schur complement over auxiliary rows.
    #[default]
    BlockSparse,
    /// One dense system over every row. Slow; meant for small skeletons
    /// and cross-checking.
    BruteForce,
}

/// Configuration for the skeleton solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkeletonSolverConfig {
    /// Algorithm used by `calculate_joint_force`.
    pub solve_mode: SolveMode,

    /// Maximum pivot iterations of the box LCP before it returns the best
    /// iterate found.
    pub lcp_max_iterations: usize,

    /// Feasibility tolerance of the box LCP, relative to the right-hand side
    /// magnitude.
    pub lcp_tolerance: f64,

    /// Relative pivot threshold of the guarded Cholesky inversion.
    /// A pivot below `min_pivot * max_diagonal` drops that direction.
    pub min_pivot: f64,
}

impl Default for SkeletonSolverConfig {
    fn default() -> Self {
        Self {
            solve_mode: SolveMode::BlockSparse,
            lcp_max_iterations: 64,
            lcp_tolerance: 1e-9,
            min_pivot: 1e-12,
        }
    }
}

impl SkeletonSolverConfig {
    /// High-accuracy configuration for offline or validation runs.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            solve_mode: SolveMode::BlockSparse,
            lcp_max_iterations: 256,
            lcp_tolerance: 1e-12,
            min_pivot: 1e-14,
        }
    }

    /// Bounded-cost configuration for real-time stepping.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            solve_mode: SolveMode::BlockSparse,
            lcp_max_iterations: 24,
            lcp_tolerance: 1e-6,
            min_pivot: 1e-10,
        }
    }

    /// Set the solve mode.
    #[must_use]
    pub const fn with_solve_mode(mut self, mode: SolveMode) -> Self {
        self.solve_mode = mode;
        self
    }

    /// Set the LCP iteration cap.
    #[must_use]
    pub const fn with_lcp_max_iterations(mut self, max_iter: usize) -> Self {
        self.lcp_max_iterations = max_iter;
        self
    }

    /// Set the LCP tolerance.
    #[must_use]
    pub const fn with_lcp_tolerance(mut self, tolerance: f64) -> Self {
        self.lcp_tolerance = tolerance;
        self
    }

    /// Set the pivot threshold.
    #[must_use]
    pub const fn with_min_pivot(mut self, min_pivot: f64) -> Self {
        self.min_pivot = min_pivot;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SkeletonError::InvalidConfig`] if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.lcp_max_iterations == 0 {
            return Err(SkeletonError::invalid_config(
                "LCP iteration cap must be at least 1",
            ));
        }
        if !(self.lcp_tolerance > 0.0 && self.lcp_tolerance.is_finite()) {
            return Err(SkeletonError::invalid_config(
                "LCP tolerance must be positive and finite",
            ));
        }
        if !(self.min_pivot >= 0.0 && self.min_pivot < 1.0) {
            return Err(SkeletonError::invalid_config(
                "pivot threshold must be in range [0, 1)",
            ));
        }
        Ok(())
    }
}
