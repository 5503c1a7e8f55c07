//! Dense reference solve.
//!
//! Assembles `A = J·M⁻¹·Jᵀ + D` over every row of the step, tree and cycling
//! alike, and solves one box LCP. Cost grows with the cube of the row count,
//! so this is for validation and small skeletons.

use nalgebra::{DMatrix, DVector};
use sim_types::{BodyForce, BodyInfo, ConstraintRow, JointInfo};
use tracing::trace;

use crate::auxiliary::lcp_bounds;
use crate::container::SkeletonContainer;
use crate::error::Result;
use crate::lcp::solve_box_lcp;
use crate::scratch::StepScratch;
use crate::solve::{JointForceReport, SolvePath};

impl SkeletonContainer {
    /// Solve every row of the step as one dense box LCP and apply the forces.
    ///
    /// Produces the same result as [`Self::calculate_joint_force`] up to
    /// round-off, ignoring the configured [`crate::SolveMode`]. Only reads
    /// `scratch`, which must hold this skeleton's factorization for the step.
    ///
    /// # Errors
    ///
    /// Same as [`Self::calculate_joint_force`].
    pub fn brute_force_solve(
        &self,
        joints: &[JointInfo],
        bodies: &[BodyInfo],
        forces: &mut [BodyForce],
        rows: &mut [ConstraintRow],
        scratch: &StepScratch,
    ) -> Result<JointForceReport> {
        self.check_inputs(joints, bodies, forces, rows, scratch)?;
        let entries = &scratch.entries;
        let n = entries.len();

        let mut a = DMatrix::zeros(n, n);
        let mut b = DVector::zeros(n);
        for (i, row_i) in entries.iter().enumerate() {
            for (j, row_j) in entries.iter().enumerate().skip(i) {
                let value = row_i.coupling(row_j);
                a[(i, j)] = value;
                a[(j, i)] = value;
            }
            a[(i, i)] += row_i.diag_damp;
            b[i] = rows[row_i.index].coordinate_accel - row_i.relative_accel(bodies, forces);
        }
        let (low, high) = lcp_bounds(entries, rows);

        let solution = solve_box_lcp(&a, &b, &low, &high, &self.config);
        for (entry, &f) in entries.iter().zip(solution.x.iter()) {
            entry.apply(f, rows, forces);
        }

        trace!(
            skeleton = %self.id,
            rows = n,
            iterations = solution.iterations,
            "dense joint solve"
        );
        Ok(JointForceReport {
            path: SolvePath::BruteForce,
            primary_rows: scratch.primary_count,
            auxiliary_rows: scratch.auxiliary_row_count(),
            lcp_iterations: solution.iterations,
            converged: solution.converged,
        })
    }
}
