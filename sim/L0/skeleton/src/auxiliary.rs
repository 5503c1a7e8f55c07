//! Schur complement over the auxiliary rows.
//!
//! Bounded tree rows and every cycling-joint row stay out of the tree
//! elimination. Splitting the row system into primary `P` and auxiliary `X`
//! blocks:
//!
//! ```text
//! [A_PP  A_PX] [f_P]   [b_P]
//! [A_XP  A_XX] [f_X] = [b_X]
//! ```
//!
//! the tree sweeps apply `A_PP⁻¹`. Each auxiliary row's influence on the
//! primary forces, `Δ = −A_PP⁻¹·A_PX`, is found with one sweep per row at
//! factorization time, leaving the reduced system
//!
//! ```text
//! (A_XX + A_XP·Δ)·f_X = b_X − A_XP·f_P⁰
//! ```
//!
//! which is solved as a box LCP. The primary forces then follow as
//! `f_P = f_P⁰ + Δ·f_X`.

use nalgebra::{DMatrix, DVector};
use sim_types::{BodyForce, BodyInfo, ConstraintRow};
use tracing::trace;

use crate::container::SkeletonContainer;
use crate::lcp::solve_box_lcp;
use crate::scratch::{NodeForce, RowEntry, StepScratch};
use crate::solve::{backward, forward, JointForceReport, SolvePath};

impl StepScratch {
    /// Build `mass11`, `mass10` and `delta_force`, then reduce `mass11` to
    /// the Schur complement. Needs the tree factorization in place.
    pub(crate) fn build_schur_complement(&mut self) {
        let primary = self.primary_count;
        let aux = self.auxiliary_row_count();
        let (primary_entries, aux_entries) = self.entries.split_at(primary);

        self.mass11 = DMatrix::zeros(aux, aux);
        for (i, row_i) in aux_entries.iter().enumerate() {
            for (j, row_j) in aux_entries.iter().enumerate().skip(i) {
                let value = row_i.coupling(row_j);
                self.mass11[(i, j)] = value;
                self.mass11[(j, i)] = value;
            }
            self.mass11[(i, i)] += row_i.diag_damp;
        }

        self.mass10 = DMatrix::zeros(aux, primary);
        for (i, row_i) in aux_entries.iter().enumerate() {
            for (p, row_p) in primary_entries.iter().enumerate() {
                self.mass10[(i, p)] = row_i.coupling(row_p);
            }
        }

        self.delta_force = DMatrix::zeros(aux, primary);
        if primary > 0 {
            self.force.clear();
            self.force.resize(self.nodes.len(), NodeForce::zero());
            for i in 0..aux {
                for (step, force) in self.nodes.iter().zip(self.force.iter_mut()) {
                    *force = NodeForce::zero();
                    for k in 0..step.dof {
                        force.joint[k] = self.mass10[(i, step.primary_start + k)];
                    }
                }
                forward(&self.nodes, &mut self.force);
                backward(&self.nodes, &mut self.force);
                for (step, force) in self.nodes.iter().zip(&self.force) {
                    for k in 0..step.dof {
                        self.delta_force[(i, step.primary_start + k)] = force.joint[k];
                    }
                }
            }
        }

        for i in 0..aux {
            for j in i..aux {
                let value =
                    self.mass11[(i, j)] + self.mass10.row(i).dot(&self.delta_force.row(j));
                self.mass11[(i, j)] = value;
                self.mass11[(j, i)] = value;
            }
        }
    }
}

impl SkeletonContainer {
    /// Finish a solve whose tree sweeps left the unconstrained primary forces
    /// in `scratch.force`.
    pub(crate) fn solve_auxiliary(
        &self,
        bodies: &[BodyInfo],
        forces: &mut [BodyForce],
        rows: &mut [ConstraintRow],
        scratch: &StepScratch,
    ) -> JointForceReport {
        let primary = scratch.primary_count;
        let aux_entries = scratch.aux_entries();
        let aux = aux_entries.len();

        let mut primary_force = DVector::zeros(primary);
        for (step, force) in scratch.nodes.iter().zip(&scratch.force) {
            for k in 0..step.dof {
                primary_force[step.primary_start + k] = force.joint[k];
            }
        }

        let mut b = DVector::zeros(aux);
        for (j, entry) in aux_entries.iter().enumerate() {
            b[j] = rows[entry.index].coordinate_accel - entry.relative_accel(bodies, forces);
        }
        b -= &scratch.mass10 * &primary_force;
        let (low, high) = lcp_bounds(aux_entries, rows);

        let solution = solve_box_lcp(&scratch.mass11, &b, &low, &high, &self.config);
        primary_force += scratch.delta_force.tr_mul(&solution.x);

        for (entry, &f) in scratch.primary_entries().iter().zip(primary_force.iter()) {
            entry.apply(f, rows, forces);
        }
        for (entry, &f) in aux_entries.iter().zip(solution.x.iter()) {
            entry.apply(f, rows, forces);
        }

        trace!(
            skeleton = %self.id,
            primary,
            auxiliary = aux,
            iterations = solution.iterations,
            "auxiliary joint solve"
        );
        JointForceReport {
            path: SolvePath::Auxiliary,
            primary_rows: primary,
            auxiliary_rows: aux,
            lcp_iterations: solution.iterations,
            converged: solution.converged,
        }
    }
}

/// Box bounds on the force increment of each entry.
///
/// Unbounded rows get ±∞; bounded rows get what is left of their range
/// after the accumulated force.
pub(crate) fn lcp_bounds(
    entries: &[RowEntry],
    rows: &[ConstraintRow],
) -> (DVector<f64>, DVector<f64>) {
    let mut low = DVector::from_element(entries.len(), f64::NEG_INFINITY);
    let mut high = DVector::from_element(entries.len(), f64::INFINITY);
    for (j, entry) in entries.iter().enumerate() {
        let row = &rows[entry.index];
        if !row.is_unbounded() {
            let (lo, hi) = row.remaining_bounds();
            low[j] = lo.min(hi);
            high[j] = hi;
        }
    }
    (low, high)
}
