//! Joint force solve over a factorized tree.
//!
//! The forward sweep runs children before parents, folding each node's joint
//! right-hand side into its parent's body term. The backward sweep runs from
//! the root down, recovering body accelerations and joint forces:
//!
//! ```text
//! forward:   q'ᵢ = qᵢ − J0·B⁻¹·p'ᵢ,        p'ₚ += J1ᵀ·S⁻¹·q'ᵢ
//! backward:  fᵢ  = S⁻¹·(J1·xₚ − q'ᵢ),      xᵢ  = B⁻¹·(p'ᵢ − J0ᵀ·fᵢ)
//! ```
//!
//! With `q = J·M⁻¹·y − a_target` and `p = 0` the recovered `f` is the force
//! increment that brings every primary row to its target acceleration.

use sim_types::{BodyForce, BodyInfo, ConstraintRow, JointInfo, SimError};
use tracing::trace;

use crate::config::SolveMode;
use crate::container::SkeletonContainer;
use crate::error::{Result, SkeletonError};
use crate::scratch::{NodeForce, NodeStep, StepScratch};
use crate::spatial::SpatialVector;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a joint force solve was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolvePath {
    /// Every row was primary; the tree sweeps alone solved it.
    Direct,
    /// Tree sweeps plus a box LCP over the auxiliary rows.
    Auxiliary,
    /// One dense box LCP over every row.
    BruteForce,
}

/// Summary of one `calculate_joint_force` call.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointForceReport {
    /// Path taken.
    pub path: SolvePath,
    /// Rows eliminated by the tree sweeps.
    pub primary_rows: usize,
    /// Rows solved by the box LCP.
    pub auxiliary_rows: usize,
    /// Box LCP iterations (0 on the direct path).
    pub lcp_iterations: usize,
    /// False if the box LCP hit its iteration cap.
    pub converged: bool,
}

impl JointForceReport {
    /// Report for a skeleton with nothing to solve.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            path: SolvePath::Direct,
            primary_rows: 0,
            auxiliary_rows: 0,
            lcp_iterations: 0,
            converged: true,
        }
    }
}

impl SkeletonContainer {
    /// Solve this step's joint forces and apply them.
    ///
    /// Reads each row's Jacobians and target acceleration together with the
    /// current accumulated body forces, solves for the force increments that
    /// meet every target within the row bounds, then adds each increment to
    /// `rows[i].force` and its `Jᵀ·f` to both bodies in `forces`.
    ///
    /// `scratch` must have been filled by [`Self::init_mass_matrix`] on this
    /// skeleton for the same joint layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch was not initialized by this skeleton
    /// for this layout, or a row or body index is out of range.
    pub fn calculate_joint_force(
        &self,
        joints: &[JointInfo],
        bodies: &[BodyInfo],
        forces: &mut [BodyForce],
        rows: &mut [ConstraintRow],
        scratch: &mut StepScratch,
    ) -> Result<JointForceReport> {
        self.check_inputs(joints, bodies, forces, rows, scratch)?;
        if scratch.entries.is_empty() {
            return Ok(JointForceReport::empty());
        }
        if self.config.solve_mode == SolveMode::BruteForce {
            return self.brute_force_solve(joints, bodies, forces, rows, scratch);
        }

        load_row_accel(scratch, bodies, forces, rows);
        scratch.force.clone_from(&scratch.accel);
        forward(&scratch.nodes, &mut scratch.force);
        backward(&scratch.nodes, &mut scratch.force);

        if scratch.auxiliary_row_count() > 0 {
            return Ok(self.solve_auxiliary(bodies, forces, rows, scratch));
        }

        for (step, force) in scratch.nodes.iter().zip(&scratch.force) {
            let entries = &scratch.entries[step.primary_start..step.primary_start + step.dof];
            for (entry, &f) in entries.iter().zip(force.joint.iter()) {
                entry.apply(f, rows, forces);
            }
        }
        trace!(skeleton = %self.id, rows = scratch.primary_count, "direct joint solve");
        Ok(JointForceReport {
            path: SolvePath::Direct,
            primary_rows: scratch.primary_count,
            auxiliary_rows: 0,
            lcp_iterations: 0,
            converged: true,
        })
    }

    /// Check a solve's inputs against the factorization in `scratch`.
    pub(crate) fn check_inputs(
        &self,
        joints: &[JointInfo],
        bodies: &[BodyInfo],
        forces: &[BodyForce],
        rows: &[ConstraintRow],
        scratch: &StepScratch,
    ) -> Result<()> {
        self.check_scratch(joints, scratch)?;
        if let Some(max) = scratch.max_body_index() {
            if max >= bodies.len().min(forces.len()) {
                return Err(SimError::InvalidBodyId(max as u64).into());
            }
        }
        if scratch.entries.iter().any(|e| e.index >= rows.len()) {
            return Err(SkeletonError::ScratchMismatch {
                expected: self.id,
                found: scratch.owner,
            });
        }
        Ok(())
    }
}

/// Fill `scratch.accel` with `J·M⁻¹·y − a_target` for every primary row.
fn load_row_accel(
    scratch: &mut StepScratch,
    bodies: &[BodyInfo],
    forces: &[BodyForce],
    rows: &[ConstraintRow],
) {
    let StepScratch {
        nodes,
        entries,
        accel,
        ..
    } = scratch;
    for (step, accel) in nodes.iter().zip(accel.iter_mut()) {
        *accel = NodeForce::zero();
        let entries = &entries[step.primary_start..step.primary_start + step.dof];
        for (k, entry) in entries.iter().enumerate() {
            accel.joint[k] =
                entry.relative_accel(bodies, forces) - rows[entry.index].coordinate_accel;
        }
    }
}

/// Children-to-parent sweep.
pub(crate) fn forward(nodes: &[NodeStep], force: &mut [NodeForce]) {
    for (i, step) in nodes.iter().enumerate() {
        let Some(parent) = step.parent else {
            continue;
        };
        let term = &mut force[i];
        let mut to_parent = SpatialVector::zeros();
        for k in 0..step.dof {
            term.joint[k] -= step.body_jt[k].dot(&term.body);
            to_parent += step.joint_jt[k] * term.joint[k];
        }
        force[parent].body += to_parent;
    }
}

/// Root-to-leaves sweep. Leaves body accelerations in `body` and joint
/// forces in the leading `dof` entries of `joint`.
pub(crate) fn backward(nodes: &[NodeStep], force: &mut [NodeForce]) {
    for (i, step) in nodes.iter().enumerate().rev() {
        let Some(parent) = step.parent else {
            force[i].body = step.body_inv * force[i].body;
            force[i].joint = SpatialVector::zeros();
            continue;
        };
        let parent_accel = force[parent].body;
        let term = &mut force[i];

        let mut joint_force = SpatialVector::zeros();
        for k in 0..step.dof {
            let mut reduced = 0.0;
            for l in 0..step.dof {
                reduced += step.joint_inv[(k, l)] * term.joint[l];
            }
            joint_force[k] = step.joint_jt[k].dot(&parent_accel) - reduced;
        }

        let mut body_accel = step.body_inv * term.body;
        for k in 0..step.dof {
            body_accel -= step.body_jt[k] * joint_force[k];
        }
        term.joint = joint_force;
        term.body = body_accel;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SkeletonSolverConfig;
    use crate::topology::Topology;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};
    use sim_types::{Jacobian, JacobianPair, SkeletonId};

    struct Pendulum {
        skeleton: SkeletonContainer,
        joints: Vec<JointInfo>,
        rows: Vec<ConstraintRow>,
        bodies: Vec<BodyInfo>,
    }

    fn pendulum() -> Pendulum {
        let mut topology = Topology::new();
        let ground = topology.add_body();
        let link = topology.add_body();
        let joint = topology.add_joint(link, ground).unwrap();
        let mut skeleton =
            SkeletonContainer::new(SkeletonId::new(10), &mut topology, ground).unwrap();
        skeleton.add_child(&mut topology, link, None).unwrap();
        skeleton.finalize(&mut topology);

        let row = ConstraintRow::bilateral(JacobianPair::new(
            Jacobian::angular(Vector3::z()),
            Jacobian::angular(-Vector3::z()),
        ));
        Pendulum {
            skeleton,
            joints: vec![topology.joint_info(joint, 0, 1).unwrap()],
            rows: vec![row],
            bodies: vec![
                BodyInfo::fixed(),
                BodyInfo::dynamic(1.0, Matrix3::identity() * 2.0).unwrap(),
            ],
        }
    }

    #[test]
    fn test_pendulum_torque_cancelled() {
        let Pendulum {
            skeleton,
            joints,
            mut rows,
            bodies,
        } = pendulum();
        let mut forces = vec![
            BodyForce::zero(),
            BodyForce::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 3.0)),
        ];
        let mut scratch = StepScratch::new();
        skeleton
            .init_mass_matrix(&joints, &rows, &bodies, &mut scratch)
            .unwrap();
        let report = skeleton
            .calculate_joint_force(&joints, &bodies, &mut forces, &mut rows, &mut scratch)
            .unwrap();

        assert_eq!(report.path, SolvePath::Direct);
        assert_eq!(report.primary_rows, 1);
        assert_relative_eq!(rows[0].force, -3.0, epsilon = 1e-10);
        assert_relative_eq!(forces[1].angular.z, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_target_acceleration_met() {
        let Pendulum {
            skeleton,
            joints,
            mut rows,
            bodies,
        } = pendulum();
        rows[0].coordinate_accel = 1.5;
        let mut forces = vec![BodyForce::zero(); 2];
        let mut scratch = StepScratch::new();
        skeleton
            .init_mass_matrix(&joints, &rows, &bodies, &mut scratch)
            .unwrap();
        skeleton
            .calculate_joint_force(&joints, &bodies, &mut forces, &mut rows, &mut scratch)
            .unwrap();

        // Relative angular acceleration = torque / inertia.
        assert_relative_eq!(forces[1].angular.z / 2.0, 1.5, epsilon = 1e-10);
        assert_relative_eq!(rows[0].force, 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_sweeps_recover_body_accel() {
        let Pendulum {
            skeleton,
            joints,
            rows,
            bodies,
        } = pendulum();
        let mut scratch = StepScratch::new();
        skeleton
            .init_mass_matrix(&joints, &rows, &bodies, &mut scratch)
            .unwrap();

        // q = 1 on the single row: f = −q / S = −2, x = B⁻¹·(−J0ᵀ·f).
        let mut force = vec![NodeForce::zero(); 2];
        force[0].joint[0] = 1.0;
        forward(&scratch.nodes, &mut force);
        backward(&scratch.nodes, &mut force);
        assert_relative_eq!(force[0].joint[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(force[0].body[5], 1.0, epsilon = 1e-12);
        assert_relative_eq!(force[1].body.norm(), 0.0);
    }

    #[test]
    fn test_uninitialized_scratch_rejected() {
        let Pendulum {
            skeleton,
            joints,
            mut rows,
            bodies,
        } = pendulum();
        let mut forces = vec![BodyForce::zero(); 2];
        let mut scratch = StepScratch::new();
        assert_eq!(
            skeleton.calculate_joint_force(&joints, &bodies, &mut forces, &mut rows, &mut scratch),
            Err(SkeletonError::ScratchNotInitialized)
        );
    }

    #[test]
    fn test_short_force_slice_rejected() {
        let Pendulum {
            skeleton,
            joints,
            mut rows,
            bodies,
        } = pendulum();
        let mut scratch = StepScratch::new();
        skeleton
            .init_mass_matrix(&joints, &rows, &bodies, &mut scratch)
            .unwrap();
        let mut forces = vec![BodyForce::zero()];
        let err = skeleton
            .calculate_joint_force(&joints, &bodies, &mut forces, &mut rows, &mut scratch)
            .unwrap_err();
        assert_eq!(err, SkeletonError::Sim(SimError::InvalidBodyId(1)));
    }

    #[test]
    fn test_brute_force_mode_dispatch() {
        let Pendulum {
            mut skeleton,
            joints,
            mut rows,
            bodies,
        } = pendulum();
        skeleton
            .set_config(SkeletonSolverConfig::default().with_solve_mode(SolveMode::BruteForce))
            .unwrap();
        let mut forces = vec![
            BodyForce::zero(),
            BodyForce::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 3.0)),
        ];
        let mut scratch = StepScratch::new();
        skeleton
            .init_mass_matrix(&joints, &rows, &bodies, &mut scratch)
            .unwrap();
        let report = skeleton
            .calculate_joint_force(&joints, &bodies, &mut forces, &mut rows, &mut scratch)
            .unwrap();
        assert_eq!(report.path, SolvePath::BruteForce);
        assert_relative_eq!(rows[0].force, -3.0, epsilon = 1e-10);
    }
}
