//! Per-step mass-matrix factorization.
//!
//! For each node in post-order (children before parents):
//!
//! ```text
//! B   = M + Σ_children J1ᵀ·S⁻¹·J1      (static bodies: B⁻¹ = 0)
//! S   = D + J0·B⁻¹·J0ᵀ                 (primary rows only)
//! ```
//!
//! where `J0` is the joint's Jacobian on the node's own body and `J1` the one
//! on the parent. The node keeps `B⁻¹·J0ᵀ` and `S⁻¹·J1` for the sweeps.
//! Auxiliary rows are left out of the tree and handled by the Schur
//! complement built in [`crate::auxiliary`].

use sim_types::{BodyInfo, ConstraintRow, JointInfo, SimError};
use tracing::debug;

use crate::container::SkeletonContainer;
use crate::error::{Result, SkeletonError};
use crate::linalg::invert_symmetric_guarded;
use crate::scratch::{body_info, joint_info, NodeForce, NodeStep, RowEntry, StepScratch};
use crate::spatial::{
    add_outer_products, body_mass_block, jacobian_to_spatial, symmetrize, SpatialMatrix,
    SpatialVector,
};

/// Most rows a tree joint may contribute.
pub(crate) const MAX_JOINT_ROWS: usize = 6;

impl SkeletonContainer {
    /// Classify this step's rows and factorize the tree into `scratch`.
    ///
    /// Must run once per step before [`Self::calculate_joint_force`]. Only
    /// reads its inputs, so independent skeletons may factorize in parallel.
    ///
    /// # Errors
    ///
    /// Returns an error if the skeleton is not finalized, a tree joint has
    /// more than six rows, or a joint or body is missing from the inputs.
    /// The scratch is left uninitialized on error.
    pub fn init_mass_matrix(
        &self,
        joints: &[JointInfo],
        rows: &[ConstraintRow],
        bodies: &[BodyInfo],
        scratch: &mut StepScratch,
    ) -> Result<()> {
        if !self.finalized {
            return Err(SkeletonError::NotFinalized);
        }
        scratch.invalidate();

        let mut aux_entries = Vec::new();
        for &node_id in &self.order {
            let node = self.graph.node(node_id);
            let body = body_info(bodies, node.body())?;
            let parent = node.parent().and_then(|p| self.graph.node(p).index());
            let mut step = NodeStep::new(node.body(), parent, body.is_static());
            step.body_mass = body_mass_block(body);

            if let Some(joint) = node.joint() {
                let info = joint_info(joints, joint, rows.len())?;
                if info.row_count > MAX_JOINT_ROWS {
                    return Err(SkeletonError::TooManyRows {
                        joint,
                        rows: info.row_count,
                    });
                }
                classify_rows(&mut step, info, rows);
                if step.is_static {
                    // A static body has no inverse block to eliminate through;
                    // its joint rows constrain the parent via the Schur complement.
                    step.dof = 0;
                }

                let own_is_body0 = info.body0 == node.body();
                step.primary_start = scratch.entries.len();
                for (k, &slot) in step.slots[..step.row_count].iter().enumerate() {
                    let r = info.row_start + usize::from(slot);
                    let entry = RowEntry::new(r, info, &rows[r], bodies)?;
                    if k < step.dof {
                        let (own, other) = if own_is_body0 {
                            (entry.jacobian.body0, entry.jacobian.body1)
                        } else {
                            (entry.jacobian.body1, entry.jacobian.body0)
                        };
                        step.j0[k] = jacobian_to_spatial(&own);
                        step.j1[k] = jacobian_to_spatial(&other);
                        scratch.entries.push(entry);
                    } else {
                        aux_entries.push(entry);
                    }
                }
            }
            scratch.nodes.push(step);
        }

        scratch.primary_count = scratch.entries.len();
        for &joint in &self.cycling {
            let info = joint_info(joints, joint, rows.len())?;
            for r in info.rows() {
                aux_entries.push(RowEntry::new(r, info, &rows[r], bodies)?);
            }
        }
        scratch.entries.extend(aux_entries);

        let dropped = factorize(scratch, self.config.min_pivot);
        if dropped > 0 {
            debug!(skeleton = %self.id, dropped, "degenerate pivots dropped during factorization");
        }

        // Built in every mode; a block solve may follow a factorization made
        // under `SolveMode::BruteForce`.
        let aux = scratch.auxiliary_row_count();
        if aux > 0 {
            scratch.build_schur_complement();
        }

        scratch.accel.clear();
        scratch.accel.resize(scratch.nodes.len(), NodeForce::zero());
        scratch.force.clone_from(&scratch.accel);
        scratch.owner = Some(self.id);
        debug!(
            skeleton = %self.id,
            nodes = scratch.nodes.len(),
            primary = scratch.primary_count,
            auxiliary = aux,
            "mass matrix initialized"
        );
        Ok(())
    }

    /// Verify `scratch` was filled by this skeleton for the layout in `joints`.
    pub(crate) fn check_scratch(
        &self,
        joints: &[JointInfo],
        scratch: &StepScratch,
    ) -> Result<()> {
        let Some(owner) = scratch.owner else {
            return Err(SkeletonError::ScratchNotInitialized);
        };
        let mismatch = SkeletonError::ScratchMismatch {
            expected: self.id,
            found: Some(owner),
        };
        if owner != self.id || scratch.nodes.len() != self.order.len() {
            return Err(mismatch);
        }
        for (&node_id, step) in self.order.iter().zip(&scratch.nodes) {
            if let Some(joint) = self.graph.node(node_id).joint() {
                let info = joints
                    .get(joint.index())
                    .ok_or(SimError::InvalidJointId(joint.raw()))?;
                if info.row_start != step.row_start || info.row_count != step.row_count {
                    return Err(mismatch);
                }
            }
        }
        Ok(())
    }
}

/// Fill the slot permutation: unbounded rows first, then bounded ones.
fn classify_rows(step: &mut NodeStep, info: &JointInfo, rows: &[ConstraintRow]) {
    step.row_start = info.row_start;
    step.row_count = info.row_count;
    let joint_rows = &rows[info.rows()];

    let mut slot = 0;
    for pass_primary in [true, false] {
        for (offset, row) in joint_rows.iter().enumerate() {
            if row.is_unbounded() == pass_primary {
                #[allow(clippy::cast_possible_truncation)] // at most 6 rows
                let offset = offset as u8;
                step.slots[slot] = offset;
                slot += 1;
            }
        }
        if pass_primary {
            step.dof = slot;
        }
    }
}

/// Build and invert every node's body and joint blocks. Returns the number of
/// dropped pivots.
fn factorize(scratch: &mut StepScratch, min_pivot: f64) -> usize {
    let StepScratch { nodes, entries, .. } = scratch;
    let mut dropped = 0;

    for i in 0..nodes.len() {
        let (done, rest) = nodes.split_at_mut(i + 1);
        let node = &mut done[i];

        if node.is_static {
            node.body_inv = SpatialMatrix::zeros();
        } else {
            symmetrize(&mut node.body_mass, 6);
            let (inverse, d) = invert_symmetric_guarded(&node.body_mass, 6, min_pivot);
            node.body_inv = inverse;
            dropped += d;
        }

        let Some(parent) = node.parent else {
            continue;
        };
        let dof = node.dof;
        for k in 0..dof {
            node.body_jt[k] = node.body_inv * node.j0[k];
        }

        let mut joint_mass = SpatialMatrix::zeros();
        for k in 0..dof {
            for l in k..dof {
                let v = node.j0[k].dot(&node.body_jt[l]);
                joint_mass[(k, l)] = v;
                joint_mass[(l, k)] = v;
            }
            joint_mass[(k, k)] += entries[node.primary_start + k].diag_damp;
        }
        let (joint_inv, d) = invert_symmetric_guarded(&joint_mass, dof, min_pivot);
        dropped += d;
        node.joint_mass = joint_mass;
        node.joint_inv = joint_inv;

        for k in 0..dof {
            let mut row = SpatialVector::zeros();
            for l in 0..dof {
                row += node.j1[l] * joint_inv[(k, l)];
            }
            node.joint_jt[k] = row;
        }

        debug_assert!(parent > i, "post-order puts parents after children");
        let parent_step = &mut rest[parent - i - 1];
        if !parent_step.is_static {
            add_outer_products(&mut parent_step.body_mass, &node.j1, &node.joint_jt, dof);
        }
    }
    dropped
}
