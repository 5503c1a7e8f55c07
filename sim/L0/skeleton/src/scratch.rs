//! Caller-owned per-step buffers.
//!
//! [`StepScratch`] is filled by `init_mass_matrix` and read by
//! `calculate_joint_force` for the same step. It is tagged with the skeleton
//! that filled it; handing it to another skeleton is an error. Reusing one
//! scratch across steps keeps its allocations.

use std::mem::size_of;

use nalgebra::DMatrix;
use sim_types::{
    BodyForce, BodyId, BodyInfo, ConstraintRow, JacobianPair, JointId, JointInfo, SimError,
    SkeletonId,
};

use crate::error::Result;
use crate::spatial::{SpatialMatrix, SpatialVector};

/// Sizes that determine a skeleton's scratch footprint for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScratchLayout {
    /// Number of tree nodes.
    pub node_count: usize,
    /// Rows of all tree and cycling joints.
    pub row_count: usize,
    /// Rows solved through the Schur complement (bounded tree rows and
    /// every cycling row).
    pub auxiliary_row_count: usize,
}

impl ScratchLayout {
    /// Rows eliminated by the tree sweeps.
    #[must_use]
    pub fn primary_row_count(&self) -> usize {
        self.row_count - self.auxiliary_row_count
    }

    /// Bytes of scratch storage a step with this layout needs.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        let aux = self.auxiliary_row_count;
        let primary = self.primary_row_count();
        self.node_count * (size_of::<NodeStep>() + 2 * size_of::<NodeForce>())
            + self.row_count * size_of::<RowEntry>()
            + (aux * aux + 2 * aux * primary) * size_of::<f64>()
    }
}

/// Body and joint terms of one node during the sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NodeForce {
    pub(crate) body: SpatialVector,
    pub(crate) joint: SpatialVector,
}

impl NodeForce {
    pub(crate) fn zero() -> Self {
        Self {
            body: SpatialVector::zeros(),
            joint: SpatialVector::zeros(),
        }
    }
}

/// One constraint row as seen by this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RowEntry {
    /// Index into the global row array.
    pub(crate) index: usize,
    pub(crate) body0: BodyId,
    pub(crate) body1: BodyId,
    pub(crate) jacobian: JacobianPair,
    /// `J·M⁻¹` halves.
    pub(crate) inv_mass_jacobian: JacobianPair,
    pub(crate) diag_damp: f64,
}

impl RowEntry {
    pub(crate) fn new(
        index: usize,
        info: &JointInfo,
        row: &ConstraintRow,
        bodies: &[BodyInfo],
    ) -> Result<Self> {
        let b0 = body_info(bodies, info.body0)?;
        let b1 = body_info(bodies, info.body1)?;
        Ok(Self {
            index,
            body0: info.body0,
            body1: info.body1,
            jacobian: row.jacobian,
            inv_mass_jacobian: JacobianPair::new(
                b0.jacobian_times_inv_mass(&row.jacobian.body0),
                b1.jacobian_times_inv_mass(&row.jacobian.body1),
            ),
            diag_damp: row.diag_damp,
        })
    }

    /// `Jᵢ·M⁻¹·Jⱼᵀ` through the bodies both rows touch.
    pub(crate) fn coupling(&self, other: &Self) -> f64 {
        let mut a = 0.0;
        if self.body0 == other.body0 {
            a += self.inv_mass_jacobian.body0.dot(&other.jacobian.body0);
        }
        if self.body0 == other.body1 {
            a += self.inv_mass_jacobian.body0.dot(&other.jacobian.body1);
        }
        if self.body1 == other.body0 {
            a += self.inv_mass_jacobian.body1.dot(&other.jacobian.body0);
        }
        if self.body1 == other.body1 {
            a += self.inv_mass_jacobian.body1.dot(&other.jacobian.body1);
        }
        a
    }

    /// Relative acceleration `J·M⁻¹·y` produced by the accumulated forces.
    pub(crate) fn relative_accel(&self, bodies: &[BodyInfo], forces: &[BodyForce]) -> f64 {
        let (i0, i1) = (self.body0.index(), self.body1.index());
        bodies[i0]
            .jacobian_times_inv_mass(&self.jacobian.body0)
            .dot_force(&forces[i0])
            + bodies[i1]
                .jacobian_times_inv_mass(&self.jacobian.body1)
                .dot_force(&forces[i1])
    }

    /// Add a solved force increment to the row and both body accumulators.
    pub(crate) fn apply(&self, force: f64, rows: &mut [ConstraintRow], forces: &mut [BodyForce]) {
        rows[self.index].force += force;
        forces[self.body0.index()].add_scaled(&self.jacobian.body0, force);
        forces[self.body1.index()].add_scaled(&self.jacobian.body1, force);
    }

    pub(crate) fn max_body_index(&self) -> usize {
        self.body0.index().max(self.body1.index())
    }
}

/// Per-step bookkeeping and factorized blocks of one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NodeStep {
    pub(crate) body: BodyId,
    /// Post-order index of the parent node.
    pub(crate) parent: Option<usize>,
    pub(crate) is_static: bool,
    /// Primary row count, at most 6.
    pub(crate) dof: usize,
    pub(crate) row_start: usize,
    pub(crate) row_count: usize,
    /// Joint row offsets, primary rows first.
    pub(crate) slots: [u8; 6],
    /// First primary entry of this node.
    pub(crate) primary_start: usize,
    pub(crate) body_mass: SpatialMatrix,
    pub(crate) body_inv: SpatialMatrix,
    pub(crate) joint_mass: SpatialMatrix,
    pub(crate) joint_inv: SpatialMatrix,
    /// Primary Jacobian rows on this node's body.
    pub(crate) j0: [SpatialVector; 6],
    /// Primary Jacobian rows on the parent's body.
    pub(crate) j1: [SpatialVector; 6],
    /// `B⁻¹·J0ₖ`.
    pub(crate) body_jt: [SpatialVector; 6],
    /// `(S⁻¹·J1)ₖ`.
    pub(crate) joint_jt: [SpatialVector; 6],
}

impl NodeStep {
    pub(crate) fn new(body: BodyId, parent: Option<usize>, is_static: bool) -> Self {
        Self {
            body,
            parent,
            is_static,
            dof: 0,
            row_start: 0,
            row_count: 0,
            slots: [0; 6],
            primary_start: 0,
            body_mass: SpatialMatrix::zeros(),
            body_inv: SpatialMatrix::zeros(),
            joint_mass: SpatialMatrix::zeros(),
            joint_inv: SpatialMatrix::zeros(),
            j0: [SpatialVector::zeros(); 6],
            j1: [SpatialVector::zeros(); 6],
            body_jt: [SpatialVector::zeros(); 6],
            joint_jt: [SpatialVector::zeros(); 6],
        }
    }
}

/// Reusable buffers for one skeleton's step.
#[derive(Debug, Clone, Default)]
pub struct StepScratch {
    pub(crate) owner: Option<SkeletonId>,
    /// Indexed by post-order node index.
    pub(crate) nodes: Vec<NodeStep>,
    /// Primary rows first, then tree auxiliary rows, then cycling rows.
    pub(crate) entries: Vec<RowEntry>,
    pub(crate) primary_count: usize,
    /// Auxiliary block, reduced to the Schur complement.
    pub(crate) mass11: DMatrix<f64>,
    /// Auxiliary × primary coupling.
    pub(crate) mass10: DMatrix<f64>,
    /// Row `i` is the primary force change per unit force on auxiliary row `i`.
    pub(crate) delta_force: DMatrix<f64>,
    pub(crate) accel: Vec<NodeForce>,
    pub(crate) force: Vec<NodeForce>,
}

impl StepScratch {
    /// Empty scratch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scratch with storage reserved for `layout`.
    #[must_use]
    pub fn with_layout(layout: &ScratchLayout) -> Self {
        let aux = layout.auxiliary_row_count;
        let primary = layout.primary_row_count();
        Self {
            owner: None,
            nodes: Vec::with_capacity(layout.node_count),
            entries: Vec::with_capacity(layout.row_count),
            primary_count: 0,
            mass11: DMatrix::zeros(aux, aux),
            mass10: DMatrix::zeros(aux, primary),
            delta_force: DMatrix::zeros(aux, primary),
            accel: Vec::with_capacity(layout.node_count),
            force: Vec::with_capacity(layout.node_count),
        }
    }

    /// Skeleton that last filled this scratch.
    #[must_use]
    pub fn owner(&self) -> Option<SkeletonId> {
        self.owner
    }

    /// Whether the scratch holds a complete factorization.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.owner.is_some()
    }

    /// Drop the factorization, keeping allocations.
    pub fn invalidate(&mut self) {
        self.owner = None;
        self.nodes.clear();
        self.entries.clear();
        self.primary_count = 0;
    }

    /// Layout of the current factorization.
    #[must_use]
    pub fn layout(&self) -> ScratchLayout {
        ScratchLayout {
            node_count: self.nodes.len(),
            row_count: self.entries.len(),
            auxiliary_row_count: self.auxiliary_row_count(),
        }
    }

    /// Number of factorized nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Rows eliminated by the tree sweeps.
    #[must_use]
    pub fn primary_row_count(&self) -> usize {
        self.primary_count
    }

    /// Rows solved through the Schur complement.
    #[must_use]
    pub fn auxiliary_row_count(&self) -> usize {
        self.entries.len() - self.primary_count
    }

    /// Primary DOF of the node at post-order `index`.
    #[must_use]
    pub fn dof(&self, index: usize) -> Option<usize> {
        self.nodes.get(index).map(|n| n.dof)
    }

    /// Joint row offsets of the node at `index`, primary rows first.
    #[must_use]
    pub fn row_slots(&self, index: usize) -> Option<&[u8]> {
        self.nodes.get(index).map(|n| &n.slots[..n.row_count])
    }

    /// Accumulated 6×6 body block of the node at `index`.
    #[must_use]
    pub fn body_mass(&self, index: usize) -> Option<&SpatialMatrix> {
        self.nodes.get(index).map(|n| &n.body_mass)
    }

    /// Joint block `D + J0·B⁻¹·J0ᵀ` of the node at `index`, in its leading
    /// `dof × dof` corner.
    #[must_use]
    pub fn joint_mass(&self, index: usize) -> Option<&SpatialMatrix> {
        self.nodes.get(index).map(|n| &n.joint_mass)
    }

    /// Schur complement over the auxiliary rows.
    #[must_use]
    pub fn schur_complement(&self) -> &DMatrix<f64> {
        &self.mass11
    }

    /// Global row indices in solve order: primary rows, then auxiliary rows.
    pub fn row_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.index)
    }

    pub(crate) fn primary_entries(&self) -> &[RowEntry] {
        &self.entries[..self.primary_count]
    }

    pub(crate) fn aux_entries(&self) -> &[RowEntry] {
        &self.entries[self.primary_count..]
    }

    pub(crate) fn max_body_index(&self) -> Option<usize> {
        self.entries.iter().map(RowEntry::max_body_index).max()
    }
}

pub(crate) fn body_info(bodies: &[BodyInfo], body: BodyId) -> Result<&BodyInfo> {
    bodies
        .get(body.index())
        .ok_or_else(|| SimError::InvalidBodyId(body.raw()).into())
}

/// Look up a joint's row description, checking it against `rows`.
pub(crate) fn joint_info<'a>(
    joints: &'a [JointInfo],
    joint: JointId,
    row_len: usize,
) -> Result<&'a JointInfo> {
    joints
        .get(joint.index())
        .filter(|info| info.joint == joint && info.rows().end <= row_len)
        .ok_or_else(|| SimError::InvalidJointId(joint.raw()).into())
}
