//! Owner of every skeleton in a world.
//!
//! Hands out unique skeleton ids, keeps containers alive and drives the
//! per-step factorization and solve over all of them. Factorization of
//! independent skeletons runs in parallel with rayon when the `parallel`
//! feature is enabled. The solve is sequential since skeletons may share
//! rows and body accumulators.

use std::collections::BTreeMap;

use sim_types::{BodyForce, BodyId, BodyInfo, ConstraintRow, JointInfo, SkeletonId};
use tracing::debug;

use crate::config::SkeletonSolverConfig;
use crate::container::SkeletonContainer;
use crate::error::{Result, SkeletonError};
use crate::scratch::StepScratch;
use crate::solve::JointForceReport;
use crate::topology::Topology;

/// First id handed out by a fresh manager.
pub const SKELETON_BASE_UNIQUE_ID: u32 = 10;

/// One scratch per skeleton, keyed by skeleton id.
pub type ScratchPool = BTreeMap<SkeletonId, StepScratch>;

/// Creates, owns and steps skeleton containers.
#[derive(Debug)]
pub struct SkeletonManager {
    skeletons: BTreeMap<SkeletonId, SkeletonContainer>,
    next_id: u32,
    config: SkeletonSolverConfig,
}

impl Default for SkeletonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonManager {
    /// Empty manager with the default solver configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            skeletons: BTreeMap::new(),
            next_id: SKELETON_BASE_UNIQUE_ID,
            config: SkeletonSolverConfig::default(),
        }
    }

    /// Empty manager whose skeletons start with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SkeletonError::InvalidConfig`] if the configuration is invalid.
    pub fn with_config(config: SkeletonSolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Configuration given to new skeletons.
    #[must_use]
    pub fn config(&self) -> &SkeletonSolverConfig {
        &self.config
    }

    /// Create a skeleton rooted at `root` under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is unknown or already in a skeleton. No id
    /// is consumed on error.
    pub fn create_skeleton(
        &mut self,
        topology: &mut Topology,
        root: BodyId,
    ) -> Result<SkeletonId> {
        let mut raw = self.next_id;
        while self.skeletons.contains_key(&SkeletonId::new(raw)) {
            raw = raw.wrapping_add(1).max(SKELETON_BASE_UNIQUE_ID);
        }
        let id = SkeletonId::new(raw);

        let mut skeleton = SkeletonContainer::new(id, topology, root)?;
        skeleton.config = self.config;
        self.skeletons.insert(id, skeleton);
        self.next_id = raw.wrapping_add(1).max(SKELETON_BASE_UNIQUE_ID);
        debug!(skeleton = %id, %root, "skeleton created");
        Ok(id)
    }

    /// Detach and drop a skeleton. Returns whether it existed.
    pub fn destroy_skeleton(&mut self, topology: &mut Topology, id: SkeletonId) -> bool {
        let Some(skeleton) = self.skeletons.remove(&id) else {
            return false;
        };
        skeleton.detach(topology);
        debug!(skeleton = %id, "skeleton destroyed");
        true
    }

    /// Look up a skeleton.
    #[must_use]
    pub fn get(&self, id: SkeletonId) -> Option<&SkeletonContainer> {
        self.skeletons.get(&id)
    }

    /// Look up a skeleton for editing.
    pub fn get_mut(&mut self, id: SkeletonId) -> Option<&mut SkeletonContainer> {
        self.skeletons.get_mut(&id)
    }

    /// Number of live skeletons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skeletons.len()
    }

    /// Whether no skeleton is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skeletons.is_empty()
    }

    /// Skeletons in id order.
    pub fn iter(&self) -> impl Iterator<Item = (SkeletonId, &SkeletonContainer)> + '_ {
        self.skeletons.iter().map(|(&id, skeleton)| (id, skeleton))
    }

    /// Id the next [`Self::create_skeleton`] will try first.
    #[must_use]
    pub fn next_unique_id(&self) -> SkeletonId {
        SkeletonId::new(self.next_id)
    }

    /// Restart id allocation at [`SKELETON_BASE_UNIQUE_ID`]. Ids still in
    /// use are skipped.
    pub fn reset_unique_id(&mut self) {
        self.next_id = SKELETON_BASE_UNIQUE_ID;
    }

    /// One scratch per skeleton, sized for this step's rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a skeleton's joints are missing from `joints` or
    /// their rows run past `rows`.
    pub fn make_scratch_pool(
        &self,
        joints: &[JointInfo],
        rows: &[ConstraintRow],
    ) -> Result<ScratchPool> {
        self.skeletons
            .iter()
            .map(|(&id, skeleton)| {
                let layout = skeleton.scratch_layout(joints, rows)?;
                Ok((id, StepScratch::with_layout(&layout)))
            })
            .collect()
    }

    /// Factorize every finalized skeleton into its scratch in `pool`.
    ///
    /// Missing scratches are created; scratches of destroyed skeletons are
    /// dropped. Skeletons that are not finalized are skipped and their
    /// scratch left uninitialized.
    ///
    /// When the `parallel` feature is enabled, skeletons are factorized in
    /// parallel via rayon `par_iter_mut`.
    ///
    /// # Errors
    ///
    /// Returns the first factorization error encountered.
    pub fn init_mass_matrices(
        &self,
        joints: &[JointInfo],
        rows: &[ConstraintRow],
        bodies: &[BodyInfo],
        pool: &mut ScratchPool,
    ) -> Result<()> {
        pool.retain(|id, _| self.skeletons.contains_key(id));
        for &id in self.skeletons.keys() {
            pool.entry(id).or_default();
        }

        let skeletons = &self.skeletons;
        let init = |(id, scratch): (&SkeletonId, &mut StepScratch)| -> Result<()> {
            match skeletons.get(id) {
                Some(skeleton) if skeleton.is_finalized() => {
                    skeleton.init_mass_matrix(joints, rows, bodies, scratch)
                }
                _ => {
                    scratch.invalidate();
                    Ok(())
                }
            }
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};
            pool.par_iter_mut().try_for_each(init)
        }

        #[cfg(not(feature = "parallel"))]
        {
            pool.iter_mut().try_for_each(init)
        }
    }

    /// Solve and apply joint forces for every initialized skeleton, in id
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first solve error. Skeletons solved before it keep their
    /// applied forces.
    pub fn calculate_joint_forces(
        &self,
        joints: &[JointInfo],
        bodies: &[BodyInfo],
        forces: &mut [BodyForce],
        rows: &mut [ConstraintRow],
        pool: &mut ScratchPool,
    ) -> Result<Vec<(SkeletonId, JointForceReport)>> {
        let mut reports = Vec::with_capacity(self.skeletons.len());
        for (&id, skeleton) in &self.skeletons {
            let Some(scratch) = pool.get_mut(&id) else {
                return Err(SkeletonError::ScratchNotInitialized);
            };
            if !scratch.is_initialized() {
                continue;
            }
            let report = skeleton.calculate_joint_force(joints, bodies, forces, rows, scratch)?;
            reports.push((id, report));
        }
        Ok(reports)
    }
}
