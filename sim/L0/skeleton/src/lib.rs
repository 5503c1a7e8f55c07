//! Articulated-body skeleton solver.
//!
//! A skeleton is a tree of bodies connected by bilateral joints. Each step,
//! the outer constraint solver hands it the joints' Jacobian rows; the
//! skeleton solves all of them together in linear time by eliminating the
//! tree from the leaves up, instead of iterating row by row.
//!
//! - [`SkeletonContainer`] - builds the tree, then factorizes and solves it
//! - [`SkeletonManager`] - owns skeletons, hands out ids, steps them all
//! - [`Topology`] - registry of bodies, joints and their skeleton owners
//! - [`StepScratch`] - caller-owned per-step buffers
//! - [`solve_box_lcp`] - box-bounded LCP used for limits and loops
//!
//! # Rows
//!
//! Unbounded tree rows are *primary* and eliminated by the tree sweeps.
//! Bounded tree rows and the rows of cycling joints (joints that close a
//! loop) are *auxiliary* and solved through a Schur complement as a box
//! LCP. A skeleton whose rows are all primary never touches the LCP.
//!
//! # Example
//!
//! ```
//! use sim_skeleton::{
//!     BodyForce, BodyInfo, ConstraintRow, Jacobian, JacobianPair, Matrix3, SkeletonManager,
//!     Topology, Vector3,
//! };
//!
//! // A link hinged about z to the static ground.
//! let mut topology = Topology::new();
//! let ground = topology.add_body();
//! let link = topology.add_body();
//! let hinge = topology.add_joint(link, ground).unwrap();
//!
//! let mut manager = SkeletonManager::new();
//! let id = manager.create_skeleton(&mut topology, ground).unwrap();
//! let skeleton = manager.get_mut(id).unwrap();
//! skeleton.add_child(&mut topology, link, None).unwrap();
//! skeleton.finalize(&mut topology);
//!
//! let joints = vec![topology.joint_info(hinge, 0, 1).unwrap()];
//! let mut rows = vec![ConstraintRow::bilateral(JacobianPair::new(
//!     Jacobian::angular(Vector3::z()),
//!     Jacobian::angular(-Vector3::z()),
//! ))];
//! let bodies = vec![
//!     BodyInfo::fixed(),
//!     BodyInfo::dynamic(1.0, Matrix3::identity()).unwrap(),
//! ];
//! let mut forces = vec![
//!     BodyForce::zero(),
//!     BodyForce::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 2.0)),
//! ];
//!
//! let mut pool = manager.make_scratch_pool(&joints, &rows).unwrap();
//! manager.init_mass_matrices(&joints, &rows, &bodies, &mut pool).unwrap();
//! manager
//!     .calculate_joint_forces(&joints, &bodies, &mut forces, &mut rows, &mut pool)
//!     .unwrap();
//!
//! // The hinge cancels the applied torque.
//! assert!((rows[0].force + 2.0).abs() < 1e-10);
//! assert!(forces[1].angular.z.abs() < 1e-10);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-skeleton/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,       // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,           // mul_add style changes aren't always clearer
    clippy::neg_cmp_op_on_partial_ord,  // !(x > 0.0) is intentional for NaN rejection
    clippy::needless_range_loop,        // Block math reads better with explicit indices
    clippy::cast_precision_loss,        // usize to f64 is fine for counts
    clippy::doc_markdown,               // Not all technical terms need backticks
)]

mod auxiliary;
mod brute_force;
mod config;
mod container;
mod error;
mod factor;
mod graph;
mod manager;
mod scratch;
mod solve;
mod topology;

// Dense and block linear algebra (guarded Cholesky, box LCP, 6×6 blocks)
pub mod lcp;
pub mod linalg;
pub mod spatial;

pub use config::{SkeletonSolverConfig, SolveMode};
pub use container::{DestructorCallback, SkeletonContainer};
pub use error::{Result, SkeletonError};
pub use graph::{Children, GraphNode, MAX_SKELETON_NODES, NodeId};
pub use lcp::{LcpSolution, solve_box_lcp};
pub use manager::{SKELETON_BASE_UNIQUE_ID, ScratchPool, SkeletonManager};
pub use scratch::{ScratchLayout, StepScratch};
pub use solve::{JointForceReport, SolvePath};
pub use topology::Topology;

// Re-export the shared records so callers need a single import
pub use sim_types::{
    BodyForce, BodyId, BodyInfo, ConstraintRow, Jacobian, JacobianPair, JointId, JointInfo,
    MassProperties, Matrix3, SimError, SkeletonId, UNBOUNDED_FORCE, UnitQuaternion, Vector3,
};
