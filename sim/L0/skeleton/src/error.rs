//! Error types for skeleton construction and solving.

use sim_types::{BodyId, JointId, SimError, SkeletonId};
use thiserror::Error;

/// Errors raised by skeleton containers and the skeleton manager.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SkeletonError {
    /// The body already belongs to a skeleton.
    #[error("{body} already belongs to {skeleton}")]
    BodyAlreadyInSkeleton {
        /// The offending body.
        body: BodyId,
        /// The skeleton that owns it.
        skeleton: SkeletonId,
    },

    /// No bilateral joint connects the body to its requested parent.
    #[error("no bilateral joint connects {body} to {parent}")]
    NoConnectingJoint {
        /// The child body.
        body: BodyId,
        /// The requested parent body.
        parent: BodyId,
    },

    /// The requested parent body is not part of this skeleton.
    #[error("parent {0} is not part of the skeleton")]
    ParentNotInSkeleton(BodyId),

    /// The connecting joint points from parent to child below the root.
    #[error("{joint} is reversed and its parent is not the root")]
    ReversedJoint {
        /// The reversed joint.
        joint: JointId,
    },

    /// Topology edits are rejected once the skeleton is finalized.
    #[error("skeleton is already finalized")]
    AlreadyFinalized,

    /// Solving requires a finalized skeleton.
    #[error("skeleton is not finalized")]
    NotFinalized,

    /// The joint is already a parent joint of this tree.
    #[error("{0} is already a tree joint")]
    JointAlreadyInTree(JointId),

    /// A tree joint contributes more rows than a node can hold.
    #[error("{joint} has {rows} rows, at most 6 are supported")]
    TooManyRows {
        /// The joint.
        joint: JointId,
        /// Row count supplied for it.
        rows: usize,
    },

    /// The skeleton is at its node capacity.
    #[error("skeleton node limit of {max} reached")]
    TooManyNodes {
        /// Maximum number of nodes.
        max: usize,
    },

    /// The scratch buffers were filled for a different skeleton or layout.
    #[error("scratch belongs to {found:?}, expected {expected}")]
    ScratchMismatch {
        /// The skeleton being solved.
        expected: SkeletonId,
        /// The skeleton the scratch was filled for.
        found: Option<SkeletonId>,
    },

    /// The scratch buffers have not been filled this step.
    #[error("scratch has not been initialized by init_mass_matrix")]
    ScratchNotInitialized,

    /// Invalid solver configuration.
    #[error("invalid skeleton solver configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Error from the shared simulation records.
    #[error(transparent)]
    Sim(#[from] SimError),
}

impl SkeletonError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for skeleton operations.
pub type Result<T> = std::result::Result<T, SkeletonError>;
