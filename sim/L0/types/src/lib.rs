//! Shared records for articulated-body constraint solving.
//!
//! This crate holds the pure data exchanged between the outer constraint
//! solver and the skeleton solver:
//!
//! - [`BodyInfo`] / [`BodyForce`] - per-step body mass records and force accumulators
//! - [`ConstraintRow`] - one scalar degree of constraint with bounds and damping
//! - [`JointInfo`] - where a joint's rows live in the global row array
//! - [`BodyId`], [`JointId`], [`SkeletonId`] - copyable identifiers
//!
//! # Layer 0
//!
//! Like the rest of `sim/L0`, this crate has no rendering dependencies and no
//! behaviour beyond small helpers on the records themselves.
//!
//! # Example
//!
//! ```
//! use sim_types::{ConstraintRow, Jacobian, JacobianPair, Vector3};
//!
//! let row = ConstraintRow::bilateral(JacobianPair::new(
//!     Jacobian::angular(Vector3::z()),
//!     Jacobian::angular(-Vector3::z()),
//! ));
//! assert!(row.is_unbounded());
//!
//! let limit = row.with_bounds(-1.0, 1.0);
//! assert!(!limit.is_unbounded());
//! ```

#![doc(html_root_url = "https://docs.rs/sim-types/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::cast_precision_loss,       // usize to f64 is fine for counts
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod error;
mod joint;

pub use body::{BodyForce, BodyId, BodyInfo, MassProperties};
pub use error::SimError;
pub use joint::{
    ConstraintRow, Jacobian, JacobianPair, JointId, JointInfo, SkeletonId, UNBOUNDED_FORCE,
};

// Re-export math types for convenience
pub use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Result type for simulation record operations.
pub type Result<T> = std::result::Result<T, SimError>;
