//! Joint and constraint-row types shared with the outer constraint solver.
//!
//! A bilateral joint between `body0` and `body1` contributes a contiguous
//! range of scalar [`ConstraintRow`]s to the global row array. Each row
//! carries its Jacobian pair, force bounds, damping and target acceleration,
//! and accumulates the force solved for it across iterations and steps.

use std::ops::Range;

use nalgebra::Vector3;

use crate::body::{BodyForce, BodyId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Force magnitude at or beyond which a bound counts as unbounded.
pub const UNBOUNDED_FORCE: f64 = 1.0e10;

/// Unique identifier for a joint in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointId(pub u64);

impl JointId {
    /// Create a new joint ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Slot of this joint in per-joint arrays.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // joint counts fit in usize
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for JointId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Joint({})", self.0)
    }
}

/// Unique identifier for a skeleton container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkeletonId(pub u32);

impl SkeletonId {
    /// Create a new skeleton ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SkeletonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Skeleton({})", self.0)
    }
}

/// One body's half of a constraint row Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Jacobian {
    /// Linear part (multiplies linear velocity / force).
    pub linear: Vector3<f64>,
    /// Angular part (multiplies angular velocity / torque).
    pub angular: Vector3<f64>,
}

impl Jacobian {
    /// Create a Jacobian half.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// A zero Jacobian half.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }

    /// Pure linear Jacobian.
    #[must_use]
    pub fn linear(direction: Vector3<f64>) -> Self {
        Self {
            linear: direction,
            angular: Vector3::zeros(),
        }
    }

    /// Pure angular Jacobian.
    #[must_use]
    pub fn angular(axis: Vector3<f64>) -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: axis,
        }
    }

    /// Dot product with another Jacobian half.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.linear.dot(&other.linear) + self.angular.dot(&other.angular)
    }

    /// Project an accumulated body force onto this Jacobian half.
    #[must_use]
    pub fn dot_force(&self, force: &BodyForce) -> f64 {
        self.linear.dot(&force.linear) + self.angular.dot(&force.angular)
    }

    /// Negated Jacobian half.
    #[must_use]
    pub fn negated(&self) -> Self {
        Self {
            linear: -self.linear,
            angular: -self.angular,
        }
    }
}

/// Jacobian halves for the two bodies a row connects.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JacobianPair {
    /// Half acting on the joint's `body0`.
    pub body0: Jacobian,
    /// Half acting on the joint's `body1`.
    pub body1: Jacobian,
}

impl JacobianPair {
    /// Create a Jacobian pair.
    #[must_use]
    pub const fn new(body0: Jacobian, body1: Jacobian) -> Self {
        Self { body0, body1 }
    }
}

/// One scalar degree of constraint of a joint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintRow {
    /// Jacobian halves for the joint's two bodies.
    pub jacobian: JacobianPair,
    /// Accumulated constraint force.
    pub force: f64,
    /// Lowest force this row may apply.
    pub lower_bound: f64,
    /// Highest force this row may apply.
    pub upper_bound: f64,
    /// Diagonal regularization added to the row's effective mass (≥ 0).
    pub diag_damp: f64,
    /// Target relative acceleration along the row.
    pub coordinate_accel: f64,
}

impl ConstraintRow {
    /// An unbounded bilateral row with no damping and zero target.
    #[must_use]
    pub fn bilateral(jacobian: JacobianPair) -> Self {
        Self {
            jacobian,
            force: 0.0,
            lower_bound: f64::NEG_INFINITY,
            upper_bound: f64::INFINITY,
            diag_damp: 0.0,
            coordinate_accel: 0.0,
        }
    }

    /// Set the force bounds.
    #[must_use]
    pub const fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    /// Set the diagonal damping term.
    #[must_use]
    pub const fn with_damping(mut self, diag_damp: f64) -> Self {
        self.diag_damp = diag_damp;
        self
    }

    /// Set the target relative acceleration.
    #[must_use]
    pub const fn with_coordinate_accel(mut self, accel: f64) -> Self {
        self.coordinate_accel = accel;
        self
    }

    /// Set the accumulated force.
    #[must_use]
    pub const fn with_force(mut self, force: f64) -> Self {
        self.force = force;
        self
    }

    /// True for a pure bilateral row (both bounds at infinity).
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.lower_bound <= -UNBOUNDED_FORCE && self.upper_bound >= UNBOUNDED_FORCE
    }

    /// Bounds on the force still available to this row, relative to its
    /// accumulated force.
    #[must_use]
    pub fn remaining_bounds(&self) -> (f64, f64) {
        (
            self.lower_bound - self.force,
            self.upper_bound - self.force,
        )
    }
}

/// Per-step description of one joint's rows in the global row array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointInfo {
    /// The joint this entry describes.
    pub joint: JointId,
    /// Body the rows' `body0` Jacobian half acts on.
    pub body0: BodyId,
    /// Body the rows' `body1` Jacobian half acts on.
    pub body1: BodyId,
    /// Index of the joint's first row.
    pub row_start: usize,
    /// Number of rows the joint contributes this step.
    pub row_count: usize,
}

impl JointInfo {
    /// Describe `row_count` rows starting at `row_start`.
    #[must_use]
    pub const fn new(
        joint: JointId,
        body0: BodyId,
        body1: BodyId,
        row_start: usize,
        row_count: usize,
    ) -> Self {
        Self {
            joint,
            body0,
            body1,
            row_start,
            row_count,
        }
    }

    /// Range of this joint's rows in the global row array.
    #[must_use]
    pub const fn rows(&self) -> Range<usize> {
        self.row_start..self.row_start + self.row_count
    }

    /// True if the joint touches `body`.
    #[must_use]
    pub fn connects(&self, body: BodyId) -> bool {
        self.body0 == body || self.body1 == body
    }
}
