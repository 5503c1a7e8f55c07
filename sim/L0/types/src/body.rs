//! Rigid body records consumed by the skeleton solver.
//!
//! The solver never owns bodies. It reads a per-step [`BodyInfo`] slice for
//! mass properties and adds its solved joint forces into a [`BodyForce`]
//! slice, both indexed by [`BodyId::index`].

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::joint::Jacobian;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a rigid body in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub u64);

impl BodyId {
    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Slot of this body in per-body arrays.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // body counts fit in usize
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for BodyId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<usize> for BodyId {
    fn from(index: usize) -> Self {
        Self(index as u64)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({})", self.0)
    }
}

/// Body-frame mass and inertia of a link.
///
/// Turned into a per-step [`BodyInfo`] with [`BodyInfo::from_mass_properties`]
/// once the body's orientation is known.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Mass in kg. Infinite for an immovable body.
    pub mass: f64,
    /// Inertia about the centre of mass, body frame (kg·m²).
    pub inertia: Matrix3<f64>,
}

impl MassProperties {
    /// Mass and body-frame inertia.
    #[must_use]
    pub const fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        Self { mass, inertia }
    }

    /// An immovable body.
    #[must_use]
    pub fn fixed() -> Self {
        Self::new(f64::INFINITY, Matrix3::zeros())
    }

    /// Solid box of the given half extents, the usual shape of a limb link.
    #[must_use]
    pub fn box_shape(mass: f64, half_extents: Vector3<f64>) -> Self {
        let size_sq = (half_extents * 2.0).component_mul(&(half_extents * 2.0));
        let moments = Vector3::new(
            size_sq.y + size_sq.z,
            size_sq.x + size_sq.z,
            size_sq.x + size_sq.y,
        ) * (mass / 12.0);
        Self::new(mass, Matrix3::from_diagonal(&moments))
    }

    /// Whether this body never accelerates.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.mass.is_infinite()
    }

    /// Check that a dynamic body has positive finite mass and a symmetric
    /// positive definite inertia.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SimError::InvalidMassProperties`] describing the
    /// first violation found.
    pub fn validate(&self) -> crate::Result<()> {
        if self.is_static() {
            return Ok(());
        }
        if !(self.mass > 0.0 && self.mass.is_finite()) {
            return Err(crate::SimError::invalid_mass(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if (self.inertia - self.inertia.transpose()).amax() > 1e-10 {
            return Err(crate::SimError::invalid_mass("inertia must be symmetric"));
        }
        if self.inertia.symmetric_eigenvalues().min() <= 0.0 {
            return Err(crate::SimError::invalid_mass(
                "inertia must be positive definite",
            ));
        }
        Ok(())
    }
}

/// Per-step mass record of one body, expressed in world space.
///
/// A body with `inv_mass == 0` is static: it contributes a zero inverse
/// mass block and never accelerates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyInfo {
    /// Mass in kg (0 for static bodies).
    pub mass: f64,
    /// Inverse mass (0 for static bodies).
    pub inv_mass: f64,
    /// World-space inertia tensor.
    pub inertia: Matrix3<f64>,
    /// World-space inverse inertia tensor.
    pub inv_inertia: Matrix3<f64>,
}

impl BodyInfo {
    /// An immovable body.
    #[must_use]
    pub fn fixed() -> Self {
        Self {
            mass: 0.0,
            inv_mass: 0.0,
            inertia: Matrix3::zeros(),
            inv_inertia: Matrix3::zeros(),
        }
    }

    /// A dynamic body with world-space inertia `inertia`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mass is not positive and finite, or the
    /// inertia is singular.
    pub fn dynamic(mass: f64, inertia: Matrix3<f64>) -> crate::Result<Self> {
        if !(mass > 0.0 && mass.is_finite()) {
            return Err(crate::SimError::invalid_mass(format!(
                "dynamic body mass must be positive and finite, got {mass}"
            )));
        }
        let inv_inertia = inertia
            .try_inverse()
            .ok_or_else(|| crate::SimError::invalid_mass("inertia tensor is singular"))?;
        Ok(Self {
            mass,
            inv_mass: 1.0 / mass,
            inertia,
            inv_inertia,
        })
    }

    /// Build the world-space record from local mass properties and the
    /// body's current orientation.
    ///
    /// # Errors
    ///
    /// Returns an error if the mass properties fail validation.
    pub fn from_mass_properties(
        props: &MassProperties,
        rotation: &UnitQuaternion<f64>,
    ) -> crate::Result<Self> {
        props.validate()?;
        if props.is_static() {
            return Ok(Self::fixed());
        }
        let r = rotation.to_rotation_matrix();
        let world_inertia = r.matrix() * props.inertia * r.matrix().transpose();
        Self::dynamic(props.mass, world_inertia)
    }

    /// Check if this body is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.inv_mass == 0.0
    }

    /// Multiply one body's Jacobian half by this body's inverse mass.
    ///
    /// The result is the `J·M⁻¹` half used to turn accumulated forces into
    /// row accelerations.
    #[must_use]
    pub fn jacobian_times_inv_mass(&self, jacobian: &Jacobian) -> Jacobian {
        Jacobian {
            linear: jacobian.linear * self.inv_mass,
            angular: self.inv_inertia * jacobian.angular,
        }
    }
}

/// Accumulated linear force and torque acting on one body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyForce {
    /// Linear force in world frame.
    pub linear: Vector3<f64>,
    /// Torque in world frame.
    pub angular: Vector3<f64>,
}

impl BodyForce {
    /// Create a body force.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// No force.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }

    /// Add `Jᵀ·f` for one body's Jacobian half.
    pub fn add_scaled(&mut self, jacobian: &Jacobian, f: f64) {
        self.linear += jacobian.linear * f;
        self.angular += jacobian.angular * f;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_body_id() {
        let id = BodyId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.index(), 42);
        assert_eq!(id.to_string(), "Body(42)");

        let id2: BodyId = 42_u64.into();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_box_inertia() {
        let props = MassProperties::box_shape(12.0, Vector3::new(0.5, 1.0, 1.5));
        // (1/12)·m·(b² + c²) with full sizes 1, 2, 3.
        assert_relative_eq!(props.inertia[(0, 0)], 13.0, epsilon = 1e-12);
        assert_relative_eq!(props.inertia[(1, 1)], 10.0, epsilon = 1e-12);
        assert_relative_eq!(props.inertia[(2, 2)], 5.0, epsilon = 1e-12);
        assert!(!props.is_static());
    }

    #[test]
    fn test_mass_properties_validation() {
        assert!(MassProperties::box_shape(1.0, Vector3::repeat(0.1)).validate().is_ok());
        assert!(MassProperties::fixed().validate().is_ok());
        assert!(MassProperties::new(-1.0, Matrix3::identity()).validate().is_err());
        assert!(MassProperties::new(1.0, Matrix3::zeros()).validate().is_err());

        let mut skewed = Matrix3::identity();
        skewed[(0, 1)] = 0.5;
        assert!(MassProperties::new(1.0, skewed).validate().is_err());
    }

    #[test]
    fn test_body_info_dynamic_inverse() {
        let inertia = Matrix3::from_diagonal(&Vector3::new(1.0, 2.0, 4.0));
        let body = BodyInfo::dynamic(2.0, inertia).unwrap();
        assert_relative_eq!(body.inv_mass, 0.5, epsilon = 1e-12);
        assert_relative_eq!(body.inv_inertia[(2, 2)], 0.25, epsilon = 1e-12);
        assert!(!body.is_static());
        assert!(BodyInfo::dynamic(0.0, inertia).is_err());
        assert!(BodyInfo::dynamic(1.0, Matrix3::zeros()).is_err());
    }

    #[test]
    fn test_body_info_world_inertia() {
        let props = MassProperties::box_shape(12.0, Vector3::new(1.0, 0.5, 0.5));
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let body = BodyInfo::from_mass_properties(&props, &rotation).unwrap();

        // Rotating 90° about Z swaps the X and Y principal moments.
        assert_relative_eq!(body.inertia[(0, 0)], props.inertia[(1, 1)], epsilon = 1e-9);
        assert_relative_eq!(body.inertia[(1, 1)], props.inertia[(0, 0)], epsilon = 1e-9);

        let fixed = BodyInfo::from_mass_properties(&MassProperties::fixed(), &rotation).unwrap();
        assert!(fixed.is_static());
    }

    #[test]
    fn test_jacobian_times_inv_mass() {
        let body = BodyInfo::dynamic(4.0, Matrix3::identity() * 2.0).unwrap();
        let j = Jacobian::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0));
        let jm = body.jacobian_times_inv_mass(&j);
        assert_relative_eq!(jm.linear.x, 0.25, epsilon = 1e-12);
        assert_relative_eq!(jm.angular.z, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_body_force_accumulation() {
        let mut force = BodyForce::zero();
        let j = Jacobian::new(Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        force.add_scaled(&j, 3.0);
        force.add_scaled(&j, -1.0);
        assert_relative_eq!(force.linear.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(force.angular.x, 2.0, epsilon = 1e-12);
    }
}
