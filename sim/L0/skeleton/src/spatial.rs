//! Spatial algebra for per-node mass and joint blocks.
//!
//! Spatial quantities here put the linear part first:
//! - Vectors: `[linear (3), angular (3)]`
//! - Body blocks: `diag(m·I₃, I_world)`
//!
//! Functions are pure math with no solver state.

use nalgebra::{Matrix6, Vector6};
use sim_types::{BodyInfo, Jacobian};

/// 6D spatial vector: `[linear (3), angular (3)]`.
pub type SpatialVector = Vector6<f64>;

/// 6×6 spatial block.
pub type SpatialMatrix = Matrix6<f64>;

/// Pack one body's Jacobian half into a spatial row.
#[inline]
#[must_use]
pub fn jacobian_to_spatial(jacobian: &Jacobian) -> SpatialVector {
    let l = jacobian.linear;
    let a = jacobian.angular;
    SpatialVector::new(l.x, l.y, l.z, a.x, a.y, a.z)
}

/// Build a body's 6×6 mass block.
///
/// Mass on the top-left diagonal, world inertia bottom-right, zero coupling.
/// Static bodies get an all-zero block.
#[must_use]
pub fn body_mass_block(body: &BodyInfo) -> SpatialMatrix {
    let mut block = SpatialMatrix::zeros();
    if body.is_static() {
        return block;
    }
    for i in 0..3 {
        block[(i, i)] = body.mass;
    }
    block
        .fixed_view_mut::<3, 3>(3, 3)
        .copy_from(&body.inertia);
    block
}

/// Add `Σₖ aₖ·bₖᵀ` over the first `count` row pairs to `block`.
///
/// With `b = S⁻¹·a` this accumulates `aᵀ S⁻¹ a`, the elimination of a
/// child's joint forces expressed in its parent's coordinates.
pub fn add_outer_products(
    block: &mut SpatialMatrix,
    a: &[SpatialVector],
    b: &[SpatialVector],
    count: usize,
) {
    for (ak, bk) in a.iter().zip(b).take(count) {
        *block += ak * bk.transpose();
    }
}

/// Force exact symmetry of the leading `n×n` block by averaging.
pub fn symmetrize(block: &mut SpatialMatrix, n: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (block[(i, j)] + block[(j, i)]);
            block[(i, j)] = v;
            block[(j, i)] = v;
        }
    }
}

/// Check symmetry of a square block within `tolerance`.
#[must_use]
pub fn is_symmetric(block: &SpatialMatrix, tolerance: f64) -> bool {
    (0..6).all(|i| (0..i).all(|j| (block[(i, j)] - block[(j, i)]).abs() <= tolerance))
}
