//! Scene builders and checks shared by the integration tests.

#![allow(dead_code)]

use sim_skeleton::{
    BodyForce, BodyId, BodyInfo, ConstraintRow, Jacobian, JacobianPair, JointForceReport,
    JointId, JointInfo, MassProperties, SkeletonContainer, SkeletonId, StepScratch, Topology,
    UnitQuaternion, Vector3,
};

pub const GRAVITY: f64 = 9.81;

/// Bodies, joints and rows registered together so that joint ids, body ids
/// and row ranges stay aligned with the slices the solver reads.
#[derive(Debug, Default)]
pub struct Scene {
    pub topology: Topology,
    pub joints: Vec<JointInfo>,
    pub rows: Vec<ConstraintRow>,
    pub bodies: Vec<BodyInfo>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&mut self, info: BodyInfo) -> BodyId {
        self.bodies.push(info);
        self.topology.add_body()
    }

    pub fn ground(&mut self) -> BodyId {
        self.body(BodyInfo::fixed())
    }

    /// Unit-length box link along the body y axis.
    pub fn link(&mut self, mass: f64) -> BodyId {
        self.oriented_link(mass, UnitQuaternion::identity())
    }

    pub fn oriented_link(&mut self, mass: f64, rotation: UnitQuaternion<f64>) -> BodyId {
        let props = MassProperties::box_shape(mass, Vector3::new(0.1, 0.5, 0.1));
        let info = BodyInfo::from_mass_properties(&props, &rotation).expect("valid link");
        self.body(info)
    }

    /// Register a joint oriented child to parent with the given rows.
    pub fn joint(&mut self, child: BodyId, parent: BodyId, rows: Vec<ConstraintRow>) -> JointId {
        let joint = self
            .topology
            .add_joint(child, parent)
            .expect("both bodies registered");
        let info = self
            .topology
            .joint_info(joint, self.rows.len(), rows.len())
            .expect("joint registered");
        self.joints.push(info);
        self.rows.extend(rows);
        joint
    }

    /// Skeleton rooted at `root` with `(child, parent)` edges added in order.
    pub fn skeleton(&mut self, root: BodyId, edges: &[(BodyId, BodyId)]) -> SkeletonContainer {
        let mut skeleton = SkeletonContainer::new(SkeletonId::new(10), &mut self.topology, root)
            .expect("root is free");
        for &(child, parent) in edges {
            skeleton
                .add_child(&mut self.topology, child, Some(parent))
                .expect("edge is valid");
        }
        skeleton
    }

    /// Gravity along −y on every dynamic body.
    pub fn gravity(&self) -> Vec<BodyForce> {
        self.bodies
            .iter()
            .map(|b| BodyForce::new(Vector3::new(0.0, -GRAVITY * b.mass, 0.0), Vector3::zeros()))
            .collect()
    }
}

/// Three linear rows pinning `anchor` on the child to the same point on the
/// parent.
pub fn ball_rows(
    anchor: Vector3<f64>,
    child: Vector3<f64>,
    parent: Vector3<f64>,
) -> Vec<ConstraintRow> {
    let rc = anchor - child;
    let rp = anchor - parent;
    [Vector3::x(), Vector3::y(), Vector3::z()]
        .into_iter()
        .map(|e| {
            ConstraintRow::bilateral(JacobianPair::new(
                Jacobian::new(e, rc.cross(&e)),
                Jacobian::new(-e, -rp.cross(&e)),
            ))
        })
        .collect()
}

/// Ball rows plus two angular rows leaving rotation about z free.
pub fn hinge_z_rows(
    anchor: Vector3<f64>,
    child: Vector3<f64>,
    parent: Vector3<f64>,
) -> Vec<ConstraintRow> {
    let mut rows = ball_rows(anchor, child, parent);
    for axis in [Vector3::x(), Vector3::y()] {
        rows.push(ConstraintRow::bilateral(JacobianPair::new(
            Jacobian::angular(axis),
            Jacobian::angular(-axis),
        )));
    }
    rows
}

/// Angular row about z, for limits and motors.
pub fn twist_z_row() -> ConstraintRow {
    ConstraintRow::bilateral(JacobianPair::new(
        Jacobian::angular(Vector3::z()),
        Jacobian::angular(-Vector3::z()),
    ))
}

/// Result of one block-sparse solve and one dense solve from the same state.
pub struct Comparison {
    pub report: JointForceReport,
    pub rows: Vec<ConstraintRow>,
    pub forces: Vec<BodyForce>,
    pub dense_rows: Vec<ConstraintRow>,
    pub dense_forces: Vec<BodyForce>,
}

pub fn solve_both(
    skeleton: &SkeletonContainer,
    scene: &Scene,
    forces: &[BodyForce],
) -> Comparison {
    let mut scratch = StepScratch::new();
    skeleton
        .init_mass_matrix(&scene.joints, &scene.rows, &scene.bodies, &mut scratch)
        .expect("factorization");

    let mut rows = scene.rows.clone();
    let mut solved = forces.to_vec();
    let report = skeleton
        .calculate_joint_force(&scene.joints, &scene.bodies, &mut solved, &mut rows, &mut scratch)
        .expect("block solve");

    let mut dense_rows = scene.rows.clone();
    let mut dense_forces = forces.to_vec();
    skeleton
        .brute_force_solve(
            &scene.joints,
            &scene.bodies,
            &mut dense_forces,
            &mut dense_rows,
            &scratch,
        )
        .expect("dense solve");

    Comparison {
        report,
        rows,
        forces: solved,
        dense_rows,
        dense_forces,
    }
}

/// Per-row residual `J·M⁻¹·y − a_target + D·Δf` after a solve.
pub fn row_residuals(
    scene: &Scene,
    rows: &[ConstraintRow],
    forces: &[BodyForce],
) -> Vec<f64> {
    let mut residuals = vec![0.0; rows.len()];
    for info in &scene.joints {
        let (b0, b1) = (info.body0.index(), info.body1.index());
        for r in info.rows() {
            let row = &rows[r];
            let accel = scene.bodies[b0]
                .jacobian_times_inv_mass(&row.jacobian.body0)
                .dot_force(&forces[b0])
                + scene.bodies[b1]
                    .jacobian_times_inv_mass(&row.jacobian.body1)
                    .dot_force(&forces[b1]);
            let increment = row.force - scene.rows[r].force;
            residuals[r] = accel - row.coordinate_accel + row.diag_damp * increment;
        }
    }
    residuals
}

/// Check the box complementarity conditions on every row.
pub fn assert_complementary(scene: &Scene, rows: &[ConstraintRow], forces: &[BodyForce]) {
    let tol = 1e-7;
    for (r, w) in row_residuals(scene, rows, forces).into_iter().enumerate() {
        let row = &rows[r];
        assert!(
            row.force >= row.lower_bound - tol && row.force <= row.upper_bound + tol,
            "row {r} force {} outside [{}, {}]",
            row.force,
            row.lower_bound,
            row.upper_bound
        );
        if (row.force - row.lower_bound).abs() < tol {
            assert!(w >= -tol, "row {r} at lower bound with residual {w}");
        } else if (row.force - row.upper_bound).abs() < tol {
            assert!(w <= tol, "row {r} at upper bound with residual {w}");
        } else {
            assert!(w.abs() < tol, "row {r} interior with residual {w}");
        }
    }
}
