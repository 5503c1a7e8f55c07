//! Skeleton lifecycle: finalization, scratch ownership and the manager.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use common::{ball_rows, hinge_z_rows, twist_z_row, Scene, GRAVITY};
use sim_skeleton::{
    BodyForce, BodyInfo, Matrix3, SkeletonError, SkeletonManager, SkeletonSolverConfig,
    SolveMode, SolvePath, StepScratch, Vector3, SKELETON_BASE_UNIQUE_ID,
};

#[test]
fn finalize_twice_keeps_order() {
    let mut scene = Scene::new();
    let ground = scene.ground();
    let a = scene.link(1.0);
    let b = scene.link(1.0);
    let c = scene.link(1.0);
    scene.joint(a, ground, vec![twist_z_row()]);
    scene.joint(b, a, vec![twist_z_row()]);
    scene.joint(c, ground, vec![twist_z_row()]);
    let mut skeleton = scene.skeleton(ground, &[(a, ground), (b, a), (c, ground)]);

    skeleton.finalize(&mut scene.topology);
    let first = skeleton.nodes_in_order().to_vec();
    skeleton.finalize(&mut scene.topology);
    assert_eq!(skeleton.nodes_in_order(), first.as_slice());

    // Root last, every child before its parent.
    assert_eq!(first.last(), Some(&skeleton.root()));
    for (i, &node) in first.iter().enumerate() {
        if let Some(parent) = skeleton.parent(node) {
            assert!(skeleton.node_index(parent).unwrap() > i);
        }
    }

    let d = scene.link(1.0);
    scene.joint(d, c, vec![twist_z_row()]);
    assert_eq!(
        skeleton.add_child(&mut scene.topology, d, Some(c)),
        Err(SkeletonError::AlreadyFinalized)
    );
}

#[test]
fn scratch_belongs_to_one_skeleton() {
    let mut scene = Scene::new();
    let ground_a = scene.ground();
    let link_a = scene.link(1.0);
    let ground_b = scene.ground();
    let link_b = scene.link(1.0);
    scene.joint(link_a, ground_a, vec![twist_z_row()]);
    scene.joint(link_b, ground_b, vec![twist_z_row()]);

    let mut manager = SkeletonManager::new();
    let mut ids = Vec::new();
    for (ground, link) in [(ground_a, link_a), (ground_b, link_b)] {
        let id = manager.create_skeleton(&mut scene.topology, ground).unwrap();
        let skeleton = manager.get_mut(id).unwrap();
        skeleton.add_child(&mut scene.topology, link, None).unwrap();
        skeleton.finalize(&mut scene.topology);
        ids.push(id);
    }
    let (a, b) = (manager.get(ids[0]).unwrap(), manager.get(ids[1]).unwrap());
    let (joints, bodies) = (&scene.joints, &scene.bodies);

    let mut scratch = StepScratch::new();
    let mut rows = scene.rows.clone();
    let mut forces = vec![BodyForce::zero(); scene.bodies.len()];
    assert_eq!(
        a.calculate_joint_force(joints, bodies, &mut forces, &mut rows, &mut scratch),
        Err(SkeletonError::ScratchNotInitialized)
    );

    a.init_mass_matrix(joints, &scene.rows, bodies, &mut scratch).unwrap();
    assert_eq!(scratch.owner(), Some(ids[0]));
    assert_eq!(
        b.calculate_joint_force(joints, bodies, &mut forces, &mut rows, &mut scratch),
        Err(SkeletonError::ScratchMismatch {
            expected: ids[1],
            found: Some(ids[0]),
        })
    );

    scratch.invalidate();
    assert!(a
        .calculate_joint_force(joints, bodies, &mut forces, &mut rows, &mut scratch)
        .is_err());
}

#[test]
fn changed_row_layout_is_rejected() {
    let mut scene = Scene::new();
    let ground = scene.ground();
    let link = scene.link(1.0);
    scene.joint(link, ground, vec![twist_z_row()]);
    let mut skeleton = scene.skeleton(ground, &[(link, ground)]);
    skeleton.finalize(&mut scene.topology);

    let mut scratch = StepScratch::new();
    skeleton
        .init_mass_matrix(&scene.joints, &scene.rows, &scene.bodies, &mut scratch)
        .unwrap();

    // The joint gains a row after factorization.
    let mut rows = scene.rows.clone();
    rows.push(twist_z_row().with_bounds(-1.0, 1.0));
    let mut joints = scene.joints.clone();
    joints[0].row_count = 2;
    let mut forces = vec![BodyForce::zero(); 2];
    let bodies = &scene.bodies;
    let result = skeleton.calculate_joint_force(&joints, bodies, &mut forces, &mut rows, &mut scratch);
    assert!(matches!(result, Err(SkeletonError::ScratchMismatch { .. })));
}

#[test]
fn manager_steps_every_skeleton() {
    let mut scene = Scene::new();
    let mut manager = SkeletonManager::with_config(SkeletonSolverConfig::high_accuracy()).unwrap();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let ground = scene.ground();
        let link = scene.link(1.0);
        scene.joint(
            link,
            ground,
            ball_rows(Vector3::zeros(), Vector3::new(0.0, -1.0, 0.0), Vector3::zeros()),
        );
        let id = manager.create_skeleton(&mut scene.topology, ground).unwrap();
        let skeleton = manager.get_mut(id).unwrap();
        skeleton.add_child(&mut scene.topology, link, None).unwrap();
        skeleton.finalize(&mut scene.topology);
        ids.push(id);
    }
    assert_eq!(ids[0].raw(), SKELETON_BASE_UNIQUE_ID);

    let mut pool = manager.make_scratch_pool(&scene.joints, &scene.rows).unwrap();
    manager
        .init_mass_matrices(&scene.joints, &scene.rows, &scene.bodies, &mut pool)
        .unwrap();

    let mut rows = scene.rows.clone();
    let mut forces = scene.gravity();
    let reports = manager
        .calculate_joint_forces(&scene.joints, &scene.bodies, &mut forces, &mut rows, &mut pool)
        .unwrap();

    assert_eq!(reports.len(), 3);
    for (id, report) in &reports {
        assert!(ids.contains(id));
        assert_eq!(report.path, SolvePath::Direct);
    }
    for joint_rows in rows.chunks(3) {
        assert_relative_eq!(joint_rows[1].force, GRAVITY, epsilon = 1e-10);
    }

    // Destroyed skeletons lose their scratch on the next factorization.
    assert!(manager.destroy_skeleton(&mut scene.topology, ids[1]));
    manager
        .init_mass_matrices(&scene.joints, &scene.rows, &scene.bodies, &mut pool)
        .unwrap();
    assert_eq!(pool.len(), 2);
    assert!(!pool.contains_key(&ids[1]));
}

#[test]
fn unfinalized_skeletons_are_skipped() {
    let mut scene = Scene::new();
    let ground = scene.ground();
    let link = scene.link(1.0);
    scene.joint(link, ground, vec![twist_z_row()]);

    let mut manager = SkeletonManager::new();
    let id = manager.create_skeleton(&mut scene.topology, ground).unwrap();
    manager
        .get_mut(id)
        .unwrap()
        .add_child(&mut scene.topology, link, None)
        .unwrap();

    let mut pool = sim_skeleton::ScratchPool::new();
    manager
        .init_mass_matrices(&scene.joints, &scene.rows, &scene.bodies, &mut pool)
        .unwrap();
    assert!(!pool[&id].is_initialized());

    let mut rows = scene.rows.clone();
    let mut forces = vec![BodyForce::zero(); 2];
    let reports = manager
        .calculate_joint_forces(&scene.joints, &scene.bodies, &mut forces, &mut rows, &mut pool)
        .unwrap();
    assert!(reports.is_empty());
}

#[test]
fn brute_force_mode_matches_block_sparse() {
    let mut scene = Scene::new();
    let ground = scene.ground();
    let link = scene.body(BodyInfo::dynamic(1.0, Matrix3::identity() * 2.0).unwrap());
    scene.joint(link, ground, vec![twist_z_row().with_bounds(-1.0, 1.0)]);

    let config = SkeletonSolverConfig::default().with_solve_mode(SolveMode::BruteForce);
    let mut manager = SkeletonManager::with_config(config).unwrap();
    let id = manager.create_skeleton(&mut scene.topology, ground).unwrap();
    let skeleton = manager.get_mut(id).unwrap();
    skeleton.add_child(&mut scene.topology, link, None).unwrap();
    skeleton.finalize(&mut scene.topology);

    let mut pool = manager.make_scratch_pool(&scene.joints, &scene.rows).unwrap();
    manager
        .init_mass_matrices(&scene.joints, &scene.rows, &scene.bodies, &mut pool)
        .unwrap();
    let mut rows = scene.rows.clone();
    let mut forces = vec![
        BodyForce::zero(),
        BodyForce::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 5.0)),
    ];
    let reports = manager
        .calculate_joint_forces(&scene.joints, &scene.bodies, &mut forces, &mut rows, &mut pool)
        .unwrap();

    assert_eq!(reports[0].1.path, SolvePath::BruteForce);
    assert_relative_eq!(rows[0].force, -1.0, epsilon = 1e-10);
    assert_relative_eq!(forces[1].angular.z, 4.0, epsilon = 1e-10);
}

#[test]
fn solve_mode_may_change_after_factorization() {
    let mut scene = Scene::new();
    let ground = scene.ground();
    let upper = scene.link(2.0);
    let fore = scene.link(1.0);
    let upper_com = Vector3::new(0.0, -0.5, 0.0);
    let fore_com = Vector3::new(0.0, -1.5, 0.0);
    scene.joint(upper, ground, hinge_z_rows(Vector3::zeros(), upper_com, Vector3::zeros()));
    let mut elbow = hinge_z_rows(Vector3::new(0.0, -1.0, 0.0), fore_com, upper_com);
    elbow.push(twist_z_row().with_bounds(-0.5, 0.5));
    scene.joint(fore, upper, elbow);

    let mut skeleton = scene.skeleton(ground, &[(upper, ground), (fore, upper)]);
    skeleton.finalize(&mut scene.topology);
    let brute = SkeletonSolverConfig::default().with_solve_mode(SolveMode::BruteForce);
    skeleton.set_config(brute).unwrap();

    let mut scratch = StepScratch::new();
    skeleton
        .init_mass_matrix(&scene.joints, &scene.rows, &scene.bodies, &mut scratch)
        .unwrap();
    skeleton.set_config(SkeletonSolverConfig::default()).unwrap();

    let mut forces = scene.gravity();
    forces[2].angular.z += 3.0;
    let mut dense_forces = forces.clone();
    let mut rows = scene.rows.clone();
    let mut dense_rows = scene.rows.clone();

    let report = skeleton
        .calculate_joint_force(&scene.joints, &scene.bodies, &mut forces, &mut rows, &mut scratch)
        .unwrap();
    assert_eq!(report.path, SolvePath::Auxiliary);
    assert_eq!(report.auxiliary_rows, 1);

    skeleton
        .brute_force_solve(
            &scene.joints,
            &scene.bodies,
            &mut dense_forces,
            &mut dense_rows,
            &scratch,
        )
        .unwrap();
    for (block, dense) in rows.iter().zip(&dense_rows) {
        assert_relative_eq!(block.force, dense.force, epsilon = 1e-8, max_relative = 1e-8);
    }
    // The elbow torque exceeds the limit.
    assert_relative_eq!(rows[10].force.abs(), 0.5, epsilon = 1e-9);
}

#[test]
fn destroy_fires_destructor_once() {
    let mut scene = Scene::new();
    let ground = scene.ground();
    let mut manager = SkeletonManager::new();
    let id = manager.create_skeleton(&mut scene.topology, ground).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    manager
        .get_mut(id)
        .unwrap()
        .set_destructor_callback(move |skeleton| {
            assert_eq!(skeleton.id(), id);
            seen.fetch_add(1, Ordering::SeqCst);
        });

    assert!(manager.destroy_skeleton(&mut scene.topology, id));
    assert!(!manager.destroy_skeleton(&mut scene.topology, id));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(scene.topology.body_skeleton(ground), None);
}
