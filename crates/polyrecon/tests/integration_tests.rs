//! End-to-end reconstruction scenarios.
//!
//! Run with: cargo test -p polyrecon --test integration_tests

use std::sync::Arc;

use polyrecon::{
    ErrorCode, EventLog, PipelineController, PipelineEvent, PipelineState, Point, PointSet,
    ReconError, ReconstructionConfig, RefineParams, SolveStatus, Stage, Weights, io,
    validate_polygon_mesh,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Points on the six faces of an axis-aligned box, one label per face.
fn box_points(size: [f64; 3], n: usize) -> Vec<Point> {
    let [sx, sy, sz] = size;
    let mut points = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let a = i as f64 / (n - 1) as f64;
            let b = j as f64 / (n - 1) as f64;
            points.push(Point::labelled(0.0, a * sy, b * sz, 0));
            points.push(Point::labelled(sx, a * sy, b * sz, 1));
            points.push(Point::labelled(a * sx, 0.0, b * sz, 2));
            points.push(Point::labelled(a * sx, sy, b * sz, 3));
            points.push(Point::labelled(a * sx, b * sy, 0.0, 4));
            points.push(Point::labelled(a * sx, b * sy, sz, 5));
        }
    }
    points
}

fn unit_cube(n: usize) -> PointSet {
    PointSet::from_points(box_points([1.0, 1.0, 1.0], n))
}

/// A unit cube whose top is split into two segments at x = 0.5, both
/// jittered by +-0.002 in alternating rows.
fn cube_with_split_top(n: usize) -> PointSet {
    let mut points: Vec<Point> = box_points([1.0, 1.0, 1.0], n)
        .into_iter()
        .filter(|p| p.segment != Some(5))
        .collect();
    for i in 0..n {
        for j in 0..n {
            let a = i as f64 / (n - 1) as f64;
            let b = j as f64 / (n - 1) as f64;
            let z = if j % 2 == 0 { 1.002 } else { 0.998 };
            let label = if 2 * i < n { 5 } else { 6 };
            points.push(Point::labelled(a, b, z, label));
        }
    }
    PointSet::from_points(points)
}

/// Samples strictly inside `[u0, u1] x [v0, v1]` on an eighth-unit grid.
fn patch(u: (f64, f64), v: (f64, f64)) -> Vec<(f64, f64)> {
    let nu = ((u.1 - u.0) * 8.0).round() as usize;
    let nv = ((v.1 - v.0) * 8.0).round() as usize;
    (0..nu)
        .flat_map(|a| (0..nv).map(move |b| (a, b)))
        .map(|(a, b)| (u.0 + (a as f64 + 0.5) / 8.0, v.0 + (b as f64 + 0.5) / 8.0))
        .collect()
}

/// A staircase of `steps` unit steps, `width` deep along y, one label per
/// planar face: bottom 0, back 1, sides 2 and 3, treads from 4, risers after.
fn staircase(steps: usize, width: f64) -> PointSet {
    let k = steps as f64;
    let mut points = Vec::new();
    for (x, y) in patch((0.0, k), (0.0, width)) {
        points.push(Point::labelled(x, y, 0.0, 0));
    }
    for (z, y) in patch((0.0, k), (0.0, width)) {
        points.push(Point::labelled(k, y, z, 1));
    }
    for i in 0..steps {
        let s = i as f64;
        for (x, y) in patch((s, s + 1.0), (0.0, width)) {
            points.push(Point::labelled(x, y, s + 1.0, 4 + i));
        }
        for (z, y) in patch((s, s + 1.0), (0.0, width)) {
            points.push(Point::labelled(s, y, z, 4 + steps + i));
        }
        // Side profile: the unit cells under tread i.
        for j in 0..=i {
            for (du, dv) in [(0.25, 0.25), (0.25, 0.75), (0.75, 0.25), (0.75, 0.75)] {
                let (x, z) = (s + du, j as f64 + dv);
                points.push(Point::labelled(x, 0.0, z, 2));
                points.push(Point::labelled(x, width, z, 3));
            }
        }
    }
    PointSet::from_points(points)
}

fn scenario_config() -> ReconstructionConfig {
    let mut config = ReconstructionConfig::default();
    config.refine = RefineParams::new(5.0, 0.01);
    config.weights = Weights::new(1.0, 1.0, 0.1);
    config
}

// =============================================================================
// Cube Scenario
// =============================================================================

#[test]
fn test_cube_reconstructs_closed_box() {
    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(unit_cube(6));
    assert_eq!(controller.point_count(), 216);
    assert_eq!(controller.group_count(), 6);

    let refinement = controller.refine().unwrap();
    assert_eq!(refinement.merges, 0);
    assert_eq!(refinement.output_groups, 6);

    let candidates = controller.generate_hypothesis().unwrap();
    assert_eq!(candidates.face_count(), 6);
    for edge in &candidates.edges {
        assert_eq!(edge.faces.len(), 2);
    }

    let attributes = controller.compute_confidences().unwrap();
    for face in &attributes.faces {
        assert!(face.residual < 1e-12);
        assert!(face.support > 0);
    }

    let result = controller.optimize().unwrap();
    assert_eq!(result.status, SolveStatus::Optimal);
    assert_eq!(result.selected.len(), 6);

    assert_eq!(controller.state(), PipelineState::Optimized);
    assert_eq!(controller.optimized_face_count(), 6);
    assert_eq!(controller.optimized_planar_component_count(), 6);

    let report = controller.report().unwrap();
    assert!(report.is_closed());
    assert_eq!(report.boundary_edge_count, 0);
    assert!((report.surface_area - 6.0).abs() < 1e-9);
}

#[test]
fn test_elongated_box_reconstructs() {
    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(PointSet::from_points(box_points([4.0, 1.0, 2.0], 7)));
    controller.run_all().unwrap();

    let report = controller.report().unwrap();
    assert!(report.is_closed());
    assert!((report.surface_area - 2.0 * (4.0 + 8.0 + 2.0)).abs() < 1e-6);
}

#[test]
fn test_repeated_optimize_is_stable() {
    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(unit_cube(5));
    let first = controller.run_all().unwrap().selected.clone();
    let second = controller.optimize().unwrap().selected.clone();
    assert_eq!(first, second);
}

#[test]
fn test_staircase_solves_with_default_backend() {
    let (steps, width) = (10, 2.0);
    let set = staircase(steps, width);
    assert_eq!(set.groups.len(), 2 * steps + 4);

    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(set);
    let result = controller.run_all().unwrap();
    assert_eq!(result.status, SolveStatus::Optimal);
    assert!(controller.candidate_face_count() >= 300);

    let report = controller.report().unwrap();
    assert!(report.is_closed());
    assert_eq!(report.planar_component_count, 2 * steps + 4);
    let k = steps as f64;
    let expected_area = k * (k + 1.0) + 4.0 * k * width;
    assert!((report.surface_area - expected_area).abs() < 1e-6);
}

// =============================================================================
// Plane Refinement Scenario
// =============================================================================

#[test]
fn test_split_roof_merges_into_one_face() {
    let set = cube_with_split_top(5);
    assert_eq!(set.groups.len(), 7);

    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(set);

    let refinement = controller.refine().unwrap();
    assert_eq!(refinement.merges, 1);
    assert_eq!(refinement.output_groups, 6);
    let top = refinement
        .groups
        .iter()
        .find(|g| g.merged_from == vec![5, 6])
        .expect("merged roof group");
    assert_eq!(top.label, 5);
    assert_eq!(top.len(), 25);

    let candidates = controller.generate_hypothesis().unwrap();
    let roof = candidates
        .planes
        .iter()
        .position(|p| p.label == 5)
        .expect("roof plane");
    // One roof face: no seam between the former segments.
    assert_eq!(candidates.faces_on_plane(roof).count(), 1);

    controller.compute_confidences().unwrap();
    controller.optimize().unwrap();
    let report = controller.report().unwrap();
    assert!(report.is_watertight);
    assert_eq!(report.planar_component_count, 6);
}

// =============================================================================
// Stage Ordering
// =============================================================================

#[test]
fn test_optimize_before_confidences_is_rejected() {
    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(unit_cube(4));
    controller.refine().unwrap();
    controller.generate_hypothesis().unwrap();

    let err = controller.optimize().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Precondition);
    assert!(!err.is_fatal());
    assert!(matches!(
        err,
        ReconError::Precondition {
            operation: "optimize",
            ..
        }
    ));
    assert_eq!(controller.state(), PipelineState::HypothesisGenerated);
    assert_eq!(controller.candidate_face_count(), 6);
}

#[test]
fn test_stages_require_input() {
    let mut controller = PipelineController::new();
    for err in [
        controller.refine().map(|_| ()).unwrap_err(),
        controller.generate_hypothesis().map(|_| ()).unwrap_err(),
        controller.compute_confidences().map(|_| ()).unwrap_err(),
        controller.optimize().map(|_| ()).unwrap_err(),
    ] {
        assert_eq!(err.code(), ErrorCode::Precondition);
    }
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[test]
fn test_unsegmented_input_is_rejected() {
    let mut controller = PipelineController::new();
    let points = (0..10).map(|i| Point::new([i as f64, 0.0, 0.0].into())).collect();
    controller.load_point_set(PointSet::from_points(points));
    let err = controller.refine().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Precondition);
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[test]
fn test_event_log_records_every_stage() {
    let log = Arc::new(EventLog::new());
    let mut controller = PipelineController::with_config(scenario_config())
        .unwrap()
        .with_observer(Box::new(Arc::clone(&log)));
    controller.load_point_set(unit_cube(4));
    controller.run_all().unwrap();

    let finished: Vec<Stage> = log
        .stage_events()
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StageFinished { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        finished,
        vec![
            Stage::Refine,
            Stage::GenerateHypothesis,
            Stage::ComputeConfidences,
            Stage::Optimize
        ]
    );
}

// =============================================================================
// Storage
// =============================================================================

#[test]
fn test_reconstruct_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cube.ply");
    let output = dir.path().join("cube_model.ply");
    io::save_point_set(&unit_cube(5), &input).unwrap();

    let mut controller = PipelineController::with_config(scenario_config()).unwrap();
    controller.load_point_set(io::load_point_set(&input).unwrap());
    let result = controller.run_all().unwrap();
    io::save_polygon_mesh(&result.mesh.mesh, &output).unwrap();

    let loaded = io::load_polygon_mesh(&output).unwrap();
    assert_eq!(loaded.faces, result.mesh.mesh.faces);
    for (a, b) in loaded.vertices.iter().zip(&result.mesh.mesh.vertices) {
        assert!((a - b).norm() < 1e-12);
    }
    assert!(validate_polygon_mesh(&loaded).is_closed());
}
