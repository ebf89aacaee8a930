//! Face selection as a 0/1 program.
//!
//! Every candidate face gets a binary `x_f`. Each interior edge must end up
//! with either no selected face or exactly two, which makes any feasible
//! selection a closed surface relative to the scene box. The objective trades
//! fitting quality and point coverage against a complexity penalty paid for
//! every sharp edge and corner the surface uses:
//!
//! ```text
//! minimize  w_fit · Σ x_f·fit(f)  −  w_cov · Σ x_f·cov(f)
//!           + w_cx · (Σ s_e + Σ c_v) / (#sharp-capable edges + #corners)
//! ```
//!
//! where `cov(f)` is the covered area normalized by its sum over all faces
//! and `fit(f)` is the summed squared distance of the face's support points
//! relative to `N · d_max²` (`N` support points in total, `d_max` the
//! largest point distance). Both terms therefore add up to at most one over
//! all faces. Distances below the geometric tolerance count as noise-free.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::confidence::FaceAttributes;
use crate::error::{ReconError, ReconResult};
use crate::hypothesis::CandidateMesh;
use crate::progress::PipelineObserver;
use crate::solver::{
    LinearProgram, RowSense, SolveError, SolveStatus, SolverKind, SolverOptions, SolverRegistry,
};
use crate::tracing_ext::{OperationTimer, log_selection_result};
use crate::types::{PolygonFace, PolygonMesh};
use crate::validate::count_planar_components;

/// Objective weights.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Weights {
    /// Weight of the normalized fitting residual.
    /// Default: 0.43
    pub fitting: f64,

    /// Weight of the normalized covered area.
    /// Default: 0.27
    pub coverage: f64,

    /// Weight of the sharp edge and corner penalty.
    /// Default: 0.3
    pub complexity: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            fitting: 0.43,
            coverage: 0.27,
            complexity: 0.3,
        }
    }
}

impl Weights {
    pub fn new(fitting: f64, coverage: f64, complexity: f64) -> Self {
        Self {
            fitting,
            coverage,
            complexity,
        }
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = complexity;
        self
    }

    /// Every weight must be finite and non-negative.
    pub fn validate(&self) -> ReconResult<()> {
        for (name, value) in [
            ("weights.fitting", self.fitting),
            ("weights.coverage", self.coverage),
            ("weights.complexity", self.complexity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconError::invalid_parameter(
                    name,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }
        Ok(())
    }
}

/// Column indices of one formulated program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionVariables {
    /// `x_f`, indexed by candidate face.
    pub faces: Vec<usize>,
    /// `y_e` per interior edge, keyed by index into [`CandidateMesh::edges`].
    pub active_edges: BTreeMap<usize, usize>,
    /// `s_e` per edge whose fan spans two or more planes.
    pub sharp_edges: BTreeMap<usize, usize>,
    /// `c_v` per vertex touched by a sharp-capable edge.
    pub corners: BTreeMap<u32, usize>,
}

/// The sub-surface made of the selected faces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizedMesh {
    /// Compacted copy of the selected faces. Face `plane` ids are the
    /// candidate supporting plane ids.
    pub mesh: PolygonMesh,
    /// Candidate face id of each output face.
    pub source_faces: Vec<usize>,
}

impl OptimizedMesh {
    #[inline]
    pub fn face_count(&self) -> usize {
        self.mesh.face_count()
    }

    /// Number of polygonal faces after joining coplanar neighbours.
    pub fn planar_component_count(&self) -> usize {
        count_planar_components(&self.mesh)
    }
}

/// Outcome of [`optimize`].
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub mesh: OptimizedMesh,
    /// Selected candidate face ids, ascending.
    pub selected: Vec<usize>,
    pub objective: f64,
    pub status: SolveStatus,
    pub backend: SolverKind,
    /// Search nodes explored by the backend.
    pub nodes: u64,
}

/// Check that a selection can be formulated for these inputs.
///
/// # Errors
///
/// [`ReconError::Precondition`] when there are no faces, the attributes do
/// not match the faces, or no edge is shared by two faces.
pub fn check_ready(candidates: &CandidateMesh, attributes: &FaceAttributes) -> ReconResult<()> {
    if candidates.face_count() == 0 {
        return Err(ReconError::precondition(
            "optimize",
            "the candidate set has no faces",
        ));
    }
    if !attributes.covers(candidates) {
        return Err(ReconError::precondition(
            "optimize",
            format!(
                "confidences cover {} faces but there are {} candidates",
                attributes.face_count(),
                candidates.face_count()
            ),
        ));
    }
    if candidates.interior_edges().next().is_none() {
        return Err(ReconError::precondition(
            "optimize",
            "no candidate edge is shared by two faces",
        ));
    }
    Ok(())
}

/// Whether [`check_ready`] passes.
pub fn ready_for_optimization(candidates: &CandidateMesh, attributes: &FaceAttributes) -> bool {
    check_ready(candidates, attributes).is_ok()
}

/// Build the selection program.
pub fn formulate(
    candidates: &CandidateMesh,
    attributes: &FaceAttributes,
    weights: &Weights,
) -> (LinearProgram, SelectionVariables) {
    let mut program = LinearProgram::new();
    let mut vars = SelectionVariables::default();

    let fit_scale = fitting_scale(candidates, attributes);
    let total_coverage = attributes.total_covered_area();
    for (f, conf) in attributes.faces.iter().enumerate() {
        let fit = if fit_scale > 0.0 {
            conf.support as f64 * conf.residual / fit_scale
        } else {
            0.0
        };
        let cov = if total_coverage > 0.0 {
            conf.covered_area / total_coverage
        } else {
            0.0
        };
        let cost = weights.fitting * fit - weights.coverage * cov;
        vars.faces.push(program.add_variable(format!("x_f{}", f), cost));
    }

    // Sharp-capable edges and their corners, counted first so the penalty
    // coefficient is known before the columns are added.
    let sharp: Vec<usize> = candidates
        .edges
        .iter()
        .enumerate()
        .filter(|(_, e)| spans_planes(candidates, &e.faces))
        .map(|(i, _)| i)
        .collect();
    let mut corner_vertices: Vec<u32> = sharp
        .iter()
        .flat_map(|&i| {
            let (a, b) = candidates.edges[i].vertices;
            [a, b]
        })
        .collect();
    corner_vertices.sort_unstable();
    corner_vertices.dedup();

    let penalty_terms = sharp.len() + corner_vertices.len();
    let penalty = if penalty_terms > 0 {
        weights.complexity / penalty_terms as f64
    } else {
        0.0
    };

    for (i, edge) in candidates.edges.iter().enumerate() {
        if edge.is_boundary() {
            continue;
        }
        let y = program.add_variable(format!("y_e{}", i), 0.0);
        vars.active_edges.insert(i, y);
        let mut terms: Vec<(usize, f64)> = edge.faces.iter().map(|&f| (vars.faces[f], 1.0)).collect();
        terms.push((y, -2.0));
        program.add_row(format!("edge_{}", i), terms, RowSense::Eq, 0.0);
    }

    for &i in &sharp {
        let edge = &candidates.edges[i];
        let s = program.add_variable(format!("s_e{}", i), penalty);
        vars.sharp_edges.insert(i, s);
        for (k, &f) in edge.faces.iter().enumerate() {
            for &g in &edge.faces[k + 1..] {
                if candidates.mesh.faces[f].plane != candidates.mesh.faces[g].plane {
                    program.add_row(
                        format!("sharp_{}_{}_{}", i, f, g),
                        vec![(vars.faces[f], 1.0), (vars.faces[g], 1.0), (s, -1.0)],
                        RowSense::Le,
                        1.0,
                    );
                }
            }
        }
        // A sharp edge always has a fan of at least two, so it is interior.
        if let Some(&y) = vars.active_edges.get(&i) {
            program.add_row(
                format!("sharp_active_{}", i),
                vec![(s, 1.0), (y, -1.0)],
                RowSense::Le,
                0.0,
            );
        }
    }

    for &v in &corner_vertices {
        let c = program.add_variable(format!("c_v{}", v), penalty);
        vars.corners.insert(v, c);
    }
    for &i in &sharp {
        let (a, b) = candidates.edges[i].vertices;
        let s = vars.sharp_edges[&i];
        for v in [a, b] {
            program.add_row(
                format!("corner_{}_{}", v, i),
                vec![(s, 1.0), (vars.corners[&v], -1.0)],
                RowSense::Le,
                0.0,
            );
        }
    }

    debug!(
        target: "polyrecon::selection",
        variables = program.variable_count(),
        rows = program.row_count(),
        faces = vars.faces.len(),
        active_edges = vars.active_edges.len(),
        sharp_edges = vars.sharp_edges.len(),
        corners = vars.corners.len(),
        "Selection program formulated"
    );

    (program, vars)
}

/// `N · d_max²`, or 0 when every distance is within the build tolerance.
fn fitting_scale(candidates: &CandidateMesh, attributes: &FaceAttributes) -> f64 {
    let max_sq = attributes
        .points
        .iter()
        .filter(|p| p.face.is_some())
        .filter_map(|p| p.residual)
        .map(|r| r * r)
        .fold(0.0, f64::max);
    let support: usize = attributes.faces.iter().map(|c| c.support).sum();
    // Distances below the build tolerance are round-off, not misfit.
    if support == 0 || max_sq <= candidates.tolerance * candidates.tolerance {
        return 0.0;
    }
    support as f64 * max_sq
}

fn spans_planes(candidates: &CandidateMesh, faces: &[usize]) -> bool {
    faces.split_first().is_some_and(|(&first, rest)| {
        let plane = candidates.mesh.faces[first].plane;
        rest.iter().any(|&f| candidates.mesh.faces[f].plane != plane)
    })
}

/// Select the faces minimizing the weighted objective.
///
/// The candidates are never modified; the result owns a compacted copy of
/// the chosen faces.
///
/// # Errors
///
/// - [`ReconError::Precondition`] when [`check_ready`] fails.
/// - [`ReconError::InvalidParameter`] for invalid weights.
/// - [`ReconError::SolverInfeasible`] and [`ReconError::SolverTimeout`] from
///   the backend.
pub fn optimize(
    candidates: &CandidateMesh,
    attributes: &FaceAttributes,
    weights: &Weights,
    kind: SolverKind,
    registry: &SolverRegistry,
    options: &SolverOptions,
    observer: &dyn PipelineObserver,
) -> ReconResult<SelectionResult> {
    check_ready(candidates, attributes)?;
    weights.validate()?;
    let _timer = OperationTimer::with_context("optimize", candidates.face_count(), 0);

    let backend = registry.get(kind).ok_or_else(|| {
        ReconError::precondition(
            "optimize",
            format!("no backend registered for solver '{}'", kind),
        )
    })?;

    let (program, vars) = formulate(candidates, attributes, weights);

    let start = Instant::now();
    let solution = backend
        .solve(&program, options, observer)
        .map_err(|e| match e {
            SolveError::Infeasible => ReconError::SolverInfeasible {
                backend: backend.name().to_string(),
            },
            SolveError::LimitReached { elapsed, nodes, .. } => ReconError::SolverTimeout {
                backend: backend.name().to_string(),
                elapsed_secs: elapsed.as_secs_f64(),
                nodes,
            },
            SolveError::Backend(details) => ReconError::SolverFailed {
                backend: backend.name().to_string(),
                details,
            },
        })?;

    if !program.is_feasible(&solution.values) {
        return Err(ReconError::SolverFailed {
            backend: backend.name().to_string(),
            details: "returned assignment violates the edge constraints".into(),
        });
    }
    if solution.status == SolveStatus::Incumbent {
        warn!(
            target: "polyrecon::selection",
            backend = backend.name(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Using the best selection found before the solver budget ran out"
        );
    }

    let selected: Vec<usize> = vars
        .faces
        .iter()
        .enumerate()
        .filter(|(_, col)| solution.values[**col])
        .map(|(f, _)| f)
        .collect();

    let mesh = extract_selection(&candidates.mesh, &selected);
    let result = SelectionResult {
        mesh,
        selected,
        objective: solution.objective,
        status: solution.status,
        backend: kind,
        nodes: solution.nodes,
    };

    log_selection_result(&result);
    info!(
        faces = result.selected.len(),
        candidates = candidates.face_count(),
        "Faces selected"
    );

    Ok(result)
}

/// Copy the given faces into a new mesh with compacted vertices, numbered
/// in order of first use.
pub fn extract_selection(mesh: &PolygonMesh, selected: &[usize]) -> OptimizedMesh {
    let mut remap: Vec<Option<u32>> = vec![None; mesh.vertex_count()];
    let mut out = PolygonMesh::new();

    for &f in selected {
        let face = &mesh.faces[f];
        let vertices = face
            .vertices
            .iter()
            .map(|&v| {
                *remap[v as usize].get_or_insert_with(|| {
                    out.vertices.push(mesh.vertices[v as usize]);
                    (out.vertices.len() - 1) as u32
                })
            })
            .collect();
        out.faces.push(PolygonFace {
            vertices,
            plane: face.plane,
            color: face.color,
        });
    }

    OptimizedMesh {
        mesh: out,
        source_faces: selected.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::{ConfidenceParams, compute_confidences};
    use crate::hypothesis::{HypothesisParams, generate_hypothesis};
    use crate::progress::NoOpObserver;
    use crate::types::{Point, PointSet};
    use crate::validate::validate_polygon_mesh;

    fn cube_points(n: usize) -> PointSet {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let a = i as f64 / (n - 1) as f64;
                let b = j as f64 / (n - 1) as f64;
                points.push(Point::labelled(0.0, a, b, 0));
                points.push(Point::labelled(1.0, a, b, 1));
                points.push(Point::labelled(a, 0.0, b, 2));
                points.push(Point::labelled(a, 1.0, b, 3));
                points.push(Point::labelled(a, b, 0.0, 4));
                points.push(Point::labelled(a, b, 1.0, 5));
            }
        }
        PointSet::from_points(points)
    }

    fn stage(padding: f64) -> (CandidateMesh, FaceAttributes) {
        let set = cube_points(5);
        let candidates = generate_hypothesis(
            &set,
            &set.groups,
            &HypothesisParams::default().with_padding(padding),
        )
        .unwrap();
        let attrs =
            compute_confidences(&candidates, &set, &set.groups, &ConfidenceParams::default())
                .unwrap();
        (candidates, attrs)
    }

    fn run(
        candidates: &CandidateMesh,
        attrs: &FaceAttributes,
        weights: Weights,
        kind: SolverKind,
    ) -> ReconResult<SelectionResult> {
        optimize(
            candidates,
            attrs,
            &weights,
            kind,
            &SolverRegistry::new(),
            &SolverOptions::default(),
            &NoOpObserver,
        )
    }

    /// Selected faces per interior edge must be 0 or 2.
    fn assert_edge_parity(candidates: &CandidateMesh, selected: &[usize]) {
        for edge in candidates.interior_edges() {
            let count = edge.faces.iter().filter(|f| selected.contains(f)).count();
            assert!(count == 0 || count == 2, "edge {:?} has {}", edge.vertices, count);
        }
    }

    #[test]
    fn test_cube_selects_closed_box() {
        let (candidates, attrs) = stage(0.0);
        let result = run(&candidates, &attrs, Weights::new(1.0, 1.0, 0.1), SolverKind::BranchAndBound)
            .unwrap();
        assert_eq!(result.selected, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!((result.objective - (-1.0 + 0.1)).abs() < 1e-9);

        let report = validate_polygon_mesh(&result.mesh.mesh);
        assert!(report.is_closed());
        assert_eq!(report.boundary_edge_count, 0);
        assert_eq!(result.mesh.planar_component_count(), 6);
        assert_eq!(result.mesh.mesh.vertex_count(), 8);
    }

    #[test]
    fn test_padded_cube_ignores_empty_cells() {
        let (candidates, attrs) = stage(0.1);
        let result = run(&candidates, &attrs, Weights::new(1.0, 1.0, 0.1), SolverKind::BranchAndBound)
            .unwrap();
        assert_edge_parity(&candidates, &result.selected);
        assert_eq!(result.mesh.face_count(), result.selected.len());
        let report = validate_polygon_mesh(&result.mesh.mesh);
        assert!(report.is_watertight);
        assert!((report.surface_area - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_high_complexity_weight_selects_nothing() {
        let (candidates, attrs) = stage(0.0);
        let result = run(&candidates, &attrs, Weights::new(1.0, 1.0, 2.0), SolverKind::BranchAndBound)
            .unwrap();
        assert!(result.selected.is_empty());
        assert_eq!(result.objective, 0.0);
    }

    #[test]
    fn test_complexity_weight_is_monotone_on_cube() {
        let (candidates, attrs) = stage(0.0);
        let mut previous = usize::MAX;
        for complexity in [0.0, 0.1, 0.5, 0.99, 1.01, 3.0] {
            let result = run(
                &candidates,
                &attrs,
                Weights::new(0.43, 1.0, complexity),
                SolverKind::BranchAndBound,
            )
            .unwrap();
            assert!(result.selected.len() <= previous);
            previous = result.selected.len();
        }
    }

    #[test]
    fn test_backends_agree() {
        let (candidates, attrs) = stage(0.0);
        let weights = Weights::default();
        let bnb = run(&candidates, &attrs, weights, SolverKind::BranchAndBound).unwrap();
        let all = run(&candidates, &attrs, weights, SolverKind::Enumeration).unwrap();
        assert!((bnb.objective - all.objective).abs() < 1e-9);
        assert_eq!(all.backend, SolverKind::Enumeration);
    }

    #[test]
    fn test_formulation_counts_for_cube() {
        let (candidates, attrs) = stage(0.0);
        let (program, vars) = formulate(&candidates, &attrs, &Weights::default());
        assert_eq!(vars.faces.len(), 6);
        assert_eq!(vars.active_edges.len(), 12);
        assert_eq!(vars.sharp_edges.len(), 12);
        assert_eq!(vars.corners.len(), 8);
        assert_eq!(program.variable_count(), 6 + 12 + 12 + 8);
        // Parity + one pair + activity per edge, two corner rows per edge.
        assert_eq!(program.row_count(), 12 * 3 + 24);
    }

    #[test]
    fn test_noisy_face_keeps_box_selected() {
        let (candidates, mut attrs) = stage(0.0);
        assert_eq!(fitting_scale(&candidates, &attrs), 0.0);

        attrs.faces[5].residual = 1e-4;
        let k = attrs.points.iter().position(|p| p.face == Some(5)).unwrap();
        attrs.points[k].residual = Some(0.02);
        let support: usize = attrs.faces.iter().map(|c| c.support).sum();
        let expected = attrs.faces[5].support as f64 * 1e-4 / (support as f64 * 4e-4);

        let (program, vars) = formulate(&candidates, &attrs, &Weights::new(1.0, 0.0, 0.0));
        let coefficient = program.variables()[vars.faces[5]].objective;
        assert!((coefficient - expected).abs() < 1e-12);
        assert_eq!(program.variables()[vars.faces[0]].objective, 0.0);

        let result = run(&candidates, &attrs, Weights::new(1.0, 1.0, 0.1), SolverKind::BranchAndBound)
            .unwrap();
        assert_eq!(result.selected.len(), 6);
        assert!((result.objective - (-0.9 + expected)).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_attributes_rejected() {
        let (candidates, mut attrs) = stage(0.0);
        attrs.faces.pop();
        assert!(!ready_for_optimization(&candidates, &attrs));
        let err = run(&candidates, &attrs, Weights::default(), SolverKind::BranchAndBound)
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Precondition);
    }

    #[test]
    fn test_negative_weight_rejected() {
        assert!(Weights::new(0.5, -0.1, 0.3).validate().is_err());
        assert!(Weights::default().validate().is_ok());
    }

    #[test]
    fn test_extract_selection_compacts_vertices() {
        let (candidates, _) = stage(0.0);
        let out = extract_selection(&candidates.mesh, &[4]);
        assert_eq!(out.mesh.vertex_count(), 4);
        assert_eq!(out.source_faces, vec![4]);
        assert_eq!(out.mesh.faces[0].plane, candidates.mesh.faces[4].plane);
    }
}
