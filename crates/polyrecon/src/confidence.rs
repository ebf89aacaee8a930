//! Per-face and per-point confidence scoring.
//!
//! For each candidate face, the points of its supporting group that project
//! strictly inside the face polygon are its *support*. Points exactly on a
//! shared edge support neither neighbour. From them we derive:
//!
//! - **fitting residual**: mean squared distance of the support to the plane,
//! - **coverage**: the fraction of the face area whose grid cells contain a
//!   projected support point,
//! - **complexity**: the number of bounding edges.
//!
//! Faces are scored in parallel with rayon; every face is computed
//! independently and collected in face order, so repeated runs are
//! bit-identical.

use hashbrown::HashSet;
use nalgebra::Point2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{ReconError, ReconResult};
use crate::geometry::{point_in_convex_polygon, signed_area_2d};
use crate::hypothesis::CandidateMesh;
use crate::tracing_ext::OperationTimer;
use crate::types::{PlanarGroup, PlaneFrame, PointSet};

/// Parameters for confidence scoring.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConfidenceParams {
    /// Absolute coverage grid cell size. `None` derives it from point spacing.
    /// Default: None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_resolution: Option<f64>,

    /// Cell size as a multiple of the estimated point spacing of each group.
    /// Default: 2.0
    pub coverage_cell_factor: f64,

    /// Ignore support points farther than this from the plane.
    /// Default: None (all group points count)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,
}

impl Default for ConfidenceParams {
    fn default() -> Self {
        Self {
            coverage_resolution: None,
            coverage_cell_factor: 2.0,
            max_distance: None,
        }
    }
}

impl ConfidenceParams {
    /// Check ranges.
    pub fn validate(&self) -> ReconResult<()> {
        if let Some(r) = self.coverage_resolution
            && (!r.is_finite() || r <= 0.0)
        {
            return Err(ReconError::invalid_parameter(
                "coverage_resolution",
                format!("must be positive, got {}", r),
            ));
        }
        if !self.coverage_cell_factor.is_finite() || self.coverage_cell_factor <= 0.0 {
            return Err(ReconError::invalid_parameter(
                "coverage_cell_factor",
                format!("must be positive, got {}", self.coverage_cell_factor),
            ));
        }
        if let Some(d) = self.max_distance
            && (!d.is_finite() || d < 0.0)
        {
            return Err(ReconError::invalid_parameter(
                "max_distance",
                format!("must be non-negative, got {}", d),
            ));
        }
        Ok(())
    }
}

/// Scores of one candidate face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceConfidence {
    /// Mean squared distance of the support points to the plane. 0 without support.
    pub residual: f64,
    /// Number of support points.
    pub support: usize,
    pub area: f64,
    /// `coverage_ratio * area`.
    pub covered_area: f64,
    /// Fraction of coverage cells containing a support point, in `[0, 1]`.
    pub coverage_ratio: f64,
    /// Number of bounding edges.
    pub complexity: usize,
}

/// Scores of one input point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointConfidence {
    /// Signed distance to its group's plane. `None` for points outside every
    /// supporting group.
    pub residual: Option<f64>,
    /// First candidate face (ascending id) whose polygon contains the projection.
    pub face: Option<usize>,
}

/// Side table of confidences for a [`CandidateMesh`]. Never alters topology.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAttributes {
    /// Indexed by candidate face id.
    pub faces: Vec<FaceConfidence>,
    /// Indexed by point id of the input point set.
    pub points: Vec<PointConfidence>,
    /// Coverage cell size used for each supporting plane.
    pub cell_sizes: Vec<f64>,
}

impl FaceAttributes {
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Whether the table has exactly one entry per candidate face.
    pub fn covers(&self, candidates: &CandidateMesh) -> bool {
        self.faces.len() == candidates.face_count()
    }

    /// Sum of all face residuals.
    pub fn total_residual(&self) -> f64 {
        self.faces.iter().map(|f| f.residual).sum()
    }

    /// Sum of all covered areas.
    pub fn total_covered_area(&self) -> f64 {
        self.faces.iter().map(|f| f.covered_area).sum()
    }
}

/// Support geometry of one supporting plane, shared by all its faces.
struct PlaneSupport {
    frame: PlaneFrame,
    /// `(point id, 2D projection, signed distance)` of each member.
    samples: Vec<(usize, Point2<f64>, f64)>,
    cell_size: f64,
}

/// Score every candidate face and every grouped point.
///
/// `groups` must be the refined groups the candidates were generated from.
pub fn compute_confidences(
    candidates: &CandidateMesh,
    point_set: &PointSet,
    groups: &[PlanarGroup],
    params: &ConfidenceParams,
) -> ReconResult<FaceAttributes> {
    params.validate()?;
    let _timer = OperationTimer::with_context(
        "compute_confidences",
        candidates.face_count(),
        point_set.len(),
    );

    if let Some(bad) = candidates.planes.iter().find(|s| s.group >= groups.len()) {
        return Err(ReconError::precondition(
            "compute_confidences",
            format!(
                "candidate plane refers to group {} but only {} groups were given",
                bad.group,
                groups.len()
            ),
        ));
    }

    let supports: Vec<PlaneSupport> = candidates
        .planes
        .par_iter()
        .map(|s| {
            let frame = s.plane.frame();
            let samples: Vec<(usize, Point2<f64>, f64)> = groups[s.group]
                .members
                .iter()
                .map(|&i| {
                    let p = &point_set.points[i].position;
                    (i, frame.to_2d(p), s.plane.signed_distance(p))
                })
                .filter(|(_, _, d)| params.max_distance.is_none_or(|max| d.abs() <= max))
                .collect();
            let cell_size = params
                .coverage_resolution
                .unwrap_or_else(|| params.coverage_cell_factor * estimate_spacing(&samples));
            PlaneSupport {
                frame,
                samples,
                cell_size,
            }
        })
        .collect();

    let polygons: Vec<Vec<Point2<f64>>> = (0..candidates.face_count())
        .into_par_iter()
        .map(|f| {
            let frame = &supports[candidates.mesh.faces[f].plane].frame;
            let mut poly: Vec<Point2<f64>> = candidates
                .mesh
                .face_positions(f)
                .iter()
                .map(|p| frame.to_2d(p))
                .collect();
            if signed_area_2d(&poly) < 0.0 {
                poly.reverse();
            }
            poly
        })
        .collect();

    let eps = candidates.tolerance;
    let faces: Vec<FaceConfidence> = (0..candidates.face_count())
        .into_par_iter()
        .map(|f| {
            let face = &candidates.mesh.faces[f];
            score_face(&polygons[f], &supports[face.plane], face.vertices.len(), eps)
        })
        .collect();

    let mut points = vec![PointConfidence::default(); point_set.len()];
    let assignments: Vec<Vec<(usize, PointConfidence)>> = supports
        .par_iter()
        .enumerate()
        .map(|(plane, support)| {
            let plane_faces: Vec<usize> = candidates.faces_on_plane(plane).collect();
            support
                .samples
                .iter()
                .map(|&(i, q, d)| {
                    let face = plane_faces
                        .iter()
                        .copied()
                        .find(|&f| point_in_convex_polygon(&polygons[f], &q, eps));
                    (
                        i,
                        PointConfidence {
                            residual: Some(d),
                            face,
                        },
                    )
                })
                .collect()
        })
        .collect();
    for (i, conf) in assignments.into_iter().flatten() {
        points[i] = conf;
    }

    let supported = faces.iter().filter(|f| f.support > 0).count();
    debug!(
        faces = faces.len(),
        supported,
        total_residual = faces.iter().map(|f| f.residual).sum::<f64>(),
        "Face confidences"
    );
    info!(
        faces = faces.len(),
        supported,
        unsupported = faces.len() - supported,
        "Confidences computed"
    );

    Ok(FaceAttributes {
        faces,
        points,
        cell_sizes: supports.iter().map(|s| s.cell_size).collect(),
    })
}

fn score_face(
    polygon: &[Point2<f64>],
    support: &PlaneSupport,
    complexity: usize,
    eps: f64,
) -> FaceConfidence {
    let area = signed_area_2d(polygon).abs();

    let inside: Vec<(Point2<f64>, f64)> = support
        .samples
        .iter()
        .filter(|(_, q, _)| point_in_convex_polygon(polygon, q, -eps))
        .map(|&(_, q, d)| (q, d))
        .collect();

    let residual = if inside.is_empty() {
        0.0
    } else {
        inside.iter().map(|(_, d)| d * d).sum::<f64>() / inside.len() as f64
    };

    let coverage_ratio = coverage_ratio(polygon, area, &inside, support.cell_size);

    FaceConfidence {
        residual,
        support: inside.len(),
        area,
        covered_area: coverage_ratio * area,
        coverage_ratio,
        complexity,
    }
}

/// Area of the grid cells holding a sample, as a fraction of the face area.
///
/// The grid is anchored at the polygon's lower corner and only occupied cells
/// are visited, so the cost depends on the samples and not on the face size.
/// Border cells stick out of the face, hence the cap at 1.
fn coverage_ratio(
    polygon: &[Point2<f64>],
    area: f64,
    samples: &[(Point2<f64>, f64)],
    cell_size: f64,
) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    if !(cell_size > 0.0) || area <= 0.0 {
        return 1.0;
    }
    let origin = polygon.iter().fold(
        Point2::new(f64::INFINITY, f64::INFINITY),
        |lo, p| lo.inf(p),
    );

    let occupied: HashSet<(i64, i64)> = samples
        .iter()
        .map(|(q, _)| {
            (
                ((q.x - origin.x) / cell_size).floor() as i64,
                ((q.y - origin.y) / cell_size).floor() as i64,
            )
        })
        .collect();

    (occupied.len() as f64 * cell_size * cell_size / area).min(1.0)
}

/// Average spacing of planar samples: `sqrt(bbox area / count)`.
fn estimate_spacing(samples: &[(usize, Point2<f64>, f64)]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let (min, max) = samples.iter().fold(
        (
            Point2::new(f64::INFINITY, f64::INFINITY),
            Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        ),
        |(lo, hi), (_, q, _)| (lo.inf(q), hi.sup(q)),
    );
    let extent = max - min;
    let area = extent.x.max(f64::EPSILON) * extent.y.max(f64::EPSILON);
    (area / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypothesis::{HypothesisParams, generate_hypothesis};
    use crate::types::Point;

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

    #[test]
    fn test_cube_faces_fully_supported() {
        let set = cube_points(6);
        let candidates =
            generate_hypothesis(&set, &set.groups, &HypothesisParams::default()).unwrap();
        let attrs =
            compute_confidences(&candidates, &set, &set.groups, &ConfidenceParams::default())
                .unwrap();
        assert!(attrs.covers(&candidates));
        for face in &attrs.faces {
            assert!(face.residual < 1e-12);
            // Points on the cube edges lie on face boundaries.
            assert_eq!(face.support, 16);
            assert!((face.coverage_ratio - 1.0).abs() < 1e-12);
            assert!((face.covered_area - 1.0).abs() < 1e-9);
            assert_eq!(face.complexity, 4);
        }
        assert!(attrs.points.iter().all(|p| p.face.is_some()));
    }

    #[test]
    fn test_outer_cells_have_no_support() {
        let set = cube_points(6);
        let params = HypothesisParams::default().with_padding(0.1);
        let candidates = generate_hypothesis(&set, &set.groups, &params).unwrap();
        let attrs =
            compute_confidences(&candidates, &set, &set.groups, &ConfidenceParams::default())
                .unwrap();
        let supported = attrs.faces.iter().filter(|f| f.support > 0).count();
        // Only the six central cells carry points.
        assert_eq!(supported, 6);
        let unsupported: Vec<&FaceConfidence> =
            attrs.faces.iter().filter(|f| f.support == 0).collect();
        assert!(!unsupported.is_empty());
        for face in unsupported {
            assert_eq!(face.covered_area, 0.0);
            assert_eq!(face.residual, 0.0);
        }
    }

    #[test]
    fn test_noisy_points_raise_residual() {
        let mut points = cube_points(5).points;
        for (k, p) in points.iter_mut().enumerate() {
            if p.segment == Some(4) {
                p.position.z += if k % 2 == 0 { 0.01 } else { -0.01 };
            }
        }
        let set = PointSet::from_points(points);
        let candidates =
            generate_hypothesis(&set, &set.groups, &HypothesisParams::default().with_padding(0.02))
                .unwrap();
        let attrs =
            compute_confidences(&candidates, &set, &set.groups, &ConfidenceParams::default())
                .unwrap();
        let max_residual = attrs.faces.iter().map(|f| f.residual).fold(0.0, f64::max);
        assert!(max_residual > 1e-5);
    }

    #[test]
    fn test_recomputation_is_identical() {
        let set = cube_points(5);
        let candidates =
            generate_hypothesis(&set, &set.groups, &HypothesisParams::default().with_padding(0.05))
                .unwrap();
        let params = ConfidenceParams::default();
        let a = compute_confidences(&candidates, &set, &set.groups, &params).unwrap();
        let b = compute_confidences(&candidates, &set, &set.groups, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_half_covered_face() {
        let square = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        // Samples only in the left half.
        let samples: Vec<(Point2<f64>, f64)> = (0..10)
            .flat_map(|i| (0..10).map(move |j| (Point2::new(i as f64 * 0.1, j as f64 * 0.1), 0.0)))
            .collect();
        let ratio = coverage_ratio(&square, 2.0, &samples, 0.25);
        assert!((ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_fine_grid_on_large_face() {
        let square = vec![
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 100.0),
            Point2::new(0.0, 100.0),
        ];
        // Nine samples in nine distinct 1 cm cells of a 10^8-cell face.
        let samples: Vec<(Point2<f64>, f64)> = (0..3)
            .flat_map(|i| {
                (0..3).map(move |j| {
                    (
                        Point2::new(50.002 + 0.01 * i as f64, 50.002 + 0.01 * j as f64),
                        0.0,
                    )
                })
            })
            .collect();
        let ratio = coverage_ratio(&square, 1e4, &samples, 0.01);
        assert!((ratio - 9.0 * 1e-4 / 1e4).abs() < 1e-15);
    }

    #[test]
    fn test_small_segment_in_large_scene() {
        // A 100-unit cube and a 1 cm patch of nine points on x = 50.
        let mut points: Vec<Point> = cube_points(6)
            .points
            .into_iter()
            .map(|mut p| {
                p.position.coords *= 100.0;
                p
            })
            .collect();
        for i in 0..3 {
            for j in 0..3 {
                points.push(Point::labelled(
                    50.0,
                    50.0 + 0.005 * i as f64,
                    50.0 + 0.005 * j as f64,
                    6,
                ));
            }
        }
        let set = PointSet::from_points(points);
        let candidates =
            generate_hypothesis(&set, &set.groups, &HypothesisParams::default()).unwrap();
        let attrs =
            compute_confidences(&candidates, &set, &set.groups, &ConfidenceParams::default())
                .unwrap();
        assert_eq!(attrs.face_count(), candidates.face_count());

        let patch = candidates
            .planes
            .iter()
            .position(|p| p.label == 6)
            .expect("patch plane");
        assert!(attrs.cell_sizes[patch] < 0.01);
        let patch_faces: Vec<&FaceConfidence> = candidates
            .faces_on_plane(patch)
            .map(|f| &attrs.faces[f])
            .collect();
        assert_eq!(patch_faces.iter().map(|f| f.support).sum::<usize>(), 9);
        for face in &patch_faces {
            assert!(face.coverage_ratio < 1e-6);
        }
        for face in &attrs.faces {
            assert!((0.0..=1.0).contains(&face.coverage_ratio));
        }
    }

    #[test]
    fn test_rejects_bad_params() {
        let params = ConfidenceParams {
            coverage_cell_factor: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
