//! Candidate face generation by plane arrangement.
//!
//! Every supporting plane is clipped to the scene box, then cut by every
//! other plane that crosses it inside the box. The resulting convex cells of
//! all planes share one welded vertex pool, so faces of different planes that
//! meet along an intersection line share the same edge. A selection of these
//! faces is later chosen by [`crate::selection`].

use std::collections::BTreeMap;

use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::{debug, info, warn};

use crate::error::{ReconError, ReconLocation, ReconResult};
use crate::geometry::{
    Aabb, PolygonSplit, dedup_loop, plane_box_polygon, point_on_segment_interior, polygon_area,
    split_convex_polygon,
};
use crate::tracing_ext::{OperationTimer, log_candidate_stats};
use crate::types::{
    FaceColor, PlanarGroup, Plane, PointSet, PolygonFace, PolygonMesh, bounds_of, edge_key,
};

/// Parameters for building the plane arrangement.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HypothesisParams {
    /// Growth of the scene box on every side, as a fraction of its diagonal.
    /// Default: 0.0 (the box hugs the grouped points)
    pub bbox_padding: f64,

    /// Planes closer than this angle are treated as parallel and never cut each other.
    /// Default: 1.0
    pub parallel_angle_deg: f64,

    /// Geometric tolerance as a fraction of the scene diagonal. Used for
    /// vertex welding, side classification and sliver rejection.
    /// Default: 1e-6
    pub relative_tolerance: f64,
}

impl Default for HypothesisParams {
    fn default() -> Self {
        Self {
            bbox_padding: 0.0,
            parallel_angle_deg: 1.0,
            relative_tolerance: 1e-6,
        }
    }
}

impl HypothesisParams {
    /// Set the box padding.
    pub fn with_padding(mut self, fraction: f64) -> Self {
        self.bbox_padding = fraction;
        self
    }

    /// Check ranges.
    pub fn validate(&self) -> ReconResult<()> {
        if !self.bbox_padding.is_finite() || self.bbox_padding < 0.0 {
            return Err(ReconError::invalid_parameter(
                "bbox_padding",
                format!("must be finite and non-negative, got {}", self.bbox_padding),
            ));
        }
        if !self.parallel_angle_deg.is_finite()
            || self.parallel_angle_deg < 0.0
            || self.parallel_angle_deg >= 90.0
        {
            return Err(ReconError::invalid_parameter(
                "parallel_angle_deg",
                format!("must be in [0, 90), got {}", self.parallel_angle_deg),
            ));
        }
        if !self.relative_tolerance.is_finite()
            || self.relative_tolerance <= 0.0
            || self.relative_tolerance >= 0.1
        {
            return Err(ReconError::invalid_parameter(
                "relative_tolerance",
                format!("must be in (0, 0.1), got {}", self.relative_tolerance),
            ));
        }
        Ok(())
    }
}

/// A plane that supports candidate faces.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportingPlane {
    /// Index into the refined group slice the arrangement was built from.
    pub group: usize,
    /// Label of that group.
    pub label: usize,
    pub plane: Plane,
}

/// An undirected edge and the candidate faces bordering it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEdge {
    /// Endpoints, smaller index first.
    pub vertices: (u32, u32),
    /// Incident faces in ascending order.
    pub faces: Vec<usize>,
}

impl CandidateEdge {
    /// An edge on the outer hull, bordered by a single face.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.faces.len() < 2
    }
}

/// The candidate faces with their shared adjacency.
///
/// Built once per generation run and read-only afterwards.
#[derive(Debug, Clone)]
pub struct CandidateMesh {
    /// Faces reference `planes` through [`PolygonFace::plane`].
    pub mesh: PolygonMesh,
    pub planes: Vec<SupportingPlane>,
    /// Every edge of every face, sorted by endpoints.
    pub edges: Vec<CandidateEdge>,
    pub bounds: Aabb,
    /// Absolute geometric tolerance used while building.
    pub tolerance: f64,
    edge_index: HashMap<(u32, u32), usize>,
}

impl CandidateMesh {
    #[inline]
    pub fn face_count(&self) -> usize {
        self.mesh.face_count()
    }

    /// Supporting plane of a face.
    #[inline]
    pub fn face_plane(&self, face: usize) -> &SupportingPlane {
        &self.planes[self.mesh.faces[face].plane]
    }

    /// Look up an edge by its endpoints in either order.
    pub fn edge(&self, a: u32, b: u32) -> Option<&CandidateEdge> {
        self.edge_index.get(&edge_key(a, b)).map(|&i| &self.edges[i])
    }

    /// Edges bordered by two or more faces.
    pub fn interior_edges(&self) -> impl Iterator<Item = &CandidateEdge> {
        self.edges.iter().filter(|e| !e.is_boundary())
    }

    /// Faces lying on the given supporting plane.
    pub fn faces_on_plane(&self, plane: usize) -> impl Iterator<Item = usize> + '_ {
        self.mesh
            .faces
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.plane == plane)
            .map(|(i, _)| i)
    }
}

/// Build the candidate faces for the refined `groups` of `point_set`.
///
/// # Errors
///
/// - [`ReconError::DegenerateGeometry`] when no candidate face survives.
/// - [`ReconError::InternalInvariant`] when the arrangement is malformed.
pub fn generate_hypothesis(
    point_set: &PointSet,
    groups: &[PlanarGroup],
    params: &HypothesisParams,
) -> ReconResult<CandidateMesh> {
    params.validate()?;
    let _timer = OperationTimer::with_context("generate_hypothesis", groups.len(), point_set.len());

    let mut supports: Vec<SupportingPlane> = groups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.len() >= 3)
        .filter_map(|(i, g)| {
            g.plane.map(|plane| SupportingPlane {
                group: i,
                label: g.label,
                plane,
            })
        })
        .collect();
    if supports.is_empty() {
        return Err(ReconError::degenerate_geometry(
            "no planar group has a fitted plane",
        ));
    }

    let grouped = supports
        .iter()
        .flat_map(|s| groups[s.group].members.iter())
        .map(|&i| &point_set.points[i].position);
    let Some((min, max)) = bounds_of(grouped) else {
        return Err(ReconError::degenerate_geometry("planar groups have no points"));
    };
    let tight = Aabb::new(min, max);
    let diagonal = tight.diagonal();
    if diagonal <= f64::EPSILON {
        return Err(ReconError::degenerate_geometry(
            "all grouped points coincide",
        ));
    }
    let bounds = tight.padded(diagonal * params.bbox_padding);
    let tol = params.relative_tolerance * bounds.diagonal();
    let min_cell_area = 4.0 * tol * bounds.diagonal();

    // Cross-section of every plane with the scene box.
    let mut polygons: Vec<Vec<Point3<f64>>> = Vec::with_capacity(supports.len());
    supports.retain(|s| {
        let polygon = plane_box_polygon(&s.plane, &bounds, tol);
        if polygon.len() < 3 || polygon_area(&polygon) <= min_cell_area {
            warn!(label = s.label, "Plane misses the scene box, dropping it");
            return false;
        }
        polygons.push(polygon);
        true
    });

    let partners = intersecting_pairs(&supports, &bounds, params, tol);

    // A plane that crosses nothing cannot bound a closed cell.
    let keep: Vec<bool> = partners.iter().map(|p| !p.is_empty()).collect();
    for (s, _) in supports.iter().zip(&keep).filter(|(_, k)| !**k) {
        warn!(
            label = s.label,
            "Plane intersects no other plane inside the scene box, dropping it"
        );
    }

    let mut raw_vertices: Vec<Point3<f64>> = Vec::new();
    let mut raw_faces: Vec<(Vec<u32>, usize)> = Vec::new();
    let mut kept_planes: Vec<SupportingPlane> = Vec::new();
    for (i, support) in supports.iter().enumerate() {
        if !keep[i] {
            continue;
        }
        let cells = arrange_plane(&polygons[i], &partners[i], &supports, tol, min_cell_area);
        debug!(label = support.label, cells = cells.len(), "Plane arrangement");

        let plane_slot = kept_planes.len();
        for cell in cells {
            let start = raw_vertices.len() as u32;
            let loop_ids: Vec<u32> = (0..cell.len() as u32).map(|k| start + k).collect();
            raw_vertices.extend(cell);
            raw_faces.push((loop_ids, plane_slot));
        }
        kept_planes.push(support.clone());
    }

    let (vertices, remap) = weld_vertices(&raw_vertices, tol);
    let mut faces: Vec<PolygonFace> = Vec::with_capacity(raw_faces.len());
    let mut dropped = 0usize;
    for (loop_ids, plane) in raw_faces {
        let mut welded: Vec<u32> = loop_ids.iter().map(|&v| remap[v as usize]).collect();
        welded.dedup();
        while welded.len() > 1 && welded.first() == welded.last() {
            welded.pop();
        }
        if !is_simple_loop(&welded) {
            dropped += 1;
            continue;
        }
        let positions: Vec<Point3<f64>> = welded.iter().map(|&v| vertices[v as usize]).collect();
        if polygon_area(&positions) <= min_cell_area {
            dropped += 1;
            continue;
        }
        faces.push(PolygonFace {
            vertices: welded,
            plane,
            color: FaceColor::new(0, 0, 0),
        });
    }
    if dropped > 0 {
        debug!(dropped, "Dropped cells collapsed by vertex welding");
    }

    if faces.is_empty() {
        return Err(ReconError::degenerate_geometry(format!(
            "{} planes produced no candidate face; check if the input point cloud has good planar segments",
            supports.len()
        )));
    }

    for (i, face) in faces.iter_mut().enumerate() {
        face.color = FaceColor::for_index(i);
    }
    let mut mesh = PolygonMesh { vertices, faces };
    mesh.remove_unreferenced_vertices();

    let inserted = resolve_t_junctions(&mut mesh, &kept_planes, tol);
    if inserted > 0 {
        debug!(inserted, "Inserted vertices at T-junctions");
    }

    let (edges, edge_index) = build_adjacency(&mesh)?;

    let candidates = CandidateMesh {
        mesh,
        planes: kept_planes,
        edges,
        bounds,
        tolerance: tol,
        edge_index,
    };
    log_candidate_stats(&candidates);
    info!(
        planes = candidates.planes.len(),
        faces = candidates.face_count(),
        edges = candidates.edges.len(),
        "Candidate faces generated"
    );
    Ok(candidates)
}

/// For each plane, the planes whose intersection line crosses the box.
fn intersecting_pairs(
    supports: &[SupportingPlane],
    bounds: &Aabb,
    params: &HypothesisParams,
    tol: f64,
) -> Vec<Vec<usize>> {
    let parallel_cos = params.parallel_angle_deg.to_radians().cos();
    let mut partners = vec![Vec::new(); supports.len()];
    for i in 0..supports.len() {
        for j in (i + 1)..supports.len() {
            let Some((origin, dir)) = supports[i].plane.intersect(&supports[j].plane, parallel_cos)
            else {
                continue;
            };
            let Some((t0, t1)) = bounds.clip_line(&origin, &dir, tol) else {
                continue;
            };
            if t1 - t0 <= tol {
                continue;
            }
            partners[i].push(j);
            partners[j].push(i);
        }
    }
    partners
}

/// Cut a plane's box cross-section by its partners in ascending order.
fn arrange_plane(
    polygon: &[Point3<f64>],
    partners: &[usize],
    supports: &[SupportingPlane],
    tol: f64,
    min_cell_area: f64,
) -> Vec<Vec<Point3<f64>>> {
    let mut cells = vec![polygon.to_vec()];
    for &j in partners {
        let cutter = &supports[j].plane;
        let mut next = Vec::with_capacity(cells.len() * 2);
        for cell in cells {
            match split_convex_polygon(&cell, cutter, tol) {
                PolygonSplit::Spanning { front, back }
                    if front.len() >= 3
                        && back.len() >= 3
                        && polygon_area(&front) > min_cell_area
                        && polygon_area(&back) > min_cell_area =>
                {
                    next.push(front);
                    next.push(back);
                }
                _ => next.push(cell),
            }
        }
        cells = next;
    }
    cells
        .into_iter()
        .map(|c| dedup_loop(c, tol))
        .filter(|c| c.len() >= 3)
        .collect()
}

/// Merge vertices closer than `epsilon` using a spatial hash.
///
/// Returns the welded positions and, for every input vertex, its welded index.
/// Clusters are represented by their first vertex, so the result does not
/// depend on hashing order.
fn weld_vertices(vertices: &[Point3<f64>], epsilon: f64) -> (Vec<Point3<f64>>, Vec<u32>) {
    let cell_size = epsilon * 2.0;
    let mut spatial_hash: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
    for (idx, p) in vertices.iter().enumerate() {
        spatial_hash
            .entry(pos_to_cell(p, cell_size))
            .or_default()
            .push(idx as u32);
    }

    let mut representative: Vec<u32> = (0..vertices.len() as u32).collect();
    for (idx, p) in vertices.iter().enumerate() {
        let idx = idx as u32;
        if representative[idx as usize] != idx {
            continue;
        }
        let cell = pos_to_cell(p, cell_size);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(candidates) = spatial_hash.get(&(cell.0 + dx, cell.1 + dy, cell.2 + dz))
                    else {
                        continue;
                    };
                    for &other in candidates {
                        if other <= idx || representative[other as usize] != other {
                            continue;
                        }
                        if (vertices[other as usize] - p).norm() < epsilon {
                            representative[other as usize] = idx;
                        }
                    }
                }
            }
        }
    }

    let mut welded = Vec::new();
    let mut remap = vec![0u32; vertices.len()];
    for idx in 0..vertices.len() {
        let rep = representative[idx] as usize;
        if rep == idx {
            remap[idx] = welded.len() as u32;
            welded.push(vertices[idx]);
        } else {
            remap[idx] = remap[rep];
        }
    }
    (welded, remap)
}

fn pos_to_cell(pos: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    (
        (pos.x / cell_size).floor() as i64,
        (pos.y / cell_size).floor() as i64,
        (pos.z / cell_size).floor() as i64,
    )
}

fn is_simple_loop(vertices: &[u32]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut sorted = vertices.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).all(|w| w[0] != w[1])
}

/// Insert pooled vertices that lie strictly inside a face edge into that
/// face's loop, so that coincident edges share their endpoints.
fn resolve_t_junctions(mesh: &mut PolygonMesh, planes: &[SupportingPlane], tol: f64) -> usize {
    // Only vertices on a face's plane can sit on its edges.
    let on_plane: Vec<Vec<u32>> = planes
        .iter()
        .map(|s| {
            (0..mesh.vertices.len() as u32)
                .filter(|&v| s.plane.signed_distance(&mesh.vertices[v as usize]).abs() <= 2.0 * tol)
                .collect()
        })
        .collect();

    let mut inserted = 0;
    for face in &mut mesh.faces {
        let candidates = &on_plane[face.plane];
        let n = face.vertices.len();
        let mut refined = Vec::with_capacity(n);
        for k in 0..n {
            let a = face.vertices[k];
            let b = face.vertices[(k + 1) % n];
            refined.push(a);
            let pa = mesh.vertices[a as usize];
            let pb = mesh.vertices[b as usize];
            let mut hits: Vec<(f64, u32)> = candidates
                .iter()
                .filter(|&&v| v != a && v != b)
                .filter_map(|&v| {
                    point_on_segment_interior(&mesh.vertices[v as usize], &pa, &pb, tol)
                        .map(|t| (t, v))
                })
                .collect();
            hits.sort_by(|x, y| x.0.total_cmp(&y.0));
            inserted += hits.len();
            refined.extend(hits.into_iter().map(|(_, v)| v));
        }
        face.vertices = refined;
    }
    inserted
}

/// Edge list and lookup table, checking that each plane's faces form a
/// planar subdivision.
fn build_adjacency(
    mesh: &PolygonMesh,
) -> ReconResult<(Vec<CandidateEdge>, HashMap<(u32, u32), usize>)> {
    let mut by_key: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
    for (f, face) in mesh.faces.iter().enumerate() {
        if face.vertices.len() < 3 {
            return Err(ReconError::internal_invariant(
                format!("face has {} vertices", face.vertices.len()),
                Some(ReconLocation::Face { index: f }),
            ));
        }
        for (a, b) in face.edges() {
            let incident = by_key.entry(edge_key(a, b)).or_default();
            if incident.last() == Some(&f) {
                return Err(ReconError::internal_invariant(
                    "face uses the same edge twice",
                    Some(ReconLocation::Face { index: f }),
                ));
            }
            incident.push(f);
        }
    }

    let mut edges = Vec::with_capacity(by_key.len());
    let mut edge_index = HashMap::with_capacity(by_key.len());
    for (key, faces) in by_key {
        let mut per_plane: BTreeMap<usize, usize> = BTreeMap::new();
        for &f in &faces {
            *per_plane.entry(mesh.faces[f].plane).or_default() += 1;
        }
        if let Some((plane, count)) = per_plane.iter().find(|(_, c)| **c > 2) {
            return Err(ReconError::internal_invariant(
                format!("edge bordered by {} faces of plane {}", count, plane),
                Some(ReconLocation::Edge {
                    vertex_a: key.0,
                    vertex_b: key.1,
                }),
            ));
        }
        edge_index.insert(key, edges.len());
        edges.push(CandidateEdge {
            vertices: key,
            faces,
        });
    }
    Ok((edges, edge_index))
}
