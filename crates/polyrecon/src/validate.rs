//! Surface validation and reporting.

use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::debug;

use crate::refine::UnionFind;
use crate::types::{PolygonMesh, edge_key};

/// Validation report for a polygon surface.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MeshReport {
    /// Whether the surface is non-empty and has no boundary edges.
    pub is_watertight: bool,

    /// Whether all edges have at most 2 adjacent faces.
    pub is_manifold: bool,

    /// Number of boundary edges (edges with 1 adjacent face).
    pub boundary_edge_count: usize,

    /// Number of non-manifold edges (edges with >2 adjacent faces).
    pub non_manifold_edge_count: usize,

    pub vertex_count: usize,
    pub face_count: usize,

    /// Connected sets of faces on the same plane, joined across shared edges.
    pub planar_component_count: usize,

    pub surface_area: f64,

    /// Bounding box as (min_corner, max_corner).
    #[serde(skip)]
    pub bounds: Option<(Point3<f64>, Point3<f64>)>,
}

impl MeshReport {
    /// Whether the surface encloses a volume without defects.
    pub fn is_closed(&self) -> bool {
        self.is_watertight && self.is_manifold
    }
}

impl std::fmt::Display for MeshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Surface Report:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(f, "  Faces: {}", self.face_count)?;
        writeln!(f, "  Planar faces: {}", self.planar_component_count)?;

        if let Some((min, max)) = &self.bounds {
            writeln!(
                f,
                "  Bounds: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
                min.x, min.y, min.z, max.x, max.y, max.z
            )?;
        }

        writeln!(f, "  Surface Area: {:.4}", self.surface_area)?;
        writeln!(
            f,
            "  Watertight: {} (boundary edges: {})",
            if self.is_watertight { "yes" } else { "NO" },
            self.boundary_edge_count
        )?;
        writeln!(
            f,
            "  Manifold: {} (non-manifold edges: {})",
            if self.is_manifold { "yes" } else { "NO" },
            self.non_manifold_edge_count
        )?;

        Ok(())
    }
}

/// Faces incident to each undirected edge, in ascending face order.
fn edge_faces(mesh: &PolygonMesh) -> HashMap<(u32, u32), Vec<usize>> {
    let mut map: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (f, face) in mesh.faces.iter().enumerate() {
        for (a, b) in face.edges() {
            map.entry(edge_key(a, b)).or_default().push(f);
        }
    }
    map
}

/// Validate a polygon surface and return a report.
pub fn validate_polygon_mesh(mesh: &PolygonMesh) -> MeshReport {
    let edges = edge_faces(mesh);

    let boundary_edge_count = edges.values().filter(|f| f.len() == 1).count();
    let non_manifold_edge_count = edges.values().filter(|f| f.len() > 2).count();

    let report = MeshReport {
        is_watertight: !mesh.is_empty() && boundary_edge_count == 0,
        is_manifold: non_manifold_edge_count == 0,
        boundary_edge_count,
        non_manifold_edge_count,
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        planar_component_count: planar_components_of(mesh, &edges),
        surface_area: mesh.surface_area(),
        bounds: mesh.bounds(),
    };

    debug!(
        faces = report.face_count,
        boundary_edges = report.boundary_edge_count,
        non_manifold_edges = report.non_manifold_edge_count,
        planar_components = report.planar_component_count,
        "Surface validated"
    );

    report
}

/// Count connected components of faces, joining two faces only when they
/// share an edge and lie on the same supporting plane.
///
/// A planar component corresponds to one polygonal face of the final model.
pub fn count_planar_components(mesh: &PolygonMesh) -> usize {
    planar_components_of(mesh, &edge_faces(mesh))
}

fn planar_components_of(mesh: &PolygonMesh, edges: &HashMap<(u32, u32), Vec<usize>>) -> usize {
    let mut uf = UnionFind::new(mesh.face_count());
    for faces in edges.values() {
        for (i, &f) in faces.iter().enumerate() {
            for &g in &faces[i + 1..] {
                if mesh.faces[f].plane == mesh.faces[g].plane {
                    uf.union(f, g);
                }
            }
        }
    }
    (0..mesh.face_count())
        .filter(|&f| uf.find(f) == f)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceColor, PolygonFace};

    fn face(vertices: Vec<u32>, plane: usize) -> PolygonFace {
        PolygonFace {
            vertices,
            plane,
            color: FaceColor::new(200, 200, 200),
        }
    }

    /// Unit cube as 6 quads, one plane per side.
    fn cube() -> PolygonMesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let faces = vec![
            face(vec![0, 3, 2, 1], 0),
            face(vec![4, 5, 6, 7], 1),
            face(vec![0, 1, 5, 4], 2),
            face(vec![2, 3, 7, 6], 3),
            face(vec![0, 4, 7, 3], 4),
            face(vec![1, 2, 6, 5], 5),
        ];
        PolygonMesh { vertices, faces }
    }

    #[test]
    fn test_closed_cube() {
        let report = validate_polygon_mesh(&cube());
        assert!(report.is_closed());
        assert_eq!(report.boundary_edge_count, 0);
        assert_eq!(report.planar_component_count, 6);
        assert!((report.surface_area - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_open_box() {
        let mut mesh = cube();
        mesh.faces.pop();
        let report = validate_polygon_mesh(&mesh);
        assert!(!report.is_watertight);
        assert!(report.is_manifold);
        assert_eq!(report.boundary_edge_count, 4);
    }

    #[test]
    fn test_coplanar_faces_form_one_component() {
        let mut mesh = cube();
        // Split the bottom quad into two triangles on the same plane.
        mesh.faces[0] = face(vec![0, 3, 2], 0);
        mesh.faces.push(face(vec![0, 2, 1], 0));
        assert_eq!(count_planar_components(&mesh), 6);
        assert_eq!(mesh.face_count(), 7);
    }

    #[test]
    fn test_empty_surface_is_not_watertight() {
        let report = validate_polygon_mesh(&PolygonMesh::new());
        assert!(!report.is_watertight);
        assert_eq!(report.planar_component_count, 0);
        assert!(report.to_string().contains("Faces: 0"));
    }
}
