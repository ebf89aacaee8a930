//! Point set and polygon mesh file I/O.
//!
//! - Point sets: PLY with `x y z`, optional `nx ny nz`, and an optional
//!   integer `segment_index` per vertex (negative means ungrouped).
//! - Polygon meshes: PLY with per-face `plane_index` and `red green blue`,
//!   which load back unchanged; OBJ export with one `g plane_<id>` group per
//!   supporting plane.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::{Point3, Vector3};
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use tracing::{debug, info};

use crate::error::{ReconError, ReconResult};
use crate::tracing_ext::log_io_operation;
use crate::types::{FaceColor, Point, PointSet, PolygonFace, PolygonMesh};

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Ply,
    /// Export only.
    Obj,
}

impl FileFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "ply" => Some(FileFormat::Ply),
                "obj" => Some(FileFormat::Obj),
                _ => None,
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Ply => "ply",
            FileFormat::Obj => "obj",
        }
    }
}

fn unsupported(path: &Path) -> ReconError {
    ReconError::UnsupportedFormat {
        extension: path.extension().and_then(|e| e.to_str()).map(String::from),
    }
}

fn ply_write_error(path: &Path, what: &str, e: impl std::fmt::Debug) -> ReconError {
    ReconError::io_write(
        path,
        std::io::Error::other(format!("PLY {} error: {:?}", what, e)),
    )
}

// ============================================================================
// Reading
// ============================================================================

fn read_ply(path: &Path) -> ReconResult<Ply<DefaultElement>> {
    use ply_rs::parser::Parser;

    let file = File::open(path).map_err(|e| ReconError::io_read(path, e))?;
    let mut reader = BufReader::new(file);
    let parser = Parser::<DefaultElement>::new();
    parser
        .read_ply(&mut reader)
        .map_err(|e| ReconError::parse_error(path, format!("PLY parse error: {:?}", e)))
}

/// Helper to extract a float value from a PLY property.
fn get_ply_float(prop: Option<&Property>, name: &str, path: &Path) -> ReconResult<f64> {
    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        _ => Err(ReconError::parse_error(
            path,
            format!("missing or invalid property '{}'", name),
        )),
    }
}

/// Helper to extract a signed integer from a PLY property.
fn get_ply_int(prop: Option<&Property>) -> Option<i64> {
    match prop {
        Some(Property::Int(v)) => Some(*v as i64),
        Some(Property::UInt(v)) => Some(*v as i64),
        Some(Property::Short(v)) => Some(*v as i64),
        Some(Property::UShort(v)) => Some(*v as i64),
        Some(Property::Char(v)) => Some(*v as i64),
        Some(Property::UChar(v)) => Some(*v as i64),
        _ => None,
    }
}

fn get_ply_u8(prop: Option<&Property>) -> Option<u8> {
    match prop {
        Some(Property::UChar(v)) => Some(*v),
        Some(Property::Float(v)) => Some((v * 255.0).clamp(0.0, 255.0) as u8),
        Some(Property::Double(v)) => Some((v * 255.0).clamp(0.0, 255.0) as u8),
        other => get_ply_int(other).map(|v| v.clamp(0, 255) as u8),
    }
}

fn get_ply_indices(prop: Option<&Property>) -> Option<Vec<i64>> {
    match prop {
        Some(Property::ListInt(v)) => Some(v.iter().map(|&i| i as i64).collect()),
        Some(Property::ListUInt(v)) => Some(v.iter().map(|&i| i as i64).collect()),
        Some(Property::ListUChar(v)) => Some(v.iter().map(|&i| i as i64).collect()),
        Some(Property::ListShort(v)) => Some(v.iter().map(|&i| i as i64).collect()),
        Some(Property::ListUShort(v)) => Some(v.iter().map(|&i| i as i64).collect()),
        _ => None,
    }
}

fn read_positions(ply: &Ply<DefaultElement>, path: &Path) -> ReconResult<Vec<Point3<f64>>> {
    let Some(vertices) = ply.payload.get("vertex") else {
        return Err(ReconError::parse_error(path, "no 'vertex' element"));
    };
    vertices
        .iter()
        .map(|v| {
            Ok(Point3::new(
                get_ply_float(v.get("x"), "x", path)?,
                get_ply_float(v.get("y"), "y", path)?,
                get_ply_float(v.get("z"), "z", path)?,
            ))
        })
        .collect()
}

/// Load a segmented point set from PLY.
///
/// Points carry their `segment_index` as the group label; the planar groups
/// are built from the labels. A file without any labelled point is rejected
/// because nothing could be reconstructed from it.
pub fn load_point_set(path: &Path) -> ReconResult<PointSet> {
    if FileFormat::from_path(path) != Some(FileFormat::Ply) {
        return Err(unsupported(path));
    }
    info!(path = ?path, "Loading point set");

    let ply = read_ply(path)?;
    let positions = read_positions(&ply, path)?;
    let vertices = ply.payload.get("vertex").map(Vec::as_slice).unwrap_or(&[]);

    let mut points = Vec::with_capacity(positions.len());
    for (position, element) in positions.into_iter().zip(vertices) {
        let mut point = Point::new(position);

        if let (Ok(nx), Ok(ny), Ok(nz)) = (
            get_ply_float(element.get("nx"), "nx", path),
            get_ply_float(element.get("ny"), "ny", path),
            get_ply_float(element.get("nz"), "nz", path),
        ) {
            let n = Vector3::new(nx, ny, nz);
            if n.norm_squared() > 0.0 {
                point.normal = Some(n.normalize());
            }
        }

        let label = get_ply_int(
            element
                .get("segment_index")
                .or_else(|| element.get("segment")),
        );
        point.segment = label.filter(|&l| l >= 0).map(|l| l as usize);
        points.push(point);
    }

    let set = PointSet::from_points(points);
    if set.groups.is_empty() {
        log_io_operation("load_point_set", path, "ply", false);
        return Err(ReconError::parse_error(
            path,
            "no point carries a non-negative segment_index",
        ));
    }

    debug!(
        points = set.len(),
        groups = set.groups.len(),
        grouped = set.grouped_point_count(),
        "Point set loaded"
    );
    log_io_operation("load_point_set", path, "ply", true);
    Ok(set)
}

/// Load a polygon mesh written by [`save_polygon_mesh`] (or any PLY with
/// polygon faces). Faces without `plane_index` get plane 0, faces without
/// colors get a color derived from their index.
pub fn load_polygon_mesh(path: &Path) -> ReconResult<PolygonMesh> {
    if FileFormat::from_path(path) != Some(FileFormat::Ply) {
        return Err(unsupported(path));
    }
    info!(path = ?path, "Loading polygon mesh");

    let ply = read_ply(path)?;
    let mut mesh = PolygonMesh::new();
    mesh.vertices = read_positions(&ply, path)?;
    let vertex_count = mesh.vertices.len() as i64;

    if let Some(faces) = ply.payload.get("face") {
        for (f, element) in faces.iter().enumerate() {
            let indices = get_ply_indices(
                element
                    .get("vertex_indices")
                    .or_else(|| element.get("vertex_index")),
            )
            .ok_or_else(|| {
                ReconError::parse_error(path, format!("face {} has no vertex_indices", f))
            })?;
            if indices.len() < 3 {
                return Err(ReconError::parse_error(
                    path,
                    format!("face {} has {} vertices", f, indices.len()),
                ));
            }
            if let Some(bad) = indices.iter().find(|&&i| i < 0 || i >= vertex_count) {
                return Err(ReconError::parse_error(
                    path,
                    format!("face {} references missing vertex {}", f, bad),
                ));
            }

            let plane = get_ply_int(element.get("plane_index"))
                .filter(|&p| p >= 0)
                .map_or(0, |p| p as usize);
            let color = match (
                get_ply_u8(element.get("red")),
                get_ply_u8(element.get("green")),
                get_ply_u8(element.get("blue")),
            ) {
                (Some(r), Some(g), Some(b)) => FaceColor::new(r, g, b),
                _ => FaceColor::for_index(f),
            };
            mesh.faces.push(PolygonFace {
                vertices: indices.into_iter().map(|i| i as u32).collect(),
                plane,
                color,
            });
        }
    }

    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Polygon mesh loaded"
    );
    log_io_operation("load_polygon_mesh", path, "ply", true);
    Ok(mesh)
}

// ============================================================================
// Writing
// ============================================================================

fn scalar(name: &str, ty: ScalarType) -> PropertyDef {
    PropertyDef::new(name.to_string(), PropertyType::Scalar(ty))
}

fn write_ply(mut ply: Ply<DefaultElement>, path: &Path) -> ReconResult<()> {
    use ply_rs::writer::Writer;

    ply.make_consistent()
        .map_err(|e| ply_write_error(path, "consistency", e))?;

    let file = File::create(path).map_err(|e| ReconError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| ply_write_error(path, "write", e))?;
    writer.flush().map_err(|e| ReconError::io_write(path, e))
}

fn vertex_element(p: &Point3<f64>) -> DefaultElement {
    let mut element = DefaultElement::new();
    element.insert("x".to_string(), Property::Double(p.x));
    element.insert("y".to_string(), Property::Double(p.y));
    element.insert("z".to_string(), Property::Double(p.z));
    element
}

/// Save a point set to ASCII PLY, including normals when any point has one
/// and the group label of every point (`-1` when ungrouped).
pub fn save_point_set(set: &PointSet, path: &Path) -> ReconResult<()> {
    if FileFormat::from_path(path) != Some(FileFormat::Ply) {
        return Err(unsupported(path));
    }
    info!(path = ?path, points = set.len(), "Saving point set");

    let has_normals = set.points.iter().any(|p| p.normal.is_some());

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header
        .comments
        .push("segmented point set written by polyrecon".to_string());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(scalar(name, ScalarType::Double));
    }
    if has_normals {
        for name in ["nx", "ny", "nz"] {
            vertex_def.properties.add(scalar(name, ScalarType::Double));
        }
    }
    vertex_def
        .properties
        .add(scalar("segment_index", ScalarType::Int));
    ply.header.elements.add(vertex_def);

    let payload: Vec<DefaultElement> = set
        .points
        .iter()
        .map(|p| {
            let mut element = vertex_element(&p.position);
            if has_normals {
                let n = p.normal.unwrap_or_else(Vector3::zeros);
                element.insert("nx".to_string(), Property::Double(n.x));
                element.insert("ny".to_string(), Property::Double(n.y));
                element.insert("nz".to_string(), Property::Double(n.z));
            }
            let label = p.segment.map_or(-1, |s| s as i32);
            element.insert("segment_index".to_string(), Property::Int(label));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), payload);

    write_ply(ply, path)?;
    log_io_operation("save_point_set", path, "ply", true);
    Ok(())
}

/// Save a polygon mesh, choosing the format from the extension.
pub fn save_polygon_mesh(mesh: &PolygonMesh, path: &Path) -> ReconResult<()> {
    match FileFormat::from_path(path) {
        Some(FileFormat::Ply) => save_ply(mesh, path),
        Some(FileFormat::Obj) => save_obj(mesh, path),
        None => Err(unsupported(path)),
    }
}

/// Save a polygon mesh to ASCII PLY with per-face plane ids and colors.
pub fn save_ply(mesh: &PolygonMesh, path: &Path) -> ReconResult<()> {
    info!(
        path = ?path,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Saving polygon mesh (PLY)"
    );

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header
        .comments
        .push("polygonal surface written by polyrecon".to_string());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(scalar(name, ScalarType::Double));
    }
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.properties.add(scalar("plane_index", ScalarType::Int));
    for name in ["red", "green", "blue"] {
        face_def.properties.add(scalar(name, ScalarType::UChar));
    }
    ply.header.elements.add(face_def);

    ply.payload.insert(
        "vertex".to_string(),
        mesh.vertices.iter().map(vertex_element).collect(),
    );

    let mut faces = Vec::with_capacity(mesh.face_count());
    for face in &mesh.faces {
        let mut element = DefaultElement::new();
        element.insert(
            "vertex_indices".to_string(),
            Property::ListInt(face.vertices.iter().map(|&v| v as i32).collect()),
        );
        element.insert(
            "plane_index".to_string(),
            Property::Int(face.plane as i32),
        );
        element.insert("red".to_string(), Property::UChar(face.color.r));
        element.insert("green".to_string(), Property::UChar(face.color.g));
        element.insert("blue".to_string(), Property::UChar(face.color.b));
        faces.push(element);
    }
    ply.payload.insert("face".to_string(), faces);

    write_ply(ply, path)?;
    log_io_operation("save_polygon_mesh", path, "ply", true);
    Ok(())
}

/// Save a polygon mesh to OBJ, one group per supporting plane.
pub fn save_obj(mesh: &PolygonMesh, path: &Path) -> ReconResult<()> {
    info!(
        path = ?path,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Saving polygon mesh (OBJ)"
    );

    let file = File::create(path).map_err(|e| ReconError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer).map_err(|e| ReconError::io_write(path, e))?;
    writer.flush().map_err(|e| ReconError::io_write(path, e))?;

    log_io_operation("save_polygon_mesh", path, "obj", true);
    Ok(())
}

fn write_obj(mesh: &PolygonMesh, w: &mut impl Write) -> std::io::Result<()> {
    writeln!(w, "# OBJ file exported by polyrecon")?;
    writeln!(w, "# Vertices: {}", mesh.vertex_count())?;
    writeln!(w, "# Faces: {}", mesh.face_count())?;
    writeln!(w)?;

    for v in &mesh.vertices {
        writeln!(w, "v {:.9} {:.9} {:.9}", v.x, v.y, v.z)?;
    }

    let mut by_plane: BTreeMap<usize, Vec<&PolygonFace>> = BTreeMap::new();
    for face in &mesh.faces {
        by_plane.entry(face.plane).or_default().push(face);
    }
    for (plane, faces) in by_plane {
        writeln!(w)?;
        writeln!(w, "g plane_{}", plane)?;
        for face in faces {
            write!(w, "f")?;
            for &v in &face.vertices {
                write!(w, " {}", v + 1)?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn square_mesh() -> PolygonMesh {
        PolygonMesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            faces: vec![
                PolygonFace {
                    vertices: vec![0, 1, 2, 3],
                    plane: 4,
                    color: FaceColor::new(10, 20, 30),
                },
                PolygonFace {
                    vertices: vec![0, 3, 4],
                    plane: 7,
                    color: FaceColor::new(200, 100, 0),
                },
            ],
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_path(Path::new("a.PLY")), Some(FileFormat::Ply));
        assert_eq!(FileFormat::from_path(Path::new("a.obj")), Some(FileFormat::Obj));
        assert_eq!(FileFormat::from_path(Path::new("a.stl")), None);
    }

    #[test]
    fn test_mesh_ply_keeps_face_attributes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("surface.ply");
        let mesh = square_mesh();
        save_polygon_mesh(&mesh, &path).unwrap();
        let loaded = load_polygon_mesh(&path).unwrap();
        assert_eq!(loaded, mesh);
    }

    #[test]
    fn test_point_set_labels_survive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("points.ply");
        let set = PointSet::from_points(vec![
            Point::labelled(0.0, 0.0, 0.0, 3).with_normal(Vector3::z()),
            Point::labelled(1.0, 0.0, 0.0, 3).with_normal(Vector3::z()),
            Point::labelled(0.0, 1.0, 0.0, 3).with_normal(Vector3::z()),
            Point::new(Point3::new(5.0, 5.0, 5.0)),
        ]);
        save_point_set(&set, &path).unwrap();
        let loaded = load_point_set(&path).unwrap();
        assert_eq!(loaded, set);
        assert_eq!(loaded.points[3].segment, None);
        assert_eq!(loaded.points[3].normal, None);
    }

    #[test]
    fn test_obj_groups_by_plane() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("surface.obj");
        save_polygon_mesh(&square_mesh(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("g plane_4\nf 1 2 3 4"));
        assert!(text.contains("g plane_7\nf 1 4 5"));
        assert!(load_polygon_mesh(&path).is_err());
    }

    #[test]
    fn test_unlabelled_points_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.ply");
        let set = PointSet::from_points(vec![Point::new(Point3::origin())]);
        save_point_set(&set, &path).unwrap();
        let err = load_point_set(&path).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ParseError);
    }

    #[test]
    fn test_missing_file() {
        let err = load_point_set(Path::new("/nonexistent/points.ply")).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::IoRead);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = save_polygon_mesh(&square_mesh(), Path::new("out.stl")).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::UnsupportedFormat);
    }
}
