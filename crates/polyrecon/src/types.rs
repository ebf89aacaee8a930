//! Core data types: points, planes, planar groups and polygon meshes.

use nalgebra::{Point2, Point3, Vector3};
use std::collections::BTreeMap;

use crate::geometry::fit_plane;

/// A sample from the input point cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal, if the scanner or segmentation provided one.
    pub normal: Option<Vector3<f64>>,

    /// Upstream segmentation label. `None` for points outside every planar segment.
    pub segment: Option<usize>,
}

impl Point {
    /// Create an unlabelled point.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
            segment: None,
        }
    }

    /// Create a point from raw coordinates with a segment label.
    #[inline]
    pub fn labelled(x: f64, y: f64, z: f64, segment: usize) -> Self {
        Self {
            position: Point3::new(x, y, z),
            normal: None,
            segment: Some(segment),
        }
    }

    /// Attach a normal.
    #[inline]
    pub fn with_normal(mut self, normal: Vector3<f64>) -> Self {
        self.normal = Some(normal);
        self
    }
}

/// An oriented plane `normal · x + offset = 0` with a unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub offset: f64,
}

impl Plane {
    /// Build a plane from a (not necessarily unit) normal and offset.
    ///
    /// Returns `None` for a zero normal.
    pub fn new(normal: Vector3<f64>, offset: f64) -> Option<Self> {
        let len = normal.norm();
        if len < 1e-12 || !len.is_finite() {
            return None;
        }
        Some(Self {
            normal: normal / len,
            offset: offset / len,
        })
    }

    /// Plane through `point` with the given normal.
    pub fn from_point_normal(point: &Point3<f64>, normal: Vector3<f64>) -> Option<Self> {
        let len = normal.norm();
        if len < 1e-12 || !len.is_finite() {
            return None;
        }
        let n = normal / len;
        Some(Self {
            normal: n,
            offset: -n.dot(&point.coords),
        })
    }

    /// Signed distance from `p`; positive on the side the normal points to.
    #[inline]
    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.offset
    }

    /// Orthogonal projection of `p` onto the plane.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        p - self.normal * self.signed_distance(p)
    }

    /// The same plane with the opposite orientation.
    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            offset: -self.offset,
        }
    }

    /// Angle between the two planes in degrees, ignoring orientation.
    pub fn angle_to(&self, other: &Plane) -> f64 {
        self.normal
            .dot(&other.normal)
            .abs()
            .clamp(0.0, 1.0)
            .acos()
            .to_degrees()
    }

    /// An orthonormal in-plane frame.
    pub fn frame(&self) -> PlaneFrame {
        let n = self.normal;
        let helper = if n.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let u = n.cross(&helper).normalize();
        let v = n.cross(&u);
        PlaneFrame {
            origin: Point3::from(-n * self.offset),
            u,
            v,
        }
    }

    /// Line of intersection as `(point, unit direction)`, or `None` when
    /// the planes are parallel within `parallel_cos`.
    pub fn intersect(&self, other: &Plane, parallel_cos: f64) -> Option<(Point3<f64>, Vector3<f64>)> {
        if self.normal.dot(&other.normal).abs() > parallel_cos {
            return None;
        }
        let dir = self.normal.cross(&other.normal);
        let denom = dir.norm_squared();
        if denom < 1e-18 {
            return None;
        }
        // Point on both planes closest to the origin.
        let p = (other.normal.cross(&dir) * -self.offset + dir.cross(&self.normal) * -other.offset)
            / denom;
        Some((Point3::from(p), dir / denom.sqrt()))
    }
}

/// In-plane orthonormal coordinates for a [`Plane`].
#[derive(Debug, Clone, Copy)]
pub struct PlaneFrame {
    pub origin: Point3<f64>,
    pub u: Vector3<f64>,
    pub v: Vector3<f64>,
}

impl PlaneFrame {
    /// 2D coordinates of the projection of `p`.
    #[inline]
    pub fn to_2d(&self, p: &Point3<f64>) -> Point2<f64> {
        let d = p - self.origin;
        Point2::new(d.dot(&self.u), d.dot(&self.v))
    }

    /// Lift 2D frame coordinates back into 3D.
    #[inline]
    pub fn to_3d(&self, q: &Point2<f64>) -> Point3<f64> {
        self.origin + self.u * q.x + self.v * q.y
    }
}

/// Points sharing one upstream segment label, with their fitted plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarGroup {
    /// Group label. After refinement this is the smallest absorbed label.
    pub label: usize,

    /// Indices into [`PointSet::points`], ascending.
    pub members: Vec<usize>,

    /// Least-squares plane; `None` with fewer than 3 non-collinear points.
    pub plane: Option<Plane>,

    /// Upstream labels merged into this group, ascending. Contains `label`.
    pub merged_from: Vec<usize>,
}

impl PlanarGroup {
    /// Fit a group over `members` of `points`.
    pub fn fit(label: usize, mut members: Vec<usize>, points: &[Point]) -> Self {
        members.sort_unstable();
        members.dedup();
        let plane = fit_group_plane(&members, points);
        Self {
            label,
            members,
            plane,
            merged_from: vec![label],
        }
    }

    /// Number of member points.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the group has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Mean position of the members.
    pub fn centroid(&self, points: &[Point]) -> Option<Point3<f64>> {
        if self.members.is_empty() {
            return None;
        }
        let sum = self
            .members
            .iter()
            .fold(Vector3::zeros(), |acc, &i| acc + points[i].position.coords);
        Some(Point3::from(sum / self.members.len() as f64))
    }
}

/// Fit a plane to the member points, oriented to agree with their normals.
pub(crate) fn fit_group_plane(members: &[usize], points: &[Point]) -> Option<Plane> {
    let positions: Vec<Point3<f64>> = members.iter().map(|&i| points[i].position).collect();
    let fit = fit_plane(&positions)?;
    let normal_sum = members
        .iter()
        .filter_map(|&i| points[i].normal)
        .fold(Vector3::zeros(), |acc, n| acc + n);
    if fit.plane.normal.dot(&normal_sum) < 0.0 {
        Some(fit.plane.flipped())
    } else {
        Some(fit.plane)
    }
}

/// An input point cloud plus its planar segmentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    pub points: Vec<Point>,
    pub groups: Vec<PlanarGroup>,
}

impl PointSet {
    /// Build a point set, grouping points by their segment label.
    ///
    /// Groups are ordered by label.
    pub fn from_points(points: Vec<Point>) -> Self {
        let mut by_label: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, p) in points.iter().enumerate() {
            if let Some(label) = p.segment {
                by_label.entry(label).or_default().push(i);
            }
        }
        let groups = by_label
            .into_iter()
            .map(|(label, members)| PlanarGroup::fit(label, members, &points))
            .collect();
        Self { points, groups }
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when there are no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points carrying a segment label.
    pub fn grouped_point_count(&self) -> usize {
        self.groups.iter().map(PlanarGroup::len).sum()
    }

    /// Axis-aligned bounding box of all points.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.points.iter().map(|p| &p.position))
    }
}

pub(crate) fn bounds_of<'a>(
    mut points: impl Iterator<Item = &'a Point3<f64>>,
) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = points.next()?;
    let mut min = *first;
    let mut max = *first;
    for p in points {
        min = min.inf(p);
        max = max.sup(p);
    }
    Some((min, max))
}

/// RGB color with 8-bit components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl FaceColor {
    /// Create a new color from RGB components.
    #[inline]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// A well-spread, reproducible color for the `index`-th face.
    pub fn for_index(index: usize) -> Self {
        // Golden-ratio hue stepping keeps consecutive faces distinguishable.
        let hue = (index as f64 * 0.618_033_988_749_895).fract();
        let (r, g, b) = hsv_to_rgb(hue, 0.55, 0.9);
        Self::new(r, g, b)
    }
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (u8, u8, u8) {
    let h6 = h * 6.0;
    let sector = h6.floor() as i32 % 6;
    let f = h6 - h6.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    (to_u8(r), to_u8(g), to_u8(b))
}

/// A planar polygon referencing vertices of its mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFace {
    /// Boundary loop, counter-clockwise when seen from the plane normal.
    pub vertices: Vec<u32>,

    /// Index of the supporting plane (planar group) of this face.
    pub plane: usize,

    /// Display color.
    pub color: FaceColor,
}

impl PolygonFace {
    /// Consecutive boundary edges as `(from, to)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }
}

/// An indexed polygon mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonMesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<PolygonFace>,
}

impl PolygonMesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Positions of a face's boundary loop.
    pub fn face_positions(&self, face: usize) -> Vec<Point3<f64>> {
        self.faces[face]
            .vertices
            .iter()
            .map(|&v| self.vertices[v as usize])
            .collect()
    }

    /// Area of a face.
    pub fn face_area(&self, face: usize) -> f64 {
        crate::geometry::polygon_area(&self.face_positions(face))
    }

    /// Total area of all faces.
    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len()).map(|f| self.face_area(f)).sum()
    }

    /// Axis-aligned bounding box of the vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(self.vertices.iter())
    }

    /// Drop vertices no face references, keeping the order of the rest.
    ///
    /// Returns the number of vertices removed.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let original_count = self.vertices.len();
        let mut referenced = vec![false; original_count];
        for face in &self.faces {
            for &v in &face.vertices {
                referenced[v as usize] = true;
            }
        }

        let mut remap = vec![u32::MAX; original_count];
        let mut kept = Vec::with_capacity(original_count);
        for (old, vertex) in self.vertices.iter().enumerate() {
            if referenced[old] {
                remap[old] = kept.len() as u32;
                kept.push(*vertex);
            }
        }
        if kept.len() == original_count {
            return 0;
        }

        for face in &mut self.faces {
            for v in &mut face.vertices {
                *v = remap[*v as usize];
            }
        }
        self.vertices = kept;
        original_count - self.vertices.len()
    }
}

/// Undirected edge key with the smaller vertex first.
#[inline]
pub fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}
