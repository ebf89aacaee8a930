//! Geometric primitives: plane fitting and convex polygon clipping.

use nalgebra::{Matrix3, Point2, Point3, Vector3};

use crate::types::Plane;

/// Result of a least-squares plane fit.
#[derive(Debug, Clone, Copy)]
pub struct PlaneFit {
    pub plane: Plane,
    pub centroid: Point3<f64>,
    /// Covariance eigenvalues, ascending. The first is the out-of-plane spread.
    pub eigenvalues: [f64; 3],
}

/// Fit a plane by PCA: the normal is the eigenvector of the smallest
/// covariance eigenvalue.
///
/// Returns `None` for fewer than 3 points or (nearly) collinear input.
pub fn fit_plane(points: &[Point3<f64>]) -> Option<PlaneFit> {
    if points.len() < 3 {
        return None;
    }

    let centroid: Vector3<f64> = points
        .iter()
        .map(|p| p.coords)
        .fold(Vector3::zeros(), |acc, v| acc + v)
        / points.len() as f64;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= points.len() as f64;

    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let eigenvalues = [
        eig.eigenvalues[order[0]],
        eig.eigenvalues[order[1]],
        eig.eigenvalues[order[2]],
    ];

    // All points coincide, or they lie on a line.
    if eigenvalues[2] <= 1e-24 || eigenvalues[1] <= 1e-12 * eigenvalues[2] {
        return None;
    }

    let normal = eig.eigenvectors.column(order[0]).into_owned();
    let centroid = Point3::from(centroid);
    let plane = Plane::from_point_normal(&centroid, normal)?;
    Some(PlaneFit {
        plane,
        centroid,
        eigenvalues,
    })
}

// ============================================================================
// Convex polygon splitting
// ============================================================================

/// Where a polygon lies relative to a splitting plane.
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonSplit {
    /// Every vertex within tolerance of the plane.
    Coplanar,
    /// Entirely on the positive side (touching allowed).
    Front,
    /// Entirely on the negative side (touching allowed).
    Back,
    /// Strictly straddles the plane.
    Spanning {
        front: Vec<Point3<f64>>,
        back: Vec<Point3<f64>>,
    },
}

/// Split a convex polygon by a plane.
///
/// Vertices within `eps` of the plane count as on it and are copied to both halves.
pub fn split_convex_polygon(polygon: &[Point3<f64>], plane: &Plane, eps: f64) -> PolygonSplit {
    let dists: Vec<f64> = polygon.iter().map(|p| plane.signed_distance(p)).collect();
    let has_front = dists.iter().any(|&d| d > eps);
    let has_back = dists.iter().any(|&d| d < -eps);

    match (has_front, has_back) {
        (false, false) => return PolygonSplit::Coplanar,
        (true, false) => return PolygonSplit::Front,
        (false, true) => return PolygonSplit::Back,
        (true, true) => {}
    }

    let n = polygon.len();
    let mut front = Vec::with_capacity(n + 1);
    let mut back = Vec::with_capacity(n + 1);
    for i in 0..n {
        let j = (i + 1) % n;
        let (pi, di) = (polygon[i], dists[i]);
        let (pj, dj) = (polygon[j], dists[j]);

        if di >= -eps {
            front.push(pi);
        }
        if di <= eps {
            back.push(pi);
        }
        if (di > eps && dj < -eps) || (di < -eps && dj > eps) {
            let t = di / (di - dj);
            let x = pi + (pj - pi) * t;
            front.push(x);
            back.push(x);
        }
    }

    PolygonSplit::Spanning {
        front: dedup_loop(front, eps),
        back: dedup_loop(back, eps),
    }
}

/// Keep the part of a convex polygon on the negative side of `plane`.
pub fn clip_convex_polygon(polygon: &[Point3<f64>], plane: &Plane, eps: f64) -> Vec<Point3<f64>> {
    match split_convex_polygon(polygon, plane, eps) {
        PolygonSplit::Coplanar | PolygonSplit::Back => polygon.to_vec(),
        PolygonSplit::Front => Vec::new(),
        PolygonSplit::Spanning { back, .. } => back,
    }
}

/// Drop consecutive vertices closer than `eps`, including across the seam.
pub fn dedup_loop(mut polygon: Vec<Point3<f64>>, eps: f64) -> Vec<Point3<f64>> {
    polygon.dedup_by(|a, b| (*a - *b).norm() <= eps);
    while polygon.len() > 1 {
        let (first, last) = (polygon[0], polygon[polygon.len() - 1]);
        if (first - last).norm() <= eps {
            polygon.pop();
        } else {
            break;
        }
    }
    polygon
}

/// Area of a planar polygon (Newell's method).
pub fn polygon_area(polygon: &[Point3<f64>]) -> f64 {
    newell_normal(polygon).norm() * 0.5
}

/// Unnormalized polygon normal whose length is twice the area.
pub fn newell_normal(polygon: &[Point3<f64>]) -> Vector3<f64> {
    let n = polygon.len();
    let mut sum = Vector3::zeros();
    for i in 0..n {
        let a = polygon[i].coords;
        let b = polygon[(i + 1) % n].coords;
        sum += a.cross(&b);
    }
    sum
}

// ============================================================================
// 2D helpers
// ============================================================================

/// Signed area of a 2D polygon; positive for counter-clockwise loops.
pub fn signed_area_2d(polygon: &[Point2<f64>]) -> f64 {
    let n = polygon.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum * 0.5
}

/// Whether `q` lies inside or on a counter-clockwise convex polygon.
pub fn point_in_convex_polygon(polygon: &[Point2<f64>], q: &Point2<f64>, eps: f64) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    (0..n).all(|i| {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let edge = b - a;
        let len = edge.norm();
        if len <= f64::EPSILON {
            return true;
        }
        let cross = edge.x * (q.y - a.y) - edge.y * (q.x - a.x);
        cross >= -eps * len
    })
}

// ============================================================================
// Boxes and lines
// ============================================================================

/// An axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn diagonal(&self) -> f64 {
        (self.max - self.min).norm()
    }

    #[inline]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Grow every side by `margin`.
    pub fn padded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// The six outward-facing boundary planes.
    pub fn face_planes(&self) -> [Plane; 6] {
        let axis = |i: usize| {
            let mut v = Vector3::zeros();
            v[i] = 1.0;
            v
        };
        [
            Plane { normal: axis(0), offset: -self.max.x },
            Plane { normal: -axis(0), offset: self.min.x },
            Plane { normal: axis(1), offset: -self.max.y },
            Plane { normal: -axis(1), offset: self.min.y },
            Plane { normal: axis(2), offset: -self.max.z },
            Plane { normal: -axis(2), offset: self.min.z },
        ]
    }

    /// Parameter interval `[t0, t1]` of the line `origin + t * dir` inside the box
    /// grown by `eps`, or `None` when the line misses it.
    pub fn clip_line(&self, origin: &Point3<f64>, dir: &Vector3<f64>, eps: f64) -> Option<(f64, f64)> {
        let mut t0 = f64::NEG_INFINITY;
        let mut t1 = f64::INFINITY;
        for i in 0..3 {
            let lo = self.min[i] - eps;
            let hi = self.max[i] + eps;
            if dir[i].abs() < 1e-12 {
                if origin[i] < lo || origin[i] > hi {
                    return None;
                }
                continue;
            }
            let a = (lo - origin[i]) / dir[i];
            let b = (hi - origin[i]) / dir[i];
            t0 = t0.max(a.min(b));
            t1 = t1.min(a.max(b));
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}

/// The convex polygon where `plane` cuts `bbox`, or an empty vector.
pub fn plane_box_polygon(plane: &Plane, bbox: &Aabb, eps: f64) -> Vec<Point3<f64>> {
    let frame = plane.frame();
    let center = plane.project(&bbox.center());
    let half = bbox.diagonal().max(1.0) * 2.0;

    let mut polygon: Vec<Point3<f64>> = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
        .iter()
        .map(|&(a, b)| center + frame.u * (a * half) + frame.v * (b * half))
        .collect();

    for face in bbox.face_planes() {
        polygon = clip_convex_polygon(&polygon, &face, eps);
        if polygon.len() < 3 {
            return Vec::new();
        }
    }
    polygon
}

/// Parameter of `p` along segment `a -> b` when it lies strictly inside it.
pub fn point_on_segment_interior(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    eps: f64,
) -> Option<f64> {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= eps * eps {
        return None;
    }
    let t = (p - a).dot(&ab) / len_sq;
    let len = len_sq.sqrt();
    if t * len <= eps || (1.0 - t) * len <= eps {
        return None;
    }
    let closest = a + ab * t;
    if (p - closest).norm() <= eps {
        Some(t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn unit_square() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_fit_plane_recovers_tilted_plane() {
        let normal = Vector3::new(1.0, 2.0, 2.0).normalize();
        let truth = Plane::from_point_normal(&Point3::new(0.0, 0.0, 1.0), normal).unwrap();
        let frame = truth.frame();
        let points: Vec<Point3<f64>> = (0..25)
            .map(|i| frame.to_3d(&Point2::new((i % 5) as f64, (i / 5) as f64)))
            .collect();
        let fit = fit_plane(&points).unwrap();
        assert!(approx_eq(fit.plane.normal.dot(&normal).abs(), 1.0));
        assert!(fit.eigenvalues[0] < 1e-12);
    }

    #[test]
    fn test_fit_plane_rejects_collinear() {
        let points: Vec<Point3<f64>> = (0..10).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        assert!(fit_plane(&points).is_none());
        assert!(fit_plane(&points[..2]).is_none());
    }

    #[test]
    fn test_split_spanning_square() {
        let plane = Plane::new(Vector3::x(), -0.5).unwrap();
        match split_convex_polygon(&unit_square(), &plane, 1e-9) {
            PolygonSplit::Spanning { front, back } => {
                assert_eq!(front.len(), 4);
                assert_eq!(back.len(), 4);
                assert!(approx_eq(polygon_area(&front), 0.5));
                assert!(approx_eq(polygon_area(&back), 0.5));
            }
            other => panic!("Expected spanning split, got {:?}", other),
        }
    }

    #[test]
    fn test_split_touching_edge_is_not_spanning() {
        let plane = Plane::new(Vector3::x(), 0.0).unwrap();
        assert_eq!(
            split_convex_polygon(&unit_square(), &plane, 1e-9),
            PolygonSplit::Front
        );
        let plane = Plane::new(Vector3::z(), 0.0).unwrap();
        assert_eq!(
            split_convex_polygon(&unit_square(), &plane, 1e-9),
            PolygonSplit::Coplanar
        );
    }

    #[test]
    fn test_split_through_vertex() {
        // Diagonal cut through two corners yields two triangles.
        let plane = Plane::new(Vector3::new(1.0, -1.0, 0.0), 0.0).unwrap();
        match split_convex_polygon(&unit_square(), &plane, 1e-9) {
            PolygonSplit::Spanning { front, back } => {
                assert_eq!(front.len(), 3);
                assert_eq!(back.len(), 3);
            }
            other => panic!("Expected spanning split, got {:?}", other),
        }
    }

    #[test]
    fn test_plane_box_polygon_is_cross_section() {
        let bbox = Aabb::new(Point3::origin(), Point3::new(2.0, 1.0, 1.0));
        let plane = Plane::new(Vector3::x(), -1.0).unwrap();
        let polygon = plane_box_polygon(&plane, &bbox, 1e-9);
        assert_eq!(polygon.len(), 4);
        assert!(approx_eq(polygon_area(&polygon), 1.0));

        // A plane on the box boundary keeps the full face.
        let plane = Plane::new(Vector3::z(), 0.0).unwrap();
        let polygon = plane_box_polygon(&plane, &bbox, 1e-9);
        assert!(approx_eq(polygon_area(&polygon), 2.0));

        let outside = Plane::new(Vector3::z(), -5.0).unwrap();
        assert!(plane_box_polygon(&outside, &bbox, 1e-9).is_empty());
    }

    #[test]
    fn test_clip_line_on_box_edge() {
        let bbox = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let (t0, t1) = bbox
            .clip_line(&Point3::new(0.0, 0.0, 0.5), &Vector3::z(), 1e-9)
            .unwrap();
        assert!(approx_eq(t1 - t0, 1.0 + 2e-9));
        assert!(
            bbox.clip_line(&Point3::new(2.0, 0.0, 0.0), &Vector3::z(), 1e-9)
                .is_none()
        );
    }

    #[test]
    fn test_point_in_convex_polygon() {
        let square: Vec<Point2<f64>> = unit_square().iter().map(|p| Point2::new(p.x, p.y)).collect();
        assert!(signed_area_2d(&square) > 0.0);
        assert!(point_in_convex_polygon(&square, &Point2::new(0.5, 0.5), 1e-9));
        assert!(point_in_convex_polygon(&square, &Point2::new(1.0, 0.5), 1e-9));
        assert!(!point_in_convex_polygon(&square, &Point2::new(1.1, 0.5), 1e-9));
    }

    #[test]
    fn test_point_on_segment_interior() {
        let a = Point3::origin();
        let b = Point3::new(2.0, 0.0, 0.0);
        let t = point_on_segment_interior(&Point3::new(0.5, 0.0, 0.0), &a, &b, 1e-9).unwrap();
        assert!(approx_eq(t, 0.25));
        assert!(point_on_segment_interior(&a, &a, &b, 1e-9).is_none());
        assert!(point_on_segment_interior(&Point3::new(1.0, 0.1, 0.0), &a, &b, 1e-9).is_none());
    }
}
