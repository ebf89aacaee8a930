//! Planar group refinement: merging near-duplicate planes.
//!
//! Segmentation often splits one physical plane into several groups. Two
//! groups are compatible when their planes are within an angular tolerance
//! and each group's centroid lies close to the other's plane. Compatible
//! pairs are merged transitively with a union-find, and every merged group
//! is re-fit by least squares on the union of its points.

use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::{debug, info, warn};

use crate::error::{ReconError, ReconResult};
use crate::tracing_ext::OperationTimer;
use crate::types::{PlanarGroup, Point, PointSet, fit_group_plane};

/// Tolerances for merging planar groups.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Maximum angle between two planes to merge them, in degrees.
    /// Default: 10.0
    pub angle_threshold_deg: f64,

    /// Maximum distance from one group's centroid to the other group's plane.
    /// `None` uses the mean of the groups' largest point-to-plane distances.
    /// Default: None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_threshold: Option<f64>,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            angle_threshold_deg: 10.0,
            distance_threshold: None,
        }
    }
}

impl RefineParams {
    /// Create params with explicit tolerances.
    pub fn new(angle_threshold_deg: f64, distance_threshold: f64) -> Self {
        Self {
            angle_threshold_deg,
            distance_threshold: Some(distance_threshold),
        }
    }

    /// Set the angular tolerance in degrees.
    pub fn with_angle_threshold(mut self, degrees: f64) -> Self {
        self.angle_threshold_deg = degrees;
        self
    }

    /// Set the absolute distance tolerance.
    pub fn with_distance_threshold(mut self, distance: f64) -> Self {
        self.distance_threshold = Some(distance);
        self
    }

    /// Check ranges.
    pub fn validate(&self) -> ReconResult<()> {
        if !self.angle_threshold_deg.is_finite()
            || self.angle_threshold_deg < 0.0
            || self.angle_threshold_deg > 90.0
        {
            return Err(ReconError::invalid_parameter(
                "angle_threshold_deg",
                format!("must be in [0, 90], got {}", self.angle_threshold_deg),
            ));
        }
        if let Some(d) = self.distance_threshold
            && (!d.is_finite() || d < 0.0)
        {
            return Err(ReconError::invalid_parameter(
                "distance_threshold",
                format!("must be finite and non-negative, got {}", d),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`refine_planes`].
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementResult {
    /// Refined groups ordered by label.
    pub groups: Vec<PlanarGroup>,
    pub input_groups: usize,
    pub output_groups: usize,
    /// Number of groups absorbed into others.
    pub merges: usize,
    /// Distance tolerance actually used.
    pub distance_threshold: f64,
}

/// Merge compatible planar groups of `point_set`.
///
/// Groups without a plane are carried through unchanged. The output
/// partitions exactly the input members and never has more groups than the
/// input.
///
/// # Errors
///
/// [`ReconError::InsufficientPlanes`] when no group supports a plane.
pub fn refine_planes(point_set: &PointSet, params: &RefineParams) -> ReconResult<RefinementResult> {
    params.validate()?;
    let _timer = OperationTimer::with_context(
        "refine_planes",
        point_set.groups.len(),
        point_set.points.len(),
    );

    let groups = &point_set.groups;
    let points = &point_set.points;
    let usable: Vec<bool> = groups.iter().map(|g| g.plane.is_some()).collect();
    if !usable.iter().any(|&u| u) {
        return Err(ReconError::insufficient_planes(format!(
            "none of the {} planar groups has at least 3 non-collinear points",
            groups.len()
        )));
    }

    let centroids: Vec<Option<Point3<f64>>> = groups.iter().map(|g| g.centroid(points)).collect();
    let distance_threshold = params
        .distance_threshold
        .unwrap_or_else(|| auto_distance_threshold(groups, points));
    let cos_threshold = params.angle_threshold_deg.to_radians().cos();

    debug!(
        groups = groups.len(),
        angle_threshold_deg = params.angle_threshold_deg,
        distance_threshold,
        "Refining planar groups"
    );

    let mut uf = UnionFind::new(groups.len());
    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            let (Some(pi), Some(pj)) = (groups[i].plane, groups[j].plane) else {
                continue;
            };
            let (Some(ci), Some(cj)) = (centroids[i], centroids[j]) else {
                continue;
            };
            // Orientation does not matter for compatibility.
            if pi.normal.dot(&pj.normal).abs() < cos_threshold {
                continue;
            }
            if pi.signed_distance(&cj).abs() < distance_threshold
                && pj.signed_distance(&ci).abs() < distance_threshold
            {
                uf.union(i, j);
            }
        }
    }

    // Clusters keyed by root, in order of their smallest group index.
    let mut cluster_of_root: HashMap<usize, usize> = HashMap::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for i in 0..groups.len() {
        let root = uf.find(i);
        let slot = *cluster_of_root.entry(root).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[slot].push(i);
    }

    let mut refined: Vec<PlanarGroup> = clusters
        .iter()
        .map(|cluster| merge_cluster(cluster, groups, points))
        .collect();
    refined.sort_by_key(|g| g.label);

    let merges = groups.len() - refined.len();
    for group in refined.iter().filter(|g| g.merged_from.len() > 1) {
        debug!(
            label = group.label,
            merged_from = ?group.merged_from,
            points = group.len(),
            "Merged planar groups"
        );
    }
    if usable.iter().filter(|&&u| !u).count() > 0 {
        warn!(
            unusable = usable.iter().filter(|&&u| !u).count(),
            "Some planar groups have no plane and will not produce faces"
        );
    }
    info!(
        input_groups = groups.len(),
        output_groups = refined.len(),
        merges,
        "Plane refinement completed"
    );

    Ok(RefinementResult {
        output_groups: refined.len(),
        input_groups: groups.len(),
        groups: refined,
        merges,
        distance_threshold,
    })
}

fn merge_cluster(cluster: &[usize], groups: &[PlanarGroup], points: &[Point]) -> PlanarGroup {
    if let [single] = cluster {
        return groups[*single].clone();
    }

    let mut members: Vec<usize> = cluster
        .iter()
        .flat_map(|&g| groups[g].members.iter().copied())
        .collect();
    members.sort_unstable();
    members.dedup();

    let mut merged_from: Vec<usize> = cluster
        .iter()
        .flat_map(|&g| groups[g].merged_from.iter().copied())
        .collect();
    merged_from.sort_unstable();
    merged_from.dedup();

    let label = cluster.iter().map(|&g| groups[g].label).min().unwrap_or(0);
    let plane = fit_group_plane(&members, points);

    PlanarGroup {
        label,
        members,
        plane,
        merged_from,
    }
}

/// Mean over groups of the largest member distance to the group's own plane.
fn auto_distance_threshold(groups: &[PlanarGroup], points: &[Point]) -> f64 {
    let maxima: Vec<f64> = groups
        .iter()
        .filter_map(|g| {
            let plane = g.plane?;
            Some(
                g.members
                    .iter()
                    .map(|&i| plane.signed_distance(&points[i].position).abs())
                    .fold(0.0, f64::max),
            )
        })
        .collect();
    if maxima.is_empty() {
        return 0.0;
    }
    let mean = maxima.iter().sum::<f64>() / maxima.len() as f64;
    // Noise-free input still needs room for round-off.
    mean.max(1e-9)
}

// ============================================================================
// Union-find
// ============================================================================

/// Disjoint sets with path compression and union by rank.
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub(crate) fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    pub(crate) fn union(&mut self, x: usize, y: usize) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }
        match self.rank[root_x].cmp(&self.rank[root_y]) {
            std::cmp::Ordering::Less => self.parent[root_x] = root_y,
            std::cmp::Ordering::Greater => self.parent[root_y] = root_x,
            std::cmp::Ordering::Equal => {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    /// A `n x n` grid of labelled points on the plane `z = slope * x + height`.
    fn sheet(label: usize, x0: f64, height: f64, slope: f64, n: usize) -> Vec<Point> {
        let mut pts = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let x = x0 + i as f64 / (n - 1) as f64;
                let y = j as f64 / (n - 1) as f64;
                pts.push(Point::labelled(x, y, height + slope * x, label));
            }
        }
        pts
    }

    #[test]
    fn test_nearly_coplanar_groups_merge() {
        let mut points = sheet(0, 0.0, 0.0, 0.0, 5);
        points.extend(sheet(1, 1.0, 0.0005, 0.0, 5));
        let set = PointSet::from_points(points);

        let result = refine_planes(&set, &RefineParams::new(5.0, 0.01)).unwrap();
        assert_eq!(result.output_groups, 1);
        assert_eq!(result.merges, 1);
        let group = &result.groups[0];
        assert_eq!(group.label, 0);
        assert_eq!(group.merged_from, vec![0, 1]);
        assert_eq!(group.len(), 50);
        assert!(group.plane.unwrap().normal.z.abs() > 0.999);
    }

    #[test]
    fn test_orthogonal_groups_stay_apart() {
        let mut points = sheet(0, 0.0, 0.0, 0.0, 4);
        for p in sheet(1, 0.0, 0.0, 0.0, 4) {
            // Rotate onto the plane x = 0.
            points.push(Point::labelled(0.0, p.position.y, p.position.x, 1));
        }
        let set = PointSet::from_points(points);
        let result = refine_planes(&set, &RefineParams::new(5.0, 0.01)).unwrap();
        assert_eq!(result.output_groups, 2);
        assert_eq!(result.merges, 0);
    }

    #[test]
    fn test_parallel_offset_groups_stay_apart() {
        let mut points = sheet(0, 0.0, 0.0, 0.0, 4);
        points.extend(sheet(1, 0.0, 0.5, 0.0, 4));
        let set = PointSet::from_points(points);
        let result = refine_planes(&set, &RefineParams::new(5.0, 0.01)).unwrap();
        assert_eq!(result.output_groups, 2);
    }

    #[test]
    fn test_merging_is_transitive() {
        // Adjacent sheets each within tolerance of their neighbour.
        let mut points = sheet(0, 0.0, 0.0, 0.0, 4);
        points.extend(sheet(1, 1.0, 0.004, 0.0, 4));
        points.extend(sheet(2, 2.0, 0.008, 0.0, 4));
        let set = PointSet::from_points(points);
        let result = refine_planes(&set, &RefineParams::new(5.0, 0.005)).unwrap();
        assert_eq!(result.output_groups, 1);
        assert_eq!(result.groups[0].merged_from, vec![0, 1, 2]);
    }

    #[test]
    fn test_groups_without_plane_pass_through() {
        let mut points = sheet(0, 0.0, 0.0, 0.0, 4);
        points.push(Point::labelled(9.0, 9.0, 9.0, 5));
        let set = PointSet::from_points(points);
        let result = refine_planes(&set, &RefineParams::default()).unwrap();
        assert_eq!(result.output_groups, 2);
        assert!(result.groups[1].plane.is_none());
        assert_eq!(result.groups[1].members, vec![16]);
    }

    #[test]
    fn test_no_planes_is_an_error() {
        let points = vec![
            Point::labelled(0.0, 0.0, 0.0, 0),
            Point::labelled(1.0, 0.0, 0.0, 0),
        ];
        let set = PointSet::from_points(points);
        let err = refine_planes(&set, &RefineParams::default()).unwrap_err();
        assert!(matches!(err, ReconError::InsufficientPlanes { .. }));
    }

    #[test]
    fn test_invalid_angle_rejected() {
        let set = PointSet::from_points(sheet(0, 0.0, 0.0, 0.0, 3));
        let err = refine_planes(&set, &RefineParams::new(-1.0, 0.01)).unwrap_err();
        assert!(matches!(err, ReconError::InvalidParameter { .. }));
    }

    #[test]
    fn test_merged_normal_follows_point_normals() {
        let mut points: Vec<Point> = sheet(0, 0.0, 0.0, 0.0, 3)
            .into_iter()
            .map(|p| p.with_normal(-Vector3::z()))
            .collect();
        points.extend(
            sheet(1, 1.0, 0.0, 0.0, 3)
                .into_iter()
                .map(|p| p.with_normal(-Vector3::z())),
        );
        let set = PointSet::from_points(points);
        let result = refine_planes(&set, &RefineParams::new(5.0, 0.01)).unwrap();
        assert!(result.groups[0].plane.unwrap().normal.z < -0.99);
    }

    #[test]
    fn test_union_find_chain() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(3, 4);
        assert_eq!(uf.find(0), uf.find(2));
        assert_ne!(uf.find(0), uf.find(3));
    }
}
