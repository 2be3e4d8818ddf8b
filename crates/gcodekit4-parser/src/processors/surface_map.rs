//! A probed surface-height map, kd-tree indexed, with plane-fit
//! prediction between probes.

use gcodekit4_core::Result;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

/// A single probed `(x, y, z)` point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone)]
struct KdNode {
    point: SurfacePoint,
    axis: u8,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

fn build(points: &mut [SurfacePoint], depth: usize) -> Option<Box<KdNode>> {
    if points.is_empty() {
        return None;
    }
    let axis = (depth % 2) as u8;
    points.sort_by(|a, b| {
        let (ka, kb) = if axis == 0 { (a.x, b.x) } else { (a.y, b.y) };
        ka.partial_cmp(&kb).unwrap_or(Ordering::Equal)
    });
    let mid = points.len() / 2;
    let (left, rest) = points.split_at_mut(mid);
    let (median, right) = rest.split_first_mut().expect("non-empty slice has a median");
    Some(Box::new(KdNode {
        point: *median,
        axis,
        left: build(left, depth + 1),
        right: build(right, depth + 1),
    }))
}

struct HeapEntry {
    dist2: f64,
    point: SurfacePoint,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist2 == other.dist2
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2.partial_cmp(&other.dist2).unwrap_or(Ordering::Equal)
    }
}

/// Recursively visit the subtree nearest `(x, y)` first, maintaining a
/// bounded max-heap of the `k` closest points seen so far, pruning the
/// far subtree whenever it cannot contain anything closer than the
/// current worst kept candidate.
fn knn(node: &Option<Box<KdNode>>, x: f64, y: f64, k: usize, heap: &mut BinaryHeap<HeapEntry>) {
    let Some(node) = node else { return };
    let d2 = dist2(&node.point, x, y);
    if heap.len() < k {
        heap.push(HeapEntry { dist2: d2, point: node.point });
    } else if d2 < heap.peek().map(|e| e.dist2).unwrap_or(f64::INFINITY) {
        heap.pop();
        heap.push(HeapEntry { dist2: d2, point: node.point });
    }

    let diff = if node.axis == 0 { x - node.point.x } else { y - node.point.y };
    let (near, far) = if diff <= 0.0 { (&node.left, &node.right) } else { (&node.right, &node.left) };
    knn(near, x, y, k, heap);
    if heap.len() < k || diff.powi(2) < heap.peek().map(|e| e.dist2).unwrap_or(f64::INFINITY) {
        knn(far, x, y, k, heap);
    }
}

/// A probed surface-level map: a kd-tree over the probe points'
/// `(x, y)` coordinates, supporting exact-hit lookup and plane-fit
/// interpolation for points between probes.
#[derive(Debug, Clone)]
pub struct SurfaceMap {
    root: Option<Box<KdNode>>,
    len: usize,
    /// Minimum spacing between probe points; also the recommended
    /// `MoveSplitter` segment length when autoleveling.
    pub min_spacing: f64,
}

#[derive(Deserialize)]
struct SurfaceMapDoc {
    #[serde(rename = "minSpacing")]
    min_spacing: f64,
    points: Vec<[f64; 3]>,
}

impl SurfaceMap {
    /// Build a map directly from a point list.
    pub fn from_points(mut points: Vec<SurfacePoint>, min_spacing: f64) -> Self {
        let len = points.len();
        let root = build(&mut points, 0);
        Self { root, len, min_spacing }
    }

    /// Load a surface-map JSON document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let doc: SurfaceMapDoc = serde_json::from_str(&text)?;
        let points = doc
            .points
            .into_iter()
            .map(|p| SurfacePoint { x: p[0], y: p[1], z: p[2] })
            .collect();
        Ok(Self::from_points(points, doc.min_spacing))
    }

    /// The `k` probe points nearest `(x, y)`, nearest first. `k` is
    /// clamped to the number of probed points.
    fn k_nearest(&self, x: f64, y: f64, k: usize) -> Vec<SurfacePoint> {
        let mut heap = BinaryHeap::new();
        knn(&self.root, x, y, k.min(self.len), &mut heap);
        let mut out: Vec<SurfacePoint> = heap.into_iter().map(|e| e.point).collect();
        out.sort_by(|a, b| dist2(a, x, y).partial_cmp(&dist2(b, x, y)).unwrap_or(Ordering::Equal));
        out
    }

    /// Predict the surface Z at `(x, y)`. Returns the exact probed Z on an
    /// exact-position hit, otherwise fits a plane through the nearest
    /// non-degenerate triple of probe points (widening the candidate set
    /// until one is found), falling back to two-point collinear
    /// interpolation when no valid triple exists.
    pub fn predict_z(&self, x: f64, y: f64) -> Option<f64> {
        if let Some(nearest) = self.k_nearest(x, y, 1).first() {
            if (nearest.x - x).abs() < 1e-9 && (nearest.y - y).abs() < 1e-9 {
                return Some(nearest.z);
            }
        }

        if self.len < 2 {
            return None;
        }

        for k in 3..=self.len {
            let candidates = self.k_nearest(x, y, k);
            let refs: Vec<&SurfacePoint> = candidates.iter().collect();
            if let Some(z) = plane_predict(&refs, x, y) {
                return Some(z);
            }
        }

        let candidates = self.k_nearest(x, y, self.len);
        let refs: Vec<&SurfacePoint> = candidates.iter().collect();
        collinear_predict(&refs, x, y)
    }
}

fn dist2(p: &SurfacePoint, x: f64, y: f64) -> f64 {
    (p.x - x).powi(2) + (p.y - y).powi(2)
}

/// Find the first non-collinear, non-XY-orthogonal triple among
/// `points` and evaluate the plane it defines at `(x, y)`.
fn plane_predict(points: &[&SurfacePoint], x: f64, y: f64) -> Option<f64> {
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            for k in (j + 1)..points.len() {
                let (a, b, c) = (points[i], points[j], points[k]);
                let v1 = (b.x - a.x, b.y - a.y, b.z - a.z);
                let v2 = (c.x - a.x, c.y - a.y, c.z - a.z);
                let normal = (
                    v1.1 * v2.2 - v1.2 * v2.1,
                    v1.2 * v2.0 - v1.0 * v2.2,
                    v1.0 * v2.1 - v1.1 * v2.0,
                );
                let degenerate = (normal.0.abs() < 1e-9 && normal.1.abs() < 1e-9)
                    || normal.2.abs() < 1e-9;
                if degenerate {
                    continue;
                }
                let z = a.z - (normal.0 * (x - a.x) + normal.1 * (y - a.y)) / normal.2;
                return Some(z);
            }
        }
    }
    None
}

fn collinear_predict(points: &[&SurfacePoint], x: f64, y: f64) -> Option<f64> {
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let (a, b) = (points[i], points[j]);
            let dx = b.x - a.x;
            let dy = b.y - a.y;
            if dx.abs() < 1e-9 && dy.abs() < 1e-9 {
                continue;
            }
            let cross = dx * (y - a.y) - dy * (x - a.x);
            if cross.abs() > 1e-6 {
                continue;
            }
            let t = if dx.abs() > dy.abs() { (x - a.x) / dx } else { (y - a.y) / dy };
            return Some(a.z + t * (b.z - a.z));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_hit_returns_probed_z() {
        let map = SurfaceMap::from_points(
            vec![
                SurfacePoint { x: 0.0, y: 0.0, z: 0.0 },
                SurfacePoint { x: 10.0, y: 0.0, z: 1.0 },
                SurfacePoint { x: 0.0, y: 10.0, z: -1.0 },
            ],
            5.0,
        );
        assert_eq!(map.predict_z(10.0, 0.0), Some(1.0));
    }

    #[test]
    fn plane_prediction_matches_scenario() {
        let map = SurfaceMap::from_points(
            vec![
                SurfacePoint { x: 0.0, y: 0.0, z: 0.0 },
                SurfacePoint { x: 10.0, y: 0.0, z: 1.0 },
                SurfacePoint { x: 0.0, y: 10.0, z: -1.0 },
            ],
            5.0,
        );
        let z = map.predict_z(5.0, 5.0).unwrap();
        assert!((z - 0.0).abs() < 1e-6);
    }

    #[test]
    fn flat_plane_predicts_constant_z() {
        let map = SurfaceMap::from_points(
            vec![
                SurfacePoint { x: 0.0, y: 0.0, z: 2.0 },
                SurfacePoint { x: 10.0, y: 0.0, z: 2.0 },
                SurfacePoint { x: 0.0, y: 10.0, z: 2.0 },
            ],
            5.0,
        );
        let z = map.predict_z(3.0, 4.0).unwrap();
        assert!((z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn insufficient_data_returns_none() {
        let map = SurfaceMap::from_points(vec![SurfacePoint { x: 0.0, y: 0.0, z: 1.0 }], 5.0);
        assert_eq!(map.predict_z(5.0, 5.0), None);
    }

    #[test]
    fn k_nearest_returns_closest_points_in_order() {
        let map = SurfaceMap::from_points(
            vec![
                SurfacePoint { x: 0.0, y: 0.0, z: 0.0 },
                SurfacePoint { x: 1.0, y: 0.0, z: 0.0 },
                SurfacePoint { x: 5.0, y: 0.0, z: 0.0 },
                SurfacePoint { x: 9.0, y: 0.0, z: 0.0 },
            ],
            1.0,
        );
        let nearest = map.k_nearest(2.0, 0.0, 2);
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].x, 1.0);
        assert_eq!(nearest[1].x, 0.0);
    }
}
