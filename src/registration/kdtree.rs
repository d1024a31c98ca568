//! Static 3-D k-d tree for nearest-neighbour correspondence search.
//!
//! Built once per registration call from the fixed point set and only read afterwards,
//! so a single tree can be shared across rayon workers.

use nalgebra::Point3;

#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<Point3<f64>>,
}

#[derive(Debug, Clone)]
struct KdNode {
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    split_dim: usize,
}

/// Result of a nearest-neighbour query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance_sq: f64,
}

impl KdTree {
    /// Median-split build. Returns `None` for an empty point set.
    pub fn build(points: &[Point3<f64>]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let points = points.to_vec();
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());

        Self::build_recursive(&points, &mut indices, 0, &mut nodes);

        Some(Self { nodes, points })
    }

    fn build_recursive(
        points: &[Point3<f64>],
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }

        let split_dim = depth % 3;

        // stable on ties so the layout only depends on input order
        indices.sort_by(|&a, &b| {
            points[a][split_dim]
                .total_cmp(&points[b][split_dim])
                .then(a.cmp(&b))
        });

        let median = indices.len() / 2;
        let point_idx = indices[median];

        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx,
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let right_indices = &mut right_part[1..];

        let left = Self::build_recursive(points, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, right_indices, depth + 1, nodes);

        nodes[node_idx].left = left;
        nodes[node_idx].right = right;

        Some(node_idx)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> &Point3<f64> {
        &self.points[index]
    }

    /// Closest stored point to `query`. On equal distances the first point reached by the
    /// (fixed) traversal order is kept.
    pub fn nearest(&self, query: &Point3<f64>) -> Nearest {
        let mut best = Nearest {
            index: self.nodes[0].point_idx,
            distance_sq: f64::INFINITY,
        };
        self.nearest_recursive(0, query, &mut best);
        best
    }

    fn nearest_recursive(&self, node_idx: usize, query: &Point3<f64>, best: &mut Nearest) {
        let node = &self.nodes[node_idx];
        let point = &self.points[node.point_idx];

        let dist_sq = (point - query).norm_squared();
        if dist_sq < best.distance_sq {
            best.distance_sq = dist_sq;
            best.index = node.point_idx;
        }

        let diff = query[node.split_dim] - point[node.split_dim];
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(first_idx) = first {
            self.nearest_recursive(first_idx, query, best);
        }

        // equal coordinates on the split axis may sit on either side
        if let Some(second_idx) = second {
            if diff * diff <= best.distance_sq {
                self.nearest_recursive(second_idx, query, best);
            }
        }
    }
}
