//! Quadric error metric edge-collapse simplification.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3, Vector4};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{Error, Result, Stage};
use crate::io::mesh::Mesh;

/// Sum of squared distances to a set of planes, as `vᵀ Q v` with `v = (x, y, z, 1)`.
#[derive(Debug, Clone, Copy)]
struct Quadric(Matrix4<f64>);

impl Quadric {
    fn zero() -> Self {
        Quadric(Matrix4::zeros())
    }

    /// Plane through `p` with unit normal `n`.
    fn from_plane(n: &Vector3<f64>, p: &Point3<f64>) -> Self {
        let plane = Vector4::new(n.x, n.y, n.z, -n.dot(&p.coords));
        Quadric(plane * plane.transpose())
    }

    fn add(&self, other: &Self) -> Self {
        Quadric(self.0 + other.0)
    }

    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let v = p.to_homogeneous();
        (v.transpose() * self.0 * v)[(0, 0)].max(0.0)
    }

    /// Minimiser of the quadric, `None` when the 3x3 part is (near) singular.
    fn optimal_point(&self) -> Option<Point3<f64>> {
        let a: Matrix3<f64> = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        if a.determinant().abs() < 1e-10 {
            return None;
        }
        let b = -self.0.fixed_view::<3, 1>(0, 3).into_owned();
        a.try_inverse().map(|inv| Point3::from(inv * b))
    }
}

#[derive(Debug, Clone)]
struct Collapse {
    cost: f64,
    v1: usize,
    v2: usize,
    target: Point3<f64>,
    stamp: (u32, u32),
}

impl PartialEq for Collapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collapse {
    // reversed: BinaryHeap pops the cheapest collapse, ties by vertex ids
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.v1.cmp(&self.v1))
            .then_with(|| other.v2.cmp(&self.v2))
    }
}

/// Counters of one simplification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyStats {
    pub original_triangles: usize,
    pub target_triangles: usize,
    pub final_triangles: usize,
    pub collapses: usize,
    pub rejected: usize,
}

/// Removes roughly `target_reduction` of the triangles of `mesh` by quadric-guided edge
/// collapses, cheapest first.
///
/// Coincident vertices are welded first. A collapse is skipped when either end lies on the
/// boundary, when it would make the surface non-manifold or duplicate a face, or when it
/// would flip a surviving face. Normals are recomputed if the input carried them.
pub fn simplify(mesh: &Mesh, target_reduction: f64) -> Result<Mesh> {
    simplify_with_stats(mesh, target_reduction).map(|(mesh, _)| mesh)
}

pub fn simplify_with_stats(mesh: &Mesh, target_reduction: f64) -> Result<(Mesh, SimplifyStats)> {
    if !(0.0..1.0).contains(&target_reduction) {
        return Err(Error::invalid_parameter(
            Stage::Simplification,
            format!(
                "target reduction fraction must lie in [0, 1), got {}",
                target_reduction
            ),
        ));
    }

    let original = mesh.triangle_count();
    if target_reduction == 0.0 || original == 0 {
        let stats = SimplifyStats {
            original_triangles: original,
            target_triangles: original,
            final_triangles: original,
            ..SimplifyStats::default()
        };
        return Ok((mesh.clone(), stats));
    }

    let target = (original as f64 * (1.0 - target_reduction)).round() as usize;
    info!(original, target, "Simplifying mesh");

    let (vertices, faces) = weld_vertices(mesh.vertices(), mesh.triangles());
    let mut state = CollapseState::new(vertices, faces);
    let (collapses, rejected) = state.run(target);

    let (vertices, triangles) = state.into_compact();
    let final_triangles = triangles.len();
    let mut out = Mesh::from_parts(vertices, triangles, None);
    if mesh.normals().is_some() {
        let normals = out.compute_vertex_normals();
        out = Mesh::from_parts(out.vertices().to_vec(), out.triangles().to_vec(), Some(normals));
    }

    info!(
        original,
        target,
        final_triangles,
        collapses,
        rejected,
        "Simplification complete"
    );

    Ok((
        out,
        SimplifyStats {
            original_triangles: original,
            target_triangles: target,
            final_triangles,
            collapses,
            rejected,
        },
    ))
}

/// Merges vertices with bit-identical coordinates and drops faces that become degenerate.
pub(crate) fn weld_vertices(
    vertices: &[Point3<f64>],
    triangles: &[[usize; 3]],
) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let mut lookup: HashMap<[u64; 3], usize> = HashMap::new();
    let mut welded = Vec::new();
    let remap: Vec<usize> = vertices
        .iter()
        .map(|p| {
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            *lookup.entry(key).or_insert_with(|| {
                welded.push(*p);
                welded.len() - 1
            })
        })
        .collect();

    let faces = triangles
        .iter()
        .map(|t| [remap[t[0]], remap[t[1]], remap[t[2]]])
        .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
        .collect();
    (welded, faces)
}

struct CollapseState {
    positions: Vec<Point3<f64>>,
    quadrics: Vec<Quadric>,
    removed: Vec<bool>,
    locked: Vec<bool>,
    versions: Vec<u32>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    active: usize,
    heap: BinaryHeap<Collapse>,
}

impl CollapseState {
    fn new(positions: Vec<Point3<f64>>, faces: Vec<[usize; 3]>) -> Self {
        let n = positions.len();
        let mut quadrics = vec![Quadric::zero(); n];
        let mut vertex_faces = vec![Vec::new(); n];
        let mut edge_use: HashMap<(usize, usize), usize> = HashMap::new();

        for (f, tri) in faces.iter().enumerate() {
            let p0 = positions[tri[0]];
            let normal = (positions[tri[1]] - p0).cross(&(positions[tri[2]] - p0));
            let len = normal.norm();
            if len > 1e-12 {
                let q = Quadric::from_plane(&(normal / len), &p0);
                for &v in tri {
                    quadrics[v] = quadrics[v].add(&q);
                }
            }
            for k in 0..3 {
                vertex_faces[tri[k]].push(f);
                *edge_use.entry(edge(tri[k], tri[(k + 1) % 3])).or_default() += 1;
            }
        }

        // open or non-manifold edges pin both endpoints
        let mut locked = vec![false; n];
        for (&(a, b), &count) in &edge_use {
            if count != 2 {
                locked[a] = true;
                locked[b] = true;
            }
        }

        let active = faces.len();
        let mut state = Self {
            positions,
            quadrics,
            removed: vec![false; n],
            locked,
            versions: vec![0; n],
            face_alive: vec![true; faces.len()],
            faces,
            vertex_faces,
            active,
            heap: BinaryHeap::new(),
        };

        let mut edges: Vec<(usize, usize)> = edge_use.into_keys().collect();
        edges.sort_unstable();
        for (a, b) in edges {
            state.push_candidate(a, b);
        }
        state
    }

    fn push_candidate(&mut self, v1: usize, v2: usize) {
        if self.locked[v1] || self.locked[v2] {
            return;
        }
        let q = self.quadrics[v1].add(&self.quadrics[v2]);
        let (p1, p2) = (self.positions[v1], self.positions[v2]);
        let mid = Point3::from((p1.coords + p2.coords) * 0.5);

        // a far-away minimiser of a nearly flat quadric is not worth trusting
        let reach = (p2 - p1).norm() * 2.0;
        let mut candidates = vec![mid, p1, p2];
        if let Some(opt) = q.optimal_point() {
            if (opt - mid).norm() <= reach {
                candidates.insert(0, opt);
            }
        }
        let (target, cost) = candidates
            .into_iter()
            .map(|p| (p, q.evaluate(&p)))
            .fold((mid, f64::INFINITY), |best, cur| {
                if cur.1 < best.1 {
                    cur
                } else {
                    best
                }
            });

        self.heap.push(Collapse {
            cost,
            v1,
            v2,
            target,
            stamp: (self.versions[v1], self.versions[v2]),
        });
    }

    fn alive_faces(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.vertex_faces[v]
            .iter()
            .copied()
            .filter(move |&f| self.face_alive[f])
    }

    fn neighbours(&self, v: usize) -> HashSet<usize> {
        self.alive_faces(v)
            .flat_map(|f| self.faces[f])
            .filter(|&u| u != v)
            .collect()
    }

    fn run(&mut self, target: usize) -> (usize, usize) {
        let mut collapses = 0;
        let mut rejected = 0;

        while self.active > target {
            let Some(c) = self.heap.pop() else {
                break;
            };
            if self.removed[c.v1]
                || self.removed[c.v2]
                || c.stamp != (self.versions[c.v1], self.versions[c.v2])
            {
                continue;
            }
            if !self.is_valid(c.v1, c.v2, &c.target) {
                rejected += 1;
                continue;
            }
            self.collapse(c.v1, c.v2, c.target);
            collapses += 1;
        }

        debug!(
            remaining = self.active,
            queued = self.heap.len(),
            "Collapse loop stopped"
        );
        (collapses, rejected)
    }

    fn is_valid(&self, v1: usize, v2: usize, target: &Point3<f64>) -> bool {
        let shared: Vec<usize> = self
            .alive_faces(v1)
            .filter(|&f| self.faces[f].contains(&v2))
            .collect();
        if shared.len() != 2 {
            return false;
        }

        // link condition: the only common neighbours are the two opposite corners
        let n1 = self.neighbours(v1);
        let n2 = self.neighbours(v2);
        if n1.intersection(&n2).count() != shared.len() {
            return false;
        }

        let mut existing: HashSet<[usize; 3]> = HashSet::new();
        for f in self.alive_faces(v1) {
            if !shared.contains(&f) {
                existing.insert(sorted(self.faces[f]));
            }
        }

        for v in [v1, v2] {
            for f in self.alive_faces(v) {
                if shared.contains(&f) {
                    continue;
                }
                let tri = self.faces[f];
                let before = self.normal_of(tri, None);
                let moved = tri.map(|u| if u == v1 || u == v2 { v1 } else { u });
                let after = self.normal_of(moved, Some((v1, target)));

                if after.norm_squared() <= f64::EPSILON * before.norm_squared()
                    || before.dot(&after) < 0.0
                {
                    return false;
                }
                if v == v2 && existing.contains(&sorted(moved)) {
                    return false;
                }
            }
        }
        true
    }

    fn normal_of(&self, tri: [usize; 3], moved: Option<(usize, &Point3<f64>)>) -> Vector3<f64> {
        let pos = |u: usize| match moved {
            Some((m, p)) if m == u => *p,
            _ => self.positions[u],
        };
        let p0 = pos(tri[0]);
        (pos(tri[1]) - p0).cross(&(pos(tri[2]) - p0))
    }

    fn collapse(&mut self, v1: usize, v2: usize, target: Point3<f64>) {
        self.positions[v1] = target;
        self.quadrics[v1] = self.quadrics[v1].add(&self.quadrics[v2]);
        self.removed[v2] = true;
        self.versions[v1] += 1;
        self.versions[v2] += 1;

        let v2_faces = std::mem::take(&mut self.vertex_faces[v2]);
        for f in v2_faces {
            if !self.face_alive[f] {
                continue;
            }
            if self.faces[f].contains(&v1) {
                self.face_alive[f] = false;
                self.active -= 1;
            } else {
                for u in self.faces[f].iter_mut() {
                    if *u == v2 {
                        *u = v1;
                    }
                }
                self.vertex_faces[v1].push(f);
            }
        }
        self.vertex_faces[v1].retain(|&f| self.face_alive[f]);

        let mut ring: Vec<usize> = self.neighbours(v1).into_iter().collect();
        ring.sort_unstable();
        for n in ring {
            let (a, b) = edge(v1, n);
            self.push_candidate(a, b);
        }
    }

    fn into_compact(self) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let mut remap = vec![usize::MAX; self.positions.len()];
        let mut vertices = Vec::new();
        for (v, p) in self.positions.iter().enumerate() {
            if !self.removed[v] {
                remap[v] = vertices.len();
                vertices.push(*p);
            }
        }
        let triangles = self
            .faces
            .iter()
            .zip(self.face_alive.iter())
            .filter(|(_, alive)| **alive)
            .map(|(t, _)| t.map(|u| remap[u]))
            .collect();
        (vertices, triangles)
    }
}

fn edge(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn sorted(mut t: [usize; 3]) -> [usize; 3] {
    t.sort_unstable();
    t
}

#[cfg(test)]
mod decimation_tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::processing::marching_cubes::extract_isosurface;
    use crate::utils::test_utils::{sphere_distance_volume, unit_tetrahedron};

    fn sphere_mesh() -> Mesh {
        let vol = sphere_distance_volume([25, 25, 25], 1.0, Point3::new(12.0, 12.0, 12.0), 8.0);
        extract_isosurface(&vol, 0.0, true).unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let mesh = unit_tetrahedron();
        for bad in [-0.1, 1.0, 1.5, f64::NAN] {
            let err = simplify(&mesh, bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }
    }

    #[test]
    fn test_zero_fraction_is_noop() -> anyhow::Result<()> {
        let mesh = sphere_mesh();
        let out = simplify(&mesh, 0.0)?;
        assert_eq!(out.triangle_count(), mesh.triangle_count());
        assert_eq!(out, mesh);
        Ok(())
    }

    #[test]
    fn test_tetrahedron_cannot_collapse() -> anyhow::Result<()> {
        let mesh = unit_tetrahedron();
        let (out, stats) = simplify_with_stats(&mesh, 0.5)?;
        assert_eq!(out.triangle_count(), 4);
        assert_eq!(stats.collapses, 0);
        Ok(())
    }

    #[test]
    fn test_heavy_reduction_on_sphere() -> anyhow::Result<()> {
        let mesh = sphere_mesh();
        let f = mesh.triangle_count();
        let (out, stats) = simplify_with_stats(&mesh, 0.9)?;

        let slack = std::cmp::max(2, f / 50);
        let limit = (f as f64 * 0.1).ceil() as usize + slack;
        assert!(
            out.triangle_count() <= limit,
            "{} triangles left of {} (limit {})",
            out.triangle_count(),
            f,
            limit
        );
        assert_eq!(stats.final_triangles, out.triangle_count());
        assert!(out.normals().is_some());

        // still a closed surface near the sphere
        let center = Point3::new(12.0, 12.0, 12.0);
        for p in out.vertices() {
            assert!(((p - center).norm() - 8.0).abs() < 1.5);
        }
        let mut balance: HashMap<(usize, usize), i64> = HashMap::new();
        for t in out.triangles() {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                *balance.entry(edge(a, b)).or_default() += if a < b { 1 } else { -1 };
            }
        }
        assert!(balance.values().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_half_reduction_is_close_to_target() -> anyhow::Result<()> {
        let mesh = sphere_mesh();
        let f = mesh.triangle_count();
        let out = simplify(&mesh, 0.5)?;
        let target = (f as f64 * 0.5).round() as usize;
        assert!(out.triangle_count() <= target + 1);
        assert!(out.triangle_count() + 2 >= target);
        Ok(())
    }

    #[test]
    fn test_open_grid_keeps_boundary() -> anyhow::Result<()> {
        // 6x6 vertex planar grid
        let n = 6;
        let mut vertices = Vec::new();
        for j in 0..n {
            for i in 0..n {
                vertices.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let mut triangles = Vec::new();
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let a = i + n * j;
                triangles.push([a, a + 1, a + n + 1]);
                triangles.push([a, a + n + 1, a + n]);
            }
        }
        let mesh = Mesh::new(vertices, triangles)?;
        let out = simplify(&mesh, 0.6)?;
        assert!(out.triangle_count() < mesh.triangle_count());

        // corners and edge points survive unmoved
        for corner in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(0.0, 5.0, 0.0),
            Point3::new(5.0, 5.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ] {
            assert!(out.vertices().contains(&corner));
        }
        for t in 0..out.triangle_count() {
            assert!(out.face_normal(t).z > 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_weld_merges_coincident_vertices() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        let triangles = vec![[0, 1, 2], [3, 5, 4], [0, 1, 3]];
        let (welded, faces) = weld_vertices(&vertices, &triangles);
        assert_eq!(welded.len(), 4);
        assert_eq!(faces, vec![[0, 1, 2], [1, 3, 2]]);
    }
}
