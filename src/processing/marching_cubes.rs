//! Marching cubes isosurface extraction.
//!
//! The triangulation table is derived once from the cube topology instead of being written
//! out by hand: every face of a cell is walked counter-clockwise (seen from outside the
//! cell) and each run of inside corners contributes one segment from the crossing where the
//! run starts to the crossing where it ends. Faces with four crossings therefore always
//! separate the inside corners, and since both cells sharing a face see the same corners the
//! two decisions agree. The segments close into loops. Each loop is split into triangles
//! whose interior diagonals never lie on a cell face, so every face segment ends up in exactly
//! two triangles, one per cell.
//!
//! A corner is inside when its value is strictly greater than the iso-value. A crossing that
//! lands exactly on a grid sample is keyed by that sample, so all cells touching it share one
//! vertex, and triangles collapsed by that welding are dropped.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::{Error, Result, Stage};
use crate::io::mesh::Mesh;
use crate::io::volume::ScalarVolume;

/// Corner offsets of a cell, indexed by corner number.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Corner pairs of the twelve cell edges.
const EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Cell faces, corners counter-clockwise seen from outside the cell.
const FACES: [[usize; 4]; 6] = [
    [0, 3, 2, 1], // z = 0
    [4, 5, 6, 7], // z = 1
    [0, 1, 5, 4], // y = 0
    [3, 7, 6, 2], // y = 1
    [0, 4, 7, 3], // x = 0
    [1, 2, 6, 5], // x = 1
];

type CaseTable = Vec<Vec<[u8; 3]>>;

fn edge_between(a: usize, b: usize) -> usize {
    EDGES
        .iter()
        .position(|e| (e[0] == a && e[1] == b) || (e[0] == b && e[1] == a))
        .unwrap_or(usize::MAX)
}

/// Bit mask of the faces containing `edge`.
fn faces_of_edge(edge: usize) -> u8 {
    let [a, b] = EDGES[edge];
    FACES
        .iter()
        .enumerate()
        .filter(|(_, face)| face.contains(&a) && face.contains(&b))
        .fold(0u8, |mask, (f, _)| mask | (1 << f))
}

fn share_face(a: u8, b: u8) -> bool {
    faces_of_edge(a as usize) & faces_of_edge(b as usize) != 0
}

/// Triangulates the crossing loop `poly`, keeping its winding, without any diagonal that
/// joins two crossings of the same cell face.
fn triangulate_loop(poly: &[u8]) -> Option<Vec<[u8; 3]>> {
    let n = poly.len();
    match n {
        0..=2 => return Some(Vec::new()),
        3 => return Some(vec![[poly[0], poly[1], poly[2]]]),
        _ => {}
    }
    let (a, b) = (poly[0], poly[1]);
    for k in 2..n {
        let c = poly[k];
        if (k != 2 && share_face(b, c)) || (k != n - 1 && share_face(c, a)) {
            continue;
        }
        let mut right = vec![a];
        right.extend_from_slice(&poly[k..]);
        if let (Some(left), Some(right)) =
            (triangulate_loop(&poly[1..=k]), triangulate_loop(&right))
        {
            let mut triangles = vec![[a, b, c]];
            triangles.extend(left);
            triangles.extend(right);
            return Some(triangles);
        }
    }
    None
}

fn triangulate_case(mask: u8) -> Vec<[u8; 3]> {
    let inside = |c: usize| mask & (1 << c) != 0;

    // next[e] = crossing that follows crossing `e` along the surface boundary in a face
    let mut next: [Option<usize>; 12] = [None; 12];
    for face in FACES.iter() {
        let mut entry: Option<usize> = None;
        let mut pending_exit: Option<usize> = None;
        for n in 0..4 {
            let a = face[n];
            let b = face[(n + 1) % 4];
            match (inside(a), inside(b)) {
                (false, true) => entry = Some(edge_between(a, b)),
                (true, false) => {
                    let exit = edge_between(a, b);
                    match entry.take() {
                        Some(e) => next[e] = Some(exit),
                        // run wraps around the start of the walk
                        None => pending_exit = Some(exit),
                    }
                }
                _ => {}
            }
        }
        if let (Some(e), Some(exit)) = (entry, pending_exit) {
            next[e] = Some(exit);
        }
    }

    let mut triangles = Vec::new();
    let mut visited = [false; 12];
    for start in 0..12 {
        if visited[start] || next[start].is_none() {
            continue;
        }
        let mut lp = Vec::new();
        let mut cur = start;
        while !visited[cur] {
            visited[cur] = true;
            lp.push(cur as u8);
            match next[cur] {
                Some(n) => cur = n,
                None => break,
            }
        }
        match triangulate_loop(&lp) {
            Some(tris) => triangles.extend(tris),
            None => {
                // no loop of the 256 cases gets here; fan as a last resort
                for i in 1..lp.len().saturating_sub(1) {
                    triangles.push([lp[0], lp[i], lp[i + 1]]);
                }
            }
        }
    }
    triangles
}

fn case_table() -> &'static CaseTable {
    static TABLE: OnceLock<CaseTable> = OnceLock::new();
    TABLE.get_or_init(|| (0..=255u8).map(triangulate_case).collect())
}

/// Extracts the `iso_value` isosurface of `volume` as an indexed triangle mesh.
///
/// Vertices on shared cell edges are emitted once. Triangles wind counter-clockwise seen
/// from the region with values `<= iso_value`; when `compute_normals` is set the vertex
/// normals are the normalised negative field gradient, so both point the same way.
///
/// Returns an empty mesh when no cell crosses the iso-value.
pub fn extract_isosurface(
    volume: &ScalarVolume,
    iso_value: f32,
    compute_normals: bool,
) -> Result<Mesh> {
    let [nx, ny, nz] = volume.dims();
    if nx < 2 || ny < 2 || nz < 2 {
        return Err(Error::empty_volume(
            Stage::Isosurface,
            format!(
                "volume needs at least 2 samples per axis, got {}x{}x{}",
                nx, ny, nz
            ),
        ));
    }

    info!(
        dims = ?volume.dims(),
        iso_value,
        compute_normals,
        "Extracting isosurface"
    );

    let table = case_table();
    let slabs: Vec<SlabMesh> = (0..nz - 1)
        .into_par_iter()
        .map(|k| extract_slab(volume, iso_value, compute_normals, table, k))
        .collect();

    // merge in slab order so vertex numbering does not depend on scheduling
    let mut global: HashMap<u64, usize> = HashMap::new();
    let mut vertices = Vec::new();
    let mut normals = Vec::new();
    let mut triangles = Vec::new();
    for slab in slabs {
        let remap: Vec<usize> = slab
            .keys
            .iter()
            .enumerate()
            .map(|(local, key)| {
                *global.entry(*key).or_insert_with(|| {
                    vertices.push(slab.positions[local]);
                    if compute_normals {
                        normals.push(slab.normals[local]);
                    }
                    vertices.len() - 1
                })
            })
            .collect();
        triangles.extend(
            slab.triangles
                .iter()
                .map(|t| [remap[t[0]], remap[t[1]], remap[t[2]]]),
        );
    }

    info!(
        vertices = vertices.len(),
        triangles = triangles.len(),
        "Isosurface extracted"
    );

    let normals = compute_normals.then_some(normals);
    Ok(Mesh::from_parts(vertices, triangles, normals))
}

#[derive(Default)]
struct SlabMesh {
    keys: Vec<u64>,
    positions: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
    triangles: Vec<[usize; 3]>,
}

fn extract_slab(
    volume: &ScalarVolume,
    iso: f32,
    compute_normals: bool,
    table: &CaseTable,
    k: usize,
) -> SlabMesh {
    let [nx, ny, _] = volume.dims();
    let mut slab = SlabMesh::default();
    let mut local: HashMap<u64, usize> = HashMap::new();

    for j in 0..ny - 1 {
        for i in 0..nx - 1 {
            let mut mask = 0u8;
            for (c, off) in CORNERS.iter().enumerate() {
                if volume.get(i + off[0], j + off[1], k + off[2]) > iso {
                    mask |= 1 << c;
                }
            }
            let triangles = &table[mask as usize];
            if triangles.is_empty() {
                continue;
            }

            for tri in triangles {
                let mut out = [0usize; 3];
                for (slot, &edge) in out.iter_mut().zip(tri.iter()) {
                    let (lo, hi) = edge_corners([i, j, k], edge as usize);
                    let t = crossing_parameter(volume, iso, lo, hi);
                    let key = crossing_key(volume, lo, hi, t);
                    *slot = *local.entry(key).or_insert_with(|| {
                        let (p, n) = interpolate_crossing(volume, lo, hi, t, compute_normals);
                        slab.keys.push(key);
                        slab.positions.push(p);
                        if compute_normals {
                            slab.normals.push(n);
                        }
                        slab.positions.len() - 1
                    });
                }
                // collapsed onto a grid sample
                if out[0] == out[1] || out[1] == out[2] || out[2] == out[0] {
                    continue;
                }
                slab.triangles.push(out);
            }
        }
    }

    debug!(
        slab = k,
        vertices = slab.positions.len(),
        triangles = slab.triangles.len(),
        "Slab done"
    );
    slab
}

/// Grid corners of a cell edge, lower corner first.
fn edge_corners(cell: [usize; 3], edge: usize) -> ([usize; 3], [usize; 3]) {
    let [a, b] = EDGES[edge];
    let pa = add(cell, CORNERS[a]);
    let pb = add(cell, CORNERS[b]);
    if pa <= pb {
        (pa, pb)
    } else {
        (pb, pa)
    }
}

fn add(a: [usize; 3], b: [usize; 3]) -> [usize; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Position of the crossing along `lo -> hi`, in `[0, 1]`.
fn crossing_parameter(volume: &ScalarVolume, iso: f32, lo: [usize; 3], hi: [usize; 3]) -> f64 {
    let va = volume.get(lo[0], lo[1], lo[2]) as f64;
    let vb = volume.get(hi[0], hi[1], hi[2]) as f64;
    let denom = vb - va;
    if denom.abs() > f64::EPSILON {
        ((iso as f64 - va) / denom).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Global vertex key. Edge crossings use `3 * sample + axis`; crossings sitting exactly on a
/// sample use `3 * len + sample`, shared by every edge through that sample.
fn crossing_key(volume: &ScalarVolume, lo: [usize; 3], hi: [usize; 3], t: f64) -> u64 {
    let sample = |p: [usize; 3]| volume.index(p[0], p[1], p[2]);
    if t == 0.0 {
        (3 * volume.len() + sample(lo)) as u64
    } else if t == 1.0 {
        (3 * volume.len() + sample(hi)) as u64
    } else {
        let axis = (0..3).find(|&d| lo[d] != hi[d]).unwrap_or(0);
        (3 * sample(lo) + axis) as u64
    }
}

fn interpolate_crossing(
    volume: &ScalarVolume,
    lo: [usize; 3],
    hi: [usize; 3],
    t: f64,
    compute_normals: bool,
) -> (Point3<f64>, Vector3<f64>) {
    let pa = volume.voxel_to_world(lo[0], lo[1], lo[2]);
    let pb = volume.voxel_to_world(hi[0], hi[1], hi[2]);
    let p = pa + (pb - pa) * t;

    if !compute_normals {
        return (p, Vector3::zeros());
    }
    let ga = gradient(volume, lo);
    let gb = gradient(volume, hi);
    let g = ga + (gb - ga) * t;
    let len = g.norm();
    let n = if len > f64::EPSILON {
        -g / len
    } else {
        Vector3::zeros()
    };
    (p, n)
}

/// Central-difference gradient in world units, one-sided on the border.
fn gradient(volume: &ScalarVolume, at: [usize; 3]) -> Vector3<f64> {
    let dims = volume.dims();
    let spacing = volume.spacing();
    let mut g = Vector3::zeros();
    for d in 0..3 {
        let n = dims[d];
        if n < 2 {
            continue;
        }
        let mut lo = at;
        let mut hi = at;
        if at[d] > 0 {
            lo[d] -= 1;
        }
        if at[d] + 1 < n {
            hi[d] += 1;
        }
        let steps = (hi[d] - lo[d]) as f64;
        let upper = volume.get(hi[0], hi[1], hi[2]) as f64;
        let lower = volume.get(lo[0], lo[1], lo[2]) as f64;
        g[d] = (upper - lower) / (steps * spacing[d]);
    }
    g
}
