use nalgebra::{Point3, Vector3};

use crate::error::{Error, Result, Stage};
use crate::registration::transform::RigidTransform;

/// Indexed triangle mesh with optional per-vertex normals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    vertices: Vec<Point3<f64>>,
    triangles: Vec<[usize; 3]>,
    normals: Option<Vec<Vector3<f64>>>,
}

/// Anything that can be read as a list of 3-D points (a mesh's vertices, a point set).
pub trait AsPoints {
    fn points(&self) -> &[Point3<f64>];
}

impl AsPoints for Mesh {
    fn points(&self) -> &[Point3<f64>] {
        &self.vertices
    }
}

impl AsPoints for [Point3<f64>] {
    fn points(&self) -> &[Point3<f64>] {
        self
    }
}

impl AsPoints for Vec<Point3<f64>> {
    fn points(&self) -> &[Point3<f64>] {
        self
    }
}

impl Mesh {
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[usize; 3]>) -> Result<Self> {
        let n = vertices.len();
        if let Some((t, tri)) = triangles
            .iter()
            .enumerate()
            .find(|(_, tri)| tri.iter().any(|&i| i >= n))
        {
            return Err(Error::invalid_parameter(
                Stage::Input,
                format!(
                    "triangle {} references vertex {:?} but mesh has {} vertices",
                    t, tri, n
                ),
            ));
        }
        Ok(Self {
            vertices,
            triangles,
            normals: None,
        })
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> Result<Self> {
        if normals.len() != self.vertices.len() {
            return Err(Error::invalid_parameter(
                Stage::Input,
                format!(
                    "{} normals given for {} vertices",
                    normals.len(),
                    self.vertices.len()
                ),
            ));
        }
        self.normals = Some(normals);
        Ok(self)
    }

    /// Internal constructor for stages that build indices themselves.
    pub(crate) fn from_parts(
        vertices: Vec<Point3<f64>>,
        triangles: Vec<[usize; 3]>,
        normals: Option<Vec<Vector3<f64>>>,
    ) -> Self {
        debug_assert!(triangles
            .iter()
            .all(|t| t.iter().all(|&i| i < vertices.len())));
        Self {
            vertices,
            triangles,
            normals,
        }
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn normals(&self) -> Option<&[Vector3<f64>]> {
        self.normals.as_deref()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn centroid(&self) -> Option<Point3<f64>> {
        centroid(&self.vertices)
    }

    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        Some(self.vertices.iter().fold((*first, *first), |(lo, hi), p| {
            (lo.inf(p), hi.sup(p))
        }))
    }

    /// Unnormalised face normal (cross product of the two edges from the first corner).
    pub fn face_normal(&self, t: usize) -> Vector3<f64> {
        let [a, b, c] = self.triangles[t];
        let pa = self.vertices[a];
        (self.vertices[b] - pa).cross(&(self.vertices[c] - pa))
    }

    /// Area-weighted vertex normals from the current triangles.
    pub fn compute_vertex_normals(&self) -> Vec<Vector3<f64>> {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for (t, tri) in self.triangles.iter().enumerate() {
            let n = self.face_normal(t);
            for &i in tri {
                normals[i] += n;
            }
        }
        for n in normals.iter_mut() {
            let len = n.norm();
            if len > f64::EPSILON {
                *n /= len;
            }
        }
        normals
    }

    /// New mesh with every vertex (and normal) mapped through `transform`.
    pub fn transformed(&self, transform: &RigidTransform) -> Mesh {
        let vertices = self
            .vertices
            .iter()
            .map(|p| transform.transform_point(p))
            .collect();
        let normals = self.normals.as_ref().map(|ns| {
            ns.iter()
                .map(|n| {
                    let r = transform.transform_vector(n);
                    let len = r.norm();
                    if len > f64::EPSILON {
                        r / len
                    } else {
                        r
                    }
                })
                .collect()
        });
        Mesh {
            vertices,
            triangles: self.triangles.clone(),
            normals,
        }
    }

    pub fn translated(&self, offset: Vector3<f64>) -> Mesh {
        self.transformed(&RigidTransform::from_translation(offset))
    }
}

pub fn centroid(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / points.len() as f64))
}
