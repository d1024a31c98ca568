use nalgebra::{Matrix3, Point3, Vector3};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::io::mesh::Mesh;
use crate::io::volume::ScalarVolume;
use crate::registration::icp::Registration;
use crate::registration::transform::RigidTransform;

/// Python representation of a scalar volume
///
/// Attributes:
///     dims (int, int, int): Samples along x, y, z
///     spacing (float, float, float): Voxel size in mm
///     origin (float, float, float): World position of sample (0, 0, 0)
///     data ([float]): Samples, x fastest, length nx*ny*nz
///
/// Example:
///     >>> vol = PyScalarVolume((2, 2, 2), (1.0, 1.0, 1.0), (0.0, 0.0, 0.0), [0.0] * 8)
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyScalarVolume {
    #[pyo3(get, set)]
    pub dims: (usize, usize, usize),
    #[pyo3(get, set)]
    pub spacing: (f64, f64, f64),
    #[pyo3(get, set)]
    pub origin: (f64, f64, f64),
    #[pyo3(get, set)]
    pub data: Vec<f32>,
}

#[pymethods]
impl PyScalarVolume {
    #[new]
    fn new(
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        origin: (f64, f64, f64),
        data: Vec<f32>,
    ) -> PyResult<Self> {
        let py = Self {
            dims,
            spacing,
            origin,
            data,
        };
        // validate eagerly
        py.to_rust()?;
        Ok(py)
    }

    fn __repr__(&self) -> String {
        format!(
            "ScalarVolume(dims={:?}, spacing=({:.3}, {:.3}, {:.3}))",
            self.dims, self.spacing.0, self.spacing.1, self.spacing.2
        )
    }

    fn __len__(&self) -> usize {
        self.data.len()
    }
}

impl PyScalarVolume {
    pub fn to_rust(&self) -> PyResult<ScalarVolume> {
        ScalarVolume::new(
            [self.dims.0, self.dims.1, self.dims.2],
            Vector3::new(self.spacing.0, self.spacing.1, self.spacing.2),
            Point3::new(self.origin.0, self.origin.1, self.origin.2),
            self.data.clone(),
        )
        .map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

impl From<&ScalarVolume> for PyScalarVolume {
    fn from(volume: &ScalarVolume) -> Self {
        let [nx, ny, nz] = volume.dims();
        let s = volume.spacing();
        let o = volume.origin();
        Self {
            dims: (nx, ny, nz),
            spacing: (s.x, s.y, s.z),
            origin: (o.x, o.y, o.z),
            data: volume.data().to_vec(),
        }
    }
}

/// Python representation of a triangle mesh
///
/// Attributes:
///     vertices ([(float, float, float)]): Vertex positions
///     triangles ([(int, int, int)]): Vertex indices per triangle
///     normals ([(float, float, float)] | None): Optional per-vertex normals
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyMesh {
    #[pyo3(get, set)]
    pub vertices: Vec<(f64, f64, f64)>,
    #[pyo3(get, set)]
    pub triangles: Vec<(usize, usize, usize)>,
    #[pyo3(get, set)]
    pub normals: Option<Vec<(f64, f64, f64)>>,
}

#[pymethods]
impl PyMesh {
    #[new]
    #[pyo3(signature = (vertices, triangles, normals = None))]
    fn new(
        vertices: Vec<(f64, f64, f64)>,
        triangles: Vec<(usize, usize, usize)>,
        normals: Option<Vec<(f64, f64, f64)>>,
    ) -> PyResult<Self> {
        let py = Self {
            vertices,
            triangles,
            normals,
        };
        py.to_rust()?;
        Ok(py)
    }

    fn __repr__(&self) -> String {
        format!(
            "Mesh(vertices={}, triangles={}, normals={})",
            self.vertices.len(),
            self.triangles.len(),
            self.normals.is_some()
        )
    }

    /// Centroid of the vertices, None for an empty mesh
    fn centroid(&self) -> Option<(f64, f64, f64)> {
        let n = self.vertices.len();
        if n == 0 {
            return None;
        }
        let (x, y, z) = self
            .vertices
            .iter()
            .fold((0.0, 0.0, 0.0), |(sx, sy, sz), v| (sx + v.0, sy + v.1, sz + v.2));
        Some((x / n as f64, y / n as f64, z / n as f64))
    }
}

impl PyMesh {
    pub fn to_rust(&self) -> PyResult<Mesh> {
        let vertices = self
            .vertices
            .iter()
            .map(|v| Point3::new(v.0, v.1, v.2))
            .collect();
        let triangles = self.triangles.iter().map(|t| [t.0, t.1, t.2]).collect();
        let mesh =
            Mesh::new(vertices, triangles).map_err(|e| PyValueError::new_err(e.to_string()))?;
        match &self.normals {
            Some(ns) => mesh
                .with_normals(ns.iter().map(|n| Vector3::new(n.0, n.1, n.2)).collect())
                .map_err(|e| PyValueError::new_err(e.to_string())),
            None => Ok(mesh),
        }
    }
}

impl From<&Mesh> for PyMesh {
    fn from(mesh: &Mesh) -> Self {
        Self {
            vertices: mesh.vertices().iter().map(|p| (p.x, p.y, p.z)).collect(),
            triangles: mesh.triangles().iter().map(|t| (t[0], t[1], t[2])).collect(),
            normals: mesh
                .normals()
                .map(|ns| ns.iter().map(|n| (n.x, n.y, n.z)).collect()),
        }
    }
}

/// Rigid transform p' = R p + t
///
/// Attributes:
///     rotation ([[float]]): 3x3 rotation, row-major
///     translation (float, float, float): Translation in mm
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyRigidTransform {
    #[pyo3(get, set)]
    pub rotation: [[f64; 3]; 3],
    #[pyo3(get, set)]
    pub translation: (f64, f64, f64),
}

#[pymethods]
impl PyRigidTransform {
    #[new]
    #[pyo3(signature = (
        rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation = (0.0, 0.0, 0.0),
    ))]
    fn new(rotation: [[f64; 3]; 3], translation: (f64, f64, f64)) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// 4x4 homogeneous matrix, row-major
    fn matrix(&self) -> [[f64; 4]; 4] {
        self.to_rust().to_record().matrix
    }

    /// Applies the transform to one point
    fn apply(&self, point: (f64, f64, f64)) -> (f64, f64, f64) {
        let p = self
            .to_rust()
            .transform_point(&Point3::new(point.0, point.1, point.2));
        (p.x, p.y, p.z)
    }

    fn inverse(&self) -> PyResult<Self> {
        self.to_rust()
            .inverse()
            .map(|t| Self::from(&t))
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn __repr__(&self) -> String {
        format!(
            "RigidTransform(angle={:.4} rad, translation=({:.3}, {:.3}, {:.3}))",
            self.to_rust().rotation_angle(),
            self.translation.0,
            self.translation.1,
            self.translation.2
        )
    }
}

impl PyRigidTransform {
    pub fn to_rust(&self) -> RigidTransform {
        let r = &self.rotation;
        RigidTransform::new(
            Matrix3::from_fn(|i, j| r[i][j]),
            Vector3::new(self.translation.0, self.translation.1, self.translation.2),
        )
    }
}

impl From<&RigidTransform> for PyRigidTransform {
    fn from(t: &RigidTransform) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = t.rotation[(i, j)];
            }
        }
        Self {
            rotation,
            translation: (t.translation.x, t.translation.y, t.translation.z),
        }
    }
}

/// Outcome of rigid registration
///
/// Attributes:
///     transform (PyRigidTransform): Maps the moving set onto the fixed set
///     converged (bool): Tolerance reached before the iteration budget ran out
///     iterations (int): Iterations used
///     mean_distance (float): Final mean correspondence distance
///     degenerate (bool): Some iteration had rank-deficient correspondences
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyRegistration {
    #[pyo3(get)]
    pub transform: PyRigidTransform,
    #[pyo3(get)]
    pub converged: bool,
    #[pyo3(get)]
    pub iterations: usize,
    #[pyo3(get)]
    pub mean_distance: f64,
    #[pyo3(get)]
    pub degenerate: bool,
}

#[pymethods]
impl PyRegistration {
    fn __repr__(&self) -> String {
        format!(
            "Registration(converged={}, iterations={}, mean_distance={:.5})",
            self.converged, self.iterations, self.mean_distance
        )
    }
}

impl From<&Registration> for PyRegistration {
    fn from(r: &Registration) -> Self {
        Self {
            transform: PyRigidTransform::from(&r.transform),
            converged: r.converged,
            iterations: r.iterations,
            mean_distance: r.mean_distance,
            degenerate: r.degenerate,
        }
    }
}
