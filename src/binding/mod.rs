pub mod classes;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::{PipelineParams, ThresholdWindow};
use crate::entry::run_pipeline as run_pipeline_rs;
use crate::error::{Error, ErrorKind};
use crate::processing::{self, Interpolation};
use crate::registration::icp::{self, IcpParams};
use classes::{PyMesh, PyRegistration, PyRigidTransform, PyScalarVolume};

/// Caller mistakes become ValueError, everything else RuntimeError. The message keeps the
/// failing stage, e.g. "ICP: empty moving point set".
pub fn to_py_err(err: Error) -> PyErr {
    match err.kind() {
        ErrorKind::InvalidRange | ErrorKind::InvalidParameter => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn parse_interpolation(name: &str) -> PyResult<Interpolation> {
    match name.to_ascii_lowercase().as_str() {
        "nearest" => Ok(Interpolation::Nearest),
        "linear" => Ok(Interpolation::Linear),
        other => Err(PyValueError::new_err(format!(
            "unknown interpolation '{}', expected 'nearest' or 'linear'",
            other
        ))),
    }
}

/// Binarises a volume by an inclusive intensity window.
///
/// Arguments:
///
/// - ``volume`` – PyScalarVolume
/// - ``lower``, ``upper`` – window bounds, ``lower <= upper``
/// - ``in_value`` (default: 1.0) – value for voxels inside the window
/// - ``out_value`` (default: 0.0) – value for all other voxels
#[pyfunction]
#[pyo3(signature = (volume, lower, upper, in_value = 1.0f32, out_value = 0.0f32))]
pub fn segment(
    volume: &PyScalarVolume,
    lower: f32,
    upper: f32,
    in_value: f32,
    out_value: f32,
) -> PyResult<PyScalarVolume> {
    let vol = volume.to_rust()?;
    let out = processing::segment(&vol, lower, upper, in_value, out_value).map_err(to_py_err)?;
    Ok(PyScalarVolume::from(&out))
}

/// Marching cubes isosurface at ``iso_value``.
#[pyfunction]
#[pyo3(signature = (volume, iso_value, compute_normals = true))]
pub fn extract_isosurface(
    py: Python<'_>,
    volume: &PyScalarVolume,
    iso_value: f32,
    compute_normals: bool,
) -> PyResult<PyMesh> {
    let vol = volume.to_rust()?;
    let mesh = py
        .allow_threads(|| processing::extract_isosurface(&vol, iso_value, compute_normals))
        .map_err(to_py_err)?;
    Ok(PyMesh::from(&mesh))
}

/// Quadric edge-collapse simplification removing about ``target_reduction`` of the triangles.
#[pyfunction]
pub fn simplify(py: Python<'_>, mesh: &PyMesh, target_reduction: f64) -> PyResult<PyMesh> {
    let m = mesh.to_rust()?;
    let out = py
        .allow_threads(|| processing::simplify(&m, target_reduction))
        .map_err(to_py_err)?;
    Ok(PyMesh::from(&out))
}

/// ICP registration of ``moving`` onto ``fixed``.
#[pyfunction]
#[pyo3(signature = (
    moving,
    fixed,
    max_iterations = 50usize,
    tolerance = 1e-6f64,
    match_centroids_first = true,
))]
pub fn register_rigid(
    py: Python<'_>,
    moving: &PyMesh,
    fixed: &PyMesh,
    max_iterations: usize,
    tolerance: f64,
    match_centroids_first: bool,
) -> PyResult<PyRegistration> {
    let moving = moving.to_rust()?;
    let fixed = fixed.to_rust()?;
    let params = IcpParams::new(max_iterations, tolerance, match_centroids_first);
    let result = py
        .allow_threads(|| icp::register_rigid(&moving, &fixed, &params))
        .map_err(to_py_err)?;
    Ok(PyRegistration::from(&result))
}

/// Resamples a volume under a rigid transform.
///
/// ``interpolation`` is "nearest" or "linear" (default).
#[pyfunction]
#[pyo3(signature = (volume, transform, interpolation = "linear", auto_crop = true))]
pub fn resample(
    py: Python<'_>,
    volume: &PyScalarVolume,
    transform: &PyRigidTransform,
    interpolation: &str,
    auto_crop: bool,
) -> PyResult<PyScalarVolume> {
    let vol = volume.to_rust()?;
    let t = transform.to_rust();
    let mode = parse_interpolation(interpolation)?;
    let out = py
        .allow_threads(|| processing::resample(&vol, &t, mode, auto_crop))
        .map_err(to_py_err)?;
    Ok(PyScalarVolume::from(&out))
}

/// Full pipeline: segment, extract, simplify, register onto ``target``, resample.
///
/// Returns:
///
/// A 3-tuple ``(PyRegistration, aligned PyScalarVolume, aligned PyMesh)``.
///
/// Example:
///
/// .. code-block:: python
///
///    import surfalign as sa
///    reg, vol, mesh = sa.run_pipeline(volume, target, 226.0, 3071.0)
#[pyfunction]
#[pyo3(signature = (
    volume,
    target,
    lower,
    upper,
    iso_value = 1.0f32,
    reduction = 0.5f64,
    max_iterations = 50usize,
    tolerance = 1e-6f64,
    match_centroids_first = true,
    interpolation = "linear",
    auto_crop = true,
))]
#[allow(clippy::too_many_arguments)]
pub fn run_pipeline(
    py: Python<'_>,
    volume: &PyScalarVolume,
    target: &PyMesh,
    lower: f32,
    upper: f32,
    iso_value: f32,
    reduction: f64,
    max_iterations: usize,
    tolerance: f64,
    match_centroids_first: bool,
    interpolation: &str,
    auto_crop: bool,
) -> PyResult<(PyRegistration, PyScalarVolume, PyMesh)> {
    let vol = volume.to_rust()?;
    let target = target.to_rust()?;
    let params = PipelineParams {
        window: ThresholdWindow::new(lower, upper),
        iso_value,
        reduction,
        icp: IcpParams::new(max_iterations, tolerance, match_centroids_first),
        interpolation: parse_interpolation(interpolation)?,
        auto_crop,
        ..PipelineParams::default()
    };

    let out = py
        .allow_threads(|| run_pipeline_rs(&vol, &target, &params))
        .map_err(|failure| to_py_err(failure.error))?;

    Ok((
        PyRegistration::from(&out.registration),
        PyScalarVolume::from(&out.aligned_volume),
        PyMesh::from(&out.aligned_mesh),
    ))
}
