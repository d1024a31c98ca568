//! Segment a CT-like volume, extract and simplify its surface, align it rigidly onto a target
//! surface and resample the volume into the aligned frame.

pub mod config;
pub mod entry;
pub mod error;
pub mod io;
pub mod processing;
pub mod registration;
mod utils;

#[cfg(feature = "python")]
mod binding;

pub use config::{PipelineConfig, PipelineParams, ThresholdWindow, TissueTable};
pub use entry::{
    run_pipeline, run_pipeline_from_sources, run_tissue_batch, PipelineFailure, PipelineOutput,
};
pub use error::{Error, ErrorKind, Result, Stage};
pub use io::{Mesh, ScalarVolume};
pub use registration::{IcpParams, Registration, RigidTransform};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Module importable from Python:
///
/// ```python
/// import surfalign as sa
/// mesh = sa.extract_isosurface(sa.segment(volume, 226.0, 3071.0, 2.0), 1.0)
/// reg = sa.register_rigid(mesh, target)
/// ```
#[cfg(feature = "python")]
#[pymodule]
fn surfalign(m: &Bound<'_, PyModule>) -> PyResult<()> {
    use binding::classes::{PyMesh, PyRegistration, PyRigidTransform, PyScalarVolume};
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    m.add_function(wrap_pyfunction!(binding::segment, m)?)?;
    m.add_function(wrap_pyfunction!(binding::extract_isosurface, m)?)?;
    m.add_function(wrap_pyfunction!(binding::simplify, m)?)?;
    m.add_function(wrap_pyfunction!(binding::register_rigid, m)?)?;
    m.add_function(wrap_pyfunction!(binding::resample, m)?)?;
    m.add_function(wrap_pyfunction!(binding::run_pipeline, m)?)?;

    m.add_class::<PyScalarVolume>()?;
    m.add_class::<PyMesh>()?;
    m.add_class::<PyRigidTransform>()?;
    m.add_class::<PyRegistration>()?;
    Ok(())
}
