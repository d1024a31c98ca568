use anyhow::{anyhow, Context};
use crossbeam::thread;
use std::fmt;
use std::path::Path;
use tracing::{info, info_span, warn};

use crate::config::{PipelineParams, TissueTable};
use crate::error::Error;
use crate::io::input::{MeshReader, VolumeReader};
use crate::io::mesh::Mesh;
use crate::io::volume::ScalarVolume;
use crate::processing::{extract_isosurface, resample, segment, simplify};
use crate::registration::icp::{register_rigid, Registration};
use crate::registration::transform::RigidTransform;

/// Final artifacts of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub registration: Registration,
    /// Input volume resampled under the registration transform.
    pub aligned_volume: ScalarVolume,
    /// Simplified extracted surface mapped onto the target.
    pub aligned_mesh: Mesh,
}

impl PipelineOutput {
    pub fn transform(&self) -> &RigidTransform {
        &self.registration.transform
    }
}

/// First failing stage's error, unchanged, plus the registration if ICP had already
/// finished when the failure happened.
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub error: Error,
    pub registration: Option<Registration>,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<Error> for PipelineFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            registration: None,
        }
    }
}

/// segment -> extract -> simplify -> register (extracted surface onto `target`) -> resample.
///
/// The extracted surface is the moving set and `target` the fixed one, so the returned
/// transform maps volume space onto the target's frame.
pub fn run_pipeline(
    volume: &ScalarVolume,
    target: &Mesh,
    params: &PipelineParams,
) -> Result<PipelineOutput, PipelineFailure> {
    let _span = info_span!("pipeline", dims = ?volume.dims()).entered();

    let binary = segment(
        volume,
        params.window.lower,
        params.window.upper,
        params.foreground_value(),
        0.0,
    )?;
    let surface = extract_isosurface(&binary, params.iso_value, params.compute_normals)?;
    if surface.is_empty() {
        warn!(
            iso_value = params.iso_value,
            lower = params.window.lower,
            upper = params.window.upper,
            "No surface inside the threshold window"
        );
    }
    let simplified = simplify(&surface, params.reduction)?;
    info!(
        extracted = surface.triangle_count(),
        simplified = simplified.triangle_count(),
        target_points = target.vertex_count(),
        "Surface ready for registration"
    );

    let registration = register_rigid(&simplified, target, &params.icp)?;
    let aligned_mesh = simplified.transformed(&registration.transform);
    let (registration, aligned_volume) = resample_registered(volume, registration, params)?;

    info!(
        converged = registration.converged,
        iterations = registration.iterations,
        mean_distance = registration.mean_distance,
        "Pipeline finished"
    );

    Ok(PipelineOutput {
        registration,
        aligned_volume,
        aligned_mesh,
    })
}

/// Resamples `volume` under a finished registration. The registration is handed back on
/// success and attached to the failure otherwise.
fn resample_registered(
    volume: &ScalarVolume,
    registration: Registration,
    params: &PipelineParams,
) -> Result<(Registration, ScalarVolume), PipelineFailure> {
    match resample(
        volume,
        &registration.transform,
        params.interpolation,
        params.auto_crop,
    ) {
        Ok(aligned) => Ok((registration, aligned)),
        Err(error) => Err(PipelineFailure {
            error,
            registration: Some(registration),
        }),
    }
}

/// Reads both inputs through the given readers and runs [`run_pipeline`].
pub fn run_pipeline_from_sources<V, M>(
    volume_reader: &V,
    volume_path: &Path,
    mesh_reader: &M,
    target_path: &Path,
    params: &PipelineParams,
) -> anyhow::Result<PipelineOutput>
where
    V: VolumeReader + ?Sized,
    M: MeshReader + ?Sized,
{
    let volume = volume_reader
        .read_volume(volume_path)
        .with_context(|| format!("failed to read volume {}", volume_path.display()))?;
    let target = mesh_reader
        .read_mesh(target_path)
        .with_context(|| format!("failed to read target mesh {}", target_path.display()))?;

    let output = run_pipeline(&volume, &target, params)?;
    Ok(output)
}

/// Runs one independent pipeline per tissue on scoped threads.
///
/// Each run takes its window from `table`; the other parameters are shared. Results come
/// back in the order of `tissues`.
pub fn run_tissue_batch(
    volume: &ScalarVolume,
    target: &Mesh,
    tissues: &[&str],
    table: &TissueTable,
    params: &PipelineParams,
) -> anyhow::Result<Vec<(String, Result<PipelineOutput, PipelineFailure>)>> {
    let mut per_tissue = Vec::with_capacity(tissues.len());
    for &tissue in tissues {
        let window = table.window(tissue)?;
        per_tissue.push((
            tissue.to_string(),
            PipelineParams {
                window,
                ..params.clone()
            },
        ));
    }

    thread::scope(|s| {
        let handles: Vec<_> = per_tissue
            .iter()
            .map(|(tissue, p)| {
                s.spawn(move |_| {
                    let _span = info_span!("tissue", tissue = tissue.as_str()).entered();
                    run_pipeline(volume, target, p)
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(per_tissue.iter())
            .map(|(h, (tissue, _))| {
                h.join()
                    .map(|result| (tissue.clone(), result))
                    .map_err(|_| anyhow!("pipeline thread for '{}' panicked", tissue))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .map_err(|_| anyhow!("tissue batch scope panicked"))?
}

#[cfg(test)]
mod entry_tests {
    use super::*;
    use crate::config::ThresholdWindow;
    use crate::error::{ErrorKind, Stage};
    use crate::io::input::{ObjReader, ReadError};
    use crate::io::output::write_mesh_obj;
    use crate::processing::Interpolation;
    use crate::registration::icp::IcpParams;
    use crate::utils::test_utils::{sphere_intensity_volume, unit_tetrahedron};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Point3, Vector3};

    fn params() -> PipelineParams {
        PipelineParams {
            window: ThresholdWindow::new(100.0, 200.0),
            iso_value: 1.0,
            reduction: 0.5,
            icp: IcpParams::new(100, 1e-9, true),
            interpolation: Interpolation::Linear,
            auto_crop: true,
            compute_normals: true,
            foreground: None,
        }
    }

    #[test]
    fn test_inverted_window_fails_in_segmentation() {
        let vol = sphere_intensity_volume(16, 5.0, 150.0);
        let mut p = params();
        p.window = ThresholdWindow::new(200.0, 100.0);
        let failure = run_pipeline(&vol, &unit_tetrahedron(), &p).unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::InvalidRange);
        assert_eq!(failure.error.stage(), Stage::Segmentation);
        assert!(failure.registration.is_none());
    }

    #[test]
    fn test_empty_target_fails_in_icp() {
        let vol = sphere_intensity_volume(16, 5.0, 150.0);
        let failure = run_pipeline(&vol, &Mesh::default(), &params()).unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::EmptyInput);
        assert_eq!(failure.to_string(), "ICP: empty fixed point set");
    }

    #[test]
    fn test_window_missing_everything_fails_in_icp() {
        let vol = sphere_intensity_volume(16, 5.0, 150.0);
        let mut p = params();
        p.window = ThresholdWindow::new(1000.0, 2000.0);
        let failure = run_pipeline(&vol, &unit_tetrahedron(), &p).unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::EmptyInput);
        assert_eq!(failure.to_string(), "ICP: empty moving point set");
        assert!(failure.registration.is_none());
    }

    #[test]
    fn test_resample_failure_keeps_registration() -> anyhow::Result<()> {
        let vol = sphere_intensity_volume(8, 2.0, 150.0);
        let collapsed = RigidTransform::new(Matrix3::zeros(), Vector3::new(1.0, 2.0, 3.0));
        let registration = Registration {
            transform: collapsed,
            converged: true,
            iterations: 3,
            mean_distance: 0.25,
            degenerate: false,
            cancelled: false,
            history: Vec::new(),
        };

        let failure = resample_registered(&vol, registration, &params()).unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::SingularTransform);
        assert_eq!(failure.error.stage(), Stage::Resampling);
        let kept = failure.registration.expect("registration survives");
        assert_eq!(kept.transform, collapsed);
        assert_eq!(kept.iterations, 3);

        let identity = Registration {
            transform: RigidTransform::identity(),
            ..kept
        };
        let (back, aligned) = resample_registered(&vol, identity, &params())?;
        assert!(back.transform.is_identity(1e-12));
        assert_eq!(aligned.dims(), vol.dims());
        Ok(())
    }

    #[test]
    fn test_self_alignment_is_identity() -> anyhow::Result<()> {
        let vol = sphere_intensity_volume(20, 6.0, 150.0);
        let p = params();
        let binary = segment(&vol, 100.0, 200.0, p.foreground_value(), 0.0)?;
        let surface = extract_isosurface(&binary, p.iso_value, true)?;

        let out = run_pipeline(&vol, &surface, &p)?;
        assert!(out.transform().translation.norm() < 0.5);
        assert!(out.transform().rotation_angle() < 0.05);
        assert_eq!(out.aligned_mesh.triangle_count(), simplify(&surface, 0.5)?.triangle_count());
        Ok(())
    }

    #[test]
    fn test_from_sources_reads_through_seams() -> anyhow::Result<()> {
        let target_path = std::env::temp_dir()
            .join(format!("surfalign_entry_{}", std::process::id()))
            .join("target.obj");

        let vol = sphere_intensity_volume(20, 6.0, 150.0);
        let binary = segment(&vol, 100.0, 200.0, 2.0, 0.0)?;
        let target =
            extract_isosurface(&binary, 1.0, false)?.translated(Vector3::new(2.0, 0.0, 0.0));
        write_mesh_obj(&target_path, &target)?;

        let reader = |_: &Path| -> Result<ScalarVolume, ReadError> { Ok(vol.clone()) };
        let out = run_pipeline_from_sources(
            &reader,
            Path::new("in-memory"),
            &ObjReader,
            &target_path,
            &params(),
        )?;
        assert_relative_eq!(
            out.transform().translation,
            Vector3::new(2.0, 0.0, 0.0),
            epsilon = 0.5
        );

        let missing = run_pipeline_from_sources(
            &reader,
            Path::new("in-memory"),
            &ObjReader,
            Path::new("/no/such/target.obj"),
            &params(),
        );
        assert!(missing.is_err());
        std::fs::remove_file(&target_path).ok();
        Ok(())
    }

    #[test]
    fn test_tissue_batch_runs_independently() -> anyhow::Result<()> {
        let vol = sphere_intensity_volume(20, 6.0, 150.0);
        let binary = segment(&vol, 100.0, 200.0, 2.0, 0.0)?;
        let target = extract_isosurface(&binary, 1.0, false)?;

        let mut table = TissueTable::empty();
        table.insert("sphere", ThresholdWindow::new(100.0, 200.0));
        table.insert("nothing", ThresholdWindow::new(5000.0, 6000.0));

        let results = run_tissue_batch(&vol, &target, &["sphere", "nothing"], &table, &params())?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "sphere");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, "nothing");
        assert!(results[1].1.is_err());

        assert!(run_tissue_batch(&vol, &target, &["bone"], &table, &params()).is_err());
        Ok(())
    }

    #[test]
    fn test_resampled_volume_keeps_foreground() -> anyhow::Result<()> {
        let vol = sphere_intensity_volume(20, 6.0, 150.0);
        let binary = segment(&vol, 100.0, 200.0, 2.0, 0.0)?;
        let target =
            extract_isosurface(&binary, 1.0, false)?.translated(Vector3::new(0.0, 3.0, 0.0));
        let out = run_pipeline(&vol, &target, &params())?;

        // the sphere centre, moved, is still inside
        let c = out.transform().transform_point(&Point3::new(9.5, 9.5, 9.5));
        let idx = out.aligned_volume.world_to_continuous_index(&c);
        let v = out.aligned_volume.get(
            idx.x.round() as usize,
            idx.y.round() as usize,
            idx.z.round() as usize,
        );
        assert_relative_eq!(v, 150.0, epsilon = 1.0);
        Ok(())
    }
}
