use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};

use surfalign::io::output::{write_icp_log_csv, write_transform_json};
use surfalign::processing::{extract_isosurface, segment};
use surfalign::registration::format_icp_table;
use surfalign::{run_pipeline, PipelineConfig, PipelineParams, ScalarVolume, ThresholdWindow};

/// n^3 grid, unit spacing, `intensity` inside a ball of `radius` around the grid centre.
fn sphere_volume(n: usize, radius: f64, intensity: f32) -> ScalarVolume {
    let c = (n as f64 - 1.0) / 2.0;
    let centre = Point3::new(c, c, c);
    ScalarVolume::from_fn([n, n, n], Vector3::new(1.0, 1.0, 1.0), Point3::origin(), |p| {
        if (p - centre).norm() <= radius {
            intensity
        } else {
            0.0
        }
    })
    .expect("valid grid")
}

fn sphere_params() -> PipelineParams {
    PipelineParams {
        window: ThresholdWindow::new(100.0, 200.0),
        iso_value: 1.0,
        reduction: 0.5,
        ..PipelineParams::default()
    }
}

#[test]
fn test_sphere_recovers_translation() -> anyhow::Result<()> {
    let volume = sphere_volume(24, 8.0, 150.0);
    let params = sphere_params();

    let binary = segment(&volume, 100.0, 200.0, params.foreground_value(), 0.0)?;
    let target = extract_isosurface(&binary, params.iso_value, true)?
        .translated(Vector3::new(10.0, 0.0, 0.0));

    let out = run_pipeline(&volume, &target, &params)?;
    let t = out.transform();
    assert_relative_eq!(t.translation, Vector3::new(10.0, 0.0, 0.0), epsilon = 0.5);
    assert!(t.rotation_angle() < 0.05);
    assert!(out.registration.iterations >= 1);
    assert!(!out.registration.history.is_empty());

    // the aligned mesh sits on the target
    let (lo, hi) = out.aligned_mesh.bounds().unwrap();
    let (tlo, thi) = target.bounds().unwrap();
    assert_relative_eq!(lo, tlo, epsilon = 1.0);
    assert_relative_eq!(hi, thi, epsilon = 1.0);

    // sphere moved with the volume
    let [nx, ny, nz] = out.aligned_volume.dims();
    assert!(nx * ny * nz > 0);
    let centre = out.aligned_volume.world_to_continuous_index(&Point3::new(21.5, 11.5, 11.5));
    let v = out.aligned_volume.get(
        centre.x.round() as usize,
        centre.y.round() as usize,
        centre.z.round() as usize,
    );
    assert_relative_eq!(v, 150.0, epsilon = 1.0);
    Ok(())
}

#[test]
fn test_config_driven_run_and_reports() -> anyhow::Result<()> {
    let config = PipelineConfig::from_toml_str(
        r#"
        tissue = "phantom"
        reduction = 0.3
        interpolation = "nearest"

        [icp]
        max_iterations = 80

        [tissues.phantom]
        lower = 100.0
        upper = 200.0
        "#,
    )?;
    let params = config.to_params()?;
    assert_eq!(params.window, ThresholdWindow::new(100.0, 200.0));

    let volume = sphere_volume(20, 6.0, 150.0);
    let binary = segment(&volume, 100.0, 200.0, params.foreground_value(), 0.0)?;
    let target = extract_isosurface(&binary, params.iso_value, false)?
        .translated(Vector3::new(0.0, -2.0, 1.0));
    let out = run_pipeline(&volume, &target, &params)?;
    assert_relative_eq!(
        out.transform().translation,
        Vector3::new(0.0, -2.0, 1.0),
        epsilon = 0.5
    );

    let table = format_icp_table(&out.registration.history);
    assert_eq!(
        table.lines().filter(|l| l.starts_with('|')).count(),
        out.registration.history.len() + 1
    );

    let dir = std::env::temp_dir().join(format!("surfalign_it_{}", std::process::id()));
    write_transform_json(dir.join("transform.json"), out.transform())?;
    write_icp_log_csv(dir.join("icp.csv"), &out.registration.history)?;
    assert!(dir.join("transform.json").exists());
    assert!(dir.join("icp.csv").exists());
    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}
