use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result, Stage};
use crate::io::volume::ScalarVolume;
use crate::registration::transform::RigidTransform;

/// Value written where the inverse-mapped position falls outside the input grid.
pub const BACKGROUND: f32 = 0.0;

/// Tolerance (in voxels) for treating a position just outside the grid as on its border.
const EDGE_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Resamples `volume` under `transform`.
///
/// Output voxel `p` takes the input value at `transform⁻¹(p)`. With `auto_crop` the output
/// grid is the axis-aligned box around the transformed input corners (same spacing),
/// otherwise it is the input grid.
pub fn resample(
    volume: &ScalarVolume,
    transform: &RigidTransform,
    interpolation: Interpolation,
    auto_crop: bool,
) -> Result<ScalarVolume> {
    let inverse = transform.inverse()?;
    if volume.is_empty() {
        return Err(Error::empty_volume(
            Stage::Resampling,
            "cannot resample a volume without samples",
        ));
    }

    let spacing = volume.spacing();
    let (dims, origin) = if auto_crop {
        transformed_extent(volume, transform)
    } else {
        (volume.dims(), volume.origin())
    };

    info!(
        input = ?volume.dims(),
        output = ?dims,
        ?interpolation,
        auto_crop,
        "Resampling volume"
    );

    let [nx, ny, nz] = dims;
    let slice = nx * ny;
    let mut data = vec![BACKGROUND; slice * nz];
    data.par_chunks_mut(slice).enumerate().for_each(|(k, out)| {
        for j in 0..ny {
            for i in 0..nx {
                let world = Point3::new(
                    origin.x + i as f64 * spacing.x,
                    origin.y + j as f64 * spacing.y,
                    origin.z + k as f64 * spacing.z,
                );
                let source = inverse.transform_point(&world);
                let idx = volume.world_to_continuous_index(&source);
                out[i + nx * j] = match interpolation {
                    Interpolation::Nearest => sample_nearest(volume, &idx),
                    Interpolation::Linear => sample_linear(volume, &idx),
                };
            }
        }
    });

    ScalarVolume::new(dims, spacing, origin, data)
}

/// Grid covering the eight transformed corners of `volume`.
fn transformed_extent(
    volume: &ScalarVolume,
    transform: &RigidTransform,
) -> ([usize; 3], Point3<f64>) {
    let (lo, hi) = volume.bounds();
    let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for c in 0..8 {
        let corner = Point3::new(
            if c & 1 == 0 { lo.x } else { hi.x },
            if c & 2 == 0 { lo.y } else { hi.y },
            if c & 4 == 0 { lo.z } else { hi.z },
        );
        let p = transform.transform_point(&corner);
        min = min.inf(&p);
        max = max.sup(&p);
    }

    let spacing = volume.spacing();
    let extent: Vector3<f64> = (max - min).component_div(&spacing);
    // tolerate round-off so an exact multiple of the spacing does not gain a slice
    let dims = [0, 1, 2].map(|d| (extent[d] - 1e-9).ceil().max(0.0) as usize + 1);
    (dims, min)
}

/// Per-axis bracketing samples and weight of the upper one, `None` outside the grid.
fn axis_bracket(x: f64, n: usize) -> Option<(usize, usize, f64)> {
    let max = (n - 1) as f64;
    if x < -EDGE_EPS || x > max + EDGE_EPS {
        return None;
    }
    if n == 1 {
        return Some((0, 0, 0.0));
    }
    let x = x.clamp(0.0, max);
    let i0 = (x.floor() as usize).min(n - 2);
    Some((i0, i0 + 1, x - i0 as f64))
}

fn sample_nearest(volume: &ScalarVolume, idx: &Vector3<f64>) -> f32 {
    let dims = volume.dims();
    let mut ijk = [0usize; 3];
    for d in 0..3 {
        let max = (dims[d] - 1) as f64;
        if idx[d] < -EDGE_EPS || idx[d] > max + EDGE_EPS {
            return BACKGROUND;
        }
        ijk[d] = idx[d].round().clamp(0.0, max) as usize;
    }
    volume.get(ijk[0], ijk[1], ijk[2])
}

fn sample_linear(volume: &ScalarVolume, idx: &Vector3<f64>) -> f32 {
    let dims = volume.dims();
    let (Some((x0, x1, fx)), Some((y0, y1, fy)), Some((z0, z1, fz))) = (
        axis_bracket(idx.x, dims[0]),
        axis_bracket(idx.y, dims[1]),
        axis_bracket(idx.z, dims[2]),
    ) else {
        return BACKGROUND;
    };

    let v = |i, j, k| volume.get(i, j, k) as f64;
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

    let c00 = lerp(v(x0, y0, z0), v(x1, y0, z0), fx);
    let c10 = lerp(v(x0, y1, z0), v(x1, y1, z0), fx);
    let c01 = lerp(v(x0, y0, z1), v(x1, y0, z1), fx);
    let c11 = lerp(v(x0, y1, z1), v(x1, y1, z1), fx);
    let c0 = lerp(c00, c10, fy);
    let c1 = lerp(c01, c11, fy);
    lerp(c0, c1, fz) as f32
}
