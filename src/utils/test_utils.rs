//! Synthetic inputs shared by the unit tests.

use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::io::mesh::Mesh;
use crate::io::volume::ScalarVolume;
use crate::registration::transform::RigidTransform;

/// Corner tetrahedron with outward-facing triangles.
pub fn unit_tetrahedron() -> Mesh {
    Mesh::new(
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ],
        vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
    )
    .unwrap()
}

/// Random points in a box with distinct extents along each axis, so that the principal
/// directions are well separated.
pub fn anisotropic_cloud(n: usize, seed: u64) -> Vec<Point3<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Point3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-3.0..3.0),
                rng.random_range(-1.5..1.5),
            )
        })
        .collect()
}

/// Rotation of at most `max_angle` radians about a random axis plus a translation with
/// components in `[-max_translation, max_translation]`.
pub fn random_rigid_transform(
    rng: &mut StdRng,
    max_angle: f64,
    max_translation: f64,
) -> RigidTransform {
    let axis = Vector3::new(
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
    );
    let angle = rng.random_range(-max_angle..max_angle);
    let translation = Vector3::new(
        rng.random_range(-max_translation..max_translation),
        rng.random_range(-max_translation..max_translation),
        rng.random_range(-max_translation..max_translation),
    );
    RigidTransform::from_axis_angle(axis, angle, translation)
}

fn cube_grid<F>(dims: [usize; 3], spacing: f64, f: F) -> ScalarVolume
where
    F: Fn(Point3<f64>) -> f32,
{
    ScalarVolume::from_fn(
        dims,
        Vector3::new(spacing, spacing, spacing),
        Point3::origin(),
        f,
    )
    .unwrap()
}

/// Value equals the world x coordinate.
pub fn ramp_volume(dims: [usize; 3], spacing: f64) -> ScalarVolume {
    cube_grid(dims, spacing, |p| p.x as f32)
}

/// `1 + x + 2y + 3z`, reproduced exactly by trilinear interpolation.
pub fn linear_field_volume(dims: [usize; 3], spacing: f64) -> ScalarVolume {
    cube_grid(dims, spacing, |p| (1.0 + p.x + 2.0 * p.y + 3.0 * p.z) as f32)
}

/// Signed distance style field `radius - |p - center|`, positive inside.
pub fn sphere_distance_volume(
    dims: [usize; 3],
    spacing: f64,
    center: Point3<f64>,
    radius: f64,
) -> ScalarVolume {
    cube_grid(dims, spacing, move |p| (radius - (p - center).norm()) as f32)
}

/// `n³` unit-spaced grid holding `intensity` inside a centred ball and 0 elsewhere.
pub fn sphere_intensity_volume(n: usize, radius: f64, intensity: f32) -> ScalarVolume {
    let c = (n - 1) as f64 / 2.0;
    let center = Point3::new(c, c, c);
    cube_grid([n, n, n], 1.0, move |p| {
        if (p - center).norm() <= radius {
            intensity
        } else {
            0.0
        }
    })
}
