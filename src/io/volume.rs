use nalgebra::{Point3, Vector3};

use crate::error::{Error, Result, Stage};

/// Dense 3-D grid of scalar samples, x fastest.
///
/// World position of sample `(i, j, k)` is `origin + (i*sx, j*sy, k*sz)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarVolume {
    dims: [usize; 3],
    spacing: Vector3<f64>,
    origin: Point3<f64>,
    data: Vec<f32>,
}

impl ScalarVolume {
    pub fn new(
        dims: [usize; 3],
        spacing: Vector3<f64>,
        origin: Point3<f64>,
        data: Vec<f32>,
    ) -> Result<Self> {
        let expected = dims[0] * dims[1] * dims[2];
        if data.len() != expected {
            return Err(Error::invalid_parameter(
                Stage::Input,
                format!(
                    "volume data has {} samples, grid {}x{}x{} needs {}",
                    data.len(),
                    dims[0],
                    dims[1],
                    dims[2],
                    expected
                ),
            ));
        }
        if spacing.iter().any(|s| !(*s > 0.0) || !s.is_finite()) {
            return Err(Error::invalid_parameter(
                Stage::Input,
                format!(
                    "voxel spacing must be strictly positive, got ({}, {}, {})",
                    spacing.x, spacing.y, spacing.z
                ),
            ));
        }
        Ok(Self {
            dims,
            spacing,
            origin,
            data,
        })
    }

    /// Builds a volume by evaluating `f` at every voxel's world position.
    pub fn from_fn<F>(
        dims: [usize; 3],
        spacing: Vector3<f64>,
        origin: Point3<f64>,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(Point3<f64>) -> f32,
    {
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = Point3::new(
                        origin.x + i as f64 * spacing.x,
                        origin.y + j as f64 * spacing.y,
                        origin.z + k as f64 * spacing.z,
                    );
                    data.push(f(p));
                }
            }
        }
        Self::new(dims, spacing, origin, data)
    }

    /// Same grid geometry, new samples. Length is checked by the caller.
    pub(crate) fn with_data(&self, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            data,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn spacing(&self) -> Vector3<f64> {
        self.spacing
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
        self.data[self.index(i, j, k)]
    }

    pub fn voxel_to_world(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        Point3::new(
            self.origin.x + i as f64 * self.spacing.x,
            self.origin.y + j as f64 * self.spacing.y,
            self.origin.z + k as f64 * self.spacing.z,
        )
    }

    /// Continuous (fractional) voxel index of a world position.
    pub fn world_to_continuous_index(&self, p: &Point3<f64>) -> Vector3<f64> {
        (p - self.origin).component_div(&self.spacing)
    }

    /// World-space corners of the sampled extent: (min, max).
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let extent = Vector3::new(
            self.dims[0].saturating_sub(1) as f64 * self.spacing.x,
            self.dims[1].saturating_sub(1) as f64 * self.spacing.y,
            self.dims[2].saturating_sub(1) as f64 * self.spacing.z,
        );
        (self.origin, self.origin + extent)
    }

    /// Minimum and maximum sample value, `None` for an empty volume.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        let (lo, hi) = self
            .data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Some((lo, hi))
    }
}

#[cfg(test)]
mod volume_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_wrong_length() {
        let res = ScalarVolume::new(
            [2, 2, 2],
            Vector3::new(1.0, 1.0, 1.0),
            Point3::origin(),
            vec![0.0; 7],
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_rejects_non_positive_spacing() {
        let res = ScalarVolume::new(
            [2, 2, 2],
            Vector3::new(1.0, 0.0, 1.0),
            Point3::origin(),
            vec![0.0; 8],
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_indexing_and_world_mapping() -> anyhow::Result<()> {
        let vol = ScalarVolume::from_fn(
            [3, 4, 5],
            Vector3::new(0.5, 1.0, 2.0),
            Point3::new(10.0, 20.0, 30.0),
            |p| (p.x + p.y + p.z) as f32,
        )?;
        assert_eq!(vol.len(), 60);
        assert_eq!(vol.index(1, 2, 3), 1 + 3 * (2 + 4 * 3));

        let p = vol.voxel_to_world(2, 3, 4);
        assert_relative_eq!(p.x, 11.0);
        assert_relative_eq!(p.y, 23.0);
        assert_relative_eq!(p.z, 38.0);
        assert_relative_eq!(vol.get(2, 3, 4), 72.0);

        let c = vol.world_to_continuous_index(&p);
        assert_relative_eq!(c, Vector3::new(2.0, 3.0, 4.0), epsilon = 1e-12);

        let (lo, hi) = vol.bounds();
        assert_relative_eq!(lo, Point3::new(10.0, 20.0, 30.0));
        assert_relative_eq!(hi, Point3::new(11.0, 23.0, 38.0));
        Ok(())
    }
}
