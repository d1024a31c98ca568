//! Rigid transformation: 3x3 rotation followed by a translation.

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Stage};

/// Determinant magnitude below which the linear part is treated as non-invertible.
pub const SINGULAR_EPS: f64 = 1e-9;

/// `p' = R * p + t`.
///
/// The linear part is stored as a plain matrix so that transforms read from external
/// sources can be validated instead of being silently re-orthonormalised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Serialisable 4x4 homogeneous form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub matrix: [[f64; 4]; 4],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation,
        }
    }

    /// Rotation of `angle` radians about `axis`, then translation.
    pub fn from_axis_angle(axis: Vector3<f64>, angle: f64, translation: Vector3<f64>) -> Self {
        let rotation = match Unit::try_new(axis, f64::EPSILON) {
            Some(axis) => *Rotation3::from_axis_angle(&axis, angle).matrix(),
            None => Matrix3::identity(),
        };
        Self {
            rotation,
            translation,
        }
    }

    /// Upper-left 3x3 and last column of a homogeneous matrix. The bottom row is ignored.
    pub fn from_matrix4(m: &Matrix4<f64>) -> Self {
        Self {
            rotation: m.fixed_view::<3, 3>(0, 0).into_owned(),
            translation: Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]),
        }
    }

    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m[(0, 3)] = self.translation.x;
        m[(1, 3)] = self.translation.y;
        m[(2, 3)] = self.translation.z;
        m
    }

    pub fn to_record(&self) -> TransformRecord {
        let m = self.to_matrix4();
        let mut matrix = [[0.0; 4]; 4];
        for (r, row) in matrix.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = m[(r, c)];
            }
        }
        TransformRecord { matrix }
    }

    pub fn from_record(record: &TransformRecord) -> Self {
        let m = Matrix4::from_fn(|r, c| record.matrix[r][c]);
        Self::from_matrix4(&m)
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    #[inline]
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// `self ∘ other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.rotation.determinant()
    }

    /// True when `R^T R ≈ I` and `det R ≈ +1`.
    pub fn is_rigid(&self, tolerance: f64) -> bool {
        let gram = self.rotation.transpose() * self.rotation;
        (gram - Matrix3::identity()).amax() <= tolerance
            && (self.determinant() - 1.0).abs() <= tolerance
    }

    /// Inverse transform; fails when the linear part is not invertible.
    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPS {
            return Err(Error::singular_transform(
                Stage::Resampling,
                format!("rotation is not invertible (det = {:.3e})", det),
            ));
        }
        let inv = self.rotation.try_inverse().ok_or_else(|| {
            Error::singular_transform(Stage::Resampling, "rotation is not invertible")
        })?;
        Ok(Self {
            rotation: inv,
            translation: -(inv * self.translation),
        })
    }

    /// Rotation angle in radians, taken from the trace.
    pub fn rotation_angle(&self) -> f64 {
        let cos = ((self.rotation.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
        cos.acos()
    }

    pub fn is_identity(&self, epsilon: f64) -> bool {
        (self.rotation - Matrix3::identity()).amax() < epsilon && self.translation.norm() < epsilon
    }
}
