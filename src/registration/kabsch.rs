//! Closed-form least-squares rigid alignment of paired point sets (Kabsch / SVD).

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::{Error, Result, Stage};
use crate::io::mesh::centroid;
use crate::registration::transform::RigidTransform;

/// Second singular value below this fraction of the first means the rotation is not
/// determined by the correspondences (coincident or collinear sets).
pub const RANK_TOLERANCE: f64 = 1e-9;

/// Best-fit rigid transform for paired points.
#[derive(Debug, Clone, Copy)]
pub struct RigidFit {
    /// Maps `source[i]` onto `target[i]` in the least-squares sense.
    pub transform: RigidTransform,
    /// Set when the cross-covariance was rank deficient and the rotation was
    /// replaced by identity.
    pub degenerate: bool,
}

/// Minimises `Σ |R s_i + t - d_i|²` over rotations `R` and translations `t`.
///
/// A rank-deficient cross-covariance yields the pure centroid translation with
/// `degenerate = true`.
pub fn fit_rigid(source: &[Point3<f64>], target: &[Point3<f64>]) -> Result<RigidFit> {
    if source.is_empty() || target.is_empty() {
        return Err(Error::empty_input(
            Stage::Icp,
            "no correspondences to fit a rigid transform",
        ));
    }
    if source.len() != target.len() {
        return Err(Error::invalid_parameter(
            Stage::Icp,
            format!(
                "paired point sets differ in length: {} vs {}",
                source.len(),
                target.len()
            ),
        ));
    }

    // both non-empty, checked above
    let source_centroid = centroid(source).unwrap_or_else(Point3::origin);
    let target_centroid = centroid(target).unwrap_or_else(Point3::origin);

    let mut h = Matrix3::zeros();
    for (s, d) in source.iter().zip(target.iter()) {
        let sc = s - source_centroid;
        let dc = d - target_centroid;
        h += sc * dc.transpose();
    }

    let translation_only = |degenerate: bool| RigidFit {
        transform: RigidTransform::from_translation(target_centroid - source_centroid),
        degenerate,
    };

    let svd = h.svd(true, true);
    let mut sigma: Vec<f64> = svd.singular_values.iter().copied().collect();
    sigma.sort_by(|a, b| b.total_cmp(a));
    if !(sigma[0] > 0.0) || sigma[1] <= RANK_TOLERANCE * sigma[0] {
        return Ok(translation_only(true));
    }

    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Ok(translation_only(true));
    };

    let v = v_t.transpose();
    let mut rotation = v * u.transpose();

    if rotation.determinant() < 0.0 {
        // flip the axis of the smallest singular value
        let min_idx = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(2);
        let mut d = Matrix3::identity();
        d[(min_idx, min_idx)] = -1.0;
        rotation = v * d * u.transpose();
    }

    let translation: Vector3<f64> = target_centroid.coords - rotation * source_centroid.coords;

    Ok(RigidFit {
        transform: RigidTransform::new(rotation, translation),
        degenerate: false,
    })
}

#[cfg(test)]
mod kabsch_tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(-1.0, 0.5, 2.0),
        ]
    }

    #[test]
    fn test_recovers_known_transform() -> anyhow::Result<()> {
        let truth = RigidTransform::from_axis_angle(
            Vector3::new(0.3, -1.0, 0.4),
            1.1,
            Vector3::new(5.0, -2.0, 0.25),
        );
        let src = sample_points();
        let dst: Vec<_> = src.iter().map(|p| truth.transform_point(p)).collect();

        let fit = fit_rigid(&src, &dst)?;
        assert!(!fit.degenerate);
        assert_relative_eq!(fit.transform.rotation, truth.rotation, epsilon = 1e-9);
        assert_relative_eq!(fit.transform.translation, truth.translation, epsilon = 1e-9);
        assert!(fit.transform.is_rigid(1e-9));
        Ok(())
    }

    #[test]
    fn test_coplanar_points_still_determine_rotation() -> anyhow::Result<()> {
        let truth = RigidTransform::from_axis_angle(Vector3::z(), 0.4, Vector3::new(1.0, 0.0, 0.0));
        let src = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
        ];
        let dst: Vec<_> = src.iter().map(|p| truth.transform_point(p)).collect();
        let fit = fit_rigid(&src, &dst)?;
        assert!(!fit.degenerate);
        assert!(fit.transform.determinant() > 0.0);
        assert_relative_eq!(fit.transform.rotation, truth.rotation, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_collinear_points_are_degenerate() -> anyhow::Result<()> {
        let src: Vec<_> = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let dst: Vec<_> = src.iter().map(|p| p + Vector3::new(0.0, 2.0, 0.0)).collect();
        let fit = fit_rigid(&src, &dst)?;
        assert!(fit.degenerate);
        assert_relative_eq!(fit.transform.rotation, Matrix3::identity());
        assert_relative_eq!(
            fit.transform.translation,
            Vector3::new(0.0, 2.0, 0.0),
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn test_length_mismatch_fails() {
        let src = sample_points();
        assert!(fit_rigid(&src, &src[..3]).is_err());
        assert!(fit_rigid(&[], &[]).is_err());
    }
}
