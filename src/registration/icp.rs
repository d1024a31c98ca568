//! Point-to-point iterative closest point registration.
//!
//! Each iteration pairs every (currently transformed) moving point with its nearest fixed
//! point, solves the least-squares rigid fit for those pairs and composes it onto the
//! accumulated transform. The fixed set is indexed once in a k-d tree.

use nalgebra::Point3;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, Stage};
use crate::io::mesh::{centroid, AsPoints};
use crate::registration::kabsch::fit_rigid;
use crate::registration::kdtree::KdTree;
use crate::registration::transform::RigidTransform;

#[derive(Debug, Clone, PartialEq)]
pub struct IcpParams {
    /// Upper bound on outer iterations; must be at least 1.
    pub max_iterations: usize,
    /// Convergence threshold on the change of mean correspondence distance.
    pub tolerance: f64,
    /// Start from the translation that aligns the two centroids instead of identity.
    pub match_centroids_first: bool,
    /// Fail with `DegenerateGeometry` instead of falling back to an identity rotation.
    pub fail_on_degenerate: bool,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-6,
            match_centroids_first: true,
            fail_on_degenerate: false,
        }
    }
}

impl IcpParams {
    pub fn new(max_iterations: usize, tolerance: f64, match_centroids_first: bool) -> Self {
        Self {
            max_iterations,
            tolerance,
            match_centroids_first,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::invalid_parameter(
                Stage::Icp,
                "max_iterations must be > 0",
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::invalid_parameter(
                Stage::Icp,
                format!("tolerance must be finite and >= 0, got {}", self.tolerance),
            ));
        }
        Ok(())
    }
}

/// One row of the iteration log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IcpIteration {
    pub iteration: usize,
    /// Mean distance of this iteration's pairs before the increment was applied.
    pub mean_distance_before: f64,
    /// Mean distance of the same pairs after the increment.
    pub mean_distance: f64,
    pub delta: f64,
    pub rotation_deg: f64,
    pub translation_norm: f64,
    pub degenerate: bool,
}

#[derive(Debug, Clone)]
pub struct Registration {
    /// Maps the moving set onto the fixed set.
    pub transform: RigidTransform,
    pub converged: bool,
    pub iterations: usize,
    pub mean_distance: f64,
    /// At least one iteration had rank-deficient correspondences.
    pub degenerate: bool,
    pub cancelled: bool,
    pub history: Vec<IcpIteration>,
}

/// Rigidly registers `moving` onto `fixed`.
pub fn register_rigid<M, F>(moving: &M, fixed: &F, params: &IcpParams) -> Result<Registration>
where
    M: AsPoints + ?Sized,
    F: AsPoints + ?Sized,
{
    let never = AtomicBool::new(false);
    register_rigid_with_cancel(moving, fixed, params, &never)
}

/// Like [`register_rigid`], polling `cancel` between outer iterations.
pub fn register_rigid_with_cancel<M, F>(
    moving: &M,
    fixed: &F,
    params: &IcpParams,
    cancel: &AtomicBool,
) -> Result<Registration>
where
    M: AsPoints + ?Sized,
    F: AsPoints + ?Sized,
{
    let moving = moving.points();
    let fixed = fixed.points();

    if moving.is_empty() {
        return Err(Error::empty_input(Stage::Icp, "empty moving point set"));
    }
    if fixed.is_empty() {
        return Err(Error::empty_input(Stage::Icp, "empty fixed point set"));
    }
    params.validate()?;

    let tree = KdTree::build(fixed)
        .ok_or_else(|| Error::empty_input(Stage::Icp, "empty fixed point set"))?;

    let mut transform = match (params.match_centroids_first, centroid(moving), centroid(fixed)) {
        (true, Some(cm), Some(cf)) => RigidTransform::from_translation(cf - cm),
        _ => RigidTransform::identity(),
    };

    info!(
        moving = moving.len(),
        fixed = tree.len(),
        max_iterations = params.max_iterations,
        tolerance = params.tolerance,
        "Starting ICP"
    );

    let mut history = Vec::new();
    let mut previous: Option<f64> = None;
    let mut converged = false;
    let mut cancelled = false;
    let mut degenerate = false;
    let mut mean_distance = f64::NAN;

    for iteration in 1..=params.max_iterations {
        if cancel.load(Ordering::Relaxed) {
            warn!(iteration, "ICP cancelled");
            cancelled = true;
            break;
        }

        let current: Vec<Point3<f64>> = moving
            .par_iter()
            .map(|p| transform.transform_point(p))
            .collect();
        let matched: Vec<Point3<f64>> = current
            .par_iter()
            .map(|p| *tree.point(tree.nearest(p).index))
            .collect();

        let before = mean_pair_distance(&current, &matched);
        let reference = previous.unwrap_or(before);

        let fit = fit_rigid(&current, &matched)?;
        if fit.degenerate {
            if params.fail_on_degenerate {
                return Err(Error::degenerate_geometry(
                    Stage::Icp,
                    format!(
                        "correspondences do not determine a rotation (iteration {})",
                        iteration
                    ),
                ));
            }
            warn!(
                iteration,
                "Rank-deficient correspondences, using identity rotation"
            );
            degenerate = true;
        }

        transform = fit.transform.compose(&transform);

        let after = mean_pair_distance_transformed(&current, &matched, &fit.transform);
        let delta = (reference - after).abs();
        mean_distance = after;

        history.push(IcpIteration {
            iteration,
            mean_distance_before: before,
            mean_distance: after,
            delta,
            rotation_deg: fit.transform.rotation_angle().to_degrees(),
            translation_norm: fit.transform.translation.norm(),
            degenerate: fit.degenerate,
        });
        debug!(iteration, before, after, delta, "ICP iteration");

        if delta < params.tolerance {
            converged = true;
            break;
        }
        previous = Some(after);
    }

    let iterations = history.len();
    info!(
        iterations,
        converged,
        mean_distance,
        "ICP finished"
    );

    Ok(Registration {
        transform,
        converged,
        iterations,
        mean_distance,
        degenerate,
        cancelled,
        history,
    })
}

fn mean_pair_distance(a: &[Point3<f64>], b: &[Point3<f64>]) -> f64 {
    let sum: f64 = a
        .par_iter()
        .zip(b.par_iter())
        .map(|(p, q)| (p - q).norm())
        .sum();
    sum / a.len() as f64
}

fn mean_pair_distance_transformed(
    a: &[Point3<f64>],
    b: &[Point3<f64>],
    transform: &RigidTransform,
) -> f64 {
    let sum: f64 = a
        .par_iter()
        .zip(b.par_iter())
        .map(|(p, q)| (transform.transform_point(p) - q).norm())
        .sum();
    sum / a.len() as f64
}

/// Renders the iteration log as a fixed-width text table.
pub fn format_icp_table(history: &[IcpIteration]) -> String {
    let headers = ["Iter", "Mean before", "Mean after", "Delta", "Rot (deg)", "|t|"];
    let rows: Vec<[String; 6]> = history
        .iter()
        .map(|h| {
            [
                h.iteration.to_string(),
                format!("{:.6}", h.mean_distance_before),
                format!("{:.6}", h.mean_distance),
                format!("{:.3e}", h.delta),
                format!("{:.4}", h.rotation_deg),
                format!("{:.4}", h.translation_norm),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let border = {
        let mut s = String::from("+");
        for w in &widths {
            s.push_str(&"-".repeat(w + 2));
            s.push('+');
        }
        s
    };
    let line = |cells: &[String]| {
        let mut s = String::from("|");
        for (cell, w) in cells.iter().zip(widths.iter()) {
            s.push_str(&format!(" {:>width$} |", cell, width = w));
        }
        s
    };

    let mut out = Vec::with_capacity(rows.len() + 4);
    out.push(border.clone());
    out.push(line(&headers.map(String::from)));
    out.push(border.clone());
    for row in &rows {
        out.push(line(row));
    }
    out.push(border);
    out.join("\n")
}
