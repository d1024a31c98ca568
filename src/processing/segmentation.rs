use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::ThresholdWindow;
use crate::error::{Error, Result, Stage};
use crate::io::volume::ScalarVolume;

/// Binarises `volume` by the inclusive window `[lower, upper]`.
///
/// Voxels inside the window become `in_value`, all others `out_value`. The output keeps the
/// input grid (dims, spacing, origin).
pub fn segment(
    volume: &ScalarVolume,
    lower: f32,
    upper: f32,
    in_value: f32,
    out_value: f32,
) -> Result<ScalarVolume> {
    if lower.is_nan() || upper.is_nan() || lower > upper {
        return Err(Error::invalid_range(
            Stage::Segmentation,
            format!("lower bound {} exceeds upper bound {}", lower, upper),
        ));
    }

    let window = ThresholdWindow::new(lower, upper);
    if let Some((min, max)) = volume.value_range() {
        if max < lower || min > upper {
            warn!(min, max, lower, upper, "Window lies outside the volume's value range");
        }
    }

    let data: Vec<f32> = volume
        .data()
        .par_iter()
        .map(|&v| {
            if window.contains(v) {
                in_value
            } else {
                out_value
            }
        })
        .collect();

    let foreground = volume
        .data()
        .par_iter()
        .filter(|&&v| window.contains(v))
        .count();
    info!(
        voxels = data.len(),
        foreground,
        lower,
        upper,
        "Segmented volume"
    );

    Ok(volume.with_data(data))
}
