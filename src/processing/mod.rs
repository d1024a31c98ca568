pub mod decimation;
pub mod marching_cubes;
pub mod resample;
pub mod segmentation;

pub use decimation::{simplify, simplify_with_stats, SimplifyStats};
pub use marching_cubes::extract_isosurface;
pub use resample::{resample, Interpolation};
pub use segmentation::segment;
