use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result, Stage};
use crate::processing::resample::Interpolation;
use crate::registration::icp::IcpParams;

/// Inclusive intensity band treated as foreground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdWindow {
    pub lower: f32,
    pub upper: f32,
}

impl ThresholdWindow {
    pub fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: f32) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Tissue name -> threshold window.
///
/// Passed around by value instead of living in process-wide state, so concurrent runs can use
/// different tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TissueTable {
    windows: BTreeMap<String, ThresholdWindow>,
}

impl Default for TissueTable {
    fn default() -> Self {
        let mut windows = BTreeMap::new();
        windows.insert("bone".to_string(), ThresholdWindow::new(226.0, 3071.0));
        windows.insert("soft_tissue".to_string(), ThresholdWindow::new(-100.0, 300.0));
        windows.insert("fat".to_string(), ThresholdWindow::new(-190.0, -30.0));
        windows.insert("lung".to_string(), ThresholdWindow::new(-1000.0, -400.0));
        Self { windows }
    }
}

impl TissueTable {
    pub fn empty() -> Self {
        Self {
            windows: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, tissue: impl Into<String>, window: ThresholdWindow) {
        self.windows.insert(tissue.into(), window);
    }

    pub fn window(&self, tissue: &str) -> Result<ThresholdWindow> {
        self.windows.get(tissue).copied().ok_or_else(|| {
            Error::invalid_parameter(
                Stage::Pipeline,
                format!(
                    "unknown tissue '{}' (known: {})",
                    tissue,
                    self.names().collect::<Vec<_>>().join(", ")
                ),
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    /// Entries of `extra` replace entries with the same name.
    pub fn extended(mut self, extra: &BTreeMap<String, ThresholdWindow>) -> Self {
        for (name, window) in extra {
            self.windows.insert(name.clone(), *window);
        }
        self
    }
}

/// Everything [`crate::entry::run_pipeline`] needs besides its two inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub window: ThresholdWindow,
    pub iso_value: f32,
    /// Fraction of triangles to remove, in `[0, 1)`.
    pub reduction: f64,
    pub icp: IcpParams,
    pub interpolation: Interpolation,
    pub auto_crop: bool,
    pub compute_normals: bool,
    /// Value written for foreground voxels; `iso_value + 1` when unset.
    pub foreground: Option<f32>,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            window: ThresholdWindow::new(226.0, 3071.0),
            iso_value: 1.0,
            reduction: 0.5,
            icp: IcpParams::default(),
            interpolation: Interpolation::Linear,
            auto_crop: true,
            compute_normals: true,
            foreground: None,
        }
    }
}

impl PipelineParams {
    pub fn foreground_value(&self) -> f32 {
        self.foreground.unwrap_or(self.iso_value + 1.0)
    }
}

/// On-disk (TOML) form of the pipeline parameters.
///
/// ```toml
/// tissue = "bone"          # or: window = { lower = 100.0, upper = 200.0 }
/// iso_value = 1.0
/// reduction = 0.5
///
/// [icp]
/// max_iterations = 100
/// tolerance = 1e-6
///
/// [tissues.cartilage]
/// lower = 90.0
/// upper = 180.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub tissue: Option<String>,
    pub window: Option<ThresholdWindow>,
    pub iso_value: Option<f32>,
    pub reduction: Option<f64>,
    pub interpolation: Option<Interpolation>,
    pub auto_crop: Option<bool>,
    pub compute_normals: Option<bool>,
    pub foreground: Option<f32>,
    pub icp: IcpConfig,
    /// Extra or overriding tissue windows.
    pub tissues: BTreeMap<String, ThresholdWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IcpConfig {
    pub max_iterations: Option<usize>,
    pub tolerance: Option<f64>,
    pub match_centroids_first: Option<bool>,
    pub fail_on_degenerate: Option<bool>,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("failed to parse config {}", path.as_ref().display()))
    }

    /// Default tissue table extended by the `[tissues.*]` entries of this config.
    pub fn tissue_table(&self) -> TissueTable {
        TissueTable::default().extended(&self.tissues)
    }

    /// Resolves the config against the defaults. An explicit window wins over `tissue`.
    pub fn to_params(&self) -> Result<PipelineParams> {
        let defaults = PipelineParams::default();
        let window = match (&self.window, &self.tissue) {
            (Some(w), _) => *w,
            (None, Some(tissue)) => self.tissue_table().window(tissue)?,
            (None, None) => defaults.window,
        };
        let icp_defaults = defaults.icp.clone();
        let icp = IcpParams {
            max_iterations: self.icp.max_iterations.unwrap_or(icp_defaults.max_iterations),
            tolerance: self.icp.tolerance.unwrap_or(icp_defaults.tolerance),
            match_centroids_first: self
                .icp
                .match_centroids_first
                .unwrap_or(icp_defaults.match_centroids_first),
            fail_on_degenerate: self
                .icp
                .fail_on_degenerate
                .unwrap_or(icp_defaults.fail_on_degenerate),
        };

        Ok(PipelineParams {
            window,
            iso_value: self.iso_value.unwrap_or(defaults.iso_value),
            reduction: self.reduction.unwrap_or(defaults.reduction),
            icp,
            interpolation: self.interpolation.unwrap_or(defaults.interpolation),
            auto_crop: self.auto_crop.unwrap_or(defaults.auto_crop),
            compute_normals: self.compute_normals.unwrap_or(defaults.compute_normals),
            foreground: self.foreground.or(defaults.foreground),
        })
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_tissues() -> anyhow::Result<()> {
        let table = TissueTable::default();
        assert_eq!(table.window("bone")?, ThresholdWindow::new(226.0, 3071.0));
        assert_eq!(table.window("lung")?, ThresholdWindow::new(-1000.0, -400.0));
        let err = table.window("cartilage").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.to_string().starts_with("Pipeline: unknown tissue 'cartilage'"));
        Ok(())
    }

    #[test]
    fn test_empty_config_gives_defaults() -> anyhow::Result<()> {
        let cfg = PipelineConfig::from_toml_str("")?;
        assert_eq!(cfg.to_params()?, PipelineParams::default());
        Ok(())
    }

    #[test]
    fn test_full_config() -> anyhow::Result<()> {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            tissue = "cartilage"
            iso_value = 0.5
            reduction = 0.25
            interpolation = "nearest"
            auto_crop = false

            [icp]
            max_iterations = 12
            tolerance = 1e-4
            match_centroids_first = false

            [tissues.cartilage]
            lower = 90.0
            upper = 180.0
            "#,
        )?;
        let params = cfg.to_params()?;
        assert_eq!(params.window, ThresholdWindow::new(90.0, 180.0));
        assert_eq!(params.iso_value, 0.5);
        assert_eq!(params.foreground_value(), 1.5);
        assert_eq!(params.reduction, 0.25);
        assert_eq!(params.interpolation, Interpolation::Nearest);
        assert!(!params.auto_crop);
        assert_eq!(params.icp.max_iterations, 12);
        assert!(!params.icp.match_centroids_first);
        assert!(cfg.tissue_table().window("bone").is_ok());
        Ok(())
    }

    #[test]
    fn test_explicit_window_wins() -> anyhow::Result<()> {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            tissue = "bone"
            window = { lower = 100.0, upper = 200.0 }
            "#,
        )?;
        assert_eq!(cfg.to_params()?.window, ThresholdWindow::new(100.0, 200.0));
        Ok(())
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(PipelineConfig::from_toml_str("iso = 3.0").is_err());
    }
}
