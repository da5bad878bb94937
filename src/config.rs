//! Analysis configuration
//!
//! Cut thresholds, fiducial regions and cache settings. Every field has a
//! default, so a TOML file only needs the values it changes:
//!
//! ```toml
//! reference_plane = 6
//!
//! [cuts]
//! trigger_phase = [2, 5]
//! start_time = 30.0
//! fiducial = [[20.0, 30.0], [120.0, 30.0], [120.0, 150.0], [20.0, 150.0]]
//!
//! [cache]
//! dir = "/tmp/tb-cache"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::filter::Region;
use crate::space::PlaneId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// Top-level configuration of one device analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Plane whose residuals qualify tracks for the `res` track cut.
    pub reference_plane: Option<PlaneId>,
    pub cuts: CutConfig,
    pub cache: CacheConfig,
}

/// Thresholds of the cut pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutConfig {
    /// Accepted trigger phases, inclusive.
    pub trigger_phase: [i64; 2],
    /// Seconds at the start of the run that are excluded.
    pub start_time: f64,
    /// Tracks above this chi2 quantile are rejected.
    pub chi2_quantile: f64,
    /// Maximum residual at the device plane in mm.
    pub max_residual: f64,
    /// Maximum residual at the reference plane in mm.
    pub ref_max_residual: f64,
    pub max_cluster_size: Option<i64>,
    /// Fiducial area in bulk mode, local pixel coordinates.
    pub fiducial: Option<Region>,
    /// Fiducial area in surface mode.
    pub surface_fiducial: Option<Region>,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            trigger_phase: [0, 9],
            start_time: 0.0,
            chi2_quantile: 0.9,
            max_residual: 0.3,
            ref_max_residual: 0.2,
            max_cluster_size: None,
            fiducial: None,
            surface_fiducial: None,
        }
    }
}

impl CutConfig {
    pub fn fiducial_region(&self, surface: bool) -> Option<&Region> {
        if surface {
            self.surface_fiducial.as_ref().or(self.fiducial.as_ref())
        } else {
            self.fiducial.as_ref()
        }
    }
}

/// Persistent cut cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".cut-cache"),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cuts = &self.cuts;
        if cuts.trigger_phase[0] > cuts.trigger_phase[1] {
            return Err(ConfigError::OutOfRange(format!(
                "trigger_phase range {:?} is empty",
                cuts.trigger_phase
            )));
        }
        if !(cuts.chi2_quantile > 0.0 && cuts.chi2_quantile <= 1.0) {
            return Err(ConfigError::OutOfRange(
                "chi2_quantile must be in (0, 1]".to_string(),
            ));
        }
        if cuts.max_residual <= 0.0 || cuts.ref_max_residual <= 0.0 {
            return Err(ConfigError::OutOfRange(
                "residual limits must be positive".to_string(),
            ));
        }
        if cuts.start_time < 0.0 {
            return Err(ConfigError::OutOfRange(
                "start_time must not be negative".to_string(),
            ));
        }
        for region in [&cuts.fiducial, &cuts.surface_fiducial].into_iter().flatten() {
            if region.vertices().len() < 3 {
                return Err(ConfigError::OutOfRange(
                    "fiducial regions need at least three vertices".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml(
            r#"
            reference_plane = 6

            [cuts]
            trigger_phase = [2, 5]
            fiducial = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]
            "#,
        )
        .unwrap();
        assert_eq!(config.reference_plane, Some(6));
        assert_eq!(config.cuts.trigger_phase, [2, 5]);
        assert_eq!(config.cuts.chi2_quantile, 0.9);
        assert!(config.cache.enabled);
        assert_eq!(config.cuts.fiducial_region(false).unwrap().vertices().len(), 3);
        // surface mode falls back to the bulk region
        assert!(config.cuts.fiducial_region(true).is_some());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            AnalysisConfig::from_toml("[cuts]\ntrigger_phase = [5, 2]"),
            Err(ConfigError::OutOfRange(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[cuts]\nchi2_quantile = 0.0"),
            Err(ConfigError::OutOfRange(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("[cuts]\nfiducial = [[0.0, 0.0]]"),
            Err(ConfigError::OutOfRange(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_toml("cuts = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AnalysisConfig::default();
        config.cuts.surface_fiducial = Some(Region::rect(1.0, 2.0, 3.0, 4.0));
        let text = config.to_toml().unwrap();
        assert_eq!(AnalysisConfig::from_toml(&text).unwrap(), config);
    }
}
