//! Aggregated pipeline configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::affine::RansacAffineConfig;
use crate::bounds::BoundsConfig;
use crate::coarse::CoarseConfig;
use crate::contacts::{ContactConfig, RobustFilterConfig};
use crate::error::AlignError;
use crate::vias::{MatcherConfig, RefinerConfig, ViaDetectConfig};

/// How much the pipeline reports through `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Warnings only.
    Quiet,
    /// One summary event per stage.
    #[default]
    Summary,
    /// Per-item detail (individual contacts, vias, pairs).
    Detailed,
}

impl Verbosity {
    /// `EnvFilter` directive for this level.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "pcbalign=warn",
            Verbosity::Summary => "pcbalign=info",
            Verbosity::Detailed => "pcbalign=debug",
        }
    }

    pub fn detailed(self) -> bool {
        self == Verbosity::Detailed
    }
}

/// Configuration for [`align_board_pair`](crate::align_board_pair).
///
/// Every section defaults independently, so a JSON file only needs the
/// fields it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub bounds: BoundsConfig,
    pub contacts: ContactConfig,
    pub filter: RobustFilterConfig,
    pub coarse: CoarseConfig,
    pub vias: ViaDetectConfig,
    pub matcher: MatcherConfig,
    pub ransac: RansacAffineConfig,
    pub refiner: RefinerConfig,
    pub verbosity: Verbosity,
    /// Mirror the back scan horizontally before processing (scanner flip).
    pub mirror_back: bool,
}

impl AlignConfig {
    /// Load from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, AlignError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AlignError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, AlignError> {
        serde_json::from_str(text).map_err(|e| AlignError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = AlignConfig::from_json_str(
            r#"{ "verbosity": "detailed", "ransac": { "inlier_threshold": 2.0 }, "mirror_back": true }"#,
        )
        .unwrap();
        assert_eq!(cfg.verbosity, Verbosity::Detailed);
        assert!(cfg.mirror_back);
        assert_eq!(cfg.ransac.inlier_threshold, 2.0);
        assert_eq!(cfg.ransac.max_iters, RansacAffineConfig::default().max_iters);
        assert_eq!(cfg.refiner.max_passes, 5);
    }

    #[test]
    fn bad_json_is_config_error() {
        let err = AlignConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, AlignError::Config(_)));
    }

    #[test]
    fn verbosity_directives() {
        assert_eq!(Verbosity::default().filter_directive(), "pcbalign=info");
        assert_eq!(Verbosity::Quiet.filter_directive(), "pcbalign=warn");
        assert!(Verbosity::Detailed.detailed());
    }
}
