use crate::features::FeatureOptions;
use crate::traits::SolveOptions;
use serde::{Deserialize, Serialize};

/// Options for one calibration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Also refine the intrinsics of every image sensor.
    pub optimize_intrinsics: bool,
    pub features: FeatureOptions,
    pub solver: SolveOptions,
}
