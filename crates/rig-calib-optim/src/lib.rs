//! Bundle-adjustment core for multi-sensor extrinsic calibration.
//!
//! The crate turns a [`rig_calib_core::Dataset`] into a bounded non-linear
//! least-squares problem:
//! - [`features`] derives corner, laser-edge and lidar beam features per detection,
//! - [`params`] keeps a named, bounded parameter vector in sync with the dataset,
//! - [`residuals`] enumerates scalar residuals with their exact dependencies,
//! - [`sparsity`] turns those dependencies into the Jacobian incidence matrix,
//! - [`driver`] walks the calibration state machine on top of a [`LeastSquaresBackend`].

pub mod backend_lm;
pub mod config;
pub mod driver;
pub mod error;
pub mod features;
pub mod params;
pub mod problem;
pub mod residuals;
pub mod sparsity;
pub mod traits;

pub use backend_lm::LmBackend;
pub use config::OptimizationConfig;
pub use driver::{Calibration, CalibrationReport, DriverState, SensorPose};
pub use error::{CalibError, CalibResult};
pub use features::{extract_features, CornerMode, ExtractionSummary, FeatureOptions};
pub use params::{ParameterRegistry, Selector, TransformScope};
pub use residuals::{ResidualKind, ResidualRegistry, ResidualSite};
pub use traits::{
    BoundedProblem, CancelToken, ConvergenceStatus, LeastSquaresBackend, Objective, SolveOptions,
    SolveReport,
};
