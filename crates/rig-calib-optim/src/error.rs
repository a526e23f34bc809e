use crate::driver::DriverState;
use rig_calib_core::DatasetError;
use thiserror::Error;

/// Errors raised while building or running a calibration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibError {
    #[error("no eligible collections: every collection was filtered out or has no detections")]
    NoCollections,

    #[error("parameter group '{0}' is already declared")]
    DuplicateGroup(String),

    #[error("residual '{0}' is already declared")]
    DuplicateResidual(String),

    #[error("pattern transform in collection '{collection}': {reason}")]
    PatternTransform { collection: String, reason: String },

    #[error("collection '{collection}' has no transform '{key}' shared by all collections")]
    MissingSharedTransform { collection: String, key: String },

    #[error("residual '{residual}' depends on undeclared parameter '{parameter}'")]
    DependencyResolution { residual: String, parameter: String },

    #[error("cannot {action} in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: DriverState,
    },

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("solver failure: {0}")]
    Solver(String),
}

impl CalibError {
    /// Fatal errors caused by the dataset or the configuration rather than by the solver.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CalibError::NoCollections
                | CalibError::DuplicateGroup(_)
                | CalibError::DuplicateResidual(_)
                | CalibError::PatternTransform { .. }
                | CalibError::MissingSharedTransform { .. }
                | CalibError::Dataset(_)
        )
    }
}

pub type CalibResult<T> = std::result::Result<T, CalibError>;
