use thiserror::Error;

/// Errors raised while reading or mutating the dataset model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DatasetError {
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),

    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("collection '{collection}' has no transform '{key}'")]
    MissingTransform { collection: String, key: String },

    #[error("collection '{collection}': frames '{source_frame}' and '{target_frame}' are not connected")]
    FramesNotConnected {
        collection: String,
        source_frame: String,
        target_frame: String,
    },

    #[error("collection '{collection}': frame '{frame}' has more than one parent")]
    AmbiguousParent { collection: String, frame: String },

    #[error("sensor '{sensor}' has no intrinsics")]
    MissingIntrinsics { sensor: String },

    #[error("collection '{collection}', sensor '{sensor}': {reason}")]
    InvalidData {
        collection: String,
        sensor: String,
        reason: String,
    },

    #[error("expected {expected} values, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result type for dataset operations.
pub type DatasetResult<T> = std::result::Result<T, DatasetError>;
