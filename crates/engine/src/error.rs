//! Error types for the engine boundary

use thiserror::Error;

/// Errors from catalog access and export jobs
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("export would render {required} pixels, over the ceiling of {max_pixels}")]
    TooManyPixels { required: u64, max_pixels: u64 },

    #[error("export scale {requested} does not match the image cell size {actual}")]
    ScaleMismatch { requested: f64, actual: f64 },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Core(#[from] defolia_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
