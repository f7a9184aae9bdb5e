use std::io;

use thiserror::Error;

/// Hard failures of the engine. Everything else (bad indices, out-of-bounds
/// points, unknown blend modes) degrades to a sentinel return value.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot allocate a {width}x{height} buffer")]
    Allocation { width: u32, height: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("unknown effect `{0}`")]
    UnknownEffect(String),

    #[error("invalid value for `{param}` in effect `{effect}`")]
    InvalidEffectParam { effect: String, param: String },

    #[error("job was cancelled")]
    JobCancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
