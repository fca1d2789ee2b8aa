use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloudError>;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("need at least {required} points, got {actual}")]
    TooFewPoints { required: usize, actual: usize },

    #[error("coordinate buffer length {0} is not divisible by 3")]
    MalformedBuffer(usize),

    #[error("point {index} has a non-finite coordinate")]
    NonFinite { index: usize },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {message}", .path.display())]
    Format { path: PathBuf, message: String },

    #[error("{}: unsupported point cloud extension (expected .ply or .xyz)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("preview encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("config parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        CloudError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CloudError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CloudError::Format {
            path: path.into(),
            message: message.into(),
        }
    }
}
