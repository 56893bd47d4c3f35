// Deepfake Prep Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Missing category directories: {}", .0.join(", "))]
    MissingDirectory(Vec<String>),

    #[error("Unreadable video {path}: {reason}")]
    UnreadableVideo { path: String, reason: String },

    #[error("Empty video (zero frames): {0}")]
    EmptyVideo(String),

    #[error("Timed out after {secs}s sampling {path}")]
    VideoTimeout { path: String, secs: u64 },

    #[error("FFprobe error: {0}")]
    FFprobe(String),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Manifest {path} line {line}: {reason}")]
    ManifestParse { path: String, line: usize, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PrepError {
    fn from(err: anyhow::Error) -> Self {
        PrepError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
