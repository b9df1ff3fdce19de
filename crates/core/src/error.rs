use crate::domain::ScanStage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("similarity threshold must be within 0.50..=1.00, got {0}")]
    InvalidThreshold(f64),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("duplicate file id in batch: {0}")]
    DuplicateFileId(String),

    #[error("embedding model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("scan cancelled before {stage}")]
    Cancelled { stage: ScanStage },
}

pub type Result<T> = std::result::Result<T, Error>;
