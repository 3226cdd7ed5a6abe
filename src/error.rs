use std::path::PathBuf;
use thiserror::Error;

/// Fatal failures that abort a run before any video is written.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not resolve source '{input}': {reason}")]
    SourceResolution { input: String, reason: String },

    #[error("failed to load audio from {}: {reason}", path.display())]
    AudioLoad { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("keyboard image {} is unusable: {reason}", path.display())]
    KeyboardAsset { path: PathBuf, reason: String },

    #[error("frame spill {}: {reason}", path.display())]
    Spill { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn audio(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::AudioLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

/// A key that cannot be drawn at the current keyboard scale. Always recovered
/// by skipping the key's visual contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key {key} has no drawable region")]
pub struct RenderError {
    pub key: u8,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
