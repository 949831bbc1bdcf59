use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TileError {
    /// A required request field is missing or invalid. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Zoom outside the projection table, or an envelope with no area.
    #[error("Coordinate error: {0}")]
    Coordinate(String),

    #[error("Rendering engine failed: {0}")]
    RenderEngine(String),

    #[error("Style template error: {0}")]
    Template(#[from] minijinja::Error),

    /// The soft time limit fired and the render stopped at a checkpoint.
    #[error("Render cancelled before completion")]
    Cancelled,

    #[error("Render exceeded the {limit:?} time limit")]
    Timeout { limit: Duration },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TileError {
    /// Whether running the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TileError::Configuration(_) | TileError::Coordinate(_) | TileError::Template(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TileError>;
