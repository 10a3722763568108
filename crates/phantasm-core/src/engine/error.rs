use super::backend::BackendError;
use super::config::ConfigError;
use super::sink::SinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Slice invariant violated: {0}")]
    SliceInvariant(String),

    #[error("Simulation engine error: {0}")]
    Backend(#[from] BackendError),

    #[error("Result sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Frame {index} is outside the scan of {num_frames} frames")]
    FrameOutOfRange { index: usize, num_frames: usize },

    #[error("Frame {index} was cancelled before completion")]
    Cancelled { index: usize },

    #[error("Frame {index} failed: {source}")]
    Frame {
        index: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Simulation aborted ({written} of {total} frames written, {cancelled} cancelled): {source}")]
    RunAborted {
        written: usize,
        total: usize,
        cancelled: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Worker pool error: {0}")]
    Pool(String),
}

impl EngineError {
    pub(crate) fn in_frame(self, index: usize) -> Self {
        match self {
            EngineError::Frame { .. } => self,
            other => EngineError::Frame {
                index,
                source: Box::new(other),
            },
        }
    }

    /// The frame whose failure caused this error, if a single frame is to blame.
    pub fn failed_frame(&self) -> Option<usize> {
        match self {
            EngineError::Frame { index, .. } => Some(*index),
            EngineError::RunAborted { source, .. } => source.failed_frame(),
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        match self {
            EngineError::Cancelled { .. } => true,
            EngineError::Frame { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}
