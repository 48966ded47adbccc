use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MotioncamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture pipeline error: {message}")]
    Pipeline { message: String },

    #[error("Motion frame shape mismatch: expected {expected} vectors, got {actual}")]
    FrameShape { expected: usize, actual: usize },

    #[error("Missing episode segment: {path}")]
    MissingSegment { path: PathBuf },

    #[error("Transcoder exited with status {status} for {input}")]
    Transcode { status: i32, input: PathBuf },

    #[error("Transcoder did not finish within {timeout_secs}s for {input}")]
    TranscodeTimeout { timeout_secs: u64, input: PathBuf },
}

impl MotioncamError {
    pub fn pipeline<S: Into<String>>(message: S) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MotioncamError>;
