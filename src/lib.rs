pub mod assembler;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod episode;
pub mod error;
pub mod flow;
pub mod frame;
pub mod pipeline;

pub use assembler::EventFileAssembler;
pub use buffer::{CircularBuffer, CircularBufferStatsSnapshot};
pub use classifier::{MotionClassifier, MotionGate, MotionState};
pub use config::MotioncamConfig;
pub use controller::RecordingController;
pub use episode::RecordingEpisode;
pub use error::{MotioncamError, Result};
pub use flow::BlockMatcher;
pub use frame::{vector_grid_dims, MotionFrame, MotionVector};
pub use pipeline::{CapturePipeline, FfmpegPipeline, MotionSink, SplitTarget};
