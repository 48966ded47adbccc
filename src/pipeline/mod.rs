pub mod ffmpeg;
pub mod mock;

use crate::classifier::MotionClassifier;
use crate::error::Result;
use crate::frame::MotionFrame;

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

pub use ffmpeg::FfmpegPipeline;
pub use mock::{MockCapturePipeline, MockStep};

/// Destination for the live encoder's output.
#[derive(Debug)]
pub enum SplitTarget<'a> {
    /// Route encoded chunks into the circular pre-roll buffer.
    Buffer,
    /// Route encoded chunks into a dedicated segment file.
    File(&'a Path),
}

/// Narrow capability interface over the capture hardware.
///
/// The pipeline owns the camera, the encoder and the motion-vector feed; the
/// core only redirects its output, waits on its progress and grabs stills.
/// Acquiring the pipeline is the one operation whose failure is fatal to the
/// process.
#[async_trait]
pub trait CapturePipeline: Send + Sync {
    /// Wait until roughly `duration` of recording has been produced. Bounded
    /// by wall clock; this is the control loop's only suspension point.
    async fn wait_recording(&self, duration: Duration) -> Result<()>;

    /// Atomically redirect the live encoder's output.
    async fn split_output(&self, target: SplitTarget<'_>) -> Result<()>;

    /// Grab one full-resolution still frame without interrupting video
    /// encoding.
    async fn capture_still(&self, path: &Path) -> Result<()>;
}

/// Consumer of the pipeline's motion-vector frame feed.
///
/// One method is the whole contract; the pipeline invokes it once per
/// analysis tick, strictly in arrival order.
pub trait MotionSink: Send + Sync {
    fn analyze(&self, frame: &MotionFrame, now: Instant) -> Result<()>;
}

impl MotionSink for crate::classifier::MotionClassifier {
    fn analyze(&self, frame: &MotionFrame, now: Instant) -> Result<()> {
        MotionClassifier::analyze(self, frame, now)
    }
}
