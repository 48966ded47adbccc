use super::{CapturePipeline, SplitTarget};
use crate::buffer::CircularBuffer;
use crate::classifier::MotionGate;
use crate::error::{MotioncamError, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One scripted step of a mock recording session, consumed per
/// `wait_recording` call.
#[derive(Debug, Default, Clone)]
pub struct MockStep {
    /// Gate state to apply before the wait returns, if any.
    pub active: Option<bool>,
    /// Encoded chunk the "live encoder" produces during this wait, routed to
    /// wherever the output currently points.
    pub chunk: Option<Vec<u8>>,
}

impl MockStep {
    pub fn active(chunk: Option<Vec<u8>>) -> Self {
        Self {
            active: Some(true),
            chunk,
        }
    }

    pub fn inactive(chunk: Option<Vec<u8>>) -> Self {
        Self {
            active: Some(false),
            chunk,
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }
}

enum Route {
    Buffer,
    File(PathBuf),
}

/// Scripted capture pipeline for deterministic controller tests.
///
/// Each `wait_recording` call consumes one script step, drives the shared
/// motion gate the way a scripted frame feed would, and emits bytes into the
/// currently routed destination. When the script runs out the cancellation
/// token fires, which ends the controller's run loop.
pub struct MockCapturePipeline {
    buffer: Arc<CircularBuffer>,
    gate: Arc<MotionGate>,
    cancel: CancellationToken,
    script: Mutex<VecDeque<MockStep>>,
    route: Mutex<Route>,
    pub splits_to_file: Mutex<Vec<PathBuf>>,
    pub splits_to_buffer: Mutex<u32>,
    pub stills: Mutex<Vec<PathBuf>>,
    pub waits: Mutex<Vec<Duration>>,
    pub fail_stills: Mutex<bool>,
}

impl MockCapturePipeline {
    pub fn new(
        buffer: Arc<CircularBuffer>,
        gate: Arc<MotionGate>,
        cancel: CancellationToken,
        script: Vec<MockStep>,
    ) -> Self {
        Self {
            buffer,
            gate,
            cancel,
            script: Mutex::new(script.into()),
            route: Mutex::new(Route::Buffer),
            splits_to_file: Mutex::new(Vec::new()),
            splits_to_buffer: Mutex::new(0),
            stills: Mutex::new(Vec::new()),
            waits: Mutex::new(Vec::new()),
            fail_stills: Mutex::new(false),
        }
    }

    fn apply_gate(&self, active: bool) {
        if active {
            self.gate.record_motion(Instant::now());
        } else {
            self.gate.force_inactive();
        }
    }

    fn emit(&self, chunk: Vec<u8>) -> Result<()> {
        match &*self.route.lock() {
            Route::Buffer => {
                self.buffer.write(chunk, Instant::now());
                Ok(())
            }
            Route::File(path) => {
                use std::fs::OpenOptions;
                use std::io::Write;
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(&chunk)?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CapturePipeline for MockCapturePipeline {
    async fn wait_recording(&self, duration: Duration) -> Result<()> {
        self.waits.lock().push(duration);

        let step = self.script.lock().pop_front();
        match step {
            Some(step) => {
                if let Some(active) = step.active {
                    self.apply_gate(active);
                }
                if let Some(chunk) = step.chunk {
                    self.emit(chunk)?;
                }
            }
            None => {
                debug!("Mock script exhausted, cancelling");
                self.cancel.cancel();
            }
        }
        Ok(())
    }

    async fn split_output(&self, target: SplitTarget<'_>) -> Result<()> {
        let mut route = self.route.lock();
        match target {
            SplitTarget::Buffer => {
                *route = Route::Buffer;
                *self.splits_to_buffer.lock() += 1;
            }
            SplitTarget::File(path) => {
                *route = Route::File(path.to_path_buf());
                self.splits_to_file.lock().push(path.to_path_buf());
            }
        }
        Ok(())
    }

    async fn capture_still(&self, path: &Path) -> Result<()> {
        if *self.fail_stills.lock() {
            return Err(MotioncamError::pipeline("still capture failed"));
        }
        std::fs::write(path, b"jpeg")?;
        self.stills.lock().push(path.to_path_buf());
        Ok(())
    }
}
