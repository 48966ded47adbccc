use crate::config::MotionConfig;
use crate::error::Result;
use crate::frame::MotionFrame;

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Motion detection state shared between the classifier and the recording
/// controller. The classifier is the sole writer; the controller only reads.
#[derive(Debug, Clone, Copy)]
pub struct MotionState {
    pub active: bool,
    pub last_motion: Option<Instant>,
}

impl MotionState {
    fn idle() -> Self {
        Self {
            active: false,
            last_motion: None,
        }
    }
}

/// Read-mostly wrapper around [`MotionState`].
///
/// Single-writer/single-reader by protocol, so a plain RwLock is enough; no
/// reader ever observes a torn state.
#[derive(Debug)]
pub struct MotionGate {
    state: RwLock<MotionState>,
}

impl MotionGate {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MotionState::idle()),
        }
    }

    pub fn snapshot(&self) -> MotionState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    /// Quiet time since the last qualifying frame, if any motion was ever seen.
    pub fn quiet_for(&self, now: Instant) -> Option<Duration> {
        let state = self.state.read();
        state.last_motion.map(|t| now.saturating_duration_since(t))
    }

    /// Force the gate inactive. Used once after the startup warm-up window to
    /// discard initialization transients.
    pub fn force_inactive(&self) {
        self.state.write().active = false;
    }

    pub(crate) fn record_motion(&self, now: Instant) {
        let mut state = self.state.write();
        state.active = true;
        state.last_motion = Some(now);
    }

    fn expire(&self) {
        self.state.write().active = false;
    }
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateful motion classifier over a stream of motion-vector frames.
///
/// A frame registers motion when strictly more than `vector_count` vectors
/// have magnitude strictly greater than `magnitude`. Motion then coasts until
/// `timeout` elapses without another qualifying frame; there is no debounce
/// on the way in. This trades false positives for responsiveness.
pub struct MotionClassifier {
    config: MotionConfig,
    gate: std::sync::Arc<MotionGate>,
}

impl MotionClassifier {
    pub fn new(config: MotionConfig, gate: std::sync::Arc<MotionGate>) -> Self {
        Self { config, gate }
    }

    pub fn gate(&self) -> &MotionGate {
        &self.gate
    }

    /// Consume one frame, updating the shared gate. Calls are strictly
    /// sequential, one frame per analysis tick, in arrival order.
    pub fn analyze(&self, frame: &MotionFrame, now: Instant) -> Result<()> {
        let qualifying = frame.count_over(self.config.magnitude);

        if qualifying > self.config.vector_count as usize {
            debug!(
                qualifying,
                threshold = self.config.vector_count,
                "Found motion, resetting latest timestamp"
            );
            self.gate.record_motion(now);
            return Ok(());
        }

        let state = self.gate.snapshot();
        if state.active {
            if let Some(last) = state.last_motion {
                if now.saturating_duration_since(last) > self.config.timeout() {
                    debug!(
                        timeout_secs = self.config.timeout_secs,
                        "No motion within timeout, resetting motion detection"
                    );
                    self.gate.expire();
                }
            }
        }

        Ok(())
    }
}
