use crate::assembler::EventFileAssembler;
use crate::buffer::CircularBuffer;
use crate::classifier::MotionGate;
use crate::config::MotioncamConfig;
use crate::episode::RecordingEpisode;
use crate::error::Result;
use crate::pipeline::{CapturePipeline, SplitTarget};

use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recording state machine: drives the circular pre-roll buffer and the live
/// split recording off the shared motion gate.
///
/// Two states. Idle: the encoder feeds the circular buffer and nothing is on
/// disk. EventCapturing: the encoder feeds a dedicated after-segment file
/// while stills accumulate, until motion expires and the episode's segments
/// are merged. A third implicit branch converts the most recent merged
/// episode after a configurable quiet period.
pub struct RecordingController {
    config: MotioncamConfig,
    pipeline: Arc<dyn CapturePipeline>,
    buffer: Arc<CircularBuffer>,
    gate: Arc<MotionGate>,
    assembler: EventFileAssembler,
    out_dir: PathBuf,
    cancel: CancellationToken,
    last_assembled: Option<PathBuf>,
}

impl RecordingController {
    pub fn new(
        config: MotioncamConfig,
        pipeline: Arc<dyn CapturePipeline>,
        buffer: Arc<CircularBuffer>,
        gate: Arc<MotionGate>,
        cancel: CancellationToken,
    ) -> Self {
        let assembler = EventFileAssembler::new(&config.convert);
        let out_dir = PathBuf::from(&config.storage.path);
        Self {
            config,
            pipeline,
            buffer,
            gate,
            assembler,
            out_dir,
            cancel,
            last_assembled: None,
        }
    }

    /// Most recently merged episode file still awaiting conversion, if any.
    pub fn last_assembled(&self) -> Option<&PathBuf> {
        self.last_assembled.as_ref()
    }

    /// Run the control loop until cancelled.
    ///
    /// Errors in one episode's processing are logged and never abort
    /// monitoring of subsequent episodes; only losing the pipeline itself
    /// ends the loop with an error.
    pub async fn run(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir).await?;

        // Avoid spurious motion detection from startup transients
        self.pipeline
            .wait_recording(self.config.recording.warmup())
            .await?;
        self.gate.force_inactive();
        info!("Warm-up complete, monitoring for motion");

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping recording loop");
                break;
            }

            self.pipeline
                .wait_recording(self.config.recording.tick())
                .await?;

            if self.gate.is_active() {
                if let Err(e) = self.run_episode().await {
                    error!("Episode processing failed: {}", e);
                }
            } else if self.config.convert.enabled {
                self.maybe_convert(Instant::now()).await;
            }
        }

        Ok(())
    }

    /// One full EventCapturing pass: open the episode, capture stills while
    /// motion lasts, then close and merge.
    async fn run_episode(&mut self) -> Result<()> {
        let episode_start = Local::now();
        let mut episode = RecordingEpisode::open(&self.out_dir, episode_start);

        info!("Motion detected, opening episode {}", episode.ts_key());

        // Redirect the live encoder away from the buffer first; the buffer is
        // only drained once nothing is writing to it.
        self.pipeline
            .split_output(SplitTarget::File(episode.after_path()))
            .await?;
        let pre_roll_bytes = self
            .buffer
            .flush_to_file(episode.pre_roll_path())
            .await?;
        debug!(
            "Flushed {} pre-roll bytes for episode {}",
            pre_roll_bytes,
            episode.ts_key()
        );

        while self.gate.is_active() && !self.cancel.is_cancelled() {
            let still = episode.next_still_path(&self.out_dir, Local::now());
            if let Err(e) = self.pipeline.capture_still(&still).await {
                warn!("Still capture failed for {}: {}", still.display(), e);
            }
            self.pipeline
                .wait_recording(self.config.recording.still_img_interval())
                .await?;
        }

        if self.cancel.is_cancelled() {
            // Forced shutdown: leave the open episode's artifacts on disk
            // unmerged rather than racing the pipeline teardown.
            warn!(
                "Shutdown during episode {}; segments left unmerged",
                episode.ts_key()
            );
            return Ok(());
        }

        self.pipeline.split_output(SplitTarget::Buffer).await?;

        let merged = self
            .assembler
            .assemble(episode.pre_roll_path(), episode.after_path())
            .await?;

        info!(
            "Episode {} closed: {} stills, merged into {}",
            episode.ts_key(),
            episode.stills().len(),
            merged.display()
        );
        self.last_assembled = Some(merged);

        Ok(())
    }

    /// Idle-state housekeeping: convert the most recent merged episode once
    /// the quiet period has elapsed. Guarded against firing with no completed
    /// episode on record, and never re-fires for the same file.
    async fn maybe_convert(&mut self, now: Instant) {
        let candidate = match &self.last_assembled {
            Some(path) => path.clone(),
            None => return,
        };

        let quiet = match self.gate.quiet_for(now) {
            Some(quiet) => quiet,
            None => return,
        };

        if quiet <= self.config.convert.after_quiet() {
            return;
        }

        match self.assembler.convert(&candidate).await {
            Ok(Some(converted)) => {
                info!("Episode converted to {}", converted.display());
            }
            Ok(None) => {
                debug!("Conversion skipped, {} already gone", candidate.display());
            }
            Err(e) => {
                // Source is retained for manual retry; no automatic retry
                warn!("Conversion failed: {}", e);
            }
        }

        // One shot per assembled file regardless of outcome
        self.last_assembled = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MockCapturePipeline, MockStep};

    fn test_config(dir: &std::path::Path) -> MotioncamConfig {
        let mut config = MotioncamConfig::default();
        config.storage.path = dir.to_string_lossy().to_string();
        config
    }

    struct Harness {
        controller: RecordingController,
        pipeline: Arc<MockCapturePipeline>,
        buffer: Arc<CircularBuffer>,
        out_dir: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(config_tweak: impl FnOnce(&mut MotioncamConfig), script: Vec<MockStep>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config_tweak(&mut config);

        let buffer = Arc::new(CircularBuffer::new(config.recording.circular()));
        let gate = Arc::new(MotionGate::new());
        let cancel = CancellationToken::new();
        let pipeline = Arc::new(MockCapturePipeline::new(
            buffer.clone(),
            gate.clone(),
            cancel.clone(),
            script,
        ));

        let controller = RecordingController::new(
            config,
            pipeline.clone(),
            buffer.clone(),
            gate,
            cancel,
        );

        Harness {
            controller,
            pipeline,
            buffer,
            out_dir: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    fn find_with_extension(dir: &std::path::Path, ext: &str) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == ext).unwrap_or(false))
            .collect();
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_single_episode_flow() {
        let mut h = harness(
            |_| {},
            vec![
                // Warm-up wait: pre-roll bytes accumulate in the buffer
                MockStep {
                    active: None,
                    chunk: Some(vec![1, 2, 3]),
                },
                // First tick: motion starts, one more buffered chunk
                MockStep::active(Some(vec![4])),
                // Still-interval waits inside the episode: chunks now land in
                // the after-segment
                MockStep::active(Some(vec![9, 9])),
                MockStep::inactive(Some(vec![8])),
                // Next tick after close; script then runs out and cancels
                MockStep::idle(),
            ],
        );

        h.controller.run().await.unwrap();

        // Exactly one split-away and one split-back
        assert_eq!(h.pipeline.splits_to_file.lock().len(), 1);
        assert_eq!(*h.pipeline.splits_to_buffer.lock(), 1);

        // The after-segment was merged and deleted
        assert!(!h.out_dir.join("after.h264").exists());

        // Merged file = 4 pre-roll bytes + 3 after bytes
        let videos = find_with_extension(&h.out_dir, "h264");
        assert_eq!(videos.len(), 1);
        assert_eq!(std::fs::read(&videos[0]).unwrap(), vec![1, 2, 3, 4, 9, 9, 8]);
        assert_eq!(h.controller.last_assembled(), Some(&videos[0]));

        // Buffer drained exactly once and left empty
        assert!(h.buffer.is_empty());
        assert_eq!(h.buffer.stats().drains, 1);

        // One still per active still-interval tick, counter from 001
        let stills = find_with_extension(&h.out_dir, "jpg");
        assert_eq!(stills.len(), 2);
        assert!(stills[0].to_string_lossy().ends_with("-001.jpg"));
        assert!(stills[1].to_string_lossy().ends_with("-002.jpg"));
    }

    #[tokio::test]
    async fn test_warmup_transient_does_not_trigger() {
        let mut h = harness(
            |_| {},
            vec![
                // Spurious motion during warm-up
                MockStep::active(None),
                // Quiet ticks afterwards
                MockStep::idle(),
                MockStep::idle(),
            ],
        );

        h.controller.run().await.unwrap();

        assert!(h.pipeline.splits_to_file.lock().is_empty());
        assert!(find_with_extension(&h.out_dir, "h264").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_mid_episode_leaves_segments_unmerged() {
        let mut h = harness(
            |_| {},
            vec![
                MockStep {
                    active: None,
                    chunk: Some(vec![1]),
                },
                MockStep::active(None),
                // Motion still active when the script runs out: cancellation
                // fires inside the still loop
                MockStep::active(Some(vec![2])),
            ],
        );

        h.controller.run().await.unwrap();

        // Episode was opened but never closed: no split back, no merge
        assert_eq!(h.pipeline.splits_to_file.lock().len(), 1);
        assert_eq!(*h.pipeline.splits_to_buffer.lock(), 0);
        assert!(h.out_dir.join("after.h264").exists());
        assert_eq!(find_with_extension(&h.out_dir, "h264").len(), 2);
        assert!(h.controller.last_assembled().is_none());
    }

    #[tokio::test]
    async fn test_still_capture_failure_does_not_abort_episode() {
        let mut h = harness(
            |_| {},
            vec![
                MockStep {
                    active: None,
                    chunk: Some(vec![1]),
                },
                MockStep::active(None),
                MockStep::inactive(Some(vec![2])),
                MockStep::idle(),
            ],
        );
        *h.pipeline.fail_stills.lock() = true;

        h.controller.run().await.unwrap();

        // Episode still closed and merged despite still failures
        assert!(!h.out_dir.join("after.h264").exists());
        assert_eq!(find_with_extension(&h.out_dir, "h264").len(), 1);
        assert!(find_with_extension(&h.out_dir, "jpg").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_quiet_period_conversion() {
        let mut h = harness(
            |config| {
                config.convert.enabled = true;
                config.convert.after_quiet_secs = 0.000001;
                config.convert.tool = "true".to_string();
            },
            vec![
                MockStep {
                    active: None,
                    chunk: Some(vec![1]),
                },
                MockStep::active(None),
                MockStep::inactive(Some(vec![2])),
                // Idle ticks: quiet period elapses, conversion fires once
                MockStep::idle(),
                MockStep::idle(),
            ],
        );

        h.controller.run().await.unwrap();

        // Conversion removed the merged source; candidate cleared
        assert!(find_with_extension(&h.out_dir, "h264").is_empty());
        assert!(h.controller.last_assembled().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transcoder_failure_does_not_escape_loop() {
        let mut h = harness(
            |config| {
                config.convert.enabled = true;
                config.convert.after_quiet_secs = 0.000001;
                config.convert.tool = "false".to_string();
            },
            vec![
                MockStep {
                    active: None,
                    chunk: Some(vec![1]),
                },
                MockStep::active(None),
                MockStep::inactive(Some(vec![2])),
                MockStep::idle(),
                MockStep::idle(),
            ],
        );

        // The loop must finish cleanly despite the failing transcoder
        h.controller.run().await.unwrap();

        // Source retained, converted file absent
        assert_eq!(find_with_extension(&h.out_dir, "h264").len(), 1);
        assert!(find_with_extension(&h.out_dir, "mp4").is_empty());
    }

    #[tokio::test]
    async fn test_convert_without_completed_episode_is_guarded() {
        let mut h = harness(
            |config| {
                config.convert.enabled = true;
                config.convert.after_quiet_secs = 0.000001;
            },
            vec![MockStep::idle(), MockStep::idle(), MockStep::idle()],
        );

        // No episode ever completes; the quiet-period check must not fire
        h.controller.run().await.unwrap();
        assert!(find_with_extension(&h.out_dir, "mp4").is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_episodes() {
        let mut h = harness(
            |_| {},
            vec![
                MockStep {
                    active: None,
                    chunk: Some(vec![1]),
                },
                // First episode
                MockStep::active(None),
                MockStep::inactive(Some(vec![2])),
                // Buffer refills during the idle tick
                MockStep {
                    active: None,
                    chunk: Some(vec![5]),
                },
                // Second episode, one tick later
                MockStep::active(None),
                MockStep::inactive(Some(vec![6])),
                MockStep::idle(),
            ],
        );

        h.controller.run().await.unwrap();

        assert_eq!(h.pipeline.splits_to_file.lock().len(), 2);
        assert_eq!(*h.pipeline.splits_to_buffer.lock(), 2);
        assert_eq!(h.buffer.stats().drains, 2);
        assert!(!h.out_dir.join("after.h264").exists());
    }
}
