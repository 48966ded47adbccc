use super::{CapturePipeline, MotionSink, SplitTarget};
use crate::buffer::CircularBuffer;
use crate::config::{MotionConfig, PipelineConfig, RecordingConfig};
use crate::error::{MotioncamError, Result};
use crate::flow::BlockMatcher;

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Analysis stream frame rate; motion estimation does not need more.
const ANALYSIS_FPS: u32 = 4;
const CHUNK_SIZE: usize = 32 * 1024;
const STILL_TIMEOUT: Duration = Duration::from_secs(10);

enum Route {
    Buffer,
    File(tokio::fs::File),
}

/// Capture pipeline backed by external ffmpeg processes.
///
/// One long-lived encoder produces the main H.264 elementary stream on its
/// stdout; a router task forwards each chunk to the circular buffer or the
/// current after-segment file depending on where the output was last split.
/// A second low-resolution grayscale stream feeds the block matcher, whose
/// frames go straight into the motion sink. Stills are one-shot invocations.
pub struct FfmpegPipeline {
    ffmpeg: String,
    device: String,
    flip: bool,
    buffer: Arc<CircularBuffer>,
    route: Arc<Mutex<Route>>,
    main_child: Mutex<Option<Child>>,
    analysis_child: Mutex<Option<Child>>,
}

impl FfmpegPipeline {
    pub fn new(
        pipeline: &PipelineConfig,
        recording: &RecordingConfig,
        buffer: Arc<CircularBuffer>,
    ) -> Self {
        Self {
            ffmpeg: pipeline.ffmpeg.clone(),
            device: pipeline.device.clone(),
            flip: recording.flip,
            buffer,
            route: Arc::new(Mutex::new(Route::Buffer)),
            main_child: Mutex::new(None),
            analysis_child: Mutex::new(None),
        }
    }

    fn input_args(&self, cmd: &mut Command) {
        if self.device.starts_with("/dev/video") {
            cmd.args(["-f", "v4l2"]);
        }
        cmd.arg("-i").arg(&self.device);
    }

    fn flip_filter(&self) -> Option<&'static str> {
        // 180 degree rotation
        self.flip.then_some("hflip,vflip")
    }

    /// Spawn both encoder legs. Failure here is fatal to the process; the
    /// caller does not retry.
    pub async fn start(&self, motion: &MotionConfig, sink: Arc<dyn MotionSink>) -> Result<()> {
        self.spawn_main().await?;
        self.spawn_analysis(motion, sink).await?;
        info!("Capture pipeline started on {}", self.device);
        Ok(())
    }

    async fn spawn_main(&self) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        self.input_args(&mut cmd);
        if let Some(filter) = self.flip_filter() {
            cmd.args(["-vf", filter]);
        }
        cmd.args([
            "-an",
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-f",
            "h264",
            "pipe:1",
        ]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            MotioncamError::pipeline(format!("failed to spawn encoder on {}: {}", self.device, e))
        })?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MotioncamError::pipeline("encoder stdout unavailable"))?;

        let route = self.route.clone();
        let buffer = self.buffer.clone();
        tokio::spawn(async move {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => {
                        debug!("Encoder stream ended");
                        break;
                    }
                    Ok(n) => {
                        let mut route = route.lock().await;
                        match &mut *route {
                            Route::Buffer => buffer.write(chunk[..n].to_vec(), Instant::now()),
                            Route::File(file) => {
                                if let Err(e) = file.write_all(&chunk[..n]).await {
                                    error!("After-segment write failed: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Encoder read failed: {}", e);
                        break;
                    }
                }
            }
        });

        *self.main_child.lock().await = Some(child);
        Ok(())
    }

    async fn spawn_analysis(&self, motion: &MotionConfig, sink: Arc<dyn MotionSink>) -> Result<()> {
        let (width, height) = motion.size;

        let mut filter = String::new();
        if let Some(flip) = self.flip_filter() {
            filter.push_str(flip);
            filter.push(',');
        }
        filter.push_str(&format!(
            "fps={},scale={}:{},format=gray",
            ANALYSIS_FPS, width, height
        ));

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        self.input_args(&mut cmd);
        cmd.args(["-vf", &filter, "-f", "rawvideo", "pipe:1"]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            MotioncamError::pipeline(format!(
                "failed to spawn analysis stream on {}: {}",
                self.device, e
            ))
        })?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MotioncamError::pipeline("analysis stdout unavailable"))?;

        let mut matcher = BlockMatcher::new(width, height);
        tokio::spawn(async move {
            let mut raw = vec![0u8; matcher.frame_len()];
            loop {
                if let Err(e) = stdout.read_exact(&mut raw).await {
                    debug!("Analysis stream ended: {}", e);
                    break;
                }
                if let Some(frame) = matcher.estimate(&raw) {
                    // A malformed frame is a contract error; fail that frame
                    // only and keep analyzing.
                    if let Err(e) = sink.analyze(&frame, Instant::now()) {
                        error!("Motion analysis failed: {}", e);
                    }
                }
            }
        });

        *self.analysis_child.lock().await = Some(child);
        Ok(())
    }

    /// Kill both encoder legs. Safe to call from any state, including before
    /// start.
    pub async fn stop(&self) {
        for slot in [&self.main_child, &self.analysis_child] {
            if let Some(mut child) = slot.lock().await.take() {
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill encoder process: {}", e);
                }
                let _ = child.wait().await;
            }
        }
        *self.route.lock().await = Route::Buffer;
        info!("Capture pipeline stopped");
    }
}

#[async_trait]
impl CapturePipeline for FfmpegPipeline {
    async fn wait_recording(&self, duration: Duration) -> Result<()> {
        tokio::time::sleep(duration).await;

        // The wait doubles as a liveness check on the producer
        let mut guard = self.main_child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Some(status) = child.try_wait()? {
                return Err(MotioncamError::pipeline(format!(
                    "encoder exited unexpectedly with {:?}",
                    status.code()
                )));
            }
        }
        Ok(())
    }

    async fn split_output(&self, target: SplitTarget<'_>) -> Result<()> {
        let mut route = self.route.lock().await;
        match target {
            SplitTarget::File(path) => {
                let file = tokio::fs::File::create(path).await?;
                debug!("Split recording output to {}", path.display());
                *route = Route::File(file);
            }
            SplitTarget::Buffer => {
                if let Route::File(file) = &mut *route {
                    file.flush().await?;
                }
                debug!("Split recording output back to circular buffer");
                *route = Route::Buffer;
            }
        }
        Ok(())
    }

    async fn capture_still(&self, path: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        self.input_args(&mut cmd);
        if let Some(filter) = self.flip_filter() {
            cmd.args(["-vf", filter]);
        }
        cmd.args(["-frames:v", "1", "-y"]).arg(path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = match timeout(STILL_TIMEOUT, cmd.status()).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(MotioncamError::pipeline(format!(
                    "still capture timed out for {}",
                    path.display()
                )))
            }
        };

        if !status.success() {
            return Err(MotioncamError::pipeline(format!(
                "still capture exited with {:?} for {}",
                status.code(),
                path.display()
            )));
        }
        Ok(())
    }
}
