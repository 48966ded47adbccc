use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotioncamConfig {
    pub motion: MotionConfig,
    pub recording: RecordingConfig,
    pub convert: ConvertConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotionConfig {
    /// Analysis resolution (width, height) for the motion-vector stream
    #[serde(default = "default_motion_size")]
    pub size: (u32, u32),

    /// Vector magnitude a block must exceed to count towards detection
    #[serde(default = "default_motion_magnitude")]
    pub magnitude: u8,

    /// Number of qualifying vectors a frame must exceed to register motion
    #[serde(default = "default_motion_vector_count")]
    pub vector_count: u32,

    /// Seconds without a qualifying frame before motion is considered over
    #[serde(default = "default_motion_timeout_secs")]
    pub timeout_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Rotate the camera image 180 degrees
    #[serde(default = "default_flip")]
    pub flip: bool,

    /// Pre-roll duration retained in the circular buffer, in seconds
    #[serde(default = "default_circular_secs")]
    pub circular_secs: u32,

    /// Seconds between still images while an episode is active
    #[serde(default = "default_still_img_interval_secs")]
    pub still_img_interval_secs: f64,

    /// Main control loop tick interval in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: f64,

    /// Startup warm-up before classifier output is honored, in seconds
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConvertConfig {
    /// Enable post-quiet conversion of assembled episodes
    #[serde(default = "default_convert_enabled")]
    pub enabled: bool,

    /// Seconds of quiet after the last motion before conversion fires
    #[serde(default = "default_convert_after_quiet_secs")]
    pub after_quiet_secs: f64,

    /// External transcoder binary
    #[serde(default = "default_convert_tool")]
    pub tool: String,

    /// Bound on a single transcoder invocation, in seconds
    #[serde(default = "default_convert_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory receiving episode videos and stills
    #[serde(default = "default_storage_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Capture device handed to the external encoder
    #[serde(default = "default_pipeline_device")]
    pub device: String,

    /// External encoder binary for the live pipeline
    #[serde(default = "default_pipeline_ffmpeg")]
    pub ffmpeg: String,
}

impl MotionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl RecordingConfig {
    pub fn circular(&self) -> Duration {
        Duration::from_secs(self.circular_secs as u64)
    }

    pub fn still_img_interval(&self) -> Duration {
        Duration::from_secs_f64(self.still_img_interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(self.tick_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs_f64(self.warmup_secs)
    }
}

impl ConvertConfig {
    pub fn after_quiet(&self) -> Duration {
        Duration::from_secs_f64(self.after_quiet_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MotioncamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("motioncam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default(
                "motion.size",
                vec![default_motion_size().0, default_motion_size().1],
            )?
            .set_default("motion.magnitude", default_motion_magnitude())?
            .set_default("motion.vector_count", default_motion_vector_count())?
            .set_default("motion.timeout_secs", default_motion_timeout_secs())?
            .set_default("recording.flip", default_flip())?
            .set_default("recording.circular_secs", default_circular_secs())?
            .set_default(
                "recording.still_img_interval_secs",
                default_still_img_interval_secs(),
            )?
            .set_default("recording.tick_secs", default_tick_secs())?
            .set_default("recording.warmup_secs", default_warmup_secs())?
            .set_default("convert.enabled", default_convert_enabled())?
            .set_default(
                "convert.after_quiet_secs",
                default_convert_after_quiet_secs(),
            )?
            .set_default("convert.tool", default_convert_tool())?
            .set_default("convert.timeout_secs", default_convert_timeout_secs())?
            .set_default("storage.path", default_storage_path())?
            .set_default("pipeline.device", default_pipeline_device())?
            .set_default("pipeline.ffmpeg", default_pipeline_ffmpeg())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with MOTIONCAM_ prefix
            .add_source(Environment::with_prefix("MOTIONCAM").separator("_"))
            .build()?;

        let config: MotioncamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motion.size.0 == 0 || self.motion.size.1 == 0 {
            return Err(ConfigError::Message(
                "Motion analysis size must be greater than 0".to_string(),
            ));
        }

        if self.motion.timeout_secs <= 0.0 {
            return Err(ConfigError::Message(
                "Motion timeout must be greater than 0".to_string(),
            ));
        }

        if self.recording.circular_secs == 0 {
            return Err(ConfigError::Message(
                "Circular buffer duration must be greater than 0".to_string(),
            ));
        }

        if self.recording.still_img_interval_secs <= 0.0 {
            return Err(ConfigError::Message(
                "Still image interval must be greater than 0".to_string(),
            ));
        }

        if self.recording.tick_secs <= 0.0 {
            return Err(ConfigError::Message(
                "Tick interval must be greater than 0".to_string(),
            ));
        }

        if self.convert.enabled && self.convert.after_quiet_secs <= 0.0 {
            return Err(ConfigError::Message(
                "Conversion quiet period must be greater than 0".to_string(),
            ));
        }

        if self.convert.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Transcoder timeout must be greater than 0".to_string(),
            ));
        }

        if self.storage.path.is_empty() {
            return Err(ConfigError::Message(
                "Storage path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for MotioncamConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig {
                size: default_motion_size(),
                magnitude: default_motion_magnitude(),
                vector_count: default_motion_vector_count(),
                timeout_secs: default_motion_timeout_secs(),
            },
            recording: RecordingConfig {
                flip: default_flip(),
                circular_secs: default_circular_secs(),
                still_img_interval_secs: default_still_img_interval_secs(),
                tick_secs: default_tick_secs(),
                warmup_secs: default_warmup_secs(),
            },
            convert: ConvertConfig {
                enabled: default_convert_enabled(),
                after_quiet_secs: default_convert_after_quiet_secs(),
                tool: default_convert_tool(),
                timeout_secs: default_convert_timeout_secs(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
            },
            pipeline: PipelineConfig {
                device: default_pipeline_device(),
                ffmpeg: default_pipeline_ffmpeg(),
            },
        }
    }
}

// Default value functions
fn default_motion_size() -> (u32, u32) {
    (640, 480)
}
fn default_motion_magnitude() -> u8 {
    30
}
fn default_motion_vector_count() -> u32 {
    20
}
fn default_motion_timeout_secs() -> f64 {
    5.0
}

fn default_flip() -> bool {
    false
}
fn default_circular_secs() -> u32 {
    5
}
fn default_still_img_interval_secs() -> f64 {
    0.25
}
fn default_tick_secs() -> f64 {
    1.0
}
fn default_warmup_secs() -> f64 {
    2.0
}

fn default_convert_enabled() -> bool {
    false
}
fn default_convert_after_quiet_secs() -> f64 {
    30.0
}
fn default_convert_tool() -> String {
    "ffmpeg".to_string()
}
fn default_convert_timeout_secs() -> u64 {
    120
}

fn default_storage_path() -> String {
    "./events".to_string()
}

fn default_pipeline_device() -> String {
    "/dev/video0".to_string()
}
fn default_pipeline_ffmpeg() -> String {
    "ffmpeg".to_string()
}
