use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Timestamp key used for all on-disk artifact names.
pub const TS_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// One motion episode and the file artifacts it accumulates.
///
/// Created when motion flips on, closed when it flips off; the segment paths
/// are then handed to the assembler and the episode itself is dropped. There
/// is no manifest - the directory listing is the catalog.
#[derive(Debug)]
pub struct RecordingEpisode {
    started_at: DateTime<Local>,
    ts_key: String,
    pre_roll_path: PathBuf,
    after_path: PathBuf,
    stills: Vec<PathBuf>,
    still_counter: u32,
}

impl RecordingEpisode {
    pub fn open(base_dir: &Path, started_at: DateTime<Local>) -> Self {
        let ts_key = started_at.format(TS_FORMAT).to_string();
        Self {
            started_at,
            pre_roll_path: base_dir.join(format!("{}.h264", ts_key)),
            after_path: base_dir.join("after.h264"),
            ts_key,
            stills: Vec::new(),
            still_counter: 0,
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn ts_key(&self) -> &str {
        &self.ts_key
    }

    /// Pre-roll segment; after assembly this same path holds the merged file.
    pub fn pre_roll_path(&self) -> &Path {
        &self.pre_roll_path
    }

    pub fn after_path(&self) -> &Path {
        &self.after_path
    }

    pub fn stills(&self) -> &[PathBuf] {
        &self.stills
    }

    /// Reserve the next still image path. The counter starts at 1 for each
    /// episode; the timestamp is the capture moment, not the episode start.
    pub fn next_still_path(&mut self, base_dir: &Path, now: DateTime<Local>) -> PathBuf {
        self.still_counter += 1;
        let name = format!("{}-{:03}.jpg", now.format(TS_FORMAT), self.still_counter);
        let path = base_dir.join(name);
        self.stills.push(path.clone());
        path
    }
}

/// Converted (delivery-format) path for a merged episode file.
pub fn converted_path(merged: &Path) -> PathBuf {
    merged.with_extension("mp4")
}
