use crate::config::ConvertConfig;
use crate::episode::converted_path;
use crate::error::{MotioncamError, Result};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Assembles a closed episode's segments into one file and optionally
/// converts it to a delivery container.
pub struct EventFileAssembler {
    tool: PathBuf,
    convert_timeout: Duration,
}

impl EventFileAssembler {
    pub fn new(config: &ConvertConfig) -> Self {
        Self {
            tool: PathBuf::from(&config.tool),
            convert_timeout: config.timeout(),
        }
    }

    /// Append the after-segment onto the end of the pre-roll file, then
    /// delete the after-segment. Both segments share a container and codec,
    /// so byte concatenation is a valid merge.
    ///
    /// Returns the merged path (the pre-roll path). A missing source is an
    /// I/O error, surfaced to the caller and never retried.
    pub async fn assemble(&self, pre_roll: &Path, after: &Path) -> Result<PathBuf> {
        if !fs::try_exists(pre_roll).await? {
            return Err(MotioncamError::MissingSegment {
                path: pre_roll.to_path_buf(),
            });
        }

        let after_bytes = fs::read(after).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MotioncamError::MissingSegment {
                    path: after.to_path_buf(),
                }
            } else {
                MotioncamError::Io(e)
            }
        })?;

        let mut merged = fs::OpenOptions::new().append(true).open(pre_roll).await?;
        merged.write_all(&after_bytes).await?;
        merged.flush().await?;
        drop(merged);

        fs::remove_file(after).await?;

        debug!(
            "Appended {} after-segment bytes onto {}",
            after_bytes.len(),
            pre_roll.display()
        );
        Ok(pre_roll.to_path_buf())
    }

    /// Convert a merged episode to the delivery container via the external
    /// transcoder, stream-copying audio and video. Deletes the source on
    /// success and retains it on failure.
    ///
    /// Idempotent: an absent source means the file was already converted (or
    /// never existed) and is a no-op, not an error.
    pub async fn convert(&self, merged: &Path) -> Result<Option<PathBuf>> {
        if !fs::try_exists(merged).await? {
            debug!("Nothing to convert at {}", merged.display());
            return Ok(None);
        }

        let output = converted_path(merged);
        info!(
            "Converting {} -> {}",
            merged.display(),
            output.display()
        );

        let child = Command::new(&self.tool)
            .arg("-i")
            .arg(merged)
            .args(["-acodec", "copy", "-vcodec", "copy"])
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        // A hung transcoder is an error, never a retry target
        let status = match timeout(self.convert_timeout, child).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(MotioncamError::TranscodeTimeout {
                    timeout_secs: self.convert_timeout.as_secs(),
                    input: merged.to_path_buf(),
                })
            }
        };

        if !status.success() {
            warn!(
                "Transcoder failed with status {:?} for {}; source retained",
                status.code(),
                merged.display()
            );
            return Err(MotioncamError::Transcode {
                status: status.code().unwrap_or(-1),
                input: merged.to_path_buf(),
            });
        }

        fs::remove_file(merged).await?;
        info!("Converted episode to {}", output.display());
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler_with_tool(tool: &str) -> EventFileAssembler {
        EventFileAssembler {
            tool: PathBuf::from(tool),
            convert_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_assemble_concatenates_and_removes_after() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = dir.path().join("2024-01-01-000000.h264");
        let after = dir.path().join("after.h264");

        std::fs::write(&pre_roll, vec![1u8; 100]).unwrap();
        std::fs::write(&after, vec![2u8; 40]).unwrap();

        let assembler = assembler_with_tool("ffmpeg");
        let merged = assembler.assemble(&pre_roll, &after).await.unwrap();

        assert_eq!(merged, pre_roll);
        let bytes = std::fs::read(&merged).unwrap();
        assert_eq!(bytes.len(), 140);
        assert_eq!(&bytes[..100], &[1u8; 100][..]);
        assert_eq!(&bytes[100..], &[2u8; 40][..]);
        assert!(!after.exists());
    }

    #[tokio::test]
    async fn test_assemble_missing_after_segment_errors() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = dir.path().join("pre.h264");
        std::fs::write(&pre_roll, b"x").unwrap();

        let assembler = assembler_with_tool("ffmpeg");
        let err = assembler
            .assemble(&pre_roll, &dir.path().join("missing.h264"))
            .await
            .unwrap_err();
        assert!(matches!(err, MotioncamError::MissingSegment { .. }));

        // Pre-roll untouched
        assert_eq!(std::fs::read(&pre_roll).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_assemble_unreadable_after_segment_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = dir.path().join("pre.h264");
        std::fs::write(&pre_roll, b"x").unwrap();

        // A directory at the after path fails the read with something other
        // than NotFound; that must not be reported as a missing segment
        let after = dir.path().join("after.h264");
        std::fs::create_dir(&after).unwrap();

        let assembler = assembler_with_tool("ffmpeg");
        let err = assembler.assemble(&pre_roll, &after).await.unwrap_err();
        assert!(matches!(err, MotioncamError::Io(_)));

        // Pre-roll untouched
        assert_eq!(std::fs::read(&pre_roll).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_assemble_missing_pre_roll_errors() {
        let dir = tempfile::tempdir().unwrap();
        let after = dir.path().join("after.h264");
        std::fs::write(&after, b"x").unwrap();

        let assembler = assembler_with_tool("ffmpeg");
        let err = assembler
            .assemble(&dir.path().join("missing.h264"), &after)
            .await
            .unwrap_err();
        assert!(matches!(err, MotioncamError::MissingSegment { .. }));
        // After-segment retained for manual recovery
        assert!(after.exists());
    }

    #[tokio::test]
    async fn test_convert_absent_source_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = assembler_with_tool("ffmpeg");

        let result = assembler
            .convert(&dir.path().join("already-converted.h264"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_success_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("2024-01-01-000000.h264");
        std::fs::write(&merged, b"h264").unwrap();

        // "true" accepts any arguments and exits 0; only the exit status is
        // inspected
        let assembler = assembler_with_tool("true");
        let converted = assembler.convert(&merged).await.unwrap();

        assert_eq!(converted, Some(dir.path().join("2024-01-01-000000.mp4")));
        assert!(!merged.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_hang_is_bounded() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("2024-01-01-000000.h264");
        std::fs::write(&merged, b"h264").unwrap();

        // A transcoder that never finishes on its own
        let tool = dir.path().join("hang.sh");
        std::fs::write(&tool, "#!/bin/sh\nsleep 60\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let assembler = EventFileAssembler {
            tool,
            convert_timeout: Duration::from_millis(300),
        };

        let start = std::time::Instant::now();
        let err = assembler.convert(&merged).await.unwrap_err();

        assert!(matches!(err, MotioncamError::TranscodeTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
        // Source retained for manual retry, no partial output claimed
        assert!(merged.exists());
        assert!(!dir.path().join("2024-01-01-000000.mp4").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_failure_retains_source() {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("2024-01-01-000000.h264");
        std::fs::write(&merged, b"h264").unwrap();

        let assembler = assembler_with_tool("false");
        let err = assembler.convert(&merged).await.unwrap_err();

        assert!(matches!(err, MotioncamError::Transcode { status: 1, .. }));
        assert!(merged.exists());
        assert!(!dir.path().join("2024-01-01-000000.mp4").exists());
    }
}
