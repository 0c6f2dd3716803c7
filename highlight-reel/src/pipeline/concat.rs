//! Stream-copy concatenation of downloaded clips.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::utils::fs::sorted_files_with_extension;
use crate::utils::process::run_command_with_logs;
use crate::{Error, Result};

pub const MANIFEST_NAME: &str = "files.txt";

/// Upper bound for one concatenation run.
pub const DEFAULT_CONCAT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Write `dir/files.txt` listing every `.mp4` in `dir` in name order.
pub async fn write_manifest(dir: &Path) -> Result<PathBuf> {
    let clips = sorted_files_with_extension(dir, "mp4").await?;
    if clips.is_empty() {
        return Err(Error::Concat(format!("no clips in {}", dir.display())));
    }

    let mut manifest = String::new();
    for clip in &clips {
        if let Some(name) = clip.file_name() {
            // Clip names are generated, so no quote escaping is needed.
            manifest.push_str(&format!("file '{}'\n", name.to_string_lossy()));
        }
    }

    let path = dir.join(MANIFEST_NAME);
    tokio::fs::write(&path, manifest)
        .await
        .map_err(|e| Error::io_path("writing", &path, e))?;
    debug!(clips = clips.len(), manifest = %path.display(), "Wrote concat manifest");
    Ok(path)
}

#[async_trait]
pub trait Concatenator: Send + Sync {
    /// Join the clips listed in `manifest` into `output`.
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<()>;
}

/// ffmpeg's concat demuxer with stream copy; nothing is re-encoded.
pub struct FfmpegConcatenator {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegConcatenator {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    fn build_args(manifest: &Path, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        args.push("-y".to_string());
        args.push("-hide_banner".to_string());
        args.push("-nostats".to_string());
        args.extend(["-loglevel".to_string(), "error".to_string()]);
        args.extend(["-f".to_string(), "concat".to_string()]);
        args.extend(["-safe".to_string(), "0".to_string()]);
        args.extend(["-i".to_string(), manifest.to_string_lossy().into_owned()]);
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Concatenator for FfmpegConcatenator {
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<()> {
        let args = Self::build_args(manifest, output);
        debug!("FFmpeg args: {:?}", args);

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&args).env("LC_ALL", "C");

        let command_output = run_command_with_logs(&mut cmd, self.timeout).await?;
        if !command_output.status.success() {
            let tail = command_output.stderr_tail(5);
            return Err(Error::Concat(format!(
                "ffmpeg failed with exit code {}: {}",
                command_output.status.code().unwrap_or(-1),
                if tail.is_empty() { "unknown ffmpeg error" } else { tail.as_str() }
            )));
        }

        let size = tokio::fs::metadata(output)
            .await
            .map_err(|e| Error::io_path("inspecting", output, e))?
            .len();
        if size == 0 {
            return Err(Error::Concat(format!("{} is empty", output.display())));
        }

        info!(
            "Concatenation completed in {:.2}s: {} ({} bytes)",
            command_output.duration.as_secs_f64(),
            output.display(),
            size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manifest_lists_clips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0002.mp4", "0000.mp4", "0001.mp4", "notes.txt"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let manifest = write_manifest(dir.path()).await.unwrap();
        let contents = tokio::fs::read_to_string(&manifest).await.unwrap();
        assert_eq!(
            contents,
            "file '0000.mp4'\nfile '0001.mp4'\nfile '0002.mp4'\n"
        );
    }

    #[tokio::test]
    async fn test_manifest_requires_clips() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_manifest(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Concat(_)));
    }

    #[test]
    fn test_build_args() {
        let args = FfmpegConcatenator::build_args(Path::new("/s/files.txt"), Path::new("/o/out.mp4"));
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i /s/files.txt -c copy /o/out.mp4"));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails() {
        let dir = tempfile::tempdir().unwrap();
        let concat = FfmpegConcatenator::new("no-such-ffmpeg-binary", Duration::from_secs(1));
        let err = concat
            .concat(&dir.path().join(MANIFEST_NAME), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no-such-ffmpeg-binary"));
    }
}
