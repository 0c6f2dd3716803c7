//! Publishing collaborator: hands a finished compilation to the video host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;
use url::Url;

use crate::utils::process::run_command_with_logs;
use crate::{Error, Result};

/// What gets published alongside the media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload `file`, returning its public reference URL.
    async fn publish(&self, file: &Path, request: &PublishRequest) -> Result<String>;
}

/// Publishes through an external uploader command.
///
/// Invoked as `<program> <file> --title <t> --description <d> --tag <tag>...`;
/// the last non-empty line the command prints is the public URL.
pub struct CommandPublisher {
    program: PathBuf,
    timeout: Duration,
}

impl CommandPublisher {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, file: &Path, request: &PublishRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(file)
            .arg("--title")
            .arg(&request.title)
            .arg("--description")
            .arg(&request.description);
        for tag in &request.tags {
            cmd.arg("--tag").arg(tag);
        }
        cmd
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(&self, file: &Path, request: &PublishRequest) -> Result<String> {
        let mut cmd = self.command(file, request);
        let output = run_command_with_logs(&mut cmd, self.timeout).await?;

        if !output.status.success() {
            return Err(Error::Publish(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                output.stderr_tail(5)
            )));
        }

        let reference = output
            .stdout
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::Publish("uploader printed no reference".to_string()))?;

        let url = Url::parse(reference)
            .map_err(|e| Error::Publish(format!("uploader returned {reference:?}: {e}")))?;

        info!(
            file = %file.display(),
            duration_secs = output.duration.as_secs_f64(),
            url = %url,
            "Published compilation"
        );
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PublishRequest {
        PublishRequest {
            title: "Curry | GSW vs. LAL | 2024-25".to_string(),
            description: "Season: 2024-25".to_string(),
            tags: vec!["NBA".to_string(), "Stephen Curry".to_string()],
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_command_arguments() {
        let publisher = CommandPublisher::new("uploader", Duration::from_secs(1));
        let cmd = publisher.command(Path::new("/tmp/out.mp4"), &request());
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "/tmp/out.mp4",
                "--title",
                "Curry | GSW vs. LAL | 2024-25",
                "--description",
                "Season: 2024-25",
                "--tag",
                "NBA",
                "--tag",
                "Stephen Curry",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_last_line_is_reference() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(
            dir.path(),
            "ok.sh",
            "echo uploading \"$1\"\necho https://videos.example/watch?v=abc\necho",
        );

        let publisher = CommandPublisher::new(program, Duration::from_secs(10));
        let url = publisher
            .publish(Path::new("/tmp/out.mp4"), &request())
            .await
            .unwrap();
        assert_eq!(url, "https://videos.example/watch?v=abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_and_garbage_output() {
        let dir = tempfile::tempdir().unwrap();

        let failing = script(dir.path(), "fail.sh", "echo quota exceeded >&2\nexit 1");
        let err = CommandPublisher::new(failing, Duration::from_secs(10))
            .publish(Path::new("/tmp/out.mp4"), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(ref msg) if msg.contains("quota exceeded")));

        let garbage = script(dir.path(), "garbage.sh", "echo done");
        let err = CommandPublisher::new(garbage, Duration::from_secs(10))
            .publish(Path::new("/tmp/out.mp4"), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
    }
}
