//! Streaming FFmpeg subprocesses.
//!
//! A codec backend writes its input to the child's stdin and drains stdout
//! on a task of its own; stderr is collected in the background so a failed
//! exit can report what FFmpeg said.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::SpliceError;

/// Bytes of stderr kept for error reports.
const STDERR_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg {0} is not piped")]
    Pipe(&'static str),

    #[error("failed to write to ffmpeg: {0}")]
    Write(#[source] std::io::Error),

    #[error("ffmpeg input already closed")]
    InputClosed,

    #[error("ffmpeg exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("ffmpeg process error: {0}")]
    Wait(#[source] std::io::Error),
}

impl From<FfmpegError> for SpliceError {
    fn from(e: FfmpegError) -> Self {
        SpliceError::Codec(e.to_string())
    }
}

/// Check if the FFmpeg binary can be run.
pub async fn is_available(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// One running FFmpeg child with piped stdio.
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    /// Spawn `binary` with `args`. Returns the process and its stdout,
    /// which the caller must keep draining.
    pub fn spawn(binary: &Path, args: &[String]) -> Result<(Self, ChildStdout), FfmpegError> {
        debug!(binary = %binary.display(), ?args, "spawning ffmpeg");
        let mut child = Command::new(binary)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FfmpegError::Spawn {
                binary: binary.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(FfmpegError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(FfmpegError::Pipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or(FfmpegError::Pipe("stderr"))?;
        let collector = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf.truncate(STDERR_LIMIT);
            String::from_utf8_lossy(&buf).trim().to_string()
        });

        Ok((
            Self {
                child,
                stdin: Some(stdin),
                stderr: Some(collector),
            },
            stdout,
        ))
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), FfmpegError> {
        let stdin = self.stdin.as_mut().ok_or(FfmpegError::InputClosed)?;
        stdin.write_all(data).await.map_err(FfmpegError::Write)
    }

    /// Signal end of input.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Close input, wait for exit, and report a non-zero status with the
    /// collected stderr.
    pub async fn finish(&mut self) -> Result<(), FfmpegError> {
        self.close_stdin();
        let status = self.child.wait().await.map_err(FfmpegError::Wait)?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(FfmpegError::Exited {
                status: status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!(%stderr, "ffmpeg stderr");
        }
        Ok(())
    }

    /// Stop the child without waiting for its output.
    pub async fn kill(&mut self) {
        self.close_stdin();
        let _ = self.child.kill().await;
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let missing = Path::new("/nonexistent/ffmpeg");
        assert!(!is_available(missing).await);
        let err = FfmpegProcess::spawn(missing, &[]).err().unwrap();
        assert!(matches!(err, FfmpegError::Spawn { .. }));
        assert!(matches!(SpliceError::from(err), SpliceError::Codec(_)));
    }
}
