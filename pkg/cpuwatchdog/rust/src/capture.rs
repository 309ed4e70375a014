// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::warn;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{Duration, timeout};

/// Longest stderr excerpt kept in a [`CaptureError::Exit`].
const STDERR_EXCERPT_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to collect output of {command}: {source}")]
    Collect {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Whatever the tool wrote to stdout, plus the failure if it had one. The
/// bytes are persisted either way, including the part written before a
/// timeout.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    pub stdout: Vec<u8>,
    pub error: Option<CaptureError>,
}

pub trait CaptureTool: Send + Sync {
    fn capture(&self, pid: i32) -> impl Future<Output = CaptureOutput> + Send;
}

/// Runs `<program> <pid>` and collects its stdout.
#[derive(Debug, Clone)]
pub struct CommandCaptureTool {
    program: String,
    timeout: Duration,
}

impl CommandCaptureTool {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

/// Append everything read from `pipe` to `buf`. Bytes already appended stay
/// there if the future is dropped mid-read.
async fn drain<R>(pipe: Option<R>, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

impl CaptureTool for CommandCaptureTool {
    async fn capture(&self, pid: i32) -> CaptureOutput {
        let mut cmd = Command::new(&self.program);
        cmd.arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return CaptureOutput {
                    stdout: Vec::new(),
                    error: Some(CaptureError::Spawn {
                        command: self.program.clone(),
                        source,
                    }),
                };
            }
        };

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let collected = timeout(self.timeout, async {
            let (out, err) = tokio::join!(
                drain(stdout_pipe, &mut stdout),
                drain(stderr_pipe, &mut stderr)
            );
            out?;
            err?;
            child.wait().await
        })
        .await;

        let error = match collected {
            Ok(Ok(status)) if status.success() => None,
            Ok(Ok(status)) => {
                let stderr = String::from_utf8_lossy(&stderr);
                Some(CaptureError::Exit {
                    command: self.program.clone(),
                    status,
                    stderr: stderr.trim().chars().take(STDERR_EXCERPT_LEN).collect(),
                })
            }
            Ok(Err(source)) => Some(CaptureError::Collect {
                command: self.program.clone(),
                source,
            }),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to kill {} after timeout: {e}", self.program);
                }
                Some(CaptureError::Timeout {
                    command: self.program.clone(),
                    timeout: self.timeout,
                })
            }
        };

        CaptureOutput { stdout, error }
    }
}

/// RFC 3339 at whole-second precision.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let at = at.replace_nanosecond(0).unwrap_or(at);
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Writes each snapshot to `<dir>/<target>-<timestamp>-<suffix>.txt`.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    target_name: String,
    suffix: String,
}

impl SnapshotWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        target_name: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            target_name: target_name.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, at: OffsetDateTime) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.txt",
            self.target_name,
            format_timestamp(at),
            self.suffix
        ))
    }

    pub async fn write(&self, at: OffsetDateTime, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.path_for(at);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}
