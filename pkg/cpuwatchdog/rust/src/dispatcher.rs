// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::assessor::CaptureSignal;
use crate::capture::{CaptureTool, SnapshotWriter};
use crate::procfs::{PID_NOT_FOUND, ProcessLocator};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Turns capture signals into snapshot files, one attempt per signal.
pub struct Dispatcher<L, T> {
    process_name: String,
    locator: Arc<L>,
    tool: T,
    writer: SnapshotWriter,
}

impl<L: ProcessLocator + 'static, T: CaptureTool> Dispatcher<L, T> {
    pub fn new(
        process_name: impl Into<String>,
        locator: L,
        tool: T,
        writer: SnapshotWriter,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            locator: Arc::new(locator),
            tool,
            writer,
        }
    }

    /// Scanning a procfs mount is blocking file IO, so it runs on the
    /// blocking pool.
    async fn locate(&self) -> Option<i32> {
        let locator = Arc::clone(&self.locator);
        let name = self.process_name.clone();
        match tokio::task::spawn_blocking(move || locator.find_pid(&name)).await {
            Ok(pid) => pid,
            Err(e) => {
                error!("process lookup for {:?} failed: {e}", self.process_name);
                None
            }
        }
    }

    /// Locate the target, capture it and persist the output. A missing
    /// process or a failing tool does not stop the write; the returned path
    /// is `None` only when the write itself failed.
    pub async fn dispatch(&self) -> Option<PathBuf> {
        let pid = match self.locate().await {
            Some(pid) => pid,
            None => {
                warn!(
                    "no process matching {:?} found, capturing with pid {PID_NOT_FOUND}",
                    self.process_name
                );
                PID_NOT_FOUND
            }
        };

        info!("start thread dump, pid: {pid}");
        let output = self.tool.capture(pid).await;
        if let Some(e) = &output.error {
            error!("failed to do thread dump, reason -> {e}");
        }

        let written = self
            .writer
            .write(OffsetDateTime::now_utc(), &output.stdout)
            .await;
        let path = match written {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    "failed to write thread dump to {}, reason -> {e}",
                    self.writer.dir().display()
                );
                None
            }
        };
        info!("finished thread dump, pid: {pid}");
        path
    }

    /// Handle signals until every sender is dropped.
    pub async fn run(self, mut signals: mpsc::Receiver<CaptureSignal>) {
        while let Some(CaptureSignal) = signals.recv().await {
            if let Some(path) = self.dispatch().await {
                info!("thread dump written to {}", path.display());
            }
        }
        info!("capture signal channel closed");
    }
}
