// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::{debug, warn};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Handed to the capture tool when no process matched.
pub const PID_NOT_FOUND: i32 = -1;

static PROC_ROOT: OnceLock<PathBuf> = OnceLock::new();

pub fn root_path() -> &'static Path {
    PROC_ROOT.get_or_init(|| {
        if let Ok(v) = env::var("HOST_PROC") {
            return v.into();
        }
        "/proc".into()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub exe: String,
}

/// Resolves the pid of the monitored workload.
pub trait ProcessLocator: Send + Sync {
    fn find_pid(&self, name: &str) -> Option<i32>;
}

/// First entry whose executable name contains `name`.
pub fn find_pid<'a>(
    entries: impl IntoIterator<Item = &'a ProcessEntry>,
    name: &str,
) -> Option<i32> {
    entries
        .into_iter()
        .find(|entry| entry.exe.contains(name))
        .map(|entry| entry.pid)
}

/// Executable name from the contents of `/proc/<pid>/stat`. The name sits
/// between the first `(` and the last `)` and may itself contain parentheses
/// or spaces.
fn parse_stat_comm(stat: &str) -> Option<&str> {
    let start = stat.find('(')?;
    let end = stat.rfind(')')?;
    stat.get(start + 1..end)
}

/// Enumerate processes under `root`, ordered by pid. Entries that vanish or
/// cannot be read mid-scan are skipped.
pub fn list_processes(root: &Path) -> std::io::Result<Vec<ProcessEntry>> {
    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(root)? {
        let Ok(dir_entry) = dir_entry else {
            continue;
        };
        let Some(pid) = dir_entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };
        let stat = match fs::read_to_string(dir_entry.path().join("stat")) {
            Ok(stat) => stat,
            Err(e) => {
                debug!("skipping pid {pid}: {e}");
                continue;
            }
        };
        if let Some(exe) = parse_stat_comm(&stat) {
            entries.push(ProcessEntry {
                pid,
                exe: exe.to_string(),
            });
        }
    }
    entries.sort_by_key(|entry| entry.pid);
    Ok(entries)
}

/// Scans a procfs mount on every lookup; pids of restarted workloads change.
#[derive(Debug, Clone)]
pub struct ProcfsLocator {
    root: PathBuf,
}

impl ProcfsLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsLocator {
    fn default() -> Self {
        Self::new(root_path())
    }
}

impl ProcessLocator for ProcfsLocator {
    fn find_pid(&self, name: &str) -> Option<i32> {
        match list_processes(&self.root) {
            Ok(entries) => find_pid(&entries, name),
            Err(e) => {
                warn!("failed to list processes in {}: {e}", self.root.display());
                None
            }
        }
    }
}
