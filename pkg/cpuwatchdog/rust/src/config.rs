// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::assessor::AssessmentConfig;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_METRICS_URL: &str =
    "http://promtheus-0.promtheus-headless.thanos.svc.cluster.local:9090";
pub const DEFAULT_METRIC_NAME: &str = "container_cpu_usage_rate";
pub const DEFAULT_SNAPSHOT_DIR: &str = "/root/logs";

/// Startup parameters of the watchdog. Read once, never reloaded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Pod name of the monitored workload. Used in the metrics query and as
    /// the snapshot file prefix.
    pub target_name: String,
    /// Substring matched against executable names in the process table.
    pub process_name: String,
    /// CPU limit in cores; the raw usage rate is divided by it.
    pub cpu_limit: f64,
    pub hit_threshold: u32,
    /// Percentage of `cpu_limit` at or above which a sample counts as a hit.
    pub breach_rate: f64,
    pub assess_window_secs: u64,
    pub assess_interval_secs: u64,
    pub silence_secs: u64,
    pub metrics_url: String,
    pub metric_name: String,
    pub query_timeout_secs: u64,
    pub capture_command: String,
    pub capture_timeout_secs: u64,
    pub snapshot_dir: PathBuf,
    pub snapshot_suffix: String,
    pub log_level: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            target_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            process_name: "java".to_string(),
            cpu_limit: 8.0,
            hit_threshold: 5,
            breach_rate: 35.0,
            assess_window_secs: 120,
            assess_interval_secs: 15,
            silence_secs: 120,
            metrics_url: DEFAULT_METRICS_URL.to_string(),
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            query_timeout_secs: 10,
            capture_command: "jstack".to_string(),
            capture_timeout_secs: 60,
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            snapshot_suffix: "jstack".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl WatchdogConfig {
    /// Parse a YAML file. Keys that are absent keep their default value.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: WatchdogConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_name.trim().is_empty() {
            bail!("target_name must not be empty");
        }
        if self.process_name.is_empty() {
            bail!("process_name must not be empty");
        }
        if !(self.cpu_limit.is_finite() && self.cpu_limit > 0.0) {
            bail!("cpu_limit must be a positive number, got {}", self.cpu_limit);
        }
        if self.hit_threshold == 0 {
            bail!("hit_threshold must be at least 1");
        }
        if !self.breach_rate.is_finite() {
            bail!("breach_rate must be a finite number");
        }
        for (name, value) in [
            ("assess_window_secs", self.assess_window_secs),
            ("assess_interval_secs", self.assess_interval_secs),
            ("query_timeout_secs", self.query_timeout_secs),
            ("capture_timeout_secs", self.capture_timeout_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.metrics_url.is_empty() {
            bail!("metrics_url must not be empty");
        }
        if self.capture_command.is_empty() {
            bail!("capture_command must not be empty");
        }
        self.level()?;
        Ok(())
    }

    pub fn level(&self) -> Result<log::Level> {
        self.log_level
            .parse()
            .with_context(|| format!("invalid log_level: {}", self.log_level))
    }

    pub fn assessment(&self) -> AssessmentConfig {
        AssessmentConfig {
            hit_threshold: self.hit_threshold,
            breach_rate: self.breach_rate,
            window: Duration::from_secs(self.assess_window_secs),
            interval: Duration::from_secs(self.assess_interval_secs),
            silence: Duration::from_secs(self.silence_secs),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}
