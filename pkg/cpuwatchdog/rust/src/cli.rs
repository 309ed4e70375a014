// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::WatchdogConfig;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Flags and `DD_CW_*` environment variables. Every value left unset falls
/// back to the YAML file, then to the built-in default.
#[derive(Debug, Default, Parser)]
#[command(
    name = "dd-cpu-watchdog",
    version,
    about = "Capture thread dumps on sustained CPU overload"
)]
pub struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "DD_CW_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "DD_CW_TARGET_NAME")]
    pub target_name: Option<String>,

    #[arg(long, env = "DD_CW_PROCESS_NAME")]
    pub process_name: Option<String>,

    #[arg(long, env = "DD_CW_CPU_LIMIT")]
    pub cpu_limit: Option<f64>,

    #[arg(long, env = "DD_CW_HIT_THRESHOLD")]
    pub hit_threshold: Option<u32>,

    #[arg(long, env = "DD_CW_BREACH_RATE")]
    pub breach_rate: Option<f64>,

    #[arg(long, env = "DD_CW_ASSESS_WINDOW_SECS")]
    pub assess_window_secs: Option<u64>,

    #[arg(long, env = "DD_CW_ASSESS_INTERVAL_SECS")]
    pub assess_interval_secs: Option<u64>,

    #[arg(long, env = "DD_CW_SILENCE_SECS")]
    pub silence_secs: Option<u64>,

    #[arg(long, env = "DD_CW_METRICS_URL")]
    pub metrics_url: Option<String>,

    #[arg(long, env = "DD_CW_METRIC_NAME")]
    pub metric_name: Option<String>,

    #[arg(long, env = "DD_CW_QUERY_TIMEOUT_SECS")]
    pub query_timeout_secs: Option<u64>,

    #[arg(long, env = "DD_CW_CAPTURE_COMMAND")]
    pub capture_command: Option<String>,

    #[arg(long, env = "DD_CW_CAPTURE_TIMEOUT_SECS")]
    pub capture_timeout_secs: Option<u64>,

    #[arg(long, env = "DD_CW_SNAPSHOT_DIR")]
    pub snapshot_dir: Option<PathBuf>,

    #[arg(long, env = "DD_CW_SNAPSHOT_SUFFIX")]
    pub snapshot_suffix: Option<String>,

    #[arg(long, env = "DD_CW_LOG_LEVEL")]
    pub log_level: Option<String>,
}

macro_rules! override_fields {
    ($args:expr, $cfg:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $args.$field.clone() {
                $cfg.$field = value;
            }
        )+
    };
}

impl Args {
    /// Layer defaults, the optional YAML file and these overrides, then
    /// validate the result.
    pub fn resolve(&self) -> Result<WatchdogConfig> {
        let mut cfg = match &self.config {
            Some(path) => WatchdogConfig::from_yaml_file(path)?,
            None => WatchdogConfig::default(),
        };
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply(&self, cfg: &mut WatchdogConfig) {
        override_fields!(
            self,
            cfg,
            target_name,
            process_name,
            cpu_limit,
            hit_threshold,
            breach_rate,
            assess_window_secs,
            assess_interval_secs,
            silence_secs,
            metrics_url,
            metric_name,
            query_timeout_secs,
            capture_command,
            capture_timeout_secs,
            snapshot_dir,
            snapshot_suffix,
            log_level,
        );
    }
}
