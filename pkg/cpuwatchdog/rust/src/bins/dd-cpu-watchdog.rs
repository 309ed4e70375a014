// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_cpu_watchdog::assessor::Assessor;
use dd_cpu_watchdog::capture::{CommandCaptureTool, SnapshotWriter};
use dd_cpu_watchdog::cli::Args;
use dd_cpu_watchdog::dispatcher::Dispatcher;
use dd_cpu_watchdog::metrics::{PrometheusSource, build_query};
use dd_cpu_watchdog::procfs::ProcfsLocator;
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Args::parse().resolve()?;
    simple_logger::init_with_level(cfg.level()?)?;
    info!(
        "dd-cpu-watchdog starting (version {})",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "watching {:?} in pod {} (cpu limit {})",
        cfg.process_name, cfg.target_name, cfg.cpu_limit
    );

    if let Err(e) = std::fs::create_dir_all(&cfg.snapshot_dir) {
        warn!(
            "could not create snapshot directory {}: {e}",
            cfg.snapshot_dir.display()
        );
    }

    let query = build_query(&cfg.metric_name, &cfg.target_name, cfg.cpu_limit);
    let source = PrometheusSource::new(&cfg.metrics_url, query, cfg.query_timeout())
        .context("failed to create metrics client")?;
    info!("querying {} for {}", cfg.metrics_url, source.query());

    let dispatcher = Dispatcher::new(
        cfg.process_name.clone(),
        ProcfsLocator::default(),
        CommandCaptureTool::new(cfg.capture_command.clone(), cfg.capture_timeout()),
        SnapshotWriter::new(
            cfg.snapshot_dir.clone(),
            cfg.target_name.clone(),
            cfg.snapshot_suffix.clone(),
        ),
    );

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let (tx, rx) = mpsc::channel(1);
    let mut dispatcher_task = tokio::spawn(dispatcher.run(rx));
    let mut assessor_task =
        tokio::spawn(Assessor::new(cfg.assessment(), Instant::now()).run(source, tx));

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
        res = &mut assessor_task => error!("assessor stopped unexpectedly: {res:?}"),
        res = &mut dispatcher_task => error!("dispatcher stopped unexpectedly: {res:?}"),
    }

    assessor_task.abort();
    dispatcher_task.abort();
    info!("dd-cpu-watchdog shutting down");
    Ok(())
}
