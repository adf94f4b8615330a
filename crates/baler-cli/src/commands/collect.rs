//! Collect command - runs the collector daemon.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use baler_collector::{Collector, CollectorConfig};
use baler_dict::DictionaryStore;
use baler_types::PipelineMetrics;

use super::load_config;

pub fn run(project_dir: &str, port: Option<u16>, metrics_csv: Option<&str>) -> Result<()> {
    let config = load_config(project_dir)?;
    let port = port.unwrap_or(config.collector_port);
    let bind_addr: SocketAddr = format!("{}:{port}", config.collector_host)
        .parse()
        .with_context(|| format!("invalid collector address {}:{port}", config.collector_host))?;

    let dicts = Arc::new(
        DictionaryStore::open(&config.dict_dir)
            .context("failed to open dictionary store")?,
    );
    let metrics = Arc::new(PipelineMetrics::new());

    let collector = Collector::bind(
        CollectorConfig {
            bind_addr,
            out_dir: config.out_dir.clone(),
            limits: config.limits(),
        },
        dicts,
        Arc::clone(&metrics),
    )
    .context("failed to start collector")?;

    println!();
    println!("baler collector");
    println!();
    println!("  Bind address:  {}", collector.local_addr());
    println!("  Dictionaries:  {}", config.dict_dir.display());
    println!("  Output:        {}", config.out_dir.display());
    println!();
    println!("Collector is ready. Press Ctrl+C to stop.");
    println!();

    let shutdown = collector.shutdown_handle();
    register_signals(&shutdown)?;

    collector.run().context("collector error during operation")?;

    let snapshot = metrics.snapshot();
    info!(
        frames_in = snapshot.frames_in,
        records_out = snapshot.records_out,
        unknown_dict = snapshot.unknown_dict,
        corrupt_frames = snapshot.corrupt_frames,
        "collector stopped"
    );
    if let Some(path) = metrics_csv {
        fs::write(path, snapshot.to_csv())
            .with_context(|| format!("failed to write metrics CSV to {path}"))?;
        info!(path, "metrics CSV written");
    }

    println!();
    println!("Collector stopped gracefully.");
    Ok(())
}

/// Wires SIGINT/SIGTERM to the collector's shutdown handle.
#[cfg(unix)]
fn register_signals(shutdown: &baler_collector::ShutdownHandle) -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .context("failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .context("failed to register SIGTERM handler")?;

    let shutdown = shutdown.clone();
    thread::Builder::new()
        .name("baler-signals".to_owned())
        .spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(100));
            }
            info!("shutdown signal received");
            shutdown.shutdown();
        })
        .context("failed to spawn signal watcher")?;
    Ok(())
}

#[cfg(not(unix))]
fn register_signals(_shutdown: &baler_collector::ShutdownHandle) -> Result<()> {
    Ok(())
}
