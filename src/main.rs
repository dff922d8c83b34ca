// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! zoneguard - Protected-Zone Hand Monitoring
//!
//! Headless monitor: captures frames, tracks incidents, escalates them to the
//! classifier and raises alerts until Ctrl+C or the source goes away.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::FmtSubscriber;

use zoneguard::capture::source_from_config;
use zoneguard::config::SourceConfig;
use zoneguard::{Components, Config, Database, Engine, PipelineEvent, VERSION};

const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// zoneguard - Protected-Zone Hand Monitoring
#[derive(Parser, Debug)]
#[command(name = "zoneguard")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Watches a camera for hands in a protected zone and escalates suspicious activity")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with a synthetic camera and simulated classifier
    #[arg(long)]
    demo: bool,

    /// Read frames from an MJPEG-over-HTTP camera
    #[arg(long)]
    mjpeg_url: Option<String>,

    /// POST alerts to this URL
    #[arg(long)]
    webhook: Option<String>,

    /// Data output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between statistics log lines
    #[arg(long, default_value = "30")]
    stats_interval: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🛡️ zoneguard v{} - Protected-Zone Hand Monitoring", VERSION);

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(url) = args.mjpeg_url {
        config.capture.source = mjpeg_override(&config.capture.source, url);
    }
    if let Some(url) = args.webhook {
        config.alerts.webhook_url = Some(url);
    }
    if let Some(data_dir) = args.data_dir {
        config.database.path = data_dir.join("zoneguard.db");
        config.data_dir = data_dir;
    }
    config.validate()?;

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_headless(config, Duration::from_secs(args.stats_interval.max(1))))
}

/// Point the capture source at `url`, keeping a configured frame size cap
fn mjpeg_override(current: &SourceConfig, url: String) -> SourceConfig {
    let max_frame_bytes = match current {
        SourceConfig::Mjpeg { max_frame_bytes, .. } => *max_frame_bytes,
        SourceConfig::Synthetic { .. } => DEFAULT_MAX_FRAME_BYTES,
    };
    SourceConfig::Mjpeg { url, max_frame_bytes }
}

/// Run the monitor until interrupted
async fn run_headless(config: Config, stats_interval: Duration) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;

    let db = Arc::new(Database::open(&config.database)?);
    if config.database.retention_days > 0 {
        db.cleanup(config.database.retention_days)?;
    }

    let components = Components::from_config(&config)
        .context("no vision model is bundled; run with --demo or embed zoneguard with a Detector")?;
    info!(
        "Detector: {}, classifier: {}, alerts: {}",
        components.detector.name(),
        components.classifier.name(),
        components.sink.name()
    );

    let source = source_from_config(&config.capture.source, config.demo.schedule);
    let mut engine = Engine::new(config, db.clone(), components);

    let stale = engine.close_stale_sessions()?;
    if stale > 0 {
        warn!("Recovered {} session(s) left open by a previous run", stale);
    }

    let mut events = engine.subscribe();

    // Stand-in for a display: drain annotated frames so the queue stays fresh
    let output = engine.output();
    let display = tokio::spawn(async move {
        loop {
            if let Some(annotated) = output.pop_timeout(Duration::from_secs(1)).await {
                trace!(
                    "Frame #{}: {} overlays ({} of {} analyzed)",
                    annotated.frame.sequence,
                    annotated.overlay.len(),
                    annotated.frames_analyzed,
                    annotated.frames_seen
                );
            }
        }
    });

    let session_id = engine.start(source).await?;
    info!("🚀 Monitoring session {}", session_id);
    info!("   Press Ctrl+C to shutdown");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stats_tick = tokio::time::interval(stats_interval);
    stats_tick.tick().await;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown signal received, cleaning up...");
                break;
            }
            _ = stats_tick.tick() => {
                let stats = engine.stats();
                info!(
                    "📊 {} captured ({} evicted), {} analyzed, {} escalations ({} coalesced), {} alerts",
                    stats.frames_captured,
                    stats.capture_evicted,
                    stats.frames_analyzed,
                    stats.escalations_dispatched,
                    stats.escalations_coalesced,
                    stats.alerts_raised
                );
            }
            event = events.recv() => match event {
                Ok(event) => match event.payload {
                    PipelineEvent::SourceHalted { reason } => {
                        warn!("Frame source halted: {:?}", reason);
                        break;
                    }
                    payload => debug!("Event #{}: {:?}", event.id, payload),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Status logger skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let session = engine.stop().await;
    display.abort();

    if let Some(session) = session {
        info!(
            "Session {}: {} frames, {} incidents, {} escalations",
            session.id, session.frame_count, session.incident_count, session.escalation_count
        );
    }
    let stats = engine.stats();
    if stats.persistence_failures > 0 || stats.alert_delivery_failures > 0 {
        warn!(
            "{} persistence failures, {} alert delivery failures",
            stats.persistence_failures, stats.alert_delivery_failures
        );
    }

    info!("zoneguard shutdown complete");
    Ok(())
}
