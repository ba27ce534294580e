//! gauge_relay - gauge reading relay daemon
//!
//! This daemon:
//! 1. Acquires frames from an RTSP stream (`--mode video`) or by polling an
//!    HTTP snapshot endpoint (`--mode image`)
//! 2. Detects labelled regions in every frame
//! 3. Routes each region to the task registered for its label
//! 4. Serves the detector view and every task's results as separate RTSP
//!    channels

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use gauge_relay::{
    config::PipelineConfig,
    detect::build_detector,
    ingest::{create_source, InputMode},
    tasks::build_registry,
    BoundedLatestQueue, ChannelMultiplexer, FrameRouter, Pipeline, TextRenderer,
};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Relay per-task gauge readings from one camera as live RTSP channels"
)]
struct Args {
    /// Input acquisition strategy.
    #[arg(long, value_enum, default_value_t = InputMode::Image)]
    mode: InputMode,

    /// Path to the TOML configuration file.
    #[arg(long, env = "GAUGE_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = PipelineConfig::load(args.config.as_deref()).context("load configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cfg.system.log_level.as_str()),
    )
    .init();
    log::info!(
        "=== gauge_relay {} starting in {:?} mode ===",
        env!("CARGO_PKG_VERSION"),
        args.mode
    );

    let renderer = Arc::new(TextRenderer::load(&cfg.system.font_path));
    let detector =
        build_detector(&cfg.detection, renderer.clone()).context("initialize detector")?;
    let registry = build_registry(&cfg).context("initialize task registry")?;

    let mut multiplexer =
        ChannelMultiplexer::new(&cfg.output.channels, cfg.output.buffer_size, renderer.clone());
    serve_channels(&cfg, &mut multiplexer)?;

    let inbound = BoundedLatestQueue::new(cfg.receive.buffer_size);
    let source = create_source(args.mode, &cfg.receive, inbound.clone())
        .context("create input producer")?;
    let router = FrameRouter::new(inbound, detector, registry, multiplexer.outputs(), renderer);

    let pipeline = Pipeline::start(source, router, multiplexer)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("pipeline running; press Ctrl-C to stop");
    loop {
        match rx.recv_timeout(STATS_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => pipeline.stats().log(),
        }
    }

    log::info!("shutdown signal received");
    pipeline.stats().log();
    pipeline.shutdown()
}

#[cfg(feature = "rtsp-server")]
fn serve_channels(cfg: &PipelineConfig, multiplexer: &mut ChannelMultiplexer) -> Result<()> {
    let server = gauge_relay::output::RtspMediaServer::new(&cfg.output.address, cfg.output.port)
        .context("create RTSP server")?;
    multiplexer
        .serve(Box::new(server))
        .context("start RTSP output")
}

#[cfg(not(feature = "rtsp-server"))]
fn serve_channels(_cfg: &PipelineConfig, multiplexer: &mut ChannelMultiplexer) -> Result<()> {
    log::warn!(
        "built without the rtsp-server feature; channels {:?} are not served",
        multiplexer.channel_names()
    );
    Ok(())
}
