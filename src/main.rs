//! posecast - Headless Perception Streaming Service
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use posecast::{
    capture::CameraSource,
    config::{Config, PerceptionMode},
    payload::PayloadBuilder,
    perception::worker::PerceptionWorker,
    pipeline::Pipeline,
    transport::TcpTransport,
};

/// posecast - stream camera perception to a remote avatar
#[derive(Parser, Debug)]
#[command(name = "posecast", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device (overrides config)
    #[arg(short, long)]
    device: Option<String>,

    /// Perception mode: "landmarks" or "segmentation" (overrides config)
    #[arg(short, long)]
    mode: Option<String>,

    /// Consumer host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Consumer port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", posecast::NAME, posecast::VERSION);

    // Load configuration
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    if let Some(ref device) = args.device {
        config.capture.device = device.clone();
    }
    if let Some(ref mode) = args.mode {
        config.perception.mode = mode.parse::<PerceptionMode>()?;
    }
    if let Some(ref host) = args.host {
        config.stream.host = host.clone();
    }
    if let Some(port) = args.port {
        config.stream.port = port;
    }

    // Validate configuration before anything starts
    config.validate()?;

    info!("Capture device: {}", config.capture.device);
    info!("Perception mode: {}", config.perception.mode.as_str());
    info!(
        "Consumer endpoint: {}:{}",
        config.stream.host, config.stream.port
    );

    // Stop signal, checked by the pipeline at iteration boundaries
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    })?;

    let source = CameraSource::open(&config.capture)?;
    let perceptor = PerceptionWorker::launch(&config.perception)?;
    let transport = TcpTransport::new(&config.stream);
    let builder = PayloadBuilder::from_config(&config)?;

    let mut pipeline = Pipeline::new(
        source,
        perceptor,
        transport,
        builder,
        config.segmentation.png_compression,
        shutdown,
    );
    pipeline.run()?;

    info!("posecast stopped");
    Ok(())
}
