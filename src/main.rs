use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use motioncam::{
    classifier::MotionGate, CircularBuffer, FfmpegPipeline, MotionClassifier, MotioncamConfig,
    RecordingController,
};

#[derive(Parser, Debug)]
#[command(name = "motioncam")]
#[command(about = "Motion-triggered video event recorder with circular pre-roll buffering")]
#[command(version)]
#[command(long_about = "Continuously monitors a camera for motion and preserves the \
surrounding footage: a circular buffer keeps the seconds before each event, live recording \
captures everything after, and still images document the episode. Quiet periods discard \
footage and optionally convert finished events to a delivery container.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "motioncam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting motioncam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match MotioncamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // Shared state: the buffer receives the live stream, the gate carries the
    // classifier's verdict to the controller.
    let buffer = Arc::new(CircularBuffer::new(config.recording.circular()));
    let gate = Arc::new(MotionGate::new());
    let classifier = Arc::new(MotionClassifier::new(config.motion.clone(), gate.clone()));
    let cancel = CancellationToken::new();

    // Acquiring the capture pipeline is the only process-fatal failure
    let pipeline = Arc::new(FfmpegPipeline::new(
        &config.pipeline,
        &config.recording,
        buffer.clone(),
    ));
    pipeline.start(&config.motion, classifier).await?;

    let mut controller = RecordingController::new(
        config,
        pipeline.clone(),
        buffer,
        gate,
        cancel.clone(),
    );

    // Operator interrupt cancels the loop within one tick
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    let result = controller.run().await;

    // Stop all recording regardless of the state the loop ended in
    pipeline.stop().await;

    if let Err(e) = result {
        error!("Recording loop failed: {}", e);
        return Err(e.into());
    }

    info!("motioncam exited cleanly");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("motioncam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Motioncam Configuration File");
    println!("# This is the default configuration with all available options");
    println!();
    println!("{}", toml::to_string_pretty(&MotioncamConfig::default())?);
    Ok(())
}
