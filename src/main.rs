//! Focus Bridge CLI
//!
//! Runs the attention-analysis engine and prints what it reports.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use focus_bridge::{
    bridge::{Fault, Notification, Supervisor},
    config::{BackendKind, BridgeConfig, Config},
    frames::FrameChannel,
    stats::FocusTally,
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// How long to keep draining notifications after a stop request.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(12);

#[derive(Parser)]
#[command(name = "focus-bridge")]
#[command(version = VERSION)]
#[command(about = "Run and supervise the attention-analysis engine", long_about = None)]
struct Cli {
    /// Enable debug logging for the bridge
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and print its events until Ctrl+C
    Run(RunArgs),

    /// Check whether the container runtime is reachable
    Probe,

    /// Make sure the execution image exists, building it if needed
    Build {
        /// Image identifier (defaults to the configured image)
        #[arg(long)]
        image: Option<String>,

        /// Build context directory
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Show configuration
    Config,

    /// Store the engine API key in the configuration file
    SetKey {
        /// The API key
        key: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Execution backend (container or native)
    #[arg(long)]
    backend: Option<String>,

    /// Engine API key (overrides the stored key)
    #[arg(long)]
    api_key: Option<String>,

    /// Execution image (container backend)
    #[arg(long)]
    image: Option<String>,

    /// Shared frame directory (container backend)
    #[arg(long)]
    shared_dir: Option<PathBuf>,

    /// Engine executable (native backend)
    #[arg(long)]
    binary: Option<PathBuf>,

    #[arg(long)]
    focus_threshold: Option<f64>,

    #[arg(long)]
    drowsy_blink_rate: Option<f64>,

    #[arg(long)]
    away_timeout_secs: Option<f64>,

    #[arg(long)]
    talking_sensitivity: Option<f64>,

    /// Camera index (native backend)
    #[arg(long)]
    camera: Option<u32>,

    /// Capture width (native backend)
    #[arg(long)]
    width: Option<u32>,

    /// Capture height (native backend)
    #[arg(long)]
    height: Option<u32>,

    /// Capture frame rate (native backend)
    #[arg(long)]
    capture_fps: Option<u32>,

    /// Feed the .jpg files of this directory as frames (container backend)
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Replay rate in frames per second
    #[arg(long, default_value = "10")]
    fps: u32,

    /// Also print raw metrics/edge payloads
    #[arg(long)]
    raw: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match cli.command {
        Commands::Run(args) => cmd_run(&runtime, args),
        Commands::Probe => cmd_probe(&runtime),
        Commands::Build { image, context } => cmd_build(&runtime, image, context),
        Commands::Config => cmd_config(),
        Commands::SetKey { key } => cmd_set_key(&key),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("focus_bridge=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("focus_bridge=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config ({e}); using defaults");
            Config::default()
        }
    }
}

fn apply_overrides(config: &mut BridgeConfig, args: &RunArgs) -> Result<()> {
    if let Some(ref name) = args.backend {
        config.backend = match BackendKind::parse(name) {
            Some(kind) => kind,
            None => bail!("Unknown backend '{name}' (expected container or native)"),
        };
    }
    if let Some(ref key) = args.api_key {
        config.api_key = key.clone();
    }
    if let Some(ref image) = args.image {
        config.image = image.clone();
    }
    if args.shared_dir.is_some() {
        config.shared_dir = args.shared_dir.clone();
    }
    if args.binary.is_some() {
        config.binary_path = args.binary.clone();
    }

    let thresholds = &mut config.thresholds;
    thresholds.focus_threshold = args.focus_threshold.or(thresholds.focus_threshold);
    thresholds.drowsy_blink_rate = args.drowsy_blink_rate.or(thresholds.drowsy_blink_rate);
    thresholds.away_timeout_secs = args.away_timeout_secs.or(thresholds.away_timeout_secs);
    thresholds.talking_sensitivity = args.talking_sensitivity.or(thresholds.talking_sensitivity);

    let capture = &mut config.capture;
    capture.camera_index = args.camera.or(capture.camera_index);
    capture.width = args.width.or(capture.width);
    capture.height = args.height.or(capture.height);
    capture.fps = args.capture_fps.or(capture.fps);

    Ok(())
}

fn cmd_run(runtime: &tokio::runtime::Runtime, args: RunArgs) -> Result<()> {
    let mut config = load_config().bridge;
    apply_overrides(&mut config, &args)?;

    if args.replay.is_some() && config.backend == BackendKind::Native {
        eprintln!("Warning: --replay ignored (the native engine reads the camera itself)");
    }

    println!("Focus Bridge v{VERSION}");
    println!();
    println!("  Backend: {}", config.backend);
    match config.backend {
        BackendKind::Container => {
            println!("  Image: {}", config.image);
            println!("  Frame directory: {:?}", config.resolved_shared_dir());
        }
        BackendKind::Native => {
            if let Some(ref binary) = config.binary_path {
                println!("  Engine: {binary:?}");
            }
        }
    }
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    let supervisor = Supervisor::new();
    let receiver = supervisor.receiver().clone();

    // Build output arrives while start() is still pending; anything else
    // received meanwhile is replayed into the main loop.
    let done = Arc::new(AtomicBool::new(false));
    let printer = {
        let receiver = receiver.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut early = Vec::new();
            while !done.load(Ordering::SeqCst) {
                match receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(Notification::Progress(line)) => println!("[build] {line}"),
                    Ok(other) => early.push(other),
                    Err(_) => {}
                }
            }
            early
        })
    };

    let started = runtime.block_on(supervisor.start(config));
    done.store(true, Ordering::SeqCst);
    let early = printer.join().unwrap_or_default();

    let session_id = started.context("Failed to start the engine")?;
    println!("Session {session_id} started. Press Ctrl+C to stop");
    println!();

    let feeder = match (args.replay, supervisor.frame_channel()) {
        (Some(dir), Some(channel)) => {
            let running = running.clone();
            let fps = args.fps;
            Some(thread::spawn(move || replay_frames(&dir, &channel, fps, &running)))
        }
        _ => None,
    };

    let mut tally = FocusTally::new();
    let mut stop_requested_at: Option<Instant> = None;
    let mut exit_code = None;
    let mut early = early.into_iter();

    loop {
        if !running.load(Ordering::SeqCst) && stop_requested_at.is_none() {
            println!();
            println!("Stopping engine...");
            runtime.block_on(supervisor.stop());
            stop_requested_at = Some(Instant::now());
        }
        if stop_requested_at.is_some_and(|t| t.elapsed() >= SHUTDOWN_DRAIN) {
            eprintln!("Engine did not report exit in time");
            break;
        }

        let next = match early.next() {
            Some(notification) => Ok(notification),
            None => receiver.recv_timeout(Duration::from_millis(100)),
        };
        match next {
            Ok(Notification::Close(code)) => {
                exit_code = code;
                match code {
                    Some(code) => println!("Engine exited with code {code}"),
                    None => println!("Engine terminated by signal"),
                }
                break;
            }
            Ok(notification) => {
                if let Notification::Focus(ref reading) = notification {
                    tally.record(reading);
                }
                print_notification(&notification, args.raw);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    running.store(false, Ordering::SeqCst);
    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }

    println!();
    println!("{}", supervisor.stats().summary());
    if tally.count() > 0 {
        println!();
        println!("{}", tally.summary());
    }

    if stop_requested_at.is_none() && exit_code != Some(0) {
        bail!("Engine stopped unexpectedly");
    }
    Ok(())
}

fn print_notification(notification: &Notification, raw: bool) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match notification {
        Notification::Progress(line) => println!("[{now}] build: {line}"),
        Notification::Ready => println!("[{now}] Engine ready"),
        Notification::Status(text) => println!("[{now}] status: {text}"),
        Notification::Focus(reading) => {
            println!(
                "[{now}] {:<10} score {:.2} | face: {} | blink rate: {:.1}",
                reading.state.as_str(),
                reading.focus_score,
                if reading.face_detected { "yes" } else { "no" },
                reading.blink_rate
            );
        }
        Notification::Metrics(payload) | Notification::Edge(payload) => {
            if raw {
                println!("[{now}] {}: {payload}", notification.kind());
            }
        }
        Notification::Error(fault) => {
            eprintln!("[{now}] error: {}", fault.message());
            if let Fault::Engine(e) = fault {
                if e.is_fatal() {
                    eprintln!("         The engine rejected the session ({:?})", e.kind());
                }
            }
        }
        Notification::Close(_) => {}
    }
}

/// Sorted `.jpg` files in `dir`.
fn replay_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Could not read replay directory {dir:?}"))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Feed replay frames to the engine, once, at `fps`.
fn replay_frames(dir: &Path, channel: &FrameChannel, fps: u32, running: &AtomicBool) {
    let files = match replay_files(dir) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Warning: {e:#}");
            return;
        }
    };
    if files.is_empty() {
        eprintln!("Warning: No .jpg files in {dir:?}");
        return;
    }
    tracing::info!("Replaying {} frames from {:?} at {} fps", files.len(), dir, fps);

    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut last_ts = 0u64;

    for path in files {
        if !running.load(Ordering::SeqCst) || !channel.is_active() {
            break;
        }
        match std::fs::read(&path) {
            Ok(bytes) => {
                let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
                // Names must stay strictly increasing even if the clock stalls
                let ts = now.max(last_ts + 1);
                channel.write_frame(ts, &bytes);
                last_ts = ts;
            }
            Err(e) => tracing::warn!("Skipping {:?}: {}", path, e),
        }
        thread::sleep(interval);
    }
    tracing::info!("Replay finished ({} frames written)", channel.frame_count());
}

fn cmd_probe(runtime: &tokio::runtime::Runtime) -> Result<()> {
    let supervisor = Supervisor::new();
    if runtime.block_on(supervisor.is_docker_available()) {
        println!("Container runtime: available ✓");
        Ok(())
    } else {
        println!("Container runtime: not available ✗");
        std::process::exit(1);
    }
}

fn cmd_build(
    runtime: &tokio::runtime::Runtime,
    image: Option<String>,
    context: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config().bridge;
    if let Some(image) = image {
        config.image = image;
    }
    if let Some(context) = context {
        config.build_context = context;
    }

    let supervisor = Supervisor::new();
    let receiver = supervisor.receiver().clone();
    let printer = thread::spawn(move || {
        // Ends when the supervisor (and its sender) is dropped.
        while let Ok(notification) = receiver.recv() {
            if let Notification::Progress(line) = notification {
                println!("  {line}");
            }
        }
    });

    println!("Preparing image {}...", config.image);
    let result = runtime.block_on(supervisor.prepare_image(&config));
    drop(supervisor);
    let _ = printer.join();

    result.with_context(|| format!("Could not prepare image {}", config.image))?;
    println!("Image {} is ready", config.image);
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();

    // Never print the key itself
    let mut shown = config.clone();
    if shown.bridge.has_credential() {
        shown.bridge.api_key = "********".to_string();
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&shown).context("Could not serialize configuration")?
    );
    Ok(())
}

fn cmd_set_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        bail!("API key must not be empty");
    }
    let mut config = load_config();
    config.bridge.api_key = key.trim().to_string();
    config.save().context("Error saving config")?;
    println!("API key saved to {:?}", Config::config_path());
    Ok(())
}
