//! vblank-pacer - scanline pacing demo and diagnostics
//!
//! Runs a synthetic render loop through the frame pacer and the selected
//! latency backend, then prints pacing metrics.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vblank_pacer::clock::Clock;
use vblank_pacer::config::Config;
use vblank_pacer::display::{DisplayBackend, PacingContext, SimulatedDisplay, WindowHandle};
use vblank_pacer::latency::{
    DeviceHandle, LatencyManager, LatencyMarker, SimulatedDrivers, TechnologyKind,
};
use vblank_pacer::sync::{FramePacer, PacingMode};
use vblank_pacer::utils::{format_user_error, log_startup_diagnostics, metric_names, MetricsCollector, Timer};

/// Command-line arguments for vblank-pacer
#[derive(Parser, Debug)]
#[command(name = "vblank-pacer")]
#[command(version, about = "Scanline-synchronised frame pacing demo", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "vblank-pacer.toml", env = "VBLANK_PACER_CONFIG")]
    pub config: String,

    /// Pacing mode (disabled|simple|scanline)
    #[arg(short, long)]
    pub mode: Option<PacingMode>,

    /// Target frame rate for the fps cap and fallback
    #[arg(long)]
    pub fps: Option<f64>,

    /// Present once every N refreshes
    #[arg(long)]
    pub divisor: Option<u32>,

    /// Scanline bias added to the vblank-centre target
    #[arg(long, allow_hyphen_values = true)]
    pub bias: Option<f64>,

    /// Latency technology (none|reflex|anti_lag|xell)
    #[arg(long)]
    pub latency: Option<TechnologyKind>,

    /// Frames to run
    #[arg(short, long, default_value = "600")]
    pub frames: u64,

    /// Simulated CPU work per frame, in microseconds
    #[arg(long, default_value = "2000")]
    pub work_us: u64,

    /// Native window handle (hex) to pace against a real display
    #[arg(long)]
    pub window: Option<String>,

    /// Print metrics as JSON instead of Prometheus text
    #[arg(long)]
    pub metrics_json: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Read the file twice: once for the log level before logging exists
    let configured_level = Config::load(&args.config).ok().map(|c| c.logging.level);
    let _log_guard = init_logging(&args, configured_level.as_deref())?;

    info!("════════════════════════════════════════════════════════");
    info!("  vblank-pacer v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    if let Err(e) = run(&args) {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let config = if Path::new(&args.config).exists() {
        Config::load(&args.config)?
    } else {
        warn!("Config file {} not found, using defaults", args.config);
        Config::default_config()
    };

    let mut config = config.with_overrides(args.mode, args.fps, args.divisor, args.bias);
    if let Some(kind) = args.latency {
        config.latency.technology = kind;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn parse_window(text: &str) -> Result<WindowHandle> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    let raw = usize::from_str_radix(digits, 16)
        .with_context(|| format!("Invalid window handle: {}", text))?;
    Ok(WindowHandle(raw))
}

fn display_backend(args: &Args, clock: &'static Clock) -> Result<(Arc<dyn DisplayBackend>, WindowHandle)> {
    if let Some(text) = &args.window {
        let window = parse_window(text)?;
        #[cfg(windows)]
        let backend: Arc<dyn DisplayBackend> = Arc::new(vblank_pacer::display::WindowsDisplay::new());
        #[cfg(not(windows))]
        let backend: Arc<dyn DisplayBackend> = {
            warn!("Native scanline queries are Windows-only, simulating {:?}", window);
            Arc::new(SimulatedDisplay::single_1080p60(clock, window))
        };
        return Ok((backend, window));
    }

    let window = WindowHandle(0x1);
    Ok((Arc::new(SimulatedDisplay::single_1080p60(clock, window)), window))
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    debug!("Config: {:?}", config);

    let clock = Clock::global();
    let (display, window) = display_backend(args, clock)?;
    let context = Arc::new(PacingContext::for_window(window));

    let mut pacer = FramePacer::new(
        clock,
        context,
        display.clone(),
        &config.pacing,
        &config.sampler,
    );
    log_startup_diagnostics(clock, display.as_ref());

    if pacer.mode() == PacingMode::ScanlineSync && !pacer.start_sampler() {
        warn!("Scanline sampler did not start, pacing without phase correction");
    }

    let latency = LatencyManager::new(clock, Arc::new(SimulatedDrivers::new(clock)));
    if !latency.initialize(DeviceHandle(0x1), config.latency.clone()) {
        warn!("Continuing without latency technology {}", config.latency.technology);
    }

    let metrics = MetricsCollector::new();
    let work = Duration::from_micros(args.work_us);
    let mut frame_timer: Option<Timer> = None;

    info!(
        "Running {} frames: mode={} divisor={} latency={}",
        args.frames,
        pacer.mode(),
        config.pacing.divisor,
        config.latency.technology
    );

    for _ in 0..args.frames {
        latency.set_marker(LatencyMarker::SimStart);
        latency.sleep();
        latency.set_marker(LatencyMarker::InputSample);
        std::thread::sleep(work);
        latency.set_marker(LatencyMarker::SimEnd);
        latency.set_marker(LatencyMarker::RenderSubmitStart);
        latency.set_marker(LatencyMarker::RenderSubmitEnd);

        let wait = Timer::on(clock);
        pacer.limit();
        metrics.record_histogram(metric_names::WAIT_TIME_US, wait.elapsed_us());

        if let Some(previous) = frame_timer.replace(Timer::on(clock)) {
            metrics.record_histogram(metric_names::FRAME_INTERVAL_US, previous.elapsed_us());
        }

        let present = Timer::on(clock);
        latency.set_marker(LatencyMarker::PresentStart);
        pacer.on_present_start();
        pacer.on_present_end();
        latency.set_marker(LatencyMarker::PresentEnd);
        metrics.record_histogram(metric_names::PRESENT_TIME_US, present.elapsed_us());
        metrics.increment_counter(metric_names::FRAMES_TOTAL, 1);
    }

    let diagnostics = pacer.diagnostics();
    metrics.record_pacing(&diagnostics);
    if let Some(stats) = latency.stats() {
        metrics.record_latency(&stats);
    }

    pacer.stop_sampler();
    latency.shutdown();

    if config.logging.metrics {
        if args.metrics_json {
            println!("{}", metrics.export_json()?);
        } else {
            print!("{}", metrics.export_prometheus());
        }
    }

    if let Some(skip) = diagnostics.last_skip {
        info!("Last unpaced cycle: {}", skip);
    }
    info!("Done");
    Ok(())
}

fn init_logging(args: &Args, configured_level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => configured_level.unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("vblank_pacer={level},warn", level = log_level))
    });

    // If log file is specified, write to both stdout and file
    if let Some(log_file_path) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path)
            .with_context(|| format!("Failed to open log file: {}", log_file_path))?;
        let (writer, guard) = tracing_appender::non_blocking(file);

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stdout))
                    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
        return Ok(Some(guard));
    }

    match args.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("0x1A2B").unwrap(), WindowHandle(0x1a2b));
        assert_eq!(parse_window("ff").unwrap(), WindowHandle(0xff));
        assert!(parse_window("window").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "vblank-pacer",
            "--mode",
            "simple",
            "--fps",
            "144",
            "--bias",
            "-20",
            "--latency",
            "xell",
        ]);
        assert_eq!(args.mode, Some(PacingMode::SimpleFps));
        assert_eq!(args.fps, Some(144.0));
        assert_eq!(args.bias, Some(-20.0));
        assert_eq!(args.latency, Some(TechnologyKind::Xell));
        assert_eq!(args.frames, 600);
    }
}
