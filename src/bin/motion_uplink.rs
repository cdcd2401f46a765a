//! motion_uplink - motion-gated camera uplink daemon
//!
//! This daemon:
//! 1. Opens the camera and lets it warm up
//! 2. Polls the motion sensor on every tick
//! 3. While motion is active, uploads one JPEG frame per frame interval
//! 4. Releases the camera on Ctrl-C (or any other exit)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use motion_uplink::config::{ConfigOverrides, UplinkConfig, CONFIG_ENV};
use motion_uplink::motion::open_sensor;
use motion_uplink::{
    ActiveModeController, CameraSession, CameraSource, HttpUploader, SystemClock, Uplink,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Upload camera frames to an HTTP endpoint while a motion sensor reports activity"
)]
struct Args {
    /// Path to a JSON (or .toml) config file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Upload endpoint URL (overrides the config file).
    #[arg(long)]
    url: Option<String>,

    /// Camera device path, or stub://<name> for synthetic frames.
    #[arg(long)]
    camera: Option<String>,

    /// Motion source: GPIO value file, or stub://every/<n> for a synthetic sensor.
    #[arg(long)]
    motion: Option<String>,

    /// Stop after this many delivered uploads.
    #[arg(long)]
    max_uploads: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = ConfigOverrides {
        url: args.url,
        camera: args.camera,
        motion: args.motion,
    };
    let cfg = UplinkConfig::load_with(args.config.as_deref(), &overrides)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let sensor = open_sensor(&cfg.motion.source, cfg.motion.active_low)?;
    let uploader = HttpUploader::new(cfg.uploader_config())?;
    let source = CameraSource::new(cfg.camera.clone())?;
    let camera = CameraSession::open(source, cfg.warmup)?;

    let mut settings = cfg.uplink_settings();
    settings.max_uploads = args.max_uploads;

    let mut uplink = Uplink::new(
        ActiveModeController::new(cfg.timing),
        camera,
        sensor,
        uploader,
        SystemClock,
        settings,
    );
    let stats = uplink.run(&shutdown);
    drop(uplink);

    if shutdown.load(Ordering::SeqCst) {
        log::info!("shutdown signal received");
    }
    log::info!(
        "motion_uplink exiting after {} ticks, {} uploads delivered",
        stats.ticks,
        stats.uploads_delivered
    );
    Ok(())
}
