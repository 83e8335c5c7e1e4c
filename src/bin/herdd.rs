//! herdd - livestock monitoring daemon
//!
//! This daemon:
//! 1. Opens the record store and detector backends from configuration
//! 2. Serves the dashboard and JSON API
//! 3. Optionally runs detection on a live camera until shut down

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use herd_monitor::{
    api::ApiServer, config::HerdConfig, ingest::CameraSource, AppState, FrameSource,
};

#[derive(Parser, Debug)]
#[command(name = "herdd", author, version, about = "Livestock dashboard and camera daemon")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "HERD_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overriding the configured one.
    #[arg(long)]
    addr: Option<String>,
    /// Run the live camera loop even if disabled in the config.
    #[arg(long)]
    camera: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = HerdConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }
    if args.camera {
        config.camera.enabled = true;
    }

    let state = Arc::new(AppState::open(config)?);
    let config = state.config();
    log::info!(
        "herdd {} using {} records at {}",
        env!("CARGO_PKG_VERSION"),
        format!("{:?}", config.storage_backend).to_lowercase(),
        config.records_path.display()
    );

    let api_handle = ApiServer::new(config.api_addr.clone(), state.clone()).spawn()?;
    log::info!("dashboard listening on http://{}", api_handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    let camera_thread = if config.camera.enabled {
        let mut source = CameraSource::new(config.camera.source_config())?;
        let state = state.clone();
        let running = running.clone();
        Some(std::thread::spawn(move || {
            match state.watch_camera(&mut source, &running) {
                Ok(frames) => log::info!("camera loop stopped after {} frames", frames),
                Err(err) => log::error!("camera {} failed: {:#}", source.describe(), err),
            }
        }))
    } else {
        None
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("herdd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    running.store(false, Ordering::SeqCst);
    if let Some(handle) = camera_thread {
        handle
            .join()
            .map_err(|_| anyhow!("camera thread panicked"))?;
    }
    api_handle.stop()?;

    Ok(())
}
