//! canopyd - plant monitoring camera dashboard
//!
//! Serves the live camera feed, on-demand classification, time-lapse capture,
//! and telemetry over HTTP until Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use canopy::api::{ApiConfig, ApiServer};
use canopy::config::DashboardConfig;
use canopy::dashboard::Dashboard;

#[derive(Parser, Debug)]
#[command(author, version, about = "Plant monitoring camera dashboard")]
struct Args {
    /// JSON or TOML config file. Environment variables override its values.
    #[arg(long, env = "CANOPY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config and CANOPY_API_ADDR).
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = DashboardConfig::load_from(args.config.as_deref())?;
    log::info!(
        "canopyd {} starting (camera {} {}x{}@{}fps, db {})",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.fps,
        cfg.db_path
    );

    for feature in cfg.missing_features() {
        log::warn!(
            "canopyd built without the '{}' feature; rebuild with --features {} or the {} will stay unavailable",
            feature,
            feature,
            if feature == "camera-v4l2" { "camera" } else { "models" }
        );
    }

    let dashboard = Arc::new(Dashboard::from_config(&cfg));
    let api_config = ApiConfig {
        addr: args.addr.unwrap_or_else(|| cfg.api_addr.clone()),
    };
    let api_handle = ApiServer::new(api_config, dashboard).spawn()?;
    log::info!("dashboard listening on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("canopyd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;

    Ok(())
}
