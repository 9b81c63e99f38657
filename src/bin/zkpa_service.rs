//! zkpa_service - local hashing and witness endpoints for development

use anyhow::Result;
use clap::Parser;
use std::sync::mpsc;

use zkpa_capture::api::{ServiceConfig, ServiceServer};
use zkpa_capture::ui;
use zkpa_capture::CaptureConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address (defaults to the configured service address).
    #[arg(long, env = "ZKPA_SERVICE_ADDR")]
    addr: Option<String>,
}

fn main() -> Result<()> {
    ui::init_logging();
    let args = Args::parse();
    let addr = match args.addr {
        Some(addr) => addr,
        None => CaptureConfig::load()?.service_addr,
    };

    let handle = ServiceServer::new(ServiceConfig { addr }).spawn()?;
    log::info!("zkpa_service listening on {}", handle.base_url());
    log::info!("hash endpoint: {}/hash_image", handle.base_url());
    log::info!("witness endpoint: {}/get_witness", handle.base_url());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("zkpa_service waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping service...");
    handle.stop()?;
    Ok(())
}
