/*
 *  main.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host-facing binary: JSON lines on stdin/stdout, logs on stderr
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use clap::Parser;
use env_logger::Env;
use log::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use dialbridge::config::{self, Cli};
use dialbridge::coordinator::Coordinator;
use dialbridge::host;
use dialbridge::{BridgeClient, HttpImageTransport, ImageFetchPipeline, ImageKey};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
#[cfg(unix)]
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received. Initiating graceful shutdown.");
    Ok(())
}

// one event loop, no worker threads
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = config::load(&cli)?;

    if cli.dump_config {
        println!("{}", config::dump(&cfg)?);
        return Ok(());
    }

    let eff = cfg.effective();

    // stdout belongs to the host protocol
    env_logger::Builder::from_env(Env::default().default_filter_or(eff.log_level.as_str()))
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .init();

    info!("dialbridge v{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);
    info!("bridge at {}, refresh every {:?}", eff.bridge_url, eff.global.refresh_interval);
    if eff.global.credentials.is_none() {
        info!("no credentials configured yet, commands wait for global settings from the host");
    }

    let bridge = BridgeClient::new(&eff.bridge_url, eff.request_timeout, eff.connect_timeout)?;
    let transport = HttpImageTransport::new(eff.image_timeout)?;
    let pipeline = ImageFetchPipeline::new(transport, eff.image_retries);

    let default_interval = eff.global.refresh_interval;
    let (handle, updates, coordinator) =
        Coordinator::spawn(bridge, pipeline, eff.global, ImageKey::new(eff.placeholder));

    tokio::select! {
        res = host::run_stdio(handle, updates, default_interval) => {
            if let Err(e) = res {
                error!("host session ended with error: {:#}", e);
            }
        }
        _ = signal_handler() => {
            // The signal_handler function logs the received signal.
            // Dropping the session closes the coordinator's input.
        }
    }

    if let Err(e) = coordinator.await {
        error!("coordinator task failed: {}", e);
    }
    info!("dialbridge stopped");
    Ok(())
}
