//! NB-IoT eNB main application.
//!
//! Wires the PHY and MAC layers together, drives the TX/RX loop, and
//! exposes the interactive stdin controls and exit codes of the original
//! `sonica` CLI surface.

mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::EnbConfig;
use layers::mac::{MacPhyInterface, NbiotMacLayer};
use layers::phy::NbiotPhyLayer;
use layers::ProtocolLayer;

/// NB-IoT eNB.
#[derive(Parser, Debug)]
#[command(name = "albor_nbiot_enb", author, version, about = "NB-IoT eNB PHY/MAC stack", long_about = None)]
struct Args {
    /// Path to the eNB configuration file (YAML).
    config_file: String,

    /// Print the extended help (configuration section reference) and exit.
    #[arg(long = "help-all")]
    help_all: bool,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_INIT_ERROR: i32 = -1;

fn print_help_all() {
    let _ = Args::command().print_help();
    println!();
    println!("Configuration sections: general, enb_files, cell, rr, sib1, sib2, sib3, rf, log, pcap, expert");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.help_all {
        print_help_all();
        std::process::exit(EXIT_SUCCESS);
    }

    match run(args).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(StartupError::Config(e)) => {
            eprintln!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
        Err(StartupError::Init(e)) => {
            eprintln!("initialization error: {e}");
            std::process::exit(EXIT_INIT_ERROR);
        }
    }
}

enum StartupError {
    Config(anyhow::Error),
    Init(anyhow::Error),
}

async fn run(args: Args) -> Result<(), StartupError> {
    let enb_config = EnbConfig::from_yaml_file(&args.config_file).map_err(StartupError::Config)?;

    let env_filter = EnvFilter::try_new(enb_config.log.to_env_filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(true).with_line_number(true).init();

    info!(config_file = %args.config_file, "starting NB-IoT eNB");

    let phy_config = enb_config.to_phy_config().map_err(StartupError::Config)?;
    let mac_config = enb_config.to_mac_config().map_err(StartupError::Config)?;
    let zmq_config = enb_config.rf.to_zmq_rf_config().map_err(StartupError::Config)?;

    info!(pci = phy_config.pci.0, cell_id = mac_config.cell_id.0, "cell configuration loaded");

    let mut mac_layer = NbiotMacLayer::new(mac_config).map_err(|e| StartupError::Init(e.into()))?;
    mac_layer.initialize().await.map_err(|e| StartupError::Init(e.into()))?;
    let mac_layer = Arc::new(mac_layer);

    let phy_layer = NbiotPhyLayer::new(phy_config).map_err(|e| StartupError::Init(e.into()))?;
    let mac_interface: Arc<dyn MacPhyInterface> = mac_layer.clone();
    phy_layer.set_mac_interface(mac_interface).await;
    phy_layer
        .initialize_with_rf(zmq_config)
        .await
        .map_err(|e| StartupError::Init(e.into()))?;
    let phy_layer = Arc::new(phy_layer);

    phy_layer.start_processing().await.map_err(|e| StartupError::Init(e.into()))?;
    info!("NB-IoT eNB initialized successfully");

    let running = Arc::new(RwLock::new(true));
    let stdin_rx = spawn_stdin_reader();

    let stats_handle = {
        let phy = phy_layer.clone();
        let running = running.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
            while *running.read().await {
                interval.tick().await;
                let stats = phy.get_stats().await;
                let clock = phy.current_clock().await;
                info!(
                    tx = stats.subframes_tx,
                    rx = stats.subframes_rx,
                    nprach = stats.nprach_detections,
                    hfn = clock.hfn,
                    sfn = clock.sfn,
                    sf_idx = clock.sf_idx,
                    "PHY statistics"
                );
            }
        })
    };

    let mut stdin_rx = stdin_rx;
    let mut stdin_live = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            key = stdin_rx.recv(), if stdin_live => {
                match key {
                    Some('q') => {
                        info!("shutdown requested via stdin 'q'");
                        break;
                    }
                    Some('t') => info!("trace toggle requested via stdin 't' (reserved, no-op)"),
                    Some(other) => warn!(key = %other, "unrecognised interactive command"),
                    None => stdin_live = false,
                }
            }
        }
    }

    *running.write().await = false;
    if let Err(e) = phy_layer.stop_processing().await {
        error!(error = %e, "error stopping PHY processing");
    }
    let _ = tokio::time::timeout(tokio::time::Duration::from_secs(5), stats_handle).await;

    info!("NB-IoT eNB shutdown complete");
    Ok(())
}

/// Reads single-character interactive commands from stdin on a blocking
/// task, forwarding them to the main select loop. Matches the teacher's
/// `q` (shutdown) / `t` (reserved trace toggle) interactive surface.
fn spawn_stdin_reader() -> tokio::sync::mpsc::Receiver<char> {
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tokio::task::spawn_blocking(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(ch) = line.trim().chars().next() {
                if tx.blocking_send(ch).is_err() {
                    break;
                }
            }
        }
    });
    rx
}
