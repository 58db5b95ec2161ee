//! `tvbridge` – LG webOS TV ⇄ MQTT bridge
//!
//! 1. Loads `~/.tvbridge/config.toml` (or `--config`); prints an example and
//!    exits when the file is missing or invalid.
//! 2. Connects the MQTT client and the TV session (or a simulated TV with
//!    `--simulate`).
//! 3. Runs the bridge on a current-thread Tokio runtime until **Ctrl-C**.
//!
//! `tvbridge --init` writes the example configuration (owner-only) and exits.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::Notify;
use tracing::{info, warn};

use tvbridge_hal::{SimTv, TvSession, WebOsSession};
use tvbridge_middleware::{MessageBus, MqttBus};
use tvbridge_runtime::{Bridge, init_tracing};
use tvbridge_types::{BridgeError, DeviceEvent, EventKind};

#[derive(Parser, Debug)]
#[command(name = "tvbridge", version, about = "Keep an LG webOS TV and an MQTT broker in sync")]
struct Args {
    /// Path to the configuration file (default: ~/.tvbridge/config.toml)
    #[arg(short, long, env = "TVBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Drive a simulated TV instead of connecting to a real one
    #[arg(long)]
    simulate: bool,

    /// Write an example configuration to the config path and exit
    #[arg(long)]
    init: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_tracing("tvbridge");

    print_banner();

    let path = args.config.unwrap_or_else(config::config_path);
    if args.init {
        return write_example(&path);
    }
    let cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            eprintln!(
                "{} no configuration at {}",
                "error:".red().bold(),
                path.display().to_string().bold()
            );
            eprintln!("\n  Create it with contents like:\n");
            eprintln!("{}", config::EXAMPLE_CONFIG.dimmed());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    info!(config = ?cfg, path = %path.display(), "configuration loaded");

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let stop = Arc::new(Notify::new());
    let stop_handler = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        stop_handler.notify_one();
    }) {
        warn!(
            error = %e,
            "failed to install Ctrl-C handler; stop the process with a signal instead"
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, args.simulate, stop)) {
        Ok(()) => {
            println!("{}", "  ✓ Bridge stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config, simulate: bool, stop: Arc<Notify>) -> Result<(), BridgeError> {
    let bridge_config = cfg.bridge_config();
    let bus = Arc::new(MqttBus::connect(&cfg.mqtt_config(), bridge_config.topics()));

    let mut sim = None;
    let session: Arc<dyn TvSession> = if simulate {
        let tv = Arc::new(SimTv::new());
        sim = Some(Arc::clone(&tv));
        tv as Arc<dyn TvSession>
    } else {
        Arc::new(WebOsSession::start(cfg.webos_config()?))
    };

    println!(
        "  Bridging {} ({}) on {}",
        cfg.tv.name.bold(),
        if simulate { "simulated".to_string() } else { cfg.tv.ip.clone() },
        bridge_config.namespace().cyan()
    );

    let bus_handle = Arc::clone(&bus) as Arc<dyn MessageBus>;
    let handle = Bridge::new(bridge_config, session, bus_handle).spawn();
    if let Some(tv) = sim {
        tv.emit(DeviceEvent::bare(EventKind::SetupComplete));
    }

    stop.notified().await;

    let store = handle.shutdown().await?;
    info!(channels_known = store.len(), "bridge shut down");
    bus.disconnect().await;
    Ok(())
}

fn write_example(path: &Path) -> ExitCode {
    if path.exists() {
        eprintln!(
            "{} {} already exists",
            "error:".red().bold(),
            path.display().to_string().bold()
        );
        return ExitCode::FAILURE;
    }
    let written = config::parse(config::EXAMPLE_CONFIG).and_then(|cfg| config::save_to(&cfg, path));
    match written {
        Ok(()) => {
            println!(
                "  {} Example config written to {}; edit it before starting the bridge.",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "tvbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  LG webOS TV ⇄ MQTT");
    println!();
}
