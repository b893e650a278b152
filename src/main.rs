mod app;
mod config;
mod controls;
mod hardware;
mod system;
mod util;

use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use crate::config::{AppConfig, MixerSettings, load_config};
use crate::system::mixer::{MixerUnits, open_sink};

/// Volume control for IQaudIO boards: rotary encoder, push button and IR remote.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "IQAUDIO_CTRL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the control loop (default)
    Run,
    /// Write the configured mixer presets once and exit
    SetupMix,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let loaded = load_config(cli.config.as_deref())?;
    match &loaded.path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&loaded.config),
        Command::SetupMix => setup_mix(&loaded.config),
    }
}

fn run(config: &AppConfig) -> Result<()> {
    let mut app = app::App::new(config)?;
    app.set_shutdown_channel(shutdown_channel()?);
    app.run()
}

fn setup_mix(config: &AppConfig) -> Result<()> {
    // Presets are written as raw control values.
    let settings = MixerSettings {
        units: MixerUnits::Raw,
        ..config.mixer.clone()
    };
    controls::apply_presets(&config.mix_presets, |preset| {
        open_sink(&settings, &preset.device, &preset.element)
    })?;
    info!(presets = config.mix_presets.len(), "mixer presets applied");
    Ok(())
}

fn shutdown_channel() -> Result<Receiver<()>> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "received termination signal");
                if tx.send(()).is_err() {
                    warn!("control loop already stopped");
                }
            }
        })
        .context("failed to spawn signal listener")?;
    Ok(rx)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();
}
