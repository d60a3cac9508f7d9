//! RC2014 CLI - run an RC2014 ROM with the console backchannel and SD card.
//!
//! Usage:
//!   rc2014 [--config rc2014.toml] [--rom ROM] [--basic-root DIR] [--storage-root DIR]
//!
//! Examples:
//!   rc2014 --rom R0000009.BIN                 # BASIC ROM, default directories
//!   rc2014 --config rc2014.toml               # everything from a config file
//!   rc2014 --config rc2014.toml --basic-root ~/basic
//!
//! Press Ctrl-] to stop the machine.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rc2014_core::{Config, HostConsole, Machine, StopReason};

/// Key that stops the machine (Ctrl-]).
const STOP_KEY: u8 = 0x1D;

/// RC2014 Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "rc2014")]
#[command(about = "Run an RC2014 with backchannel and SD card emulation")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ROM image loaded at 0x0000 (overrides the config file)
    #[arg(short, long)]
    rom: Option<PathBuf>,

    /// Directory served by the console backchannel
    #[arg(long)]
    basic_root: Option<PathBuf>,

    /// Directory acting as the SD card
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Log file (the terminal is in raw mode while running)
    #[arg(long, default_value = "rc2014.log")]
    log_file: PathBuf,
}

/// Console fed by the terminal input task through a channel.
struct ChannelConsole {
    /// Receiver for keyboard input
    key_rx: mpsc::Receiver<u8>,
}

impl ChannelConsole {
    fn new(key_rx: mpsc::Receiver<u8>) -> Self {
        Self { key_rx }
    }
}

impl HostConsole for ChannelConsole {
    fn write(&mut self, ch: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();

        match ch {
            0x0A => {
                // Raw mode: LF alone does not return the carriage
                let _ = handle.write_all(b"\r\n");
            }
            _ => {
                let _ = handle.write_all(&[ch]);
            }
        }
        let _ = handle.flush();
    }

    fn get_key(&mut self) -> Option<u8> {
        self.key_rx.try_recv().ok()
    }
}

/// Translate crossterm key events to the bytes a serial terminal would send.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            return match c {
                ']' => Some(STOP_KEY),
                c if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase() as u8 - 64),
                _ => None,
            };
        }
    }

    match code {
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Backspace => Some(8),
        KeyCode::Tab => Some(9),
        KeyCode::Esc => Some(27),
        _ => None,
    }
}

/// Install the file logger; level comes from `RC2014_LOG` (default `info`).
fn init_logging(path: &Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let filter = EnvFilter::try_from_env("RC2014_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

/// Config file (or defaults) with command line overrides applied.
fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(rom) = &args.rom {
        config.rom = Some(rom.clone());
    }
    if let Some(root) = &args.basic_root {
        config.backchannel.root = root.clone();
    }
    if let Some(root) = &args.storage_root {
        config.storage.root = root.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_file) {
        eprintln!("Cannot open log file {}: {}", args.log_file.display(), e);
    }

    let config = load_config(&args)?;
    if config.rom.is_none() {
        eprintln!("No ROM image given (use --rom or set `rom` in the config file)");
        return Err("Nothing to run".into());
    }
    for root in [&config.backchannel.root, &config.storage.root] {
        if !root.is_dir() {
            warn!(root = %root.display(), "directory does not exist");
            eprintln!("Warning: {} is not a directory", root.display());
        }
    }

    // Create channel for keyboard input
    let (key_tx, key_rx) = mpsc::channel::<u8>();
    let console = ChannelConsole::new(key_rx);
    let machine = Machine::from_config(console, &config)?;

    let stop = Arc::new(AtomicBool::new(false));

    // Enable raw mode (gracefully handle non-TTY)
    let raw_mode_enabled = enable_raw_mode().is_ok();
    info!(
        basic_root = %config.backchannel.root.display(),
        storage_root = %config.storage.root.display(),
        "machine starting"
    );

    // Spawn machine in blocking task
    let machine_stop = stop.clone();
    let machine_handle = tokio::task::spawn_blocking(move || {
        let mut machine = machine;
        machine.run(&machine_stop)
    });

    // Spawn terminal input reader
    let input_stop = stop.clone();
    let input_handle = tokio::spawn(async move {
        while !input_stop.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(10)).await;

            // Poll for terminal events
            while event::poll(Duration::from_millis(0)).unwrap_or(false) {
                let Ok(Event::Key(key_event)) = event::read() else {
                    continue;
                };
                if key_event.kind == KeyEventKind::Release {
                    continue;
                }
                match translate_key(key_event.code, key_event.modifiers) {
                    Some(STOP_KEY) => {
                        input_stop.store(true, Ordering::Relaxed);
                        break;
                    }
                    Some(ch) => {
                        if key_tx.send(ch).is_err() {
                            return; // Machine gone
                        }
                    }
                    None => {}
                }
            }
        }
    });

    // Wait for machine to finish
    let result = machine_handle.await;

    // Signal input handler to stop
    stop.store(true, Ordering::Relaxed);
    let _ = input_handle.await;

    // Disable raw mode if we enabled it
    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }

    let run = result?;
    info!(reason = ?run.reason, pc = run.pc, t_states = run.t_states, "machine exited");
    if run.reason == StopReason::Halt {
        eprintln!("\nCPU halted at {:#06X}", run.pc);
    }

    Ok(())
}
