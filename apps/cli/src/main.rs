use std::path::PathBuf;
use std::sync::Arc;

use blup_core::prompt::{CancelToken, ConsolePrompter};
use blup_core::{
    Board, GithubRegistry, NrfutilFlasher, RegistryConfig, SessionConfig, SystemScanner,
    UpdateEvent, UpdateMethod, UpdateObserver, UpdateOutcome, UpdateSession,
};
use clap::Parser;
use tracing::error;

fn parse_method(s: &str) -> Result<UpdateMethod, String> {
    s.parse()
}

fn parse_board(s: &str) -> Result<Board, String> {
    s.parse()
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Update the Adafruit nRF52 bootloader on XIAO nRF52840 boards",
    long_about = "Update the Adafruit nRF52 bootloader on XIAO nRF52840 boards.\n\n\
        Methods:\n\
        \x20 serial  Serial DFU via adafruit-nrfutil (default). Works on all\n\
        \x20         bootloader versions, however old or broken.\n\
        \x20 uf2     UF2 drag-and-drop to the bootloader's USB drive.\n\
        \x20         Requires double-tap RESET to enter bootloader mode.\n\
        \x20 ota     OTA DFU over BLE via adafruit-nrfutil. Needs --address."
)]
struct Args {
    /// Update method: serial, uf2, or ota (default: serial)
    #[arg(long, value_parser = parse_method)]
    method: Option<UpdateMethod>,

    /// Board variant: sense or standard (default: sense)
    #[arg(long, value_parser = parse_board)]
    board: Option<Board>,

    /// Serial port for the serial method (e.g. /dev/ttyACM0, COM3)
    #[arg(long)]
    port: Option<String>,

    /// BLE address for the ota method (e.g. AA:BB:CC:DD:EE:FF)
    #[arg(long)]
    address: Option<String>,

    /// Path to a local DFU package or .uf2 file (skips download)
    #[arg(long)]
    pkg: Option<PathBuf>,

    /// Path to the UF2 drive for the uf2 method (skips auto-detection)
    #[arg(long)]
    drive: Option<String>,

    /// Seconds to wait for the UF2 drive to appear
    #[arg(long)]
    timeout: Option<u64>,

    /// Load session defaults from a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Console observer: the human-facing progress narration, kept apart from
/// the tracing output on stderr.
struct ConsoleObserver;

impl UpdateObserver for ConsoleObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::ToolChecked { tool, version } => {
                println!("  {tool}: {version}");
            }
            UpdateEvent::ReleaseResolved { tag, asset } => {
                println!("  Latest bootloader release: {tag}");
                println!("  Asset: {asset}");
            }
            UpdateEvent::PackageReady {
                path, size_bytes, ..
            } => {
                println!(
                    "  Package ready: {} ({:.1} KB)",
                    path.display(),
                    *size_bytes as f64 / 1024.0
                );
            }
            UpdateEvent::WaitingForDevice {
                elapsed_secs,
                timeout_secs,
            } => {
                println!("  Still waiting... ({elapsed_secs}s of {timeout_secs}s)");
            }
            UpdateEvent::DeviceFound { description } => {
                println!("  Found {description}");
            }
            UpdateEvent::BootloaderInfo { info } => {
                println!("  Current bootloader:");
                for line in info.lines() {
                    println!("    {line}");
                }
            }
            UpdateEvent::TransferStarted { description } => {
                println!("  Flashing: {description}");
            }
            UpdateEvent::Complete => {
                println!();
                println!("  Bootloader update completed successfully!");
                println!("  The board restarts on its own; once it is back up,");
                println!("  OTA DFU updates will work again.");
            }
            UpdateEvent::Canceled => {
                println!("  Canceled.");
            }
            // Failures are reported once by main, with remediation.
            UpdateEvent::PhaseChanged { .. } | UpdateEvent::Failed { .. } => {}
        }
    }
}

fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(method) = args.method {
        config.method = method;
    }
    if let Some(board) = args.board {
        config.board = board;
    }
    if let Some(pkg) = &args.pkg {
        config.package = Some(pkg.clone());
    }
    if let Some(timeout) = args.timeout {
        config.wait_timeout_secs = timeout;
    }
    if let Some(address) = &args.address {
        config.address = Some(address.clone());
    }
    // The explicit target depends on the method in effect; a preset from
    // the config file stays when the matching flag is absent.
    let target_flag = match config.method {
        UpdateMethod::Serial => args.port.clone(),
        UpdateMethod::MassStorage => args.drive.clone(),
        UpdateMethod::Radio => None,
    };
    if let Some(target) = target_flag {
        config.target = Some(target);
    }
    Ok(config)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!(
        "  blup - {} bootloader update ({})",
        config.board.label(),
        config.method
    );
    println!();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            error!("Failed to install Ctrl-C handler: {e}");
        }
    }

    let registry_config = RegistryConfig {
        token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        ..Default::default()
    };
    let registry = match GithubRegistry::new(registry_config) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    let scanner = SystemScanner::new();
    let flasher = NrfutilFlasher::new();
    let prompter = ConsolePrompter;

    let mut session = UpdateSession::with_observer(
        config,
        &registry,
        &scanner,
        &flasher,
        &prompter,
        cancel,
        Arc::new(ConsoleObserver),
    );
    let outcome = session.run();

    if let UpdateOutcome::Failed(err) = &outcome {
        eprintln!();
        eprintln!("  ERROR: {err}");
        if let Some(hint) = err.remediation() {
            eprintln!("  Tip: {hint}");
        }
    }
    std::process::exit(outcome.exit_code());
}
