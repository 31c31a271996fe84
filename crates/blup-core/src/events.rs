//! Event system for UI decoupling.
//!
//! Lets the CLI (or any future front end) subscribe to orchestration
//! progress without tight coupling to the core logic.

use std::fmt;
use std::path::PathBuf;

use crate::error::FailureKind;
use crate::session::Phase;

/// Events emitted by an update session.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Phase transition in the orchestrator state machine.
    PhaseChanged { from: Phase, to: Phase },
    /// The flashing tool was found on PATH.
    ToolChecked { tool: String, version: String },
    /// Latest release metadata fetched.
    ReleaseResolved { tag: String, asset: String },
    /// Package is on local disk and ready to flash.
    PackageReady {
        path: PathBuf,
        size_bytes: u64,
        /// Whether the session downloaded it (and will delete it).
        owned: bool,
    },
    /// Still polling for a mass-storage volume.
    WaitingForDevice { elapsed_secs: u64, timeout_secs: u64 },
    /// A concrete device target was selected.
    DeviceFound { description: String },
    /// Contents of the volume's self-description file, read before flashing.
    BootloaderInfo { info: String },
    /// Transfer started (subprocess command line or copy destination).
    TransferStarted { description: String },
    /// Update completed successfully.
    Complete,
    /// Terminal failure.
    Failed { kind: FailureKind, message: String },
    /// The operator canceled an interactive wait.
    Canceled,
}

/// Observer trait for receiving session events.
///
/// Implement this in the UI layer; a scripted implementation makes the
/// state machine testable without a terminal or hardware.
pub trait UpdateObserver: Send + Sync {
    fn on_event(&self, event: &UpdateEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            UpdateEvent::ToolChecked { tool, version } => {
                tracing::info!(tool = %tool, version = %version, "Flash tool available");
            }
            UpdateEvent::ReleaseResolved { tag, asset } => {
                tracing::info!(tag = %tag, asset = %asset, "Release asset selected");
            }
            UpdateEvent::PackageReady {
                path,
                size_bytes,
                owned,
            } => {
                tracing::info!(
                    path = %path.display(),
                    kib = %format!("{:.1}", *size_bytes as f64 / 1024.0),
                    owned = *owned,
                    "Package ready"
                );
            }
            UpdateEvent::WaitingForDevice {
                elapsed_secs,
                timeout_secs,
            } => {
                tracing::info!(
                    elapsed = *elapsed_secs,
                    timeout = *timeout_secs,
                    "Still waiting for device..."
                );
            }
            UpdateEvent::DeviceFound { description } => {
                tracing::info!(target_device = %description, "Device found");
            }
            UpdateEvent::BootloaderInfo { info } => {
                tracing::info!(info = %info, "Current bootloader");
            }
            UpdateEvent::TransferStarted { description } => {
                tracing::info!(transfer = %description, "Transfer started");
            }
            UpdateEvent::Complete => {
                tracing::info!("Bootloader update complete");
            }
            UpdateEvent::Failed { kind, message } => {
                tracing::error!(kind = ?kind, "{}", message);
            }
            UpdateEvent::Canceled => {
                tracing::warn!("Canceled by user");
            }
        }
    }
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateEvent::PhaseChanged { from, to } => write!(f, "{from} -> {to}"),
            UpdateEvent::ToolChecked { tool, version } => write!(f, "{tool}: {version}"),
            UpdateEvent::ReleaseResolved { tag, asset } => write!(f, "{asset} ({tag})"),
            UpdateEvent::PackageReady { path, .. } => write!(f, "package {}", path.display()),
            UpdateEvent::WaitingForDevice { elapsed_secs, .. } => {
                write!(f, "waiting... ({elapsed_secs}s)")
            }
            UpdateEvent::DeviceFound { description } => write!(f, "device {description}"),
            UpdateEvent::BootloaderInfo { .. } => write!(f, "bootloader info"),
            UpdateEvent::TransferStarted { description } => write!(f, "flashing {description}"),
            UpdateEvent::Complete => write!(f, "complete"),
            UpdateEvent::Failed { message, .. } => write!(f, "failed: {message}"),
            UpdateEvent::Canceled => write!(f, "canceled"),
        }
    }
}
