//! Failure taxonomy shared by all components.
//!
//! Every failure is classified into a [`FailureKind`] and carries an
//! operator-facing remediation hint where one exists. The orchestrator is
//! the only place these are turned into a terminal outcome; nothing in the
//! crate propagates an error past [`crate::session::UpdateSession::run`].

use std::path::PathBuf;

use thiserror::Error;

use crate::board::UpdateMethod;

/// Coarse failure classification, used for reporting and exit-status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Missing tool or argument, detected before touching device or network.
    Precondition,
    /// Could not obtain a firmware package.
    Resolution,
    /// Could not find or validate a device target.
    Discovery,
    /// The transfer itself failed.
    Transfer,
    /// The operator interrupted an interactive wait.
    Canceled,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("`{tool}` not found on PATH")]
    ToolMissing { tool: String },

    #[error("a BLE address is required for the ota method")]
    MissingAddress,

    #[error("package file not found: {}", .path.display())]
    PackageNotFound { path: PathBuf },

    #[error("no release asset matching `*{fragment}*{suffix}` in {tag}")]
    NoMatchingAsset {
        tag: String,
        fragment: String,
        suffix: String,
        /// Assets that mention the board family, for pattern-drift diagnosis.
        near_misses: Vec<String>,
    },

    #[error("release registry request failed: {0}")]
    Registry(#[from] reqwest::Error),

    #[error("failed to write downloaded asset {name}: {source}")]
    Download {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no {method} device detected")]
    DeviceNotFound { method: UpdateMethod },

    #[error("no device appeared within {secs}s")]
    DiscoveryTimeout { secs: u64 },

    #[error("invalid device target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid selection")]
    InvalidSelection,

    #[error("transfer rejected ({})", match .exit_code { Some(c) => format!("exit code {c}"), None => "tool terminated by signal".to_string() })]
    TransferRejected { exit_code: Option<i32> },

    #[error("transfer timed out after {secs}s")]
    TransferTimeout { secs: u64 },

    #[error("failed to copy package to volume: {0}")]
    CopyFailed(#[source] std::io::Error),

    #[error("canceled by user")]
    Canceled,
}

impl UpdateError {
    /// Taxonomy bucket for this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            UpdateError::ToolMissing { .. } | UpdateError::MissingAddress => {
                FailureKind::Precondition
            }
            UpdateError::PackageNotFound { .. }
            | UpdateError::NoMatchingAsset { .. }
            | UpdateError::Registry(_)
            | UpdateError::Download { .. } => FailureKind::Resolution,
            UpdateError::DeviceNotFound { .. }
            | UpdateError::DiscoveryTimeout { .. }
            | UpdateError::InvalidTarget { .. }
            | UpdateError::InvalidSelection => FailureKind::Discovery,
            UpdateError::TransferRejected { .. }
            | UpdateError::TransferTimeout { .. }
            | UpdateError::CopyFailed(_) => FailureKind::Transfer,
            UpdateError::Canceled => FailureKind::Canceled,
        }
    }

    /// Operator guidance for this failure, if any.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            UpdateError::ToolMissing { .. } => {
                Some("install it with: pip install adafruit-nrfutil")
            }
            UpdateError::MissingAddress => Some(
                "pass --address XX:XX:XX:XX:XX:XX (find it with the nRF Connect app or bluetoothctl)",
            ),
            UpdateError::Registry(_) => {
                Some("set the GITHUB_TOKEN env var if you are hitting rate limits")
            }
            UpdateError::DeviceNotFound {
                method: UpdateMethod::Serial,
            } => Some("connect the board via USB, or specify the port manually with --port"),
            UpdateError::DeviceNotFound { .. } | UpdateError::DiscoveryTimeout { .. } => Some(
                "double-tap the RESET button to enter bootloader mode, or specify the volume with --drive",
            ),
            UpdateError::TransferRejected { .. } => Some(
                "put the board into DFU mode manually (double-tap RESET) and re-run, or try --method uf2",
            ),
            UpdateError::TransferTimeout { .. } => Some(
                "the device may be mid-transfer; re-enter bootloader mode (double-tap RESET) before retrying",
            ),
            _ => None,
        }
    }
}
