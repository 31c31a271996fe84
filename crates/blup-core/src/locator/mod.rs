//! Device discovery for the three transports.
//!
//! Resolves the concrete endpoint the transfer driver will flash to: a
//! serial port, a mounted UF2 volume, or a user-supplied BLE address.

pub mod mock;
pub mod scan;

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::board::UpdateMethod;
use crate::error::UpdateError;
use crate::events::{UpdateEvent, UpdateObserver};
use crate::prompt::{CancelToken, Prompter};

pub use mock::MockScanner;
pub use scan::{DeviceScanner, SystemScanner, read_volume_info};

/// Interval between mass-storage discovery scans.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Emit a progress notice every this many poll intervals.
const NOTICE_EVERY: u32 = 10;

/// Resolved destination for the transfer driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    Serial {
        port: String,
    },
    MassStorage {
        volume: PathBuf,
        /// Self-description file contents, when readable.
        info: Option<String>,
    },
    Radio {
        address: String,
    },
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Serial { port } => write!(f, "serial port {port}"),
            DeviceTarget::MassStorage { volume, .. } => {
                write!(f, "UF2 volume {}", volume.display())
            }
            DeviceTarget::Radio { address } => write!(f, "BLE device {address}"),
        }
    }
}

/// Discovers or validates the device endpoint for one method.
pub struct DeviceLocator<'a> {
    scanner: &'a dyn DeviceScanner,
    prompter: &'a dyn Prompter,
    observer: &'a dyn UpdateObserver,
    cancel: CancelToken,
    poll_interval: Duration,
}

impl<'a> DeviceLocator<'a> {
    pub fn new(
        scanner: &'a dyn DeviceScanner,
        prompter: &'a dyn Prompter,
        observer: &'a dyn UpdateObserver,
        cancel: CancelToken,
    ) -> Self {
        Self {
            scanner,
            prompter,
            observer,
            cancel,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Shorten the poll interval, for tests of the discovery loop.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Resolve the device target for `method`.
    ///
    /// `user_target` is a serial port or volume path supplied explicitly;
    /// `radio_address` is required for (and only used by) the radio method.
    pub fn locate(
        &self,
        method: UpdateMethod,
        user_target: Option<&str>,
        radio_address: Option<&str>,
        timeout: Duration,
    ) -> Result<DeviceTarget, UpdateError> {
        if self.cancel.is_canceled() {
            return Err(UpdateError::Canceled);
        }
        match method {
            UpdateMethod::Serial => self.locate_serial(user_target),
            UpdateMethod::MassStorage => self.locate_volume(user_target, timeout),
            UpdateMethod::Radio => locate_radio(radio_address),
        }
    }

    fn locate_serial(&self, user_target: Option<&str>) -> Result<DeviceTarget, UpdateError> {
        if let Some(port) = user_target {
            info!(port = %port, "Using specified serial port");
            return Ok(DeviceTarget::Serial {
                port: port.to_string(),
            });
        }

        let ports = self.scanner.serial_ports();
        match ports.len() {
            0 => Err(UpdateError::DeviceNotFound {
                method: UpdateMethod::Serial,
            }),
            1 => {
                info!(port = %ports[0], "Detected serial port");
                Ok(DeviceTarget::Serial {
                    port: ports[0].clone(),
                })
            }
            _ => {
                let index = self.prompter.choose("Multiple serial ports found", &ports)?;
                // Ctrl-C during the prompt lands here; the choice is void.
                if self.cancel.is_canceled() {
                    warn!("Selection canceled by user");
                    return Err(UpdateError::Canceled);
                }
                info!(port = %ports[index], "Selected serial port");
                Ok(DeviceTarget::Serial {
                    port: ports[index].clone(),
                })
            }
        }
    }

    fn locate_volume(
        &self,
        user_target: Option<&str>,
        timeout: Duration,
    ) -> Result<DeviceTarget, UpdateError> {
        if let Some(target) = user_target {
            let volume = Path::new(target);
            if !volume.is_dir() {
                return Err(UpdateError::InvalidTarget {
                    target: target.to_string(),
                    reason: "not an existing directory".to_string(),
                });
            }
            info!(volume = %target, "Using specified UF2 volume");
            return Ok(self.volume_target(volume.to_path_buf()));
        }

        // The device may already be mounted; check before blocking.
        if let Some(volume) = self.scanner.uf2_volumes().into_iter().next() {
            info!(volume = %volume.display(), "UF2 volume already mounted");
            return Ok(self.volume_target(volume));
        }

        info!(
            timeout_secs = timeout.as_secs(),
            "Waiting for UF2 volume (double-tap RESET to enter bootloader mode)"
        );
        let start = Instant::now();
        let mut intervals: u32 = 0;
        loop {
            if self.cancel.is_canceled() {
                warn!("Discovery canceled by user");
                return Err(UpdateError::Canceled);
            }
            if start.elapsed() >= timeout {
                return Err(UpdateError::DiscoveryTimeout {
                    secs: timeout.as_secs(),
                });
            }

            thread::sleep(self.poll_interval);
            intervals += 1;

            if let Some(volume) = self.scanner.uf2_volumes().into_iter().next() {
                info!(volume = %volume.display(), "UF2 volume appeared");
                return Ok(self.volume_target(volume));
            }

            if intervals % NOTICE_EVERY == 0 {
                self.observer.on_event(&UpdateEvent::WaitingForDevice {
                    elapsed_secs: start.elapsed().as_secs(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        }
    }

    fn volume_target(&self, volume: PathBuf) -> DeviceTarget {
        let info = read_volume_info(&volume);
        DeviceTarget::MassStorage { volume, info }
    }
}

fn locate_radio(radio_address: Option<&str>) -> Result<DeviceTarget, UpdateError> {
    match radio_address.map(str::trim) {
        Some(address) if !address.is_empty() => Ok(DeviceTarget::Radio {
            address: address.to_string(),
        }),
        _ => Err(UpdateError::MissingAddress),
    }
}
