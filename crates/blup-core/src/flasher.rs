//! Transfer driver: external DFU subprocess or mass-storage copy.
//!
//! Serial and BLE transfers shell out to `adafruit-nrfutil` with a bounded
//! wall-clock wait; mass-storage is a plain copy onto the volume, which the
//! bootloader applies by itself once the write completes.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::board::UpdateMethod;
use crate::error::UpdateError;
use crate::locator::DeviceTarget;

/// External DFU utility used for serial and BLE transfers.
pub const FLASH_TOOL: &str = "adafruit-nrfutil";

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Pushes a package to a located device.
pub trait Flasher: Send + Sync {
    /// Verify prerequisites before any transfer or network activity.
    /// Returns the tool's version string when a tool check applies.
    fn preflight(&self, method: UpdateMethod) -> Result<Option<String>, UpdateError>;

    /// Perform the transfer. Safe to re-run after a failure; no partial
    /// host-side state survives an attempt.
    fn flash(
        &self,
        method: UpdateMethod,
        package: &Path,
        target: &DeviceTarget,
    ) -> Result<(), UpdateError>;
}

/// Production driver shelling out to [`FLASH_TOOL`].
pub struct NrfutilFlasher {
    tool: String,
}

impl NrfutilFlasher {
    pub fn new() -> Self {
        Self::with_tool(FLASH_TOOL)
    }

    /// Use a different executable name, for tests.
    pub fn with_tool(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
        }
    }

    fn run_tool(&self, args: &[&str], timeout: Duration) -> Result<(), UpdateError> {
        info!(cmd = %format!("{} {}", self.tool, args.join(" ")), "Running flash tool");
        let mut child = Command::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        match wait_with_deadline(&mut child, timeout) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => Err(UpdateError::TransferRejected {
                exit_code: status.code(),
            }),
            Ok(None) => {
                // The child may keep running; only our wait unblocks.
                warn!(secs = timeout.as_secs(), "Flash tool still running at deadline");
                Err(UpdateError::TransferTimeout {
                    secs: timeout.as_secs(),
                })
            }
            Err(_) => Err(UpdateError::TransferRejected { exit_code: None }),
        }
    }

    fn spawn_error(&self, _err: std::io::Error) -> UpdateError {
        UpdateError::ToolMissing {
            tool: self.tool.clone(),
        }
    }
}

impl Default for NrfutilFlasher {
    fn default() -> Self {
        Self::new()
    }
}

impl NrfutilFlasher {
    /// Run `<tool> version` with a bounded wait. Unlike a transfer, a stuck
    /// version check is killed and reaped rather than left behind.
    fn version_check(&self, timeout: Duration) -> Result<String, UpdateError> {
        let mut child = Command::new(&self.tool)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let status = wait_with_deadline(&mut child, timeout).ok().flatten();
        if status.is_none() {
            child.kill().ok();
            child.wait().ok();
        }
        if !status.is_some_and(|s| s.success()) {
            return Err(UpdateError::ToolMissing {
                tool: self.tool.clone(),
            });
        }

        let mut version = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut version).ok();
        }
        let version = version.lines().next().unwrap_or("").trim().to_string();
        debug!(tool = %self.tool, version = %version, "Flash tool present");
        Ok(version)
    }
}

impl Flasher for NrfutilFlasher {
    fn preflight(&self, method: UpdateMethod) -> Result<Option<String>, UpdateError> {
        if !method.uses_flash_tool() {
            return Ok(None);
        }
        self.version_check(PREFLIGHT_TIMEOUT).map(Some)
    }

    fn flash(
        &self,
        method: UpdateMethod,
        package: &Path,
        target: &DeviceTarget,
    ) -> Result<(), UpdateError> {
        let pkg = package.to_string_lossy();
        match (method, target) {
            (UpdateMethod::Serial, DeviceTarget::Serial { port }) => self.run_tool(
                &[
                    "dfu", "serial", "--package", &pkg, "--port", port, "--baudrate", "115200",
                    "--touch", "1200",
                ],
                method.transfer_timeout(),
            ),
            (UpdateMethod::Radio, DeviceTarget::Radio { address }) => self.run_tool(
                &["dfu", "ble", "--package", &pkg, "--address", address],
                method.transfer_timeout(),
            ),
            (UpdateMethod::MassStorage, DeviceTarget::MassStorage { volume, .. }) => {
                copy_to_volume(package, volume)
            }
            (_, target) => Err(UpdateError::InvalidTarget {
                target: target.to_string(),
                reason: format!("target does not match the {method} method"),
            }),
        }
    }
}

/// Poll the child for completion; `None` means the deadline elapsed with the
/// process still running (it is not killed).
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL);
    }
}

/// Copy the package into the volume under its own name, keeping the source
/// modification time where the filesystem allows it. The device applies the
/// update and unmounts on its own once the write is complete.
fn copy_to_volume(package: &Path, volume: &Path) -> Result<(), UpdateError> {
    let name = package
        .file_name()
        .ok_or_else(|| UpdateError::InvalidTarget {
            target: package.display().to_string(),
            reason: "package path has no file name".to_string(),
        })?;
    let dest = volume.join(name);
    info!(from = %package.display(), to = %dest.display(), "Copying package to volume");

    std::fs::copy(package, &dest).map_err(UpdateError::CopyFailed)?;

    if let Ok(modified) = std::fs::metadata(package).and_then(|m| m.modified())
        && let Ok(file) = File::options().write(true).open(&dest)
    {
        // Best effort; FAT volumes exposed by the bootloader may refuse it.
        file.set_modified(modified).ok();
    }
    Ok(())
}

/// Scripted flasher for orchestrator tests: records every call and serves
/// queued outcomes (empty queue means success).
#[derive(Default)]
pub struct MockFlasher {
    tool_missing: AtomicBool,
    outcomes: Mutex<Vec<Result<(), UpdateError>>>,
    preflight_calls: Mutex<u32>,
    flash_calls: Mutex<Vec<(UpdateMethod, PathBuf, DeviceTarget)>>,
}

impl MockFlasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `preflight` report the tool as missing.
    pub fn set_tool_missing(&self) {
        self.tool_missing.store(true, Ordering::SeqCst);
    }

    /// Queue the outcome for the next `flash` call.
    pub fn push_outcome(&self, outcome: Result<(), UpdateError>) {
        self.outcomes.lock().unwrap().push(outcome);
    }

    pub fn preflight_calls(&self) -> u32 {
        *self.preflight_calls.lock().unwrap()
    }

    pub fn flash_calls(&self) -> Vec<(UpdateMethod, PathBuf, DeviceTarget)> {
        self.flash_calls.lock().unwrap().clone()
    }
}

impl Flasher for MockFlasher {
    fn preflight(&self, method: UpdateMethod) -> Result<Option<String>, UpdateError> {
        *self.preflight_calls.lock().unwrap() += 1;
        if !method.uses_flash_tool() {
            return Ok(None);
        }
        if self.tool_missing.load(Ordering::SeqCst) {
            return Err(UpdateError::ToolMissing {
                tool: FLASH_TOOL.to_string(),
            });
        }
        Ok(Some("mock 0.0.0".to_string()))
    }

    fn flash(
        &self,
        method: UpdateMethod,
        package: &Path,
        target: &DeviceTarget,
    ) -> Result<(), UpdateError> {
        self.flash_calls
            .lock()
            .unwrap()
            .push((method, package.to_path_buf(), target.clone()));
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(())
        } else {
            outcomes.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_tool_fails_preflight() {
        let flasher = NrfutilFlasher::with_tool("blup-test-no-such-tool");
        let err = flasher.preflight(UpdateMethod::Serial).unwrap_err();
        assert!(matches!(err, UpdateError::ToolMissing { .. }));
    }

    #[test]
    fn test_mass_storage_needs_no_tool() {
        let flasher = NrfutilFlasher::with_tool("blup-test-no-such-tool");
        assert!(flasher.preflight(UpdateMethod::MassStorage).unwrap().is_none());
    }

    #[test]
    fn test_copy_to_volume_writes_same_bytes() {
        let src_dir = tempfile::tempdir().unwrap();
        let volume = tempfile::tempdir().unwrap();
        let package = src_dir.path().join("bootloader_nosd.uf2");
        std::fs::write(&package, b"UF2\nblock data").unwrap();

        copy_to_volume(&package, volume.path()).unwrap();

        let copied = std::fs::read(volume.path().join("bootloader_nosd.uf2")).unwrap();
        assert_eq!(copied, b"UF2\nblock data");
    }

    #[test]
    fn test_copy_into_missing_volume_is_rejected() {
        let src_dir = tempfile::tempdir().unwrap();
        let package = src_dir.path().join("bootloader_nosd.uf2");
        std::fs::write(&package, b"data").unwrap();

        let err = copy_to_volume(&package, Path::new("/no/such/volume")).unwrap_err();
        assert!(matches!(err, UpdateError::CopyFailed(_)));
    }

    #[test]
    fn test_target_method_mismatch() {
        let flasher = NrfutilFlasher::with_tool("blup-test-no-such-tool");
        let err = flasher
            .flash(
                UpdateMethod::Serial,
                Path::new("pkg.zip"),
                &DeviceTarget::Radio {
                    address: "AA:BB:CC:DD:EE:FF".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidTarget { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_stuck_version_check_is_killed_not_leaked() {
        // `yes version` never exits on its own; the bounded check must
        // return promptly and reap the child.
        let flasher = NrfutilFlasher::with_tool("yes");
        let started = Instant::now();
        let err = flasher
            .version_check(Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(err, UpdateError::ToolMissing { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_deadline_timeout_and_exit() {
        let mut slow = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();
        let status = wait_with_deadline(&mut slow, Duration::from_millis(150)).unwrap();
        assert!(status.is_none());
        assert!(started.elapsed() < Duration::from_secs(3));
        slow.kill().ok();
        slow.wait().ok();

        let mut quick = Command::new("true").spawn().unwrap();
        let status = wait_with_deadline(&mut quick, Duration::from_secs(5)).unwrap();
        assert!(status.unwrap().success());
    }

    #[test]
    fn test_mock_flasher_records_and_scripts() {
        let mock = MockFlasher::new();
        mock.push_outcome(Err(UpdateError::TransferRejected { exit_code: Some(1) }));

        let target = DeviceTarget::Serial {
            port: "/dev/ttyACM0".into(),
        };
        let err = mock
            .flash(UpdateMethod::Serial, Path::new("pkg.zip"), &target)
            .unwrap_err();
        assert!(matches!(err, UpdateError::TransferRejected { .. }));

        // Queue exhausted: next attempt succeeds.
        mock.flash(UpdateMethod::Serial, Path::new("pkg.zip"), &target)
            .unwrap();
        assert_eq!(mock.flash_calls().len(), 2);
    }
}
