//! Update session - the orchestrator state machine.
//!
//! Drives resolver, locator, and flasher in order for the selected method,
//! owns the downloaded package for the lifetime of the run, and normalizes
//! every failure into a single terminal outcome. Nothing is retried; the
//! remediation for any failure is to re-run the tool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::board::{Board, UpdateMethod};
use crate::error::UpdateError;
use crate::events::{TracingObserver, UpdateEvent, UpdateObserver};
use crate::flasher::Flasher;
use crate::locator::{DeviceLocator, DeviceScanner, DeviceTarget};
use crate::prompt::{CancelToken, Prompter};
use crate::registry::ReleaseRegistry;
use crate::resolver::PackageResolver;

/// Configuration for one update session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Board variant.
    pub board: Board,
    /// Update method.
    pub method: UpdateMethod,
    /// Local package path; skips resolution against the release registry.
    pub package: Option<PathBuf>,
    /// Explicit device target (serial port or volume path); skips discovery.
    pub target: Option<String>,
    /// BLE address, required for the ota method.
    pub address: Option<String>,
    /// How long to wait for a UF2 volume to appear.
    pub wait_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            board: Board::Sense,
            method: UpdateMethod::Serial,
            package: None,
            target: None,
            address: None,
            wait_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Orchestrator state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    PackageReady,
    DeviceReady,
    Transferring,
    Succeeded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "INIT"),
            Phase::PackageReady => write!(f, "PACKAGE_READY"),
            Phase::DeviceReady => write!(f, "DEVICE_READY"),
            Phase::Transferring => write!(f, "TRANSFERRING"),
            Phase::Succeeded => write!(f, "SUCCEEDED"),
            Phase::Failed => write!(f, "FAILED"),
        }
    }
}

/// Terminal result of a session, normalized across transports.
#[derive(Debug)]
pub enum UpdateOutcome {
    Succeeded,
    Failed(UpdateError),
    /// The operator interrupted an interactive wait; distinct from failure.
    Canceled,
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Succeeded)
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateOutcome::Succeeded => 0,
            UpdateOutcome::Failed(_) => 1,
            UpdateOutcome::Canceled => 130,
        }
    }
}

/// One bootloader update run. Exactly one device, one transport, one attempt.
pub struct UpdateSession<'a, O: UpdateObserver> {
    config: SessionConfig,
    registry: &'a dyn ReleaseRegistry,
    scanner: &'a dyn DeviceScanner,
    flasher: &'a dyn Flasher,
    prompter: &'a dyn Prompter,
    cancel: CancelToken,
    observer: Arc<O>,
    phase: Phase,
    poll_interval: Option<Duration>,
    package_path: Option<PathBuf>,
}

impl<'a> UpdateSession<'a, TracingObserver> {
    /// Create a session with the default tracing observer.
    pub fn new(
        config: SessionConfig,
        registry: &'a dyn ReleaseRegistry,
        scanner: &'a dyn DeviceScanner,
        flasher: &'a dyn Flasher,
        prompter: &'a dyn Prompter,
        cancel: CancelToken,
    ) -> Self {
        Self::with_observer(
            config,
            registry,
            scanner,
            flasher,
            prompter,
            cancel,
            Arc::new(TracingObserver),
        )
    }
}

impl<'a, O: UpdateObserver + 'static> UpdateSession<'a, O> {
    /// Create a session with a custom observer.
    #[allow(clippy::too_many_arguments)]
    pub fn with_observer(
        config: SessionConfig,
        registry: &'a dyn ReleaseRegistry,
        scanner: &'a dyn DeviceScanner,
        flasher: &'a dyn Flasher,
        prompter: &'a dyn Prompter,
        cancel: CancelToken,
        observer: Arc<O>,
    ) -> Self {
        Self {
            config,
            registry,
            scanner,
            flasher,
            prompter,
            cancel,
            observer,
            phase: Phase::Init,
            poll_interval: None,
            package_path: None,
        }
    }

    /// Shorten the discovery poll interval, for tests.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Current phase. Success and failure move the machine to a terminal
    /// phase; cancellation stops it where it was, so a canceled run reports
    /// the last phase it reached.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Path of the package used by the last run, owned or not. The file
    /// itself is gone by the time `run` returns if the session downloaded it.
    pub fn package_path(&self) -> Option<&Path> {
        self.package_path.as_deref()
    }

    /// Run the complete update. All failures terminate here; the returned
    /// outcome is the only report.
    #[instrument(skip(self), fields(board = %self.config.board, method = %self.config.method))]
    pub fn run(&mut self) -> UpdateOutcome {
        match self.execute() {
            Ok(()) => {
                self.goto_phase(Phase::Succeeded);
                self.observer.on_event(&UpdateEvent::Complete);
                UpdateOutcome::Succeeded
            }
            Err(UpdateError::Canceled) => {
                // Canceled is an operator decision, not a FAILED state.
                self.observer.on_event(&UpdateEvent::Canceled);
                UpdateOutcome::Canceled
            }
            Err(err) => {
                self.goto_phase(Phase::Failed);
                self.observer.on_event(&UpdateEvent::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                UpdateOutcome::Failed(err)
            }
        }
    }

    /// The happy path; any error unwinds to `run`, dropping the package
    /// handle (and its temp directory) on the way out.
    fn execute(&mut self) -> Result<(), UpdateError> {
        self.preflight()?;

        // Resolve the package.
        let resolver = PackageResolver::new(self.registry);
        let (package, tag) = resolver.resolve(
            self.config.board,
            self.config.method,
            self.config.package.as_deref(),
        )?;
        self.package_path = Some(package.path().to_path_buf());
        if let Some(tag) = tag {
            self.observer.on_event(&UpdateEvent::ReleaseResolved {
                tag,
                asset: package.file_name().to_string(),
            });
        }
        let size_bytes = std::fs::metadata(package.path())
            .map(|m| m.len())
            .unwrap_or(0);
        self.observer.on_event(&UpdateEvent::PackageReady {
            path: package.path().to_path_buf(),
            size_bytes,
            owned: package.is_owned(),
        });
        self.goto_phase(Phase::PackageReady);
        self.check_canceled()?;

        // Locate the device.
        let mut locator = DeviceLocator::new(
            self.scanner,
            self.prompter,
            self.observer.as_ref(),
            self.cancel.clone(),
        );
        if let Some(interval) = self.poll_interval {
            locator = locator.with_poll_interval(interval);
        }
        let target = locator.locate(
            self.config.method,
            self.config.target.as_deref(),
            self.config.address.as_deref(),
            Duration::from_secs(self.config.wait_timeout_secs),
        )?;
        if let DeviceTarget::MassStorage {
            info: Some(info), ..
        } = &target
        {
            self.observer.on_event(&UpdateEvent::BootloaderInfo {
                info: info.clone(),
            });
        }
        self.observer.on_event(&UpdateEvent::DeviceFound {
            description: target.to_string(),
        });
        self.goto_phase(Phase::DeviceReady);
        self.check_canceled()?;

        // Transfer.
        self.goto_phase(Phase::Transferring);
        self.observer.on_event(&UpdateEvent::TransferStarted {
            description: format!("{} -> {}", package.file_name(), target),
        });
        self.flasher
            .flash(self.config.method, package.path(), &target)?;
        Ok(())
    }

    /// Prerequisites checked before any device or network interaction.
    fn preflight(&self) -> Result<(), UpdateError> {
        if let Some(version) = self.flasher.preflight(self.config.method)? {
            self.observer.on_event(&UpdateEvent::ToolChecked {
                tool: crate::flasher::FLASH_TOOL.to_string(),
                version,
            });
        }
        if self.config.method == UpdateMethod::Radio
            && !self
                .config
                .address
                .as_deref()
                .is_some_and(|a| !a.trim().is_empty())
        {
            return Err(UpdateError::MissingAddress);
        }
        Ok(())
    }

    /// A Ctrl-C raised during any wait unwinds here at the next phase
    /// boundary; nothing past this point runs for a canceled session.
    fn check_canceled(&self) -> Result<(), UpdateError> {
        if self.cancel.is_canceled() {
            return Err(UpdateError::Canceled);
        }
        Ok(())
    }

    fn goto_phase(&mut self, to: Phase) {
        info!(from = %self.phase, to = %to, "Phase transition");
        self.observer.on_event(&UpdateEvent::PhaseChanged {
            from: self.phase,
            to,
        });
        self.phase = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::flasher::MockFlasher;
    use crate::locator::MockScanner;
    use crate::prompt::ScriptedPrompter;
    use crate::registry::MockRegistry;

    fn sense_uf2_registry() -> MockRegistry {
        MockRegistry::with_assets(
            "0.9.2",
            &[
                "xiao_nrf52840_ble_sense_bootloader-0.9.2.zip",
                "update-xiao_nrf52840_ble_sense_bootloader-0.9.2_nosd.uf2",
                "update-xiao_nrf52840_ble_bootloader-0.9.2_nosd.uf2",
            ],
        )
    }

    fn session<'a>(
        config: SessionConfig,
        registry: &'a MockRegistry,
        scanner: &'a MockScanner,
        flasher: &'a MockFlasher,
        prompter: &'a ScriptedPrompter,
        cancel: CancelToken,
    ) -> UpdateSession<'a, TracingObserver> {
        UpdateSession::new(config, registry, scanner, flasher, prompter, cancel)
            .with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_mass_storage_happy_path() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new();
        let volume = tempfile::tempdir().unwrap();
        scanner.set_volumes(&[volume.path().to_path_buf()]);
        let flasher = MockFlasher::new();
        let prompter = ScriptedPrompter::new(&[]);

        let config = SessionConfig {
            method: UpdateMethod::MassStorage,
            ..Default::default()
        };
        let mut s = session(
            config,
            &registry,
            &scanner,
            &flasher,
            &prompter,
            CancelToken::new(),
        );
        let outcome = s.run();

        assert!(outcome.is_success());
        assert_eq!(s.phase(), Phase::Succeeded);
        let calls = flasher.flash_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, UpdateMethod::MassStorage);
        assert!(
            calls[0]
                .1
                .ends_with("update-xiao_nrf52840_ble_sense_bootloader-0.9.2_nosd.uf2")
        );
        // Downloaded package is cleaned up after the run.
        let pkg = s.package_path().unwrap();
        assert!(!pkg.exists());
    }

    #[test]
    fn test_serial_happy_path_selects_combined_package() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new();
        scanner.set_serial_ports(&["/dev/ttyACM0"]);
        let flasher = MockFlasher::new();
        let prompter = ScriptedPrompter::new(&[]);

        let mut s = session(
            SessionConfig::default(),
            &registry,
            &scanner,
            &flasher,
            &prompter,
            CancelToken::new(),
        );
        let outcome = s.run();

        assert!(outcome.is_success());
        assert_eq!(flasher.preflight_calls(), 1);
        let calls = flasher.flash_calls();
        assert!(calls[0].1.ends_with("xiao_nrf52840_ble_sense_bootloader-0.9.2.zip"));
        assert_eq!(
            calls[0].2,
            DeviceTarget::Serial {
                port: "/dev/ttyACM0".to_string()
            }
        );
    }

    #[test]
    fn test_tool_missing_precondition_makes_no_network_calls() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new();
        scanner.set_serial_ports(&["/dev/ttyACM0"]);
        let flasher = MockFlasher::new();
        flasher.set_tool_missing();
        let prompter = ScriptedPrompter::new(&[]);

        let mut s = session(
            SessionConfig::default(),
            &registry,
            &scanner,
            &flasher,
            &prompter,
            CancelToken::new(),
        );
        let outcome = s.run();

        match outcome {
            UpdateOutcome::Failed(err) => assert_eq!(err.kind(), FailureKind::Precondition),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(s.phase(), Phase::Failed);
        assert_eq!(registry.latest_calls(), 0);
        assert_eq!(registry.download_calls(), 0);
        assert!(flasher.flash_calls().is_empty());
    }

    #[test]
    fn test_radio_without_address_is_precondition_failure() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new();
        let flasher = MockFlasher::new();
        let prompter = ScriptedPrompter::new(&[]);

        let config = SessionConfig {
            method: UpdateMethod::Radio,
            ..Default::default()
        };
        let mut s = session(
            config,
            &registry,
            &scanner,
            &flasher,
            &prompter,
            CancelToken::new(),
        );
        let outcome = s.run();

        match outcome {
            UpdateOutcome::Failed(err) => {
                assert!(matches!(err, UpdateError::MissingAddress));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(registry.latest_calls(), 0);
    }

    #[test]
    fn test_locate_failure_releases_downloaded_package() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new(); // no serial ports
        let flasher = MockFlasher::new();
        let prompter = ScriptedPrompter::new(&[]);

        let mut s = session(
            SessionConfig::default(),
            &registry,
            &scanner,
            &flasher,
            &prompter,
            CancelToken::new(),
        );
        let outcome = s.run();

        match outcome {
            UpdateOutcome::Failed(err) => assert_eq!(err.kind(), FailureKind::Discovery),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The download happened, and its temp dir is gone.
        assert_eq!(registry.download_calls(), 1);
        let pkg = s.package_path().unwrap();
        assert!(!pkg.exists());
        assert!(flasher.flash_calls().is_empty());
    }

    #[test]
    fn test_pending_cancel_is_canceled_not_failed() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new(); // volume never appears
        let flasher = MockFlasher::new();
        let prompter = ScriptedPrompter::new(&[]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let config = SessionConfig {
            method: UpdateMethod::MassStorage,
            wait_timeout_secs: 30,
            ..Default::default()
        };
        let mut s = session(config, &registry, &scanner, &flasher, &prompter, cancel);
        let outcome = s.run();

        assert!(matches!(outcome, UpdateOutcome::Canceled));
        assert_eq!(outcome.exit_code(), 130);
        // The machine stops where it was; FAILED is not entered.
        assert_eq!(s.phase(), Phase::PackageReady);
        // Temp download is released on cancellation too.
        let pkg = s.package_path().unwrap();
        assert!(!pkg.exists());
    }

    #[test]
    fn test_cancel_before_serial_selection_skips_flash() {
        let registry = sense_uf2_registry();
        let scanner = MockScanner::new();
        scanner.set_serial_ports(&["/dev/ttyACM0", "/dev/ttyACM1"]);
        let flasher = MockFlasher::new();
        let prompter = ScriptedPrompter::new(&[0]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut s = session(
            SessionConfig::default(),
            &registry,
            &scanner,
            &flasher,
            &prompter,
            cancel,
        );
        let outcome = s.run();

        // A scripted answer is waiting, but the cancel wins: no port is
        // selected and nothing is flashed.
        assert!(matches!(outcome, UpdateOutcome::Canceled));
        assert!(flasher.flash_calls().is_empty());
    }

    #[test]
    fn test_transfer_failure_then_clean_retry_succeeds() {
        // Two failed invocations followed by a corrected third one end in
        // the same SUCCEEDED state as a first-attempt success.
        let registry = sense_uf2_registry();
        let flasher = MockFlasher::new();
        flasher.push_outcome(Err(UpdateError::TransferRejected { exit_code: Some(1) }));
        flasher.push_outcome(Err(UpdateError::TransferTimeout { secs: 120 }));
        let prompter = ScriptedPrompter::new(&[]);

        for attempt in 0..3u32 {
            let scanner = MockScanner::new();
            scanner.set_serial_ports(&["/dev/ttyACM0"]);
            let mut s = session(
                SessionConfig::default(),
                &registry,
                &scanner,
                &flasher,
                &prompter,
                CancelToken::new(),
            );
            let outcome = s.run();
            if attempt < 2 {
                assert!(matches!(outcome, UpdateOutcome::Failed(_)));
                assert_eq!(s.phase(), Phase::Failed);
            } else {
                assert!(outcome.is_success());
                assert_eq!(s.phase(), Phase::Succeeded);
            }
            let pkg = s.package_path().unwrap();
            assert!(!pkg.exists());
        }
        assert_eq!(flasher.flash_calls().len(), 3);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = SessionConfig {
            board: Board::Standard,
            method: UpdateMethod::Radio,
            address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            wait_timeout_secs: 90,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blup.toml");
        config.save_to_file(&path).unwrap();

        let loaded = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.board, Board::Standard);
        assert_eq!(loaded.method, UpdateMethod::Radio);
        assert_eq!(loaded.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(loaded.wait_timeout_secs, 90);
        assert!(loaded.package.is_none());
    }
}
