//! blup-core: bootloader field-recovery for XIAO nRF52840 boards.
//!
//! Updates the Adafruit nRF52 bootloader over one of three transports:
//! serial DFU, UF2 mass-storage copy, or BLE OTA DFU. Wire-protocol details
//! are delegated to `adafruit-nrfutil`; this crate is the orchestration.
//!
//! # Architecture
//!
//! The crate is organized into layers, leaves first:
//!
//! - **Board**: board/method selection and release naming constants
//! - **Registry**: latest-release metadata and asset download (GitHub)
//! - **Resolver**: package resolution with owned temp-dir lifecycle
//! - **Locator**: per-OS device discovery (serial ports, UF2 volumes)
//! - **Flasher**: subprocess / file-copy transfer with bounded waits
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: the orchestrator state machine
//!
//! # Example
//!
//! ```no_run
//! use blup_core::prompt::{CancelToken, ConsolePrompter};
//! use blup_core::{
//!     GithubRegistry, NrfutilFlasher, RegistryConfig, SessionConfig, SystemScanner,
//!     UpdateSession,
//! };
//!
//! let registry = GithubRegistry::new(RegistryConfig::default()).unwrap();
//! let scanner = SystemScanner::new();
//! let flasher = NrfutilFlasher::new();
//! let prompter = ConsolePrompter;
//!
//! let mut session = UpdateSession::new(
//!     SessionConfig::default(),
//!     &registry,
//!     &scanner,
//!     &flasher,
//!     &prompter,
//!     CancelToken::new(),
//! );
//! let outcome = session.run();
//! std::process::exit(outcome.exit_code());
//! ```

pub mod board;
pub mod error;
pub mod events;
pub mod flasher;
pub mod locator;
pub mod prompt;
pub mod registry;
pub mod resolver;
pub mod session;

// Re-exports for convenience
pub use board::{Board, UpdateMethod};
pub use error::{FailureKind, UpdateError};
pub use events::{NullObserver, TracingObserver, UpdateEvent, UpdateObserver};
pub use flasher::{Flasher, MockFlasher, NrfutilFlasher};
pub use locator::{DeviceLocator, DeviceScanner, DeviceTarget, MockScanner, SystemScanner};
pub use prompt::{CancelToken, ConsolePrompter, Prompter, ScriptedPrompter};
pub use registry::{GithubRegistry, MockRegistry, Release, ReleaseAsset, ReleaseRegistry, RegistryConfig};
pub use resolver::{PackageHandle, PackageResolver};
pub use session::{Phase, SessionConfig, UpdateOutcome, UpdateSession};
