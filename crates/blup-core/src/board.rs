//! Board and transport selection, plus the release-asset naming constants.
//!
//! Asset name fragments and UF2 volume labels follow the
//! Adafruit_nRF52_Bootloader release conventions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// GitHub "latest release" endpoint for the upstream bootloader.
pub const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/adafruit/Adafruit_nRF52_Bootloader/releases/latest";

/// Release-asset suffix for the combined bootloader + SoftDevice package.
/// Safe to apply from any installed bootloader version, including broken ones.
pub const COMBINED_PACKAGE_SUFFIX: &str = ".zip";

/// Release-asset suffix for the bootloader-only UF2 image.
/// Updates the bootloader alone, keeping whatever SoftDevice is installed.
pub const BOOTLOADER_ONLY_SUFFIX: &str = "_nosd.uf2";

/// Volume labels used by this bootloader family in mass-storage mode.
pub const UF2_VOLUME_NAMES: &[&str] = &["XIAO-SENSE", "XIAO-BLE", "NRF52BOOT", "FTHR840BOOT"];

/// Self-description file exposed on a UF2 volume.
pub const UF2_INFO_FILE: &str = "INFO_UF2.TXT";

/// Loose token used when listing near-miss assets in diagnostics.
pub const BOARD_TOKEN: &str = "xiao";

/// Target board variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Board {
    /// XIAO nRF52840 Sense.
    Sense,
    /// XIAO nRF52840 (non-Sense).
    Standard,
}

impl Board {
    /// Fragment that must appear in a matching release-asset name.
    pub fn asset_fragment(&self) -> &'static str {
        match self {
            Board::Sense => "xiao_nrf52840_ble_sense_bootloader",
            Board::Standard => "xiao_nrf52840_ble_bootloader",
        }
    }

    /// Human-readable board name for console output.
    pub fn label(&self) -> &'static str {
        match self {
            Board::Sense => "XIAO nRF52840 Sense",
            Board::Standard => "XIAO nRF52840",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Board::Sense => write!(f, "sense"),
            Board::Standard => write!(f, "standard"),
        }
    }
}

impl FromStr for Board {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sense" => Ok(Board::Sense),
            "standard" => Ok(Board::Standard),
            other => Err(format!("unknown board `{other}` (expected sense|standard)")),
        }
    }
}

/// Transport used to deliver the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMethod {
    /// Serial DFU over USB CDC-ACM. Works on all bootloader versions.
    #[serde(rename = "serial")]
    Serial,
    /// UF2 drag-and-drop onto the bootloader's mass-storage volume.
    #[serde(rename = "uf2")]
    MassStorage,
    /// OTA DFU over BLE.
    #[serde(rename = "ota")]
    Radio,
}

impl UpdateMethod {
    /// Suffix the matching release asset must carry for this method.
    pub fn asset_suffix(&self) -> &'static str {
        match self {
            // Serial and BLE both flash the combined package so the
            // SoftDevice is replaced along with the bootloader.
            UpdateMethod::Serial | UpdateMethod::Radio => COMBINED_PACKAGE_SUFFIX,
            UpdateMethod::MassStorage => BOOTLOADER_ONLY_SUFFIX,
        }
    }

    /// Whether this method flashes through the external DFU utility.
    pub fn uses_flash_tool(&self) -> bool {
        matches!(self, UpdateMethod::Serial | UpdateMethod::Radio)
    }

    /// Wall-clock bound for the external flashing subprocess.
    pub fn transfer_timeout(&self) -> Duration {
        match self {
            UpdateMethod::Serial => Duration::from_secs(120),
            UpdateMethod::Radio => Duration::from_secs(180),
            // A mass-storage transfer is a single bounded filesystem write.
            UpdateMethod::MassStorage => Duration::ZERO,
        }
    }
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateMethod::Serial => write!(f, "serial"),
            UpdateMethod::MassStorage => write!(f, "uf2"),
            UpdateMethod::Radio => write!(f, "ota"),
        }
    }
}

impl FromStr for UpdateMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(UpdateMethod::Serial),
            "uf2" => Ok(UpdateMethod::MassStorage),
            "ota" => Ok(UpdateMethod::Radio),
            other => Err(format!("unknown method `{other}` (expected serial|uf2|ota)")),
        }
    }
}
