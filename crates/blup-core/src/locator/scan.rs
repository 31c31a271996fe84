//! OS-specific device enumeration.
//!
//! One [`DeviceScanner`] implementation per platform, selected at compile
//! time; the locator only sees the trait.

use std::path::{Path, PathBuf};

use crate::board::{UF2_INFO_FILE, UF2_VOLUME_NAMES};

/// Enumerates candidate transport endpoints on the running system.
pub trait DeviceScanner: Send + Sync {
    /// Candidate serial device paths, sorted.
    fn serial_ports(&self) -> Vec<String>;

    /// Mounted UF2 bootloader volumes.
    fn uf2_volumes(&self) -> Vec<PathBuf>;
}

/// Whether a mounted directory looks like a UF2 bootloader volume: it either
/// carries the self-description file or has a known volume label.
pub fn is_uf2_volume(path: &Path) -> bool {
    if path.join(UF2_INFO_FILE).is_file() {
        return true;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| UF2_VOLUME_NAMES.contains(&name))
}

/// Best-effort read of the volume's self-description file. Absence is fine;
/// it just means no version report before flashing.
pub fn read_volume_info(volume: &Path) -> Option<String> {
    std::fs::read_to_string(volume.join(UF2_INFO_FILE))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Production scanner for the current operating system.
#[derive(Debug, Default)]
pub struct SystemScanner;

impl SystemScanner {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl DeviceScanner for SystemScanner {
    fn serial_ports(&self) -> Vec<String> {
        // ttyACM* is the CDC-ACM serial device for the nRF52840.
        let mut ports = list_dev_matching("ttyACM");
        ports.sort();
        ports
    }

    fn uf2_volumes(&self) -> Vec<PathBuf> {
        let mut volumes = Vec::new();
        for base in ["/media", "/mnt", "/run/media"] {
            scan_mounts(Path::new(base), 0, &mut volumes);
        }
        volumes
    }
}

#[cfg(target_os = "macos")]
impl DeviceScanner for SystemScanner {
    fn serial_ports(&self) -> Vec<String> {
        let mut ports = list_dev_matching("cu.usbmodem");
        ports.sort();
        ports
    }

    fn uf2_volumes(&self) -> Vec<PathBuf> {
        let mut volumes = Vec::new();
        let Ok(entries) = std::fs::read_dir("/Volumes") else {
            return volumes;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && is_uf2_volume(&path) {
                volumes.push(path);
            }
        }
        volumes
    }
}

#[cfg(target_os = "windows")]
impl DeviceScanner for SystemScanner {
    fn serial_ports(&self) -> Vec<String> {
        // COM-port enumeration needs the setup API; ask for an explicit
        // --port instead of guessing.
        tracing::warn!("Serial port enumeration is not available on Windows; pass --port COMn");
        Vec::new()
    }

    fn uf2_volumes(&self) -> Vec<PathBuf> {
        let mut volumes = Vec::new();
        for letter in 'A'..='Z' {
            let drive = PathBuf::from(format!("{letter}:\\"));
            if drive.join(UF2_INFO_FILE).is_file() {
                volumes.push(drive);
            }
        }
        volumes
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn list_dev_matching(prefix: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .map(|name| format!("/dev/{name}"))
        .collect()
}

/// Walk a mount base looking for UF2 volumes, three levels deep at most
/// (/run/media/<user>/<label> is the deepest common layout).
#[cfg(target_os = "linux")]
fn scan_mounts(dir: &Path, depth: usize, volumes: &mut Vec<PathBuf>) {
    const MAX_DEPTH: usize = 3;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if is_uf2_volume(&path) {
            volumes.push(path);
        } else if depth + 1 < MAX_DEPTH {
            scan_mounts(&path, depth + 1, volumes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_by_info_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_uf2_volume(dir.path()));
        std::fs::write(dir.path().join(UF2_INFO_FILE), "UF2 Bootloader 0.6.1").unwrap();
        assert!(is_uf2_volume(dir.path()));
    }

    #[test]
    fn test_volume_by_label() {
        let base = tempfile::tempdir().unwrap();
        let vol = base.path().join("XIAO-SENSE");
        std::fs::create_dir(&vol).unwrap();
        assert!(is_uf2_volume(&vol));
        assert!(!is_uf2_volume(&base.path().join("XIAO-SENSE-BACKUP")));
    }

    #[test]
    fn test_read_volume_info_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_volume_info(dir.path()), None);
        std::fs::write(
            dir.path().join(UF2_INFO_FILE),
            "UF2 Bootloader 0.6.1\nModel: XIAO nRF52840 Sense\n",
        )
        .unwrap();
        let info = read_volume_info(dir.path()).unwrap();
        assert!(info.starts_with("UF2 Bootloader 0.6.1"));
        assert!(!info.ends_with('\n'));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_mounts_respects_depth() {
        let base = tempfile::tempdir().unwrap();
        // <base>/user/XIAO-BLE is within depth; one level further is not.
        let shallow = base.path().join("user").join("XIAO-BLE");
        std::fs::create_dir_all(&shallow).unwrap();
        let deep = base.path().join("a").join("b").join("c").join("NRF52BOOT");
        std::fs::create_dir_all(&deep).unwrap();

        let mut volumes = Vec::new();
        scan_mounts(base.path(), 0, &mut volumes);
        assert_eq!(volumes, vec![shallow]);
    }
}
