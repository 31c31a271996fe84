//! Mock device scanner for testing locator and orchestrator logic.

use std::path::PathBuf;
use std::sync::Mutex;

use super::scan::DeviceScanner;

/// Scripted scanner: serial ports are fixed, UF2 volumes can be made to
/// appear only after a number of scans to exercise the polling loop.
#[derive(Default)]
pub struct MockScanner {
    serial: Mutex<Vec<String>>,
    volumes: Mutex<Vec<PathBuf>>,
    /// Number of volume scans that still return nothing.
    empty_scans_left: Mutex<u32>,
    volume_scan_calls: Mutex<u32>,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_serial_ports(&self, ports: &[&str]) {
        *self.serial.lock().unwrap() = ports.iter().map(|p| p.to_string()).collect();
    }

    /// Volumes visible from the very first scan.
    pub fn set_volumes(&self, volumes: &[PathBuf]) {
        *self.volumes.lock().unwrap() = volumes.to_vec();
    }

    /// Volumes that only show up once `empty_scans` scans have happened.
    pub fn set_volumes_after(&self, empty_scans: u32, volumes: &[PathBuf]) {
        self.set_volumes(volumes);
        *self.empty_scans_left.lock().unwrap() = empty_scans;
    }

    /// How many times `uf2_volumes` was called.
    pub fn volume_scan_calls(&self) -> u32 {
        *self.volume_scan_calls.lock().unwrap()
    }
}

impl DeviceScanner for MockScanner {
    fn serial_ports(&self) -> Vec<String> {
        self.serial.lock().unwrap().clone()
    }

    fn uf2_volumes(&self) -> Vec<PathBuf> {
        *self.volume_scan_calls.lock().unwrap() += 1;
        let mut left = self.empty_scans_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Vec::new();
        }
        self.volumes.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volumes_appear_after_n_scans() {
        let mock = MockScanner::new();
        mock.set_volumes_after(2, &[PathBuf::from("/media/XIAO-SENSE")]);

        assert!(mock.uf2_volumes().is_empty());
        assert!(mock.uf2_volumes().is_empty());
        assert_eq!(mock.uf2_volumes().len(), 1);
        assert_eq!(mock.volume_scan_calls(), 3);
    }
}
