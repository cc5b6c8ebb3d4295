//! Device diagnostics, run when the camera cannot be opened.
//!
//! Lists candidate device nodes with their access bits and produces remediation
//! hints. Never fails; an unreadable directory simply yields no devices.

use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MAX_PROBED_DEVICES: usize = 10;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DevicePermission {
    pub path: PathBuf,
    pub readable: bool,
    pub writable: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceDiagnostics {
    pub available_devices: Vec<PathBuf>,
    pub permissions: Vec<DevicePermission>,
    pub tips: Vec<String>,
}

/// Probe `/dev/video0` through `/dev/video{max_devices - 1}`.
pub fn diagnose(max_devices: usize) -> DeviceDiagnostics {
    diagnose_in(Path::new("/dev"), max_devices)
}

pub fn diagnose_in(dir: &Path, max_devices: usize) -> DeviceDiagnostics {
    let mut report = DeviceDiagnostics::default();
    for i in 0..max_devices {
        let path = dir.join(format!("video{}", i));
        if !path.exists() {
            continue;
        }
        report.permissions.push(DevicePermission {
            readable: access_ok(&path, Access::Read),
            writable: access_ok(&path, Access::Write),
            path: path.clone(),
        });
        report.available_devices.push(path);
    }

    if report.available_devices.is_empty() {
        report
            .tips
            .push("No video devices found. Check USB connections.".to_string());
    } else {
        if report.permissions.iter().any(|p| !p.readable || !p.writable) {
            report.tips.push(format!(
                "Check camera permissions: sudo chmod 666 {}/video*",
                dir.display()
            ));
        }
        report.tips.push(format!(
            "Check for conflicting processes: sudo fuser {}/video*",
            dir.display()
        ));
        report.tips.push(format!(
            "Test camera: ffmpeg -i {} -f null -",
            report.available_devices[0].display()
        ));
    }
    report
}

/// Emit the report through the log facade.
pub fn log_report(device: &str, report: &DeviceDiagnostics) {
    log::error!(
        "camera diagnostics for {}: {} candidate device(s)",
        device,
        report.available_devices.len()
    );
    for perm in &report.permissions {
        log::error!(
            "  {} readable={} writable={}",
            perm.path.display(),
            perm.readable,
            perm.writable
        );
    }
    for tip in &report.tips {
        log::error!("  hint: {}", tip);
    }
}

#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
}

#[cfg(target_os = "linux")]
fn access_ok(path: &Path, access: Access) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    let mode = match access {
        Access::Read => libc::R_OK,
        Access::Write => libc::W_OK,
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(not(target_os = "linux"))]
fn access_ok(path: &Path, access: Access) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => match access {
            Access::Read => true,
            Access::Write => !meta.permissions().readonly(),
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_reports_missing_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let report = diagnose_in(dir.path(), MAX_PROBED_DEVICES);
        assert!(report.available_devices.is_empty());
        assert_eq!(report.tips.len(), 1);
        assert!(report.tips[0].contains("No video devices"));
    }

    #[test]
    fn lists_present_nodes_with_access_bits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video0"), b"").unwrap();
        std::fs::write(dir.path().join("video3"), b"").unwrap();
        std::fs::write(dir.path().join("video12"), b"").unwrap();

        let report = diagnose_in(dir.path(), MAX_PROBED_DEVICES);
        assert_eq!(
            report.available_devices,
            vec![dir.path().join("video0"), dir.path().join("video3")]
        );
        assert!(report.permissions.iter().all(|p| p.readable));
        assert!(report.tips.iter().any(|t| t.contains("fuser")));
        assert!(report.tips.iter().any(|t| t.contains("ffmpeg")));
    }
}
