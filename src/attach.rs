//! Hypervisor handoff.
//!
//! The engine does not talk to the hypervisor. It describes what has to happen
//! there (replace the VM's CD-ROM devices, put the bootstrap image first, boot
//! from CD-ROM before disk) and leaves the JSON next to the image for the
//! tooling that does.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Boot devices in the order firmware should try them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootDevice {
    Cdrom,
    Disk,
}

/// Device reconfiguration for the target VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachRequest {
    pub vm: String,
    pub datastore: String,
    /// Bootstrap image path relative to the datastore; first CD-ROM.
    pub iso_path: String,
    /// Stock installer image on the second CD-ROM, if the install needs it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_iso_path: Option<String>,
    /// Existing CD-ROM devices are removed before attaching.
    pub replace_cdroms: bool,
    pub boot_order: Vec<BootDevice>,
}

impl AttachRequest {
    pub fn new(vm: impl Into<String>, datastore: impl Into<String>, iso_path: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            datastore: datastore.into(),
            iso_path: iso_path.into(),
            installer_iso_path: None,
            replace_cdroms: true,
            boot_order: vec![BootDevice::Cdrom, BootDevice::Disk],
        }
    }

    /// Datastore-qualified backing names, `[datastore] path`, in device order.
    pub fn backing_files(&self) -> Vec<String> {
        std::iter::once(&self.iso_path)
            .chain(self.installer_iso_path.as_ref())
            .map(|path| format!("[{}] {}", self.datastore, path))
            .collect()
    }
}

/// `<image>.attach.json`
pub fn attach_request_path(image: &Path) -> PathBuf {
    let mut path = image.as_os_str().to_owned();
    path.push(".attach.json");
    PathBuf::from(path)
}

pub fn write_attach_request(path: &Path, request: &AttachRequest) -> Result<()> {
    write_json_atomic(path, request)
        .with_context(|| format!("writing attach request '{}'", path.display()))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).with_context(|| "serializing attach request")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backing_files_in_device_order() {
        let mut request = AttachRequest::new("vm01", "iso", "vm01/bootstrap.iso");
        assert_eq!(request.backing_files(), vec!["[iso] vm01/bootstrap.iso"]);

        request.installer_iso_path = Some("ubuntu-24.04.3-live-server-amd64.iso".to_string());
        assert_eq!(
            request.backing_files(),
            vec![
                "[iso] vm01/bootstrap.iso",
                "[iso] ubuntu-24.04.3-live-server-amd64.iso"
            ]
        );
    }

    #[test]
    fn test_write_and_read_back() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("bootstrap.iso");
        let path = attach_request_path(&image);
        assert_eq!(path, temp.path().join("bootstrap.iso.attach.json"));

        let request = AttachRequest::new("vm01", "datastore1", "vm01/bootstrap.iso");
        write_attach_request(&path, &request).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"boot_order\""));
        assert!(json.contains("\"cdrom\""));
        assert!(!json.contains("installer_iso_path"));
        let parsed: AttachRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }
}
