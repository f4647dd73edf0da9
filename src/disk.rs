//! Backing-disk provisioning via `qemu-img`.
//!
//! Disk creation is a side-effecting operation owned by the lifecycle
//! manager's `create`, not a disk-format engine: one sparse qcow2 image at
//! a deterministic path per VM. The provisioner never touches the registry;
//! success or failure is reported to the caller, which decides whether to
//! commit the VM record.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Image file name inside a VM's storage directory.
pub const DISK_IMAGE: &str = "disk.qcow2";

/// Disk-provisioning capability, behind a trait so tests can run the
/// manager without `qemu-img` installed.
#[async_trait]
pub trait DiskProvisioner: Send + Sync {
    /// Create a sparse disk of `size_gb` gigabytes for the named VM and
    /// return its path. Tool failures surface as [`Error::DiskCreation`]
    /// with the captured diagnostic.
    async fn provision(&self, name: &str, size_gb: u32) -> Result<PathBuf>;
}

/// Creates qcow2 images with `qemu-img create`.
#[derive(Debug, Clone)]
pub struct QemuImgProvisioner {
    binary: String,
    vms_dir: PathBuf,
}

impl QemuImgProvisioner {
    pub fn new(binary: String, vms_dir: PathBuf) -> Self {
        Self { binary, vms_dir }
    }

    /// The deterministic image path for a VM: `<vms_dir>/<name>/disk.qcow2`.
    pub fn disk_path(&self, name: &str) -> PathBuf {
        self.vms_dir.join(name).join(DISK_IMAGE)
    }
}

#[async_trait]
impl DiskProvisioner for QemuImgProvisioner {
    async fn provision(&self, name: &str, size_gb: u32) -> Result<PathBuf> {
        let path = self.disk_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let size_arg = format!("{size_gb}G");
        debug!(name, path = %path.display(), size = %size_arg, "creating disk image");

        let output = Command::new(&self.binary)
            .args(["create", "-f", "qcow2"])
            .arg(&path)
            .arg(&size_arg)
            .output()
            .await
            .map_err(|e| Error::DiskCreation {
                name: name.to_string(),
                diagnostic: format!("failed to run `{}`: {e}", self.binary),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::DiskCreation {
                name: name.to_string(),
                diagnostic: format!(
                    "`{}` exited with {}: {}",
                    self.binary,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        info!(name, path = %path.display(), size_gb, "disk image created");
        Ok(path)
    }
}
