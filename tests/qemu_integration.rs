//! Integration tests that exercise the real `qemu-img` tool.
//!
//! Because they require qemu-img on PATH, they are gated with the
//! `qemu-integration-tests` feature flag:
//!
//! ```bash
//! cargo test --features qemu-integration-tests --test qemu_integration
//! ```

#![cfg(feature = "qemu-integration-tests")]

use std::sync::Arc;

use async_trait::async_trait;

use vmwarden::config::WardenConfig;
use vmwarden::disk::{DiskProvisioner, QemuImgProvisioner};
use vmwarden::error::{Error, Result};
use vmwarden::paths::WardenPaths;
use vmwarden::registry::{RecoveryPolicy, VmStatus};
use vmwarden::supervisor::{Hypervisor, LaunchSpec};
use vmwarden::VmManager;

/// qcow2 image magic: "QFI\xfb".
const QCOW2_MAGIC: [u8; 4] = [0x51, 0x46, 0x49, 0xfb];

/// These tests only create disks; launching stays out of scope.
struct NoLaunchHypervisor;

#[async_trait]
impl Hypervisor for NoLaunchHypervisor {
    async fn launch(&self, spec: &LaunchSpec) -> Result<i32> {
        Err(Error::Launch {
            name: spec.name.clone(),
            diagnostic: "launch is not exercised by this test".to_string(),
        })
    }

    fn signal_stop(&self, pid: i32) -> Result<()> {
        Err(Error::ProcessNotFound(pid))
    }

    fn signal_pause(&self, pid: i32) -> Result<()> {
        Err(Error::ProcessNotFound(pid))
    }

    fn signal_resume(&self, pid: i32) -> Result<()> {
        Err(Error::ProcessNotFound(pid))
    }

    fn is_alive(&self, _pid: i32) -> bool {
        false
    }
}

#[tokio::test]
async fn provisioner_creates_a_real_qcow2_image() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner =
        QemuImgProvisioner::new("qemu-img".to_string(), dir.path().to_path_buf());

    let path = provisioner.provision("vm1", 1).await.expect("qemu-img create");
    assert_eq!(path, dir.path().join("vm1").join("disk.qcow2"));
    assert!(path.is_file());

    let header = std::fs::read(&path).unwrap();
    assert_eq!(&header[..4], &QCOW2_MAGIC, "file must be a qcow2 image");
}

#[tokio::test]
async fn create_provisions_the_disk_under_the_vm_dir() {
    let dir = tempfile::tempdir().unwrap();
    let paths = WardenPaths::rooted_at(dir.path().to_path_buf());
    let disk_path = paths.vm_dir("disky").join("disk.qcow2");

    let manager = VmManager::with_collaborators(
        paths,
        WardenConfig::default(),
        RecoveryPolicy::Strict,
        Arc::new(NoLaunchHypervisor),
        Arc::new(QemuImgProvisioner::new(
            "qemu-img".to_string(),
            dir.path().join("vms"),
        )),
    )
    .expect("open manager");

    let record = manager.create("disky", 512, 1, None).await.expect("create");
    assert_eq!(record.status, VmStatus::Stopped);
    assert!(disk_path.is_file(), "disk image must exist at {}", disk_path.display());
}

#[tokio::test]
async fn sparse_disk_larger_than_backing_file() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner =
        QemuImgProvisioner::new("qemu-img".to_string(), dir.path().to_path_buf());

    // 2 GB virtual size, but the sparse qcow2 on disk stays tiny.
    let path = provisioner.provision("big", 2).await.unwrap();
    let on_disk = std::fs::metadata(&path).unwrap().len();
    assert!(on_disk < 64 * 1024 * 1024, "qcow2 must be sparse, got {on_disk} bytes");
}
