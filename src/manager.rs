//! The lifecycle manager: public operations over the VM state machine.
//!
//! ```text
//!            create                 start                  pause
//!   (none) ────────► Stopped ──► Starting ──► Running ◄─────────► Paused
//!                       ▲                        │     resume
//!                       └────────────────────────┴──── stop / reconcile
//! ```
//!
//! Every operation validates preconditions against the record's current
//! state before any side effect, delegates to the disk provisioner or the
//! hypervisor, and persists the resulting registry. A single async mutex
//! guards the registry read-modify-write cycle, serializing commands
//! against each other and against reconciliation passes.
//!
//! `start` holds the lock across the launch rendezvous: it reports success
//! only after the hypervisor pid is confirmed, so a `Running` record always
//! carries its pid.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WardenConfig;
use crate::disk::{DISK_IMAGE, DiskProvisioner, QemuImgProvisioner};
use crate::error::{Error, Result};
use crate::paths::WardenPaths;
use crate::registry::{RecoveryPolicy, Registry, RegistryStore, VmRecord, VmStatus};
use crate::supervisor::{Hypervisor, LaunchSpec, QemuHypervisor};

/// Per-VM pidfile name, inside [`WardenPaths::vm_dir`].
const PIDFILE: &str = "run.pid";

struct Inner {
    registry: Registry,
    store: RegistryStore,
}

/// Public-facing orchestrator composing the registry store, the disk
/// provisioner, and the process supervisor.
pub struct VmManager {
    state: Mutex<Inner>,
    hypervisor: Arc<dyn Hypervisor>,
    disks: Arc<dyn DiskProvisioner>,
    paths: WardenPaths,
    config: WardenConfig,
}

impl VmManager {
    /// Open the manager with the real QEMU collaborators, loading the
    /// registry from disk.
    pub fn open(
        paths: WardenPaths,
        config: WardenConfig,
        policy: RecoveryPolicy,
    ) -> Result<Self> {
        let hypervisor = Arc::new(QemuHypervisor::new(config.qemu_system.clone()));
        let disks = Arc::new(QemuImgProvisioner::new(
            config.qemu_img.clone(),
            paths.vms.clone(),
        ));
        Self::with_collaborators(paths, config, policy, hypervisor, disks)
    }

    /// Open the manager with explicit collaborators (tests substitute fake
    /// implementations here).
    pub fn with_collaborators(
        paths: WardenPaths,
        config: WardenConfig,
        policy: RecoveryPolicy,
        hypervisor: Arc<dyn Hypervisor>,
        disks: Arc<dyn DiskProvisioner>,
    ) -> Result<Self> {
        let store = RegistryStore::new(paths.registry_file());
        let registry = store.load(policy)?;
        Ok(Self {
            state: Mutex::new(Inner { registry, store }),
            hypervisor,
            disks,
            paths,
            config,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Create a new VM: validate, provision its backing disk, then insert
    /// the record in `Stopped` state and persist.
    ///
    /// All-or-nothing: if provisioning fails no record is created, and a
    /// duplicate or invalid configuration is rejected before the disk tool
    /// runs.
    pub async fn create(
        &self,
        name: &str,
        memory_mb: u32,
        disk_gb: u32,
        iso: Option<PathBuf>,
    ) -> Result<VmRecord> {
        validate_name(name)?;
        if memory_mb == 0 {
            return Err(Error::InvalidConfig {
                name: name.to_string(),
                reason: "memory size must be positive".to_string(),
            });
        }
        if disk_gb == 0 {
            return Err(Error::InvalidConfig {
                name: name.to_string(),
                reason: "disk size must be positive".to_string(),
            });
        }

        let mut inner = self.state.lock().await;
        if inner.registry.contains(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let disk_path = self.disks.provision(name, disk_gb).await?;
        debug!(name, disk = %disk_path.display(), "disk provisioned");

        let record = VmRecord::new(name.to_string(), memory_mb, disk_gb, iso);
        inner.registry.insert(record.clone())?;
        if let Err(e) = inner.store.save(&inner.registry) {
            // Keep memory and disk consistent: a record we could not
            // persist does not exist.
            inner.registry.remove(name);
            return Err(e);
        }

        info!(name, memory_mb, disk_gb, "VM created");
        Ok(record)
    }

    /// Start a stopped VM. The record passes through `Starting` while the
    /// hypervisor launches and is persisted as `Running` with its pid once
    /// the launch rendezvous confirms it. On launch failure the record
    /// remains `Stopped` and nothing is persisted.
    ///
    /// Calling `start` on a VM that is not stopped fails with
    /// [`Error::AlreadyRunning`] rather than launching a second process.
    pub async fn start(&self, name: &str) -> Result<VmRecord> {
        let mut inner = self.state.lock().await;

        let spec = {
            let record = inner
                .registry
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            if record.status != VmStatus::Stopped {
                return Err(Error::AlreadyRunning(name.to_string()));
            }
            record.status = VmStatus::Starting;

            let vm_dir = self.paths.vm_dir(name);
            LaunchSpec {
                name: record.name.clone(),
                memory_mb: record.memory_mb,
                disk_path: vm_dir.join(DISK_IMAGE),
                iso: record.iso.clone(),
                enable_kvm: self.config.enable_kvm,
                vnc_display: self.config.vnc_display,
                pidfile: vm_dir.join(PIDFILE),
            }
        };

        let launched = self.hypervisor.launch(&spec).await;

        let record = inner
            .registry
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let pid = match launched {
            Ok(pid) => pid,
            Err(e) => {
                record.status = VmStatus::Stopped;
                record.pid = None;
                return Err(e);
            }
        };

        record.status = VmStatus::Running;
        record.pid = Some(pid);
        let copy = record.clone();
        inner.store.save(&inner.registry)?;

        info!(name, pid, "VM started");
        Ok(copy)
    }

    /// Stop a VM by signalling its hypervisor process. A no-op on an
    /// already-stopped VM; a paused VM is additionally woken so the stop
    /// signal is not left pending on a suspended process. The manager does
    /// not wait for the process to actually exit — if the signal was
    /// ineffective the reconciler brings the record back in line on a
    /// later pass.
    pub async fn stop(&self, name: &str) -> Result<VmRecord> {
        let mut inner = self.state.lock().await;
        let record = inner
            .registry
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if record.status == VmStatus::Stopped {
            debug!(name, "stop: already stopped");
            return Ok(record.clone());
        }

        if let Some(pid) = record.pid {
            match self.hypervisor.signal_stop(pid) {
                Ok(()) => {
                    // A suspended process leaves SIGTERM pending until it
                    // is scheduled again, so it must be woken to die.
                    if record.status == VmStatus::Paused {
                        match self.hypervisor.signal_resume(pid) {
                            Ok(()) | Err(Error::ProcessNotFound(_)) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                // Already gone: effectively stopped.
                Err(Error::ProcessNotFound(_)) => {
                    debug!(name, pid, "stop: process already gone");
                }
                Err(e) => return Err(e),
            }
        }

        record.status = VmStatus::Stopped;
        record.pid = None;
        let copy = record.clone();
        inner.store.save(&inner.registry)?;

        info!(name, "VM stopped");
        Ok(copy)
    }

    /// Pause a running VM by suspending its hypervisor process.
    ///
    /// Guest-visible pause needs a management channel this design does not
    /// have; suspension is the documented approximation. If the process
    /// turns out to be gone, the record transitions to `Stopped` instead —
    /// the same correction a reconciliation pass would make.
    pub async fn pause(&self, name: &str) -> Result<VmRecord> {
        self.signal_transition(name, "pause", VmStatus::Running, VmStatus::Paused)
            .await
    }

    /// Resume a paused VM. Counterpart of [`VmManager::pause`]; same
    /// disappeared-process handling.
    pub async fn resume(&self, name: &str) -> Result<VmRecord> {
        self.signal_transition(name, "resume", VmStatus::Paused, VmStatus::Running)
            .await
    }

    /// Delete a VM. If it is not stopped a best-effort stop signal is sent
    /// first. The record is removed and the registry persisted; disk images
    /// stay on disk for manual cleanup.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.state.lock().await;
        let record = inner
            .registry
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if record.status != VmStatus::Stopped {
            if let Some(pid) = record.pid {
                match self.hypervisor.signal_stop(pid) {
                    Ok(()) => {
                        debug!(name, pid, "delete: stop signalled");
                        // As in stop: wake a suspended process so the
                        // pending SIGTERM is acted on.
                        if record.status == VmStatus::Paused {
                            match self.hypervisor.signal_resume(pid) {
                                Ok(()) | Err(Error::ProcessNotFound(_)) => {}
                                Err(e) => {
                                    warn!(name, pid, error = %e, "delete: wake after stop failed")
                                }
                            }
                        }
                    }
                    Err(Error::ProcessNotFound(_)) => {
                        debug!(name, pid, "delete: process already gone");
                    }
                    Err(e) => warn!(name, pid, error = %e, "delete: stop signal failed"),
                }
            }
        }

        inner.registry.remove(name);
        inner.store.save(&inner.registry)?;

        info!(name, "VM deleted");
        Ok(())
    }

    /// A copy of the named VM's record.
    pub async fn inspect(&self, name: &str) -> Result<VmRecord> {
        let inner = self.state.lock().await;
        inner
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Copies of all records, in registry insertion order. The order is
    /// stable across reconciliation passes.
    pub async fn list(&self) -> Vec<VmRecord> {
        let inner = self.state.lock().await;
        inner.registry.iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// One reconciliation pass: probe every non-stopped record's pid and
    /// mark records whose process has exited as `Stopped`. Corrections are
    /// logged state transitions, not errors. The registry is persisted at
    /// most once per pass, and only when something changed.
    ///
    /// Never promotes a record out of `Stopped` — reconciliation detects
    /// disappearance, not appearance. Idempotent.
    ///
    /// Returns the number of corrected records.
    pub async fn reconcile_once(&self) -> Result<usize> {
        let mut inner = self.state.lock().await;

        let mut corrected = 0;
        for record in inner.registry.iter_mut() {
            if record.status == VmStatus::Stopped {
                continue;
            }
            let Some(pid) = record.pid else { continue };
            if self.hypervisor.is_alive(pid) {
                continue;
            }

            info!(
                name = %record.name,
                pid,
                from = %record.status,
                "process exited outside the manager; marking stopped"
            );
            record.status = VmStatus::Stopped;
            record.pid = None;
            corrected += 1;
        }

        if corrected > 0 {
            inner.store.save(&inner.registry)?;
        }
        Ok(corrected)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Shared pause/resume plumbing: require `from`, deliver the matching
    /// signal, persist `to`. A disappeared process becomes a `Stopped`
    /// record rather than a hard failure.
    async fn signal_transition(
        &self,
        name: &str,
        op: &'static str,
        from: VmStatus,
        to: VmStatus,
    ) -> Result<VmRecord> {
        let mut inner = self.state.lock().await;
        let record = inner
            .registry
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        if record.status != from {
            return Err(Error::InvalidTransition {
                name: name.to_string(),
                status: record.status,
                op,
            });
        }
        let Some(pid) = record.pid else {
            // Unreachable while the pid/status invariant holds; treat like
            // a dead process.
            record.status = VmStatus::Stopped;
            let copy = record.clone();
            inner.store.save(&inner.registry)?;
            return Ok(copy);
        };

        let signalled = match to {
            VmStatus::Paused => self.hypervisor.signal_pause(pid),
            _ => self.hypervisor.signal_resume(pid),
        };

        match signalled {
            Ok(()) => {
                record.status = to;
                let copy = record.clone();
                inner.store.save(&inner.registry)?;
                info!(name, pid, %to, "VM state changed");
                Ok(copy)
            }
            Err(Error::ProcessNotFound(_)) => {
                warn!(name, pid, "process gone during {op}; marking stopped");
                record.status = VmStatus::Stopped;
                record.pid = None;
                let copy = record.clone();
                inner.store.save(&inner.registry)?;
                Ok(copy)
            }
            Err(e) => Err(e),
        }
    }
}

/// Names become filesystem path components, so the charset is restricted.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidConfig {
            name: name.to_string(),
            reason: "name must be non-empty, use only [A-Za-z0-9._-], and not begin with '.'"
                .to_string(),
        })
    }
}
